pub mod frame_table;
pub mod mmap;
pub mod spt;
pub mod swapping;
pub mod user;

use core::fmt;
pub use kidneyos_shared::mem::{
    is_user_vaddr, page_offset, page_round_down, page_round_up, PAGE_FRAME_SIZE, PHYS_BASE,
};

/// The contents of one page or frame.
pub type Page = [u8; PAGE_FRAME_SIZE];

/// A virtual page number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vpn(usize);

impl Vpn {
    /// The page containing `addr`.
    pub const fn containing(addr: usize) -> Self {
        Self(addr / PAGE_FRAME_SIZE)
    }

    /// The first address of the page.
    pub const fn addr(self) -> usize {
        self.0 * PAGE_FRAME_SIZE
    }

    /// The page `pages` pages above this one.
    pub const fn add(self, pages: usize) -> Self {
        Self(self.0 + pages)
    }
}

impl fmt::Debug for Vpn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vpn({:#010x})", self.addr())
    }
}
