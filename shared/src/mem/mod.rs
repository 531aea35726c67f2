use crate::sizes::KB;

// Page size is 4KB. This is a property of x86 processors.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;
pub const PAGE_MASK: usize = PAGE_FRAME_SIZE - 1;

// Any virtual address at or above OFFSET is a kernel address.
pub const OFFSET: usize = 0x80000000;
pub const PHYS_BASE: usize = OFFSET;

/// Rounds `addr` down to the start of its page.
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !PAGE_MASK
}

#[inline]
pub const fn page_round_up(addr: usize) -> usize {
    page_round_down(addr + PAGE_MASK)
}

#[inline]
pub const fn page_offset(addr: usize) -> usize {
    addr & PAGE_MASK
}

#[inline]
pub const fn is_user_vaddr(addr: usize) -> bool {
    addr < PHYS_BASE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(page_round_down(0x0804_8123), 0x0804_8000);
        assert_eq!(page_round_up(0x0804_8123), 0x0804_9000);
        assert_eq!(page_round_up(0x0804_8000), 0x0804_8000);
        assert_eq!(page_offset(0x0804_8123), 0x123);
        assert!(is_user_vaddr(PHYS_BASE - 1));
        assert!(!is_user_vaddr(PHYS_BASE));
    }
}
