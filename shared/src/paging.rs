// https://wiki.osdev.org/Paging

// Avoids lots of warnings about casting usize to u32 which cannot result in
// truncation on a 32-bit platform, which is all we support. The hosted test
// build only ever feeds user addresses below OFFSET through these casts.
#![allow(clippy::cast_possible_truncation)]

use crate::mem::PAGE_FRAME_SIZE;
use alloc::{boxed::Box, collections::BTreeMap};
use arbitrary_int::{u10, u12, u20};
use bitbybit::bitfield;
use core::{
    mem::size_of,
    ops::{Deref, DerefMut},
};

const PAGE_TABLE_LEN: usize = PAGE_FRAME_SIZE / size_of::<PageTableEntry>();

#[repr(align(4096))]
pub struct PageTable(pub [PageTableEntry; PAGE_TABLE_LEN]);

impl Default for PageTable {
    fn default() -> Self {
        Self([PageTableEntry::DEFAULT; PAGE_TABLE_LEN])
    }
}

impl Deref for PageTable {
    type Target = [PageTableEntry; PAGE_TABLE_LEN];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PageTable {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[bitfield(u32, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    read_write: bool,
    #[bit(2, rw)]
    user_supervisor: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(6, rw)]
    dirty: bool,
    #[bits(12..=31, rw)]
    page_frame_address: u20,
}

impl PageTableEntry {
    /// A present entry pointing at physical frame number `frame`.
    pub fn mapping(frame: usize, writable: bool, user: bool) -> Self {
        Self::DEFAULT
            .with_present(true)
            .with_read_write(writable)
            .with_user_supervisor(user)
            .with_page_frame_address(u20::new(frame as u32))
    }

    pub fn frame(&self) -> usize {
        self.page_frame_address().value() as usize
    }
}

#[bitfield(u32)]
pub struct VirtualAddress {
    #[bits(22..=31, r)]
    page_directory_index: u10,
    #[bits(12..=21, r)]
    page_table_index: u10,
    #[bits(0..=11, r)]
    offset: u12,
}

impl VirtualAddress {
    pub fn from_usize(addr: usize) -> Self {
        Self::new_with_raw_value(addr as u32)
    }
}

/// A two-level x86 page directory kept in ordinary heap memory. Page tables
/// are allocated the first time an address inside them is mapped.
#[derive(Default)]
pub struct PageDirectory {
    tables: BTreeMap<u16, Box<PageTable>>,
}

impl PageDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, vaddr: usize) -> Option<&PageTableEntry> {
        let vaddr = VirtualAddress::from_usize(vaddr);
        let table = self.tables.get(&vaddr.page_directory_index().value())?;
        Some(&table[usize::from(vaddr.page_table_index().value())])
    }

    fn slot_mut(&mut self, vaddr: usize) -> &mut PageTableEntry {
        let vaddr = VirtualAddress::from_usize(vaddr);
        let table = self
            .tables
            .entry(vaddr.page_directory_index().value())
            .or_default();
        &mut table[usize::from(vaddr.page_table_index().value())]
    }

    /// Installs `entry` for the page containing `vaddr`, replacing whatever
    /// was there.
    pub fn install(&mut self, vaddr: usize, entry: PageTableEntry) {
        *self.slot_mut(vaddr) = entry;
    }

    pub fn map(&mut self, vaddr: usize, frame: usize, writable: bool, user: bool) {
        self.install(vaddr, PageTableEntry::mapping(frame, writable, user));
    }

    /// Clears the mapping for the page containing `vaddr` and returns the
    /// entry it held, with its accessed and dirty bits, if it was present.
    pub fn unmap(&mut self, vaddr: usize) -> Option<PageTableEntry> {
        let entry = self.entry(vaddr)?;
        *self.slot_mut(vaddr) = PageTableEntry::DEFAULT;
        Some(entry)
    }

    /// The present entry for the page containing `vaddr`.
    pub fn entry(&self, vaddr: usize) -> Option<PageTableEntry> {
        self.slot(vaddr).copied().filter(PageTableEntry::present)
    }

    pub fn entry_mut(&mut self, vaddr: usize) -> Option<&mut PageTableEntry> {
        if self.entry(vaddr).is_none() {
            return None;
        }
        Some(self.slot_mut(vaddr))
    }

    pub fn is_mapped(&self, vaddr: usize) -> bool {
        self.entry(vaddr).is_some()
    }

    /// Drops every page table, leaving nothing mapped.
    pub fn clear(&mut self) {
        self.tables.clear();
    }
}
