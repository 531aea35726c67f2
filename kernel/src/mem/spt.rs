//! The supplemental page table: for every virtual page of a process, where
//! its contents live right now and how to bring them back.
//!
//! Locking: `fault_lock` serializes fault resolution, unmapping and teardown
//! of one process. `table` guards the entries and the hardware page table
//! and is never held while the frame table or swap store lock is taken;
//! every path that needs both reads under `table`, drops it, does the frame
//! or swap work with the frame pinned, then locks `table` again.

use crate::{
    error::{FaultKind, LoadError, Result, VmError},
    mem::{
        frame_table::{FrameId, FrameOwner},
        page_offset,
        swapping::SwapSlot,
        Page, Vpn, PAGE_FRAME_SIZE,
    },
    sync::{relax, Mutex},
    system::System,
    threading::process::Pid,
    vfs::{self, FileRef},
};
use alloc::{collections::BTreeMap, vec::Vec};
use core::{fmt, mem};
use kidneyos_shared::paging::{PageDirectory, PageTableEntry};
use log::{debug, trace, warn};

/// File contents that back a page.
#[derive(Clone)]
pub struct FileBacking {
    pub file: FileRef,
    /// Where the page starts in the file.
    pub offset: u64,
    /// Bytes read from the file; the rest of the page is zero.
    pub length: usize,
    /// Dirty contents go back to the file instead of to swap.
    pub write_back: bool,
}

impl FileBacking {
    fn read_into(&self, page: &mut Page) -> Result<()> {
        vfs::read_exact_at(&*self.file, self.offset, &mut page[..self.length])?;
        page[self.length..].fill(0);
        Ok(())
    }

    fn write_from(&self, page: &Page) -> Result<()> {
        vfs::write_all_at(&*self.file, self.offset, &page[..self.length])?;
        Ok(())
    }
}

impl fmt::Debug for FileBacking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBacking")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("write_back", &self.write_back)
            .finish_non_exhaustive()
    }
}

/// What a resident page was populated from.
#[derive(Clone, Debug)]
pub enum Origin {
    File(FileBacking),
    Zero,
    /// Came back from swap; has no clean copy anywhere else.
    Anonymous,
}

#[derive(Clone, Debug)]
pub enum PageState {
    Unmapped,
    LazyFile(FileBacking),
    LazyZero,
    Framed { frame: FrameId, origin: Origin },
    Swapped { slot: SwapSlot },
}

/// [`PageState`] without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageKind {
    Unmapped,
    LazyFile,
    LazyZero,
    Framed,
    Swapped,
}

impl PageState {
    pub fn kind(&self) -> PageKind {
        match self {
            Self::Unmapped => PageKind::Unmapped,
            Self::LazyFile(_) => PageKind::LazyFile,
            Self::LazyZero => PageKind::LazyZero,
            Self::Framed { .. } => PageKind::Framed,
            Self::Swapped { .. } => PageKind::Swapped,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PageEntry {
    pub writable: bool,
    pub state: PageState,
}

/// A copy between a user page and a kernel buffer.
pub(crate) enum Access<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

/// How a faulting page gets its contents.
enum Fill {
    File(FileBacking),
    Zero,
    Swap(SwapSlot),
}

/// Work left for the evictor after the mapping has been removed.
enum Transfer {
    WriteBack(FileBacking),
    Swap,
}

#[derive(Default)]
struct Table {
    entries: BTreeMap<Vpn, PageEntry>,
    page_directory: PageDirectory,
    torn_down: bool,
}

impl Table {
    /// Whether `vpn` still holds `frame`.
    fn holds(&self, vpn: Vpn, frame: FrameId) -> bool {
        matches!(
            self.entries.get(&vpn),
            Some(PageEntry { state: PageState::Framed { frame: held, .. }, .. }) if *held == frame
        )
    }
}

pub struct SupplementalPageTable {
    pid: Pid,
    fault_lock: Mutex<()>,
    table: Mutex<Table>,
}

impl SupplementalPageTable {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            fault_lock: Mutex::new(()),
            table: Mutex::default(),
        }
    }

    fn owner(&self, vpn: Vpn) -> FrameOwner {
        FrameOwner { pid: self.pid, vpn }
    }

    /// Registers a page to be read from `file` at `offset` on first touch.
    /// Bytes past `length` are zero.
    pub fn register_lazy_file(
        &self,
        vpn: Vpn,
        file: FileRef,
        offset: u64,
        length: usize,
        writable: bool,
    ) -> Result<()> {
        self.register(
            vpn,
            writable,
            PageState::LazyFile(FileBacking {
                file,
                offset,
                length,
                write_back: false,
            }),
        )
    }

    /// Registers a writable page of a memory-mapped file. Its dirty contents
    /// are written back to the file, never to swap.
    pub fn register_mapped_file(
        &self,
        vpn: Vpn,
        file: FileRef,
        offset: u64,
        length: usize,
    ) -> Result<()> {
        self.register(
            vpn,
            true,
            PageState::LazyFile(FileBacking {
                file,
                offset,
                length,
                write_back: true,
            }),
        )
    }

    pub fn register_zero(&self, vpn: Vpn, writable: bool) -> Result<()> {
        self.register(vpn, writable, PageState::LazyZero)
    }

    fn register(&self, vpn: Vpn, writable: bool, state: PageState) -> Result<()> {
        if let PageState::LazyFile(backing) = &state {
            debug_assert!(backing.length <= PAGE_FRAME_SIZE);
        }

        let mut table = self.table.lock();
        if table.torn_down {
            return Err(VmError::NoSuchProcess(self.pid));
        }
        if table
            .entries
            .get(&vpn)
            .is_some_and(|entry| entry.state.kind() != PageKind::Unmapped)
        {
            return Err(LoadError::Overlap(vpn.addr()).into());
        }
        debug!("pid {}: register {vpn:?} as {:?}", self.pid, state.kind());
        table.entries.insert(vpn, PageEntry { writable, state });
        Ok(())
    }

    /// Registers a zero page and populates it right away.
    pub fn install_zeroed(&self, sys: &System, vpn: Vpn, writable: bool) -> Result<()> {
        self.register_zero(vpn, writable)?;
        self.resolve_fault(sys, vpn, false)
    }

    /// Brings `vpn` into a frame and maps it.
    ///
    /// # Errors
    ///
    /// A fault error if the page is not registered or `is_write` hits a
    /// read-only page; otherwise whatever acquiring or filling the frame
    /// failed with, in which case the page is left as it was.
    pub fn resolve_fault(&self, sys: &System, vpn: Vpn, is_write: bool) -> Result<()> {
        let _faulting = self.fault_lock.lock();
        let fault = |kind| VmError::Fault {
            addr: vpn.addr(),
            kind,
        };

        let (writable, fill) = loop {
            let table = self.table.lock();
            let entry = match table.entries.get(&vpn) {
                Some(entry) if !table.torn_down => entry,
                _ => return Err(fault(FaultKind::NotMapped)),
            };
            if is_write && !entry.writable {
                return Err(fault(FaultKind::ReadOnly));
            }
            let fill = match &entry.state {
                PageState::Unmapped => return Err(fault(FaultKind::NotMapped)),
                PageState::Framed { .. } if table.page_directory.is_mapped(vpn.addr()) => {
                    return Ok(())
                }
                // Being evicted; wait for the evictor to settle the entry.
                PageState::Framed { .. } => None,
                PageState::LazyFile(backing) => Some(Fill::File(backing.clone())),
                PageState::LazyZero => Some(Fill::Zero),
                PageState::Swapped { slot } => Some(Fill::Swap(*slot)),
            };
            let writable = entry.writable;
            drop(table);

            match fill {
                Some(fill) => break (writable, fill),
                None => relax(),
            }
        };

        let owner = self.owner(vpn);
        let frames = sys.frames();
        let frame = frames.acquire(owner, sys)?;

        let filled = frames.with_page_mut(frame, |page| -> Result<Origin> {
            match &fill {
                Fill::File(backing) => {
                    backing.read_into(page)?;
                    Ok(Origin::File(backing.clone()))
                }
                Fill::Zero => {
                    page.fill(0);
                    Ok(Origin::Zero)
                }
                Fill::Swap(slot) => {
                    sys.swap().read_slot(*slot, page)?;
                    Ok(Origin::Anonymous)
                }
            }
        });
        let origin = match filled {
            Ok(origin) => origin,
            Err(err) => {
                frames.release(frame, owner);
                frames.unpin(frame);
                return Err(err);
            }
        };

        let mut table = self.table.lock();
        if let Some(entry) = table.entries.get_mut(&vpn) {
            entry.state = PageState::Framed { frame, origin };
        }
        table
            .page_directory
            .map(vpn.addr(), frame.index(), writable, true);
        drop(table);
        trace!("pid {}: {vpn:?} resident in frame {}", self.pid, frame.index());

        frames.unpin(frame);
        if let Fill::Swap(slot) = fill {
            sys.swap().free_slot(slot)?;
        }
        Ok(())
    }

    /// Called by the frame table when `frame`, which holds `vpn`, has been
    /// chosen for eviction. The hardware mapping is removed before the page
    /// is saved so the process cannot change it mid-transfer.
    pub fn evict_notify(&self, sys: &System, vpn: Vpn, frame: FrameId) -> Result<()> {
        let (transfer, saved) = {
            let mut table = self.table.lock();
            if table.torn_down {
                return Ok(());
            }
            let Table {
                entries,
                page_directory,
                ..
            } = &mut *table;
            let Some(entry) = entries.get_mut(&vpn) else {
                return Ok(());
            };
            let origin = match &entry.state {
                PageState::Framed { frame: held, origin } if *held == frame => origin.clone(),
                _ => return Ok(()),
            };

            let saved = page_directory
                .unmap(vpn.addr())
                .unwrap_or(PageTableEntry::DEFAULT.with_dirty(true));
            let dirty = saved.dirty();
            let transfer = match origin {
                Origin::File(backing) if !dirty => {
                    entry.state = PageState::LazyFile(backing);
                    return Ok(());
                }
                Origin::Zero if !dirty => {
                    entry.state = PageState::LazyZero;
                    return Ok(());
                }
                Origin::File(backing) if backing.write_back => Transfer::WriteBack(backing),
                _ => Transfer::Swap,
            };
            (transfer, saved)
        };

        let outcome = match transfer {
            Transfer::WriteBack(backing) => sys
                .frames()
                .with_page(frame, |page| backing.write_from(page))
                .map(|()| PageState::LazyFile(backing)),
            Transfer::Swap => Self::swap_out(sys, frame).map(|slot| PageState::Swapped { slot }),
        };

        let mut table = self.table.lock();
        let still_ours = !table.torn_down && table.holds(vpn, frame);
        match outcome {
            Ok(state) if still_ours => {
                debug!("pid {}: {vpn:?} evicted to {:?}", self.pid, state.kind());
                if let Some(entry) = table.entries.get_mut(&vpn) {
                    entry.state = state;
                }
                Ok(())
            }
            Ok(state) => {
                drop(table);
                // The page went away while it was being saved.
                if let PageState::Swapped { slot } = state {
                    sys.swap().free_slot(slot)?;
                }
                Ok(())
            }
            Err(err) => {
                if still_ours {
                    table.page_directory.install(vpn.addr(), saved);
                }
                Err(err)
            }
        }
    }

    fn swap_out(sys: &System, frame: FrameId) -> Result<SwapSlot> {
        let swap = sys.swap();
        let slot = swap.allocate_slot()?;
        if let Err(err) = sys
            .frames()
            .with_page(frame, |page| swap.write_slot(slot, page))
        {
            swap.free_slot(slot)?;
            return Err(err);
        }
        Ok(slot)
    }

    /// Removes `pages` pages starting at `first`, writing dirty pages of
    /// file mappings back to their file first.
    pub fn unmap_pages(&self, sys: &System, first: Vpn, pages: usize) -> Result<()> {
        let _faulting = self.fault_lock.lock();
        let mut result = Ok(());
        for i in 0..pages {
            if let Err(err) = self.unmap_page(sys, first.add(i)) {
                warn!("pid {}: unmapping {:?}: {err}", self.pid, first.add(i));
                result = result.and(Err(err));
            }
        }
        result
    }

    fn unmap_page(&self, sys: &System, vpn: Vpn) -> Result<()> {
        let owner = self.owner(vpn);
        let frames = sys.frames();

        let frame = loop {
            let mut table = self.table.lock();
            let resident = match table.entries.get(&vpn).map(|entry| &entry.state) {
                None => return Ok(()),
                Some(PageState::Framed { frame, .. }) => {
                    table.page_directory.is_mapped(vpn.addr()).then_some(*frame)
                }
                Some(_) => {
                    let removed = table.entries.remove(&vpn);
                    drop(table);
                    if let Some(PageEntry {
                        state: PageState::Swapped { slot },
                        ..
                    }) = removed
                    {
                        sys.swap().free_slot(slot)?;
                    }
                    return Ok(());
                }
            };
            drop(table);

            // Either mid-eviction or pinned by an evictor that has not
            // reached us yet.
            match resident {
                Some(frame) if frames.pin_owned(frame, owner) => break frame,
                _ => relax(),
            }
        };

        let (entry, pte) = {
            let mut table = self.table.lock();
            (
                table.entries.remove(&vpn),
                table.page_directory.unmap(vpn.addr()),
            )
        };
        let result = match (entry.map(|entry| entry.state), pte) {
            (Some(PageState::Framed { origin: Origin::File(backing), .. }), Some(pte))
                if backing.write_back && pte.dirty() =>
            {
                frames.with_page(frame, |page| backing.write_from(page))
            }
            _ => Ok(()),
        };
        frames.release(frame, owner);
        frames.unpin(frame);
        result
    }

    /// Releases every frame and swap slot the table owns and empties it.
    /// Later calls do nothing.
    pub fn teardown(&self, sys: &System) -> Result<()> {
        let _faulting = self.fault_lock.lock();
        let entries = {
            let mut table = self.table.lock();
            if table.torn_down {
                return Ok(());
            }
            table.torn_down = true;
            table.page_directory.clear();
            mem::take(&mut table.entries)
        };
        debug!("pid {}: tearing down {} pages", self.pid, entries.len());

        let mut result = Ok(());
        for (vpn, entry) in entries {
            match entry.state {
                PageState::Framed { frame, .. } => {
                    sys.frames().release(frame, self.owner(vpn));
                }
                PageState::Swapped { slot } => {
                    result = result.and(sys.swap().free_slot(slot));
                }
                _ => {}
            }
        }
        result
    }

    /// Copies between `vaddr` and `access` if the page is mapped with the
    /// needed permission, updating the accessed and dirty bits like the MMU
    /// would. The access must not cross a page boundary. Returns `false` if
    /// the access has to fault.
    pub(crate) fn access(&self, sys: &System, vaddr: usize, access: Access<'_>) -> bool {
        let write = matches!(access, Access::Write(_));
        let mut table = self.table.lock();
        let Some(pte) = table.page_directory.entry_mut(vaddr) else {
            return false;
        };
        if write && !pte.read_write() {
            return false;
        }
        *pte = pte.with_accessed(true).with_dirty(pte.dirty() || write);
        let frame = FrameId::new(pte.frame());

        let frames = sys.frames();
        frames.mark_accessed(frame);
        let offset = page_offset(vaddr);
        match access {
            Access::Read(buf) => frames.with_page(frame, |page| {
                buf.copy_from_slice(&page[offset..offset + buf.len()]);
            }),
            Access::Write(data) => frames.with_page_mut(frame, |page| {
                page[offset..offset + data.len()].copy_from_slice(data);
            }),
        }
        true
    }

    pub fn state(&self, vpn: Vpn) -> PageKind {
        self.table
            .lock()
            .entries
            .get(&vpn)
            .map_or(PageKind::Unmapped, |entry| entry.state.kind())
    }

    pub fn is_writable(&self, vpn: Vpn) -> Option<bool> {
        self.table.lock().entries.get(&vpn).map(|entry| entry.writable)
    }

    /// The hardware page table entry for `vpn`, if it is mapped.
    pub fn page_table_entry(&self, vpn: Vpn) -> Option<PageTableEntry> {
        self.table.lock().page_directory.entry(vpn.addr())
    }

    pub fn resident_frames(&self) -> Vec<(Vpn, FrameId)> {
        self.table
            .lock()
            .entries
            .iter()
            .filter_map(|(&vpn, entry)| match entry.state {
                PageState::Framed { frame, .. } => Some((vpn, frame)),
                _ => None,
            })
            .collect()
    }

    /// Whether none of the `pages` pages starting at `first` is registered.
    pub fn is_range_free(&self, first: Vpn, pages: usize) -> bool {
        let table = self.table.lock();
        table
            .entries
            .range(first..first.add(pages))
            .all(|(_, entry)| entry.state.kind() == PageKind::Unmapped)
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_torn_down(&self) -> bool {
        self.table.lock().torn_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Resource,
        system::test_support::system,
        threading::process::Process,
        vfs::tempfs::TempFile,
    };
    use alloc::{sync::Arc, vec, vec::Vec};
    use proptest::prelude::*;

    const BASE: usize = 0x1000_0000;

    fn vpn(page: usize) -> Vpn {
        Vpn::containing(BASE + page * PAGE_FRAME_SIZE)
    }

    fn read_page(sys: &System, process: &Process, page: usize) -> Vec<u8> {
        let mut buf = vec![0; PAGE_FRAME_SIZE];
        sys.read_user(process.pid(), vpn(page).addr(), &mut buf)
            .unwrap();
        buf
    }

    fn file_with(pattern: impl Fn(usize) -> u8, len: usize) -> Arc<TempFile> {
        Arc::new(TempFile::new((0..len).map(pattern).collect()))
    }

    #[test]
    fn register_twice_fails() {
        let (sys, _) = system(4, 4);
        let process = sys.create_process("p").unwrap();
        let spt = process.spt();
        spt.register_zero(vpn(0), true).unwrap();
        assert_eq!(
            spt.register_zero(vpn(0), false),
            Err(LoadError::Overlap(vpn(0).addr()).into())
        );
        assert_eq!(spt.is_writable(vpn(0)), Some(true));
        assert_eq!(spt.state(vpn(1)), PageKind::Unmapped);
    }

    #[test]
    fn lazy_file_page_is_padded_with_zeros() {
        let (sys, _) = system(4, 4);
        let process = sys.create_process("p").unwrap();
        let file = file_with(|i| (i % 251) as u8 + 1, 6000);
        process
            .spt()
            .register_lazy_file(vpn(0), file.clone(), 4096, 100, false)
            .unwrap();
        assert_eq!(process.spt().state(vpn(0)), PageKind::LazyFile);

        let page = read_page(&sys, &process, 0);
        assert_eq!(&page[..100], &file.contents()[4096..4196]);
        assert!(page[100..].iter().all(|&b| b == 0));
        assert_eq!(process.spt().state(vpn(0)), PageKind::Framed);
    }

    #[test]
    fn fault_on_resident_page_is_noop() {
        let (sys, _) = system(4, 4);
        let process = sys.create_process("p").unwrap();
        let spt = process.spt();
        spt.install_zeroed(&sys, vpn(0), true).unwrap();
        let before = spt.resident_frames();
        spt.resolve_fault(&sys, vpn(0), true).unwrap();
        assert_eq!(spt.resident_frames(), before);
        assert_eq!(sys.frames().free_frames(), 3);
    }

    #[test]
    fn write_to_read_only_page_faults() {
        let (sys, _) = system(4, 4);
        let process = sys.create_process("p").unwrap();
        let spt = process.spt();
        spt.register_zero(vpn(0), false).unwrap();
        assert_eq!(
            spt.resolve_fault(&sys, vpn(0), true),
            Err(VmError::Fault {
                addr: vpn(0).addr(),
                kind: FaultKind::ReadOnly
            })
        );
        assert_eq!(
            spt.resolve_fault(&sys, vpn(1), false),
            Err(VmError::Fault {
                addr: vpn(1).addr(),
                kind: FaultKind::NotMapped
            })
        );
        assert_eq!(spt.state(vpn(0)), PageKind::LazyZero);
    }

    #[test]
    fn clean_file_page_reverts_on_eviction() {
        let (sys, _) = system(1, 4);
        let process = sys.create_process("p").unwrap();
        let spt = process.spt();
        let file = file_with(|i| i as u8, PAGE_FRAME_SIZE);
        spt.register_lazy_file(vpn(0), file, 0, PAGE_FRAME_SIZE, true)
            .unwrap();
        spt.register_zero(vpn(1), true).unwrap();

        read_page(&sys, &process, 0);
        read_page(&sys, &process, 1);
        assert_eq!(spt.state(vpn(0)), PageKind::LazyFile);
        assert_eq!(spt.state(vpn(1)), PageKind::Framed);
        assert_eq!(sys.swap().free_slots(), 4);

        // Clean zero pages are dropped as well.
        read_page(&sys, &process, 0);
        assert_eq!(spt.state(vpn(1)), PageKind::LazyZero);
        assert_eq!(sys.frames().evictions(), 2);
    }

    #[test]
    fn dirty_page_goes_to_swap_and_back() {
        let (sys, _) = system(1, 4);
        let process = sys.create_process("p").unwrap();
        let spt = process.spt();
        spt.register_zero(vpn(0), true).unwrap();
        spt.register_zero(vpn(1), true).unwrap();

        sys.write_user(process.pid(), vpn(0).addr() + 10, b"dirty")
            .unwrap();
        read_page(&sys, &process, 1);
        assert_eq!(spt.state(vpn(0)), PageKind::Swapped);
        assert_eq!(sys.swap().free_slots(), 3);

        let page = read_page(&sys, &process, 0);
        assert_eq!(&page[10..15], b"dirty");
        assert_eq!(spt.state(vpn(0)), PageKind::Framed);
        assert_eq!(sys.swap().free_slots(), 4);
    }

    #[test]
    fn swap_full_is_reported() {
        let (sys, _) = system(1, 0);
        let process = sys.create_process("p").unwrap();
        let spt = process.spt();
        spt.register_zero(vpn(0), true).unwrap();
        spt.register_zero(vpn(1), true).unwrap();
        sys.write_user(process.pid(), vpn(0).addr(), b"x").unwrap();

        assert_eq!(
            spt.resolve_fault(&sys, vpn(1), false),
            Err(VmError::Exhausted(Resource::Swap))
        );
        assert_eq!(spt.state(vpn(0)), PageKind::Framed);
        assert_eq!(spt.state(vpn(1)), PageKind::LazyZero);
        assert!(spt.page_table_entry(vpn(0)).unwrap().dirty());
        assert_eq!(read_page(&sys, &process, 0)[0], b'x');
    }

    #[test]
    fn file_read_error_leaves_page_lazy() {
        let (sys, _) = system(2, 4);
        let process = sys.create_process("p").unwrap();
        let file = file_with(|_| 1, PAGE_FRAME_SIZE);
        file.set_failing(true);
        process
            .spt()
            .register_lazy_file(vpn(0), file, 0, PAGE_FRAME_SIZE, false)
            .unwrap();
        assert!(matches!(
            process.spt().resolve_fault(&sys, vpn(0), false),
            Err(VmError::Io(_))
        ));
        assert_eq!(process.spt().state(vpn(0)), PageKind::LazyFile);
        assert_eq!(sys.frames().free_frames(), 2);
    }

    #[test]
    fn teardown_twice_frees_once() {
        let (sys, _) = system(1, 4);
        let process = sys.create_process("p").unwrap();
        let spt = process.spt();
        spt.register_zero(vpn(0), true).unwrap();
        spt.register_zero(vpn(1), true).unwrap();
        sys.write_user(process.pid(), vpn(0).addr(), b"a").unwrap();
        sys.write_user(process.pid(), vpn(1).addr(), b"b").unwrap();
        assert_eq!(spt.state(vpn(0)), PageKind::Swapped);

        spt.teardown(&sys).unwrap();
        spt.teardown(&sys).unwrap();
        assert!(spt.is_empty());
        assert!(spt.is_torn_down());
        assert_eq!(sys.frames().free_frames(), 1);
        assert_eq!(sys.swap().free_slots(), 4);
        assert_eq!(
            spt.register_zero(vpn(2), true),
            Err(VmError::NoSuchProcess(process.pid()))
        );
    }

    #[test]
    fn unmap_pages_frees_everything() {
        let (sys, _) = system(1, 4);
        let process = sys.create_process("p").unwrap();
        let spt = process.spt();
        for page in 0..3 {
            spt.register_zero(vpn(page), true).unwrap();
            sys.write_user(process.pid(), vpn(page).addr(), b"z").unwrap();
        }
        spt.unmap_pages(&sys, vpn(0), 3).unwrap();
        assert!(spt.is_empty());
        assert!(spt.is_range_free(vpn(0), 3));
        assert_eq!(sys.frames().free_frames(), 1);
        assert_eq!(sys.swap().free_slots(), 4);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Read(usize),
        Write(usize, u8),
    }

    const PAGES: usize = 6;

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..PAGES).prop_map(Op::Read),
            (0..PAGES, any::<u8>()).prop_map(|(page, byte)| Op::Write(page, byte)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn pages_keep_their_contents(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let (sys, _) = system(3, 8);
            let process = sys.create_process("p").unwrap();
            let spt = process.spt();
            let file = file_with(|i| (i % 7) as u8 + 1, PAGES * PAGE_FRAME_SIZE);

            // Even pages come from the file, odd pages are zero; page 4 is
            // read-only.
            let mut model: Vec<Vec<u8>> = Vec::new();
            for page in 0..PAGES {
                let offset = page * PAGE_FRAME_SIZE;
                if page % 2 == 0 {
                    spt.register_lazy_file(vpn(page), file.clone(), offset as u64, PAGE_FRAME_SIZE, page != 4).unwrap();
                    model.push(file.contents()[offset..offset + PAGE_FRAME_SIZE].to_vec());
                } else {
                    spt.register_zero(vpn(page), true).unwrap();
                    model.push(vec![0; PAGE_FRAME_SIZE]);
                }
            }

            for op in ops {
                match op {
                    Op::Read(page) => {
                        prop_assert_eq!(&read_page(&sys, &process, page), &model[page]);
                    }
                    Op::Write(4, _) => {
                        let result = spt.resolve_fault(&sys, vpn(4), true);
                        let read_only = matches!(result, Err(VmError::Fault { kind: FaultKind::ReadOnly, .. }));
                        prop_assert!(read_only, "write to a read-only page resolved: {:?}", result);
                    }
                    Op::Write(page, byte) => {
                        sys.write_user(process.pid(), vpn(page).addr() + 100, &[byte; 16]).unwrap();
                        model[page][100..116].fill(byte);
                    }
                }

                let resident = spt.resident_frames();
                prop_assert!(resident.len() <= 3);
                let mut frames: Vec<_> = resident.iter().map(|&(_, frame)| frame).collect();
                frames.sort();
                frames.dedup();
                prop_assert_eq!(frames.len(), resident.len());
                for &(page, frame) in &resident {
                    prop_assert_eq!(sys.frames().owner(frame), Some(FrameOwner { pid: process.pid(), vpn: page }));
                }

                let swapped = (0..PAGES).filter(|&page| spt.state(vpn(page)) == PageKind::Swapped).count();
                prop_assert_eq!(sys.swap().free_slots(), 8 - swapped);
                for page in 0..PAGES {
                    prop_assert_ne!(spt.state(vpn(page)), PageKind::Unmapped);
                }
            }

            spt.teardown(&sys).unwrap();
            prop_assert_eq!(sys.frames().free_frames(), 3);
            prop_assert_eq!(sys.swap().free_slots(), 8);
        }
    }
}
