//! Memory-mapped files.

use crate::{
    error::{Result, VmError},
    mem::{Vpn, PAGE_FRAME_SIZE, PHYS_BASE},
    system::System,
    threading::process::Pid,
    vfs::FileRef,
};
use alloc::collections::BTreeMap;
use core::cmp::min;
use log::{debug, warn};

pub type MapId = u32;

/// A file mapped into consecutive pages.
#[derive(Clone)]
pub struct Mapping {
    pub first: Vpn,
    pub pages: usize,
    pub file: FileRef,
}

#[derive(Default)]
pub struct MappingTable {
    next_id: MapId,
    mappings: BTreeMap<MapId, Mapping>,
}

impl MappingTable {
    pub fn insert(&mut self, mapping: Mapping) -> MapId {
        let id = self.next_id;
        self.next_id += 1;
        self.mappings.insert(id, mapping);
        id
    }

    pub fn remove(&mut self, id: MapId) -> Option<Mapping> {
        self.mappings.remove(&id)
    }

    pub fn take_all(&mut self) -> BTreeMap<MapId, Mapping> {
        core::mem::take(&mut self.mappings)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

impl System {
    /// Maps all of `file` at `addr` in `pid`'s address space. Pages are read
    /// on first touch and written back when dirty.
    ///
    /// # Errors
    ///
    /// [`VmError::BadMapping`] if `addr` is null or unaligned, the file is
    /// empty, or the range leaves user space or overlaps registered pages.
    pub fn mmap(&self, pid: Pid, addr: usize, file: FileRef) -> Result<MapId> {
        let process = self.process(pid)?;
        let length = usize::try_from(file.len()).map_err(|_| VmError::BadMapping)?;
        if addr == 0 || addr % PAGE_FRAME_SIZE != 0 || length == 0 {
            return Err(VmError::BadMapping);
        }
        let pages = length.div_ceil(PAGE_FRAME_SIZE);
        let end = pages
            .checked_mul(PAGE_FRAME_SIZE)
            .and_then(|size| addr.checked_add(size))
            .ok_or(VmError::BadMapping)?;
        let first = Vpn::containing(addr);
        if end > PHYS_BASE || !process.spt().is_range_free(first, pages) {
            return Err(VmError::BadMapping);
        }

        for i in 0..pages {
            let offset = i * PAGE_FRAME_SIZE;
            let registered = process.spt().register_mapped_file(
                first.add(i),
                file.clone(),
                offset as u64,
                min(PAGE_FRAME_SIZE, length - offset),
            );
            if let Err(err) = registered {
                process.spt().unmap_pages(self, first, i)?;
                return Err(err);
            }
        }

        let id = process.mappings.lock().insert(Mapping { first, pages, file });
        debug!("{}: mapped {pages} pages at {first:?} as {id}", process.name());
        Ok(id)
    }

    /// Removes mapping `id`, writing its dirty pages back to the file.
    pub fn munmap(&self, pid: Pid, id: MapId) -> Result<()> {
        let process = self.process(pid)?;
        let mapping = process
            .mappings
            .lock()
            .remove(id)
            .ok_or(VmError::BadMapping)?;
        process
            .spt()
            .unmap_pages(self, mapping.first, mapping.pages)
    }

    /// Unmaps everything `pid` has mapped. Keeps going past failures and
    /// reports the first.
    pub(crate) fn munmap_all(&self, pid: Pid) -> Result<()> {
        let process = self.process(pid)?;
        let mappings = process.mappings.lock().take_all();
        let mut result = Ok(());
        for (id, mapping) in mappings {
            if let Err(err) = process
                .spt()
                .unmap_pages(self, mapping.first, mapping.pages)
            {
                warn!("{}: write-back of mapping {id} failed: {err}", process.name());
                result = result.and(Err(err));
            }
        }
        result
    }
}
