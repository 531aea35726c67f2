//! Disk-backed overflow for evicted pages. The swap device is split into
//! page-sized slots whose allocation is tracked by a bitmap.

use crate::{
    block::{BlockDevice, BlockSector, BLOCK_SECTOR_SIZE},
    error::{Resource, Result, VmError},
    mem::{Page, PAGE_FRAME_SIZE},
    sync::Mutex,
};
use alloc::boxed::Box;
use kidneyos_shared::bitmap::Bitmap;
use log::{debug, warn};

pub const SECTORS_PER_PAGE: usize = PAGE_FRAME_SIZE / BLOCK_SECTOR_SIZE;

/// Index of a page-sized slot on the swap device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(usize);

impl SwapSlot {
    pub const fn index(self) -> usize {
        self.0
    }

    fn first_sector(self) -> usize {
        self.0 * SECTORS_PER_PAGE
    }
}

pub struct SwapStore {
    device: Box<dyn BlockDevice>,
    bitmap: Mutex<Bitmap>,
}

impl SwapStore {
    pub fn new(device: Box<dyn BlockDevice>) -> Self {
        let slot_count = device.size() as usize / SECTORS_PER_PAGE;
        Self {
            device,
            bitmap: Mutex::new(Bitmap::new(slot_count)),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.bitmap.lock().len()
    }

    pub fn free_slots(&self) -> usize {
        let bitmap = self.bitmap.lock();
        bitmap.len() - bitmap.count_ones()
    }

    /// Reserves the lowest free slot.
    pub fn allocate_slot(&self) -> Result<SwapSlot> {
        self.bitmap
            .lock()
            .scan_and_flip(0, false)
            .map(SwapSlot)
            .ok_or(VmError::Exhausted(Resource::Swap))
    }

    pub fn write_slot(&self, slot: SwapSlot, page: &Page) -> Result<()> {
        debug!("swap out to slot {}", slot.0);
        for (i, sector) in page.chunks_exact(BLOCK_SECTOR_SIZE).enumerate() {
            self.device
                .write(Self::sector(slot, i), sector)?;
        }
        Ok(())
    }

    pub fn read_slot(&self, slot: SwapSlot, page: &mut Page) -> Result<()> {
        debug!("swap in from slot {}", slot.0);
        for (i, sector) in page.chunks_exact_mut(BLOCK_SECTOR_SIZE).enumerate() {
            self.device.read(Self::sector(slot, i), sector)?;
        }
        Ok(())
    }

    /// Returns `slot` to the free pool.
    ///
    /// # Errors
    ///
    /// Freeing a slot that is not allocated is an error; every slot is freed
    /// exactly once.
    pub fn free_slot(&self, slot: SwapSlot) -> Result<()> {
        let mut bitmap = self.bitmap.lock();
        if slot.0 >= bitmap.len() || !bitmap.get(slot.0) {
            drop(bitmap);
            warn!("swap slot {} freed while not in use", slot.0);
            return Err(VmError::SlotNotInUse(slot.0));
        }
        bitmap.set(slot.0, false);
        Ok(())
    }

    /// Closes the store and hands back the device.
    pub fn shutdown(self) -> Box<dyn BlockDevice> {
        let in_use = self.slot_count() - self.free_slots();
        if in_use > 0 {
            warn!("swap shut down with {in_use} slots still in use");
        }
        self.device
    }

    // Slots never reach past the device, so the sector fits its index type.
    #[allow(clippy::cast_possible_truncation)]
    fn sector(slot: SwapSlot, i: usize) -> BlockSector {
        (slot.first_sector() + i) as BlockSector
    }
}
