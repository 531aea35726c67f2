use super::BlockError;
use crate::sync::Mutex;
use alloc::{string::String, vec, vec::Vec};
use core::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};
use kidneyos_shared::sizes::SECTOR_SIZE;

/// Size of a block device sector in bytes.
///
/// All IDE disks use this sector size, as do most USB and SCSI disks.
pub const BLOCK_SECTOR_SIZE: usize = SECTOR_SIZE;

/// Index of a block device sector.
///
/// Good enough for devices up to 2 TB.
pub type BlockSector = u32;

/// Sector-addressed storage. Every transfer moves exactly one sector.
pub trait BlockDevice: Send + Sync {
    /// The size of the device in sectors.
    fn size(&self) -> BlockSector;

    /// Reads sector `sector` into `buf`, which must hold `BLOCK_SECTOR_SIZE`
    /// bytes.
    fn read(&self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError>;

    /// Writes `buf`, which must hold `BLOCK_SECTOR_SIZE` bytes, to sector
    /// `sector`.
    fn write(&self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError>;
}

/// A block device backed by a heap buffer.
pub struct MemoryBlock {
    name: String,
    size: BlockSector,
    data: Mutex<Vec<u8>>,
    failing: AtomicBool,
    read_count: AtomicU32,
    write_count: AtomicU32,
}

impl MemoryBlock {
    pub fn new(name: &str, size: BlockSector) -> Self {
        Self {
            name: name.into(),
            size,
            data: Mutex::new(vec![0; size as usize * BLOCK_SECTOR_SIZE]),
            failing: AtomicBool::new(false),
            read_count: AtomicU32::new(0),
            write_count: AtomicU32::new(0),
        }
    }

    /// Makes every subsequent transfer fail (or succeed again), to simulate a
    /// dying disk.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u32 {
        self.write_count.load(Ordering::Relaxed)
    }

    fn verify_buffer(buf: &[u8]) -> Result<(), BlockError> {
        if buf.len() != BLOCK_SECTOR_SIZE {
            return Err(BlockError::BufferInvalid(buf.len()));
        }
        Ok(())
    }

    /// Returns the byte range of `sector` inside the backing buffer.
    fn check_sector(&self, sector: BlockSector) -> Result<core::ops::Range<usize>, BlockError> {
        if sector >= self.size {
            return Err(BlockError::SectorOutOfBounds {
                sector,
                size: self.size,
            });
        }
        let start = sector as usize * BLOCK_SECTOR_SIZE;
        Ok(start..start + BLOCK_SECTOR_SIZE)
    }
}

impl BlockDevice for MemoryBlock {
    fn size(&self) -> BlockSector {
        self.size
    }

    fn read(&self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
        let range = self.check_sector(sector)?;
        Self::verify_buffer(buf)?;
        if self.failing.load(Ordering::Relaxed) {
            return Err(BlockError::ReadError);
        }

        buf.copy_from_slice(&self.data.lock()[range]);
        self.read_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write(&self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
        let range = self.check_sector(sector)?;
        Self::verify_buffer(buf)?;
        if self.failing.load(Ordering::Relaxed) {
            return Err(BlockError::WriteError);
        }

        self.data.lock()[range].copy_from_slice(buf);
        self.write_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl fmt::Display for MemoryBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "\"{}\": {:04} sectors, {:04} read, {:04} write",
            self.name,
            self.size,
            self.read_count(),
            self.write_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_back_written_sector() {
        let block = MemoryBlock::new("scratch", 4);
        let sector = [0xAB; BLOCK_SECTOR_SIZE];
        block.write(3, &sector).unwrap();

        let mut buf = [0; BLOCK_SECTOR_SIZE];
        block.read(3, &mut buf).unwrap();
        assert_eq!(buf, sector);

        block.read(2, &mut buf).unwrap();
        assert_eq!(buf, [0; BLOCK_SECTOR_SIZE]);
        assert_eq!((block.read_count(), block.write_count()), (2, 1));
    }

    #[test]
    fn rejects_bad_requests() {
        let block = MemoryBlock::new("scratch", 4);
        let mut buf = [0; BLOCK_SECTOR_SIZE];
        assert_eq!(
            block.read(4, &mut buf),
            Err(BlockError::SectorOutOfBounds { sector: 4, size: 4 })
        );
        assert_eq!(block.write(0, &buf[..10]), Err(BlockError::BufferInvalid(10)));

        block.set_failing(true);
        assert_eq!(block.read(0, &mut buf), Err(BlockError::ReadError));
        assert_eq!(block.write(0, &buf), Err(BlockError::WriteError));
    }
}
