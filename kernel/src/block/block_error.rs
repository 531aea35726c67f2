use thiserror::Error;

/// Error type for block operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BlockError {
    /// The sector is out of bounds (greater than the block size)
    #[error("sector {sector} out of bounds (block size: {size})")]
    SectorOutOfBounds { sector: u32, size: u32 },
    /// The buffer has an invalid size (not `BLOCK_SECTOR_SIZE`)
    #[error("invalid buffer size {0}")]
    BufferInvalid(usize),
    #[error("error reading from the block device")]
    ReadError,
    #[error("error writing to the block device")]
    WriteError,
}
