pub mod block_core;
pub mod block_error;

pub use block_core::{BlockDevice, BlockSector, MemoryBlock, BLOCK_SECTOR_SIZE};
pub use block_error::BlockError;
