pub mod tempfs;

use alloc::sync::Arc;
use thiserror::Error;

pub type Path = str;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// directory entry not found
    #[error("not found")]
    NotFound,
    /// the file is an executable that is currently running
    #[error("writes denied")]
    WriteDenied,
    /// fewer bytes than requested could be transferred
    #[error("short transfer: {transferred} of {requested} bytes")]
    ShortTransfer { requested: usize, transferred: usize },
    /// the backing storage failed
    #[error("i/o failure")]
    Io,
}

pub type Result<T> = core::result::Result<T, Error>;

/// An open file. Offsets are absolute; there is no cursor.
pub trait File: Send + Sync {
    /// Length of the file in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads into `buf` starting at `offset`. Returns the number of bytes
    /// read, which is short only at end of file.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Writes `buf` at `offset` without growing the file. Returns the number
    /// of bytes written.
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize>;

    /// Makes writes fail until a matching [`File::allow_write`].
    fn deny_write(&self) {}

    fn allow_write(&self) {}
}

/// Shared handle to an open file.
pub type FileRef = Arc<dyn File>;

pub trait FileSystem: Send + Sync {
    /// Opens the file called `name`.
    fn open(&self, name: &Path) -> Result<FileRef>;
}

/// Reads exactly `buf.len()` bytes at `offset`.
pub fn read_exact_at(file: &dyn File, offset: u64, buf: &mut [u8]) -> Result<()> {
    let transferred = file.read_at(offset, buf)?;
    if transferred != buf.len() {
        return Err(Error::ShortTransfer {
            requested: buf.len(),
            transferred,
        });
    }
    Ok(())
}

/// Writes all of `buf` at `offset`.
pub fn write_all_at(file: &dyn File, offset: u64, buf: &[u8]) -> Result<()> {
    let transferred = file.write_at(offset, buf)?;
    if transferred != buf.len() {
        return Err(Error::ShortTransfer {
            requested: buf.len(),
            transferred,
        });
    }
    Ok(())
}
