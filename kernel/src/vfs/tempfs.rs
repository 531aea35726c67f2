use crate::{
    sync::Mutex,
    vfs::{Error, File, FileRef, FileSystem, Path, Result},
};
use alloc::{collections::BTreeMap, string::String, sync::Arc, vec::Vec};
use core::{
    cmp::min,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// A file held entirely in memory.
#[derive(Default)]
pub struct TempFile {
    data: Mutex<Vec<u8>>,
    deny_write: AtomicUsize,
    failing: AtomicBool,
}

impl TempFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(data),
            ..Self::default()
        }
    }

    /// A copy of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Makes every subsequent transfer fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn writes_denied(&self) -> bool {
        self.deny_write.load(Ordering::Relaxed) > 0
    }

    fn check_failing(&self) -> Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(Error::Io);
        }
        Ok(())
    }
}

impl File for TempFile {
    fn len(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.check_failing()?;
        let data = self.data.lock();
        let Ok(offset) = usize::try_from(offset) else {
            return Ok(0);
        };
        if offset >= data.len() {
            return Ok(0);
        }
        let n = min(buf.len(), data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        self.check_failing()?;
        if self.writes_denied() {
            return Err(Error::WriteDenied);
        }
        let mut data = self.data.lock();
        let Ok(offset) = usize::try_from(offset) else {
            return Ok(0);
        };
        if offset >= data.len() {
            return Ok(0);
        }
        let n = min(buf.len(), data.len() - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }

    fn deny_write(&self) {
        self.deny_write.fetch_add(1, Ordering::Relaxed);
    }

    fn allow_write(&self) {
        // Saturates so an unbalanced allow cannot wrap the counter.
        let _ = self
            .deny_write
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }
}

/// in-memory filesystem with a single flat directory
#[derive(Default)]
pub struct TempFs {
    files: Mutex<BTreeMap<String, Arc<TempFile>>>,
}

impl TempFs {
    pub fn new() -> TempFs {
        Self::default()
    }

    /// Creates (or replaces) `name` with `data` and returns the file.
    pub fn insert(&self, name: &Path, data: Vec<u8>) -> Arc<TempFile> {
        let file = Arc::new(TempFile::new(data));
        self.files.lock().insert(name.into(), file.clone());
        file
    }

    pub fn get(&self, name: &Path) -> Option<Arc<TempFile>> {
        self.files.lock().get(name).cloned()
    }
}

impl FileSystem for TempFs {
    fn open(&self, name: &Path) -> Result<FileRef> {
        let file = self.get(name).ok_or(Error::NotFound)?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{read_exact_at, write_all_at};
    use alloc::vec;

    #[test]
    fn read_past_end_is_short() {
        let fs = TempFs::new();
        fs.insert("a", b"hello world".to_vec());
        let file = fs.open("a").unwrap();

        let mut buf = [0; 8];
        assert_eq!(file.read_at(6, &mut buf), Ok(5));
        assert_eq!(&buf[..5], b"world");
        assert_eq!(file.read_at(11, &mut buf), Ok(0));
        assert_eq!(
            read_exact_at(&*file, 6, &mut buf),
            Err(Error::ShortTransfer {
                requested: 8,
                transferred: 5
            })
        );
        assert!(matches!(fs.open("b"), Err(Error::NotFound)));
    }

    #[test]
    fn writes_never_grow_the_file() {
        let fs = TempFs::new();
        let file = fs.insert("a", vec![0; 4]);
        assert_eq!(file.write_at(2, b"xyz"), Ok(2));
        assert_eq!(file.contents(), b"\0\0xy");
        assert!(write_all_at(&*file, 0, b"ab").is_ok());
        assert_eq!(file.len(), 4);
    }

    #[test]
    fn deny_write_nests() {
        let file = TempFile::new(vec![0; 4]);
        file.deny_write();
        file.deny_write();
        file.allow_write();
        assert_eq!(file.write_at(0, b"a"), Err(Error::WriteDenied));
        file.allow_write();
        assert_eq!(file.write_at(0, b"a"), Ok(1));
        file.allow_write();
        assert!(!file.writes_denied());
    }

    #[test]
    fn failing_file() {
        let file = TempFile::new(vec![0; 4]);
        file.set_failing(true);
        assert_eq!(file.read_at(0, &mut [0; 4]), Err(Error::Io));
    }
}
