use crate::{
    mem::{mmap::MappingTable, spt::SupplementalPageTable, PHYS_BASE},
    sync::Mutex,
    vfs::FileRef,
};
use alloc::string::String;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};

pub type Pid = u16;
pub type AtomicPid = AtomicU16;

/// A user process as far as virtual memory is concerned: its address space
/// and the files that back it.
pub struct Process {
    pid: Pid,
    name: String,
    spt: SupplementalPageTable,
    pub(crate) mappings: Mutex<MappingTable>,
    /// Kept open (and write-denied) while lazy pages may still read from it.
    pub(crate) executable: Mutex<Option<FileRef>>,
    /// Last known user stack pointer, used to tell stack growth from stray
    /// accesses when the kernel faults on the process's behalf.
    stack_pointer: AtomicUsize,
    exited: AtomicBool,
}

impl Process {
    pub fn new(pid: Pid, name: &str) -> Self {
        Self {
            pid,
            name: name.into(),
            spt: SupplementalPageTable::new(pid),
            mappings: Mutex::default(),
            executable: Mutex::new(None),
            stack_pointer: AtomicUsize::new(PHYS_BASE),
            exited: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spt(&self) -> &SupplementalPageTable {
        &self.spt
    }

    pub fn stack_pointer(&self) -> usize {
        self.stack_pointer.load(Ordering::Relaxed)
    }

    pub fn set_stack_pointer(&self, esp: usize) {
        self.stack_pointer.store(esp, Ordering::Relaxed);
    }

    /// Marks the process as exiting. Returns `false` if it already was.
    pub(crate) fn begin_exit(&self) -> bool {
        !self.exited.swap(true, Ordering::AcqRel)
    }
}
