//! The VM core's state: the frame pool, the swap store and the live
//! processes, owned by one value instead of kernel-wide globals.

use crate::{
    block::BlockDevice,
    config::VmConfig,
    error::{Resource, Result, VmError},
    mem::{
        frame_table::{Evictor, FrameId, FrameOwner, FrameTable},
        swapping::SwapStore,
    },
    sync::Mutex,
    threading::{
        process::{Pid, Process},
        process_table::ProcessTable,
    },
    vfs::FileSystem,
};
use alloc::{boxed::Box, sync::Arc};

pub struct System {
    config: VmConfig,
    frames: FrameTable,
    swap: SwapStore,
    processes: ProcessTable,
    file_system: Arc<dyn FileSystem>,
    /// The process whose page directory the (single) CPU has loaded, if any.
    active: Mutex<Option<Pid>>,
}

impl System {
    pub fn new(
        config: VmConfig,
        swap_device: Box<dyn BlockDevice>,
        file_system: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            config,
            frames: FrameTable::new(config.user_frames),
            swap: SwapStore::new(swap_device),
            processes: ProcessTable::new(),
            file_system,
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn swap(&self) -> &SwapStore {
        &self.swap
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn file_system(&self) -> &dyn FileSystem {
        &*self.file_system
    }

    pub fn process(&self, pid: Pid) -> Result<Arc<Process>> {
        self.processes.get(pid).ok_or(VmError::NoSuchProcess(pid))
    }

    /// Creates an empty address space and adds it to the process table.
    ///
    /// # Errors
    ///
    /// [`VmError::Exhausted`] if every pid is taken.
    pub fn create_process(&self, name: &str) -> Result<Arc<Process>> {
        self.processes
            .insert_with(|pid| Arc::new(Process::new(pid, name)))
            .ok_or(VmError::Exhausted(Resource::Pids))
    }

    /// Loads `pid`'s page directory.
    pub fn activate(&self, pid: Pid) {
        *self.active.lock() = Some(pid);
    }

    pub fn active(&self) -> Option<Pid> {
        *self.active.lock()
    }

    /// Switches to the kernel-only page directory if `pid`'s is loaded.
    pub(crate) fn deactivate(&self, pid: Pid) {
        let mut active = self.active.lock();
        if *active == Some(pid) {
            *active = None;
        }
    }

    /// Shuts the swap store down and returns its device.
    pub fn shutdown(self) -> Box<dyn BlockDevice> {
        self.swap.shutdown()
    }
}

impl Evictor for System {
    fn evict(&self, owner: FrameOwner, frame: FrameId) -> Result<()> {
        // An owner that has already left the table has nothing worth saving.
        let Some(process) = self.processes.get(owner.pid) else {
            return Ok(());
        };
        process.spt().evict_notify(self, owner.vpn, frame)
    }
}
