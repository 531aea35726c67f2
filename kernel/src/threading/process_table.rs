use super::process::{AtomicPid, Pid, Process};
use crate::sync::Mutex;
use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use core::sync::atomic::Ordering;

/// Arena of live processes, indexed by pid. Frames refer to their owner by
/// pid through here, so a process that has gone simply fails the lookup.
pub struct ProcessTable {
    table: Mutex<BTreeMap<Pid, Arc<Process>>>,
    next_pid: AtomicPid,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    pub fn new() -> ProcessTable {
        ProcessTable {
            table: Mutex::default(),
            next_pid: AtomicPid::new(1),
        }
    }

    /// Picks the first unused pid at or after the cursor, wrapping around
    /// and skipping 0, and inserts the process `make` builds for it. `None`
    /// if every pid is in use.
    pub fn insert_with(&self, make: impl FnOnce(Pid) -> Arc<Process>) -> Option<Arc<Process>> {
        let mut table = self.table.lock();
        let start = self.next_pid.load(Ordering::Relaxed);
        let pid = (0..=Pid::MAX)
            .map(|i| start.wrapping_add(i))
            .find(|&pid| pid != 0 && !table.contains_key(&pid))?;
        self.next_pid.store(pid.wrapping_add(1), Ordering::Relaxed);

        let process = make(pid);
        debug_assert_eq!(process.pid(), pid);
        table.insert(pid, process.clone());
        Some(process)
    }

    pub fn remove(&self, pid: Pid) -> Option<Arc<Process>> {
        self.table.lock().remove(&pid)
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.table.lock().get(&pid).cloned()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.table.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
