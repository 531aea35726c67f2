pub mod mutex;

pub use mutex::{Mutex, MutexGuard};

/// Backs off briefly while another thread makes progress. Every "wait until"
/// loop in the VM core goes through here.
#[inline]
pub fn relax() {
    #[cfg(target_os = "none")]
    core::hint::spin_loop();
    #[cfg(not(target_os = "none"))]
    std::thread::yield_now();
}
