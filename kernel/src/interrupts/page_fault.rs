//! The page-fault boundary: decides whether a fault is legal, grows the
//! stack when it should, and hands the rest to the faulting process's
//! supplemental page table.

use crate::{
    error::{FaultKind, Result, VmError},
    mem::{is_user_vaddr, spt::PageKind, Vpn, PHYS_BASE},
    system::System,
    threading::process::{Pid, Process},
};
use bitbybit::bitfield;
use log::{debug, warn};

/// The error code the processor pushes for a page fault.
#[bitfield(u32, default = 0)]
pub struct PageFaultErrorCode {
    /// Protection violation; clear means the page was not present.
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    write: bool,
    #[bit(2, rw)]
    user: bool,
}

/// Highest distance below the stack pointer a legitimate push can fault at
/// (`pusha` writes 32 bytes below `esp` before adjusting it).
pub const STACK_SLACK: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageFaultInfo {
    /// The faulting address.
    pub addr: usize,
    pub write: bool,
    /// Whether the fault happened in user mode.
    pub user: bool,
    /// The user stack pointer at the time of the fault.
    pub esp: usize,
}

impl PageFaultInfo {
    pub fn from_error_code(error_code: PageFaultErrorCode, addr: usize, esp: usize) -> Self {
        Self {
            addr,
            write: error_code.write(),
            user: error_code.user(),
            esp,
        }
    }
}

impl System {
    /// Resolves a page fault taken by `pid`. On failure the process is
    /// terminated with status -1 and the error returned.
    pub fn page_fault(&self, pid: Pid, info: PageFaultInfo) -> Result<()> {
        let process = self.process(pid)?;
        if info.user {
            process.set_stack_pointer(info.esp);
        }

        let result = self.handle_fault(&process, info);
        if let Err(err) = &result {
            warn!("{}: {err}", process.name());
            if let Err(exit_err) = self.exit(pid, -1) {
                debug!("{}: exit after fault: {exit_err}", process.name());
            }
        }
        result
    }

    fn handle_fault(&self, process: &Process, info: PageFaultInfo) -> Result<()> {
        let fault = |kind| VmError::Fault {
            addr: info.addr,
            kind,
        };

        if !is_user_vaddr(info.addr) {
            return Err(fault(if info.user {
                FaultKind::KernelAddress
            } else {
                FaultKind::KernelMode
            }));
        }

        let vpn = Vpn::containing(info.addr);
        if process.spt().state(vpn) == PageKind::Unmapped {
            if !self.is_stack_access(info) {
                return Err(fault(if info.user {
                    FaultKind::NotMapped
                } else {
                    FaultKind::KernelMode
                }));
            }
            debug!("{}: growing stack to {vpn:?}", process.name());
            process.spt().register_zero(vpn, true)?;
        }

        process.spt().resolve_fault(self, vpn, info.write)
    }

    /// Whether `info` looks like a push just below the stack pointer, inside
    /// the stack limit.
    fn is_stack_access(&self, info: PageFaultInfo) -> bool {
        let floor = PHYS_BASE - self.config().stack_limit;
        info.addr >= floor && info.addr >= info.esp.saturating_sub(STACK_SLACK)
    }
}
