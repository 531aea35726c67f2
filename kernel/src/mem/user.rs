//! Kernel access to user memory through the simulated MMU.

use crate::{
    error::Result,
    interrupts::page_fault::PageFaultInfo,
    mem::{page_offset, spt::Access, PAGE_FRAME_SIZE},
    system::System,
    threading::process::{Pid, Process},
};
use core::cmp::min;

impl System {
    /// Copies `buf.len()` bytes from `pid`'s address space at `addr`,
    /// faulting pages in as needed.
    pub fn read_user(&self, pid: Pid, addr: usize, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let vaddr = addr.wrapping_add(done);
            let n = min(buf.len() - done, PAGE_FRAME_SIZE - page_offset(vaddr));
            let chunk = &mut buf[done..done + n];
            self.with_resident(pid, vaddr, false, |process| {
                process.spt().access(self, vaddr, Access::Read(&mut *chunk))
            })?;
            done += n;
        }
        Ok(())
    }

    /// Copies `data` into `pid`'s address space at `addr`, faulting pages in
    /// as needed.
    pub fn write_user(&self, pid: Pid, addr: usize, data: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < data.len() {
            let vaddr = addr.wrapping_add(done);
            let n = min(data.len() - done, PAGE_FRAME_SIZE - page_offset(vaddr));
            let chunk = &data[done..done + n];
            self.with_resident(pid, vaddr, true, |process| {
                process.spt().access(self, vaddr, Access::Write(chunk))
            })?;
            done += n;
        }
        Ok(())
    }

    /// Runs `access` until it succeeds, raising a page fault each time it
    /// finds the page missing.
    fn with_resident(
        &self,
        pid: Pid,
        vaddr: usize,
        write: bool,
        mut access: impl FnMut(&Process) -> bool,
    ) -> Result<()> {
        let process = self.process(pid)?;
        while !access(&process) {
            self.page_fault(
                pid,
                PageFaultInfo {
                    addr: vaddr,
                    write,
                    user: true,
                    esp: process.stack_pointer(),
                },
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{FaultKind, VmError},
        mem::{Vpn, PHYS_BASE},
        system::test_support::system,
    };

    #[test]
    fn copy_across_page_boundary() {
        let (sys, _) = system(4, 4);
        let process = sys.create_process("p").unwrap();
        let base = 0x2000_0000;
        process.spt().register_zero(Vpn::containing(base), true).unwrap();
        process
            .spt()
            .register_zero(Vpn::containing(base + PAGE_FRAME_SIZE), true)
            .unwrap();

        let data: Vec<u8> = (0..100).collect();
        let addr = base + PAGE_FRAME_SIZE - 50;
        sys.write_user(process.pid(), addr, &data).unwrap();

        let mut back = vec![0; 100];
        sys.read_user(process.pid(), addr, &mut back).unwrap();
        assert_eq!(back, data);

        let entry = process.spt().page_table_entry(Vpn::containing(base)).unwrap();
        assert!(entry.accessed() && entry.dirty());
    }

    #[test]
    fn read_only_pages_reject_writes() {
        let (sys, _) = system(4, 4);
        let process = sys.create_process("p").unwrap();
        let base = 0x2000_0000;
        process.spt().register_zero(Vpn::containing(base), false).unwrap();

        let mut buf = [1; 8];
        sys.read_user(process.pid(), base, &mut buf).unwrap();
        assert_eq!(buf, [0; 8]);
        assert!(!process
            .spt()
            .page_table_entry(Vpn::containing(base))
            .unwrap()
            .dirty());

        assert_eq!(
            sys.write_user(process.pid(), base, b"no"),
            Err(VmError::Fault {
                addr: base,
                kind: FaultKind::ReadOnly
            })
        );
    }

    #[test]
    fn kernel_addresses_are_off_limits() {
        let (sys, _) = system(4, 4);
        let process = sys.create_process("p").unwrap();
        assert!(matches!(
            sys.read_user(process.pid(), PHYS_BASE, &mut [0; 4]),
            Err(VmError::Fault {
                kind: FaultKind::KernelAddress,
                ..
            })
        ));
    }
}
