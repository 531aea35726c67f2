use super::{
    arguments::{marshal_arguments, setup_stack},
    elf_loader::load_executable,
};
use crate::{
    error::{LoadError, Result, VmError},
    system::System,
    threading::process::{Pid, Process},
    vfs::FileRef,
};
use log::{debug, info, warn};

/// Where a freshly loaded program starts running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedProcess {
    pub pid: Pid,
    pub entry: usize,
    pub esp: usize,
}

impl System {
    /// Starts the program named by the first word of `command_line`.
    ///
    /// A failed load leaves no trace of the process behind. The error is
    /// reported to this caller only.
    pub fn execute(&self, command_line: &str) -> Result<LoadedProcess> {
        let name = command_line
            .split_whitespace()
            .next()
            .ok_or(LoadError::NoCommand)?;

        let file = self.file_system().open(name).map_err(|_| {
            info!("load: {name}: open failed");
            LoadError::Open(name.into())
        })?;

        let process = self.create_process(name)?;
        match self.load(&process, &file, command_line) {
            Ok(loaded) => {
                file.deny_write();
                *process.executable.lock() = Some(file);
                Ok(loaded)
            }
            Err(err) => {
                info!("load: {name}: error loading executable: {err}");
                if let Err(exit_err) = self.exit(process.pid(), -1) {
                    // A fault during loading may already have killed it.
                    debug!("load: {name}: {exit_err}");
                }
                Err(err)
            }
        }
    }

    fn load(&self, process: &Process, file: &FileRef, command_line: &str) -> Result<LoadedProcess> {
        self.activate(process.pid());
        let entry = load_executable(process.spt(), file)?;
        setup_stack(self, process)?;
        let esp = marshal_arguments(self, process, command_line)?;
        Ok(LoadedProcess {
            pid: process.pid(),
            entry,
            esp,
        })
    }

    /// Releases everything `pid` holds: mappings are written back, frames
    /// and swap slots freed, and the executable reopened for writing.
    ///
    /// # Errors
    ///
    /// [`VmError::NoSuchProcess`] if `pid` is unknown or already exiting.
    /// Write-back failures are logged, not returned.
    pub fn exit(&self, pid: Pid, status: i32) -> Result<i32> {
        let process = self.process(pid)?;
        if !process.begin_exit() {
            return Err(VmError::NoSuchProcess(pid));
        }
        info!("{}: exit({status})", process.name());

        self.deactivate(pid);
        if let Err(err) = self.munmap_all(pid) {
            warn!("{}: {err}", process.name());
        }
        if let Err(err) = process.spt().teardown(self) {
            warn!("{}: teardown: {err}", process.name());
        }
        if let Some(file) = process.executable.lock().take() {
            file.allow_write();
        }
        self.processes().remove(pid);
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{FaultKind, Resource},
        interrupts::page_fault::PageFaultInfo,
        mem::{spt::PageKind, Vpn, PAGE_FRAME_SIZE, PHYS_BASE},
        system::test_support::system,
        user_program::{
            elf::{
                image::{build, Segment},
                PF_R, PF_W, PF_X,
            },
            elf_loader::ElfError,
        },
        vfs,
    };

    const TEXT: usize = 0x0804_8000;

    fn program() -> Vec<u8> {
        build(
            (TEXT + 0x10) as u32,
            &[
                Segment::load(TEXT as u32, 0x1000, vec![0x90; 0x200], 0x200, PF_R | PF_X),
                Segment::load(0x0804_a000, 0x2000, vec![5; 0x10], 0x1000, PF_R | PF_W),
            ],
        )
    }

    #[test]
    fn execute_and_exit() {
        let (sys, fs) = system(8, 8);
        let file = fs.insert("echo", program());

        let loaded = sys.execute("echo hello world").unwrap();
        assert_eq!(loaded.entry, TEXT + 0x10);
        assert_eq!(sys.active(), Some(loaded.pid));
        assert!(loaded.esp < PHYS_BASE && loaded.esp > PHYS_BASE - PAGE_FRAME_SIZE);
        assert!(file.writes_denied());
        assert!(vfs::write_all_at(&*file, 0, b"x").is_err());

        let process = sys.process(loaded.pid).unwrap();
        // Only the stack is resident.
        assert_eq!(process.spt().resident_frames().len(), 1);
        assert_eq!(process.spt().state(Vpn::containing(TEXT)), PageKind::LazyFile);

        let mut data = [0; 0x10];
        sys.read_user(loaded.pid, 0x0804_a000, &mut data).unwrap();
        assert_eq!(data, [5; 0x10]);

        assert_eq!(sys.exit(loaded.pid, 7), Ok(7));
        assert!(!file.writes_denied());
        assert_eq!(sys.active(), None);
        assert!(sys.processes().is_empty());
        assert_eq!(sys.frames().free_frames(), 8);
        assert!(process.spt().is_torn_down());

        assert_eq!(sys.exit(loaded.pid, 0), Err(VmError::NoSuchProcess(loaded.pid)));
    }

    #[test]
    fn missing_program() {
        let (sys, _) = system(4, 4);
        assert_eq!(
            sys.execute("nope arg"),
            Err(VmError::Load(LoadError::Open("nope".into())))
        );
        assert_eq!(sys.execute("   "), Err(VmError::Load(LoadError::NoCommand)));
        assert!(sys.processes().is_empty());
    }

    #[test]
    fn failed_load_leaves_nothing_behind() {
        let (sys, fs) = system(4, 4);
        let mut image = program();
        image[18] = 0x28;
        let file = fs.insert("arm", image);

        assert_eq!(
            sys.execute("arm"),
            Err(ElfError::UnsupportedMachine.into())
        );
        assert!(sys.processes().is_empty());
        assert_eq!(sys.frames().free_frames(), 4);
        assert!(!file.writes_denied());

        // Each attempt gets its own answer.
        fs.insert("good", program());
        assert!(sys.execute("good").is_ok());
        assert!(sys.execute("arm").is_err());
        assert_eq!(sys.processes().len(), 1);
    }

    #[test]
    fn overlong_arguments_fail_the_load() {
        let (sys, fs) = system(4, 4);
        fs.insert("p", program());
        let line = format!("p {}", "a".repeat(PAGE_FRAME_SIZE));
        assert_eq!(
            sys.execute(&line),
            Err(VmError::Load(LoadError::ArgumentsTooLong))
        );
        assert!(sys.processes().is_empty());
        assert_eq!(sys.frames().free_frames(), 4);
    }

    #[test]
    fn pids_run_out_only_while_processes_live() {
        let (sys, fs) = system(4, 4);
        fs.insert("p", program());
        for _ in 0..Pid::MAX {
            let process = sys.create_process("short").unwrap();
            sys.exit(process.pid(), 0).unwrap();
        }
        let loaded = sys.execute("p").unwrap();
        assert_ne!(loaded.pid, 0);

        while sys.processes().len() < usize::from(Pid::MAX) {
            sys.create_process("idle").unwrap();
        }
        assert_eq!(
            sys.execute("p"),
            Err(VmError::Exhausted(Resource::Pids))
        );
        assert_eq!(sys.frames().free_frames(), 3);
    }

    #[test]
    fn bad_access_kills_the_process() {
        let (sys, fs) = system(4, 4);
        fs.insert("p", program());
        let loaded = sys.execute("p").unwrap();

        let info = PageFaultInfo {
            addr: TEXT,
            write: true,
            user: true,
            esp: loaded.esp,
        };
        assert_eq!(
            sys.page_fault(loaded.pid, info),
            Err(VmError::Fault {
                addr: TEXT,
                kind: FaultKind::ReadOnly
            })
        );
        assert!(sys.process(loaded.pid).is_err());
        assert_eq!(sys.frames().free_frames(), 4);
    }
}
