use crate::{
    block::BlockError,
    threading::process::Pid,
    user_program::elf_loader::{ElfError, SegmentError},
    vfs,
};
use alloc::string::String;
use core::fmt;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, VmError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("load failed: {0}")]
    Load(#[from] LoadError),
    #[error("page fault at {addr:#010x}: {kind}")]
    Fault { addr: usize, kind: FaultKind },
    #[error("out of {0}")]
    Exhausted(Resource),
    #[error("i/o error: {0}")]
    Io(#[from] IoError),
    #[error("no such process {0}")]
    NoSuchProcess(Pid),
    #[error("swap slot {0} is not in use")]
    SlotNotInUse(usize),
    #[error("invalid memory mapping")]
    BadMapping,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("{0}: open failed")]
    Open(String),
    #[error("empty command line")]
    NoCommand,
    #[error("bad executable: {0}")]
    Header(#[from] ElfError),
    #[error("bad segment: {0}")]
    Segment(#[from] SegmentError),
    #[error("page {0:#010x} is already registered")]
    Overlap(usize),
    #[error("arguments do not fit in the stack page")]
    ArgumentsTooLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// No page is registered at the address.
    NotMapped,
    /// Write to a read-only page.
    ReadOnly,
    /// User access to an address at or above `PHYS_BASE`.
    KernelAddress,
    /// The kernel itself touched an unregistered user address.
    KernelMode,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotMapped => "not mapped",
            Self::ReadOnly => "write to read-only page",
            Self::KernelAddress => "user access to kernel address",
            Self::KernelMode => "kernel-mode fault outside user memory",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Frames,
    Swap,
    Pids,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Frames => "physical frames",
            Self::Swap => "swap slots",
            Self::Pids => "process ids",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IoError {
    #[error("block device: {0}")]
    Block(#[from] BlockError),
    #[error("file: {0}")]
    File(#[from] vfs::Error),
}

impl From<BlockError> for VmError {
    fn from(err: BlockError) -> Self {
        Self::Io(err.into())
    }
}

impl From<vfs::Error> for VmError {
    fn from(err: vfs::Error) -> Self {
        Self::Io(err.into())
    }
}

impl From<ElfError> for VmError {
    fn from(err: ElfError) -> Self {
        Self::Load(err.into())
    }
}

impl From<SegmentError> for VmError {
    fn from(err: SegmentError) -> Self {
        Self::Load(err.into())
    }
}
