//! Initial user stack: one zeroed page just below `PHYS_BASE` holding the
//! command-line arguments in the System V i386 layout.

use crate::{
    error::{LoadError, Result},
    mem::{Page, Vpn, PAGE_FRAME_SIZE, PHYS_BASE},
    system::System,
    threading::process::Process,
};
use alloc::vec::Vec;
use log::debug;
use zerocopy::little_endian::U32;
use zerocopy::AsBytes;

/// Alignment of the argument vector.
pub const STACK_ALIGNMENT: usize = 16;

const STACK_PAGE: usize = PHYS_BASE - PAGE_FRAME_SIZE;

/// What `esp` points at when the program starts.
#[repr(C)]
#[derive(AsBytes)]
struct EntryFrame {
    return_address: U32,
    argc: U32,
    argv: U32,
}

/// Downward-growing bump allocator over a copy of the stack page.
struct StackImage {
    page: Page,
    top: usize,
}

impl StackImage {
    fn new() -> Self {
        Self {
            page: [0; PAGE_FRAME_SIZE],
            top: PAGE_FRAME_SIZE,
        }
    }

    fn push(&mut self, bytes: &[u8]) -> Result<usize> {
        self.top = self
            .top
            .checked_sub(bytes.len())
            .ok_or(LoadError::ArgumentsTooLong)?;
        self.page[self.top..self.top + bytes.len()].copy_from_slice(bytes);
        Ok(self.esp())
    }

    fn align_down(&mut self, alignment: usize) {
        self.top -= self.top % alignment;
    }

    fn esp(&self) -> usize {
        STACK_PAGE + self.top
    }

    fn used(&self) -> &[u8] {
        &self.page[self.top..]
    }
}

/// Maps the stack page. Returns the initial stack pointer.
pub fn setup_stack(sys: &System, process: &Process) -> Result<usize> {
    process
        .spt()
        .install_zeroed(sys, Vpn::containing(STACK_PAGE), true)?;
    process.set_stack_pointer(PHYS_BASE);
    Ok(PHYS_BASE)
}

/// Lays out `command_line` on the stack page set up by [`setup_stack`] and
/// returns the resulting stack pointer.
// Stack addresses lie below PHYS_BASE and argc below a page, so both fit in
// 32 bits.
#[allow(clippy::cast_possible_truncation)]
pub fn marshal_arguments(sys: &System, process: &Process, command_line: &str) -> Result<usize> {
    let mut image = StackImage::new();

    let mut argv = Vec::new();
    for argument in command_line.split_whitespace() {
        image.push(&[0])?;
        argv.push(image.push(argument.as_bytes())?);
    }
    if argv.is_empty() {
        return Err(LoadError::NoCommand.into());
    }
    let argc = argv.len();

    let mut vector: Vec<U32> = argv.iter().map(|&ptr| U32::new(ptr as u32)).collect();
    vector.push(U32::new(0));

    // The vector itself has to start on the alignment boundary.
    image.top = image
        .top
        .checked_sub(vector.as_bytes().len())
        .ok_or(LoadError::ArgumentsTooLong)?;
    image.align_down(STACK_ALIGNMENT);
    image.top += vector.as_bytes().len();
    let vector_address = image.push(vector.as_bytes())?;

    let esp = image.push(
        EntryFrame {
            return_address: U32::new(0),
            argc: U32::new(argc as u32),
            argv: U32::new(vector_address as u32),
        }
        .as_bytes(),
    )?;

    debug!("{}: {argc} arguments, esp {esp:#010x}", process.name());
    sys.write_user(process.pid(), esp, image.used())?;
    process.set_stack_pointer(esp);
    Ok(esp)
}
