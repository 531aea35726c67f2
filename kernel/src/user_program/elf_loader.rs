use super::elf::{
    ElfArchitecture, ElfHeader, ElfProgramHeader, ElfProgramType, ElfUsage, ELF_HEADER_SIZE,
    PROGRAM_HEADER_SIZE,
};
use crate::{
    error::Result,
    mem::{is_user_vaddr, page_round_down, page_round_up, spt::SupplementalPageTable, Vpn},
    vfs::{self, FileRef},
};
use alloc::vec;
use core::cmp::min;
use kidneyos_shared::mem::{PAGE_FRAME_SIZE, PAGE_MASK};
use log::debug;
use nom::number::Endianness;
use thiserror::Error;

const MAX_PROGRAM_HEADERS: u16 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ElfError {
    #[error("file too short for an ELF header")]
    Truncated,
    #[error("invalid magic number")]
    InvalidMagicNumber,
    #[error("not a 32-bit object")]
    UnsupportedClass,
    #[error("not little endian")]
    UnsupportedEndianess,
    #[error("unsupported ELF version")]
    UnsupportedVersion,
    #[error("not an executable")]
    UnsupportedType,
    #[error("not an x86 object")]
    UnsupportedMachine,
    #[error("program header entries of {0} bytes")]
    BadProgramHeaderSize(u16),
    #[error("{0} program headers")]
    TooManyProgramHeaders(u16),
    #[error("program header table lies outside the file")]
    ProgramHeadersOutOfRange,
    #[error("unsupported segment type {0:?}")]
    UnsupportedSegment(ElfProgramType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SegmentError {
    #[error("file offset and address differ within the page")]
    DifferentPageOffset,
    #[error("file range lies outside the file")]
    OffsetOutOfRange,
    #[error("memory size smaller than file size")]
    MemSizeLesserThanFileSize,
    #[error("empty segment")]
    EmptyMemSize,
    #[error("segment leaves user space")]
    VMRegionOutOfRange,
    #[error("segment wraps around the address space")]
    VMRegionWrapAround,
    #[error("segment maps page 0")]
    PageZeroMapping,
}

fn verify_elf_header(header: &ElfHeader) -> core::result::Result<(), ElfError> {
    if header.class != 1 {
        return Err(ElfError::UnsupportedClass);
    }
    if header.data_encoding != 1 {
        return Err(ElfError::UnsupportedEndianess);
    }
    if header.header_version != 1 || header.elf_version != 1 {
        return Err(ElfError::UnsupportedVersion);
    }
    if header.usage != ElfUsage::Executable {
        return Err(ElfError::UnsupportedType);
    }
    if header.architecture != ElfArchitecture::X86 {
        return Err(ElfError::UnsupportedMachine);
    }
    if header.program_header_entry_size as usize != PROGRAM_HEADER_SIZE {
        return Err(ElfError::BadProgramHeaderSize(
            header.program_header_entry_size,
        ));
    }
    if header.program_header_count > MAX_PROGRAM_HEADERS {
        return Err(ElfError::TooManyProgramHeaders(header.program_header_count));
    }
    Ok(())
}

fn validate_segment(
    phdr: &ElfProgramHeader,
    file_len: u64,
) -> core::result::Result<(), SegmentError> {
    // p_offset and p_vaddr must have the same page offset.
    if phdr.file_offset as usize & PAGE_MASK != phdr.virtual_address as usize & PAGE_MASK {
        return Err(SegmentError::DifferentPageOffset);
    }

    if u64::from(phdr.file_offset) + u64::from(phdr.file_size) > file_len {
        return Err(SegmentError::OffsetOutOfRange);
    }

    if phdr.memory_size < phdr.file_size {
        return Err(SegmentError::MemSizeLesserThanFileSize);
    }

    if phdr.memory_size == 0 {
        return Err(SegmentError::EmptyMemSize);
    }

    let start = phdr.virtual_address as usize;
    if !is_user_vaddr(start) {
        return Err(SegmentError::VMRegionOutOfRange);
    }

    let end = start
        .checked_add(phdr.memory_size as usize)
        .ok_or(SegmentError::VMRegionWrapAround)?;
    if !is_user_vaddr(end - 1) {
        return Err(SegmentError::VMRegionOutOfRange);
    }

    if start < PAGE_FRAME_SIZE {
        return Err(SegmentError::PageZeroMapping);
    }

    Ok(())
}

/// Registers every page of a validated segment. Pages that overlap the file
/// image become lazy file pages, the rest lazy zero pages.
fn register_segment(
    spt: &SupplementalPageTable,
    file: &FileRef,
    phdr: &ElfProgramHeader,
) -> Result<()> {
    let vaddr = phdr.virtual_address as usize;
    let offset_in_page = vaddr & PAGE_MASK;
    let file_page = u64::from(phdr.file_offset) & !(PAGE_MASK as u64);
    let first = Vpn::containing(page_round_down(vaddr));

    let mut read_bytes = if phdr.file_size > 0 {
        offset_in_page + phdr.file_size as usize
    } else {
        0
    };
    let pages = page_round_up(offset_in_page + phdr.memory_size as usize) / PAGE_FRAME_SIZE;

    for i in 0..pages {
        let vpn = first.add(i);
        let page_read = min(read_bytes, PAGE_FRAME_SIZE);
        if page_read > 0 {
            let offset = file_page + (i * PAGE_FRAME_SIZE) as u64;
            spt.register_lazy_file(vpn, file.clone(), offset, page_read, phdr.writable)?;
        } else {
            spt.register_zero(vpn, phdr.writable)?;
        }
        read_bytes -= page_read;
    }
    Ok(())
}

/// Validates the executable in `file` and registers its loadable segments
/// in `spt` without reading any of their contents. Returns the entry point.
pub fn load_executable(spt: &SupplementalPageTable, file: &FileRef) -> Result<usize> {
    let mut header_bytes = [0; ELF_HEADER_SIZE];
    if file.read_at(0, &mut header_bytes)? != ELF_HEADER_SIZE {
        return Err(ElfError::Truncated.into());
    }
    let (_, header) =
        ElfHeader::parse(&header_bytes).map_err(|_| ElfError::InvalidMagicNumber)?;
    verify_elf_header(&header)?;

    let count = header.program_header_count as usize;
    let table_offset = u64::from(header.program_headers_offset);
    let mut table = vec![0; count * PROGRAM_HEADER_SIZE];
    if table_offset + table.len() as u64 > file.len() {
        return Err(ElfError::ProgramHeadersOutOfRange.into());
    }
    vfs::read_exact_at(&**file, table_offset, &mut table)?;
    let (_, headers) = ElfProgramHeader::parse_table(&table, count, Endianness::Little)
        .map_err(|_| ElfError::ProgramHeadersOutOfRange)?;

    // Reject the whole image before registering anything.
    for phdr in &headers {
        match phdr.program_type {
            ElfProgramType::Load => validate_segment(phdr, file.len())?,
            ElfProgramType::Dynamic | ElfProgramType::Interpret | ElfProgramType::Shlib => {
                return Err(ElfError::UnsupportedSegment(phdr.program_type).into());
            }
            _ => {}
        }
    }

    for phdr in headers
        .iter()
        .filter(|phdr| phdr.program_type == ElfProgramType::Load)
    {
        debug!(
            "segment {:#010x}+{:#x} (file {:#x}+{:#x})",
            phdr.virtual_address, phdr.memory_size, phdr.file_offset, phdr.file_size
        );
        register_segment(spt, file, phdr)?;
    }

    Ok(header.program_entry as usize)
}
