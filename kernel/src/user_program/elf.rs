//! Parsing of 32-bit ELF headers. Validation lives in the loader.

use alloc::vec::Vec;
use nom::bytes::complete::{tag, take};
use nom::combinator::map;
use nom::multi::count;
use nom::number::complete::{u16, u32, u8};
use nom::number::Endianness;
use nom::IResult;

pub const ELF_MAGIC_NUMBER: [u8; 4] = [0x7F, b'E', b'L', b'F'];
pub const ELF_HEADER_SIZE: usize = 52;
pub const PROGRAM_HEADER_SIZE: usize = 32;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElfUsage {
    Relocatable,
    Executable,
    Shared,
    Core,
    Other(u16),
}

impl From<u16> for ElfUsage {
    fn from(value: u16) -> Self {
        match value {
            1 => Self::Relocatable,
            2 => Self::Executable,
            3 => Self::Shared,
            4 => Self::Core,
            _ => Self::Other(value),
        }
    }
}

// Common Architectures from https://wiki.osdev.org/ELF
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElfArchitecture {
    X86,
    X8664,
    Arm,
    RiscV,
    Other(u16),
}

impl From<u16> for ElfArchitecture {
    fn from(value: u16) -> Self {
        match value {
            0x03 => Self::X86,
            0x3E => Self::X8664,
            0x28 => Self::Arm,
            0xF3 => Self::RiscV,
            _ => Self::Other(value),
        }
    }
}

/// The ELF file header. Identification bytes are kept raw so the loader can
/// say precisely what it does not support.
#[derive(Copy, Clone, Debug)]
pub struct ElfHeader {
    /// 1 for 32-bit, 2 for 64-bit.
    pub class: u8,
    /// 1 for little endian, 2 for big endian.
    pub data_encoding: u8,
    pub header_version: u8,
    pub abi: u8,
    pub usage: ElfUsage,
    pub architecture: ElfArchitecture,
    pub elf_version: u32,
    pub program_entry: u32,
    pub program_headers_offset: u32,
    pub section_headers_offset: u32,
    pub flags: u32,
    pub elf_header_size: u16,
    pub program_header_entry_size: u16,
    pub program_header_count: u16,
    pub section_header_entry_size: u16,
    pub section_header_count: u16,
    pub section_header_index: u16,
}

impl ElfHeader {
    /// Fails only if `bytes` is too short or lacks the ELF magic number.
    pub fn parse(bytes: &[u8]) -> IResult<&[u8], ElfHeader> {
        let (bytes, _) = tag(&ELF_MAGIC_NUMBER[..])(bytes)?;
        let (bytes, class) = u8(bytes)?;
        let (bytes, data_encoding) = u8(bytes)?;

        let endian = match data_encoding {
            2 => Endianness::Big,
            _ => Endianness::Little,
        };

        let (bytes, header_version) = u8(bytes)?;
        let (bytes, abi) = u8(bytes)?;

        // ABI version and padding.
        let (bytes, _) = take(8usize)(bytes)?;

        let (bytes, usage) = map(u16(endian), ElfUsage::from)(bytes)?;
        let (bytes, architecture) = map(u16(endian), ElfArchitecture::from)(bytes)?;

        let (bytes, elf_version) = u32(endian)(bytes)?;
        let (bytes, program_entry) = u32(endian)(bytes)?;
        let (bytes, program_headers_offset) = u32(endian)(bytes)?;
        let (bytes, section_headers_offset) = u32(endian)(bytes)?;

        let (bytes, flags) = u32(endian)(bytes)?;

        let (bytes, elf_header_size) = u16(endian)(bytes)?;
        let (bytes, program_header_entry_size) = u16(endian)(bytes)?;
        let (bytes, program_header_count) = u16(endian)(bytes)?;
        let (bytes, section_header_entry_size) = u16(endian)(bytes)?;
        let (bytes, section_header_count) = u16(endian)(bytes)?;
        let (bytes, section_header_index) = u16(endian)(bytes)?;

        Ok((
            bytes,
            ElfHeader {
                class,
                data_encoding,
                header_version,
                abi,
                usage,
                architecture,
                elf_version,
                program_entry,
                program_headers_offset,
                section_headers_offset,
                flags,
                elf_header_size,
                program_header_entry_size,
                program_header_count,
                section_header_entry_size,
                section_header_count,
                section_header_index,
            },
        ))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElfProgramType {
    Null,
    Load,
    Dynamic,
    Interpret,
    Note,
    Shlib,
    Phdr,
    Stack,
    Other(u32),
}

impl From<u32> for ElfProgramType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Null,
            1 => Self::Load,
            2 => Self::Dynamic,
            3 => Self::Interpret,
            4 => Self::Note,
            5 => Self::Shlib,
            6 => Self::Phdr,
            0x6474_E551 => Self::Stack,
            _ => Self::Other(value),
        }
    }
}

// Flags for p_flags
pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

/// A program header. Segment contents stay in the file until a page of the
/// segment is first touched.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ElfProgramHeader {
    pub program_type: ElfProgramType,
    pub file_offset: u32,
    pub virtual_address: u32,
    pub physical_address: u32,
    pub file_size: u32,
    pub memory_size: u32,
    pub executable: bool,
    pub writable: bool,
    pub readable: bool,
    pub alignment: u32,
}

impl ElfProgramHeader {
    pub fn parse(bytes: &[u8], endian: Endianness) -> IResult<&[u8], Self> {
        let (bytes, program_type) = map(u32(endian), ElfProgramType::from)(bytes)?;
        let (bytes, file_offset) = u32(endian)(bytes)?;
        let (bytes, virtual_address) = u32(endian)(bytes)?;
        let (bytes, physical_address) = u32(endian)(bytes)?;
        let (bytes, file_size) = u32(endian)(bytes)?;
        let (bytes, memory_size) = u32(endian)(bytes)?;
        let (bytes, flags) = u32(endian)(bytes)?;
        let (bytes, alignment) = u32(endian)(bytes)?;

        Ok((
            bytes,
            ElfProgramHeader {
                program_type,
                file_offset,
                virtual_address,
                physical_address,
                file_size,
                memory_size,
                executable: flags & PF_X != 0,
                writable: flags & PF_W != 0,
                readable: flags & PF_R != 0,
                alignment,
            },
        ))
    }

    /// Parses `n` consecutive program headers.
    pub fn parse_table(bytes: &[u8], n: usize, endian: Endianness) -> IResult<&[u8], Vec<Self>> {
        count(|bytes| Self::parse(bytes, endian), n)(bytes)
    }
}


#[cfg(test)]
mod tests {
    use super::image::{build, Segment};
    use super::*;

    #[test]
    fn parses_built_image() {
        let bytes = build(
            0x0804_8080,
            &[Segment::load(0x0804_8000, 0x1000, vec![1; 10], 0x20, PF_R | PF_X)],
        );
        let (_, header) = ElfHeader::parse(&bytes).unwrap();
        assert_eq!(header.class, 1);
        assert_eq!(header.usage, ElfUsage::Executable);
        assert_eq!(header.architecture, ElfArchitecture::X86);
        assert_eq!(header.program_entry, 0x0804_8080);
        assert_eq!(header.program_header_count, 1);

        let table = &bytes[header.program_headers_offset as usize..];
        let (_, headers) = ElfProgramHeader::parse_table(table, 1, Endianness::Little).unwrap();
        assert_eq!(
            headers[0],
            ElfProgramHeader {
                program_type: ElfProgramType::Load,
                file_offset: 0x1000,
                virtual_address: 0x0804_8000,
                physical_address: 0x0804_8000,
                file_size: 10,
                memory_size: 0x20,
                executable: true,
                writable: false,
                readable: true,
                alignment: 0x1000,
            }
        );
    }

    #[test]
    fn rejects_missing_magic_and_short_input() {
        let mut bytes = build(0, &[]);
        assert!(ElfHeader::parse(&bytes[..40]).is_err());
        bytes[1] = b'X';
        assert!(ElfHeader::parse(&bytes).is_err());
    }

    #[test]
    fn program_types() {
        assert_eq!(ElfProgramType::from(0x6474_E551), ElfProgramType::Stack);
        assert_eq!(ElfProgramType::from(0x7000_0000), ElfProgramType::Other(0x7000_0000));
    }
}
