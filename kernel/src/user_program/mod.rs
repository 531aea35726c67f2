pub mod arguments;
pub mod elf;
pub mod elf_loader;
pub mod process;
