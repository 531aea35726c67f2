pub mod process;
pub mod process_table;
