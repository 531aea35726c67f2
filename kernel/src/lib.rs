//! Demand-paged virtual memory for KidneyOS user processes: lazy loading of
//! executables, a shared frame table with second-chance eviction to swap,
//! stack growth and memory-mapped files.
#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod block;
pub mod config;
pub mod error;
pub mod interrupts;
pub mod mem;
pub mod sync;
pub mod system;
pub mod threading;
pub mod user_program;
pub mod vfs;

pub use config::VmConfig;
pub use error::{Result, VmError};
pub use system::System;
