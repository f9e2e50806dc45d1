//! Virtual memory core: the coremap with its page replacement policies, and
//! the TLB refill path that drives them on page faults.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod config;
pub mod logging;
pub mod mem;
pub mod sync;
pub mod vm;

pub use config::{PagingMode, ReplacementPolicyKind, VmConfig};
pub use vm::VirtualMemory;
