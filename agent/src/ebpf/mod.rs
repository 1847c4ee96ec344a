//! eBPF program management
//!
//! Loading, attaching and managing the generic LSM programs

pub mod btf;
pub mod generic_lsm;
pub mod loader;
