//! Event collectors
//!
//! Turn records emitted by the OUTPUT stage into owned events

pub mod lsm;
