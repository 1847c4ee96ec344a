//! Output generation
//!
//! Writes collected events and summaries to disk

pub mod json;
