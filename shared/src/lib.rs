//! Shared types and protocol for lsmgate
//!
//! This crate holds everything both sides of the pipeline agree on: the
//! stage-table layout, the in-flight record, the configuration and filter
//! map values, the override check, and the stage handlers themselves. The
//! handlers are generic over the stores and hook context so the kernel
//! programs and the userspace dispatcher run the same code.
//!
//! Without the `std` feature the crate is `no_std` and builds for the BPF
//! target.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod config;
pub mod dispatch;
pub mod filter;
pub mod overrides;
pub mod pipeline;
pub mod record;
pub mod stage;

#[cfg(feature = "std")]
pub mod host;
#[cfg(feature = "std")]
pub mod types;
#[cfg(feature = "std")]
pub mod utils;

// Re-export commonly used types
pub use config::{ArgType, EventConfig, FailPolicy, HookFamily, MAX_ARGS};
pub use filter::{FilterMapValue, FilterOutcome, MatchOp, Matcher};
pub use overrides::{try_override, OverrideStore};
pub use pipeline::{Fallthrough, HookContext, PipelineMaps, StageExit};
pub use record::MsgGenericLsm;
pub use stage::Stage;
