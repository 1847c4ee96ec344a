//! Userspace event types

pub mod events;
pub mod summary;
