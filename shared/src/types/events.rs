//! Event type definitions for emitted records
//!
//! These types represent the records the OUTPUT stage emits, decoded into
//! an owned, serializable form for the agent's collectors and output.

use serde::{Deserialize, Serialize};

use crate::config::MAX_ARGS;
use crate::record::MsgGenericLsm;

/// Timestamp in nanoseconds since boot
pub type Timestamp = u64;

/// Process ID
pub type Pid = u32;

/// Thread ID
pub type Tid = u32;

/// One argument as the record carried it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgValue {
    pub index: u8,
    pub value: i64,
}

/// A record emitted by the generic LSM pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LsmEvent {
    /// Kernel timestamp when the hook fired
    pub timestamp: Timestamp,

    /// Thread group (process) ID
    pub pid: Pid,

    /// Thread ID
    pub tid: Tid,

    /// CPU the hook ran on
    pub cpu: u32,

    /// Identifier of the configured hook
    pub func_id: u32,

    /// Message kind tag
    pub op: u8,

    /// Materialized arguments in slot order
    pub args: Vec<ArgValue>,

    /// Action flags applied to the record
    pub action_flags: u32,

    /// Verdict forced by the override action, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_error: Option<i32>,
}

impl From<&MsgGenericLsm> for LsmEvent {
    fn from(msg: &MsgGenericLsm) -> Self {
        let args = (0..MAX_ARGS)
            .filter_map(|i| {
                msg.arg(i).map(|value| ArgValue {
                    index: i as u8,
                    value,
                })
            })
            .collect();

        Self {
            timestamp: msg.common.ktime,
            pid: msg.tgid(),
            tid: msg.tid(),
            cpu: msg.cpu,
            func_id: msg.func_id,
            op: msg.common.op,
            args,
            action_flags: msg.action_flags,
            override_error: (msg.override_error != 0).then_some(msg.override_error),
        }
    }
}
