//! In-flight record
//!
//! One `MsgGenericLsm` per CPU lives in the scratch map and is rebuilt by
//! every invocation. Nothing survives a tail call except what is stored
//! here, so the filter evaluator keeps its progress in `filter`.

use crate::config::MAX_ARGS;

/// Message kind tagged on records emitted by this pipeline.
pub const MSG_OP_GENERIC_LSM: u8 = 18;

/// `FilterState::pending` value when no argument is requested.
pub const NO_PENDING_ARG: u8 = u8::MAX;

/// Progress of the record through the chain.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle = 0,
    Filtering = 1,
    Accepted = 2,
    Posted = 3,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgCommon {
    pub op: u8,
    pub flags: u8,
    pub _pad: [u8; 2],
    pub size: u32,
    pub ktime: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterState {
    /// Next matcher to evaluate.
    pub cursor: u16,
    /// Argument the evaluator is waiting for.
    pub pending: u8,
    pub _pad: u8,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            cursor: 0,
            pending: NO_PENDING_ARG,
            _pad: 0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgGenericLsm {
    pub common: MsgCommon,
    /// Thread identity, `tgid << 32 | pid`.
    pub pid_tgid: u64,
    pub func_id: u32,
    pub cpu: u32,
    pub phase: u8,
    /// Bitmask of materialized argument slots.
    pub fetched: u8,
    pub _pad: [u8; 2],
    pub filter: FilterState,
    pub action_flags: u32,
    /// Error code requested by the override action, 0 if none.
    pub override_error: i32,
    pub args: [i64; MAX_ARGS],
}

impl MsgGenericLsm {
    /// Clear every field left by the previous invocation on this CPU.
    #[inline(always)]
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn tgid(&self) -> u32 {
        (self.pid_tgid >> 32) as u32
    }

    pub fn tid(&self) -> u32 {
        self.pid_tgid as u32
    }

    pub fn phase(&self) -> Phase {
        match self.phase {
            1 => Phase::Filtering,
            2 => Phase::Accepted,
            3 => Phase::Posted,
            _ => Phase::Idle,
        }
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase as u8;
    }

    pub fn has_arg(&self, index: usize) -> bool {
        index < MAX_ARGS && self.fetched & (1 << index) != 0
    }

    pub fn arg(&self, index: usize) -> Option<i64> {
        if self.has_arg(index) {
            self.args.get(index).copied()
        } else {
            None
        }
    }

    pub fn store_arg(&mut self, index: usize, value: i64) {
        if let Some(slot) = self.args.get_mut(index) {
            *slot = value;
            self.fetched |= 1 << index;
        }
    }

    pub fn pending_arg(&self) -> Option<usize> {
        match self.filter.pending {
            NO_PENDING_ARG => None,
            n => Some(n as usize),
        }
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for MsgGenericLsm {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_residue() {
        let mut msg = MsgGenericLsm::default();
        msg.pid_tgid = (100 << 32) | 101;
        msg.store_arg(2, -7);
        msg.filter.cursor = 3;
        msg.filter.pending = 4;
        msg.override_error = -1;
        msg.set_phase(Phase::Posted);

        msg.reset();

        assert_eq!(msg, MsgGenericLsm::default());
        assert_eq!(msg.pending_arg(), None);
        assert_eq!(msg.arg(2), None);
        assert_eq!(msg.phase(), Phase::Idle);
    }

    #[test]
    fn test_identity_split() {
        let msg = MsgGenericLsm {
            pid_tgid: (4242u64 << 32) | 4243,
            ..Default::default()
        };
        assert_eq!(msg.tgid(), 4242);
        assert_eq!(msg.tid(), 4243);
    }

    #[test]
    fn test_store_arg_bounds() {
        let mut msg = MsgGenericLsm::default();
        msg.store_arg(MAX_ARGS, 9);
        assert_eq!(msg.fetched, 0);

        msg.store_arg(0, 9);
        assert!(msg.has_arg(0));
        assert_eq!(msg.arg(0), Some(9));
        assert!(!msg.has_arg(MAX_ARGS));
    }
}
