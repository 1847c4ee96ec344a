//! Stage identifiers and the stage-table layout contract
//!
//! Stages never call each other. Each one ends by handing control to a
//! slot of the stage table (a `BPF_MAP_TYPE_PROG_ARRAY` in the kernel), so
//! the slot order below is part of the ABI between the kernel object and
//! whoever populates the table.

use crate::config::MAX_ARGS;

/// Slots provisioned in the stage table. Only the first six are used; the
/// size is shared with the other hook families.
pub const STAGE_TABLE_SLOTS: u32 = 13;

/// Kernel ceiling on chained tail calls per invocation (`MAX_TAIL_CALL_CNT`).
pub const MAX_TAIL_CALL_CNT: u32 = 33;

/// Name of the entry program attached to the hook.
pub const ENTRY_PROGRAM: &str = "generic_lsm_event";

/// A populated slot of the stage table.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Setup = 0,
    ProcessEvent = 1,
    ProcessFilter = 2,
    FilterArg = 3,
    Actions = 4,
    Output = 5,
}

/// Slot the filter stage transfers to once the record is accepted.
pub const ACCEPT_CONTINUATION: Stage = Stage::Setup;

impl Stage {
    /// All stages in slot order.
    pub const ALL: [Stage; 6] = [
        Stage::Setup,
        Stage::ProcessEvent,
        Stage::ProcessFilter,
        Stage::FilterArg,
        Stage::Actions,
        Stage::Output,
    ];

    pub const fn index(self) -> u32 {
        self as u32
    }

    pub const fn from_index(index: u32) -> Option<Stage> {
        match index {
            0 => Some(Stage::Setup),
            1 => Some(Stage::ProcessEvent),
            2 => Some(Stage::ProcessFilter),
            3 => Some(Stage::FilterArg),
            4 => Some(Stage::Actions),
            5 => Some(Stage::Output),
            _ => None,
        }
    }

    /// Program name of the handler in the kernel object.
    pub const fn program_name(self) -> &'static str {
        match self {
            Stage::Setup => "generic_lsm_setup_event",
            Stage::ProcessEvent => "generic_lsm_process_event",
            Stage::ProcessFilter => "generic_lsm_process_filter",
            Stage::FilterArg => "generic_lsm_filter_arg",
            Stage::Actions => "generic_lsm_actions",
            Stage::Output => "generic_lsm_output",
        }
    }

    pub fn from_program_name(name: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.program_name() == name)
    }

    const fn bit(self) -> u8 {
        1 << (self as u32)
    }
}

/// Upper bound on tail calls for an invocation whose filter reads
/// `filterable_args` arguments: entry → filter, one fetch and one return
/// per argument, then setup, event, actions and output.
pub const fn max_hops(filterable_args: u32) -> u32 {
    2 * filterable_args + 5
}

const _: () = assert!(max_hops(MAX_ARGS as u32) < MAX_TAIL_CALL_CNT);

/// Set of stages that ran during one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSet(u8);

impl StageSet {
    pub fn insert(&mut self, stage: Stage) {
        self.0 |= stage.bit();
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.0 & stage.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Rejected stage-table layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum LayoutError {
    #[cfg_attr(
        feature = "std",
        error("stage table has {len} slots, expected {}", STAGE_TABLE_SLOTS)
    )]
    TableSize { len: usize },

    #[cfg_attr(feature = "std", error("slot {slot} is outside the stage table"))]
    SlotOutOfRange { slot: u32 },

    #[cfg_attr(feature = "std", error("slot {slot} names a program that is not a stage"))]
    UnknownProgram { slot: u32 },

    #[cfg_attr(feature = "std", error("slot {slot} holds {found:?}, expected {expected:?}"))]
    Misplaced {
        slot: u32,
        expected: Option<Stage>,
        found: Stage,
    },

    #[cfg_attr(feature = "std", error("{0:?} bound to more than one slot"))]
    Duplicate(Stage),

    #[cfg_attr(feature = "std", error("no handler bound for {0:?}"))]
    Missing(Stage),
}

/// Check that `slots` is exactly the fixed six-stage layout with every
/// unused slot empty.
pub fn validate_layout(slots: &[Option<Stage>]) -> Result<(), LayoutError> {
    if slots.len() != STAGE_TABLE_SLOTS as usize {
        return Err(LayoutError::TableSize { len: slots.len() });
    }

    for (slot, entry) in slots.iter().enumerate() {
        let slot = slot as u32;
        let expected = Stage::from_index(slot);
        if let Some(found) = *entry {
            if Some(found) != expected {
                return Err(LayoutError::Misplaced {
                    slot,
                    expected,
                    found,
                });
            }
        }
    }

    for stage in Stage::ALL {
        if slots[stage.index() as usize].is_none() {
            return Err(LayoutError::Missing(stage));
        }
    }

    Ok(())
}

/// Build the slot layout from `(slot, program name)` bindings and validate it.
pub fn layout_from_bindings(
    bindings: &[(u32, &str)],
) -> Result<[Option<Stage>; STAGE_TABLE_SLOTS as usize], LayoutError> {
    let mut slots = [None; STAGE_TABLE_SLOTS as usize];
    let mut seen = StageSet::default();

    for &(slot, name) in bindings {
        if slot >= STAGE_TABLE_SLOTS {
            return Err(LayoutError::SlotOutOfRange { slot });
        }
        let stage = Stage::from_program_name(name).ok_or(LayoutError::UnknownProgram { slot })?;
        if seen.contains(stage) {
            return Err(LayoutError::Duplicate(stage));
        }
        seen.insert(stage);
        slots[slot as usize] = Some(stage);
    }

    validate_layout(&slots)?;
    Ok(slots)
}

/// The bindings the agent installs for the generic LSM object.
pub fn generic_lsm_bindings() -> [(u32, &'static str); 6] {
    Stage::ALL.map(|s| (s.index(), s.program_name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_bindings_validate() {
        let slots = layout_from_bindings(&generic_lsm_bindings()).unwrap();
        assert_eq!(slots[0], Some(Stage::Setup));
        assert_eq!(slots[5], Some(Stage::Output));
        assert!(slots[6..].iter().all(Option::is_none));
    }

    #[test]
    fn test_reordered_bindings_rejected() {
        let mut bindings = generic_lsm_bindings();
        bindings[2].1 = Stage::FilterArg.program_name();
        bindings[3].1 = Stage::ProcessFilter.program_name();

        let err = layout_from_bindings(&bindings).unwrap_err();
        assert_eq!(
            err,
            LayoutError::Misplaced {
                slot: 2,
                expected: Some(Stage::ProcessFilter),
                found: Stage::FilterArg,
            }
        );
    }

    #[test]
    fn test_unused_slot_must_stay_empty() {
        let mut bindings = generic_lsm_bindings().to_vec();
        bindings[5].0 = 7;
        let err = layout_from_bindings(&bindings).unwrap_err();
        assert!(matches!(err, LayoutError::Misplaced { slot: 7, expected: None, .. }));
    }

    #[test]
    fn test_missing_and_duplicate_stages() {
        let all = generic_lsm_bindings();
        assert_eq!(
            layout_from_bindings(&all[..5]).unwrap_err(),
            LayoutError::Missing(Stage::Output)
        );

        let mut dup = generic_lsm_bindings().to_vec();
        dup.push((5, Stage::Setup.program_name()));
        assert_eq!(
            layout_from_bindings(&dup).unwrap_err(),
            LayoutError::Duplicate(Stage::Setup)
        );
    }

    #[test]
    fn test_bad_slots_and_names() {
        assert_eq!(
            layout_from_bindings(&[(13, "generic_lsm_setup_event")]).unwrap_err(),
            LayoutError::SlotOutOfRange { slot: 13 }
        );
        assert_eq!(
            layout_from_bindings(&[(0, "cpu_profiler")]).unwrap_err(),
            LayoutError::UnknownProgram { slot: 0 }
        );
        assert_eq!(
            validate_layout(&[None; 6]).unwrap_err(),
            LayoutError::TableSize { len: 6 }
        );
    }

    #[test]
    fn test_hop_budget() {
        assert_eq!(max_hops(0), 5);
        assert_eq!(max_hops(MAX_ARGS as u32), 15);
        assert!(max_hops(MAX_ARGS as u32) < MAX_TAIL_CALL_CNT);
    }

    #[test]
    fn test_stage_index_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_index(stage.index()), Some(stage));
            assert_eq!(Stage::from_program_name(stage.program_name()), Some(stage));
        }
        assert_eq!(Stage::from_index(6), None);
    }
}
