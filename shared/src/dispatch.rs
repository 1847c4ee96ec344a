//! Table-driven stage dispatcher
//!
//! Userspace counterpart of the kernel's tail-call chain. The table has the
//! same 13 slots as the program array, and the driver applies the same
//! rules: an empty slot or an exhausted hop budget withholds the transfer
//! and the issuing stage's fallthrough decides the verdict.

use crate::pipeline::{self, HookContext, PipelineMaps, StageExit};
use crate::record::MsgGenericLsm;
use crate::stage::{validate_layout, LayoutError, Stage, StageSet, MAX_TAIL_CALL_CNT, STAGE_TABLE_SLOTS};

pub type StageFn<C, M> = fn(&C, &mut MsgGenericLsm, &M) -> StageExit;

const SLOTS: usize = STAGE_TABLE_SLOTS as usize;

pub struct StageTable<C, M> {
    slots: [Option<StageFn<C, M>>; SLOTS],
    layout: [Option<Stage>; SLOTS],
}

impl<C: HookContext, M: PipelineMaps<C>> StageTable<C, M> {
    pub fn empty() -> Self {
        Self {
            slots: [None; SLOTS],
            layout: [None; SLOTS],
        }
    }

    /// The six generic LSM handlers at their fixed slots.
    pub fn generic_lsm() -> Self {
        let mut table = Self::empty();
        table.install(Stage::Setup, pipeline::setup_event::<C, M>);
        table.install(Stage::ProcessEvent, pipeline::generic_lsm_process_event::<C, M>);
        table.install(Stage::ProcessFilter, pipeline::process_filter::<C, M>);
        table.install(Stage::FilterArg, pipeline::generic_lsm_filter_arg::<C, M>);
        table.install(Stage::Actions, pipeline::actions::<C, M>);
        table.install(Stage::Output, pipeline::generic_lsm_output::<C, M>);
        table
    }

    /// Bind `handler` to the slot `stage` owns.
    pub fn install(&mut self, stage: Stage, handler: StageFn<C, M>) -> &mut Self {
        let slot = stage.index() as usize;
        self.slots[slot] = Some(handler);
        self.layout[slot] = Some(stage);
        self
    }

    /// Empty the slot `stage` owns, as if its program failed to load.
    pub fn remove(&mut self, stage: Stage) -> &mut Self {
        let slot = stage.index() as usize;
        self.slots[slot] = None;
        self.layout[slot] = None;
        self
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        validate_layout(&self.layout)
    }

    fn handler(&self, target: Stage) -> Option<StageFn<C, M>> {
        self.slots[target.index() as usize]
    }
}

/// Why a control transfer did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Withheld {
    EmptySlot,
    HopLimit,
    /// The CPU's scratch slot was already in use.
    ScratchBusy,
    /// The CPU has no scratch slot.
    NoScratch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A stage returned a verdict.
    Returned,
    Withheld { target: Option<Stage>, reason: Withheld },
}

/// Result of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    /// Verdict handed back to the hook.
    pub verdict: i32,
    /// Tail calls taken.
    pub hops: u32,
    pub stages: StageSet,
    pub termination: Termination,
}

impl Invocation {
    pub fn ran(&self, stage: Stage) -> bool {
        self.stages.contains(stage)
    }
}

/// Run one invocation from the entry trampoline to a terminal verdict.
pub fn run<C, M>(table: &StageTable<C, M>, ctx: &C, msg: &mut MsgGenericLsm, maps: &M) -> Invocation
where
    C: HookContext,
    M: PipelineMaps<C>,
{
    let mut hops = 0;
    let mut stages = StageSet::default();
    let mut exit = pipeline::start_process_filter(ctx, msg, maps);

    loop {
        let (target, fallthrough) = match exit {
            StageExit::Return(verdict) => {
                return Invocation {
                    verdict,
                    hops,
                    stages,
                    termination: Termination::Returned,
                }
            }
            StageExit::TailCall { target, fallthrough } => (target, fallthrough),
        };

        let handler = if hops >= MAX_TAIL_CALL_CNT {
            Err(Withheld::HopLimit)
        } else {
            table.handler(target).ok_or(Withheld::EmptySlot)
        };

        match handler {
            Ok(handler) => {
                hops += 1;
                stages.insert(target);
                exit = handler(ctx, msg, maps);
            }
            Err(reason) => {
                return Invocation {
                    verdict: fallthrough.resolve(maps.overrides()),
                    hops,
                    stages,
                    termination: Termination::Withheld {
                        target: Some(target),
                        reason,
                    },
                }
            }
        }
    }
}
