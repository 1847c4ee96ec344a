//! Stage handlers
//!
//! Each handler runs one stage against the scratch record and returns a
//! `StageExit` instead of calling the next stage. The kernel programs turn
//! `TailCall` into `bpf_tail_call`; the userspace dispatcher looks the target
//! up in its own table. Either way, if the transfer does not happen the
//! handler's `Fallthrough` decides the verdict.

use crate::config::{ArgType, EventConfig, HookFamily, MAX_ARGS};
use crate::filter::{self, FilterMapValue, FilterOutcome};
use crate::overrides::{try_override, OverrideStore};
use crate::record::{MsgGenericLsm, Phase, MSG_OP_GENERIC_LSM, NO_PENDING_ARG};
use crate::stage::{Stage, ACCEPT_CONTINUATION};

/// Verdict that lets the intercepted operation proceed.
pub const VERDICT_ALLOW: i32 = 0;

/// Verdict returned when the filter drops the record. A rejected record is
/// one the policy does not cover, so the hook stays transparent.
pub const VERDICT_FILTER_REJECT: i32 = VERDICT_ALLOW;

/// Access to the intercepted operation.
pub trait HookContext {
    /// Raw value of argument `n` using the family's access convention.
    fn arg(&self, n: usize, family: HookFamily) -> u64;

    fn pid_tgid(&self) -> u64;

    fn cpu(&self) -> u32;

    fn ktime_ns(&self) -> u64;
}

/// Process-wide stores and the transport, shared by every invocation.
///
/// Configuration and filter are read-only here. The override store is
/// written by ACTIONS and consumed by the override check.
pub trait PipelineMaps<C: HookContext> {
    type Overrides: OverrideStore;

    fn config(&self) -> Option<&EventConfig>;

    fn filter(&self) -> Option<&FilterMapValue>;

    fn overrides(&self) -> &Self::Overrides;

    /// Emit a completed record to the consumer.
    fn output(&self, ctx: &C, msg: &MsgGenericLsm);
}

/// What a stage returns when its control transfer is withheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallthrough {
    Verdict(i32),
    /// Run the override check for this thread and return its result.
    TryOverride(u64),
}

impl Fallthrough {
    pub fn resolve<S: OverrideStore + ?Sized>(self, overrides: &S) -> i32 {
        match self {
            Fallthrough::Verdict(v) => v,
            Fallthrough::TryOverride(id) => try_override(overrides, id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageExit {
    TailCall { target: Stage, fallthrough: Fallthrough },
    Return(i32),
}

impl StageExit {
    fn transfer(target: Stage, config: &EventConfig) -> Self {
        StageExit::TailCall {
            target,
            fallthrough: Fallthrough::Verdict(config.fail_verdict()),
        }
    }
}

/// Verdict when the stores themselves are unavailable.
pub fn fail_verdict<C: HookContext, M: PipelineMaps<C>>(maps: &M) -> i32 {
    maps.config().map_or(VERDICT_ALLOW, EventConfig::fail_verdict)
}

/// Entry: clear the scratch record, capture the caller and start filtering.
pub fn start_process_filter<C, M>(ctx: &C, msg: &mut MsgGenericLsm, maps: &M) -> StageExit
where
    C: HookContext,
    M: PipelineMaps<C>,
{
    let config = match maps.config() {
        Some(c) => c,
        None => return StageExit::Return(VERDICT_ALLOW),
    };

    msg.reset();
    msg.pid_tgid = ctx.pid_tgid();
    msg.cpu = ctx.cpu();
    msg.common.ktime = ctx.ktime_ns();
    msg.func_id = config.func_id;
    msg.set_phase(Phase::Filtering);

    StageExit::transfer(Stage::ProcessFilter, config)
}

/// SETUP: fixed header fields, reached through the accept continuation.
pub fn setup_event<C, M>(_ctx: &C, msg: &mut MsgGenericLsm, maps: &M) -> StageExit
where
    C: HookContext,
    M: PipelineMaps<C>,
{
    let config = match maps.config() {
        Some(c) => c,
        None => return StageExit::Return(VERDICT_ALLOW),
    };
    if msg.phase() != Phase::Accepted {
        return StageExit::Return(config.fail_verdict());
    }

    msg.common.op = MSG_OP_GENERIC_LSM;
    msg.common.size = core::mem::size_of::<MsgGenericLsm>() as u32;
    msg.func_id = config.func_id;

    StageExit::transfer(Stage::ProcessEvent, config)
}

/// PROCESS_EVENT: decode every configured argument the filter did not
/// already materialize.
pub fn process_event<C, M>(ctx: &C, msg: &mut MsgGenericLsm, maps: &M, family: HookFamily) -> StageExit
where
    C: HookContext,
    M: PipelineMaps<C>,
{
    let config = match maps.config() {
        Some(c) => c,
        None => return StageExit::Return(VERDICT_ALLOW),
    };

    for i in 0..MAX_ARGS {
        let ty = config.arg_type(i);
        if ty == ArgType::None || msg.has_arg(i) {
            continue;
        }
        msg.store_arg(i, ty.decode(ctx.arg(i, family)));
    }

    StageExit::transfer(Stage::Actions, config)
}

/// PROCESS_FILTER: one evaluation hop.
pub fn process_filter<C, M>(_ctx: &C, msg: &mut MsgGenericLsm, maps: &M) -> StageExit
where
    C: HookContext,
    M: PipelineMaps<C>,
{
    let (config, filter) = match (maps.config(), maps.filter()) {
        (Some(c), Some(f)) => (c, f),
        _ => return StageExit::Return(fail_verdict(maps)),
    };

    match filter::evaluate(msg, filter, config) {
        FilterOutcome::Continue => StageExit::transfer(Stage::FilterArg, config),
        FilterOutcome::Accept => {
            msg.set_phase(Phase::Accepted);
            StageExit::transfer(ACCEPT_CONTINUATION, config)
        }
        FilterOutcome::Reject => StageExit::Return(VERDICT_FILTER_REJECT),
    }
}

/// FILTER_ARG: materialize the one argument the evaluator is waiting on,
/// then go back to PROCESS_FILTER.
pub fn filter_arg<C, M>(ctx: &C, msg: &mut MsgGenericLsm, maps: &M, family: HookFamily) -> StageExit
where
    C: HookContext,
    M: PipelineMaps<C>,
{
    let config = match maps.config() {
        Some(c) => c,
        None => return StageExit::Return(VERDICT_ALLOW),
    };

    // A request for a missing or already fetched slot would loop forever.
    let index = match msg.pending_arg() {
        Some(i) if i < MAX_ARGS && !msg.has_arg(i) => i,
        _ => return StageExit::Return(config.fail_verdict()),
    };

    let ty = config.arg_type(index);
    msg.store_arg(index, ty.decode(ctx.arg(index, family)));
    msg.filter.pending = NO_PENDING_ARG;

    StageExit::transfer(Stage::ProcessFilter, config)
}

/// ACTIONS: apply the configured actions, then either post or run the
/// override check here (no-post).
pub fn actions<C, M>(_ctx: &C, msg: &mut MsgGenericLsm, maps: &M) -> StageExit
where
    C: HookContext,
    M: PipelineMaps<C>,
{
    let config = match maps.config() {
        Some(c) => c,
        None => return StageExit::Return(VERDICT_ALLOW),
    };
    let id = msg.pid_tgid;

    msg.action_flags = config.action_flags;
    if config.overrides() && maps.overrides().set(id, config.override_error) {
        msg.override_error = config.override_error;
    }

    if config.posts() {
        // A withheld OUTPUT still applies the override.
        return StageExit::TailCall {
            target: Stage::Output,
            fallthrough: Fallthrough::TryOverride(id),
        };
    }

    StageExit::Return(try_override(maps.overrides(), id))
}

/// OUTPUT: emit the record tagged with `op`, then run the override check.
pub fn output<C, M>(ctx: &C, msg: &mut MsgGenericLsm, maps: &M, op: u8) -> StageExit
where
    C: HookContext,
    M: PipelineMaps<C>,
{
    msg.common.op = op;
    msg.set_phase(Phase::Posted);
    maps.output(ctx, msg);

    StageExit::Return(try_override(maps.overrides(), msg.pid_tgid))
}

// Fixed-argument forms of the handlers for this hook family, usable as
// plain function pointers in a stage table.

pub fn generic_lsm_process_event<C: HookContext, M: PipelineMaps<C>>(
    ctx: &C,
    msg: &mut MsgGenericLsm,
    maps: &M,
) -> StageExit {
    process_event(ctx, msg, maps, HookFamily::Lsm)
}

pub fn generic_lsm_filter_arg<C: HookContext, M: PipelineMaps<C>>(
    ctx: &C,
    msg: &mut MsgGenericLsm,
    maps: &M,
) -> StageExit {
    filter_arg(ctx, msg, maps, HookFamily::Lsm)
}

pub fn generic_lsm_output<C: HookContext, M: PipelineMaps<C>>(
    ctx: &C,
    msg: &mut MsgGenericLsm,
    maps: &M,
) -> StageExit {
    output(ctx, msg, maps, MSG_OP_GENERIC_LSM)
}
