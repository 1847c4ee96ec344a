#![no_std]
#![no_main]

//! Generic LSM pipeline
//!
//! The entry program is attached to the configured LSM hook. Every other
//! program is a stage reached only through `LSM_CALLS`; each runs one shared
//! handler and then tail-calls the slot it names. Code after a tail call
//! only runs when the transfer is withheld.

use aya_ebpf::{macros::lsm, programs::LsmContext};
use aya_log_ebpf::warn;
use lsmgate_shared::{
    pipeline::{self, fail_verdict, StageExit},
    record::MsgGenericLsm,
};

mod common;
use common::{heap, KernelHook, KernelMaps, LSM_CALLS, MAPS};

#[no_mangle]
#[link_section = "license"]
pub static LICENSE: [u8; 13] = *b"Dual BSD/GPL\0";

#[inline(always)]
fn run_stage<'a, F>(ctx: &'a LsmContext, stage: F) -> i32
where
    F: FnOnce(&KernelHook<'a>, &mut MsgGenericLsm, &KernelMaps) -> StageExit,
{
    let hook = KernelHook(ctx);
    let msg = match heap() {
        Some(m) => m,
        None => return fail_verdict::<KernelHook<'a>, _>(&MAPS),
    };

    match stage(&hook, msg, &MAPS) {
        StageExit::Return(verdict) => verdict,
        StageExit::TailCall {
            target,
            fallthrough,
        } => {
            let _ = unsafe { LSM_CALLS.tail_call(ctx, target.index()) };
            warn!(ctx, "tail call to slot {} withheld", target.index());
            fallthrough.resolve(&common::KernelOverrides)
        }
    }
}

#[lsm(hook = "generic_lsm")]
pub fn generic_lsm_event(ctx: LsmContext) -> i32 {
    run_stage(&ctx, pipeline::start_process_filter)
}

#[lsm(hook = "generic_lsm")]
pub fn generic_lsm_setup_event(ctx: LsmContext) -> i32 {
    run_stage(&ctx, pipeline::setup_event)
}

#[lsm(hook = "generic_lsm")]
pub fn generic_lsm_process_event(ctx: LsmContext) -> i32 {
    run_stage(&ctx, pipeline::generic_lsm_process_event)
}

#[lsm(hook = "generic_lsm")]
pub fn generic_lsm_process_filter(ctx: LsmContext) -> i32 {
    run_stage(&ctx, pipeline::process_filter)
}

#[lsm(hook = "generic_lsm")]
pub fn generic_lsm_filter_arg(ctx: LsmContext) -> i32 {
    run_stage(&ctx, pipeline::generic_lsm_filter_arg)
}

/// Also runs the override check itself, for configurations that skip OUTPUT.
#[lsm(hook = "generic_lsm")]
pub fn generic_lsm_actions(ctx: LsmContext) -> i32 {
    run_stage(&ctx, pipeline::actions)
}

#[lsm(hook = "generic_lsm")]
pub fn generic_lsm_output(ctx: LsmContext) -> i32 {
    run_stage(&ctx, pipeline::generic_lsm_output)
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
