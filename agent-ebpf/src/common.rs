//! Maps and store bindings for the generic LSM programs
//!
//! The shared stage handlers are generic over `HookContext` and
//! `PipelineMaps`; this module binds them to the kernel helpers and the
//! object's maps.

use aya_ebpf::{
    helpers::{bpf_get_current_pid_tgid, bpf_get_smp_processor_id, bpf_ktime_get_ns},
    macros::map,
    maps::{Array, HashMap, PerCpuArray, PerfEventArray, ProgramArray},
    programs::LsmContext,
};
use lsmgate_shared::{
    config::{EventConfig, HookFamily},
    filter::FilterMapValue,
    overrides::{OverrideStore, OVERRIDE_MAP_ENTRIES},
    pipeline::{HookContext, PipelineMaps},
    record::MsgGenericLsm,
    stage::STAGE_TABLE_SLOTS,
};

/// Per-CPU scratch record.
#[map]
pub static PROCESS_CALL_HEAP: PerCpuArray<MsgGenericLsm> = PerCpuArray::with_max_entries(1, 0);

/// Stage table. Slots 0-5 are populated by the agent; the rest stay empty.
#[map]
pub static LSM_CALLS: ProgramArray = ProgramArray::with_max_entries(STAGE_TABLE_SLOTS, 0);

/// Forced verdicts keyed by `pid_tgid`.
#[map]
pub static OVERRIDE_TASKS: HashMap<u64, i32> = HashMap::with_max_entries(OVERRIDE_MAP_ENTRIES, 0);

// Arrays of size 1 are rewritten to direct loads by the verifier.
#[map]
pub static FILTER_MAP: Array<FilterMapValue> = Array::with_max_entries(1, 0);

#[map]
pub static CONFIG_MAP: Array<EventConfig> = Array::with_max_entries(1, 0);

/// Transport to userspace.
#[map]
pub static LSM_EVENTS: PerfEventArray<MsgGenericLsm> = PerfEventArray::new(0);

/// The hook's trampoline context.
pub struct KernelHook<'a>(pub &'a LsmContext);

impl HookContext for KernelHook<'_> {
    fn arg(&self, n: usize, family: HookFamily) -> u64 {
        match family {
            // BTF arguments are u64 slots on the trampoline stack
            HookFamily::Lsm => unsafe { self.0.arg::<u64>(n) },
            // No pt_regs behind an LSM trampoline
            HookFamily::Kprobe => 0,
        }
    }

    fn pid_tgid(&self) -> u64 {
        bpf_get_current_pid_tgid()
    }

    fn cpu(&self) -> u32 {
        unsafe { bpf_get_smp_processor_id() }
    }

    fn ktime_ns(&self) -> u64 {
        unsafe { bpf_ktime_get_ns() }
    }
}

pub struct KernelOverrides;

impl OverrideStore for KernelOverrides {
    fn get(&self, id: u64) -> Option<i32> {
        unsafe { OVERRIDE_TASKS.get(&id).copied() }
    }

    fn set(&self, id: u64, error: i32) -> bool {
        OVERRIDE_TASKS.insert(&id, &error, 0).is_ok()
    }

    fn delete(&self, id: u64) {
        let _ = OVERRIDE_TASKS.remove(&id);
    }
}

pub struct KernelMaps {
    overrides: KernelOverrides,
}

pub static MAPS: KernelMaps = KernelMaps {
    overrides: KernelOverrides,
};

impl<'a> PipelineMaps<KernelHook<'a>> for KernelMaps {
    type Overrides = KernelOverrides;

    fn config(&self) -> Option<&EventConfig> {
        CONFIG_MAP.get(0)
    }

    fn filter(&self) -> Option<&FilterMapValue> {
        FILTER_MAP.get(0)
    }

    fn overrides(&self) -> &KernelOverrides {
        &self.overrides
    }

    fn output(&self, ctx: &KernelHook<'a>, msg: &MsgGenericLsm) {
        LSM_EVENTS.output(ctx.0, msg, 0);
    }
}

/// This CPU's scratch record.
#[inline(always)]
pub fn heap() -> Option<&'static mut MsgGenericLsm> {
    // Programs run with migration disabled and the trampoline refuses
    // same-CPU recursion, so the slot is exclusive for the invocation.
    PROCESS_CALL_HEAP.get_ptr_mut(0).map(|p| unsafe { &mut *p })
}
