//! In-memory stores for running the pipeline outside the kernel
//!
//! These back the userspace dispatcher used by replay and tests: a locked
//! hash map for overrides, one scratch record per CPU, and a transport that
//! keeps emitted records in order.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, TryLockError};

use serde::{Deserialize, Serialize};

use crate::config::{EventConfig, HookFamily, MAX_ARGS};
use crate::dispatch::{self, Invocation, StageTable, Termination, Withheld};
use crate::filter::FilterMapValue;
use crate::overrides::{OverrideStore, OVERRIDE_MAP_ENTRIES};
use crate::pipeline::{fail_verdict, HookContext, PipelineMaps};
use crate::record::MsgGenericLsm;
use crate::stage::StageSet;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Override store with the kernel map's capacity.
#[derive(Debug)]
pub struct HashOverrideStore {
    entries: Mutex<HashMap<u64, i32>>,
    capacity: usize,
}

impl Default for HashOverrideStore {
    fn default() -> Self {
        Self::with_capacity(OVERRIDE_MAP_ENTRIES as usize)
    }
}

impl HashOverrideStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OverrideStore for HashOverrideStore {
    fn get(&self, id: u64) -> Option<i32> {
        lock(&self.entries).get(&id).copied()
    }

    fn set(&self, id: u64, error: i32) -> bool {
        let mut entries = lock(&self.entries);
        if entries.len() >= self.capacity && !entries.contains_key(&id) {
            return false;
        }
        entries.insert(id, error);
        true
    }

    fn delete(&self, id: u64) {
        lock(&self.entries).remove(&id);
    }
}

/// One recorded hook invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedCall {
    pub pid_tgid: u64,
    #[serde(default)]
    pub cpu: u32,
    #[serde(default)]
    pub ktime_ns: u64,
    /// Raw argument values in hook order.
    #[serde(default)]
    pub args: Vec<u64>,
}

impl RecordedCall {
    pub fn new(pid_tgid: u64, cpu: u32, args: &[u64]) -> Self {
        Self {
            pid_tgid,
            cpu,
            ktime_ns: 0,
            args: args.to_vec(),
        }
    }
}

impl HookContext for RecordedCall {
    // Recorded calls store arguments already normalized, so both families
    // read the same slots.
    fn arg(&self, n: usize, _family: HookFamily) -> u64 {
        self.args.get(n).copied().unwrap_or(0)
    }

    fn pid_tgid(&self) -> u64 {
        self.pid_tgid
    }

    fn cpu(&self) -> u32 {
        self.cpu
    }

    fn ktime_ns(&self) -> u64 {
        self.ktime_ns
    }
}

/// Configuration, filter, override store and transport.
#[derive(Debug)]
pub struct MemoryMaps {
    pub config: Option<EventConfig>,
    pub filter: Option<Box<FilterMapValue>>,
    pub overrides: HashOverrideStore,
    emitted: Mutex<Vec<MsgGenericLsm>>,
}

impl MemoryMaps {
    pub fn new(config: EventConfig, filter: FilterMapValue) -> Self {
        Self {
            config: Some(config),
            filter: Some(Box::new(filter)),
            overrides: HashOverrideStore::default(),
            emitted: Mutex::new(Vec::new()),
        }
    }

    pub fn emitted(&self) -> Vec<MsgGenericLsm> {
        lock(&self.emitted).clone()
    }

    pub fn take_emitted(&self) -> Vec<MsgGenericLsm> {
        std::mem::take(&mut *lock(&self.emitted))
    }
}

impl<C: HookContext> PipelineMaps<C> for MemoryMaps {
    type Overrides = HashOverrideStore;

    fn config(&self) -> Option<&EventConfig> {
        self.config.as_ref()
    }

    fn filter(&self) -> Option<&FilterMapValue> {
        self.filter.as_deref()
    }

    fn overrides(&self) -> &HashOverrideStore {
        &self.overrides
    }

    fn output(&self, _ctx: &C, msg: &MsgGenericLsm) {
        lock(&self.emitted).push(*msg);
    }
}

/// One scratch record per CPU. A slot is held for the whole invocation, so
/// a second invocation on the same CPU while it is held is refused instead
/// of sharing the record.
#[derive(Debug)]
pub struct PerCpuScratch {
    slots: Vec<Mutex<MsgGenericLsm>>,
}

impl PerCpuScratch {
    pub fn new(cpus: usize) -> Self {
        Self {
            slots: (0..cpus).map(|_| Mutex::new(MsgGenericLsm::default())).collect(),
        }
    }

    pub fn cpus(&self) -> usize {
        self.slots.len()
    }

    /// Run `f` with exclusive access to `cpu`'s record.
    pub fn with_slot<R>(
        &self,
        cpu: u32,
        f: impl FnOnce(&mut MsgGenericLsm) -> R,
    ) -> Result<R, Withheld> {
        let slot = self.slots.get(cpu as usize).ok_or(Withheld::NoScratch)?;
        let mut guard = match slot.try_lock() {
            Ok(g) => g,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(Withheld::ScratchBusy),
        };
        Ok(f(&mut guard))
    }

    /// Copy of `cpu`'s record as the last invocation left it.
    pub fn snapshot(&self, cpu: u32) -> Option<MsgGenericLsm> {
        self.with_slot(cpu, |msg| *msg).ok()
    }
}

/// Stage table, stores and scratch for userspace execution.
pub struct Pipeline {
    pub table: StageTable<RecordedCall, MemoryMaps>,
    pub maps: MemoryMaps,
    pub scratch: PerCpuScratch,
}

impl Pipeline {
    pub fn new(config: EventConfig, filter: FilterMapValue, cpus: usize) -> Self {
        Self {
            table: StageTable::generic_lsm(),
            maps: MemoryMaps::new(config, filter),
            scratch: PerCpuScratch::new(cpus),
        }
    }

    /// Entry trampoline: run `call` on its CPU's scratch record.
    pub fn invoke(&self, call: &RecordedCall) -> Invocation {
        let ran = self
            .scratch
            .with_slot(call.cpu, |msg| dispatch::run(&self.table, call, msg, &self.maps));

        ran.unwrap_or_else(|reason| Invocation {
            verdict: fail_verdict::<RecordedCall, _>(&self.maps),
            hops: 0,
            stages: StageSet::default(),
            termination: Termination::Withheld {
                target: None,
                reason,
            },
        })
    }
}

/// Arguments a call carries beyond the record's slots are ignored.
pub fn args_fit(call: &RecordedCall) -> bool {
    call.args.len() <= MAX_ARGS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArgType, FailPolicy, ACTION_NOPOST, ACTION_OVERRIDE};
    use crate::filter::{encode, MatchOp, Matcher};
    use crate::overrides::try_override;
    use crate::pipeline::{StageExit, VERDICT_FILTER_REJECT};
    use crate::stage::{Stage, MAX_TAIL_CALL_CNT};

    const TID: u64 = (1000 << 32) | 1001;

    fn config() -> EventConfig {
        let mut config = EventConfig::new(3);
        config.set_arg_type(0, ArgType::Int);
        config.set_arg_type(1, ArgType::Ulong);
        config
    }

    #[test]
    fn test_override_absent_is_zero() {
        let store = HashOverrideStore::default();
        for id in [0, 1, TID, u64::MAX] {
            assert_eq!(try_override(&store, id), 0);
        }
    }

    #[test]
    fn test_override_consumed_once() {
        let store = HashOverrideStore::default();
        assert!(store.set(TID, -13));
        assert!(store.set(TID + 1, -1));

        assert_eq!(try_override(&store, TID), -13);
        assert_eq!(try_override(&store, TID), 0);
        // Other threads keep their entries
        assert_eq!(try_override(&store, TID + 1), -1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_override_store_capacity() {
        let store = HashOverrideStore::with_capacity(1);
        assert!(store.set(1, -1));
        assert!(!store.set(2, -1));
        assert!(store.set(1, -2));
        assert_eq!(store.get(1), Some(-2));
    }

    #[test]
    fn test_filter_arg_loop_fetches_each_arg_once() {
        let config = config();
        let filter = encode(
            &[
                Matcher { arg: 0, op: MatchOp::Equal, value: -1 },
                Matcher { arg: 1, op: MatchOp::Greater, value: 100 },
            ],
            &config,
        )
        .unwrap();
        let pipeline = Pipeline::new(config, filter, 1);

        let inv = pipeline.invoke(&RecordedCall::new(TID, 0, &[0xffff_ffff, 200]));

        assert_eq!(inv.verdict, 0);
        assert_eq!(inv.termination, Termination::Returned);
        // entry->filter, 2x (filter->arg->filter), setup, event, actions, output
        assert_eq!(inv.hops, 9);
        assert!(inv.ran(Stage::FilterArg));
        assert!(inv.ran(Stage::Output));
        assert_eq!(pipeline.maps.emitted().len(), 1);
        assert_eq!(pipeline.maps.emitted()[0].args[0], -1);
    }

    #[test]
    fn test_reject_stops_before_actions() {
        let config = config();
        let filter = encode(&[Matcher { arg: 1, op: MatchOp::Less, value: 5 }], &config).unwrap();
        let pipeline = Pipeline::new(config, filter, 1);

        let inv = pipeline.invoke(&RecordedCall::new(TID, 0, &[1, 9]));

        assert_eq!(inv.verdict, VERDICT_FILTER_REJECT);
        assert!(inv.ran(Stage::FilterArg));
        assert!(!inv.ran(Stage::Setup));
        assert!(!inv.ran(Stage::Actions));
        assert!(!inv.ran(Stage::Output));
        assert!(pipeline.maps.emitted().is_empty());
    }

    #[test]
    fn test_empty_slot_uses_fail_policy() {
        let mut config = config();
        config.fail_policy = FailPolicy::Deny as u8;
        config.fail_error = -13;
        let mut pipeline = Pipeline::new(config, FilterMapValue::default(), 1);
        pipeline.table.remove(Stage::Setup);
        assert!(pipeline.table.validate().is_err());

        let inv = pipeline.invoke(&RecordedCall::new(TID, 0, &[]));

        assert_eq!(inv.verdict, -13);
        assert_eq!(
            inv.termination,
            Termination::Withheld {
                target: Some(Stage::Setup),
                reason: Withheld::EmptySlot,
            }
        );
        assert!(pipeline.maps.emitted().is_empty());
    }

    #[test]
    fn test_missing_output_still_applies_override() {
        let mut config = config();
        config.action_flags = ACTION_OVERRIDE;
        config.override_error = -1;
        let mut pipeline = Pipeline::new(config, FilterMapValue::default(), 1);
        pipeline.table.remove(Stage::Output);

        let inv = pipeline.invoke(&RecordedCall::new(TID, 0, &[]));

        assert_eq!(inv.verdict, -1);
        assert!(pipeline.maps.overrides.is_empty());
        assert!(pipeline.maps.emitted().is_empty());
    }

    fn spin(_ctx: &RecordedCall, _msg: &mut MsgGenericLsm, _maps: &MemoryMaps) -> StageExit {
        StageExit::TailCall {
            target: Stage::FilterArg,
            fallthrough: crate::pipeline::Fallthrough::Verdict(-7),
        }
    }

    #[test]
    fn test_hop_limit_enforced() {
        let mut pipeline = Pipeline::new(config(), FilterMapValue::default(), 1);
        pipeline.table.install(Stage::ProcessFilter, spin);
        pipeline.table.install(Stage::FilterArg, spin);

        let inv = pipeline.invoke(&RecordedCall::new(TID, 0, &[]));

        assert_eq!(inv.hops, MAX_TAIL_CALL_CNT);
        assert_eq!(inv.verdict, -7);
        assert!(matches!(
            inv.termination,
            Termination::Withheld { reason: Withheld::HopLimit, .. }
        ));
    }

    #[test]
    fn test_busy_scratch_slot_refused() {
        let mut config = config();
        config.fail_policy = FailPolicy::Deny as u8;
        let pipeline = Pipeline::new(config, FilterMapValue::default(), 1);

        let nested = pipeline
            .scratch
            .with_slot(0, |_| pipeline.invoke(&RecordedCall::new(TID, 0, &[])))
            .unwrap();

        assert_eq!(nested.verdict, -crate::config::EPERM);
        assert!(matches!(
            nested.termination,
            Termination::Withheld { reason: Withheld::ScratchBusy, .. }
        ));
        assert!(pipeline.maps.emitted().is_empty());
    }

    #[test]
    fn test_unknown_cpu_refused() {
        let pipeline = Pipeline::new(config(), FilterMapValue::default(), 2);
        let inv = pipeline.invoke(&RecordedCall::new(TID, 5, &[]));
        assert_eq!(inv.verdict, 0);
        assert_eq!(inv.hops, 0);
        assert_eq!(
            inv.termination,
            Termination::Withheld {
                target: None,
                reason: Withheld::NoScratch,
            }
        );
        assert!(pipeline.scratch.snapshot(5).is_none());
    }

    #[test]
    fn test_nopost_override_skips_output() {
        let mut config = config();
        config.action_flags = ACTION_NOPOST | ACTION_OVERRIDE;
        config.override_error = -13;
        let pipeline = Pipeline::new(config, FilterMapValue::default(), 1);

        let inv = pipeline.invoke(&RecordedCall::new(TID, 0, &[]));

        assert_eq!(inv.verdict, -13);
        assert!(inv.ran(Stage::Actions));
        assert!(!inv.ran(Stage::Output));
        assert!(pipeline.maps.overrides.is_empty());
    }

    #[test]
    fn test_args_fit() {
        assert!(args_fit(&RecordedCall::new(1, 0, &[1, 2, 3, 4, 5])));
        assert!(!args_fit(&RecordedCall::new(1, 0, &[0; 6])));
    }
}
