//! Override store contract
//!
//! The override store maps a thread identity (`pid_tgid`) to the verdict
//! the hook must return. Only the pipeline touches it: the ACTIONS stage
//! writes an entry, and the override check reads and deletes it. Each
//! invocation only ever touches its own key, so implementations need no
//! cross-entry coordination.

/// Capacity of the kernel override map.
pub const OVERRIDE_MAP_ENTRIES: u32 = 32768;

pub trait OverrideStore {
    fn get(&self, id: u64) -> Option<i32>;

    /// Record a forced verdict. Returns `false` if the store is full.
    fn set(&self, id: u64, error: i32) -> bool;

    fn delete(&self, id: u64);
}

/// Consume the override for `id`: its value on the first call, 0 after
/// that or when no entry exists.
#[inline(always)]
pub fn try_override<S: OverrideStore + ?Sized>(store: &S, id: u64) -> i32 {
    match store.get(id) {
        Some(error) => {
            store.delete(id);
            error
        }
        None => 0,
    }
}
