//! eBPF program loader
//!
//! Loads the generic LSM object, fills its maps and binds the stage
//! programs into the `LSM_CALLS` table.

use std::iter;
use std::path::Path;

use anyhow::{Context, Result};
use aya::{
    maps::{Array, MapData, ProgramArray},
    programs::{lsm::LsmLinkId, Lsm},
    Btf, Ebpf, EbpfLoader,
};
use lsmgate_shared::filter::FilterMapValue;
use lsmgate_shared::stage::{layout_from_bindings, Stage, ENTRY_PROGRAM};
use lsmgate_shared::EventConfig;
use tracing::{debug, info};

/// Build output of `agent-ebpf`
pub const DEFAULT_OBJECT: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../agent-ebpf/target/bpfel-unknown-none/release/generic-lsm"
);

pub const CONFIG_MAP: &str = "CONFIG_MAP";
pub const FILTER_MAP: &str = "FILTER_MAP";
pub const LSM_CALLS: &str = "LSM_CALLS";
pub const LSM_EVENTS: &str = "LSM_EVENTS";

/// Load the generic LSM object. Programs are not loaded into the kernel yet.
pub fn load_generic_lsm(object: Option<&Path>) -> Result<Ebpf> {
    info!("Loading generic LSM eBPF object");

    #[cfg(feature = "embed-bpf")]
    {
        let _ = object;
        let bpf_data = include_bytes!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../agent-ebpf/target/bpfel-unknown-none/release/generic-lsm"
        ));
        EbpfLoader::new()
            .load(bpf_data)
            .context("Failed to load embedded eBPF object")
    }

    #[cfg(not(feature = "embed-bpf"))]
    {
        let path = object.map_or_else(|| std::path::PathBuf::from(DEFAULT_OBJECT), Path::to_path_buf);
        if !path.exists() {
            anyhow::bail!("eBPF object not found: {}", path.display());
        }

        info!("Loading eBPF from file: {}", path.display());
        EbpfLoader::new()
            .load_file(&path)
            .with_context(|| format!("Failed to load eBPF object {}", path.display()))
    }
}

/// Names of every program in the object, entry first.
pub fn program_names() -> impl Iterator<Item = &'static str> {
    iter::once(ENTRY_PROGRAM).chain(Stage::ALL.into_iter().map(Stage::program_name))
}

/// Load the entry and every stage program against `hook`.
pub fn load_programs(bpf: &mut Ebpf, hook: &str, btf: &Btf) -> Result<()> {
    for name in program_names() {
        let program: &mut Lsm = bpf
            .program_mut(name)
            .with_context(|| format!("Failed to find {} program", name))?
            .try_into()
            .with_context(|| format!("{} is not an LSM program", name))?;

        program
            .load(hook, btf)
            .with_context(|| format!("Failed to load {} for hook {}", name, hook))?;
        debug!("Loaded {} against bpf_lsm_{}", name, hook);
    }

    Ok(())
}

/// Validate the slot bindings, then write each stage program's fd into
/// `LSM_CALLS`.
///
/// The returned map owns the table: the kernel clears the entries once the
/// last userspace reference is dropped, so keep it alive while attached.
pub fn populate_stage_table(
    bpf: &mut Ebpf,
    bindings: &[(u32, &str)],
) -> Result<ProgramArray<MapData>> {
    layout_from_bindings(bindings).context("Invalid stage table layout")?;

    let map = bpf
        .take_map(LSM_CALLS)
        .with_context(|| format!("Failed to get {} map", LSM_CALLS))?;
    let mut calls = ProgramArray::try_from(map)?;

    for &(slot, name) in bindings {
        let program = bpf
            .program(name)
            .with_context(|| format!("Failed to find {} program", name))?;
        let fd = program
            .fd()
            .with_context(|| format!("{} is not loaded", name))?;
        calls
            .set(slot, fd, 0)
            .with_context(|| format!("Failed to bind {} to slot {}", name, slot))?;
        debug!("Bound {} to slot {}", name, slot);
    }

    info!("Stage table populated with {} programs", bindings.len());
    Ok(calls)
}

/// Write the configuration record.
pub fn write_config(bpf: &mut Ebpf, config: &EventConfig) -> Result<()> {
    let mut map: Array<_, EventConfig> = Array::try_from(
        bpf.map_mut(CONFIG_MAP)
            .with_context(|| format!("Failed to get {} map", CONFIG_MAP))?,
    )?;
    map.set(0, *config, 0).context("Failed to write event config")?;
    Ok(())
}

/// Write the filter program.
pub fn write_filter(bpf: &mut Ebpf, filter: &FilterMapValue) -> Result<()> {
    let mut map: Array<_, FilterMapValue> = Array::try_from(
        bpf.map_mut(FILTER_MAP)
            .with_context(|| format!("Failed to get {} map", FILTER_MAP))?,
    )?;
    map.set(0, filter, 0).context("Failed to write filter")?;
    Ok(())
}

/// Attach the entry program to its hook.
pub fn attach_entry(bpf: &mut Ebpf) -> Result<LsmLinkId> {
    let program: &mut Lsm = bpf
        .program_mut(ENTRY_PROGRAM)
        .with_context(|| format!("Failed to find {} program", ENTRY_PROGRAM))?
        .try_into()
        .context("Entry program is not an LSM program")?;

    program.attach().context("Failed to attach LSM program")
}

/// Detach the entry program.
pub fn detach_entry(bpf: &mut Ebpf, link: LsmLinkId) -> Result<()> {
    let program: &mut Lsm = bpf
        .program_mut(ENTRY_PROGRAM)
        .with_context(|| format!("Failed to find {} program", ENTRY_PROGRAM))?
        .try_into()
        .context("Entry program is not an LSM program")?;

    program.detach(link).context("Failed to detach LSM program")
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsmgate_shared::stage::STAGE_TABLE_SLOTS;

    #[test]
    fn test_program_names() {
        let names: Vec<_> = program_names().collect();
        assert_eq!(names.len(), Stage::ALL.len() + 1);
        assert_eq!(names[0], ENTRY_PROGRAM);
        assert!(names.contains(&"generic_lsm_output"));
        assert!(Stage::ALL.iter().all(|s| s.index() < STAGE_TABLE_SLOTS));
    }

    #[test]
    #[cfg(not(feature = "embed-bpf"))]
    fn test_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_generic_lsm(Some(&dir.path().join("nope"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
