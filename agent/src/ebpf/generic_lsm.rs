//! Generic LSM pipeline management
//!
//! Handles the lifecycle of the generic LSM programs: load, fill maps,
//! populate the stage table, attach and detach.

use anyhow::{Context, Result};
use aya::maps::{MapData, ProgramArray};
use aya::programs::lsm::LsmLinkId;
use aya::Ebpf;
use aya_log::EbpfLogger;
use lsmgate_shared::stage::generic_lsm_bindings;
use tracing::{info, warn};

use super::{btf, loader};
use crate::config::Config;

/// Generic LSM pipeline manager
pub struct GenericLsm {
    bpf: Ebpf,
    hook: String,
    /// Held for as long as the programs are attached.
    _calls: ProgramArray<MapData>,
    link: Option<LsmLinkId>,
}

impl GenericLsm {
    /// Load every program, write the maps and populate the stage table.
    /// Nothing is attached until `start`.
    pub fn new(config: &Config) -> Result<Self> {
        info!("Initializing generic LSM pipeline for hook {}", config.hook);

        let btf = btf::load_btf(config.btf.as_deref())?;
        let mut bpf = loader::load_generic_lsm(config.object.as_deref())
            .context("Failed to load generic LSM eBPF")?;

        if let Err(e) = EbpfLogger::init(&mut bpf) {
            warn!("Failed to initialize eBPF logger: {}", e);
        }

        loader::write_config(&mut bpf, &config.event_config())?;
        loader::write_filter(&mut bpf, &config.filter()?)?;
        loader::load_programs(&mut bpf, &config.hook, &btf)?;
        let calls = loader::populate_stage_table(&mut bpf, &generic_lsm_bindings())?;

        Ok(Self {
            bpf,
            hook: config.hook.clone(),
            _calls: calls,
            link: None,
        })
    }

    /// Attach the entry program
    pub fn start(&mut self) -> Result<()> {
        info!("Attaching to bpf_lsm_{}", self.hook);

        if self.link.is_some() {
            warn!("Generic LSM pipeline already started");
            return Ok(());
        }

        let link = loader::attach_entry(&mut self.bpf)
            .with_context(|| format!("Failed to attach to {}", self.hook))?;
        self.link = Some(link);
        info!("Generic LSM pipeline attached");

        Ok(())
    }

    /// Detach the entry program
    pub fn stop(&mut self) {
        match self.link.take() {
            Some(link) => match loader::detach_entry(&mut self.bpf, link) {
                Ok(()) => info!("Detached from bpf_lsm_{}", self.hook),
                Err(e) => warn!("Failed to detach: {:#}", e),
            },
            None => warn!("Generic LSM pipeline was not running"),
        }
    }

    /// Get mutable reference to the BPF object for map access
    pub fn bpf_mut(&mut self) -> &mut Ebpf {
        &mut self.bpf
    }
}

impl Drop for GenericLsm {
    fn drop(&mut self) {
        if self.link.is_some() {
            self.stop();
        }
    }
}
