//! Generic LSM Agent Library
//!
//! This library provides the core functionality for the agent: loading and
//! attaching the generic LSM pipeline, collecting the records it emits, and
//! replaying recorded invocations offline.

pub mod collector;
pub mod config;
pub mod ebpf;
pub mod output;
pub mod replay;

pub use config::Config;

use anyhow::{Context, Result};
use lsmgate_shared::record::MsgGenericLsm;
use lsmgate_shared::types::summary::LsmSummary;
use tracing::{debug, info, warn};

/// Attach the pipeline described by `config`, collect until the configured
/// duration elapses or Ctrl-C, then detach and write output.
pub async fn run_pipeline(config: Config) -> Result<LsmSummary> {
    use aya::maps::perf::AsyncPerfEventArray;
    use aya::util::online_cpus;
    use bytes::BytesMut;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    use collector::lsm::LsmCollector;
    use ebpf::generic_lsm::GenericLsm;

    config.validate().context("Invalid configuration")?;
    let duration = config.duration()?;

    info!(
        "Gating bpf_lsm_{} for {} seconds ({} selectors)",
        config.hook,
        duration.as_secs(),
        config.selectors.len()
    );

    // 1. Load, populate and attach
    let mut pipeline = GenericLsm::new(&config).context("Failed to create generic LSM pipeline")?;
    pipeline.start().context("Failed to start pipeline")?;

    // 2. Set up event collector
    let collector = Arc::new(Mutex::new(LsmCollector::new()));

    // 3. Spawn per-CPU reader tasks
    let bpf = pipeline.bpf_mut();
    let events_map = bpf
        .take_map(ebpf::loader::LSM_EVENTS)
        .context("Failed to get LSM_EVENTS map")?;
    let mut perf_array = AsyncPerfEventArray::try_from(events_map)?;

    let cpus = online_cpus().map_err(|(msg, e)| anyhow::anyhow!("{}: {}", msg, e))?;
    let mut handles = Vec::new();

    for cpu_id in cpus {
        let mut buf = perf_array.open(cpu_id, None)?;
        let collector = collector.clone();

        handles.push(tokio::spawn(async move {
            let mut buffers = (0..10)
                .map(|_| BytesMut::with_capacity(core::mem::size_of::<MsgGenericLsm>() + 64))
                .collect::<Vec<_>>();

            loop {
                match buf.read_events(&mut buffers).await {
                    Ok(events) => {
                        if events.lost > 0 {
                            warn!("Lost {} records on CPU {}", events.lost, cpu_id);
                        }
                        for buf_ref in buffers.iter().take(events.read) {
                            if buf_ref.len() >= core::mem::size_of::<MsgGenericLsm>() {
                                // Perf samples are only 8-byte aligned by chance.
                                let msg = unsafe {
                                    buf_ref.as_ptr().cast::<MsgGenericLsm>().read_unaligned()
                                };
                                let mut coll = collector.lock().await;
                                if let Err(e) = coll.process_event(&msg) {
                                    debug!("Error processing LSM record: {}", e);
                                }
                            }
                        }
                    }
                    Err(_) => break,
                }
            }
        }));
    }

    // 4. Wait for the duration or an interrupt
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Interrupted, detaching");
        }
    }

    // 5. Cleanup: detach first so no new records arrive, then stop readers
    pipeline.stop();
    for handle in &handles {
        handle.abort();
    }
    for handle in handles {
        let _ = handle.await;
    }

    let collector = Arc::try_unwrap(collector)
        .map_err(|_| anyhow::anyhow!("Failed to unwrap Arc"))?
        .into_inner();

    let summary = collector.build_summary();

    if let Some(json_path) = &config.json_output {
        output::json::generate_json(&summary, collector.events(), json_path)?;
    }

    Ok(summary)
}
