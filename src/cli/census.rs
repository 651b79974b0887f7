//! Census commands: run, catalog.

use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::dispatch::{self, Dispatcher};
use crate::external::GhCatalog;
use crate::queue::LocalPool;

use super::format::format_summary;
use super::{build_pipeline, open_storage};

pub(super) fn cmd_run(config: &Config) -> Result<(), String> {
    config.prepare_dirs().map_err(|e| e.to_string())?;
    let storage = open_storage(config)?;

    let run_id = Uuid::new_v4();
    let _span = info_span!("run", id = %run_id).entered();

    let swept = storage
        .sweep_temp()
        .map_err(|e| format!("failed to clean data directory: {e}"))?;
    if swept > 0 {
        info!(count = swept, "removed temp files from an interrupted run");
    }

    let work_dir = config.work_dir();
    let pool = LocalPool::start(config.dispatch.workers, |id| {
        let pipeline = build_pipeline(config, &work_dir.join(format!("worker-{id}")));
        move |payload: &[u8]| match pipeline.run_task(payload) {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(worker = id, error = %e, "rejected task payload");
                None
            }
        }
    })
    .map_err(|e| format!("failed to start workers: {e}"))?;

    let source = GhCatalog::new(&config.filters, &config.catalog);
    let mut dispatcher = Dispatcher::new(&pool, &storage, &config.dispatch);
    let summary = dispatcher
        .run(&source)
        .map_err(|e| format!("run {run_id} aborted while {}: {e}", dispatcher.phase()))?;

    // Abandoned tasks may never return; don't wait on them.
    if summary.requeued == 0 {
        pool.shutdown();
    }

    println!("{}", format_summary(&summary));
    Ok(())
}

pub(super) fn cmd_catalog(config: &Config, refresh: bool) -> Result<(), String> {
    let storage = open_storage(config)?;
    let source = GhCatalog::new(&config.filters, &config.catalog);

    let catalog = dispatch::load_catalog(&storage, &source, refresh)
        .map_err(|e| format!("failed to load catalog: {e}"))?;

    println!(
        "{} repositories in {}",
        catalog.len(),
        storage.catalog_path().display()
    );
    Ok(())
}
