use std::sync::Arc;

use anyhow::{bail, Result};
use lore_core::{BatchPhase, BatchSnapshot, CommitState, TargetDescriptor};
use lore_engine::{BatchRunner, EngineConfig, JsonFileStore, Operation};
use lore_logging::lore_info;

use crate::cli::ClearArgs;

fn print_progress(snapshot: &BatchSnapshot) {
    match &snapshot.current_target {
        Some(name) => println!("[{}/{}] {}", snapshot.processed, snapshot.total, name),
        None => println!("[{}/{}] {}", snapshot.processed, snapshot.total, snapshot.phase),
    }
}

/// Clears one field on every listed record and waits for the write to land.
pub async fn run(args: &ClearArgs, config: &EngineConfig) -> Result<BatchSnapshot> {
    let store = Arc::new(JsonFileStore::new(&config.store_path));
    let runner = BatchRunner::new(
        Operation::Clear {
            field: args.field.clone(),
        },
        store,
        config.queue.clone(),
    );

    let targets = args
        .ids
        .iter()
        .map(|id| TargetDescriptor::new(id.clone(), id.clone()))
        .collect();
    let summary = runner.prepare(targets)?;
    println!(
        "Clearing '{}' on {} records in {}",
        args.field,
        summary.target_count,
        config.store_path.display()
    );

    let mut updates = runner.subscribe();
    runner.confirm()?;
    let snapshot = loop {
        let snapshot = updates.borrow_and_update().clone();
        print_progress(&snapshot);
        if snapshot.is_settled() {
            break snapshot;
        }
        if updates.changed().await.is_err() {
            break runner.snapshot();
        }
    };

    for failure in &snapshot.failures {
        println!("  failed {}: {}", failure.name, failure.error);
    }
    println!(
        "{}: {} of {} cleared, {} failed",
        snapshot.phase,
        snapshot.succeeded,
        snapshot.total,
        snapshot.failures.len()
    );
    if let Some(error) = &snapshot.error {
        println!("  error: {}", error);
    }
    lore_info!("clear '{}' finished: {:?}", args.field, snapshot.commit);

    if snapshot.phase == BatchPhase::Failed {
        bail!(
            "clear '{}' failed: {}",
            args.field,
            snapshot.error.as_deref().unwrap_or("unknown error")
        );
    }
    if let Some(error) = &snapshot.commit_error {
        bail!("could not write {}: {}", config.store_path.display(), error);
    }
    if snapshot.succeeded > 0 && snapshot.commit != CommitState::Committed {
        bail!("results were not committed ({:?})", snapshot.commit);
    }
    Ok(snapshot)
}
