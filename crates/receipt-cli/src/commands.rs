//! Subcommand implementations.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use receipt_ai::{
    ExtractionClient, ExtractionQueue, GeminiClient, QueueError, ResizingNormalizer,
};
use receipt_core::{CanonicalField, Settings, Status};
use receipt_store::{RenameOutcome, UpdateOutcome, WorkspaceStore};
use serde_json::Value;
use tracing::warn;

use crate::display;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

fn open_store(settings: &Settings, folder: &Path) -> anyhow::Result<WorkspaceStore> {
    let mut store = WorkspaceStore::new(settings.backup.clone());
    store
        .open(folder)
        .with_context(|| format!("failed to open workspace {}", folder.display()))?;
    Ok(store)
}

pub fn open(settings: &Settings, folder: &Path) -> anyhow::Result<()> {
    let store = open_store(settings, folder)?;
    display::print_records(store.records());
    Ok(())
}

pub async fn process(settings: &Settings, folder: &Path, files: Vec<String>) -> anyhow::Result<()> {
    let store = open_store(settings, folder)?;
    let targets: Vec<String> = if files.is_empty() {
        store
            .records()
            .filter(|(_, r)| matches!(r.status(), Status::Pending | Status::Error))
            .map(|(key, _)| key.to_string())
            .collect()
    } else {
        files
    };
    if targets.is_empty() {
        println!("Nothing to process.");
        return Ok(());
    }

    let client = GeminiClient::from_settings(&settings.api)?
        .map(|c| Arc::new(c) as Arc<dyn ExtractionClient>);
    let normalizer = ResizingNormalizer::new(settings.processing.image.resize.clone());
    let queue = ExtractionQueue::new(client, Arc::new(normalizer));
    queue.enqueue(targets);

    let store = tokio::sync::Mutex::new(store);
    let batch = queue.run_batch(&store);
    tokio::pin!(batch);

    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    let result = loop {
        tokio::select! {
            result = &mut batch => break result,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nCancelling after the current image...");
                queue.cancel();
            }
            _ = ticker.tick() => {
                let (current, total) = queue.progress();
                if total > 0 {
                    eprint!("\r[{current}/{total}]");
                    let _ = std::io::stderr().flush();
                }
            }
        }
    };
    eprintln!();

    match result {
        Ok(summary) => {
            println!(
                "Processed {} image(s): {} succeeded, {} failed{}",
                summary.attempted,
                summary.succeeded,
                summary.failed,
                if summary.cancelled { " (cancelled)" } else { "" }
            );
            display::print_records(store.lock().await.records());
            Ok(())
        }
        Err(QueueError::ClientNotInitialized) => {
            bail!("no API key configured; set GOOGLE_API_KEY or api.key in the settings file")
        }
        Err(e) => Err(e).context("extraction batch failed"),
    }
}

pub fn rename(settings: &Settings, folder: &Path, files: Vec<String>) -> anyhow::Result<()> {
    let mut store = open_store(settings, folder)?;
    let targets: Vec<String> = if files.is_empty() {
        store.records().map(|(key, _)| key.to_string()).collect()
    } else {
        files
    };

    let (mut renamed, mut skipped, mut failed) = (0, 0, 0);
    for target in targets {
        let Some(record) = store.record(&target).cloned() else {
            eprintln!("{target}: not in workspace");
            failed += 1;
            continue;
        };
        match store.rename(&record) {
            Ok(RenameOutcome::Renamed {
                old_key,
                new_key,
                save,
                ..
            }) => {
                println!("{old_key} -> {new_key}");
                if !save.is_durable() {
                    warn!(key = %new_key, "workspace not saved after rename");
                }
                renamed += 1;
            }
            Ok(RenameOutcome::Skipped(reason)) => {
                println!("{target}: skipped ({reason:?})");
                skipped += 1;
            }
            Err(e) => {
                eprintln!("{target}: {e}");
                failed += 1;
            }
        }
    }

    println!("{renamed} renamed, {skipped} skipped, {failed} failed");
    if failed > 0 {
        bail!("{failed} rename(s) failed");
    }
    Ok(())
}

pub fn edit(
    settings: &Settings,
    folder: &Path,
    file: &str,
    field: CanonicalField,
    value: &str,
    reason: &str,
) -> anyhow::Result<()> {
    let mut store = open_store(settings, folder)?;
    let key = store
        .key_of(file)
        .with_context(|| format!("{file} is not in the workspace"))?;
    let mut data = store
        .record(&key)
        .map(|r| r.extracted_data.clone())
        .unwrap_or_default();

    let old_value = data.get(field);
    let input = if value.trim().is_empty() {
        Value::Null
    } else {
        Value::String(value.to_string())
    };
    data.set(field, &input)?;
    let new_value = data.get(field);
    if old_value == new_value {
        println!("{key}: {field} unchanged");
        return Ok(());
    }

    report(store.update_extracted_data(&key, data));
    report(store.add_edit_history(&key, field.name(), old_value.clone(), new_value.clone(), reason));
    println!("{key}: {field}: {old_value} -> {new_value}");
    if let Some(record) = store.record(&key) {
        display::print_validation(&record.validation);
    }
    Ok(())
}

pub fn export(
    settings: &Settings,
    folder: &Path,
    csv: Option<&Path>,
    json: Option<&Path>,
) -> anyhow::Result<()> {
    let store = open_store(settings, folder)?;
    if let Some(path) = csv {
        let rows = store
            .export_csv(path)
            .with_context(|| format!("CSV export to {} failed", path.display()))?;
        println!("Wrote {rows} row(s) to {}", path.display());
    }
    if let Some(path) = json {
        store
            .export_json(path)
            .with_context(|| format!("JSON export to {} failed", path.display()))?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn report(outcome: UpdateOutcome) {
    match outcome {
        UpdateOutcome::Applied(save) if !save.is_durable() => {
            warn!(?save, "change kept in memory only");
        }
        UpdateOutcome::Applied(_) => {}
        UpdateOutcome::Skipped(reason) => warn!(?reason, "update skipped"),
    }
}
