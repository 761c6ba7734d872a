//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `kmsync_core` linkage and run one review autosave end to end on
//!   in-memory stores.
//! - Keep output deterministic apart from minted ids, for quick local checks.
//!
//! Usage: `kmsync_cli [config.json]`

use kmsync_core::{
    core_version, init_logging_from_config, now_epoch_ms, ping, BroadcastMessage, CommitReport,
    ContentPayload, EntityKind, EntityRecord, SyncConfig, SyncSession,
};
use serde_json::json;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("kmsync_cli error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    println!("kmsync_core ping={}", ping());
    println!("kmsync_core version={}", core_version());

    let config = load_config()?;
    init_logging_from_config(&config)?;
    let mut session = SyncSession::open_in_memory(&config).map_err(|err| err.to_string())?;

    let deliveries = Arc::new(Mutex::new(Vec::new()));
    let _list_view = {
        let deliveries = Arc::clone(&deliveries);
        session
            .bus()
            .subscribe(EntityKind::Review, move |message: &BroadcastMessage| {
                deliveries
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(format!("{}:{}", message.action().as_str(), message.id()));
            })
    };

    let review =
        EntityRecord::with_id(EntityKind::Review, "review-1").with_field("title", "Reading notes");
    let key = review.key();
    let phase = session
        .open_editor(review)
        .ok_or_else(|| format!("editor for {key} did not open"))?;
    println!("editor {key} phase={phase:?}");

    let started_at = now_epoch_ms();
    session.edit_payload(
        &key,
        ContentPayload::new(json!({"synthesis": "First pass over the sources."})),
        started_at,
    );
    println!("editor {key} phase={:?}", session.editor_phase(&key));

    let debounce_ms = i64::try_from(config.autosave_debounce_ms).unwrap_or(i64::MAX);
    for report in session.run_due(started_at.saturating_add(debounce_ms)) {
        match report {
            CommitReport::Committed(record) => println!(
                "committed {} content_ref={}",
                record.key(),
                record.content_ref.as_deref().unwrap_or("-")
            ),
            other => println!("commit report={other:?}"),
        }
    }
    println!("editor {key} phase={:?}", session.editor_phase(&key));

    for delivery in deliveries
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
    {
        println!("list view received {delivery}");
    }

    let stats = session.autosave_stats();
    println!(
        "autosave commits={} suppressed={} failures={} superseded={}",
        stats.commits, stats.suppressed, stats.failures, stats.superseded
    );
    session.end();
    Ok(())
}

fn load_config() -> Result<SyncConfig, String> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(SyncConfig::default());
    };
    let raw = std::fs::read_to_string(&path)
        .map_err(|err| format!("failed to read config `{path}`: {err}"))?;
    SyncConfig::from_json_str(&raw).map_err(|err| err.to_string())
}
