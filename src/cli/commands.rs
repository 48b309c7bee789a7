//! CLI command implementations

use anyhow::{Context, Result};
use dialoguer::Confirm;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, StoreKind};
use crate::guard::{
    Address, CheckContext, DelayGuard, DirectoryStore, EventSink, FanoutSink, Fingerprint,
    GuardMonitor, GuardStore, JsonlSink, SafeTransaction, SystemClock, TracingSink,
};

/// How a command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Finished; for `check`, the transaction is permitted
    Done,
    /// Expected guard hold; run the same command again later
    Retry,
}

/// Build the guard described by the configuration
pub fn build_guard(config: &Config) -> Result<DelayGuard> {
    let store: Arc<dyn GuardStore> = match config.store.kind {
        StoreKind::Directory => Arc::new(
            DirectoryStore::open(&config.store.path)
                .with_context(|| format!("Failed to open guard store {}", config.store.path))?,
        ),
        // Each invocation is a fresh process, so nothing queued would survive
        StoreKind::Memory => anyhow::bail!(
            "store.kind = \"memory\" keeps no state between commands; use \"directory\""
        ),
    };

    let mut sink = FanoutSink::new();
    if !config.events.path.trim().is_empty() {
        let forensic = JsonlSink::open(&config.events.path)
            .with_context(|| format!("Failed to open event log {}", config.events.path))?;
        sink = sink.with(Arc::new(forensic));
    }
    if config.events.tracing {
        sink = sink.with(Arc::new(TracingSink));
    }
    let sink: Arc<dyn EventSink> = Arc::new(sink);

    let guard = DelayGuard::new(config.guard_config()?, store, sink, Arc::new(SystemClock))?;
    Ok(guard)
}

/// Read a transaction description from a JSON file
pub fn load_transaction(path: &Path) -> Result<SafeTransaction> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read transaction file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse transaction file {}", path.display()))
}

fn parse_caller(caller: &str) -> Result<Address> {
    caller
        .parse()
        .with_context(|| format!("Invalid caller address: {}", caller))
}

fn format_ts(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| chrono::DateTime::from_timestamp(s, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    format!("{}h {:02}m {:02}s", hours, minutes, seconds)
}

/// Pre-execution check for a transaction
pub fn check(config: &Config, action: &Path, caller: &str) -> Result<Outcome> {
    let caller = parse_caller(caller)?;
    let tx = load_transaction(action)?;
    let guard = build_guard(config)?;

    match guard.check_pending(&caller, &tx) {
        Ok(permit) => {
            println!("\nPERMITTED");
            println!("Fingerprint:    {}", permit.fingerprint);
            println!("Queued at:      {}", format_ts(permit.queued_at));
            println!("Permitted at:   {}", format_ts(permit.permitted_at));
            println!("Acknowledgment: {}", permit.acknowledgment);
            Ok(Outcome::Done)
        }
        Err(e) if e.is_retryable() => {
            println!("\nHELD: {}", e);
            if let Some(ready_at) = e.ready_at() {
                println!("Re-run this check no earlier than {}", format_ts(ready_at));
            }
            Ok(Outcome::Retry)
        }
        Err(e) => Err(e.into()),
    }
}

/// Post-execution acknowledgment for a permitted transaction
pub fn ack(config: &Config, action: &Path, caller: &str, failed: bool) -> Result<Outcome> {
    let caller = parse_caller(caller)?;
    let tx = load_transaction(action)?;
    let guard = build_guard(config)?;

    let acknowledgment = tx.fingerprint(CheckContext::AfterExecution);
    guard.check_after_execution(&caller, &acknowledgment, !failed)?;

    println!(
        "Recorded {} execution for {}",
        if failed { "failed" } else { "successful" },
        acknowledgment
    );
    Ok(Outcome::Done)
}

/// List queued transactions
pub fn pending(config: &Config, caller: &str) -> Result<Outcome> {
    let caller = parse_caller(caller)?;
    let guard = build_guard(config)?;
    let entries = guard.pending(&caller)?;

    println!("\n=== PENDING TRANSACTIONS ===\n");
    if entries.is_empty() {
        println!("No queued transactions.");
        return Ok(Outcome::Done);
    }

    for entry in &entries {
        let state = if entry.is_ready() {
            "READY".to_string()
        } else {
            format!("locked, {} left", format_duration(entry.remaining))
        };
        println!("{}", entry.fingerprint);
        println!("  queued: {}", format_ts(entry.queued_at));
        println!("  ready:  {} ({})", format_ts(entry.ready_at), state);
    }
    println!("\nTotal: {}", entries.len());
    Ok(Outcome::Done)
}

/// Print both fingerprints of a transaction
pub fn fingerprint(action: &Path) -> Result<Outcome> {
    let tx = load_transaction(action)?;
    println!("pending:         {}", tx.fingerprint(CheckContext::Pending));
    println!("after_execution: {}", tx.fingerprint(CheckContext::AfterExecution));
    Ok(Outcome::Done)
}

/// Administrative release of a queued transaction
pub fn release(config: &Config, fingerprint: &str, caller: &str, force: bool) -> Result<Outcome> {
    let caller = parse_caller(caller)?;
    let fingerprint: Fingerprint = fingerprint
        .parse()
        .with_context(|| format!("Invalid fingerprint: {}", fingerprint))?;
    let guard = build_guard(config)?;

    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Release queued transaction {}? It will have to wait a full cooldown again.",
                fingerprint.short()
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("Release cancelled.");
            return Ok(Outcome::Done);
        }
    }

    let queued_at = guard.release(&caller, &fingerprint)?;
    warn!(fingerprint = %fingerprint, "Queued transaction released");
    println!(
        "Released {} (queued at {})",
        fingerprint,
        format_ts(queued_at)
    );
    Ok(Outcome::Done)
}

/// Poll the queue on the configured interval
pub async fn monitor(config: &Config, caller: &str, cycles: Option<u32>) -> Result<Outcome> {
    let caller = parse_caller(caller)?;
    let guard = Arc::new(build_guard(config)?);
    let monitor = GuardMonitor::new(guard, caller);

    let cycles = cycles.unwrap_or(config.monitor.cycles);
    info!(
        cycles,
        interval_secs = config.monitor.interval_secs,
        "Starting guard monitor"
    );

    let records = monitor
        .run(cycles, Duration::from_secs(config.monitor.interval_secs))
        .await?;

    for record in &records {
        println!("{}", serde_json::to_string(record)?);
    }
    Ok(Outcome::Done)
}

/// Show current configuration
pub fn show_config(config: &Config) -> Result<Outcome> {
    println!("{}", config.masked_display());
    Ok(Outcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EventsConfig, GuardSettings, MonitorConfig, StoreConfig};
    use tempfile::tempdir;

    const PRINCIPAL: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn test_config(dir: &Path) -> Config {
        Config {
            guard: GuardSettings {
                principal: PRINCIPAL.to_string(),
                administrator: Some("0xadadadadadadadadadadadadadadadadadadadad".to_string()),
                delay_secs: 3600,
            },
            store: StoreConfig {
                kind: StoreKind::Directory,
                path: dir.join("queue").display().to_string(),
            },
            events: EventsConfig {
                path: dir.join("forensic.jsonl").display().to_string(),
                tracing: false,
            },
            monitor: MonitorConfig::default(),
        }
    }

    fn write_tx(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("tx.json");
        std::fs::write(
            &path,
            r#"{"to": "0x1111111111111111111111111111111111111111", "value": "7", "data": "0x"}"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn test_check_queues_and_persists() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let tx_path = write_tx(dir.path());

        assert_eq!(check(&config, &tx_path, PRINCIPAL).unwrap(), Outcome::Retry);
        assert_eq!(check(&config, &tx_path, PRINCIPAL).unwrap(), Outcome::Retry);

        // Queue entry survives a fresh guard instance
        let guard = build_guard(&config).unwrap();
        let entries = guard.pending(&PRINCIPAL.parse().unwrap()).unwrap();
        assert_eq!(entries.len(), 1);

        let log = std::fs::read_to_string(dir.path().join("forensic.jsonl")).unwrap();
        let kinds: Vec<String> = log
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["kind"]["type"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(kinds, vec!["queued", "still_locked"]);
    }

    #[test]
    fn test_check_rejects_stranger() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let tx_path = write_tx(dir.path());

        let result = check(
            &config,
            &tx_path,
            "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
        );
        assert!(result.is_err());

        let guard = build_guard(&config).unwrap();
        assert!(guard.pending(&PRINCIPAL.parse().unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_release_with_force() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let tx_path = write_tx(dir.path());

        check(&config, &tx_path, PRINCIPAL).unwrap();
        let fp = load_transaction(&tx_path)
            .unwrap()
            .fingerprint(CheckContext::Pending);

        let admin = "0xadadadadadadadadadadadadadadadadadadadad";
        assert_eq!(
            release(&config, &fp.to_hex(), admin, true).unwrap(),
            Outcome::Done
        );
        let guard = build_guard(&config).unwrap();
        assert!(guard.pending(&PRINCIPAL.parse().unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_memory_store_rejected_for_commands() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.store.kind = StoreKind::Memory;
        let tx_path = write_tx(dir.path());

        let err = check(&config, &tx_path, PRINCIPAL).unwrap_err();
        assert!(err.to_string().contains("memory"));
        assert!(pending(&config, PRINCIPAL).is_err());
        assert!(show_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_caller() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let tx_path = write_tx(dir.path());
        assert!(check(&config, &tx_path, "not-an-address").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(86_300), "23h 58m 20s");
        assert_eq!(format_duration(59), "0h 00m 59s");
    }
}
