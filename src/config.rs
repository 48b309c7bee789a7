//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::guard::{Address, GuardConfig, DEFAULT_DELAY_SECS};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub guard: GuardSettings,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Guarded principal and cooldown
#[derive(Debug, Clone, Deserialize)]
pub struct GuardSettings {
    /// Address of the multisig wallet the guard protects
    #[serde(default)]
    pub principal: String,

    /// Identity allowed to release queued entries (disabled when unset)
    #[serde(default)]
    pub administrator: Option<String>,

    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            principal: String::new(),
            administrator: None,
            delay_secs: default_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// One file per pending fingerprint
    Directory,
    /// Process memory; everything is lost on exit. For embedding the guard
    /// in a long-lived process; the CLI refuses it
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_kind")]
    pub kind: StoreKind,
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: default_store_kind(),
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// JSON-lines forensic log; empty disables the file sink
    #[serde(default = "default_events_path")]
    pub path: String,
    /// Also emit events as tracing records
    #[serde(default = "default_true")]
    pub tracing: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            path: default_events_path(),
            tracing: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_monitor_cycles")]
    pub cycles: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval_secs(),
            cycles: default_monitor_cycles(),
        }
    }
}

fn default_delay_secs() -> u64 {
    DEFAULT_DELAY_SECS
}

fn default_store_kind() -> StoreKind {
    StoreKind::Directory
}

fn default_store_path() -> String {
    ".delay-guard/queue".to_string()
}

fn default_events_path() -> String {
    ".delay-guard/forensic.jsonl".to_string()
}

fn default_monitor_interval_secs() -> u64 {
    60
}

fn default_monitor_cycles() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("guard.principal", "")?
            .set_default("guard.delay_secs", default_delay_secs() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix DELAY_GUARD__)
            .add_source(
                config::Environment::with_prefix("DELAY_GUARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let principal = self.principal()?;
        if principal.is_zero() {
            anyhow::bail!("guard.principal must not be the zero address");
        }

        if let Some(admin) = self.administrator()? {
            if admin == principal {
                anyhow::bail!("guard.administrator must differ from guard.principal");
            }
        }

        if self.guard.delay_secs == 0 {
            anyhow::bail!("guard.delay_secs must be positive");
        }

        if self.store.kind == StoreKind::Directory && self.store.path.trim().is_empty() {
            anyhow::bail!("store.path is required for the directory store");
        }

        if self.monitor.interval_secs == 0 {
            anyhow::bail!("monitor.interval_secs must be positive");
        }

        if self.store.kind == StoreKind::Memory {
            tracing::warn!(
                "Store kind is 'memory' - queued transactions are lost when the process exits; guard commands will refuse it"
            );
        }

        if self.events.path.trim().is_empty() && !self.events.tracing {
            tracing::warn!("No event sink configured - guard transitions will not be recorded");
        }

        Ok(())
    }

    /// Parsed principal address
    pub fn principal(&self) -> Result<Address> {
        if self.guard.principal.trim().is_empty() {
            anyhow::bail!("guard.principal is required");
        }
        self.guard
            .principal
            .parse()
            .with_context(|| format!("Invalid guard.principal: {}", self.guard.principal))
    }

    /// Parsed administrator address, if configured
    pub fn administrator(&self) -> Result<Option<Address>> {
        match self.guard.administrator.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .with_context(|| format!("Invalid guard.administrator: {}", raw)),
        }
    }

    /// Engine configuration
    pub fn guard_config(&self) -> Result<GuardConfig> {
        let mut config = GuardConfig::new(self.principal()?).with_delay(self.guard.delay_secs);
        if let Some(admin) = self.administrator()? {
            config = config.with_administrator(admin);
        }
        Ok(config)
    }

    /// Get configuration for display
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Guard:
    principal: {}
    administrator: {}
    delay: {}s
  Store:
    kind: {:?}
    path: {}
  Events:
    forensic_log: {}
    tracing: {}
  Monitor:
    interval: {}s
    cycles: {}
"#,
            self.guard.principal,
            self.guard
                .administrator
                .as_deref()
                .filter(|a| !a.trim().is_empty())
                .unwrap_or("(release disabled)"),
            self.guard.delay_secs,
            self.store.kind,
            self.store.path,
            if self.events.path.trim().is_empty() {
                "(disabled)"
            } else {
                self.events.path.as_str()
            },
            self.events.tracing,
            self.monitor.interval_secs,
            self.monitor.cycles,
        )
    }
}
