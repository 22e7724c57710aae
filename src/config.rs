//! TOML configuration for the observatory service.
//!
//! Layered model: compiled-in defaults, overridden by a TOML file located via
//! the `OBSERVATORY_CONFIG` environment variable or the standard system path.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::mail::MailMessage;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the observatory process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservatoryConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub reports: ReportsConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ObservatoryConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded observatory configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `OBSERVATORY_CONFIG` environment variable.
    /// 2. `/etc/observatory/observatory.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("OBSERVATORY_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "OBSERVATORY_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/observatory/observatory.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/observatory.db".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    /// Root of the artifact tree: `<root>/<observatory>/<execution>/<dependency>/<seed>/`.
    pub export_root: PathBuf,
    /// Maximum number of seeds built at the same time.
    pub workers: usize,
    /// A build claim older than this is assumed to belong to a dead process.
    pub claim_stale_after_secs: u64,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            export_root: PathBuf::from("data/exports/observatory"),
            workers: 4,
            claim_stale_after_secs: 3600,
        }
    }
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Allow at most one `Launched` crawl at a time.
    pub single_crawl: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self { single_crawl: true }
    }
}

// ---------------------------------------------------------------------------
// Mail
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailTransport {
    /// Persist to the `mail_outbox` table.
    Outbox,
    /// Log only.
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub from_address: String,
    pub from_name: String,
    pub completion_subject: String,
    pub completion_body: String,
    pub transport: MailTransport,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from_address: "observatory@localhost".to_string(),
            from_name: "Accessibility Observatory".to_string(),
            completion_subject: "Report generation completed".to_string(),
            completion_body: "The report generation process has finished. \
                              To download the reports run the action again."
                .to_string(),
            transport: MailTransport::Outbox,
        }
    }
}

impl MailConfig {
    /// The fixed batch-completion message for one requester.
    pub fn completion_message(&self, recipient: &str) -> MailMessage {
        MailMessage {
            from_address: self.from_address.clone(),
            from_name: self.from_name.clone(),
            recipients: vec![recipient.to_string()],
            subject: self.completion_subject.clone(),
            body: self.completion_body.clone(),
            attachment: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
