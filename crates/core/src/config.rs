//! Layered configuration for OrderGate.
//!
//! Configuration is loaded in layers with increasing priority:
//! 1. Compiled-in defaults (paper mode, conservative dispatch limits)
//! 2. TOML configuration file (if provided)
//! 3. Environment variable overrides (prefix `OG_`, nested with `__`)
//! 4. Dedicated env vars for gateway credentials (`OG_GATEWAY_PASSWORD`,
//!    `OG_GATEWAY_AUTH_CODE`)
//!
//! Gateway credentials **must** come from environment variables, never from
//! configuration files.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::types::{CommissionRate, Instrument, MarginRate};

// ── Default value functions ────────────────────────────────────────────

fn default_max_sends_per_second() -> u32 {
    5
}

fn default_rate_window_ms() -> u64 {
    1_000
}

/// Default bounded wait for an insert acknowledgement: 15 s.
fn default_ack_timeout_ms() -> u64 {
    15_000
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_not_tradable_backoff_ms() -> u64 {
    1_000
}

fn default_wait_timeout_ms() -> u64 {
    10_000
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

/// Default spacing between reference-data queries: 1.1 s.
fn default_query_throttle_ms() -> u64 {
    1_100
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data/snapshots.jsonl")
}

// ── Configuration structs ──────────────────────────────────────────────

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Gateway login settings.
    pub gateway: GatewayConfig,
    /// Dispatcher limits and backoffs.
    pub dispatch: DispatchConfig,
    /// Session and query-poller timings.
    pub session: SessionConfig,
    /// Snapshot storage.
    pub storage: StorageConfig,
    /// Trading mode and paper-mode seed data.
    pub trading: TradingConfig,
    /// Simulated gateway catalogue and behavior.
    #[serde(default)]
    pub paper: PaperConfig,
}

/// Gateway login configuration.
///
/// `password` and `auth_code` are loaded from env vars only.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub broker_id: String,
    pub investor_id: String,
    #[serde(default)]
    pub password: String,
    pub app_id: String,
    #[serde(default)]
    pub auth_code: String,
    /// Front addresses tried in order (e.g., `tcp://180.168.146.187:10130`).
    #[serde(default)]
    pub front_addresses: Vec<String>,
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Maximum sends inside one rate window.
    #[serde(default = "default_max_sends_per_second")]
    pub max_sends_per_second: u32,
    /// Sliding rate window length in milliseconds.
    #[serde(default = "default_rate_window_ms")]
    pub rate_window_ms: u64,
    /// Bounded wait for an insert acknowledgement in milliseconds.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Pending-queue capacity; a full queue answers `NeedRetry`.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Backoff after a failed send in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Backoff after requeueing an item outside trading hours.
    #[serde(default = "default_not_tradable_backoff_ms")]
    pub not_tradable_backoff_ms: u64,
}

/// Session client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Default wait for a session state in milliseconds.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    /// Wait for one reference-data query response.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Minimum spacing between two queries.
    #[serde(default = "default_query_throttle_ms")]
    pub query_throttle_ms: u64,
    /// Idle interval between poll cycles.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Snapshot storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// JSON-lines file holding settled user snapshots.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

/// Trading configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// `paper` for the simulated gateway, `live` for the native transport.
    pub mode: TradingMode,
    /// Trading day used in paper mode; defaults to today.
    #[serde(default)]
    pub trading_day: Option<NaiveDate>,
    /// Users created at start when no snapshot exists for them.
    #[serde(default)]
    pub users: Vec<UserSeed>,
}

/// Initial user with an opening balance.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UserSeed {
    pub user_id: String,
    pub balance: f64,
}

/// Simulated gateway settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaperConfig {
    /// Fill every accepted insert in full at its limit price.
    #[serde(default)]
    pub fill_on_accept: bool,
    /// Instruments whose inserts are rejected by the simulated exchange.
    #[serde(default)]
    pub reject_instruments: Vec<String>,
    /// Catalogue answered to reference queries.
    #[serde(default)]
    pub instruments: Vec<PaperInstrument>,
}

/// One instrument of the simulated catalogue.
#[derive(Debug, Clone, Deserialize)]
pub struct PaperInstrument {
    pub instrument: Instrument,
    #[serde(default)]
    pub margin_rate: Option<MarginRate>,
    #[serde(default)]
    pub commission_rate: Option<CommissionRate>,
    #[serde(default)]
    pub upper_limit_price: Option<f64>,
    #[serde(default)]
    pub lower_limit_price: Option<f64>,
    #[serde(default)]
    pub settlement_price: Option<f64>,
}

/// Trading mode selector.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// Simulated gateway.
    Paper,
    /// Native gateway transport.
    Live,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_sends_per_second: default_max_sends_per_second(),
            rate_window_ms: default_rate_window_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            retry_backoff_ms: default_retry_backoff_ms(),
            not_tradable_backoff_ms: default_not_tradable_backoff_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_wait_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            query_throttle_ms: default_query_throttle_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration using layered sources.
    ///
    /// Environment overrides use prefix `OG_` and `__` as the nesting
    /// separator (e.g., `OG_DISPATCH__MAX_SENDS_PER_SECOND=3`).
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder()
            // ── Layer 1: compiled-in defaults ───────────────────────
            .set_default("gateway.broker_id", "9999")?
            .set_default("gateway.investor_id", "")?
            .set_default("gateway.password", "")?
            .set_default("gateway.app_id", "simnow_client_test")?
            .set_default("gateway.auth_code", "")?
            .set_default("gateway.front_addresses", Vec::<String>::new())?
            .set_default("dispatch.max_sends_per_second", 5i64)?
            .set_default("dispatch.rate_window_ms", 1000i64)?
            .set_default("dispatch.ack_timeout_ms", 15000i64)?
            .set_default("dispatch.queue_capacity", 10000i64)?
            .set_default("dispatch.retry_backoff_ms", 500i64)?
            .set_default("dispatch.not_tradable_backoff_ms", 1000i64)?
            .set_default("session.wait_timeout_ms", 10000i64)?
            .set_default("session.query_timeout_ms", 5000i64)?
            .set_default("session.query_throttle_ms", 1100i64)?
            .set_default("session.poll_interval_ms", 5000i64)?
            .set_default("storage.snapshot_path", "data/snapshots.jsonl")?
            .set_default("trading.mode", "paper")?;

        // ── Layer 2: TOML file ─────────────────────────────────────
        if let Some(path) = config_path {
            let path_str = path.to_str().context("config path is not valid UTF-8")?;
            builder = builder.add_source(File::with_name(path_str).required(true));
        }

        // ── Layer 3: env var overrides (OG_ prefix) ───────────────
        // The prefix separator is single `_`, the nesting separator `__`.
        builder = builder.add_source(
            Environment::with_prefix("OG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut cfg: AppConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        // ── Layer 4: dedicated credential env vars ─────────────────
        if let Ok(v) = std::env::var("OG_GATEWAY_PASSWORD") {
            cfg.gateway.password = v;
        }
        if let Ok(v) = std::env::var("OG_GATEWAY_AUTH_CODE") {
            cfg.gateway.auth_code = v;
        }

        cfg.validate()?;

        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.dispatch.max_sends_per_second == 0 {
            bail!("dispatch.max_sends_per_second must be positive");
        }
        if self.trading.mode == TradingMode::Live {
            if self.gateway.password.is_empty() || self.gateway.auth_code.is_empty() {
                bail!("gateway password and auth code are required in live trading mode");
            }
            if self.gateway.front_addresses.is_empty() {
                bail!("at least one gateway front address is required in live trading mode");
            }
        }
        Ok(())
    }
}
