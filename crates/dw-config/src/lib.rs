//! Process configuration: a flat mapping of uppercase `DW_*` keys.
//!
//! Unknown keys are ignored. Missing required keys for an *enabled* back-end
//! are a fatal start-up error — the process refuses to run half-configured.
//! `load()` reads the real environment (with a dev-time `.env.local`
//! bootstrap); `from_map` is the pure core used by tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub http_addr: SocketAddr,
    pub public_base_url: String,
    pub master_key: Option<String>,
    pub doc_provider_token: Option<String>,

    pub poll_interval: Duration,
    pub executor_interval: Duration,
    pub scheduler_interval: Duration,
    pub oracle_interval: Duration,
    pub balances_interval: Duration,
    pub advisor_interval: Duration,

    /// Opt-in: accept APPROVED/REJECTED typed into the status cell, only for
    /// docs with quorum <= 1 or no registered signers.
    pub cell_approvals: bool,

    pub channel_enabled: bool,
    pub channel_endpoint: Option<String>,
    pub managed_wallet_enabled: bool,
    pub managed_wallet_endpoint: Option<String>,

    pub orderbook_pool: String,
    pub usdc_asset: String,
}

/// Load from the process environment. `.env.local` is loaded first when
/// present (silently skipped otherwise — production injects env directly).
pub fn load() -> Result<Config> {
    let _ = dotenvy::from_filename(".env.local");
    let map: HashMap<String, String> = std::env::vars().collect();
    from_map(&map)
}

pub fn from_map(map: &HashMap<String, String>) -> Result<Config> {
    let get = |key: &str| map.get(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

    let http_addr: SocketAddr = get("DW_HTTP_ADDR")
        .unwrap_or_else(|| "127.0.0.1:8787".to_string())
        .parse()
        .context("DW_HTTP_ADDR is not a socket address")?;

    let cfg = Config {
        database_url: get("DW_DATABASE_URL").unwrap_or_else(|| "sqlite:docwarden.db".to_string()),
        public_base_url: get("DW_PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://{http_addr}")),
        http_addr,
        master_key: get("DW_MASTER_KEY"),
        doc_provider_token: get("DW_DOC_PROVIDER_TOKEN"),

        poll_interval: interval(&get, "DW_POLL_INTERVAL_SECS", 5)?,
        executor_interval: interval(&get, "DW_EXECUTOR_INTERVAL_SECS", 5)?,
        scheduler_interval: interval(&get, "DW_SCHEDULER_INTERVAL_SECS", 5)?,
        oracle_interval: interval(&get, "DW_ORACLE_INTERVAL_SECS", 30)?,
        balances_interval: interval(&get, "DW_BALANCES_INTERVAL_SECS", 60)?,
        advisor_interval: interval(&get, "DW_ADVISOR_INTERVAL_SECS", 60)?,

        cell_approvals: flag(&get, "DW_CELL_APPROVALS"),
        channel_enabled: flag(&get, "DW_CHANNEL_ENABLED"),
        channel_endpoint: get("DW_CHANNEL_ENDPOINT"),
        managed_wallet_enabled: flag(&get, "DW_MANAGED_WALLET_ENABLED"),
        managed_wallet_endpoint: get("DW_MANAGED_WALLET_ENDPOINT"),

        orderbook_pool: get("DW_ORDERBOOK_POOL").unwrap_or_else(|| "SUI_USDC".to_string()),
        usdc_asset: get("DW_USDC_ASSET").unwrap_or_else(|| "USDC".to_string()),
    };

    if cfg.channel_enabled && cfg.channel_endpoint.is_none() {
        bail!("DW_CHANNEL_ENABLED is set but DW_CHANNEL_ENDPOINT is missing");
    }
    if cfg.managed_wallet_enabled && cfg.managed_wallet_endpoint.is_none() {
        bail!("DW_MANAGED_WALLET_ENABLED is set but DW_MANAGED_WALLET_ENDPOINT is missing");
    }

    Ok(cfg)
}

fn interval(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default_secs: u64,
) -> Result<Duration> {
    match get(key) {
        None => Ok(Duration::from_secs(default_secs)),
        Some(v) => {
            let secs: u64 = v.parse().with_context(|| format!("{key} must be seconds, got {v}"))?;
            if secs == 0 {
                bail!("{key} must be > 0");
            }
            Ok(Duration::from_secs(secs))
        }
    }
}

fn flag(get: &impl Fn(&str) -> Option<String>, key: &str) -> bool {
    get(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
