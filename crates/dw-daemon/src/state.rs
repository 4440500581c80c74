//! Shared runtime state for dw-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. Nothing here is a
//! loop; the loops in `loops.rs` borrow the same pool/back-ends/audit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dw_audit::AuditWriter;
use dw_backends::Backends;
use dw_config::Config;
use dw_store::SqlitePool;

/// Join challenges are short-lived; tokens answer 410 after this window.
pub const CHALLENGE_TTL_MS: i64 = 5 * 60 * 1_000;

/// Browser sessions live for a day.
pub const AUTH_SESSION_TTL_MS: i64 = 24 * 3_600_000;

/// An outstanding join challenge, keyed by its opaque token.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub doc_id: String,
    pub address: String,
    pub weight: i64,
    pub message: String,
    pub mode: &'static str, // "basic" | "yellow"
    pub issued_at_ms: i64,
}

pub struct AppState {
    pub pool: SqlitePool,
    pub backends: Backends,
    pub config: Config,
    pub audit: Arc<Mutex<AuditWriter>>,
    /// Outstanding join challenges (token -> challenge). Consumed on finish.
    pub challenges: tokio::sync::Mutex<HashMap<String, Challenge>>,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        backends: Backends,
        config: Config,
        audit: Arc<Mutex<AuditWriter>>,
    ) -> Self {
        Self { pool, backends, config, audit, challenges: tokio::sync::Mutex::new(HashMap::new()) }
    }

    pub fn approval_mode(&self) -> &'static str {
        if self.backends.channel.is_some() {
            "yellow"
        } else {
            "basic"
        }
    }
}

/// Wall-clock milliseconds — the daemon's single clock source; the store
/// only ever receives this as an argument.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
