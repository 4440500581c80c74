//! Append-only audit trail. JSON Lines, one event per line, with an optional
//! SHA-256 hash chain so tampering with history is detectable offline.
//!
//! Every state transition, approval decision, schedule fire, conditional
//! trigger and advisor alert lands here. Event ids are derived
//! deterministically from chain state + payload + sequence — no RNG.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct AuditWriter {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    seq: u64,
}

impl AuditWriter {
    /// Creates the audit writer and ensures parent dirs exist.
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {parent:?}"))?;
        }
        Ok(Self { path, hash_chain, last_hash: None, seq: 0 })
    }

    /// Restore chain state when resuming an existing log after restart.
    pub fn resume(&mut self, last_hash: Option<String>, seq: u64) {
        self.last_hash = last_hash;
        self.seq = seq;
    }

    pub fn last_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    /// Append one event, stamped with the caller-supplied wall clock.
    pub fn append(
        &mut self,
        doc_id: &str,
        topic: &str,
        event_type: &str,
        payload: Value,
        now_ms: i64,
    ) -> Result<AuditEvent> {
        let event_id = derive_event_id(self.last_hash.as_deref(), &payload, self.seq)?;
        self.seq += 1;

        let mut ev = AuditEvent {
            event_id,
            doc_id: doc_id.to_string(),
            ts_ms: now_ms,
            topic: topic.to_string(),
            event_type: event_type.to_string(),
            payload,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            ev.hash_prev = self.last_hash.clone();
            let self_hash = compute_event_hash(&ev)?;
            ev.hash_self = Some(self_hash.clone());
            self.last_hash = Some(self_hash);
        }

        let line = serde_json::to_string(&ev).context("serialize audit event")?;
        append_line(&self.path, &line)?;
        Ok(ev)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub doc_id: String,
    pub ts_ms: i64,
    pub topic: String,
    pub event_type: String,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {path:?}"))?;
    writeln!(f, "{line}").context("write audit line")?;
    Ok(())
}

/// event_id = UUIDv5 over (prev hash | canonical payload | seq). Stable for
/// a given chain position, so replays after restart do not mint fresh ids.
fn derive_event_id(prev: Option<&str>, payload: &Value, seq: u64) -> Result<Uuid> {
    let payload_canon = serde_json::to_string(payload).context("canonicalize payload")?;
    let data = format!("docwarden.audit.v1|{}|{payload_canon}|{seq}", prev.unwrap_or(""));
    Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, data.as_bytes()))
}

/// Hash over the event with `hash_self` blanked.
fn compute_event_hash(ev: &AuditEvent) -> Result<String> {
    let mut clone = ev.clone();
    clone.hash_self = None;
    let bytes = serde_json::to_vec(&clone).context("serialize event for hashing")?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
