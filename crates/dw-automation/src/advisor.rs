//! The advisor: a read-only scan that turns observations into proposals and
//! alerts.
//!
//! Proposals are plain text rows appended to the document — they ride the
//! same ingest path as human-typed commands and therefore face policy and
//! quorum like everything else. Alerts are audit records only. Both are
//! cooldown-limited per kind per document.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::json;
use tracing::{debug, info};

use dw_audit::AuditWriter;
use dw_backends::Backends;
use dw_schemas::{DocRow, DEFAULT_PAIR};
use dw_store::{DocumentRow, SqlitePool};

use crate::balances::{
    BALANCES_BASE_KEY, BALANCES_PER_CHAIN_KEY, BALANCES_USDC_KEY, GAS_OK_KEY,
};

/// doc_config key naming an operator-configured ENS policy to adopt.
pub const POLICY_ENS_NAME_KEY: &str = "policy_ens_name";

#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    /// Minimum gap between two proposals (or alerts) of the same kind.
    pub cooldown_ms: i64,
    pub sweep_threshold_usdc: f64,
    pub concentration_floor_usdc: f64,
    pub stuck_threshold_ms: i64,
    /// Base-asset position below this notional is not worth protecting.
    pub min_position_notional_usdc: f64,
    pub max_spread: f64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 6 * 3_600_000,
            sweep_threshold_usdc: 250.0,
            concentration_floor_usdc: 1_000.0,
            stuck_threshold_ms: 3_600_000,
            min_position_notional_usdc: 50.0,
            max_spread: 0.05,
        }
    }
}

pub struct Advisor {
    pool: SqlitePool,
    backends: Backends,
    audit: Arc<Mutex<AuditWriter>>,
    cfg: AdvisorConfig,
    guard: tokio::sync::Mutex<()>,
}

impl Advisor {
    pub fn new(
        pool: SqlitePool,
        backends: Backends,
        audit: Arc<Mutex<AuditWriter>>,
        cfg: AdvisorConfig,
    ) -> Self {
        Self { pool, backends, audit, cfg, guard: tokio::sync::Mutex::new(()) }
    }

    /// Returns the proposal texts appended this tick.
    pub async fn tick(&self, now_ms: i64) -> Result<Vec<String>> {
        let Ok(_guard) = self.guard.try_lock() else {
            debug!("advisor tick still running, skipping");
            return Ok(Vec::new());
        };

        let mut proposed = Vec::new();
        for doc in dw_store::list_documents(&self.pool).await? {
            self.scan_doc(&doc, now_ms, &mut proposed).await?;
        }
        Ok(proposed)
    }

    async fn scan_doc(
        &self,
        doc: &DocumentRow,
        now_ms: i64,
        proposed: &mut Vec<String>,
    ) -> Result<()> {
        let doc_id = doc.doc_id.as_str();
        let signers = dw_store::list_signers(&self.pool, doc_id).await?;

        // Session bootstrap: channel enabled, signers joined, no session yet.
        if self.backends.channel.is_some()
            && !signers.is_empty()
            && dw_store::get_channel_session(&self.pool, doc_id).await?.is_none()
        {
            self.propose(doc_id, "SESSION_CREATE", "DW SESSION_CREATE", now_ms, proposed).await?;
        }

        // Adopt the configured ENS policy if the doc still runs on a local one.
        if let Some(name) = dw_store::get_doc_config(&self.pool, doc_id, POLICY_ENS_NAME_KEY).await?
        {
            let source = dw_store::get_doc_config(&self.pool, doc_id, "policy_source").await?;
            if source.as_deref() != Some("ENS") {
                let text = format!("DW POLICY_ENS {name}");
                self.propose(doc_id, "POLICY_ENS", &text, now_ms, proposed).await?;
            }
        }

        let usdc = self.config_f64(doc_id, BALANCES_USDC_KEY).await?;
        let base = self.config_f64(doc_id, BALANCES_BASE_KEY).await?;
        let price = dw_store::get_price(&self.pool, DEFAULT_PAIR).await?;

        // Idle USDC above the sweep threshold.
        if usdc.unwrap_or(0.0) > self.cfg.sweep_threshold_usdc {
            self.propose(doc_id, "SWEEP_YIELD", "DW SWEEP_YIELD", now_ms, proposed).await?;
        }

        // A significant unprotected base position wants a stop-loss.
        if let (Some(base_qty), Some(price)) = (base, price.as_ref()) {
            let unprotected = !dw_store::list_conditional_orders(&self.pool, doc_id)
                .await?
                .iter()
                .any(|o| o.kind == "STOP_LOSS" && o.status == "ACTIVE");
            if price.mid > 0.0
                && base_qty * price.mid >= self.cfg.min_position_notional_usdc
                && unprotected
            {
                let text =
                    format!("DW STOP_LOSS SUI {base_qty} @ {:.4}", price.mid * 0.9);
                self.propose(doc_id, "STOP_LOSS", &text, now_ms, proposed).await?;
            }
        }

        // Concentration: one chain holding > 80% of a non-trivial treasury.
        if let Some(json) =
            dw_store::get_doc_config(&self.pool, doc_id, BALANCES_PER_CHAIN_KEY).await?
        {
            if let Ok(per_chain) = serde_json::from_str::<BTreeMap<String, f64>>(&json) {
                self.maybe_propose_rebalance(doc_id, &per_chain, now_ms, proposed).await?;
            }
        }

        self.scan_alerts(doc, usdc, base, price.as_ref(), now_ms).await?;
        Ok(())
    }

    async fn maybe_propose_rebalance(
        &self,
        doc_id: &str,
        per_chain: &BTreeMap<String, f64>,
        now_ms: i64,
        proposed: &mut Vec<String>,
    ) -> Result<()> {
        let total: f64 = per_chain.values().sum();
        if total <= self.cfg.concentration_floor_usdc {
            return Ok(());
        }
        let Some((heavy_chain, heavy)) =
            per_chain.iter().max_by(|a, b| a.1.total_cmp(b.1))
        else {
            return Ok(());
        };
        if *heavy <= 0.8 * total {
            return Ok(());
        }
        let dest = per_chain
            .iter()
            .filter(|(c, _)| *c != heavy_chain)
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(c, _)| c.clone())
            .unwrap_or_else(|| {
                if heavy_chain.as_str() == "base" {
                    "arbitrum".to_string()
                } else {
                    "base".to_string()
                }
            });

        let amount = heavy - total / 2.0;
        let text = format!("DW REBALANCE {amount:.2} FROM {heavy_chain} TO {dest}");
        self.propose(doc_id, "REBALANCE", &text, now_ms, proposed).await
    }

    async fn scan_alerts(
        &self,
        doc: &DocumentRow,
        usdc: Option<f64>,
        base: Option<f64>,
        price: Option<&dw_store::PriceRow>,
        now_ms: i64,
    ) -> Result<()> {
        let doc_id = doc.doc_id.as_str();

        let stuck = dw_store::list_stuck_commands(
            &self.pool,
            doc_id,
            now_ms - self.cfg.stuck_threshold_ms,
        )
        .await?;
        if !stuck.is_empty() {
            self.alert(
                doc_id,
                "STUCK_COMMANDS",
                json!({ "count": stuck.len(), "oldestCmdId": stuck[0].cmd_id }),
                now_ms,
            )
            .await?;
        }

        if dw_store::get_doc_config(&self.pool, doc_id, GAS_OK_KEY).await?.as_deref()
            == Some("false")
        {
            self.alert(doc_id, "LOW_GAS", json!({}), now_ms).await?;
        }

        // User-armed balance thresholds (ALERT_THRESHOLD coin below).
        for (coin, balance) in [("usdc", usdc), ("sui", base)] {
            let key = format!("alert_threshold_{coin}");
            if let (Some(threshold), Some(balance)) =
                (self.config_f64(doc_id, &key).await?, balance)
            {
                if balance < threshold {
                    self.alert(
                        doc_id,
                        "BALANCE_BELOW_THRESHOLD",
                        json!({ "coin": coin, "balance": balance, "threshold": threshold }),
                        now_ms,
                    )
                    .await?;
                }
            }
        }

        if let Some(p) = price {
            if p.mid > 0.0 && (p.ask - p.bid) / p.mid > self.cfg.max_spread {
                self.alert(
                    doc_id,
                    "WIDE_SPREAD",
                    json!({ "bid": p.bid, "ask": p.ask, "mid": p.mid }),
                    now_ms,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Append a proposal row unless its kind is still cooling down.
    async fn propose(
        &self,
        doc_id: &str,
        kind: &str,
        text: &str,
        now_ms: i64,
        proposed: &mut Vec<String>,
    ) -> Result<()> {
        if !self.cooldown_elapsed(doc_id, &format!("advisor_last_{kind}"), now_ms).await? {
            return Ok(());
        }
        let row = DocRow { text: text.to_string(), ..DocRow::default() };
        if let Err(e) = self.backends.docs.append_row(doc_id, &row).await {
            tracing::warn!(doc_id, kind, "proposal append failed: {e}");
            return Ok(());
        }
        dw_store::set_doc_config(
            &self.pool,
            doc_id,
            &format!("advisor_last_{kind}"),
            &now_ms.to_string(),
        )
        .await?;
        info!(doc_id, kind, "proposal appended");
        if let Ok(mut w) = self.audit.lock() {
            let _ = w.append(doc_id, "advisor", "PROPOSED", json!({ "kind": kind, "text": text }), now_ms);
        }
        proposed.push(text.to_string());
        Ok(())
    }

    async fn alert(
        &self,
        doc_id: &str,
        kind: &str,
        payload: serde_json::Value,
        now_ms: i64,
    ) -> Result<()> {
        if !self.cooldown_elapsed(doc_id, &format!("alert_last_{kind}"), now_ms).await? {
            return Ok(());
        }
        dw_store::set_doc_config(
            &self.pool,
            doc_id,
            &format!("alert_last_{kind}"),
            &now_ms.to_string(),
        )
        .await?;
        if let Ok(mut w) = self.audit.lock() {
            let _ = w.append(doc_id, "advisor", kind, payload, now_ms);
        }
        Ok(())
    }

    async fn cooldown_elapsed(&self, doc_id: &str, key: &str, now_ms: i64) -> Result<bool> {
        let last = dw_store::get_doc_config(&self.pool, doc_id, key)
            .await?
            .and_then(|v| v.parse::<i64>().ok());
        Ok(match last {
            Some(last) => now_ms - last >= self.cfg.cooldown_ms,
            None => true,
        })
    }

    async fn config_f64(&self, doc_id: &str, key: &str) -> Result<Option<f64>> {
        Ok(dw_store::get_doc_config(&self.pool, doc_id, key)
            .await?
            .and_then(|v| v.parse::<f64>().ok()))
    }
}
