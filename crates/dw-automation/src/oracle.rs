//! Price oracle + conditional-order triggering.
//!
//! Each tick refreshes the cached SUI/USDC quote (a failed quote leaves the
//! stale row in place) and then evaluates every ACTIVE conditional order
//! against the cached mid. A hit spawns a pre-approved MARKET_SELL child and
//! finalises the order — re-arming requires a fresh conditional command.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dw_audit::AuditWriter;
use dw_backends::{with_rpc_timeout, Backends};
use dw_schemas::{CommandStatus, DocRow, ParsedCommand, DEFAULT_PAIR};
use dw_store::{ConditionalOrderRow, NewCommand, PriceRow, SqlitePool};

pub struct PriceOracle {
    pool: SqlitePool,
    backends: Backends,
    audit: Arc<Mutex<AuditWriter>>,
    pool_key: String,
    guard: tokio::sync::Mutex<()>,
}

impl PriceOracle {
    pub fn new(
        pool: SqlitePool,
        backends: Backends,
        audit: Arc<Mutex<AuditWriter>>,
        pool_key: String,
    ) -> Self {
        Self { pool, backends, audit, pool_key, guard: tokio::sync::Mutex::new(()) }
    }

    /// Returns the order ids triggered this tick.
    pub async fn tick(&self, now_ms: i64) -> Result<Vec<String>> {
        let Ok(_guard) = self.guard.try_lock() else {
            debug!("oracle tick still running, skipping");
            return Ok(Vec::new());
        };

        // 1) Refresh the quote; on failure the stale row stays.
        match with_rpc_timeout(self.backends.orderbook.mid_price(&self.pool_key)).await {
            Ok(q) => {
                dw_store::upsert_price(
                    &self.pool,
                    &PriceRow {
                        pair: DEFAULT_PAIR.to_string(),
                        mid: q.mid,
                        bid: q.bid,
                        ask: q.ask,
                        source: "orderbook".to_string(),
                        at: now_ms,
                    },
                )
                .await?;
            }
            Err(e) => warn!("quote refresh failed, keeping stale price: {e}"),
        }

        // 2) Trigger conditional orders off the cached mid.
        let Some(price) = dw_store::get_price(&self.pool, DEFAULT_PAIR).await? else {
            return Ok(Vec::new());
        };
        if price.mid <= 0.0 {
            return Ok(Vec::new());
        }

        let mut triggered = Vec::new();
        for order in dw_store::list_active_conditional_orders(&self.pool).await? {
            let hit = match order.kind.as_str() {
                "STOP_LOSS" => price.mid <= order.trigger_price,
                "TAKE_PROFIT" => price.mid >= order.trigger_price,
                other => {
                    warn!(order_id = %order.order_id, "unknown conditional kind {other}");
                    false
                }
            };
            if hit && self.trigger(&order, price.mid, now_ms).await? {
                triggered.push(order.order_id);
            }
        }
        Ok(triggered)
    }

    async fn trigger(&self, order: &ConditionalOrderRow, mid: f64, now_ms: i64) -> Result<bool> {
        let cmd_id = Uuid::new_v4().to_string();
        let raw_text = format!(
            "[{}:{}] MARKET_SELL {} {}",
            order.kind, order.order_id, order.base, order.qty
        );
        let child = NewCommand {
            cmd_id: cmd_id.clone(),
            doc_id: order.doc_id.clone(),
            raw_text: raw_text.clone(),
            parsed: Some(ParsedCommand::MarketSell { base: order.base.clone(), qty: order.qty }),
            status: CommandStatus::Approved,
            error: None,
        };

        if !dw_store::trigger_conditional_with_child(&self.pool, &order.order_id, &child, now_ms)
            .await?
        {
            return Ok(false);
        }

        info!(
            order_id = %order.order_id,
            kind = %order.kind,
            mid,
            trigger = order.trigger_price,
            cmd_id = %cmd_id,
            "conditional order triggered"
        );

        let row = DocRow {
            id: Some(cmd_id.clone()),
            text: raw_text,
            status: Some(CommandStatus::Approved.as_str().to_string()),
            ..DocRow::default()
        };
        if let Err(e) = self.backends.docs.append_row(&order.doc_id, &row).await {
            warn!(order_id = %order.order_id, "doc append failed: {e}");
        }

        if let Ok(mut w) = self.audit.lock() {
            let _ = w.append(
                &order.doc_id,
                "conditional",
                "TRIGGERED",
                json!({
                    "orderId": order.order_id,
                    "kind": order.kind,
                    "mid": mid,
                    "trigger": order.trigger_price,
                    "cmdId": cmd_id,
                }),
                now_ms,
            );
        }
        Ok(true)
    }
}
