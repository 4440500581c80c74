//! The executor: the single choke-point through which approved commands
//! reach the outside world.
//!
//! One tick: claim the oldest APPROVED command (a conditional store update —
//! at most one execution ever *starts* per command, even across racing
//! processes), re-check policy against the current snapshot, dispatch to the
//! right back-end capability, then transition to EXECUTED or FAILED. No
//! retry at this layer: the user re-drives by editing the document.
//!
//! Secrets are materialised only inside [`Executor::dispatch`] for the
//! duration of one command and are never cached, serialised or logged.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dw_audit::AuditWriter;
use dw_backends::{with_rpc_timeout, Backends, CHANNEL_PROTOCOL};
use dw_policy::SpendContext;
use dw_schemas::{CommandStatus, ParsedCommand, Side, WalletKeys, DEFAULT_PAIR};
use dw_store::{CommandRow, SqlitePool, TradeRow};

/// What one dispatch produced. `trades` use the venue fill price when
/// reported and the cached mid as a reference otherwise.
#[derive(Debug, Default)]
struct ExecOutcome {
    result: String,
    tx_ids: BTreeMap<String, String>,
    trades: Vec<TradeRow>,
}

pub struct Executor {
    pool: SqlitePool,
    backends: Backends,
    audit: Arc<Mutex<AuditWriter>>,
    pool_key: String,
    /// Process-wide single-flight guard: a tick that finds this held skips.
    guard: tokio::sync::Mutex<()>,
}

impl Executor {
    pub fn new(
        pool: SqlitePool,
        backends: Backends,
        audit: Arc<Mutex<AuditWriter>>,
        pool_key: String,
    ) -> Self {
        Self { pool, backends, audit, pool_key, guard: tokio::sync::Mutex::new(()) }
    }

    /// Execute at most one command. Returns the command id it worked on.
    pub async fn tick(&self, now_ms: i64) -> Result<Option<String>> {
        let Ok(_guard) = self.guard.try_lock() else {
            debug!("executor tick still running, skipping");
            return Ok(None);
        };

        let Some(cmd) = dw_store::claim_oldest_approved(&self.pool, now_ms).await? else {
            return Ok(None);
        };
        let cmd_id = cmd.cmd_id.clone();
        info!(cmd_id = %cmd_id, doc_id = %cmd.doc_id, "claimed command");

        let parsed = match &cmd.parsed {
            Some(p) => p.clone(),
            None => {
                self.finish_failed(&cmd, "command has no parsed payload", now_ms).await?;
                return Ok(Some(cmd_id));
            }
        };

        // Policy re-check against the *current* snapshot: catches policy
        // mutation between approval and dispatch.
        let policy = dw_docsync::effective_policy(
            &self.pool,
            self.backends.resolver.as_ref(),
            &cmd.doc_id,
        )
        .await?;
        let spend = dw_store::daily_spend_usdc(&self.pool, &cmd.doc_id, now_ms).await?;
        let verdict =
            dw_policy::evaluate(&policy, &parsed, &SpendContext { daily_spend_usdc: spend });
        if let Some(reason) = verdict.reason() {
            self.finish_failed(&cmd, &format!("policy denied at execution: {reason}"), now_ms)
                .await?;
            return Ok(Some(cmd_id));
        }

        match self.dispatch(&cmd, &parsed, now_ms).await {
            Ok(outcome) => {
                dw_store::append_tx_ids(&self.pool, &cmd_id, &outcome.tx_ids, now_ms).await?;
                for trade in &outcome.trades {
                    dw_store::insert_trade(&self.pool, trade).await?;
                }
                dw_store::transition_command(
                    &self.pool,
                    &cmd_id,
                    CommandStatus::Executed,
                    Some(&outcome.result),
                    None,
                    now_ms,
                )
                .await?;
                self.project(&cmd, CommandStatus::Executed, Some(&outcome.result), None).await;
                self.audit(&cmd, "EXECUTED", &parsed, now_ms);
            }
            Err(e) => {
                let msg = format!("{e:#}");
                warn!(cmd_id = %cmd_id, "dispatch failed: {msg}");
                self.finish_failed(&cmd, &msg, now_ms).await?;
            }
        }

        Ok(Some(cmd_id))
    }

    async fn finish_failed(&self, cmd: &CommandRow, error: &str, now_ms: i64) -> Result<()> {
        dw_store::transition_command(
            &self.pool,
            &cmd.cmd_id,
            CommandStatus::Failed,
            None,
            Some(error),
            now_ms,
        )
        .await?;
        self.project(cmd, CommandStatus::Failed, None, Some(error)).await;
        if let Some(parsed) = &cmd.parsed {
            self.audit(cmd, "FAILED", parsed, now_ms);
        }
        Ok(())
    }

    async fn project(
        &self,
        cmd: &CommandRow,
        status: CommandStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) {
        if let Err(e) = dw_docsync::project_command(
            self.backends.docs.as_ref(),
            &cmd.doc_id,
            &cmd.cmd_id,
            status,
            result,
            error,
        )
        .await
        {
            warn!(cmd_id = %cmd.cmd_id, "document writeback failed: {e:#}");
        }
    }

    fn audit(&self, cmd: &CommandRow, event_type: &str, parsed: &ParsedCommand, now_ms: i64) {
        if let Ok(mut w) = self.audit.lock() {
            let _ = w.append(
                &cmd.doc_id,
                "command",
                event_type,
                json!({ "cmdId": cmd.cmd_id, "kind": parsed.tag() }),
                now_ms,
            );
        }
    }

    /// Decrypted wallet keys for this document, alive only inside one
    /// dispatch.
    async fn wallet_keys(&self, doc_id: &str) -> Result<WalletKeys> {
        let blob = dw_store::get_doc_secrets(&self.pool, doc_id)
            .await?
            .ok_or_else(|| anyhow!("document wallet not set up; run SETUP first"))?;
        let keys = with_rpc_timeout(self.backends.vault.decrypt_wallet(doc_id, &blob)).await?;
        Ok(keys)
    }

    /// Venue reference price: last cached mid, if any.
    async fn cached_mid(&self) -> Option<f64> {
        dw_store::get_price(&self.pool, DEFAULT_PAIR)
            .await
            .ok()
            .flatten()
            .map(|p| p.mid)
            .filter(|m| *m > 0.0)
    }

    fn trade(
        &self,
        cmd: &CommandRow,
        side: Side,
        qty: f64,
        price: f64,
        tx_id: Option<String>,
        now_ms: i64,
    ) -> TradeRow {
        TradeRow {
            trade_id: Uuid::new_v4().to_string(),
            doc_id: cmd.doc_id.clone(),
            cmd_id: cmd.cmd_id.clone(),
            side: side.as_str().to_string(),
            qty,
            price,
            notional: qty * price,
            fee: 0.0,
            tx_id,
            at: now_ms,
        }
    }

    async fn dispatch(
        &self,
        cmd: &CommandRow,
        parsed: &ParsedCommand,
        now_ms: i64,
    ) -> Result<ExecOutcome> {
        let doc_id = cmd.doc_id.as_str();
        let mut out = ExecOutcome::default();

        match parsed {
            // ------------------------------------------------------------
            // Control (read-only kinds succeed without external effects)
            // ------------------------------------------------------------
            ParsedCommand::Setup => {
                if let Some(doc) = dw_store::get_document(&self.pool, doc_id).await? {
                    if let (Some(evm), Some(sui)) = (&doc.evm_address, &doc.sui_address) {
                        out.result = format!("already set up (evm {evm}, sui {sui})");
                        return Ok(out);
                    }
                }
                let material =
                    with_rpc_timeout(self.backends.vault.generate_wallet(doc_id)).await?;
                dw_store::set_doc_secrets(&self.pool, doc_id, &material.secret_blob).await?;
                dw_store::set_document_addresses(
                    &self.pool,
                    doc_id,
                    &material.evm_address,
                    &material.sui_address,
                )
                .await?;
                dw_store::set_doc_config(&self.pool, doc_id, "evm_address", &material.evm_address)
                    .await?;
                dw_store::set_doc_config(&self.pool, doc_id, "sui_address", &material.sui_address)
                    .await?;
                out.result =
                    format!("wallets created (evm {}, sui {})", material.evm_address, material.sui_address);
            }
            ParsedCommand::Status => {
                let signers = dw_store::list_signers(&self.pool, doc_id).await?.len();
                let quorum = dw_store::get_quorum(&self.pool, doc_id).await?;
                let schedules = dw_store::list_schedules(&self.pool, doc_id)
                    .await?
                    .iter()
                    .filter(|s| s.status == "ACTIVE")
                    .count();
                let armed = dw_store::list_conditional_orders(&self.pool, doc_id)
                    .await?
                    .iter()
                    .filter(|o| o.status == "ACTIVE")
                    .count();
                out.result = format!(
                    "{signers} signer(s), quorum {quorum}, {schedules} active schedule(s), {armed} armed conditional(s)"
                );
            }
            ParsedCommand::Price => {
                match with_rpc_timeout(self.backends.orderbook.mid_price(&self.pool_key)).await {
                    Ok(q) => {
                        out.result = format!(
                            "{DEFAULT_PAIR} mid {:.6} (bid {:.6} ask {:.6})",
                            q.mid, q.bid, q.ask
                        )
                    }
                    Err(e) => match self.cached_mid().await {
                        Some(mid) => {
                            out.result = format!("{DEFAULT_PAIR} mid {mid:.6} (cached)")
                        }
                        None => bail!("no quote available: {e}"),
                    },
                }
            }
            ParsedCommand::TradeHistory => {
                let trades = dw_store::list_trades(&self.pool, doc_id, 10).await?;
                if trades.is_empty() {
                    out.result = "no trades yet".to_string();
                } else {
                    let lines: Vec<String> = trades
                        .iter()
                        .map(|t| format!("{} {} @ {:.6} ({:.2} USDC)", t.side, t.qty, t.price, t.notional))
                        .collect();
                    out.result = lines.join("; ");
                }
            }
            ParsedCommand::Treasury => {
                let address = dw_store::get_doc_config(&self.pool, doc_id, "evm_address")
                    .await?
                    .ok_or_else(|| anyhow!("document wallet not set up; run SETUP first"))?;
                let balances =
                    with_rpc_timeout(self.backends.orderbook.balances(&address)).await?;
                let chains: Vec<String> = balances
                    .per_chain_usdc
                    .iter()
                    .map(|(c, v)| format!("{c}: {v:.2}"))
                    .collect();
                out.result = format!(
                    "USDC {:.2}, SUI {:.4}{}",
                    balances.usdc,
                    balances.base_asset,
                    if chains.is_empty() { String::new() } else { format!(" [{}]", chains.join(", ")) }
                );
            }
            ParsedCommand::SweepYield => {
                let keys = self.wallet_keys(doc_id).await?;
                let address = dw_store::get_doc_config(&self.pool, doc_id, "evm_address")
                    .await?
                    .unwrap_or_default();
                let balances =
                    with_rpc_timeout(self.backends.orderbook.balances(&address)).await?;
                if balances.usdc <= 0.0 {
                    out.result = "no idle USDC to sweep".to_string();
                } else {
                    let ack = with_rpc_timeout(self.backends.orderbook.withdraw(
                        &keys,
                        "USDC",
                        balances.usdc,
                    ))
                    .await?;
                    out.tx_ids.insert("orderbook".into(), ack.tx_id);
                    out.result = format!("swept {:.2} USDC", balances.usdc);
                }
            }

            // ------------------------------------------------------------
            // State channel
            // ------------------------------------------------------------
            ParsedCommand::SessionCreate => {
                let channel = self
                    .backends
                    .channel
                    .as_ref()
                    .ok_or_else(|| anyhow!("state-channel backend not configured"))?;
                let signers = dw_store::list_signers(&self.pool, doc_id).await?;
                if signers.is_empty() {
                    bail!("no signers registered; join before creating a session");
                }
                let mut participants = Vec::with_capacity(signers.len());
                for s in &signers {
                    let key = dw_store::get_session_key(&self.pool, doc_id, &s.address)
                        .await?
                        .ok_or_else(|| anyhow!("missing session key for signer {}", s.address))?;
                    if key.expires_at <= now_ms {
                        bail!("expired session key for signer {}", s.address);
                    }
                    participants.push(key.session_key_address);
                }
                let info =
                    with_rpc_timeout(channel.create_app_session(doc_id, &participants)).await?;
                dw_store::upsert_channel_session(
                    &self.pool,
                    &dw_store::ChannelSessionRow {
                        doc_id: doc_id.to_string(),
                        session_id: info.session_id.clone(),
                        definition: json!({ "protocol": CHANNEL_PROTOCOL, "participants": participants })
                            .to_string(),
                        version: info.version,
                        status: "OPEN".to_string(),
                        allocations: "[]".to_string(),
                    },
                )
                .await?;
                out.result = format!("session {} open at version {}", info.session_id, info.version);
            }
            ParsedCommand::SessionClose => {
                let channel = self
                    .backends
                    .channel
                    .as_ref()
                    .ok_or_else(|| anyhow!("state-channel backend not configured"))?;
                let session = dw_store::get_channel_session(&self.pool, doc_id)
                    .await?
                    .ok_or_else(|| anyhow!("no state-channel session for this document"))?;
                with_rpc_timeout(channel.close_app_session(&session.session_id)).await?;
                dw_store::close_channel_session(&self.pool, doc_id).await?;
                out.result = format!("session {} closed", session.session_id);
            }
            ParsedCommand::SessionStatus => {
                match dw_store::get_channel_session(&self.pool, doc_id).await? {
                    Some(s) => {
                        out.result =
                            format!("session {} {} at version {}", s.session_id, s.status, s.version)
                    }
                    None => out.result = "no state-channel session".to_string(),
                }
            }
            ParsedCommand::YellowSend { amount_usdc, to } => {
                let channel = self
                    .backends
                    .channel
                    .as_ref()
                    .ok_or_else(|| anyhow!("state-channel backend not configured"))?;
                let session = dw_store::get_channel_session(&self.pool, doc_id)
                    .await?
                    .filter(|s| s.status == "OPEN")
                    .ok_or_else(|| anyhow!("no open state-channel session; run SESSION_CREATE first"))?;
                let mut cosigners = Vec::new();
                for s in dw_store::list_signers(&self.pool, doc_id).await? {
                    if let Some(key) =
                        dw_store::get_session_key(&self.pool, doc_id, &s.address).await?
                    {
                        if key.expires_at > now_ms {
                            cosigners.push(key.session_key_address);
                        }
                    }
                }
                let payload = json!({ "type": "transfer", "to": to, "amountUsdc": amount_usdc });
                let version = with_rpc_timeout(channel.submit_app_state(
                    &session.session_id,
                    &payload,
                    &cosigners,
                ))
                .await?;
                dw_store::set_channel_session_version(&self.pool, doc_id, version).await?;
                out.result = format!("sent {amount_usdc} USDC off-chain to {to} (version {version})");
            }

            // ------------------------------------------------------------
            // Governance
            // ------------------------------------------------------------
            ParsedCommand::SignerAdd { address, weight } => {
                dw_store::upsert_signer(&self.pool, doc_id, address, *weight).await?;
                out.result = format!("signer {address} registered with weight {weight}");
            }
            ParsedCommand::Quorum { n } => {
                dw_store::set_quorum(&self.pool, doc_id, *n).await?;
                out.result = format!("quorum set to {n}");
            }
            ParsedCommand::PolicyEns { name } => {
                let policy = with_rpc_timeout(self.backends.resolver.get_policy(name))
                    .await?
                    .ok_or_else(|| anyhow!("no policy record found at {name}"))?;
                dw_store::set_policy_ens(&self.pool, doc_id, name).await?;
                dw_store::set_doc_config(
                    &self.pool,
                    doc_id,
                    dw_docsync::POLICY_SOURCE_KEY,
                    "ENS",
                )
                .await?;
                dw_store::set_doc_config(
                    &self.pool,
                    doc_id,
                    dw_docsync::POLICY_JSON_KEY,
                    &serde_json::to_string(&policy).context("serialize resolved policy")?,
                )
                .await?;
                out.result = format!("policy source set to ENS {name}");
            }

            // ------------------------------------------------------------
            // Order book
            // ------------------------------------------------------------
            ParsedCommand::LimitBuy { base, qty, price, .. }
            | ParsedCommand::LimitSell { base, qty, price, .. } => {
                let keys = self.wallet_keys(doc_id).await?;
                let mgr_id = dw_store::get_doc_config(&self.pool, doc_id, "orderbook_mgr_id").await?;
                let ack = with_rpc_timeout(self.backends.orderbook.execute(
                    parsed,
                    &keys,
                    &self.pool_key,
                    mgr_id.as_deref(),
                ))
                .await?;
                if let Some(mgr) = &ack.mgr_id {
                    dw_store::set_doc_config(&self.pool, doc_id, "orderbook_mgr_id", mgr).await?;
                }
                let side = if matches!(parsed, ParsedCommand::LimitBuy { .. }) {
                    Side::Buy
                } else {
                    Side::Sell
                };
                let ref_price = ack.fill_price.or(self.cached_mid().await).unwrap_or(*price);
                out.trades.push(self.trade(cmd, side, *qty, ref_price, Some(ack.tx_id.clone()), now_ms));
                out.tx_ids.insert("orderbook".into(), ack.tx_id);
                out.result = format!(
                    "{} {qty} {base} @ {price} placed{}",
                    if side == Side::Buy { "buy" } else { "sell" },
                    ack.order_id.map(|o| format!(" (order {o})")).unwrap_or_default()
                );
            }
            ParsedCommand::MarketBuy { base, qty } | ParsedCommand::MarketSell { base, qty } => {
                let keys = self.wallet_keys(doc_id).await?;
                let side = if matches!(parsed, ParsedCommand::MarketBuy { .. }) {
                    Side::Buy
                } else {
                    Side::Sell
                };
                let ack = with_rpc_timeout(self.backends.orderbook.place_market(
                    &keys,
                    &self.pool_key,
                    side,
                    *qty,
                ))
                .await?;
                let ref_price = match ack.fill_price.or(self.cached_mid().await) {
                    Some(p) => p,
                    None => bail!("no reference price for market order"),
                };
                out.trades.push(self.trade(cmd, side, *qty, ref_price, Some(ack.tx_id.clone()), now_ms));
                out.tx_ids.insert("orderbook".into(), ack.tx_id);
                out.result = format!(
                    "{} {qty} {base} at market (~{ref_price:.6})",
                    if side == Side::Buy { "bought" } else { "sold" }
                );
            }
            ParsedCommand::Cancel { order_id } => {
                let keys = self.wallet_keys(doc_id).await?;
                let mgr_id = dw_store::get_doc_config(&self.pool, doc_id, "orderbook_mgr_id").await?;
                let ack = with_rpc_timeout(self.backends.orderbook.execute(
                    parsed,
                    &keys,
                    &self.pool_key,
                    mgr_id.as_deref(),
                ))
                .await?;
                out.tx_ids.insert("orderbook".into(), ack.tx_id);
                out.result = format!("order {order_id} cancelled");
            }
            ParsedCommand::Settle => {
                let keys = self.wallet_keys(doc_id).await?;
                let mgr_id = dw_store::get_doc_config(&self.pool, doc_id, "orderbook_mgr_id").await?;
                let ack = with_rpc_timeout(self.backends.orderbook.execute(
                    parsed,
                    &keys,
                    &self.pool_key,
                    mgr_id.as_deref(),
                ))
                .await?;
                out.tx_ids.insert("orderbook".into(), ack.tx_id);
                out.result = "settled filled balances".to_string();
            }
            ParsedCommand::Deposit { coin, amount } => {
                let keys = self.wallet_keys(doc_id).await?;
                let ack =
                    with_rpc_timeout(self.backends.orderbook.deposit(&keys, coin, *amount)).await?;
                out.tx_ids.insert("orderbook".into(), ack.tx_id);
                out.result = format!("deposited {amount} {coin}");
            }
            ParsedCommand::Withdraw { coin, amount } => {
                let keys = self.wallet_keys(doc_id).await?;
                let ack =
                    with_rpc_timeout(self.backends.orderbook.withdraw(&keys, coin, *amount)).await?;
                out.tx_ids.insert("orderbook".into(), ack.tx_id);
                out.result = format!("withdrew {amount} {coin}");
            }

            // ------------------------------------------------------------
            // Payments
            // ------------------------------------------------------------
            ParsedCommand::Payout { amount_usdc, to } => {
                match &self.backends.managed_rail {
                    Some(rail) => {
                        let wallet_id = with_rpc_timeout(rail.ensure_wallet(doc_id)).await?;
                        let receipt =
                            with_rpc_timeout(rail.payout(&wallet_id, to, *amount_usdc)).await?;
                        out.tx_ids.insert("provider".into(), receipt.provider_tx_id);
                        if let Some(tx) = receipt.tx_id {
                            out.tx_ids.insert("chain".into(), tx);
                        }
                    }
                    None => {
                        let keys = self.wallet_keys(doc_id).await?;
                        let receipt = with_rpc_timeout(self.backends.native_rail.transfer_usdc(
                            &keys.evm_private_key,
                            to,
                            *amount_usdc,
                        ))
                        .await?;
                        out.tx_ids.insert("chain".into(), receipt.tx_id);
                    }
                }
                out.result = format!("sent {amount_usdc} USDC to {to}");
            }
            ParsedCommand::PayoutSplit { amount_usdc, recipients } => {
                let keys = self.wallet_keys(doc_id).await?;
                let mut parts = Vec::with_capacity(recipients.len());
                for (i, r) in recipients.iter().enumerate() {
                    let share = amount_usdc * r.pct / 100.0;
                    let receipt = with_rpc_timeout(self.backends.native_rail.transfer_usdc(
                        &keys.evm_private_key,
                        &r.address,
                        share,
                    ))
                    .await?;
                    out.tx_ids.insert(format!("chain_{i}"), receipt.tx_id);
                    parts.push(format!("{share:.2} to {}", r.address));
                }
                out.result = format!("split {amount_usdc} USDC: {}", parts.join(", "));
            }

            // ------------------------------------------------------------
            // Cross-chain
            // ------------------------------------------------------------
            ParsedCommand::Bridge { amount_usdc, from_chain, to_chain }
            | ParsedCommand::Rebalance { amount_usdc, from_chain, to_chain } => {
                let rail = self
                    .backends
                    .managed_rail
                    .as_ref()
                    .ok_or_else(|| anyhow!("managed wallet backend not configured"))?;
                let to = dw_store::get_doc_config(&self.pool, doc_id, "evm_address")
                    .await?
                    .ok_or_else(|| anyhow!("document wallet not set up; run SETUP first"))?;
                let wallet_id = with_rpc_timeout(rail.ensure_wallet(doc_id)).await?;
                let receipt = with_rpc_timeout(rail.bridge(
                    &wallet_id,
                    &to,
                    *amount_usdc,
                    from_chain,
                    to_chain,
                ))
                .await?;
                out.tx_ids.insert("provider".into(), receipt.provider_tx_id);
                if let Some(tx) = receipt.tx_id {
                    out.tx_ids.insert("chain".into(), tx);
                }
                out.result =
                    format!("moved {amount_usdc} USDC from {from_chain} to {to_chain}");
            }

            // ------------------------------------------------------------
            // Automation + conditionals
            // ------------------------------------------------------------
            ParsedCommand::Schedule { interval_hours, inner } => {
                let schedule_id = Uuid::new_v4().to_string();
                dw_store::insert_schedule(
                    &self.pool,
                    &schedule_id,
                    doc_id,
                    *interval_hours,
                    inner,
                    now_ms,
                )
                .await?;
                out.result = format!("schedule {schedule_id} armed: every {interval_hours}h: {inner}");
            }
            ParsedCommand::CancelSchedule { schedule_id } => {
                if !dw_store::cancel_schedule(&self.pool, schedule_id).await? {
                    bail!("unknown or already cancelled schedule {schedule_id}");
                }
                out.result = format!("schedule {schedule_id} cancelled");
            }
            ParsedCommand::StopLoss { base, qty, trigger_price }
            | ParsedCommand::TakeProfit { base, qty, trigger_price } => {
                let kind = parsed.tag();
                let order_id = Uuid::new_v4().to_string();
                dw_store::insert_conditional_order(
                    &self.pool,
                    &order_id,
                    doc_id,
                    kind,
                    base,
                    "USDC",
                    *trigger_price,
                    *qty,
                )
                .await?;
                out.result = format!("{kind} {order_id} armed: {qty} {base} @ {trigger_price}");
            }
            ParsedCommand::AlertThreshold { coin, below } => {
                dw_store::set_doc_config(
                    &self.pool,
                    doc_id,
                    &format!("alert_threshold_{}", coin.to_ascii_lowercase()),
                    &below.to_string(),
                )
                .await?;
                out.result = format!("alert armed when {coin} balance drops below {below}");
            }
            ParsedCommand::AutoRebalance { enabled } => {
                dw_store::set_doc_config(
                    &self.pool,
                    doc_id,
                    "auto_rebalance",
                    if *enabled { "on" } else { "off" },
                )
                .await?;
                out.result = format!("auto-rebalance {}", if *enabled { "on" } else { "off" });
            }

            // ------------------------------------------------------------
            // Bridge-wallet RPC
            // ------------------------------------------------------------
            ParsedCommand::Tx { payload } => {
                let response = with_rpc_timeout(
                    self.backends.wallet_bridge.request("eth_sendTransaction", payload),
                )
                .await?;
                if let Some(tx) = response.get("txId").and_then(|v| v.as_str()) {
                    out.tx_ids.insert("bridge".into(), tx.to_string());
                }
                out.result = format!("transaction submitted: {response}");
            }
            ParsedCommand::Sign { payload } => {
                let response =
                    with_rpc_timeout(self.backends.wallet_bridge.request("personal_sign", payload))
                        .await?;
                out.result = format!("signed: {response}");
            }
            ParsedCommand::Connect { uri } => {
                let result = with_rpc_timeout(self.backends.wallet_bridge.connect(uri)).await?;
                out.result = result;
            }
        }

        Ok(out)
    }
}
