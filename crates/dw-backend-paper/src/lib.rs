//! Deterministic in-memory back-ends.
//!
//! Paper mode for the daemon and the substrate for every scenario test: no
//! network, no randomness, sequence-numbered transaction ids, injectable
//! failures. Each type mirrors one capability trait from `dw-backends`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use dw_backends::{
    BackendError, BackendResult, Backends, DocProvider, ManagedRail, NativeRail, OrderBook,
    PolicyResolver, SecretVault, SignatureVerifier, StateChannel, WalletBridge,
};
use dw_schemas::{
    Balances, ChannelSessionInfo, DocCellPatch, DocHandle, DocRow, GasCheck, MidQuote, OpenOrder,
    OrderAck, ParsedCommand, PayoutReceipt, Policy, Side, TransferReceipt, WalletKeys,
    WalletMaterial,
};

fn upstream(msg: &str) -> BackendError {
    BackendError::Upstream(msg.to_string())
}

// ---------------------------------------------------------------------------
// Order book
// ---------------------------------------------------------------------------

pub struct PaperOrderBook {
    quote: Mutex<MidQuote>,
    balances: Mutex<HashMap<String, Balances>>,
    gas: Mutex<GasCheck>,
    fail_next: AtomicBool,
    seq: AtomicU64,
    executed: Mutex<Vec<String>>,
}

impl Default for PaperOrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperOrderBook {
    pub fn new() -> Self {
        Self {
            quote: Mutex::new(MidQuote { bid: 0.99, ask: 1.01, mid: 1.0, spread: 0.02 }),
            balances: Mutex::new(HashMap::new()),
            gas: Mutex::new(GasCheck { ok: true, balance: 1.0, min: 0.1 }),
            fail_next: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn set_quote(&self, bid: f64, ask: f64) {
        let mid = (bid + ask) / 2.0;
        let spread = if mid > 0.0 { (ask - bid) / mid } else { 0.0 };
        *self.quote.lock().unwrap() = MidQuote { bid, ask, mid, spread };
    }

    pub fn set_balances(&self, address: &str, balances: Balances) {
        self.balances.lock().unwrap().insert(address.to_string(), balances);
    }

    pub fn set_gas(&self, gas: GasCheck) {
        *self.gas.lock().unwrap() = gas;
    }

    /// The next order-book call fails with an upstream error.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn maybe_fail(&self) -> BackendResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            Err(upstream("injected order-book failure"))
        } else {
            Ok(())
        }
    }

    fn next(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn ack(&self, mgr_id: Option<&str>, with_order: bool) -> OrderAck {
        let n = self.next();
        OrderAck {
            tx_id: format!("paper-ob-tx-{n}"),
            order_id: with_order.then(|| format!("paper-ord-{n}")),
            mgr_id: Some(mgr_id.unwrap_or("paper-mgr-1").to_string()),
            fill_price: None,
        }
    }
}

#[async_trait]
impl OrderBook for PaperOrderBook {
    async fn execute(
        &self,
        cmd: &ParsedCommand,
        _wallet: &WalletKeys,
        pool_key: &str,
        mgr_id: Option<&str>,
    ) -> BackendResult<OrderAck> {
        self.maybe_fail()?;
        let ack = match cmd {
            ParsedCommand::LimitBuy { .. } | ParsedCommand::LimitSell { .. } => {
                self.ack(mgr_id, true)
            }
            ParsedCommand::Cancel { .. } | ParsedCommand::Settle => self.ack(mgr_id, false),
            other => return Err(upstream(&format!("unsupported order-book command {}", other.tag()))),
        };
        self.executed.lock().unwrap().push(format!("{} on {pool_key}", cmd.tag()));
        Ok(ack)
    }

    async fn open_orders(&self, _pool_key: &str, _mgr_id: &str) -> BackendResult<Vec<OpenOrder>> {
        self.maybe_fail()?;
        Ok(Vec::new())
    }

    async fn balances(&self, address: &str) -> BackendResult<Balances> {
        self.maybe_fail()?;
        Ok(self.balances.lock().unwrap().get(address).cloned().unwrap_or_default())
    }

    async fn deposit(
        &self,
        _wallet: &WalletKeys,
        coin: &str,
        amount: f64,
    ) -> BackendResult<OrderAck> {
        self.maybe_fail()?;
        self.executed.lock().unwrap().push(format!("DEPOSIT {amount} {coin}"));
        Ok(self.ack(None, false))
    }

    async fn withdraw(
        &self,
        _wallet: &WalletKeys,
        coin: &str,
        amount: f64,
    ) -> BackendResult<OrderAck> {
        self.maybe_fail()?;
        self.executed.lock().unwrap().push(format!("WITHDRAW {amount} {coin}"));
        Ok(self.ack(None, false))
    }

    async fn place_market(
        &self,
        _wallet: &WalletKeys,
        pool_key: &str,
        side: Side,
        qty: f64,
    ) -> BackendResult<OrderAck> {
        self.maybe_fail()?;
        let mid = self.quote.lock().unwrap().mid;
        self.executed
            .lock()
            .unwrap()
            .push(format!("MARKET {} {qty} on {pool_key}", side.as_str()));
        let mut ack = self.ack(None, true);
        ack.fill_price = Some(mid);
        Ok(ack)
    }

    async fn mid_price(&self, _pool_key: &str) -> BackendResult<MidQuote> {
        self.maybe_fail()?;
        Ok(*self.quote.lock().unwrap())
    }

    async fn check_gas(&self, _address: &str) -> BackendResult<GasCheck> {
        self.maybe_fail()?;
        Ok(*self.gas.lock().unwrap())
    }
}

// ---------------------------------------------------------------------------
// Payment rails
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct PaperNativeRail {
    seq: AtomicU64,
    transfers: Mutex<Vec<(String, f64)>>,
}

impl PaperNativeRail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transfers(&self) -> Vec<(String, f64)> {
        self.transfers.lock().unwrap().clone()
    }
}

#[async_trait]
impl NativeRail for PaperNativeRail {
    async fn transfer_usdc(
        &self,
        _private_key: &str,
        to: &str,
        amount: f64,
    ) -> BackendResult<TransferReceipt> {
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.transfers.lock().unwrap().push((to.to_string(), amount));
        Ok(TransferReceipt { tx_id: format!("paper-evm-tx-{n}") })
    }
}

#[derive(Default)]
pub struct PaperManagedRail {
    seq: AtomicU64,
    payouts: Mutex<Vec<(String, String, f64)>>,
}

impl PaperManagedRail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payouts(&self) -> Vec<(String, String, f64)> {
        self.payouts.lock().unwrap().clone()
    }

    fn receipt(&self) -> PayoutReceipt {
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        PayoutReceipt {
            provider_tx_id: format!("paper-mw-{n}"),
            tx_id: Some(format!("paper-mw-chain-{n}")),
            state: "COMPLETED".to_string(),
        }
    }
}

#[async_trait]
impl ManagedRail for PaperManagedRail {
    async fn ensure_wallet(&self, doc_id: &str) -> BackendResult<String> {
        Ok(format!("paper-wallet-{doc_id}"))
    }

    async fn payout(
        &self,
        wallet_id: &str,
        to: &str,
        amount: f64,
    ) -> BackendResult<PayoutReceipt> {
        self.payouts
            .lock()
            .unwrap()
            .push((wallet_id.to_string(), to.to_string(), amount));
        Ok(self.receipt())
    }

    async fn bridge(
        &self,
        wallet_id: &str,
        to: &str,
        amount: f64,
        from_chain: &str,
        to_chain: &str,
    ) -> BackendResult<PayoutReceipt> {
        self.payouts.lock().unwrap().push((
            wallet_id.to_string(),
            format!("{to} {from_chain}->{to_chain}"),
            amount,
        ));
        Ok(self.receipt())
    }
}

// ---------------------------------------------------------------------------
// State channel
// ---------------------------------------------------------------------------

pub struct PaperChannel {
    seq: AtomicU64,
    fail_next: AtomicBool,
    sessions: Mutex<HashMap<String, ChannelSessionInfo>>,
    submitted: Mutex<Vec<Value>>,
}

impl Default for PaperChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperChannel {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            fail_next: AtomicBool::new(false),
            sessions: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Payloads of every submitted state transition, in order.
    pub fn submitted(&self) -> Vec<Value> {
        self.submitted.lock().unwrap().clone()
    }

    fn maybe_fail(&self) -> BackendResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            Err(upstream("injected channel failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StateChannel for PaperChannel {
    async fn auth_request(&self, address: &str) -> BackendResult<String> {
        self.maybe_fail()?;
        Ok(format!("paper-channel-challenge:{address}"))
    }

    async fn auth_verify(&self, address: &str, _signature: &str) -> BackendResult<String> {
        self.maybe_fail()?;
        Ok(format!("paper-jwt:{address}"))
    }

    async fn create_app_session(
        &self,
        doc_id: &str,
        participants: &[String],
    ) -> BackendResult<ChannelSessionInfo> {
        self.maybe_fail()?;
        if participants.is_empty() {
            return Err(upstream("session needs at least one participant"));
        }
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let info = ChannelSessionInfo {
            session_id: format!("paper-chan-{doc_id}-{n}"),
            version: 1,
            status: "OPEN".to_string(),
        };
        self.sessions.lock().unwrap().insert(info.session_id.clone(), info.clone());
        Ok(info)
    }

    async fn submit_app_state(
        &self,
        session_id: &str,
        payload: &Value,
        cosigners: &[String],
    ) -> BackendResult<i64> {
        self.maybe_fail()?;
        if cosigners.is_empty() {
            return Err(upstream("state transition needs at least one cosigner"));
        }
        let mut sessions = self.sessions.lock().unwrap();
        let Some(info) = sessions.get_mut(session_id) else {
            return Err(upstream(&format!("unknown session {session_id}")));
        };
        if info.status != "OPEN" {
            return Err(upstream(&format!("session {session_id} is {}", info.status)));
        }
        info.version += 1;
        self.submitted.lock().unwrap().push(payload.clone());
        Ok(info.version)
    }

    async fn close_app_session(&self, session_id: &str) -> BackendResult<()> {
        self.maybe_fail()?;
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(session_id) {
            Some(info) => {
                info.status = "CLOSED".to_string();
                Ok(())
            }
            None => Err(upstream(&format!("unknown session {session_id}"))),
        }
    }

    async fn get_session_status(&self, session_id: &str) -> BackendResult<ChannelSessionInfo> {
        self.maybe_fail()?;
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| upstream(&format!("unknown session {session_id}")))
    }
}

// ---------------------------------------------------------------------------
// Policy resolver
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StaticPolicyResolver {
    policies: Mutex<HashMap<String, Policy>>,
}

impl StaticPolicyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ens_name: &str, policy: Policy) {
        self.policies.lock().unwrap().insert(ens_name.to_string(), policy);
    }
}

#[async_trait]
impl PolicyResolver for StaticPolicyResolver {
    async fn get_policy(&self, ens_name: &str) -> BackendResult<Option<Policy>> {
        Ok(self.policies.lock().unwrap().get(ens_name).cloned())
    }
}

// ---------------------------------------------------------------------------
// Document provider
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemDoc {
    display_name: String,
    rows: Vec<DocRow>,
}

/// In-memory documents: the test harness types rows the way a human would and
/// the agent writes derived cells back through the trait.
#[derive(Default)]
pub struct MemDocProvider {
    docs: Mutex<BTreeMap<String, MemDoc>>,
}

impl MemDocProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_doc(&self, doc_id: &str, display_name: &str) {
        self.docs.lock().unwrap().entry(doc_id.to_string()).or_insert_with(|| MemDoc {
            display_name: display_name.to_string(),
            rows: Vec::new(),
        });
    }

    /// A human types a new command row; returns its row index.
    pub fn type_row(&self, doc_id: &str, text: &str) -> i64 {
        let mut docs = self.docs.lock().unwrap();
        let doc = docs.entry(doc_id.to_string()).or_default();
        let row_index = doc.rows.len() as i64;
        doc.rows.push(DocRow { row_index, text: text.to_string(), ..DocRow::default() });
        row_index
    }

    /// A human edits an existing row's text cell.
    pub fn edit_row_text(&self, doc_id: &str, row_index: i64, text: &str) {
        let mut docs = self.docs.lock().unwrap();
        if let Some(doc) = docs.get_mut(doc_id) {
            if let Some(row) = doc.rows.get_mut(row_index as usize) {
                row.text = text.to_string();
            }
        }
    }

    /// Snapshot of one row for assertions.
    pub fn row(&self, doc_id: &str, row_index: i64) -> Option<DocRow> {
        self.docs
            .lock()
            .unwrap()
            .get(doc_id)
            .and_then(|d| d.rows.get(row_index as usize))
            .cloned()
    }

    pub fn row_count(&self, doc_id: &str) -> usize {
        self.docs.lock().unwrap().get(doc_id).map(|d| d.rows.len()).unwrap_or(0)
    }
}

#[async_trait]
impl DocProvider for MemDocProvider {
    async fn list_docs(&self) -> BackendResult<Vec<DocHandle>> {
        Ok(self
            .docs
            .lock()
            .unwrap()
            .iter()
            .map(|(doc_id, d)| DocHandle {
                doc_id: doc_id.clone(),
                display_name: d.display_name.clone(),
            })
            .collect())
    }

    async fn read_rows(&self, doc_id: &str) -> BackendResult<Vec<DocRow>> {
        self.docs
            .lock()
            .unwrap()
            .get(doc_id)
            .map(|d| d.rows.clone())
            .ok_or_else(|| upstream(&format!("unknown document {doc_id}")))
    }

    async fn write_cells(
        &self,
        doc_id: &str,
        row_index: i64,
        patch: &DocCellPatch,
    ) -> BackendResult<()> {
        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .get_mut(doc_id)
            .ok_or_else(|| upstream(&format!("unknown document {doc_id}")))?;
        let row = doc
            .rows
            .get_mut(row_index as usize)
            .ok_or_else(|| upstream(&format!("row {row_index} out of range")))?;

        if let Some(v) = &patch.id {
            row.id = v.clone();
        }
        if let Some(v) = &patch.status {
            row.status = v.clone();
        }
        if let Some(v) = &patch.approval_url {
            row.approval_url = v.clone();
        }
        if let Some(v) = &patch.result {
            row.result = v.clone();
        }
        if let Some(v) = &patch.error {
            row.error = v.clone();
        }
        Ok(())
    }

    async fn append_row(&self, doc_id: &str, row: &DocRow) -> BackendResult<()> {
        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .get_mut(doc_id)
            .ok_or_else(|| upstream(&format!("unknown document {doc_id}")))?;
        let mut row = row.clone();
        row.row_index = doc.rows.len() as i64;
        doc.rows.push(row);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wallet bridge, vault, verifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct PaperWalletBridge {
    seq: AtomicU64,
    requests: Mutex<Vec<String>>,
}

impl PaperWalletBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl WalletBridge for PaperWalletBridge {
    async fn request(&self, method: &str, _payload: &Value) -> BackendResult<Value> {
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(method.to_string());
        Ok(json!({ "txId": format!("paper-wc-{n}") }))
    }

    async fn connect(&self, uri: &str) -> BackendResult<String> {
        self.requests.lock().unwrap().push(format!("connect {uri}"));
        Ok(format!("connected to {uri}"))
    }
}

#[derive(Default)]
pub struct PaperVault;

impl PaperVault {
    pub fn new() -> Self {
        Self
    }
}

const PAPER_BLOB_PREFIX: &str = "paper-enc:";

#[async_trait]
impl SecretVault for PaperVault {
    async fn generate_wallet(&self, doc_id: &str) -> BackendResult<WalletMaterial> {
        let digest = hex::encode(Sha256::digest(doc_id.as_bytes()));
        Ok(WalletMaterial {
            evm_address: format!("0x{}", &digest[..40]),
            sui_address: format!("0x{digest}"),
            secret_blob: format!("{PAPER_BLOB_PREFIX}{doc_id}"),
        })
    }

    async fn decrypt_wallet(&self, doc_id: &str, blob: &str) -> BackendResult<WalletKeys> {
        if blob != format!("{PAPER_BLOB_PREFIX}{doc_id}") {
            return Err(upstream("cannot decrypt wallet blob"));
        }
        Ok(WalletKeys {
            evm_private_key: format!("paper-evm-key-{doc_id}"),
            sui_private_key: format!("paper-sui-key-{doc_id}"),
        })
    }
}

/// Accepts exactly the signature produced by [`paper_signature`]. Tests and
/// paper mode "sign" challenges with that helper.
#[derive(Default)]
pub struct PaperVerifier;

impl PaperVerifier {
    pub fn new() -> Self {
        Self
    }
}

pub fn paper_signature(address: &str, message: &str) -> String {
    hex::encode(Sha256::digest(format!("{address}|{message}").as_bytes()))
}

#[async_trait]
impl SignatureVerifier for PaperVerifier {
    async fn verify(&self, address: &str, message: &str, signature: &str) -> BackendResult<bool> {
        Ok(signature == paper_signature(address, message))
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// All paper back-ends plus typed handles for test assertions.
pub struct PaperWorld {
    pub orderbook: Arc<PaperOrderBook>,
    pub native_rail: Arc<PaperNativeRail>,
    pub managed_rail: Arc<PaperManagedRail>,
    pub channel: Arc<PaperChannel>,
    pub resolver: Arc<StaticPolicyResolver>,
    pub docs: Arc<MemDocProvider>,
    pub wallet_bridge: Arc<PaperWalletBridge>,
    pub vault: Arc<PaperVault>,
    pub verifier: Arc<PaperVerifier>,
}

impl Default for PaperWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperWorld {
    pub fn new() -> Self {
        Self {
            orderbook: Arc::new(PaperOrderBook::new()),
            native_rail: Arc::new(PaperNativeRail::new()),
            managed_rail: Arc::new(PaperManagedRail::new()),
            channel: Arc::new(PaperChannel::new()),
            resolver: Arc::new(StaticPolicyResolver::new()),
            docs: Arc::new(MemDocProvider::new()),
            wallet_bridge: Arc::new(PaperWalletBridge::new()),
            vault: Arc::new(PaperVault::new()),
            verifier: Arc::new(PaperVerifier::new()),
        }
    }

    /// Bundle with every optional back-end enabled.
    pub fn backends(&self) -> Backends {
        Backends {
            orderbook: self.orderbook.clone(),
            native_rail: self.native_rail.clone(),
            managed_rail: Some(self.managed_rail.clone()),
            channel: Some(self.channel.clone()),
            resolver: self.resolver.clone(),
            docs: self.docs.clone(),
            wallet_bridge: self.wallet_bridge.clone(),
            vault: self.vault.clone(),
            verifier: self.verifier.clone(),
        }
    }

    /// Bundle without the state-channel and managed-wallet back-ends.
    pub fn backends_minimal(&self) -> Backends {
        Backends {
            channel: None,
            managed_rail: None,
            ..self.backends()
        }
    }
}
