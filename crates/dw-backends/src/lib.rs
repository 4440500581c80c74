//! Back-end capability contracts.
//!
//! The agent core never speaks a chain protocol itself: every external
//! effect goes through one of these traits, provided to the process at
//! startup. Implementations live elsewhere (paper implementations in
//! `dw-backend-paper`; real SDK wrappers outside this repository's core).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use dw_schemas::{
    Balances, ChannelSessionInfo, DocCellPatch, DocHandle, DocRow, GasCheck, MidQuote, OpenOrder,
    OrderAck, ParsedCommand, PayoutReceipt, Policy, Side, TransferReceipt, WalletKeys,
    WalletMaterial,
};

/// Protocol label of the state-channel back-end, stored opaquely.
pub const CHANNEL_PROTOCOL: &str = "NitroRPC/0.4";

/// Upper bound on any single back-end RPC. A timeout is a normal error and
/// fails the in-flight command; it never wedges a loop.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("upstream timeout after {0:?}")]
    Timeout(Duration),
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("backend not configured: {0}")]
    NotConfigured(&'static str),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Wrap a back-end future with the standard RPC timeout.
pub async fn with_rpc_timeout<T>(
    fut: impl std::future::Future<Output = BackendResult<T>>,
) -> BackendResult<T> {
    match tokio::time::timeout(RPC_TIMEOUT, fut).await {
        Ok(res) => res,
        Err(_) => Err(BackendError::Timeout(RPC_TIMEOUT)),
    }
}

// ---------------------------------------------------------------------------
// Order book
// ---------------------------------------------------------------------------

#[async_trait]
pub trait OrderBook: Send + Sync {
    /// Execute an order-book command (limit orders, cancel, settle).
    async fn execute(
        &self,
        cmd: &ParsedCommand,
        wallet: &WalletKeys,
        pool_key: &str,
        mgr_id: Option<&str>,
    ) -> BackendResult<OrderAck>;

    async fn open_orders(&self, pool_key: &str, mgr_id: &str) -> BackendResult<Vec<OpenOrder>>;

    async fn balances(&self, address: &str) -> BackendResult<Balances>;

    async fn deposit(&self, wallet: &WalletKeys, coin: &str, amount: f64)
        -> BackendResult<OrderAck>;

    async fn withdraw(
        &self,
        wallet: &WalletKeys,
        coin: &str,
        amount: f64,
    ) -> BackendResult<OrderAck>;

    async fn place_market(
        &self,
        wallet: &WalletKeys,
        pool_key: &str,
        side: Side,
        qty: f64,
    ) -> BackendResult<OrderAck>;

    async fn mid_price(&self, pool_key: &str) -> BackendResult<MidQuote>;

    async fn check_gas(&self, address: &str) -> BackendResult<GasCheck>;
}

// ---------------------------------------------------------------------------
// Payment rails
// ---------------------------------------------------------------------------

/// Direct on-chain USDC transfer with a document-held key.
#[async_trait]
pub trait NativeRail: Send + Sync {
    async fn transfer_usdc(
        &self,
        private_key: &str,
        to: &str,
        amount: f64,
    ) -> BackendResult<TransferReceipt>;
}

/// Custodial wallet provider: payouts and bridging by wallet id.
#[async_trait]
pub trait ManagedRail: Send + Sync {
    async fn ensure_wallet(&self, doc_id: &str) -> BackendResult<String>;

    async fn payout(&self, wallet_id: &str, to: &str, amount: f64)
        -> BackendResult<PayoutReceipt>;

    async fn bridge(
        &self,
        wallet_id: &str,
        to: &str,
        amount: f64,
        from_chain: &str,
        to_chain: &str,
    ) -> BackendResult<PayoutReceipt>;
}

// ---------------------------------------------------------------------------
// State channel
// ---------------------------------------------------------------------------

#[async_trait]
pub trait StateChannel: Send + Sync {
    async fn auth_request(&self, address: &str) -> BackendResult<String>;

    async fn auth_verify(&self, address: &str, signature: &str) -> BackendResult<String>;

    async fn create_app_session(
        &self,
        doc_id: &str,
        participants: &[String],
    ) -> BackendResult<ChannelSessionInfo>;

    /// Submit a co-signed state transition; returns the new session version.
    async fn submit_app_state(
        &self,
        session_id: &str,
        payload: &Value,
        cosigners: &[String],
    ) -> BackendResult<i64>;

    async fn close_app_session(&self, session_id: &str) -> BackendResult<()>;

    async fn get_session_status(&self, session_id: &str) -> BackendResult<ChannelSessionInfo>;
}

// ---------------------------------------------------------------------------
// Policy resolver, document provider, wallet bridge, vault, verifier
// ---------------------------------------------------------------------------

/// Resolves a named policy (ENS text record). Implementations cache with a
/// TTL; `None` means the name has no policy record.
#[async_trait]
pub trait PolicyResolver: Send + Sync {
    async fn get_policy(&self, ens_name: &str) -> BackendResult<Option<Policy>>;
}

/// The shared-document surface, treated opaquely: row reads, derived-cell
/// writes, and appends. Row indices are stable within one read snapshot.
#[async_trait]
pub trait DocProvider: Send + Sync {
    async fn list_docs(&self) -> BackendResult<Vec<DocHandle>>;

    async fn read_rows(&self, doc_id: &str) -> BackendResult<Vec<DocRow>>;

    async fn write_cells(
        &self,
        doc_id: &str,
        row_index: i64,
        patch: &DocCellPatch,
    ) -> BackendResult<()>;

    async fn append_row(&self, doc_id: &str, row: &DocRow) -> BackendResult<()>;
}

/// Bridge-wallet RPC surface behind TX / SIGN / CONNECT commands.
#[async_trait]
pub trait WalletBridge: Send + Sync {
    async fn request(&self, method: &str, payload: &Value) -> BackendResult<Value>;

    async fn connect(&self, uri: &str) -> BackendResult<String>;
}

/// Key generation and at-rest encryption. The core only ever sees the
/// encrypted blob and, transiently inside one dispatch, the decrypted keys.
#[async_trait]
pub trait SecretVault: Send + Sync {
    async fn generate_wallet(&self, doc_id: &str) -> BackendResult<WalletMaterial>;

    async fn decrypt_wallet(&self, doc_id: &str, blob: &str) -> BackendResult<WalletKeys>;
}

/// Verifies a signer's signature over a join challenge.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(&self, address: &str, message: &str, signature: &str) -> BackendResult<bool>;
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// Everything the loops and the HTTP surface need, wired once at startup.
/// Optional slots are back-ends that may be disabled by configuration.
#[derive(Clone)]
pub struct Backends {
    pub orderbook: Arc<dyn OrderBook>,
    pub native_rail: Arc<dyn NativeRail>,
    pub managed_rail: Option<Arc<dyn ManagedRail>>,
    pub channel: Option<Arc<dyn StateChannel>>,
    pub resolver: Arc<dyn PolicyResolver>,
    pub docs: Arc<dyn DocProvider>,
    pub wallet_bridge: Arc<dyn WalletBridge>,
    pub vault: Arc<dyn SecretVault>,
    pub verifier: Arc<dyn SignatureVerifier>,
}
