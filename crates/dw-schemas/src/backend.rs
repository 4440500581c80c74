use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Quoted mid/bid/ask for one pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MidQuote {
    pub bid: f64,
    pub ask: f64,
    pub mid: f64,
    pub spread: f64,
}

/// Acknowledgement of an order-book operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub tx_id: String,
    pub order_id: Option<String>,
    pub mgr_id: Option<String>,
    /// Fill price when the venue reports one; callers fall back to the cached
    /// mid as a reference price otherwise.
    pub fill_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub side: String,
    pub qty: f64,
    pub price: f64,
}

/// Treasury balances as seen by the order-book venue, keyed per chain for
/// the cross-chain view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Balances {
    pub usdc: f64,
    pub base_asset: f64,
    pub per_chain_usdc: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GasCheck {
    pub ok: bool,
    pub balance: f64,
    pub min: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub tx_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutReceipt {
    pub provider_tx_id: String,
    pub tx_id: Option<String>,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSessionInfo {
    pub session_id: String,
    pub version: i64,
    pub status: String,
}

/// Freshly generated per-document wallet material. The private keys live only
/// inside `secret_blob` (already encrypted by the vault capability).
#[derive(Clone, Serialize, Deserialize)]
pub struct WalletMaterial {
    pub evm_address: String,
    pub sui_address: String,
    pub secret_blob: String,
}

impl std::fmt::Debug for WalletMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletMaterial")
            .field("evm_address", &self.evm_address)
            .field("sui_address", &self.sui_address)
            .field("secret_blob", &"<redacted>")
            .finish()
    }
}

/// Decrypted key material, materialised only for the duration of a single
/// command dispatch and never serialised or logged.
#[derive(Clone)]
pub struct WalletKeys {
    pub evm_private_key: String,
    pub sui_private_key: String,
}

impl std::fmt::Debug for WalletKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WalletKeys(<redacted>)")
    }
}
