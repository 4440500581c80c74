//! Balances snapshot loop.
//!
//! Caches each document's venue balances and gas headroom into doc_config so
//! the advisor (and the TREASURY summary) read a recent snapshot instead of
//! hitting the back-end on their own cadence.

use anyhow::Result;
use serde_json::json;
use tracing::{debug, warn};

use dw_backends::{with_rpc_timeout, Backends};
use dw_store::SqlitePool;

pub const BALANCES_USDC_KEY: &str = "balances_usdc";
pub const BALANCES_BASE_KEY: &str = "balances_base";
pub const BALANCES_PER_CHAIN_KEY: &str = "balances_per_chain";
pub const BALANCES_AT_KEY: &str = "balances_at";
pub const GAS_OK_KEY: &str = "gas_ok";

pub struct BalancesLoop {
    pool: SqlitePool,
    backends: Backends,
    guard: tokio::sync::Mutex<()>,
}

impl BalancesLoop {
    pub fn new(pool: SqlitePool, backends: Backends) -> Self {
        Self { pool, backends, guard: tokio::sync::Mutex::new(()) }
    }

    pub async fn tick(&self, now_ms: i64) -> Result<()> {
        let Ok(_guard) = self.guard.try_lock() else {
            debug!("balances tick still running, skipping");
            return Ok(());
        };

        for doc in dw_store::list_documents(&self.pool).await? {
            let Some(address) = doc.evm_address else { continue };

            match with_rpc_timeout(self.backends.orderbook.balances(&address)).await {
                Ok(balances) => {
                    dw_store::set_doc_config(
                        &self.pool,
                        &doc.doc_id,
                        BALANCES_USDC_KEY,
                        &balances.usdc.to_string(),
                    )
                    .await?;
                    dw_store::set_doc_config(
                        &self.pool,
                        &doc.doc_id,
                        BALANCES_BASE_KEY,
                        &balances.base_asset.to_string(),
                    )
                    .await?;
                    dw_store::set_doc_config(
                        &self.pool,
                        &doc.doc_id,
                        BALANCES_PER_CHAIN_KEY,
                        &json!(balances.per_chain_usdc).to_string(),
                    )
                    .await?;
                    dw_store::set_doc_config(
                        &self.pool,
                        &doc.doc_id,
                        BALANCES_AT_KEY,
                        &now_ms.to_string(),
                    )
                    .await?;
                }
                Err(e) => warn!(doc_id = %doc.doc_id, "balances refresh failed: {e}"),
            }

            match with_rpc_timeout(self.backends.orderbook.check_gas(&address)).await {
                Ok(gas) => {
                    dw_store::set_doc_config(
                        &self.pool,
                        &doc.doc_id,
                        GAS_OK_KEY,
                        if gas.ok { "true" } else { "false" },
                    )
                    .await?;
                }
                Err(e) => warn!(doc_id = %doc.doc_id, "gas check failed: {e}"),
            }
        }
        Ok(())
    }
}
