//! Shared harness for the end-to-end scenario tests.
//!
//! `TestWorld` wires an in-memory store, the paper back-ends, and one
//! instance of every loop component, with a fixed injectable clock — the
//! tests drive ticks by hand and never sleep.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use tempfile::TempDir;

use dw_audit::AuditWriter;
use dw_automation::{Advisor, AdvisorConfig, BalancesLoop, PriceOracle, Scheduler};
use dw_backend_paper::PaperWorld;
use dw_backends::{Backends, SecretVault};
use dw_docsync::{DocSync, SyncConfig};
use dw_executor::Executor;
use dw_schemas::Decision;
use dw_store::{CommandRow, SqlitePool};

pub const BASE_URL: &str = "http://localhost:8787";
pub const POOL_KEY: &str = "SUI_USDC";

pub struct TestWorld {
    pub pool: SqlitePool,
    pub world: PaperWorld,
    pub backends: Backends,
    pub docsync: DocSync,
    pub executor: Executor,
    pub scheduler: Scheduler,
    pub oracle: PriceOracle,
    pub balances: BalancesLoop,
    pub advisor: Advisor,
    pub audit: Arc<Mutex<AuditWriter>>,
    _audit_dir: TempDir,
}

impl TestWorld {
    /// Path of the JSONL audit log for content assertions.
    pub fn audit_path(&self) -> std::path::PathBuf {
        self._audit_dir.path().join("audit.jsonl")
    }
}

impl TestWorld {
    /// Harness without the optional back-ends (no channel, no managed rail).
    pub async fn minimal() -> Result<Self> {
        Self::build(false).await
    }

    /// Harness with every back-end enabled.
    pub async fn full() -> Result<Self> {
        Self::build(true).await
    }

    async fn build(full: bool) -> Result<Self> {
        let pool = dw_store::memory_store().await?;
        let world = PaperWorld::new();
        let backends = if full { world.backends() } else { world.backends_minimal() };

        let audit_dir = tempfile::tempdir()?;
        let audit = Arc::new(Mutex::new(AuditWriter::new(
            audit_dir.path().join("audit.jsonl"),
            false,
        )?));

        let docsync = DocSync::new(
            pool.clone(),
            world.docs.clone(),
            world.resolver.clone(),
            SyncConfig { public_base_url: BASE_URL.to_string(), cell_approvals: false },
        );
        let executor =
            Executor::new(pool.clone(), backends.clone(), audit.clone(), POOL_KEY.to_string());
        let scheduler = Scheduler::new(pool.clone(), world.docs.clone(), audit.clone());
        let oracle =
            PriceOracle::new(pool.clone(), backends.clone(), audit.clone(), POOL_KEY.to_string());
        let balances = BalancesLoop::new(pool.clone(), backends.clone());
        let advisor =
            Advisor::new(pool.clone(), backends.clone(), audit.clone(), AdvisorConfig::default());

        Ok(Self {
            pool,
            world,
            backends,
            docsync,
            executor,
            scheduler,
            oracle,
            balances,
            advisor,
            audit,
            _audit_dir: audit_dir,
        })
    }

    /// Register a document with both the provider and the store.
    pub async fn add_doc(&self, doc_id: &str) -> Result<()> {
        self.world.docs.add_doc(doc_id, "Treasury");
        dw_store::upsert_document(&self.pool, doc_id, "Treasury").await?;
        Ok(())
    }

    /// The stored command behind a document row, if any.
    pub async fn cmd_at_row(&self, doc_id: &str, row_index: i64) -> Result<Option<CommandRow>> {
        let Some(row) = self.world.docs.row(doc_id, row_index) else { return Ok(None) };
        let Some(id) = row.id else { return Ok(None) };
        dw_store::get_command(&self.pool, &id).await
    }

    /// Record an APPROVE decision through the coordinator.
    pub async fn approve(
        &self,
        doc_id: &str,
        cmd_id: &str,
        signer: &str,
        now_ms: i64,
    ) -> Result<dw_approval::DecisionOutcome, dw_approval::ApprovalError> {
        dw_approval::record_decision(
            &self.pool,
            &self.backends,
            &self.audit,
            &dw_approval::DecisionRequest {
                doc_id: doc_id.to_string(),
                cmd_id: cmd_id.to_string(),
                signer_address: signer.to_string(),
                decision: Decision::Approve,
            },
            now_ms,
        )
        .await
    }

    /// Provision the document wallet the way SETUP would.
    pub async fn provision_wallet(&self, doc_id: &str) -> Result<()> {
        let material = self.world.vault.generate_wallet(doc_id).await.unwrap();
        dw_store::set_doc_secrets(&self.pool, doc_id, &material.secret_blob).await?;
        dw_store::set_document_addresses(
            &self.pool,
            doc_id,
            &material.evm_address,
            &material.sui_address,
        )
        .await?;
        dw_store::set_doc_config(&self.pool, doc_id, "evm_address", &material.evm_address).await?;
        dw_store::set_doc_config(&self.pool, doc_id, "sui_address", &material.sui_address).await?;
        Ok(())
    }
}
