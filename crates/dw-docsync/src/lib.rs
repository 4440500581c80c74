//! Document sync: the poll loop that turns a mutable Commands table into
//! durable command rows.
//!
//! Per tick and per document: read the rows, digest the user-editable
//! projection (`rowIndex:text` joined by newlines) and skip when unchanged,
//! otherwise apply one of five actions per row (ingest new, backfill derived
//! cells, re-parse an edited pending command, lock an edit past approval,
//! opt-in cell approval). Derived cells — id, status, approval_url, result,
//! error — are owned by the agent; human edits to them are silently
//! corrected on the next tick.
//!
//! The store is authoritative; the document is a projection of it.

mod policy_source;

pub use policy_source::{effective_policy, POLICY_JSON_KEY, POLICY_SOURCE_KEY};

use std::sync::Arc;

use anyhow::Result;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use dw_backends::{DocProvider, PolicyResolver};
use dw_policy::SpendContext;
use dw_schemas::{CommandStatus, DocCellPatch, DocRow, ParsedCommand, Policy};
use dw_store::{CommandRow, DocumentRow, NewCommand, SqlitePool};

/// Error written to a row whose text was edited after the command had moved
/// past approval.
pub const LOCKED_EDIT_ERROR: &str = "Command locked after approval/execution";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub public_base_url: String,
    /// Accept APPROVED/REJECTED typed into the status cell when the doc has
    /// quorum <= 1 or no registered signers.
    pub cell_approvals: bool,
}

pub struct DocSync {
    pool: SqlitePool,
    docs: Arc<dyn DocProvider>,
    resolver: Arc<dyn PolicyResolver>,
    cfg: SyncConfig,
    guard: tokio::sync::Mutex<()>,
}

impl DocSync {
    pub fn new(
        pool: SqlitePool,
        docs: Arc<dyn DocProvider>,
        resolver: Arc<dyn PolicyResolver>,
        cfg: SyncConfig,
    ) -> Self {
        Self { pool, docs, resolver, cfg, guard: tokio::sync::Mutex::new(()) }
    }

    /// One sync pass over every tracked document. Re-entrant calls are
    /// skipped, not queued; documents are processed sequentially.
    pub async fn tick(&self, now_ms: i64) -> Result<()> {
        let Ok(_guard) = self.guard.try_lock() else {
            debug!("doc sync tick still running, skipping");
            return Ok(());
        };

        // Discovery: register any documents the provider now exposes.
        match self.docs.list_docs().await {
            Ok(handles) => {
                for h in handles {
                    dw_store::upsert_document(&self.pool, &h.doc_id, &h.display_name).await?;
                }
            }
            Err(e) => warn!("document discovery failed: {e}"),
        }

        for doc in dw_store::list_documents(&self.pool).await? {
            if let Err(e) = self.sync_doc(&doc, now_ms).await {
                warn!(doc_id = %doc.doc_id, "doc sync failed: {e:#}");
            }
        }
        Ok(())
    }

    async fn sync_doc(&self, doc: &DocumentRow, now_ms: i64) -> Result<()> {
        let rows = match self.docs.read_rows(&doc.doc_id).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(doc_id = %doc.doc_id, "read_rows failed: {e}");
                return Ok(());
            }
        };

        // Digest short-circuit: identical user-editable projection means no
        // ingest work and no writes at all this tick.
        let digest = user_digest(&rows);
        if doc.last_user_hash.as_deref() == Some(digest.as_str()) {
            return Ok(());
        }

        let policy = effective_policy(&self.pool, self.resolver.as_ref(), &doc.doc_id).await?;

        for row in &rows {
            match &row.id {
                None => self.ingest_new_row(doc, row, &policy, now_ms).await?,
                Some(id) => {
                    let stored = dw_store::get_command(&self.pool, id).await?;
                    match stored {
                        Some(stored) => {
                            self.reconcile_row(doc, row, &stored, &policy, now_ms).await?
                        }
                        // An id cell the store has never seen: treat the row
                        // as new and mint a fresh id over it.
                        None => self.ingest_new_row(doc, row, &policy, now_ms).await?,
                    }
                }
            }
        }

        dw_store::set_last_user_hash(&self.pool, &doc.doc_id, &digest).await?;
        Ok(())
    }

    /// Action 1: a row without an id. Rows that are not recognisable as
    /// commands (meeting prose, headings) are left entirely alone.
    async fn ingest_new_row(
        &self,
        doc: &DocumentRow,
        row: &DocRow,
        policy: &Policy,
        now_ms: i64,
    ) -> Result<()> {
        let Some(parse_res) = dw_parser::recognize(&row.text) else {
            return Ok(());
        };

        let cmd_id = Uuid::new_v4().to_string();
        let (status, parsed, error) = match parse_res {
            Err(reason) => (CommandStatus::Invalid, None, Some(reason)),
            Ok(parsed) => {
                let spend = dw_store::daily_spend_usdc(&self.pool, &doc.doc_id, now_ms).await?;
                let verdict =
                    dw_policy::evaluate(policy, &parsed, &SpendContext { daily_spend_usdc: spend });
                match verdict.reason() {
                    Some(reason) => {
                        (CommandStatus::RejectedPolicy, Some(parsed), Some(reason.to_string()))
                    }
                    // SETUP needs no human approval: it only provisions the
                    // document's own wallets.
                    None if parsed == ParsedCommand::Setup => {
                        (CommandStatus::Approved, Some(parsed), None)
                    }
                    None => (CommandStatus::PendingApproval, Some(parsed), None),
                }
            }
        };

        dw_store::insert_command(
            &self.pool,
            &NewCommand {
                cmd_id: cmd_id.clone(),
                doc_id: doc.doc_id.clone(),
                raw_text: row.text.clone(),
                parsed,
                status,
                error: error.clone(),
            },
            now_ms,
        )
        .await?;

        let approval_url = (status == CommandStatus::PendingApproval)
            .then(|| self.approval_url(&doc.doc_id, &cmd_id));

        self.write_cells(
            &doc.doc_id,
            row.row_index,
            DocCellPatch {
                id: Some(Some(cmd_id)),
                status: Some(Some(status.as_str().to_string())),
                approval_url: Some(approval_url),
                result: Some(None),
                error: Some(error),
            },
        )
        .await;
        Ok(())
    }

    /// Actions 2–5: a row whose id is already stored.
    async fn reconcile_row(
        &self,
        doc: &DocumentRow,
        row: &DocRow,
        stored: &CommandRow,
        policy: &Policy,
        now_ms: i64,
    ) -> Result<()> {
        if row.text == stored.raw_text {
            // Action 5 first: opt-in cell approval, only while pending and
            // only for effectively single-signer documents.
            if self.cfg.cell_approvals && stored.status == CommandStatus::PendingApproval {
                if let Some(decision) = cell_decision(row) {
                    let quorum = dw_store::get_quorum(&self.pool, &doc.doc_id).await?;
                    let signers = dw_store::list_signers(&self.pool, &doc.doc_id).await?;
                    if quorum <= 1 || signers.is_empty() {
                        dw_store::transition_command(
                            &self.pool,
                            &stored.cmd_id,
                            decision,
                            None,
                            None,
                            now_ms,
                        )
                        .await?;
                        self.write_cells(
                            &doc.doc_id,
                            row.row_index,
                            DocCellPatch {
                                status: Some(Some(decision.as_str().to_string())),
                                approval_url: Some(None),
                                ..DocCellPatch::default()
                            },
                        )
                        .await;
                        return Ok(());
                    }
                }
            }

            // Action 2: text unchanged — correct any drift in the derived
            // cells (including URL backfill for docs created before the
            // approval surface existed).
            self.backfill_cells(doc, row, stored).await;
            return Ok(());
        }

        // Text changed.
        match stored.status {
            // Action 3: still before approval — re-parse and reset.
            CommandStatus::Invalid | CommandStatus::PendingApproval => {
                let parse_res = dw_parser::recognize(&row.text)
                    .unwrap_or_else(|| Err("unrecognized command".to_string()));

                let (status, parsed, error) = match parse_res {
                    Err(reason) => (CommandStatus::Invalid, None, Some(reason)),
                    Ok(parsed) => {
                        let spend =
                            dw_store::daily_spend_usdc(&self.pool, &doc.doc_id, now_ms).await?;
                        let verdict = dw_policy::evaluate(
                            policy,
                            &parsed,
                            &SpendContext { daily_spend_usdc: spend },
                        );
                        match verdict.reason() {
                            Some(reason) => (
                                CommandStatus::RejectedPolicy,
                                Some(parsed),
                                Some(reason.to_string()),
                            ),
                            None => (CommandStatus::PendingApproval, Some(parsed), None),
                        }
                    }
                };

                dw_store::update_command_text(
                    &self.pool,
                    &stored.cmd_id,
                    &row.text,
                    parsed.as_ref(),
                    status,
                    error.as_deref(),
                    now_ms,
                )
                .await?;

                let approval_url = (status == CommandStatus::PendingApproval)
                    .then(|| self.approval_url(&doc.doc_id, &stored.cmd_id));
                self.write_cells(
                    &doc.doc_id,
                    row.row_index,
                    DocCellPatch {
                        id: None,
                        status: Some(Some(status.as_str().to_string())),
                        approval_url: Some(approval_url),
                        result: Some(None),
                        error: Some(error),
                    },
                )
                .await;
            }
            // Action 4: past approval — the stored row is authoritative and
            // the edit is refused.
            _ => {
                self.write_cells(
                    &doc.doc_id,
                    row.row_index,
                    DocCellPatch {
                        status: Some(Some(stored.status.as_str().to_string())),
                        error: Some(Some(LOCKED_EDIT_ERROR.to_string())),
                        ..DocCellPatch::default()
                    },
                )
                .await;
            }
        }
        Ok(())
    }

    /// Rewrite derived cells that drifted from the store (one batch per row).
    async fn backfill_cells(&self, doc: &DocumentRow, row: &DocRow, stored: &CommandRow) {
        let want_status = Some(stored.status.as_str().to_string());
        let want_url = (stored.status == CommandStatus::PendingApproval)
            .then(|| self.approval_url(&doc.doc_id, &stored.cmd_id));

        let mut patch = DocCellPatch::default();
        if row.status != want_status {
            patch.status = Some(want_status);
        }
        if row.approval_url != want_url {
            patch.approval_url = Some(want_url);
        }
        if row.result != stored.result {
            patch.result = Some(stored.result.clone());
        }
        if row.error != stored.error {
            patch.error = Some(stored.error.clone());
        }

        if !patch.is_empty() {
            self.write_cells(&doc.doc_id, row.row_index, patch).await;
        }
    }

    async fn write_cells(&self, doc_id: &str, row_index: i64, patch: DocCellPatch) {
        if let Err(e) = self.docs.write_cells(doc_id, row_index, &patch).await {
            warn!(doc_id, row_index, "derived-cell writeback failed: {e}");
        }
    }

    fn approval_url(&self, doc_id: &str, cmd_id: &str) -> String {
        format!(
            "{}/approve/{doc_id}/{cmd_id}",
            self.cfg.public_base_url.trim_end_matches('/')
        )
    }
}

/// Project a command's current status/result/error onto its document row.
///
/// Used by the executor, scheduler and coordinator after a store transition:
/// the digest short-circuit means the sync loop will not touch an otherwise
/// unchanged document, so writers of derived state push it themselves. The
/// store stays authoritative — a failed write here is only staleness.
pub async fn project_command(
    docs: &dyn DocProvider,
    doc_id: &str,
    cmd_id: &str,
    status: CommandStatus,
    result: Option<&str>,
    error: Option<&str>,
) -> Result<()> {
    let rows = docs.read_rows(doc_id).await?;
    let Some(row) = rows.iter().find(|r| r.id.as_deref() == Some(cmd_id)) else {
        return Ok(());
    };

    let patch = DocCellPatch {
        status: Some(Some(status.as_str().to_string())),
        approval_url: (status != CommandStatus::PendingApproval).then_some(None),
        result: Some(result.map(str::to_string)),
        error: Some(error.map(str::to_string)),
        ..DocCellPatch::default()
    };
    docs.write_cells(doc_id, row.row_index, &patch).await?;
    Ok(())
}

/// A user decision typed into the status cell of a pending command.
fn cell_decision(row: &DocRow) -> Option<CommandStatus> {
    match row.status.as_deref().map(str::trim) {
        Some(s) if s.eq_ignore_ascii_case("APPROVED") => Some(CommandStatus::Approved),
        Some(s) if s.eq_ignore_ascii_case("REJECTED") => Some(CommandStatus::Rejected),
        _ => None,
    }
}

/// SHA-256 over the user-editable projection of the table.
pub fn user_digest(rows: &[DocRow]) -> String {
    let projection: Vec<String> =
        rows.iter().map(|r| format!("{}:{}", r.row_index, r.text)).collect();
    hex::encode(Sha256::digest(projection.join("\n").as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(i: i64, text: &str) -> DocRow {
        DocRow { row_index: i, text: text.to_string(), ..DocRow::default() }
    }

    #[test]
    fn digest_covers_only_user_editable_cells() {
        let a = vec![row(0, "DW STATUS"), row(1, "notes")];
        let mut b = a.clone();
        b[0].status = Some("EXECUTED".to_string());
        b[1].error = Some("x".to_string());
        // Derived cells do not move the digest…
        assert_eq!(user_digest(&a), user_digest(&b));
        // …text does.
        b[1].text = "DW PRICE".to_string();
        assert_ne!(user_digest(&a), user_digest(&b));
    }

    #[test]
    fn cell_decision_trims_and_ignores_case() {
        let mut r = row(0, "DW STATUS");
        r.status = Some("  approved ".to_string());
        assert_eq!(cell_decision(&r), Some(CommandStatus::Approved));
        r.status = Some("PENDING_APPROVAL".to_string());
        assert_eq!(cell_decision(&r), None);
    }
}
