//! Resolution of the policy that governs a document.
//!
//! Precedence: ENS-published policy (when the doc has `policy_ens` and the
//! resolver returns a record) over the locally stored policy JSON over the
//! unconstrained default. Ingest and the executor's pre-dispatch re-check
//! both call this, so the two gates always agree on the source.

use anyhow::{Context, Result};
use tracing::warn;

use dw_backends::PolicyResolver;
use dw_schemas::Policy;
use dw_store::SqlitePool;

/// doc_config key holding a locally stored policy document.
pub const POLICY_JSON_KEY: &str = "policy_json";
/// doc_config key recording where the active policy came from ("ENS" after a
/// POLICY_ENS command executes).
pub const POLICY_SOURCE_KEY: &str = "policy_source";

pub async fn effective_policy(
    pool: &SqlitePool,
    resolver: &dyn PolicyResolver,
    doc_id: &str,
) -> Result<Policy> {
    if let Some(doc) = dw_store::get_document(pool, doc_id).await? {
        if let Some(ens) = &doc.policy_ens {
            match resolver.get_policy(ens).await {
                Ok(Some(policy)) => return Ok(policy),
                Ok(None) => {}
                // A resolver outage falls back to the stored policy rather
                // than leaving the document ungoverned.
                Err(e) => warn!(doc_id, ens, "policy resolver failed: {e}"),
            }
        }
    }

    if let Some(json) = dw_store::get_doc_config(pool, doc_id, POLICY_JSON_KEY).await? {
        let policy: Policy =
            serde_json::from_str(&json).context("stored policy_json is corrupt")?;
        return Ok(policy);
    }

    Ok(Policy::default())
}
