//! Approval coordinator: turns signer decisions into command transitions.
//!
//! Invoked synchronously by the HTTP decision endpoint — there is no loop
//! here. A command never advances past APPROVED through this path; execution
//! belongs exclusively to the executor. When a state-channel back-end is
//! configured, reaching quorum additionally submits a co-signed state
//! transition before the APPROVED transition is persisted.

use std::sync::Mutex;

use anyhow::Result;
use serde_json::json;
use tracing::info;

use dw_audit::AuditWriter;
use dw_backends::{Backends, StateChannel};
use dw_schemas::{CommandStatus, Decision, ParsedCommand};
use dw_store::SqlitePool;

/// Typed failures, mapped onto HTTP status codes by the daemon
/// (NotFound -> 404, Conflict -> 409, Upstream -> 502).
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub doc_id: String,
    pub cmd_id: String,
    pub signer_address: String,
    pub decision: Decision,
}

#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub status: CommandStatus,
    /// Approved weight at the moment of the decision (before any clearing).
    pub approved_weight: i64,
    pub quorum: i64,
    /// New channel session version when a co-signed transition was submitted.
    pub channel_version: Option<i64>,
}

pub async fn record_decision(
    pool: &SqlitePool,
    backends: &Backends,
    audit: &Mutex<AuditWriter>,
    req: &DecisionRequest,
    now_ms: i64,
) -> Result<DecisionOutcome, ApprovalError> {
    // The caller established an authenticated session; here we only require
    // that the address is actually a registered signer of this document.
    let signer = dw_store::get_signer(pool, &req.doc_id, &req.signer_address).await?;
    if signer.is_none() {
        return Err(ApprovalError::Conflict(format!(
            "{} is not a registered signer of this document",
            req.signer_address
        )));
    }

    let cmd = dw_store::get_command(pool, &req.cmd_id)
        .await?
        .filter(|c| c.doc_id == req.doc_id)
        .ok_or_else(|| ApprovalError::NotFound(format!("unknown command {}", req.cmd_id)))?;

    if cmd.status != CommandStatus::PendingApproval {
        return Err(ApprovalError::Conflict(format!(
            "command is {}, not PENDING_APPROVAL",
            cmd.status.as_str()
        )));
    }

    // Last writer wins for the same signer.
    dw_store::record_approval(
        pool,
        &req.doc_id,
        &req.cmd_id,
        &req.signer_address,
        req.decision,
        now_ms,
    )
    .await?;

    let quorum = dw_store::get_quorum(pool, &req.doc_id).await?;

    if req.decision == Decision::Reject {
        // Any single rejection is final; approvals clear with the terminal
        // transition in one store transaction.
        dw_store::transition_command(
            pool,
            &req.cmd_id,
            CommandStatus::Rejected,
            None,
            Some(&format!("rejected by {}", req.signer_address)),
            now_ms,
        )
        .await?;
        audit_event(audit, &req.doc_id, "REJECTED", &cmd.cmd_id, &req.signer_address, now_ms);
        return Ok(DecisionOutcome {
            status: CommandStatus::Rejected,
            approved_weight: 0,
            quorum,
            channel_version: None,
        });
    }

    let weight = dw_store::approved_weight(pool, &req.doc_id, &req.cmd_id).await?;
    if weight < quorum {
        audit_event(audit, &req.doc_id, "DECISION", &cmd.cmd_id, &req.signer_address, now_ms);
        return Ok(DecisionOutcome {
            status: CommandStatus::PendingApproval,
            approved_weight: weight,
            quorum,
            channel_version: None,
        });
    }

    // Quorum reached. With a channel back-end, the co-signed state
    // transition must land before APPROVED is persisted.
    let channel_version = match &backends.channel {
        Some(channel) => {
            submit_channel_transition(pool, channel.as_ref(), &cmd.parsed, req, &cmd.raw_text, now_ms)
                .await?
        }
        None => None,
    };

    dw_store::transition_command(pool, &req.cmd_id, CommandStatus::Approved, None, None, now_ms)
        .await?;
    dw_store::clear_approvals(pool, &req.cmd_id).await?;

    info!(cmd_id = %req.cmd_id, weight, quorum, "command approved");
    audit_event(audit, &req.doc_id, "APPROVED", &cmd.cmd_id, &req.signer_address, now_ms);

    Ok(DecisionOutcome {
        status: CommandStatus::Approved,
        approved_weight: weight,
        quorum,
        channel_version,
    })
}

/// Channel-side work at quorum.
///
/// SESSION_CREATE only verifies that every registered signer holds a live
/// session key (the session itself opens at execution). Every other kind
/// requires an OPEN session and submits a payload binding the command and
/// its approver set.
async fn submit_channel_transition(
    pool: &SqlitePool,
    channel: &dyn StateChannel,
    parsed: &Option<ParsedCommand>,
    req: &DecisionRequest,
    raw_text: &str,
    now_ms: i64,
) -> Result<Option<i64>, ApprovalError> {
    let is_session_create = matches!(parsed, Some(ParsedCommand::SessionCreate));

    if is_session_create {
        for signer in dw_store::list_signers(pool, &req.doc_id).await? {
            require_session_key(pool, &req.doc_id, &signer.address, now_ms).await?;
        }
        return Ok(None);
    }

    let session = dw_store::get_channel_session(pool, &req.doc_id)
        .await?
        .filter(|s| s.status == "OPEN")
        .ok_or_else(|| {
            ApprovalError::Conflict(
                "no open state-channel session for this document; run SESSION_CREATE first"
                    .to_string(),
            )
        })?;

    let approvers: Vec<String> = dw_store::list_approvals(pool, &req.cmd_id)
        .await?
        .into_iter()
        .filter(|a| a.decision == Decision::Approve)
        .map(|a| a.signer_address)
        .collect();

    let mut cosigners = Vec::with_capacity(approvers.len());
    for approver in &approvers {
        let key = require_session_key(pool, &req.doc_id, approver, now_ms).await?;
        cosigners.push(key);
    }

    let payload = json!({
        "docId": req.doc_id,
        "cmdId": req.cmd_id,
        "rawText": raw_text,
        "approvers": approvers,
        "ts": now_ms,
    });

    let version = channel
        .submit_app_state(&session.session_id, &payload, &cosigners)
        .await
        .map_err(|e| ApprovalError::Upstream(e.to_string()))?;

    dw_store::set_channel_session_version(pool, &req.doc_id, version).await?;
    Ok(Some(version))
}

async fn require_session_key(
    pool: &SqlitePool,
    doc_id: &str,
    signer_address: &str,
    now_ms: i64,
) -> Result<String, ApprovalError> {
    let key = dw_store::get_session_key(pool, doc_id, signer_address)
        .await?
        .ok_or_else(|| {
            ApprovalError::Conflict(format!("missing session key for signer {signer_address}"))
        })?;
    if key.expires_at <= now_ms {
        return Err(ApprovalError::Conflict(format!(
            "expired session key for signer {signer_address}"
        )));
    }
    Ok(key.session_key_address)
}

fn audit_event(
    audit: &Mutex<AuditWriter>,
    doc_id: &str,
    event_type: &str,
    cmd_id: &str,
    signer: &str,
    now_ms: i64,
) {
    if let Ok(mut w) = audit.lock() {
        let _ = w.append(
            doc_id,
            "approval",
            event_type,
            json!({ "cmdId": cmd_id, "signer": signer }),
            now_ms,
        );
    }
}
