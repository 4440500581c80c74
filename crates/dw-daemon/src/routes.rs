//! Axum router and all HTTP handlers for dw-daemon.
//!
//! `build_router` is the single entry point; `main.rs` attaches middleware
//! after it so the scenario tests can drive the bare router. Status code
//! conventions: 400 malformed, 401 not signed in, 404 unknown doc/cmd,
//! 409 illegal transition or missing precondition, 410 expired challenge,
//! 502 upstream failure.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use dw_approval::{ApprovalError, DecisionRequest};
use dw_schemas::{CommandStatus, Decision};
use dw_store::AuthSessionRow;

use crate::{
    api_types::*,
    state::{now_ms, AppState, Challenge, AUTH_SESSION_TTL_MS, CHALLENGE_TTL_MS},
};

const SESSION_COOKIE: &str = "dw_session";

const APPROVALS_TOTAL_KEY: &str = "metrics_approvals_total";
const TXS_AVOIDED_KEY: &str = "metrics_onchain_txs_avoided";
const LAST_APPROVAL_KEY: &str = "metrics_last_approval_text";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/join/start", post(join_start))
        .route("/api/join/finish", post(join_finish))
        .route("/api/cmd/decision", post(cmd_decision))
        .route("/api/activity/:doc_id", get(activity))
        .route("/api/cmd/:doc_id/:cmd_id", get(cmd_status))
        .route("/api/metrics/:doc_id", get(metrics))
        .with_state(state)
}

fn err(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: msg.into() })).into_response()
}

// ---------------------------------------------------------------------------
// GET /api/health
// ---------------------------------------------------------------------------

pub(crate) async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: "dw-daemon",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /api/join/start
// ---------------------------------------------------------------------------

/// Issue a join challenge. Basic mode returns a plain challenge string;
/// yellow mode (state channel configured) returns an EIP-712-shaped typed
/// data challenge. Both carry an opaque join token.
pub(crate) async fn join_start(
    State(st): State<Arc<AppState>>,
    Json(body): Json<JoinStartRequest>,
) -> Response {
    if dw_parser::parse_address(&body.address).is_err() {
        return err(StatusCode::BAD_REQUEST, format!("invalid address {}", body.address));
    }
    if body.weight < 1 {
        return err(StatusCode::BAD_REQUEST, "weight must be >= 1");
    }
    match dw_store::get_document(&st.pool, &body.doc_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return err(StatusCode::NOT_FOUND, format!("unknown document {}", body.doc_id)),
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
    }

    let now = now_ms();
    let nonce = Uuid::new_v4().to_string();
    let message = format!(
        "DocWarden join\ndoc: {}\naddress: {}\nweight: {}\nnonce: {nonce}",
        body.doc_id, body.address, body.weight
    );
    let mode = st.approval_mode();
    let token = Uuid::new_v4().to_string();

    let challenge = Challenge {
        doc_id: body.doc_id.clone(),
        address: body.address.clone(),
        weight: body.weight,
        message: message.clone(),
        mode,
        issued_at_ms: now,
    };

    {
        let mut challenges = st.challenges.lock().await;
        challenges.retain(|_, c| now - c.issued_at_ms < CHALLENGE_TTL_MS);
        // Basic mode finishes by (docId, address); index under both keys.
        challenges.insert(basic_key(&body.doc_id, &body.address), challenge.clone());
        challenges.insert(token.clone(), challenge);
    }

    let (challenge_str, typed_data) = match mode {
        "yellow" => (
            None,
            Some(json!({
                "domain": { "name": "DocWarden", "version": "1" },
                "primaryType": "Join",
                "message": { "doc": body.doc_id, "address": body.address, "nonce": nonce },
            })),
        ),
        _ => (Some(message), None),
    };

    (
        StatusCode::OK,
        Json(JoinStartResponse { mode, challenge: challenge_str, typed_data, join_token: token }),
    )
        .into_response()
}

fn basic_key(doc_id: &str, address: &str) -> String {
    format!("{doc_id}|{address}")
}

// ---------------------------------------------------------------------------
// POST /api/join/finish
// ---------------------------------------------------------------------------

/// Verify the signature over the challenge, register the signer, and set the
/// session cookie.
pub(crate) async fn join_finish(
    State(st): State<Arc<AppState>>,
    Json(body): Json<JoinFinishRequest>,
) -> Response {
    let key = match (&body.join_token, &body.doc_id, &body.address) {
        (Some(token), _, _) => token.clone(),
        (None, Some(doc_id), Some(address)) => basic_key(doc_id, address),
        _ => return err(StatusCode::BAD_REQUEST, "joinToken or docId+address required"),
    };

    let now = now_ms();
    let challenge = {
        let mut challenges = st.challenges.lock().await;
        match challenges.get(&key).cloned() {
            Some(c) if now - c.issued_at_ms < CHALLENGE_TTL_MS => {
                // One-shot: consume both index entries.
                challenges.remove(&basic_key(&c.doc_id, &c.address));
                challenges.remove(&key);
                c
            }
            _ => return err(StatusCode::GONE, "challenge expired or unknown"),
        }
    };

    match st.backends.verifier.verify(&challenge.address, &challenge.message, &body.signature).await
    {
        Ok(true) => {}
        Ok(false) => return err(StatusCode::UNAUTHORIZED, "signature verification failed"),
        Err(e) => return err(StatusCode::BAD_GATEWAY, format!("verifier failed: {e}")),
    }

    if let Err(e) =
        dw_store::upsert_signer(&st.pool, &challenge.doc_id, &challenge.address, challenge.weight)
            .await
    {
        return err(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"));
    }

    let token = Uuid::new_v4().to_string();
    let session = AuthSessionRow {
        token: token.clone(),
        doc_id: challenge.doc_id.clone(),
        address: challenge.address.clone(),
        expires_at: now + AUTH_SESSION_TTL_MS,
    };
    if let Err(e) = dw_store::insert_auth_session(&st.pool, &session).await {
        return err(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"));
    }

    info!(doc_id = %challenge.doc_id, address = %challenge.address, "signer joined");

    let mut headers = HeaderMap::new();
    if let Ok(v) = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax").parse() {
        headers.insert(header::SET_COOKIE, v);
    }
    (
        StatusCode::OK,
        headers,
        Json(JoinFinishResponse {
            ok: true,
            doc_id: challenge.doc_id,
            address: challenge.address,
            weight: challenge.weight,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /api/cmd/decision
// ---------------------------------------------------------------------------

pub(crate) async fn cmd_decision(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<DecisionRequestBody>,
) -> Response {
    let now = now_ms();

    let Some(token) = cookie_value(&headers, SESSION_COOKIE) else {
        return err(StatusCode::UNAUTHORIZED, "not signed in");
    };
    let session = match dw_store::get_auth_session(&st.pool, &token, now).await {
        Ok(Some(s)) => s,
        Ok(None) => return err(StatusCode::UNAUTHORIZED, "session expired; sign in again"),
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
    };
    if session.doc_id != body.doc_id {
        return err(StatusCode::UNAUTHORIZED, "not signed in for this document");
    }

    let Some(decision) = Decision::parse(body.decision.trim().to_ascii_uppercase().as_str())
    else {
        return err(StatusCode::BAD_REQUEST, "decision must be APPROVE or REJECT");
    };

    let req = DecisionRequest {
        doc_id: body.doc_id.clone(),
        cmd_id: body.cmd_id.clone(),
        signer_address: session.address.clone(),
        decision,
    };

    let outcome = match dw_approval::record_decision(&st.pool, &st.backends, &st.audit, &req, now)
        .await
    {
        Ok(outcome) => outcome,
        Err(ApprovalError::NotFound(msg)) => return err(StatusCode::NOT_FOUND, msg),
        Err(ApprovalError::Conflict(msg)) => return err(StatusCode::CONFLICT, msg),
        Err(ApprovalError::Upstream(msg)) => return err(StatusCode::BAD_GATEWAY, msg),
        Err(ApprovalError::Store(e)) => {
            return err(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
        }
    };

    // Metrics + document projection are best-effort; the store transition
    // already happened.
    let _ = dw_store::increment_counter(&st.pool, &body.doc_id, APPROVALS_TOTAL_KEY, 1).await;
    if outcome.channel_version.is_some() {
        let _ = dw_store::increment_counter(&st.pool, &body.doc_id, TXS_AVOIDED_KEY, 1).await;
    }
    if outcome.status != CommandStatus::PendingApproval {
        if let Ok(Some(cmd)) = dw_store::get_command(&st.pool, &body.cmd_id).await {
            if outcome.status == CommandStatus::Approved {
                let _ = dw_store::set_doc_config(
                    &st.pool,
                    &body.doc_id,
                    LAST_APPROVAL_KEY,
                    &cmd.raw_text,
                )
                .await;
            }
            let _ = dw_docsync::project_command(
                st.backends.docs.as_ref(),
                &body.doc_id,
                &body.cmd_id,
                outcome.status,
                cmd.result.as_deref(),
                cmd.error.as_deref(),
            )
            .await;
        }
    }

    (
        StatusCode::OK,
        Json(DecisionResponse {
            status: outcome.status.as_str().to_string(),
            approved_weight: outcome.approved_weight,
            quorum: outcome.quorum,
            channel_version: outcome.channel_version,
        }),
    )
        .into_response()
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|part| {
        let (k, v) = part.trim().split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

// ---------------------------------------------------------------------------
// GET /api/activity/:doc_id
// ---------------------------------------------------------------------------

pub(crate) async fn activity(
    State(st): State<Arc<AppState>>,
    Path(doc_id): Path<String>,
) -> Response {
    match dw_store::get_document(&st.pool, &doc_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return err(StatusCode::NOT_FOUND, format!("unknown document {doc_id}")),
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
    }

    let commands = match dw_store::list_recent_commands(&st.pool, &doc_id, 20).await {
        Ok(rows) => rows,
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
    };

    let views = commands
        .into_iter()
        .map(|c| CommandView {
            cmd_id: c.cmd_id,
            text: c.raw_text,
            status: c.status.as_str().to_string(),
            result: c.result,
            error: c.error,
            created_at: c.created_at,
            updated_at: c.updated_at,
        })
        .collect();

    (StatusCode::OK, Json(ActivityResponse { doc_id, commands: views })).into_response()
}

// ---------------------------------------------------------------------------
// GET /api/cmd/:doc_id/:cmd_id
// ---------------------------------------------------------------------------

pub(crate) async fn cmd_status(
    State(st): State<Arc<AppState>>,
    Path((doc_id, cmd_id)): Path<(String, String)>,
) -> Response {
    let cmd = match dw_store::get_command(&st.pool, &cmd_id).await {
        Ok(Some(c)) if c.doc_id == doc_id => c,
        Ok(_) => return err(StatusCode::NOT_FOUND, format!("unknown command {cmd_id}")),
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
    };

    let approvals = match dw_store::list_approvals(&st.pool, &cmd_id).await {
        Ok(rows) => rows,
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
    };
    let approved_weight = dw_store::approved_weight(&st.pool, &doc_id, &cmd_id)
        .await
        .unwrap_or(0);
    let quorum = dw_store::get_quorum(&st.pool, &doc_id).await.unwrap_or(1);

    (
        StatusCode::OK,
        Json(CmdStatusResponse {
            cmd_id,
            status: cmd.status.as_str().to_string(),
            approvals: approvals
                .into_iter()
                .map(|a| ApprovalView {
                    signer: a.signer_address,
                    decision: a.decision.as_str().to_string(),
                    at: a.at,
                })
                .collect(),
            approved_weight,
            quorum,
            approval_mode: st.approval_mode(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /api/metrics/:doc_id
// ---------------------------------------------------------------------------

pub(crate) async fn metrics(
    State(st): State<Arc<AppState>>,
    Path(doc_id): Path<String>,
) -> Response {
    match dw_store::get_document(&st.pool, &doc_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return err(StatusCode::NOT_FOUND, format!("unknown document {doc_id}")),
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
    }

    let approvals_total =
        dw_store::get_counter(&st.pool, &doc_id, APPROVALS_TOTAL_KEY).await.unwrap_or(0);
    let onchain_txs_avoided =
        dw_store::get_counter(&st.pool, &doc_id, TXS_AVOIDED_KEY).await.unwrap_or(0);
    let last_approval_text =
        dw_store::get_doc_config(&st.pool, &doc_id, LAST_APPROVAL_KEY).await.unwrap_or(None);

    (
        StatusCode::OK,
        Json(MetricsResponse { doc_id, approvals_total, onchain_txs_avoided, last_approval_text }),
    )
        .into_response()
}
