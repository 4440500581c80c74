//! End-to-end HTTP flow against the bare router: join handshake, cookie
//! session, decision endpoint, activity and metrics reads.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use dw_backend_paper::{paper_signature, PaperWorld};
use dw_daemon::{routes, state::AppState};
use dw_schemas::{CommandStatus, ParsedCommand};
use dw_store::NewCommand;

const SIGNER: &str = "0x00000000000000000000000000000000000000a1";

struct Harness {
    app: Router,
    pool: dw_store::SqlitePool,
    _world: PaperWorld,
}

async fn harness() -> anyhow::Result<Harness> {
    let pool = dw_store::memory_store().await?;
    dw_store::upsert_document(&pool, "doc-1", "Treasury").await?;

    let world = PaperWorld::new();
    let backends = world.backends_minimal();
    let config = dw_config::from_map(&Default::default())?;
    let audit_path = tempfile::tempdir()?.into_path().join("audit.jsonl");
    let audit = Arc::new(Mutex::new(dw_audit::AuditWriter::new(audit_path, false)?));

    let state = Arc::new(AppState::new(pool.clone(), backends, config, audit));
    Ok(Harness { app: routes::build_router(state), pool, _world: world })
}

async fn post(app: &Router, uri: &str, body: Value, cookie: Option<&str>) -> (StatusCode, Value, Option<String>) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let resp = app
        .clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    let status = resp.status();
    let set_cookie = resp
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(';').next().unwrap_or("").to_string());
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() { json!(null) } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value, set_cookie)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let resp = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn join(app: &Router) -> String {
    let (status, start, _) = post(
        app,
        "/api/join/start",
        json!({ "docId": "doc-1", "address": SIGNER, "weight": 1 }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(start["mode"], "basic");
    let challenge = start["challenge"].as_str().unwrap().to_string();

    let (status, finish, cookie) = post(
        app,
        "/api/join/finish",
        json!({
            "joinToken": start["joinToken"],
            "signature": paper_signature(SIGNER, &challenge),
        }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(finish["ok"], true);
    cookie.expect("join/finish must set the session cookie")
}

#[tokio::test]
async fn health_is_ok() -> anyhow::Result<()> {
    let h = harness().await?;
    let (status, body) = get(&h.app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    Ok(())
}

#[tokio::test]
async fn join_validates_inputs() -> anyhow::Result<()> {
    let h = harness().await?;

    let (status, _, _) = post(
        &h.app,
        "/api/join/start",
        json!({ "docId": "doc-1", "address": "not-an-address", "weight": 1 }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = post(
        &h.app,
        "/api/join/start",
        json!({ "docId": "doc-unknown", "address": SIGNER, "weight": 1 }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn bad_signature_is_401_and_reused_challenge_is_410() -> anyhow::Result<()> {
    let h = harness().await?;

    let (_, start, _) = post(
        &h.app,
        "/api/join/start",
        json!({ "docId": "doc-1", "address": SIGNER, "weight": 1 }),
        None,
    )
    .await;

    let (status, _, _) = post(
        &h.app,
        "/api/join/finish",
        json!({ "joinToken": start["joinToken"], "signature": "garbage" }),
        None,
    )
    .await;
    // The bad attempt consumed nothing server-side? It did: one-shot tokens.
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = post(
        &h.app,
        "/api/join/finish",
        json!({ "joinToken": start["joinToken"], "signature": "garbage" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
    Ok(())
}

#[tokio::test]
async fn decision_flow_approves_and_counts() -> anyhow::Result<()> {
    let h = harness().await?;

    dw_store::insert_command(
        &h.pool,
        &NewCommand {
            cmd_id: "c1".into(),
            doc_id: "doc-1".into(),
            raw_text: "DW LIMIT_BUY SUI 50 USDC @ 1.02".into(),
            parsed: Some(ParsedCommand::LimitBuy {
                base: "SUI".into(),
                qty: 50.0,
                quote: "USDC".into(),
                price: 1.02,
            }),
            status: CommandStatus::PendingApproval,
            error: None,
        },
        1_000,
    )
    .await?;

    // No cookie: 401.
    let decision_body = json!({ "docId": "doc-1", "cmdId": "c1", "decision": "APPROVE" });
    let (status, _, _) = post(&h.app, "/api/cmd/decision", decision_body.clone(), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let cookie = join(&h.app).await;

    // Quorum defaults to 1, so one approval lands the command at APPROVED.
    let (status, body, _) =
        post(&h.app, "/api/cmd/decision", decision_body.clone(), Some(&cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "APPROVED");
    assert_eq!(body["approvedWeight"], 1);
    assert_eq!(body["quorum"], 1);

    // A second decision hits a non-pending command.
    let (status, body, _) = post(&h.app, "/api/cmd/decision", decision_body, Some(&cookie)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("APPROVED"));

    // Unknown command: 404.
    let (status, _, _) = post(
        &h.app,
        "/api/cmd/decision",
        json!({ "docId": "doc-1", "cmdId": "nope", "decision": "APPROVE" }),
        Some(&cookie),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Malformed decision: 400.
    let (status, _, _) = post(
        &h.app,
        "/api/cmd/decision",
        json!({ "docId": "doc-1", "cmdId": "c1", "decision": "MAYBE" }),
        Some(&cookie),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = get(&h.app, "/api/activity/doc-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["commands"][0]["status"], "APPROVED");

    let (status, body) = get(&h.app, "/api/cmd/doc-1/c1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "APPROVED");
    assert_eq!(body["approvalMode"], "basic");

    let (status, body) = get(&h.app, "/api/metrics/doc-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["approvalsTotal"], 1);
    assert_eq!(body["onchainTxsAvoided"], 0);
    assert_eq!(body["lastApprovalText"], "DW LIMIT_BUY SUI 50 USDC @ 1.02");
    Ok(())
}
