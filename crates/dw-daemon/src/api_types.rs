//! Request/response bodies for the approval HTTP surface. camelCase on the
//! wire; field names match what the approval page ships.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Join
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinStartRequest {
    pub doc_id: String,
    pub address: String,
    pub weight: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinStartResponse {
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typed_data: Option<Value>,
    pub join_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinFinishRequest {
    /// Yellow mode passes the token back; basic mode identifies the
    /// challenge by (docId, address).
    pub join_token: Option<String>,
    pub doc_id: Option<String>,
    pub address: Option<String>,
    pub signature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinFinishResponse {
    pub ok: bool,
    pub doc_id: String,
    pub address: String,
    pub weight: i64,
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequestBody {
    pub doc_id: String,
    pub cmd_id: String,
    /// APPROVE | REJECT
    pub decision: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResponse {
    pub status: String,
    pub approved_weight: i64,
    pub quorum: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_version: Option<i64>,
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandView {
    pub cmd_id: String,
    pub text: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResponse {
    pub doc_id: String,
    pub commands: Vec<CommandView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalView {
    pub signer: String,
    pub decision: String,
    pub at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CmdStatusResponse {
    pub cmd_id: String,
    pub status: String,
    pub approvals: Vec<ApprovalView>,
    pub approved_weight: i64,
    pub quorum: i64,
    pub approval_mode: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub doc_id: String,
    pub approvals_total: i64,
    pub onchain_txs_avoided: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_approval_text: Option<String>,
}
