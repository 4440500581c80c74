use serde::{Deserialize, Serialize};

/// Declarative policy document evaluated against every command.
///
/// Every field is optional; absence means "no constraint". The JSON shape is
/// camelCase because policies arrive from ENS text records and the document
/// config table in that form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Policy {
    pub max_notional_usdc: Option<f64>,
    pub max_single_tx_usdc: Option<f64>,
    pub daily_limit_usdc: Option<f64>,
    pub allowed_pairs: Option<Vec<String>>,
    pub payout_allowlist: Option<Vec<String>>,
    pub deny_commands: Option<Vec<String>>,
    pub allowed_chains: Option<Vec<String>>,
    pub scheduling_allowed: Option<bool>,
    pub max_schedule_interval_hours: Option<i64>,
    pub bridge_allowed: Option<bool>,
}
