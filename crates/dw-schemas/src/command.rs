use serde::{Deserialize, Serialize};

/// The only order-book pair the agent quotes and trades today.
pub const DEFAULT_PAIR: &str = "SUI/USDC";

/// Chains a BRIDGE / REBALANCE may name. Fixed allowlist; the parser rejects
/// anything else before policy ever sees it.
pub const CHAIN_ALLOWLIST: [&str; 6] = [
    "ethereum",
    "base",
    "arbitrum",
    "optimism",
    "polygon",
    "sui",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// One recipient of a PAYOUT_SPLIT. Percentages sum to 100 (±1e-4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRecipient {
    pub address: String,
    pub pct: f64,
}

/// A command parsed from one document row.
///
/// Single sum type whose tag selects the payload shape; every match on it is
/// exhaustive. Serialized form is what lands in the `commands.parsed` column
/// (`{"kind":"PAYOUT","amountUsdc":60.0,...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ParsedCommand {
    // Control
    Setup,
    Status,
    Price,
    TradeHistory,
    SweepYield,
    Treasury,
    SessionCreate,
    SessionClose,
    SessionStatus,

    // Governance
    SignerAdd { address: String, weight: i64 },
    Quorum { n: i64 },
    PolicyEns { name: String },

    // Order book
    LimitBuy { base: String, qty: f64, quote: String, price: f64 },
    LimitSell { base: String, qty: f64, quote: String, price: f64 },
    MarketBuy { base: String, qty: f64 },
    MarketSell { base: String, qty: f64 },
    Cancel { order_id: String },
    Settle,
    Deposit { coin: String, amount: f64 },
    Withdraw { coin: String, amount: f64 },

    // Payments
    Payout { amount_usdc: f64, to: String },
    PayoutSplit { amount_usdc: f64, recipients: Vec<SplitRecipient> },

    // Cross-chain
    Bridge { amount_usdc: f64, from_chain: String, to_chain: String },
    Rebalance { amount_usdc: f64, from_chain: String, to_chain: String },

    // State channel
    YellowSend { amount_usdc: f64, to: String },

    // Automation
    Schedule { interval_hours: i64, inner: String },
    CancelSchedule { schedule_id: String },

    // Conditional
    StopLoss { base: String, qty: f64, trigger_price: f64 },
    TakeProfit { base: String, qty: f64, trigger_price: f64 },
    AlertThreshold { coin: String, below: f64 },
    AutoRebalance { enabled: bool },

    // Bridge-wallet RPC
    Tx { payload: serde_json::Value },
    Sign { payload: serde_json::Value },
    Connect { uri: String },
}

impl ParsedCommand {
    /// Every tag, in declaration order. Kept in sync by the unit test below —
    /// a new variant without a tag here fails `tags_are_exhaustive`.
    pub const ALL_TAGS: [&'static str; 34] = [
        "SETUP",
        "STATUS",
        "PRICE",
        "TRADE_HISTORY",
        "SWEEP_YIELD",
        "TREASURY",
        "SESSION_CREATE",
        "SESSION_CLOSE",
        "SESSION_STATUS",
        "SIGNER_ADD",
        "QUORUM",
        "POLICY_ENS",
        "LIMIT_BUY",
        "LIMIT_SELL",
        "MARKET_BUY",
        "MARKET_SELL",
        "CANCEL",
        "SETTLE",
        "DEPOSIT",
        "WITHDRAW",
        "PAYOUT",
        "PAYOUT_SPLIT",
        "BRIDGE",
        "REBALANCE",
        "YELLOW_SEND",
        "SCHEDULE",
        "CANCEL_SCHEDULE",
        "STOP_LOSS",
        "TAKE_PROFIT",
        "ALERT_THRESHOLD",
        "AUTO_REBALANCE",
        "TX",
        "SIGN",
        "CONNECT",
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            ParsedCommand::Setup => "SETUP",
            ParsedCommand::Status => "STATUS",
            ParsedCommand::Price => "PRICE",
            ParsedCommand::TradeHistory => "TRADE_HISTORY",
            ParsedCommand::SweepYield => "SWEEP_YIELD",
            ParsedCommand::Treasury => "TREASURY",
            ParsedCommand::SessionCreate => "SESSION_CREATE",
            ParsedCommand::SessionClose => "SESSION_CLOSE",
            ParsedCommand::SessionStatus => "SESSION_STATUS",
            ParsedCommand::SignerAdd { .. } => "SIGNER_ADD",
            ParsedCommand::Quorum { .. } => "QUORUM",
            ParsedCommand::PolicyEns { .. } => "POLICY_ENS",
            ParsedCommand::LimitBuy { .. } => "LIMIT_BUY",
            ParsedCommand::LimitSell { .. } => "LIMIT_SELL",
            ParsedCommand::MarketBuy { .. } => "MARKET_BUY",
            ParsedCommand::MarketSell { .. } => "MARKET_SELL",
            ParsedCommand::Cancel { .. } => "CANCEL",
            ParsedCommand::Settle => "SETTLE",
            ParsedCommand::Deposit { .. } => "DEPOSIT",
            ParsedCommand::Withdraw { .. } => "WITHDRAW",
            ParsedCommand::Payout { .. } => "PAYOUT",
            ParsedCommand::PayoutSplit { .. } => "PAYOUT_SPLIT",
            ParsedCommand::Bridge { .. } => "BRIDGE",
            ParsedCommand::Rebalance { .. } => "REBALANCE",
            ParsedCommand::YellowSend { .. } => "YELLOW_SEND",
            ParsedCommand::Schedule { .. } => "SCHEDULE",
            ParsedCommand::CancelSchedule { .. } => "CANCEL_SCHEDULE",
            ParsedCommand::StopLoss { .. } => "STOP_LOSS",
            ParsedCommand::TakeProfit { .. } => "TAKE_PROFIT",
            ParsedCommand::AlertThreshold { .. } => "ALERT_THRESHOLD",
            ParsedCommand::AutoRebalance { .. } => "AUTO_REBALANCE",
            ParsedCommand::Tx { .. } => "TX",
            ParsedCommand::Sign { .. } => "SIGN",
            ParsedCommand::Connect { .. } => "CONNECT",
        }
    }

    /// USDC amount for value-moving kinds; None for everything else.
    /// This is the figure the daily-spend counter and policy rule 3 operate on.
    pub fn amount_usdc(&self) -> Option<f64> {
        match self {
            ParsedCommand::Payout { amount_usdc, .. }
            | ParsedCommand::PayoutSplit { amount_usdc, .. }
            | ParsedCommand::Bridge { amount_usdc, .. }
            | ParsedCommand::Rebalance { amount_usdc, .. }
            | ParsedCommand::YellowSend { amount_usdc, .. } => Some(*amount_usdc),
            _ => None,
        }
    }

    /// `"BASE/QUOTE"` for order-book kinds (market orders quote in USDC).
    pub fn pair(&self) -> Option<String> {
        match self {
            ParsedCommand::LimitBuy { base, quote, .. }
            | ParsedCommand::LimitSell { base, quote, .. } => Some(format!("{base}/{quote}")),
            ParsedCommand::MarketBuy { base, .. }
            | ParsedCommand::MarketSell { base, .. }
            | ParsedCommand::StopLoss { base, .. }
            | ParsedCommand::TakeProfit { base, .. } => Some(format!("{base}/USDC")),
            _ => None,
        }
    }

    /// `qty × price` (limit) or `qty × trigger` (conditional) in USDC.
    /// Market orders carry no price, so no notional can be computed for them.
    pub fn notional_usdc(&self) -> Option<f64> {
        match self {
            ParsedCommand::LimitBuy { qty, price, .. }
            | ParsedCommand::LimitSell { qty, price, .. } => Some(qty * price),
            ParsedCommand::StopLoss { qty, trigger_price, .. }
            | ParsedCommand::TakeProfit { qty, trigger_price, .. } => Some(qty * trigger_price),
            _ => None,
        }
    }

    pub fn is_order_book(&self) -> bool {
        matches!(
            self,
            ParsedCommand::LimitBuy { .. }
                | ParsedCommand::LimitSell { .. }
                | ParsedCommand::MarketBuy { .. }
                | ParsedCommand::MarketSell { .. }
                | ParsedCommand::StopLoss { .. }
                | ParsedCommand::TakeProfit { .. }
        )
    }

    pub fn is_value_moving(&self) -> bool {
        self.amount_usdc().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<ParsedCommand> {
        vec![
            ParsedCommand::Setup,
            ParsedCommand::Status,
            ParsedCommand::Price,
            ParsedCommand::TradeHistory,
            ParsedCommand::SweepYield,
            ParsedCommand::Treasury,
            ParsedCommand::SessionCreate,
            ParsedCommand::SessionClose,
            ParsedCommand::SessionStatus,
            ParsedCommand::SignerAdd { address: "0x0000000000000000000000000000000000000001".into(), weight: 1 },
            ParsedCommand::Quorum { n: 2 },
            ParsedCommand::PolicyEns { name: "treasury.eth".into() },
            ParsedCommand::LimitBuy { base: "SUI".into(), qty: 50.0, quote: "USDC".into(), price: 1.02 },
            ParsedCommand::LimitSell { base: "SUI".into(), qty: 50.0, quote: "USDC".into(), price: 1.02 },
            ParsedCommand::MarketBuy { base: "SUI".into(), qty: 10.0 },
            ParsedCommand::MarketSell { base: "SUI".into(), qty: 10.0 },
            ParsedCommand::Cancel { order_id: "o-1".into() },
            ParsedCommand::Settle,
            ParsedCommand::Deposit { coin: "USDC".into(), amount: 5.0 },
            ParsedCommand::Withdraw { coin: "USDC".into(), amount: 5.0 },
            ParsedCommand::Payout { amount_usdc: 60.0, to: "0x0000000000000000000000000000000000000001".into() },
            ParsedCommand::PayoutSplit {
                amount_usdc: 100.0,
                recipients: vec![
                    SplitRecipient { address: "0x0000000000000000000000000000000000000001".into(), pct: 60.0 },
                    SplitRecipient { address: "0x0000000000000000000000000000000000000002".into(), pct: 40.0 },
                ],
            },
            ParsedCommand::Bridge { amount_usdc: 25.0, from_chain: "base".into(), to_chain: "arbitrum".into() },
            ParsedCommand::Rebalance { amount_usdc: 25.0, from_chain: "base".into(), to_chain: "arbitrum".into() },
            ParsedCommand::YellowSend { amount_usdc: 5.0, to: "0x0000000000000000000000000000000000000001".into() },
            ParsedCommand::Schedule { interval_hours: 2, inner: "LIMIT_BUY SUI 1 USDC @ 1.00".into() },
            ParsedCommand::CancelSchedule { schedule_id: "s-1".into() },
            ParsedCommand::StopLoss { base: "SUI".into(), qty: 10.0, trigger_price: 0.8 },
            ParsedCommand::TakeProfit { base: "SUI".into(), qty: 10.0, trigger_price: 1.5 },
            ParsedCommand::AlertThreshold { coin: "USDC".into(), below: 100.0 },
            ParsedCommand::AutoRebalance { enabled: true },
            ParsedCommand::Tx { payload: serde_json::json!({"to":"0x1"}) },
            ParsedCommand::Sign { payload: serde_json::json!({"msg":"hi"}) },
            ParsedCommand::Connect { uri: "wc:abc@2?relay".into() },
        ]
    }

    #[test]
    fn tags_are_exhaustive() {
        let tags: Vec<&str> = samples().iter().map(|c| c.tag()).collect();
        assert_eq!(tags.len(), ParsedCommand::ALL_TAGS.len());
        for (got, want) in tags.iter().zip(ParsedCommand::ALL_TAGS.iter()) {
            assert_eq!(got, want);
        }
    }

    #[test]
    fn serde_tag_matches_tag_method() {
        for cmd in samples() {
            let v = serde_json::to_value(&cmd).unwrap();
            assert_eq!(v["kind"].as_str().unwrap(), cmd.tag());
            let back: ParsedCommand = serde_json::from_value(v).unwrap();
            assert_eq!(back, cmd);
        }
    }

    #[test]
    fn amount_usdc_field_name_is_camel_case() {
        let v = serde_json::to_value(ParsedCommand::Payout {
            amount_usdc: 60.0,
            to: "0x0000000000000000000000000000000000000001".into(),
        })
        .unwrap();
        assert_eq!(v["amountUsdc"].as_f64(), Some(60.0));
    }

    #[test]
    fn value_moving_kinds_carry_amounts() {
        for cmd in samples() {
            match cmd.tag() {
                "PAYOUT" | "PAYOUT_SPLIT" | "BRIDGE" | "REBALANCE" | "YELLOW_SEND" => {
                    assert!(cmd.amount_usdc().is_some())
                }
                _ => assert!(cmd.amount_usdc().is_none()),
            }
        }
    }
}
