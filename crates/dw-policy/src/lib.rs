//! Declarative policy evaluation.
//!
//! `evaluate` is a pure deterministic function of (policy, command, spend
//! context). It is called twice per command: at ingest and again immediately
//! before dispatch — the second check catches policy mutation between
//! approval and execution. Rules run in a fixed order; the first failure
//! wins and its reason names the violated field and limit.

use dw_schemas::{ParsedCommand, Policy};

/// Rolling spend figures the policy needs beyond the command itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpendContext {
    /// Sum of executed PAYOUT / PAYOUT_SPLIT / BRIDGE amounts over the last
    /// 24 h (the store's daily-spend query).
    pub daily_spend_usdc: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny { reason: String },
}

impl Verdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Allow => None,
            Verdict::Deny { reason } => Some(reason),
        }
    }

    fn deny(reason: String) -> Verdict {
        Verdict::Deny { reason }
    }
}

pub fn evaluate(policy: &Policy, cmd: &ParsedCommand, ctx: &SpendContext) -> Verdict {
    // 1) Explicit command denylist.
    if let Some(denied) = &policy.deny_commands {
        if denied.iter().any(|d| d.eq_ignore_ascii_case(cmd.tag())) {
            return Verdict::deny(format!("command {} denied by denyCommands", cmd.tag()));
        }
    }

    // 2) Order-book commands: pair allowlist + notional ceiling.
    if cmd.is_order_book() {
        if let (Some(allowed), Some(pair)) = (&policy.allowed_pairs, cmd.pair()) {
            if !allowed.iter().any(|p| p.eq_ignore_ascii_case(&pair)) {
                return Verdict::deny(format!("pair {pair} not in allowedPairs"));
            }
        }
        if let (Some(max), Some(notional)) = (policy.max_notional_usdc, cmd.notional_usdc()) {
            if notional > max {
                return Verdict::deny(format!(
                    "notional {notional} exceeds maxNotionalUsdc={max}"
                ));
            }
        }
    }

    // 3) Value-moving commands: per-tx ceiling + rolling 24h limit.
    if let Some(amount) = cmd.amount_usdc() {
        if let Some(max) = policy.max_single_tx_usdc {
            if amount > max {
                return Verdict::deny(format!("amount {amount} exceeds maxSingleTxUsdc={max}"));
            }
        }
        if let Some(limit) = policy.daily_limit_usdc {
            if ctx.daily_spend_usdc + amount > limit {
                return Verdict::deny(format!(
                    "amount {amount} with {spent} already spent in 24h exceeds dailyLimitUsdc={limit}",
                    spent = ctx.daily_spend_usdc
                ));
            }
        }
    }

    // 4) Payout recipients must be allowlisted (case-insensitive).
    if let Some(allowlist) = &policy.payout_allowlist {
        let recipients: Vec<&str> = match cmd {
            ParsedCommand::Payout { to, .. } => vec![to.as_str()],
            ParsedCommand::PayoutSplit { recipients, .. } => {
                recipients.iter().map(|r| r.address.as_str()).collect()
            }
            _ => Vec::new(),
        };
        for to in recipients {
            if !allowlist.iter().any(|a| a.eq_ignore_ascii_case(to)) {
                return Verdict::deny(format!("recipient {to} not in payoutAllowlist"));
            }
        }
    }

    // 5) Chain constraints on BRIDGE / REBALANCE.
    if let ParsedCommand::Bridge { from_chain, to_chain, .. }
    | ParsedCommand::Rebalance { from_chain, to_chain, .. } = cmd
    {
        if let Some(allowed) = &policy.allowed_chains {
            for chain in [from_chain, to_chain] {
                if !allowed.iter().any(|c| c.eq_ignore_ascii_case(chain)) {
                    return Verdict::deny(format!("chain {chain} not in allowedChains"));
                }
            }
        }
        if policy.bridge_allowed == Some(false) {
            return Verdict::deny("bridging disabled by bridgeAllowed=false".to_string());
        }
    }

    // 6) Scheduling constraints.
    if let ParsedCommand::Schedule { interval_hours, .. } = cmd {
        if policy.scheduling_allowed == Some(false) {
            return Verdict::deny("scheduling disabled by schedulingAllowed=false".to_string());
        }
        if let Some(max) = policy.max_schedule_interval_hours {
            if *interval_hours > max {
                return Verdict::deny(format!(
                    "interval {interval_hours}h exceeds maxScheduleIntervalHours={max}"
                ));
            }
        }
    }

    Verdict::Allow
}

#[cfg(test)]
mod tests {
    use super::*;

    const A1: &str = "0x00000000000000000000000000000000000000a1";

    fn payout(amount: f64) -> ParsedCommand {
        ParsedCommand::Payout { amount_usdc: amount, to: A1.to_string() }
    }

    fn spent(daily_spend_usdc: f64) -> SpendContext {
        SpendContext { daily_spend_usdc }
    }

    #[test]
    fn empty_policy_allows_everything() {
        let p = Policy::default();
        assert!(evaluate(&p, &payout(1_000_000.0), &spent(0.0)).is_allow());
    }

    #[test]
    fn deny_commands_wins_first() {
        let p = Policy {
            deny_commands: Some(vec!["payout".to_string()]),
            max_single_tx_usdc: Some(1.0),
            ..Policy::default()
        };
        let v = evaluate(&p, &payout(100.0), &spent(0.0));
        assert_eq!(v.reason(), Some("command PAYOUT denied by denyCommands"));
    }

    #[test]
    fn daily_limit_counts_prior_spend() {
        let p = Policy { daily_limit_usdc: Some(100.0), ..Policy::default() };
        // 80 spent + 21 > 100 -> deny, reason cites the limit.
        let v = evaluate(&p, &payout(21.0), &spent(80.0));
        assert!(v.reason().unwrap().contains("dailyLimitUsdc=100"));
        // 80 spent + 20 = 100 -> allowed.
        assert!(evaluate(&p, &payout(20.0), &spent(80.0)).is_allow());
    }

    #[test]
    fn single_tx_ceiling() {
        let p = Policy { max_single_tx_usdc: Some(50.0), ..Policy::default() };
        assert!(evaluate(&p, &payout(50.0), &spent(0.0)).is_allow());
        assert!(!evaluate(&p, &payout(50.01), &spent(0.0)).is_allow());
    }

    #[test]
    fn notional_uses_trigger_price_for_conditionals() {
        let p = Policy { max_notional_usdc: Some(50.0), ..Policy::default() };
        let sl = ParsedCommand::StopLoss {
            base: "SUI".into(),
            qty: 100.0,
            trigger_price: 0.8,
        };
        let v = evaluate(&p, &sl, &spent(0.0));
        assert!(v.reason().unwrap().contains("maxNotionalUsdc=50"));
    }

    #[test]
    fn pair_allowlist_is_case_insensitive() {
        let p = Policy { allowed_pairs: Some(vec!["sui/usdc".to_string()]), ..Policy::default() };
        let buy = ParsedCommand::LimitBuy {
            base: "SUI".into(),
            qty: 1.0,
            quote: "USDC".into(),
            price: 1.0,
        };
        assert!(evaluate(&p, &buy, &spent(0.0)).is_allow());

        let p2 = Policy { allowed_pairs: Some(vec!["ETH/USDC".to_string()]), ..Policy::default() };
        assert!(!evaluate(&p2, &buy, &spent(0.0)).is_allow());
    }

    #[test]
    fn payout_allowlist_is_case_insensitive() {
        let p = Policy {
            payout_allowlist: Some(vec![A1.to_ascii_uppercase().replace("0X", "0x")]),
            ..Policy::default()
        };
        assert!(evaluate(&p, &payout(5.0), &spent(0.0)).is_allow());
    }

    #[test]
    fn split_checks_every_recipient() {
        let p = Policy { payout_allowlist: Some(vec![A1.to_string()]), ..Policy::default() };
        let split = ParsedCommand::PayoutSplit {
            amount_usdc: 10.0,
            recipients: vec![
                dw_schemas::SplitRecipient { address: A1.into(), pct: 50.0 },
                dw_schemas::SplitRecipient {
                    address: "0x00000000000000000000000000000000000000b2".into(),
                    pct: 50.0,
                },
            ],
        };
        assert!(!evaluate(&p, &split, &spent(0.0)).is_allow());
    }

    #[test]
    fn bridge_rules() {
        let bridge = ParsedCommand::Bridge {
            amount_usdc: 10.0,
            from_chain: "base".into(),
            to_chain: "arbitrum".into(),
        };
        let p = Policy { bridge_allowed: Some(false), ..Policy::default() };
        assert!(!evaluate(&p, &bridge, &spent(0.0)).is_allow());

        let p2 = Policy { allowed_chains: Some(vec!["base".to_string()]), ..Policy::default() };
        let v = evaluate(&p2, &bridge, &spent(0.0));
        assert!(v.reason().unwrap().contains("arbitrum"));
    }

    #[test]
    fn schedule_rules() {
        let sched = ParsedCommand::Schedule { interval_hours: 24, inner: "STATUS".into() };
        let p = Policy { scheduling_allowed: Some(false), ..Policy::default() };
        assert!(!evaluate(&p, &sched, &spent(0.0)).is_allow());

        let p2 = Policy { max_schedule_interval_hours: Some(12), ..Policy::default() };
        assert!(!evaluate(&p2, &sched, &spent(0.0)).is_allow());
        let p3 = Policy { max_schedule_interval_hours: Some(24), ..Policy::default() };
        assert!(evaluate(&p3, &sched, &spent(0.0)).is_allow());
    }

    #[test]
    fn evaluation_is_deterministic() {
        let p = Policy { daily_limit_usdc: Some(100.0), ..Policy::default() };
        let c = payout(21.0);
        let ctx = spent(80.0);
        let first = evaluate(&p, &c, &ctx);
        for _ in 0..10 {
            assert_eq!(evaluate(&p, &c, &ctx), first);
        }
    }
}
