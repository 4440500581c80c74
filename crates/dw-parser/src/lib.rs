//! Command parser: free-form document text -> [`ParsedCommand`].
//!
//! Pure functions, no IO, no state. Keywords are case-insensitive;
//! identifiers (order ids, ENS names, URIs, addresses) are preserved
//! verbatim. Errors are single human-readable strings and never panic.
//!
//! Two entry points:
//! - [`parse`] — strict: the text must be a command (canonical `DW …` form,
//!   canonical form without the `DW` prefix, or a natural-language shortcut).
//!   Used for schedule inner text and anywhere a definite answer is needed.
//! - [`recognize`] — lenient: `None` means "not a command row at all" (the
//!   document sync ignores such rows), `Some(Err)` means "clearly meant as a
//!   command but malformed" (surfaced as INVALID).

mod natural;

use dw_schemas::{ParsedCommand, SplitRecipient, CHAIN_ALLOWLIST};

pub type ParseResult = Result<ParsedCommand, String>;

/// Lenient recogniser for document rows.
pub fn recognize(text: &str) -> Option<ParseResult> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    if let Some(rest) = strip_dw_prefix(t) {
        return Some(match rest {
            "" => Err("missing command after DW".to_string()),
            rest => parse_canonical(rest),
        });
    }
    natural::recognize(t)
}

/// Strict parse. Accepts canonical text with or without the `DW` prefix and
/// the natural-language shortcuts.
pub fn parse(text: &str) -> ParseResult {
    let t = text.trim();
    if t.is_empty() {
        return Err("empty command".to_string());
    }
    let rest = strip_dw_prefix(t).unwrap_or(t);
    if rest.is_empty() {
        return Err("missing command after DW".to_string());
    }
    let keyword = first_token(rest).to_ascii_uppercase();
    if ParsedCommand::ALL_TAGS.contains(&keyword.as_str()) {
        return parse_canonical(rest);
    }
    natural::recognize(t)
        .unwrap_or_else(|| Err(format!("unrecognized command: {}", first_token(t))))
}

fn strip_dw_prefix(t: &str) -> Option<&str> {
    let (first, rest) = split_first(t);
    if first.eq_ignore_ascii_case("DW") {
        Some(rest)
    } else {
        None
    }
}

fn first_token(t: &str) -> &str {
    split_first(t).0
}

fn split_first(t: &str) -> (&str, &str) {
    match t.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim_start()),
        None => (t, ""),
    }
}

// ---------------------------------------------------------------------------
// Canonical grammar
// ---------------------------------------------------------------------------

fn parse_canonical(rest: &str) -> ParseResult {
    let (keyword_raw, after) = split_first(rest);
    let keyword = keyword_raw.to_ascii_uppercase();
    let toks: Vec<&str> = after.split_whitespace().collect();

    match keyword.as_str() {
        "SETUP" => no_args(ParsedCommand::Setup, &toks),
        "STATUS" => no_args(ParsedCommand::Status, &toks),
        "PRICE" => no_args(ParsedCommand::Price, &toks),
        "TRADE_HISTORY" => no_args(ParsedCommand::TradeHistory, &toks),
        "SWEEP_YIELD" => no_args(ParsedCommand::SweepYield, &toks),
        "TREASURY" => no_args(ParsedCommand::Treasury, &toks),
        "SESSION_CREATE" => no_args(ParsedCommand::SessionCreate, &toks),
        "SESSION_CLOSE" => no_args(ParsedCommand::SessionClose, &toks),
        "SESSION_STATUS" => no_args(ParsedCommand::SessionStatus, &toks),
        "SETTLE" => no_args(ParsedCommand::Settle, &toks),

        "SIGNER_ADD" => {
            let [address, weight] = exactly::<2>(&toks, "SIGNER_ADD address weight")?;
            Ok(ParsedCommand::SignerAdd {
                address: parse_address(address)?,
                weight: parse_positive_int(weight, "weight")?,
            })
        }
        "QUORUM" => {
            let [n] = exactly::<1>(&toks, "QUORUM n")?;
            Ok(ParsedCommand::Quorum {
                n: parse_positive_int(n, "quorum")?,
            })
        }
        "POLICY_ENS" => {
            let [name] = exactly::<1>(&toks, "POLICY_ENS name")?;
            Ok(ParsedCommand::PolicyEns {
                name: name.to_string(),
            })
        }

        "LIMIT_BUY" | "LIMIT_SELL" => {
            // LIMIT_BUY base qty quote @ price
            if toks.len() < 4 {
                return Err(format!("usage: {keyword} base qty quote @ price"));
            }
            let base = symbol(toks[0]);
            let qty = parse_positive_number(toks[1], "qty")?;
            let quote = symbol(toks[2]);
            let price = parse_at_price(&toks[3..])?;
            Ok(if keyword == "LIMIT_BUY" {
                ParsedCommand::LimitBuy { base, qty, quote, price }
            } else {
                ParsedCommand::LimitSell { base, qty, quote, price }
            })
        }
        "MARKET_BUY" | "MARKET_SELL" => {
            let [base, qty] = exactly::<2>(&toks, "MARKET_BUY base qty")?;
            let base = symbol(base);
            let qty = parse_positive_number(qty, "qty")?;
            Ok(if keyword == "MARKET_BUY" {
                ParsedCommand::MarketBuy { base, qty }
            } else {
                ParsedCommand::MarketSell { base, qty }
            })
        }
        "CANCEL" => {
            let [order_id] = exactly::<1>(&toks, "CANCEL order_id")?;
            Ok(ParsedCommand::Cancel {
                order_id: order_id.to_string(),
            })
        }
        "DEPOSIT" | "WITHDRAW" => {
            let [coin, amount] = exactly::<2>(&toks, "DEPOSIT coin amount")?;
            let coin = symbol(coin);
            let amount = parse_positive_number(amount, "amount")?;
            Ok(if keyword == "DEPOSIT" {
                ParsedCommand::Deposit { coin, amount }
            } else {
                ParsedCommand::Withdraw { coin, amount }
            })
        }

        "PAYOUT" => {
            let [amount, usdc, to, address] = exactly::<4>(&toks, "PAYOUT amount USDC TO 0x…")?;
            expect_keyword(usdc, "USDC")?;
            expect_keyword(to, "TO")?;
            Ok(ParsedCommand::Payout {
                amount_usdc: parse_positive_number(amount, "amount")?,
                to: parse_address(address)?,
            })
        }
        "PAYOUT_SPLIT" => {
            // PAYOUT_SPLIT amount USDC TO addr:pct,addr:pct
            if toks.len() < 4 {
                return Err("usage: PAYOUT_SPLIT amount USDC TO addr:pct,…".to_string());
            }
            let amount_usdc = parse_positive_number(toks[0], "amount")?;
            expect_keyword(toks[1], "USDC")?;
            expect_keyword(toks[2], "TO")?;
            let recipients = parse_split_recipients(&toks[3..].concat())?;
            Ok(ParsedCommand::PayoutSplit { amount_usdc, recipients })
        }

        "BRIDGE" => {
            let [amount, usdc, from, from_chain, to, to_chain] =
                exactly::<6>(&toks, "BRIDGE amount USDC FROM chain TO chain")?;
            expect_keyword(usdc, "USDC")?;
            expect_keyword(from, "FROM")?;
            expect_keyword(to, "TO")?;
            let (from_chain, to_chain) = parse_chain_pair(from_chain, to_chain)?;
            Ok(ParsedCommand::Bridge {
                amount_usdc: parse_positive_number(amount, "amount")?,
                from_chain,
                to_chain,
            })
        }
        "REBALANCE" => {
            let [amount, from, from_chain, to, to_chain] =
                exactly::<5>(&toks, "REBALANCE amount FROM chain TO chain")?;
            expect_keyword(from, "FROM")?;
            expect_keyword(to, "TO")?;
            let (from_chain, to_chain) = parse_chain_pair(from_chain, to_chain)?;
            Ok(ParsedCommand::Rebalance {
                amount_usdc: parse_positive_number(amount, "amount")?,
                from_chain,
                to_chain,
            })
        }

        "YELLOW_SEND" => {
            let [amount, usdc, to, address] =
                exactly::<4>(&toks, "YELLOW_SEND amount USDC TO 0x…")?;
            expect_keyword(usdc, "USDC")?;
            expect_keyword(to, "TO")?;
            Ok(ParsedCommand::YellowSend {
                amount_usdc: parse_positive_number(amount, "amount")?,
                to: parse_address(address)?,
            })
        }

        "SCHEDULE" => parse_schedule(after),
        "CANCEL_SCHEDULE" => {
            let [schedule_id] = exactly::<1>(&toks, "CANCEL_SCHEDULE id")?;
            Ok(ParsedCommand::CancelSchedule {
                schedule_id: schedule_id.to_string(),
            })
        }

        "STOP_LOSS" | "TAKE_PROFIT" => {
            // STOP_LOSS base qty @ trigger
            if toks.len() < 3 {
                return Err(format!("usage: {keyword} base qty @ trigger"));
            }
            let base = symbol(toks[0]);
            let qty = parse_positive_number(toks[1], "qty")?;
            let trigger_price = parse_at_price(&toks[2..])?;
            Ok(if keyword == "STOP_LOSS" {
                ParsedCommand::StopLoss { base, qty, trigger_price }
            } else {
                ParsedCommand::TakeProfit { base, qty, trigger_price }
            })
        }
        "ALERT_THRESHOLD" => {
            let [coin, below] = exactly::<2>(&toks, "ALERT_THRESHOLD coin below")?;
            Ok(ParsedCommand::AlertThreshold {
                coin: symbol(coin),
                below: parse_positive_number(below, "threshold")?,
            })
        }
        "AUTO_REBALANCE" => {
            let [flag] = exactly::<1>(&toks, "AUTO_REBALANCE on|off")?;
            match flag.to_ascii_lowercase().as_str() {
                "on" => Ok(ParsedCommand::AutoRebalance { enabled: true }),
                "off" => Ok(ParsedCommand::AutoRebalance { enabled: false }),
                other => Err(format!("AUTO_REBALANCE expects on|off, got {other}")),
            }
        }

        "TX" | "SIGN" => {
            if after.is_empty() {
                return Err(format!("{keyword} expects a JSON payload"));
            }
            let payload: serde_json::Value = serde_json::from_str(after)
                .map_err(|e| format!("{keyword} payload is not valid JSON: {e}"))?;
            Ok(if keyword == "TX" {
                ParsedCommand::Tx { payload }
            } else {
                ParsedCommand::Sign { payload }
            })
        }
        "CONNECT" => {
            if after.is_empty() {
                return Err("CONNECT expects a URI".to_string());
            }
            Ok(ParsedCommand::Connect {
                uri: after.to_string(),
            })
        }

        other => Err(format!("unknown command {other}")),
    }
}

/// `SCHEDULE EVERY Nh: <inner>` — the inner text must itself parse to a
/// non-schedule command; schedules cannot nest.
fn parse_schedule(after: &str) -> ParseResult {
    let (every, rest) = split_first(after);
    if !every.eq_ignore_ascii_case("EVERY") {
        return Err("usage: SCHEDULE EVERY Nh: <command>".to_string());
    }
    let Some((spec, inner)) = rest.split_once(':') else {
        return Err("SCHEDULE expects ':' after the interval".to_string());
    };
    let spec = spec.trim();
    let interval_hours = match spec.strip_suffix(['h', 'H']) {
        Some(n) => parse_positive_int(n, "interval hours")?,
        None => return Err(format!("interval must look like 2h, got {spec}")),
    };
    let inner = inner.trim();
    if inner.is_empty() {
        return Err("SCHEDULE expects an inner command after ':'".to_string());
    }
    let inner_cmd = parse(inner).map_err(|e| format!("inner command: {e}"))?;
    if matches!(
        inner_cmd,
        ParsedCommand::Schedule { .. } | ParsedCommand::CancelSchedule { .. }
    ) {
        return Err("schedules cannot nest".to_string());
    }
    Ok(ParsedCommand::Schedule {
        interval_hours,
        inner: inner.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Token helpers
// ---------------------------------------------------------------------------

fn no_args(cmd: ParsedCommand, toks: &[&str]) -> ParseResult {
    if toks.is_empty() {
        Ok(cmd)
    } else {
        Err(format!("{} takes no arguments", cmd.tag()))
    }
}

fn exactly<'a, const N: usize>(toks: &[&'a str], usage: &str) -> Result<[&'a str; N], String> {
    <[&str; N]>::try_from(toks.to_vec()).map_err(|_| format!("usage: {usage}"))
}

fn expect_keyword(tok: &str, want: &str) -> Result<(), String> {
    if tok.eq_ignore_ascii_case(want) {
        Ok(())
    } else {
        Err(format!("expected {want}, got {tok}"))
    }
}

fn symbol(tok: &str) -> String {
    tok.to_ascii_uppercase()
}

/// `@ 1.02` or `@1.02`, as the tail tokens of an order line.
fn parse_at_price(toks: &[&str]) -> Result<f64, String> {
    match toks {
        ["@", price] => parse_positive_number(price, "price"),
        [one] => match one.strip_prefix('@') {
            Some(price) => parse_positive_number(price, "price"),
            None => Err(format!("expected @ price, got {one}")),
        },
        _ => Err("expected @ price".to_string()),
    }
}

/// Strictly positive finite real.
pub fn parse_positive_number(tok: &str, what: &str) -> Result<f64, String> {
    let n: f64 = tok
        .parse()
        .map_err(|_| format!("{what} must be a number, got {tok}"))?;
    if !n.is_finite() || n <= 0.0 {
        return Err(format!("{what} must be a positive number, got {tok}"));
    }
    Ok(n)
}

/// Strictly positive integer; fractions, zero, and signs are rejected.
pub fn parse_positive_int(tok: &str, what: &str) -> Result<i64, String> {
    if tok.is_empty() || !tok.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("{what} must be a positive integer, got {tok}"));
    }
    let n: i64 = tok
        .parse()
        .map_err(|_| format!("{what} is out of range: {tok}"))?;
    if n == 0 {
        return Err(format!("{what} must be a positive integer, got {tok}"));
    }
    Ok(n)
}

/// `0x` + 40 hex chars, preserved verbatim (checksums are not enforced here).
pub fn parse_address(tok: &str) -> Result<String, String> {
    let hex = tok
        .strip_prefix("0x")
        .ok_or_else(|| format!("invalid address {tok}"))?;
    if hex.len() == 40 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(tok.to_string())
    } else {
        Err(format!("invalid address {tok}"))
    }
}

fn parse_chain(tok: &str) -> Result<String, String> {
    let chain = tok.to_ascii_lowercase();
    if CHAIN_ALLOWLIST.contains(&chain.as_str()) {
        Ok(chain)
    } else {
        Err(format!(
            "unknown chain {tok} (allowed: {})",
            CHAIN_ALLOWLIST.join(", ")
        ))
    }
}

fn parse_chain_pair(from: &str, to: &str) -> Result<(String, String), String> {
    let from = parse_chain(from)?;
    let to = parse_chain(to)?;
    if from == to {
        return Err("source and destination chains must differ".to_string());
    }
    Ok((from, to))
}

/// `addr:pct,addr:pct,…` — at least two recipients, percentages strictly
/// positive and summing to 100 within 1e-4.
fn parse_split_recipients(joined: &str) -> Result<Vec<SplitRecipient>, String> {
    let mut recipients = Vec::new();
    for part in joined.split(',').filter(|p| !p.is_empty()) {
        let Some((addr, pct)) = part.split_once(':') else {
            return Err(format!("recipient must be addr:pct, got {part}"));
        };
        recipients.push(SplitRecipient {
            address: parse_address(addr)?,
            pct: parse_positive_number(pct, "pct")?,
        });
    }
    if recipients.len() < 2 {
        return Err("PAYOUT_SPLIT needs at least 2 recipients".to_string());
    }
    let sum: f64 = recipients.iter().map(|r| r.pct).sum();
    if (sum - 100.0).abs() > 1e-4 {
        return Err(format!("recipient percentages must sum to 100, got {sum}"));
    }
    Ok(recipients)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(text: &str) -> ParsedCommand {
        parse(text).unwrap_or_else(|e| panic!("parse({text:?}) failed: {e}"))
    }

    fn err(text: &str) -> String {
        parse(text).expect_err(&format!("parse({text:?}) should fail"))
    }

    const A1: &str = "0x00000000000000000000000000000000000000a1";
    const A2: &str = "0x00000000000000000000000000000000000000b2";

    #[test]
    fn canonical_limit_buy() {
        assert_eq!(
            ok("DW LIMIT_BUY SUI 50 USDC @ 1.02"),
            ParsedCommand::LimitBuy {
                base: "SUI".into(),
                qty: 50.0,
                quote: "USDC".into(),
                price: 1.02
            }
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(
            ok("dw market_sell sui 10"),
            ParsedCommand::MarketSell { base: "SUI".into(), qty: 10.0 }
        );
    }

    #[test]
    fn attached_at_price_is_accepted() {
        assert_eq!(
            ok("DW STOP_LOSS SUI 10 @0.80"),
            ParsedCommand::StopLoss { base: "SUI".into(), qty: 10.0, trigger_price: 0.8 }
        );
    }

    #[test]
    fn payout_parses_and_preserves_address_case() {
        let addr = "0x00000000000000000000000000000000000000Aa";
        assert_eq!(
            ok(&format!("DW PAYOUT 60 USDC TO {addr}")),
            ParsedCommand::Payout { amount_usdc: 60.0, to: addr.into() }
        );
    }

    #[test]
    fn quorum_boundaries() {
        assert_eq!(ok("DW QUORUM 2"), ParsedCommand::Quorum { n: 2 });
        err("DW QUORUM 0");
        err("DW QUORUM 1.5");
        err("DW QUORUM -1");
    }

    #[test]
    fn signer_weight_is_a_positive_integer() {
        err(&format!("DW SIGNER_ADD {A1} 0"));
        err(&format!("DW SIGNER_ADD {A1} 2.5"));
        assert_eq!(
            ok(&format!("DW SIGNER_ADD {A1} 3")),
            ParsedCommand::SignerAdd { address: A1.into(), weight: 3 }
        );
    }

    #[test]
    fn split_pct_tolerance() {
        let line = |p1: &str, p2: &str| format!("DW PAYOUT_SPLIT 100 USDC TO {A1}:{p1},{A2}:{p2}");
        // 100 + 0.00005 accepted
        ok(&line("60.00005", "40"));
        // 100.001 rejected
        err(&line("60.001", "40"));
        // fewer than 2 recipients rejected
        err(&format!("DW PAYOUT_SPLIT 100 USDC TO {A1}:100"));
    }

    #[test]
    fn split_recipients_with_spaces_after_commas() {
        assert!(matches!(
            ok(&format!("DW PAYOUT_SPLIT 100 USDC TO {A1}:60, {A2}:40")),
            ParsedCommand::PayoutSplit { ref recipients, .. } if recipients.len() == 2
        ));
    }

    #[test]
    fn bridge_chain_rules() {
        ok("DW BRIDGE 25 USDC FROM base TO arbitrum");
        err("DW BRIDGE 25 USDC FROM base TO base");
        err("DW BRIDGE 25 USDC FROM base TO solana");
    }

    #[test]
    fn schedule_parses_inner() {
        let cmd = ok("DW SCHEDULE EVERY 2h: LIMIT_BUY SUI 1 USDC @ 1.00");
        assert_eq!(
            cmd,
            ParsedCommand::Schedule {
                interval_hours: 2,
                inner: "LIMIT_BUY SUI 1 USDC @ 1.00".into()
            }
        );
    }

    #[test]
    fn schedule_boundaries() {
        err("DW SCHEDULE EVERY 0h: LIMIT_BUY SUI 1 USDC @ 1.00");
        err("DW SCHEDULE EVERY 2h: SCHEDULE EVERY 1h: STATUS");
        err("DW SCHEDULE EVERY 2h: CANCEL_SCHEDULE abc");
        err("DW SCHEDULE EVERY 2h LIMIT_BUY SUI 1 USDC @ 1.00");
        err("DW SCHEDULE EVERY 2h: not a command");
    }

    #[test]
    fn tx_payload_must_be_json() {
        assert!(matches!(
            ok(r#"DW TX {"to":"0x1","value":"0"}"#),
            ParsedCommand::Tx { .. }
        ));
        err("DW TX not json");
    }

    #[test]
    fn connect_preserves_uri_verbatim() {
        let uri = "wc:94caf3…@2?relay-protocol=irn&symKey=AbC";
        assert_eq!(ok(&format!("DW CONNECT {uri}")), ParsedCommand::Connect { uri: uri.into() });
    }

    #[test]
    fn zero_and_negative_amounts_are_rejected() {
        err(&format!("DW PAYOUT 0 USDC TO {A1}"));
        err(&format!("DW PAYOUT -5 USDC TO {A1}"));
        err(&format!("DW PAYOUT NaN USDC TO {A1}"));
        err("DW MARKET_BUY SUI 0");
    }

    #[test]
    fn recognize_ignores_plain_prose() {
        assert!(recognize("meeting notes from tuesday").is_none());
        assert!(recognize("").is_none());
        assert!(recognize("   ").is_none());
    }

    #[test]
    fn recognize_flags_malformed_canonical_rows() {
        // Clearly meant as a command, but malformed -> Some(Err), not None.
        assert!(matches!(recognize("DW QUORUM zero"), Some(Err(_))));
        assert!(matches!(recognize("DW FROBNICATE 1"), Some(Err(_))));
    }

    #[test]
    fn natural_language_shortcuts() {
        assert_eq!(
            ok("buy 50 SUI at 1.02"),
            ParsedCommand::LimitBuy {
                base: "SUI".into(),
                qty: 50.0,
                quote: "USDC".into(),
                price: 1.02
            }
        );
        assert_eq!(ok("sell 10 sui"), ParsedCommand::MarketSell { base: "SUI".into(), qty: 10.0 });
        assert_eq!(
            ok(&format!("send 25 usdc to {A1}")),
            ParsedCommand::Payout { amount_usdc: 25.0, to: A1.into() }
        );
        assert_eq!(
            ok("bridge 25 usdc from base to arbitrum"),
            ParsedCommand::Bridge {
                amount_usdc: 25.0,
                from_chain: "base".into(),
                to_chain: "arbitrum".into()
            }
        );
        assert_eq!(
            ok("stop loss 10 @ 0.80"),
            ParsedCommand::StopLoss { base: "SUI".into(), qty: 10.0, trigger_price: 0.8 }
        );
        assert_eq!(ok("cancel ord-77"), ParsedCommand::Cancel { order_id: "ord-77".into() });
        assert!(matches!(ok("wc:abcd1234@2?relay"), ParsedCommand::Connect { .. }));
    }

    #[test]
    fn natural_language_matched_but_invalid_is_an_error() {
        // Intent recognised, numbers bad -> error, not "not a command".
        assert!(matches!(recognize("buy -5 SUI at 1.0"), Some(Err(_))));
        assert!(matches!(recognize(&format!("send 0 usdc to {A1}")), Some(Err(_))));
    }
}
