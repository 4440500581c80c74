//! Natural-language fallback recogniser.
//!
//! Handles the short free-text intents people actually type into a shared
//! document. A match returns the canonical command; a match with bad
//! parameters returns the parse error (the row was clearly meant as a
//! command). `None` means the text is not a command at all.

use dw_schemas::ParsedCommand;

use crate::{parse_address, parse_positive_number, ParseResult};

pub(crate) fn recognize(text: &str) -> Option<ParseResult> {
    if text.starts_with("wc:") {
        return Some(Ok(ParsedCommand::Connect {
            uri: text.to_string(),
        }));
    }

    let toks: Vec<&str> = text.split_whitespace().collect();
    let lower: Vec<String> = toks.iter().map(|t| t.to_ascii_lowercase()).collect();
    let lower_refs: Vec<&str> = lower.iter().map(String::as_str).collect();

    match lower_refs.as_slice() {
        // buy 50 SUI at 1.02  /  buy 50 SUI
        ["buy", qty, base, at, price] if is_at(at) => Some(limit(true, base, qty, price)),
        ["buy", qty, base] => Some(market(true, base, qty)),
        ["sell", qty, base, at, price] if is_at(at) => Some(limit(false, base, qty, price)),
        ["sell", qty, base] => Some(market(false, base, qty)),

        // send 25 USDC to 0x…
        ["send", amount, "usdc", "to", _] => Some(payout(amount, toks[4])),

        // bridge 25 USDC from base to arbitrum
        ["bridge", amount, "usdc", "from", from, "to", to] => Some(bridge(amount, from, to)),

        // cancel ord-77 (id verbatim)
        ["cancel", _] => Some(Ok(ParsedCommand::Cancel {
            order_id: toks[1].to_string(),
        })),

        // stop loss 10 @ 0.80  /  take profit 10 @ 1.50 (base defaults to SUI)
        ["stop", "loss", qty, at, price] if is_at(at) => Some(conditional(true, qty, price)),
        ["take", "profit", qty, at, price] if is_at(at) => Some(conditional(false, qty, price)),

        _ => None,
    }
}

fn is_at(tok: &str) -> bool {
    tok == "at" || tok == "@"
}

fn limit(buy: bool, base: &str, qty: &str, price: &str) -> ParseResult {
    let base = base.to_ascii_uppercase();
    let qty = parse_positive_number(qty, "qty")?;
    let price = parse_positive_number(price, "price")?;
    let quote = "USDC".to_string();
    Ok(if buy {
        ParsedCommand::LimitBuy { base, qty, quote, price }
    } else {
        ParsedCommand::LimitSell { base, qty, quote, price }
    })
}

fn market(buy: bool, base: &str, qty: &str) -> ParseResult {
    let base = base.to_ascii_uppercase();
    let qty = parse_positive_number(qty, "qty")?;
    Ok(if buy {
        ParsedCommand::MarketBuy { base, qty }
    } else {
        ParsedCommand::MarketSell { base, qty }
    })
}

fn payout(amount: &str, to: &str) -> ParseResult {
    Ok(ParsedCommand::Payout {
        amount_usdc: parse_positive_number(amount, "amount")?,
        to: parse_address(to)?,
    })
}

fn bridge(amount: &str, from: &str, to: &str) -> ParseResult {
    // Reuse the canonical chain validation by round-tripping the text.
    crate::parse(&format!("BRIDGE {amount} USDC FROM {from} TO {to}"))
}

fn conditional(stop: bool, qty: &str, price: &str) -> ParseResult {
    let qty = parse_positive_number(qty, "qty")?;
    let trigger_price = parse_positive_number(price, "trigger")?;
    let base = "SUI".to_string();
    Ok(if stop {
        ParsedCommand::StopLoss { base, qty, trigger_price }
    } else {
        ParsedCommand::TakeProfit { base, qty, trigger_price }
    })
}
