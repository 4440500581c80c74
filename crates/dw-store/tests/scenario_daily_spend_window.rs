use dw_schemas::{CommandStatus, ParsedCommand};
use dw_store::{NewCommand, DAY_MS};

const A1: &str = "0x00000000000000000000000000000000000000a1";

async fn executed_payout(
    pool: &dw_store::SqlitePool,
    id: &str,
    amount: f64,
    at_ms: i64,
) -> anyhow::Result<()> {
    dw_store::insert_command(
        pool,
        &NewCommand {
            cmd_id: id.to_string(),
            doc_id: "doc-1".to_string(),
            raw_text: format!("DW PAYOUT {amount} USDC TO {A1}"),
            parsed: Some(ParsedCommand::Payout { amount_usdc: amount, to: A1.to_string() }),
            status: CommandStatus::Approved,
            error: None,
        },
        at_ms,
    )
    .await?;
    dw_store::transition_command(pool, id, CommandStatus::Executing, None, None, at_ms).await?;
    dw_store::transition_command(pool, id, CommandStatus::Executed, Some("sent"), None, at_ms)
        .await?;
    Ok(())
}

#[tokio::test]
async fn daily_spend_sums_payout_kinds_inside_the_window() -> anyhow::Result<()> {
    let pool = dw_store::memory_store().await?;
    let now = 10 * DAY_MS;

    // In-window payouts count.
    executed_payout(&pool, "p1", 30.0, now - 1_000).await?;
    executed_payout(&pool, "p2", 50.0, now - DAY_MS + 10).await?;
    // Outside the 24h window: ignored.
    executed_payout(&pool, "p3", 500.0, now - DAY_MS - 10).await?;

    // Executed order-book commands never count toward spend.
    dw_store::insert_command(
        &pool,
        &NewCommand {
            cmd_id: "t1".to_string(),
            doc_id: "doc-1".to_string(),
            raw_text: "DW MARKET_BUY SUI 10".to_string(),
            parsed: Some(ParsedCommand::MarketBuy { base: "SUI".into(), qty: 10.0 }),
            status: CommandStatus::Approved,
            error: None,
        },
        now - 500,
    )
    .await?;
    dw_store::transition_command(&pool, "t1", CommandStatus::Executing, None, None, now - 400)
        .await?;
    dw_store::transition_command(&pool, "t1", CommandStatus::Executed, Some("ok"), None, now - 300)
        .await?;

    // Pending payouts never count either.
    dw_store::insert_command(
        &pool,
        &NewCommand {
            cmd_id: "p4".to_string(),
            doc_id: "doc-1".to_string(),
            raw_text: format!("DW PAYOUT 999 USDC TO {A1}"),
            parsed: Some(ParsedCommand::Payout { amount_usdc: 999.0, to: A1.to_string() }),
            status: CommandStatus::PendingApproval,
            error: None,
        },
        now - 200,
    )
    .await?;

    let spend = dw_store::daily_spend_usdc(&pool, "doc-1", now).await?;
    assert!((spend - 80.0).abs() < 1e-9, "expected 80, got {spend}");
    Ok(())
}

#[tokio::test]
async fn quorum_defaults_to_one_and_weights_sum() -> anyhow::Result<()> {
    let pool = dw_store::memory_store().await?;
    assert_eq!(dw_store::get_quorum(&pool, "doc-1").await?, 1);

    dw_store::set_quorum(&pool, "doc-1", 3).await?;
    assert_eq!(dw_store::get_quorum(&pool, "doc-1").await?, 3);
    assert!(dw_store::set_quorum(&pool, "doc-1", 0).await.is_err());

    dw_store::upsert_signer(&pool, "doc-1", "0xaaa", 2).await?;
    dw_store::upsert_signer(&pool, "doc-1", "0xbbb", 1).await?;
    dw_store::insert_command(
        &pool,
        &NewCommand {
            cmd_id: "c1".into(),
            doc_id: "doc-1".into(),
            raw_text: "DW STATUS".into(),
            parsed: Some(ParsedCommand::Status),
            status: CommandStatus::PendingApproval,
            error: None,
        },
        1_000,
    )
    .await?;

    dw_store::record_approval(&pool, "doc-1", "c1", "0xaaa", dw_schemas::Decision::Approve, 1_100)
        .await?;
    assert_eq!(dw_store::approved_weight(&pool, "doc-1", "c1").await?, 2);

    // A decision from an unregistered address carries no weight.
    dw_store::record_approval(&pool, "doc-1", "c1", "0xccc", dw_schemas::Decision::Approve, 1_200)
        .await?;
    assert_eq!(dw_store::approved_weight(&pool, "doc-1", "c1").await?, 2);

    // Last writer wins per signer.
    dw_store::record_approval(&pool, "doc-1", "c1", "0xaaa", dw_schemas::Decision::Reject, 1_300)
        .await?;
    assert_eq!(dw_store::approved_weight(&pool, "doc-1", "c1").await?, 0);
    Ok(())
}
