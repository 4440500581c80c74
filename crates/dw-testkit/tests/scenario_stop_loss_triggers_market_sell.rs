//! An armed STOP_LOSS triggers when the cached mid crosses
//! its price and spawns a pre-approved MARKET_SELL child. Triggered orders
//! are final.

use dw_schemas::{CommandStatus, ParsedCommand};
use dw_testkit::TestWorld;

const S1: &str = "0x00000000000000000000000000000000000000a1";

#[tokio::test]
async fn stop_loss_triggers_below_its_price() -> anyhow::Result<()> {
    let w = TestWorld::minimal().await?;
    w.add_doc("doc-1").await?;
    w.provision_wallet("doc-1").await?;
    dw_store::upsert_signer(&w.pool, "doc-1", S1, 1).await?;

    // Arm the conditional through the normal pipeline.
    let row = w.world.docs.type_row("doc-1", "DW STOP_LOSS SUI 10 @ 0.80");
    w.docsync.tick(1_000).await?;
    let cmd = w.cmd_at_row("doc-1", row).await?.unwrap();
    w.approve("doc-1", &cmd.cmd_id, S1, 2_000).await.unwrap();
    w.executor.tick(3_000).await?;

    let orders = dw_store::list_conditional_orders(&w.pool, "doc-1").await?;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, "ACTIVE");

    // Mid above trigger: nothing happens.
    w.world.orderbook.set_quote(0.99, 1.01);
    assert!(w.oracle.tick(4_000).await?.is_empty());

    // Mid drops to 0.79: the order fires.
    w.world.orderbook.set_quote(0.78, 0.80);
    let triggered = w.oracle.tick(5_000).await?;
    assert_eq!(triggered, vec![orders[0].order_id.clone()]);

    let order = &dw_store::list_conditional_orders(&w.pool, "doc-1").await?[0];
    assert_eq!(order.status, "TRIGGERED");
    let child_id = order.triggered_cmd_id.clone().expect("spawned child recorded");

    let child = dw_store::get_command(&w.pool, &child_id).await?.unwrap();
    assert_eq!(child.status, CommandStatus::Approved);
    assert_eq!(
        child.parsed,
        Some(ParsedCommand::MarketSell { base: "SUI".into(), qty: 10.0 })
    );
    assert!(child.raw_text.starts_with("[STOP_LOSS:"));

    // Final: further ticks at the same price do not re-arm or re-fire.
    assert!(w.oracle.tick(6_000).await?.is_empty());

    // The executor sells the position.
    w.executor.tick(7_000).await?;
    let done = dw_store::get_command(&w.pool, &child_id).await?.unwrap();
    assert_eq!(done.status, CommandStatus::Executed);
    Ok(())
}

#[tokio::test]
async fn quote_failure_keeps_the_stale_price_row() -> anyhow::Result<()> {
    let w = TestWorld::minimal().await?;
    w.add_doc("doc-1").await?;

    w.world.orderbook.set_quote(0.99, 1.01);
    w.oracle.tick(1_000).await?;
    let before = dw_store::get_price(&w.pool, "SUI/USDC").await?.unwrap();
    assert_eq!(before.at, 1_000);

    w.world.orderbook.fail_next();
    w.oracle.tick(2_000).await?;
    let after = dw_store::get_price(&w.pool, "SUI/USDC").await?.unwrap();
    assert_eq!(after.at, 1_000, "stale row must remain untouched");
    Ok(())
}

#[tokio::test]
async fn take_profit_triggers_at_or_above_its_price() -> anyhow::Result<()> {
    let w = TestWorld::minimal().await?;
    w.add_doc("doc-1").await?;

    dw_store::insert_conditional_order(
        &w.pool, "tp-1", "doc-1", "TAKE_PROFIT", "SUI", "USDC", 1.50, 4.0,
    )
    .await?;

    w.world.orderbook.set_quote(1.49, 1.51);
    let triggered = w.oracle.tick(1_000).await?;
    assert_eq!(triggered, vec!["tp-1".to_string()]);

    let order = &dw_store::list_conditional_orders(&w.pool, "doc-1").await?[0];
    let child = dw_store::get_command(&w.pool, order.triggered_cmd_id.as_ref().unwrap())
        .await?
        .unwrap();
    assert!(matches!(child.parsed, Some(ParsedCommand::MarketSell { .. })));
    Ok(())
}
