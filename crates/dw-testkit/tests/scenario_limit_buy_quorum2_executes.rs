//! A LIMIT_BUY under quorum 2 stays pending after one
//! approval, flips to APPROVED on the second, and the executor lands it at
//! EXECUTED with a non-empty result — all reflected back into the document.

use dw_schemas::CommandStatus;
use dw_testkit::TestWorld;

const S1: &str = "0x00000000000000000000000000000000000000a1";
const S2: &str = "0x00000000000000000000000000000000000000b2";

#[tokio::test]
async fn limit_buy_with_two_signers_reaches_executed() -> anyhow::Result<()> {
    let w = TestWorld::minimal().await?;
    w.add_doc("doc-1").await?;
    w.provision_wallet("doc-1").await?;
    dw_store::upsert_signer(&w.pool, "doc-1", S1, 1).await?;
    dw_store::upsert_signer(&w.pool, "doc-1", S2, 1).await?;
    dw_store::set_quorum(&w.pool, "doc-1", 2).await?;

    // A human types the command; the sync tick ingests it.
    let row = w.world.docs.type_row("doc-1", "DW LIMIT_BUY SUI 50 USDC @ 1.02");
    w.docsync.tick(1_000).await?;

    let cmd = w.cmd_at_row("doc-1", row).await?.expect("command ingested");
    assert_eq!(cmd.status, CommandStatus::PendingApproval);
    let doc_row = w.world.docs.row("doc-1", row).unwrap();
    assert_eq!(doc_row.status.as_deref(), Some("PENDING_APPROVAL"));
    assert!(doc_row.approval_url.unwrap().contains(&cmd.cmd_id));

    // First approval: still pending, progress reported.
    let first = w.approve("doc-1", &cmd.cmd_id, S1, 2_000).await.unwrap();
    assert_eq!(first.status, CommandStatus::PendingApproval);
    assert_eq!(first.approved_weight, 1);
    assert_eq!(first.quorum, 2);

    // Second approval reaches quorum.
    let second = w.approve("doc-1", &cmd.cmd_id, S2, 3_000).await.unwrap();
    assert_eq!(second.status, CommandStatus::Approved);

    // The executor claims and executes it.
    let executed = w.executor.tick(4_000).await?;
    assert_eq!(executed.as_deref(), Some(cmd.cmd_id.as_str()));

    let done = dw_store::get_command(&w.pool, &cmd.cmd_id).await?.unwrap();
    assert_eq!(done.status, CommandStatus::Executed);
    assert!(!done.result.clone().unwrap_or_default().is_empty());
    assert!(!done.tx_ids.is_empty());

    // A trade row was recorded for the order.
    let trades = dw_store::list_trades(&w.pool, "doc-1", 10).await?;
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].side, "BUY");

    // The document row shows the executed state.
    let doc_row = w.world.docs.row("doc-1", row).unwrap();
    assert_eq!(doc_row.status.as_deref(), Some("EXECUTED"));
    assert!(doc_row.result.is_some());
    Ok(())
}

#[tokio::test]
async fn executor_is_single_flight_and_fifo() -> anyhow::Result<()> {
    let w = TestWorld::minimal().await?;
    w.add_doc("doc-1").await?;
    w.provision_wallet("doc-1").await?;
    dw_store::upsert_signer(&w.pool, "doc-1", S1, 1).await?;

    let r1 = w.world.docs.type_row("doc-1", "DW MARKET_BUY SUI 5");
    let r2 = w.world.docs.type_row("doc-1", "DW MARKET_SELL SUI 3");
    w.docsync.tick(1_000).await?;

    let c1 = w.cmd_at_row("doc-1", r1).await?.unwrap();
    let c2 = w.cmd_at_row("doc-1", r2).await?.unwrap();
    w.approve("doc-1", &c1.cmd_id, S1, 2_000).await.unwrap();
    w.approve("doc-1", &c2.cmd_id, S1, 2_001).await.unwrap();

    // One tick executes exactly one command, oldest first.
    let first = w.executor.tick(3_000).await?.unwrap();
    assert_eq!(first, c1.cmd_id);
    assert_eq!(
        dw_store::get_command(&w.pool, &c2.cmd_id).await?.unwrap().status,
        CommandStatus::Approved
    );

    let second = w.executor.tick(3_001).await?.unwrap();
    assert_eq!(second, c2.cmd_id);
    assert!(w.executor.tick(3_002).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn backend_failure_lands_the_command_at_failed() -> anyhow::Result<()> {
    let w = TestWorld::minimal().await?;
    w.add_doc("doc-1").await?;
    w.provision_wallet("doc-1").await?;
    dw_store::upsert_signer(&w.pool, "doc-1", S1, 1).await?;

    let row = w.world.docs.type_row("doc-1", "DW LIMIT_SELL SUI 10 USDC @ 1.10");
    w.docsync.tick(1_000).await?;
    let cmd = w.cmd_at_row("doc-1", row).await?.unwrap();
    w.approve("doc-1", &cmd.cmd_id, S1, 2_000).await.unwrap();

    w.world.orderbook.fail_next();
    w.executor.tick(3_000).await?;

    let failed = dw_store::get_command(&w.pool, &cmd.cmd_id).await?.unwrap();
    assert_eq!(failed.status, CommandStatus::Failed);
    assert!(failed.error.unwrap().contains("injected order-book failure"));
    Ok(())
}
