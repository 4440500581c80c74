//! A PAYOUT that would breach the rolling daily limit is
//! rejected at ingest with a reason citing the limit; and a policy mutation
//! between approval and dispatch is caught by the executor's re-check.

use dw_schemas::{CommandStatus, ParsedCommand, Policy};
use dw_store::NewCommand;
use dw_testkit::TestWorld;

const S1: &str = "0x00000000000000000000000000000000000000a1";
const PAYEE: &str = "0x00000000000000000000000000000000000000c3";

async fn set_policy(w: &TestWorld, doc_id: &str, policy: &Policy) -> anyhow::Result<()> {
    dw_store::set_doc_config(
        &w.pool,
        doc_id,
        dw_docsync::POLICY_JSON_KEY,
        &serde_json::to_string(policy)?,
    )
    .await?;
    Ok(())
}

/// Seed an EXECUTED payout inside the 24h window so daily spend is non-zero.
async fn seed_spend(w: &TestWorld, amount: f64, at_ms: i64) -> anyhow::Result<()> {
    let id = format!("seed-{amount}-{at_ms}");
    dw_store::insert_command(
        &w.pool,
        &NewCommand {
            cmd_id: id.clone(),
            doc_id: "doc-1".into(),
            raw_text: format!("DW PAYOUT {amount} USDC TO {PAYEE}"),
            parsed: Some(ParsedCommand::Payout { amount_usdc: amount, to: PAYEE.into() }),
            status: CommandStatus::Approved,
            error: None,
        },
        at_ms,
    )
    .await?;
    dw_store::transition_command(&w.pool, &id, CommandStatus::Executing, None, None, at_ms).await?;
    dw_store::transition_command(&w.pool, &id, CommandStatus::Executed, Some("sent"), None, at_ms)
        .await?;
    Ok(())
}

#[tokio::test]
async fn daily_limit_breach_is_rejected_at_ingest() -> anyhow::Result<()> {
    let w = TestWorld::minimal().await?;
    w.add_doc("doc-1").await?;
    set_policy(&w, "doc-1", &Policy { daily_limit_usdc: Some(100.0), ..Policy::default() })
        .await?;
    seed_spend(&w, 80.0, 1_000).await?;

    let row = w.world.docs.type_row("doc-1", &format!("DW PAYOUT 60 USDC TO {PAYEE}"));
    w.docsync.tick(2_000).await?;

    let cmd = w.cmd_at_row("doc-1", row).await?.unwrap();
    assert_eq!(cmd.status, CommandStatus::RejectedPolicy);
    let reason = cmd.error.unwrap();
    assert!(reason.contains("dailyLimitUsdc=100"), "reason should cite the limit: {reason}");

    // The denial is projected into the document row.
    let doc_row = w.world.docs.row("doc-1", row).unwrap();
    assert_eq!(doc_row.status.as_deref(), Some("REJECTED_POLICY"));
    assert!(doc_row.error.unwrap().contains("dailyLimitUsdc=100"));
    Ok(())
}

#[tokio::test]
async fn a_payout_within_the_limit_is_ingested_as_pending() -> anyhow::Result<()> {
    let w = TestWorld::minimal().await?;
    w.add_doc("doc-1").await?;
    set_policy(&w, "doc-1", &Policy { daily_limit_usdc: Some(100.0), ..Policy::default() })
        .await?;
    seed_spend(&w, 80.0, 1_000).await?;

    let row = w.world.docs.type_row("doc-1", &format!("DW PAYOUT 20 USDC TO {PAYEE}"));
    w.docsync.tick(2_000).await?;
    let cmd = w.cmd_at_row("doc-1", row).await?.unwrap();
    assert_eq!(cmd.status, CommandStatus::PendingApproval);
    Ok(())
}

#[tokio::test]
async fn policy_mutation_after_approval_fails_at_dispatch() -> anyhow::Result<()> {
    let w = TestWorld::minimal().await?;
    w.add_doc("doc-1").await?;
    w.provision_wallet("doc-1").await?;
    dw_store::upsert_signer(&w.pool, "doc-1", S1, 1).await?;

    let row = w.world.docs.type_row("doc-1", &format!("DW PAYOUT 50 USDC TO {PAYEE}"));
    w.docsync.tick(1_000).await?;
    let cmd = w.cmd_at_row("doc-1", row).await?.unwrap();
    w.approve("doc-1", &cmd.cmd_id, S1, 2_000).await.unwrap();

    // Policy tightens between approval and execution.
    set_policy(&w, "doc-1", &Policy { max_single_tx_usdc: Some(10.0), ..Policy::default() })
        .await?;

    w.executor.tick(3_000).await?;
    let failed = dw_store::get_command(&w.pool, &cmd.cmd_id).await?.unwrap();
    assert_eq!(failed.status, CommandStatus::Failed);
    let reason = failed.error.unwrap();
    assert!(reason.contains("policy denied at execution"), "{reason}");
    assert!(reason.contains("maxSingleTxUsdc=10"), "{reason}");

    // Nothing was transferred.
    assert!(w.world.native_rail.transfers().is_empty());
    Ok(())
}
