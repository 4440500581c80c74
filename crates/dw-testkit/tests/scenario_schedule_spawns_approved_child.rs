//! SCHEDULE EVERY 2h spawns, two hours later, a pre-approved
//! child labelled [SCHED:<id>#1], advancing the schedule's bookkeeping.

use dw_schemas::{CommandStatus, ParsedCommand};
use dw_testkit::TestWorld;

const HOUR_MS: i64 = 3_600_000;
const S1: &str = "0x00000000000000000000000000000000000000a1";

#[tokio::test]
async fn schedule_fires_after_its_interval() -> anyhow::Result<()> {
    let w = TestWorld::minimal().await?;
    w.add_doc("doc-1").await?;
    w.provision_wallet("doc-1").await?;
    dw_store::upsert_signer(&w.pool, "doc-1", S1, 1).await?;

    // End to end: the schedule command itself goes through ingest, approval
    // and execution, which arms the schedule row.
    let row = w.world.docs.type_row("doc-1", "DW SCHEDULE EVERY 2h: LIMIT_BUY SUI 1 USDC @ 1.00");
    w.docsync.tick(0).await?;
    let cmd = w.cmd_at_row("doc-1", row).await?.unwrap();
    assert_eq!(cmd.status, CommandStatus::PendingApproval);
    w.approve("doc-1", &cmd.cmd_id, S1, 1).await.unwrap();
    w.executor.tick(2).await?;

    let schedules = dw_store::list_schedules(&w.pool, "doc-1").await?;
    assert_eq!(schedules.len(), 1);
    let schedule = &schedules[0];
    assert_eq!(schedule.status, "ACTIVE");
    assert_eq!(schedule.total_runs, 0);
    assert_eq!(schedule.next_run_at, 2 + 2 * HOUR_MS);

    // Not due yet: nothing fires.
    assert_eq!(w.scheduler.tick(HOUR_MS).await?, 0);

    // Two hours later the child appears, born APPROVED.
    let now = 2 + 2 * HOUR_MS;
    assert_eq!(w.scheduler.tick(now).await?, 1);

    let advanced = dw_store::get_schedule(&w.pool, &schedule.schedule_id).await?.unwrap();
    assert_eq!(advanced.total_runs, 1);
    assert_eq!(advanced.last_run_at, Some(now));
    assert_eq!(advanced.next_run_at, now + 2 * HOUR_MS);

    let label = format!("[SCHED:{}#1]", schedule.schedule_id);
    let children: Vec<_> = dw_store::list_recent_commands(&w.pool, "doc-1", 10)
        .await?
        .into_iter()
        .filter(|c| c.raw_text.starts_with(&label))
        .collect();
    assert_eq!(children.len(), 1);
    let child = &children[0];
    assert_eq!(child.status, CommandStatus::Approved);
    assert!(matches!(child.parsed, Some(ParsedCommand::LimitBuy { .. })));

    // The child also appears as a document row carrying its id.
    let appended = w.world.docs.row("doc-1", row + 1).unwrap();
    assert_eq!(appended.id.as_deref(), Some(child.cmd_id.as_str()));
    assert!(appended.text.starts_with(&label));

    // A late tick emits exactly one run per due schedule; no catch-up batch.
    assert_eq!(w.scheduler.tick(now + 10 * HOUR_MS).await?, 1);
    let after = dw_store::get_schedule(&w.pool, &schedule.schedule_id).await?.unwrap();
    assert_eq!(after.total_runs, 2);
    Ok(())
}

#[tokio::test]
async fn stale_inner_text_cancels_the_schedule() -> anyhow::Result<()> {
    let w = TestWorld::minimal().await?;
    w.add_doc("doc-1").await?;

    dw_store::insert_schedule(&w.pool, "sched-1", "doc-1", 1, "LIMIT_BUY SUI 1 USDC @", 0).await?;
    assert_eq!(w.scheduler.tick(2 * HOUR_MS).await?, 0);

    let schedule = dw_store::get_schedule(&w.pool, "sched-1").await?.unwrap();
    assert_eq!(schedule.status, "CANCELLED");
    Ok(())
}
