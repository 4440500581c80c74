//! Cell-level approval is an opt-in shortcut for effectively single-signer
//! documents: typing APPROVED into the status cell transitions a pending
//! command directly. Multi-signer docs never honour it.

use dw_docsync::{DocSync, SyncConfig};
use dw_schemas::CommandStatus;
use dw_testkit::TestWorld;

const S1: &str = "0x00000000000000000000000000000000000000a1";
const S2: &str = "0x00000000000000000000000000000000000000b2";

fn cell_sync(w: &TestWorld) -> DocSync {
    DocSync::new(
        w.pool.clone(),
        w.world.docs.clone(),
        w.world.resolver.clone(),
        SyncConfig { public_base_url: dw_testkit::BASE_URL.to_string(), cell_approvals: true },
    )
}

async fn type_status_cell(w: &TestWorld, row: i64, value: &str) {
    use dw_backends::DocProvider;
    w.world
        .docs
        .write_cells(
            "doc-1",
            row,
            &dw_schemas::DocCellPatch {
                status: Some(Some(value.to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    // A status-cell edit alone does not move the digest; nudge the text
    // projection the way a human leaving a note would.
    w.world.docs.type_row("doc-1", &format!("note {value} {row}"));
}

#[tokio::test]
async fn single_signer_doc_honours_the_status_cell() -> anyhow::Result<()> {
    let w = TestWorld::minimal().await?;
    w.add_doc("doc-1").await?;
    let sync = cell_sync(&w);

    let row = w.world.docs.type_row("doc-1", "DW MARKET_BUY SUI 5");
    sync.tick(1_000).await?;
    let cmd = w.cmd_at_row("doc-1", row).await?.unwrap();
    assert_eq!(cmd.status, CommandStatus::PendingApproval);

    type_status_cell(&w, row, "approved").await;
    sync.tick(2_000).await?;

    let cmd = dw_store::get_command(&w.pool, &cmd.cmd_id).await?.unwrap();
    assert_eq!(cmd.status, CommandStatus::Approved);
    Ok(())
}

#[tokio::test]
async fn cell_rejection_is_terminal() -> anyhow::Result<()> {
    let w = TestWorld::minimal().await?;
    w.add_doc("doc-1").await?;
    let sync = cell_sync(&w);

    let row = w.world.docs.type_row("doc-1", "DW MARKET_BUY SUI 5");
    sync.tick(1_000).await?;
    let cmd = w.cmd_at_row("doc-1", row).await?.unwrap();

    type_status_cell(&w, row, "REJECTED").await;
    sync.tick(2_000).await?;

    let cmd = dw_store::get_command(&w.pool, &cmd.cmd_id).await?.unwrap();
    assert_eq!(cmd.status, CommandStatus::Rejected);
    Ok(())
}

#[tokio::test]
async fn multi_signer_docs_ignore_cell_edits() -> anyhow::Result<()> {
    let w = TestWorld::minimal().await?;
    w.add_doc("doc-1").await?;
    dw_store::upsert_signer(&w.pool, "doc-1", S1, 1).await?;
    dw_store::upsert_signer(&w.pool, "doc-1", S2, 1).await?;
    dw_store::set_quorum(&w.pool, "doc-1", 2).await?;
    let sync = cell_sync(&w);

    let row = w.world.docs.type_row("doc-1", "DW MARKET_BUY SUI 5");
    sync.tick(1_000).await?;
    let cmd = w.cmd_at_row("doc-1", row).await?.unwrap();

    type_status_cell(&w, row, "APPROVED").await;
    sync.tick(2_000).await?;

    // Still pending: the agent rewrote its cell instead of obeying it.
    let cmd = dw_store::get_command(&w.pool, &cmd.cmd_id).await?.unwrap();
    assert_eq!(cmd.status, CommandStatus::PendingApproval);
    let doc_row = w.world.docs.row("doc-1", row).unwrap();
    assert_eq!(doc_row.status.as_deref(), Some("PENDING_APPROVAL"));
    Ok(())
}

#[tokio::test]
async fn default_configuration_leaves_cell_edits_inert() -> anyhow::Result<()> {
    let w = TestWorld::minimal().await?; // cell approvals off
    w.add_doc("doc-1").await?;

    let row = w.world.docs.type_row("doc-1", "DW MARKET_BUY SUI 5");
    w.docsync.tick(1_000).await?;
    let cmd = w.cmd_at_row("doc-1", row).await?.unwrap();

    type_status_cell(&w, row, "APPROVED").await;
    w.docsync.tick(2_000).await?;

    let cmd = dw_store::get_command(&w.pool, &cmd.cmd_id).await?.unwrap();
    assert_eq!(cmd.status, CommandStatus::PendingApproval);
    Ok(())
}
