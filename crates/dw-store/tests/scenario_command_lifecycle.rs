use dw_schemas::{CommandStatus, Decision, ParsedCommand};
use dw_store::NewCommand;

fn cmd(id: &str, doc: &str, status: CommandStatus) -> NewCommand {
    NewCommand {
        cmd_id: id.to_string(),
        doc_id: doc.to_string(),
        raw_text: "DW STATUS".to_string(),
        parsed: Some(ParsedCommand::Status),
        status,
        error: None,
    }
}

#[tokio::test]
async fn transition_enforces_the_state_graph() -> anyhow::Result<()> {
    let pool = dw_store::memory_store().await?;
    dw_store::upsert_document(&pool, "doc-1", "Treasury").await?;
    dw_store::insert_command(&pool, &cmd("c1", "doc-1", CommandStatus::PendingApproval), 1_000)
        .await?;

    // PENDING_APPROVAL -> EXECUTED is not an edge.
    let err = dw_store::transition_command(
        &pool,
        "c1",
        CommandStatus::Executed,
        Some("done"),
        None,
        2_000,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("illegal transition"));

    // The legal path works and stamps updated_at.
    dw_store::transition_command(&pool, "c1", CommandStatus::Approved, None, None, 2_000).await?;
    dw_store::transition_command(&pool, "c1", CommandStatus::Executing, None, None, 3_000).await?;
    dw_store::transition_command(&pool, "c1", CommandStatus::Executed, Some("ok"), None, 4_000)
        .await?;

    let row = dw_store::get_command(&pool, "c1").await?.unwrap();
    assert_eq!(row.status, CommandStatus::Executed);
    assert_eq!(row.result.as_deref(), Some("ok"));
    assert_eq!(row.updated_at, 4_000);

    // Terminal: nothing leaves EXECUTED.
    let err = dw_store::transition_command(&pool, "c1", CommandStatus::Failed, None, None, 5_000)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("illegal transition"));
    Ok(())
}

#[tokio::test]
async fn terminal_transition_clears_approvals_atomically() -> anyhow::Result<()> {
    let pool = dw_store::memory_store().await?;
    dw_store::upsert_document(&pool, "doc-1", "Treasury").await?;
    dw_store::upsert_signer(&pool, "doc-1", "0xaaa", 1).await?;
    dw_store::insert_command(&pool, &cmd("c1", "doc-1", CommandStatus::PendingApproval), 1_000)
        .await?;
    dw_store::record_approval(&pool, "doc-1", "c1", "0xaaa", Decision::Approve, 1_500).await?;
    assert_eq!(dw_store::list_approvals(&pool, "c1").await?.len(), 1);

    dw_store::transition_command(
        &pool,
        "c1",
        CommandStatus::Rejected,
        None,
        Some("rejected by 0xaaa"),
        2_000,
    )
    .await?;

    assert!(dw_store::list_approvals(&pool, "c1").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn claim_takes_the_oldest_approved_and_is_single_start() -> anyhow::Result<()> {
    let pool = dw_store::memory_store().await?;
    dw_store::upsert_document(&pool, "doc-1", "Treasury").await?;

    dw_store::insert_command(&pool, &cmd("b", "doc-1", CommandStatus::Approved), 2_000).await?;
    dw_store::insert_command(&pool, &cmd("a", "doc-1", CommandStatus::Approved), 2_000).await?;
    dw_store::insert_command(&pool, &cmd("z", "doc-1", CommandStatus::Approved), 1_000).await?;

    // Oldest created_at first; ties break lexicographically on cmd_id.
    let first = dw_store::claim_oldest_approved(&pool, 3_000).await?.unwrap();
    assert_eq!(first.cmd_id, "z");
    assert_eq!(first.status, CommandStatus::Executing);

    let second = dw_store::claim_oldest_approved(&pool, 3_001).await?.unwrap();
    assert_eq!(second.cmd_id, "a");

    // A claimed command can never be claimed again.
    let third = dw_store::claim_oldest_approved(&pool, 3_002).await?.unwrap();
    assert_eq!(third.cmd_id, "b");
    assert!(dw_store::claim_oldest_approved(&pool, 3_003).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn tx_ids_are_append_only() -> anyhow::Result<()> {
    let pool = dw_store::memory_store().await?;
    dw_store::insert_command(&pool, &cmd("c1", "doc-1", CommandStatus::Approved), 1_000).await?;

    let mut first = std::collections::BTreeMap::new();
    first.insert("evm".to_string(), "0xtx1".to_string());
    dw_store::append_tx_ids(&pool, "c1", &first, 2_000).await?;

    // A later merge cannot overwrite an existing key.
    let mut second = std::collections::BTreeMap::new();
    second.insert("evm".to_string(), "0xtx2".to_string());
    second.insert("sui".to_string(), "0xtx3".to_string());
    dw_store::append_tx_ids(&pool, "c1", &second, 3_000).await?;

    let row = dw_store::get_command(&pool, "c1").await?.unwrap();
    assert_eq!(row.tx_ids.get("evm").map(String::as_str), Some("0xtx1"));
    assert_eq!(row.tx_ids.get("sui").map(String::as_str), Some("0xtx3"));
    Ok(())
}
