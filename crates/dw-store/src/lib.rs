//! Durable per-document state over SQLite.
//!
//! Contract: every multi-row mutation that must agree (e.g. "transition
//! command + clear approvals") runs in one transaction; reads are
//! snapshot-consistent within a single call; no component caches mutable
//! rows across tick boundaries. Wall-clock time is always an *input*
//! (`now_ms`) so tests can fix it — the store never reaches for the clock
//! itself.
//!
//! The pool is opened with `max_connections(1)`: the single-writer property
//! holds by construction, and `sqlite::memory:` behaves identically in tests.

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
pub use sqlx::SqlitePool;

use dw_schemas::{CommandStatus, Decision, ParsedCommand};

pub const ENV_DB_URL: &str = "DW_DATABASE_URL";

/// One day in milliseconds — the rolling window of the daily-spend query.
pub const DAY_MS: i64 = 86_400_000;

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Connect using DW_DATABASE_URL.
pub async fn connect_from_env() -> Result<SqlitePool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

/// Open a single-writer pool against the given sqlite URL, creating the file
/// if necessary.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("bad sqlite url {url}"))?
        .create_if_missing(true);

    // One connection, never reaped: single-writer by construction, and an
    // in-memory database would vanish with its connection.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await
        .context("failed to connect to sqlite")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// In-memory store with migrations applied. Used by tests everywhere.
pub async fn memory_store() -> Result<SqlitePool> {
    let pool = connect("sqlite::memory:").await?;
    migrate(&pool).await?;
    Ok(pool)
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub doc_id: String,
    pub display_name: String,
    pub evm_address: Option<String>,
    pub sui_address: Option<String>,
    pub policy_ens: Option<String>,
    pub last_user_hash: Option<String>,
}

/// Register a discovered document. Existing rows keep their addresses and
/// digest; only the display name refreshes.
pub async fn upsert_document(pool: &SqlitePool, doc_id: &str, display_name: &str) -> Result<()> {
    sqlx::query(
        r#"
        insert into documents (doc_id, display_name)
        values (?1, ?2)
        on conflict (doc_id) do update set display_name = excluded.display_name
        "#,
    )
    .bind(doc_id)
    .bind(display_name)
    .execute(pool)
    .await
    .context("upsert_document failed")?;
    Ok(())
}

pub async fn get_document(pool: &SqlitePool, doc_id: &str) -> Result<Option<DocumentRow>> {
    let row = sqlx::query(
        r#"
        select doc_id, display_name, evm_address, sui_address, policy_ens, last_user_hash
        from documents where doc_id = ?1
        "#,
    )
    .bind(doc_id)
    .fetch_optional(pool)
    .await
    .context("get_document failed")?;

    row.map(|r| doc_row(&r)).transpose()
}

pub async fn list_documents(pool: &SqlitePool) -> Result<Vec<DocumentRow>> {
    let rows = sqlx::query(
        r#"
        select doc_id, display_name, evm_address, sui_address, policy_ens, last_user_hash
        from documents order by doc_id asc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("list_documents failed")?;

    rows.iter().map(doc_row).collect()
}

fn doc_row(r: &SqliteRow) -> Result<DocumentRow> {
    Ok(DocumentRow {
        doc_id: r.try_get("doc_id")?,
        display_name: r.try_get("display_name")?,
        evm_address: r.try_get("evm_address")?,
        sui_address: r.try_get("sui_address")?,
        policy_ens: r.try_get("policy_ens")?,
        last_user_hash: r.try_get("last_user_hash")?,
    })
}

/// Addresses are set once on SETUP.
pub async fn set_document_addresses(
    pool: &SqlitePool,
    doc_id: &str,
    evm_address: &str,
    sui_address: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        update documents
        set evm_address = coalesce(evm_address, ?2),
            sui_address = coalesce(sui_address, ?3)
        where doc_id = ?1
        "#,
    )
    .bind(doc_id)
    .bind(evm_address)
    .bind(sui_address)
    .execute(pool)
    .await
    .context("set_document_addresses failed")?;
    Ok(())
}

pub async fn set_policy_ens(pool: &SqlitePool, doc_id: &str, name: &str) -> Result<()> {
    sqlx::query("update documents set policy_ens = ?2 where doc_id = ?1")
        .bind(doc_id)
        .bind(name)
        .execute(pool)
        .await
        .context("set_policy_ens failed")?;
    Ok(())
}

pub async fn set_last_user_hash(pool: &SqlitePool, doc_id: &str, hash: &str) -> Result<()> {
    sqlx::query("update documents set last_user_hash = ?2 where doc_id = ?1")
        .bind(doc_id)
        .bind(hash)
        .execute(pool)
        .await
        .context("set_last_user_hash failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CommandRow {
    pub cmd_id: String,
    pub doc_id: String,
    pub raw_text: String,
    pub parsed: Option<ParsedCommand>,
    pub status: CommandStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub tx_ids: BTreeMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewCommand {
    pub cmd_id: String,
    pub doc_id: String,
    pub raw_text: String,
    pub parsed: Option<ParsedCommand>,
    pub status: CommandStatus,
    pub error: Option<String>,
}

pub async fn insert_command(pool: &SqlitePool, cmd: &NewCommand, now_ms: i64) -> Result<()> {
    let parsed = cmd
        .parsed
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("serialize parsed command")?;

    sqlx::query(
        r#"
        insert into commands (cmd_id, doc_id, raw_text, parsed, status, error, created_at, updated_at)
        values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        "#,
    )
    .bind(&cmd.cmd_id)
    .bind(&cmd.doc_id)
    .bind(&cmd.raw_text)
    .bind(parsed)
    .bind(cmd.status.as_str())
    .bind(&cmd.error)
    .bind(now_ms)
    .execute(pool)
    .await
    .context("insert_command failed")?;
    Ok(())
}

pub async fn get_command(pool: &SqlitePool, cmd_id: &str) -> Result<Option<CommandRow>> {
    let row = sqlx::query(
        r#"
        select cmd_id, doc_id, raw_text, parsed, status, result, error, tx_ids, created_at, updated_at
        from commands where cmd_id = ?1
        "#,
    )
    .bind(cmd_id)
    .fetch_optional(pool)
    .await
    .context("get_command failed")?;

    row.map(|r| command_row(&r)).transpose()
}

pub async fn list_recent_commands(
    pool: &SqlitePool,
    doc_id: &str,
    limit: i64,
) -> Result<Vec<CommandRow>> {
    let rows = sqlx::query(
        r#"
        select cmd_id, doc_id, raw_text, parsed, status, result, error, tx_ids, created_at, updated_at
        from commands
        where doc_id = ?1
        order by created_at desc, cmd_id desc
        limit ?2
        "#,
    )
    .bind(doc_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("list_recent_commands failed")?;

    rows.iter().map(command_row).collect()
}

/// Commands still waiting before execution (PENDING_APPROVAL or APPROVED)
/// created before `cutoff_ms`. Drives the advisor's stuck-command alert.
pub async fn list_stuck_commands(
    pool: &SqlitePool,
    doc_id: &str,
    cutoff_ms: i64,
) -> Result<Vec<CommandRow>> {
    let rows = sqlx::query(
        r#"
        select cmd_id, doc_id, raw_text, parsed, status, result, error, tx_ids, created_at, updated_at
        from commands
        where doc_id = ?1
          and status in ('PENDING_APPROVAL', 'APPROVED')
          and created_at < ?2
        order by created_at asc, cmd_id asc
        "#,
    )
    .bind(doc_id)
    .bind(cutoff_ms)
    .fetch_all(pool)
    .await
    .context("list_stuck_commands failed")?;

    rows.iter().map(command_row).collect()
}

fn command_row(r: &SqliteRow) -> Result<CommandRow> {
    let parsed: Option<String> = r.try_get("parsed")?;
    let parsed = parsed
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .context("decode parsed command")?;

    let status: String = r.try_get("status")?;
    let status = CommandStatus::parse(&status)
        .ok_or_else(|| anyhow!("invalid command status in store: {status}"))?;

    let tx_ids: String = r.try_get("tx_ids")?;
    let tx_ids: BTreeMap<String, String> =
        serde_json::from_str(&tx_ids).context("decode tx_ids")?;

    Ok(CommandRow {
        cmd_id: r.try_get("cmd_id")?,
        doc_id: r.try_get("doc_id")?,
        raw_text: r.try_get("raw_text")?,
        parsed,
        status,
        result: r.try_get("result")?,
        error: r.try_get("error")?,
        tx_ids,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

/// Transition a command along an edge of the state graph.
///
/// Validates the edge, applies it with a conditional update (so a concurrent
/// transition loses cleanly), and clears approvals in the same transaction
/// when the target status is terminal. `result`/`error` overwrite the stored
/// cells (None clears).
pub async fn transition_command(
    pool: &SqlitePool,
    cmd_id: &str,
    to: CommandStatus,
    result: Option<&str>,
    error: Option<&str>,
    now_ms: i64,
) -> Result<()> {
    let mut tx = pool.begin().await.context("transition_command begin")?;

    let row = sqlx::query("select status from commands where cmd_id = ?1")
        .bind(cmd_id)
        .fetch_optional(&mut *tx)
        .await
        .context("transition_command load failed")?;
    let Some(row) = row else {
        bail!("unknown command {cmd_id}");
    };
    let from_str: String = row.try_get("status")?;
    let from = CommandStatus::parse(&from_str)
        .ok_or_else(|| anyhow!("invalid command status in store: {from_str}"))?;

    if !from.can_transition(to) {
        bail!(
            "illegal transition {} -> {} for command {cmd_id}",
            from.as_str(),
            to.as_str()
        );
    }

    let res = sqlx::query(
        r#"
        update commands
        set status = ?2, result = ?3, error = ?4, updated_at = ?5
        where cmd_id = ?1 and status = ?6
        "#,
    )
    .bind(cmd_id)
    .bind(to.as_str())
    .bind(result)
    .bind(error)
    .bind(now_ms)
    .bind(from.as_str())
    .execute(&mut *tx)
    .await
    .context("transition_command update failed")?;

    if res.rows_affected() == 0 {
        bail!("command {cmd_id} transitioned concurrently");
    }

    if to.is_terminal() {
        sqlx::query("delete from approvals where cmd_id = ?1")
            .bind(cmd_id)
            .execute(&mut *tx)
            .await
            .context("transition_command clear approvals failed")?;
    }

    tx.commit().await.context("transition_command commit")?;
    Ok(())
}

/// Re-point a command at edited text (document sync edit path). Resets
/// result and approvals; `status` is the re-parse outcome.
pub async fn update_command_text(
    pool: &SqlitePool,
    cmd_id: &str,
    raw_text: &str,
    parsed: Option<&ParsedCommand>,
    status: CommandStatus,
    error: Option<&str>,
    now_ms: i64,
) -> Result<()> {
    let parsed = parsed
        .map(serde_json::to_string)
        .transpose()
        .context("serialize parsed command")?;

    let mut tx = pool.begin().await.context("update_command_text begin")?;

    sqlx::query(
        r#"
        update commands
        set raw_text = ?2, parsed = ?3, status = ?4, result = null, error = ?5, updated_at = ?6
        where cmd_id = ?1
        "#,
    )
    .bind(cmd_id)
    .bind(raw_text)
    .bind(parsed)
    .bind(status.as_str())
    .bind(error)
    .bind(now_ms)
    .execute(&mut *tx)
    .await
    .context("update_command_text failed")?;

    sqlx::query("delete from approvals where cmd_id = ?1")
        .bind(cmd_id)
        .execute(&mut *tx)
        .await
        .context("update_command_text clear approvals failed")?;

    tx.commit().await.context("update_command_text commit")?;
    Ok(())
}

/// The executor's claim: atomically move the oldest APPROVED command to
/// EXECUTING. Ties on `created_at` break lexicographically on `cmd_id`.
/// Returns None when nothing is claimable or a racing claimer won.
pub async fn claim_oldest_approved(pool: &SqlitePool, now_ms: i64) -> Result<Option<CommandRow>> {
    let mut tx = pool.begin().await.context("claim begin")?;

    let row = sqlx::query(
        r#"
        select cmd_id from commands
        where status = 'APPROVED'
        order by created_at asc, cmd_id asc
        limit 1
        "#,
    )
    .fetch_optional(&mut *tx)
    .await
    .context("claim select failed")?;

    let Some(row) = row else {
        return Ok(None);
    };
    let cmd_id: String = row.try_get("cmd_id")?;

    let res = sqlx::query(
        r#"
        update commands
        set status = 'EXECUTING', updated_at = ?2
        where cmd_id = ?1 and status = 'APPROVED'
        "#,
    )
    .bind(&cmd_id)
    .bind(now_ms)
    .execute(&mut *tx)
    .await
    .context("claim update failed")?;

    if res.rows_affected() == 0 {
        return Ok(None);
    }

    tx.commit().await.context("claim commit")?;
    get_command(pool, &cmd_id).await
}

/// Merge transaction ids into the command's append-only `tx_ids` map.
pub async fn append_tx_ids(
    pool: &SqlitePool,
    cmd_id: &str,
    new_ids: &BTreeMap<String, String>,
    now_ms: i64,
) -> Result<()> {
    if new_ids.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await.context("append_tx_ids begin")?;

    let row = sqlx::query("select tx_ids from commands where cmd_id = ?1")
        .bind(cmd_id)
        .fetch_optional(&mut *tx)
        .await
        .context("append_tx_ids load failed")?;
    let Some(row) = row else {
        bail!("unknown command {cmd_id}");
    };

    let current: String = row.try_get("tx_ids")?;
    let mut map: BTreeMap<String, String> =
        serde_json::from_str(&current).context("decode tx_ids")?;
    for (k, v) in new_ids {
        map.entry(k.clone()).or_insert_with(|| v.clone());
    }
    let merged = serde_json::to_string(&map).context("encode tx_ids")?;

    sqlx::query("update commands set tx_ids = ?2, updated_at = ?3 where cmd_id = ?1")
        .bind(cmd_id)
        .bind(merged)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .context("append_tx_ids update failed")?;

    tx.commit().await.context("append_tx_ids commit")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Signers, quorum, approvals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SignerRow {
    pub doc_id: String,
    pub address: String,
    pub weight: i64,
}

pub async fn upsert_signer(
    pool: &SqlitePool,
    doc_id: &str,
    address: &str,
    weight: i64,
) -> Result<()> {
    if weight < 1 {
        bail!("signer weight must be >= 1, got {weight}");
    }
    sqlx::query(
        r#"
        insert into signers (doc_id, address, weight)
        values (?1, ?2, ?3)
        on conflict (doc_id, address) do update set weight = excluded.weight
        "#,
    )
    .bind(doc_id)
    .bind(address)
    .bind(weight)
    .execute(pool)
    .await
    .context("upsert_signer failed")?;
    Ok(())
}

pub async fn get_signer(
    pool: &SqlitePool,
    doc_id: &str,
    address: &str,
) -> Result<Option<SignerRow>> {
    let row = sqlx::query(
        "select doc_id, address, weight from signers where doc_id = ?1 and address = ?2",
    )
    .bind(doc_id)
    .bind(address)
    .fetch_optional(pool)
    .await
    .context("get_signer failed")?;

    Ok(row.map(|r| SignerRow {
        doc_id: r.get("doc_id"),
        address: r.get("address"),
        weight: r.get("weight"),
    }))
}

pub async fn list_signers(pool: &SqlitePool, doc_id: &str) -> Result<Vec<SignerRow>> {
    let rows = sqlx::query(
        "select doc_id, address, weight from signers where doc_id = ?1 order by address asc",
    )
    .bind(doc_id)
    .fetch_all(pool)
    .await
    .context("list_signers failed")?;

    Ok(rows
        .into_iter()
        .map(|r| SignerRow {
            doc_id: r.get("doc_id"),
            address: r.get("address"),
            weight: r.get("weight"),
        })
        .collect())
}

const QUORUM_KEY: &str = "quorum";

pub async fn set_quorum(pool: &SqlitePool, doc_id: &str, quorum: i64) -> Result<()> {
    if quorum < 1 {
        bail!("quorum must be >= 1, got {quorum}");
    }
    set_doc_config(pool, doc_id, QUORUM_KEY, &quorum.to_string()).await
}

/// Quorum defaults to 1 until a QUORUM command raises it.
pub async fn get_quorum(pool: &SqlitePool, doc_id: &str) -> Result<i64> {
    match get_doc_config(pool, doc_id, QUORUM_KEY).await? {
        Some(v) => v
            .parse()
            .map_err(|_| anyhow!("corrupt quorum value for {doc_id}: {v}")),
        None => Ok(1),
    }
}

#[derive(Debug, Clone)]
pub struct ApprovalRow {
    pub doc_id: String,
    pub cmd_id: String,
    pub signer_address: String,
    pub decision: Decision,
    pub at: i64,
}

/// Record a signer's decision; last writer wins per (cmd, signer).
pub async fn record_approval(
    pool: &SqlitePool,
    doc_id: &str,
    cmd_id: &str,
    signer_address: &str,
    decision: Decision,
    now_ms: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into approvals (doc_id, cmd_id, signer_address, decision, at)
        values (?1, ?2, ?3, ?4, ?5)
        on conflict (cmd_id, signer_address) do update
            set decision = excluded.decision, at = excluded.at
        "#,
    )
    .bind(doc_id)
    .bind(cmd_id)
    .bind(signer_address)
    .bind(decision.as_str())
    .bind(now_ms)
    .execute(pool)
    .await
    .context("record_approval failed")?;
    Ok(())
}

pub async fn list_approvals(pool: &SqlitePool, cmd_id: &str) -> Result<Vec<ApprovalRow>> {
    let rows = sqlx::query(
        r#"
        select doc_id, cmd_id, signer_address, decision, at
        from approvals where cmd_id = ?1 order by at asc
        "#,
    )
    .bind(cmd_id)
    .fetch_all(pool)
    .await
    .context("list_approvals failed")?;

    rows.into_iter()
        .map(|r| {
            let decision: String = r.try_get("decision")?;
            Ok(ApprovalRow {
                doc_id: r.try_get("doc_id")?,
                cmd_id: r.try_get("cmd_id")?,
                signer_address: r.try_get("signer_address")?,
                decision: Decision::parse(&decision)
                    .ok_or_else(|| anyhow!("invalid decision in store: {decision}"))?,
                at: r.try_get("at")?,
            })
        })
        .collect()
}

pub async fn clear_approvals(pool: &SqlitePool, cmd_id: &str) -> Result<()> {
    sqlx::query("delete from approvals where cmd_id = ?1")
        .bind(cmd_id)
        .execute(pool)
        .await
        .context("clear_approvals failed")?;
    Ok(())
}

/// Sum of weights of registered signers that currently APPROVE the command.
pub async fn approved_weight(pool: &SqlitePool, doc_id: &str, cmd_id: &str) -> Result<i64> {
    let (w,): (i64,) = sqlx::query_as(
        r#"
        select coalesce(sum(s.weight), 0)
        from approvals a
        join signers s on s.doc_id = a.doc_id and s.address = a.signer_address
        where a.doc_id = ?1 and a.cmd_id = ?2 and a.decision = 'APPROVE'
        "#,
    )
    .bind(doc_id)
    .bind(cmd_id)
    .fetch_one(pool)
    .await
    .context("approved_weight failed")?;
    Ok(w)
}

// ---------------------------------------------------------------------------
// Per-document config + counters
// ---------------------------------------------------------------------------

pub async fn set_doc_config(
    pool: &SqlitePool,
    doc_id: &str,
    key: &str,
    value: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into doc_config (doc_id, key, value)
        values (?1, ?2, ?3)
        on conflict (doc_id, key) do update set value = excluded.value
        "#,
    )
    .bind(doc_id)
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .context("set_doc_config failed")?;
    Ok(())
}

pub async fn get_doc_config(
    pool: &SqlitePool,
    doc_id: &str,
    key: &str,
) -> Result<Option<String>> {
    let row = sqlx::query("select value from doc_config where doc_id = ?1 and key = ?2")
        .bind(doc_id)
        .bind(key)
        .fetch_optional(pool)
        .await
        .context("get_doc_config failed")?;
    Ok(row.map(|r| r.get("value")))
}

/// Add `by` to an integer counter stored in doc_config; returns the new value.
pub async fn increment_counter(
    pool: &SqlitePool,
    doc_id: &str,
    key: &str,
    by: i64,
) -> Result<i64> {
    let mut tx = pool.begin().await.context("increment_counter begin")?;

    let current: i64 = sqlx::query("select value from doc_config where doc_id = ?1 and key = ?2")
        .bind(doc_id)
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .context("increment_counter load failed")?
        .map(|r| {
            let v: String = r.get("value");
            v.parse().unwrap_or(0)
        })
        .unwrap_or(0);

    let next = current + by;
    sqlx::query(
        r#"
        insert into doc_config (doc_id, key, value)
        values (?1, ?2, ?3)
        on conflict (doc_id, key) do update set value = excluded.value
        "#,
    )
    .bind(doc_id)
    .bind(key)
    .bind(next.to_string())
    .execute(&mut *tx)
    .await
    .context("increment_counter update failed")?;

    tx.commit().await.context("increment_counter commit")?;
    Ok(next)
}

pub async fn get_counter(pool: &SqlitePool, doc_id: &str, key: &str) -> Result<i64> {
    Ok(get_doc_config(pool, doc_id, key)
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScheduleRow {
    pub schedule_id: String,
    pub doc_id: String,
    pub interval_hours: i64,
    pub inner_command_text: String,
    pub next_run_at: i64,
    pub status: String,
    pub total_runs: i64,
    pub last_run_at: Option<i64>,
}

pub async fn insert_schedule(
    pool: &SqlitePool,
    schedule_id: &str,
    doc_id: &str,
    interval_hours: i64,
    inner_command_text: &str,
    now_ms: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into schedules
            (schedule_id, doc_id, interval_hours, inner_command_text, next_run_at, status)
        values (?1, ?2, ?3, ?4, ?5, 'ACTIVE')
        "#,
    )
    .bind(schedule_id)
    .bind(doc_id)
    .bind(interval_hours)
    .bind(inner_command_text)
    .bind(now_ms + interval_hours * 3_600_000)
    .execute(pool)
    .await
    .context("insert_schedule failed")?;
    Ok(())
}

pub async fn get_schedule(pool: &SqlitePool, schedule_id: &str) -> Result<Option<ScheduleRow>> {
    let row = sqlx::query(
        r#"
        select schedule_id, doc_id, interval_hours, inner_command_text,
               next_run_at, status, total_runs, last_run_at
        from schedules where schedule_id = ?1
        "#,
    )
    .bind(schedule_id)
    .fetch_optional(pool)
    .await
    .context("get_schedule failed")?;

    row.map(|r| schedule_row(&r)).transpose()
}

pub async fn list_schedules(pool: &SqlitePool, doc_id: &str) -> Result<Vec<ScheduleRow>> {
    let rows = sqlx::query(
        r#"
        select schedule_id, doc_id, interval_hours, inner_command_text,
               next_run_at, status, total_runs, last_run_at
        from schedules where doc_id = ?1 order by schedule_id asc
        "#,
    )
    .bind(doc_id)
    .fetch_all(pool)
    .await
    .context("list_schedules failed")?;

    rows.iter().map(schedule_row).collect()
}

/// Schedules due to fire: ACTIVE with `next_run_at <= now`.
pub async fn list_due_schedules(pool: &SqlitePool, now_ms: i64) -> Result<Vec<ScheduleRow>> {
    let rows = sqlx::query(
        r#"
        select schedule_id, doc_id, interval_hours, inner_command_text,
               next_run_at, status, total_runs, last_run_at
        from schedules
        where status = 'ACTIVE' and next_run_at <= ?1
        order by next_run_at asc, schedule_id asc
        "#,
    )
    .bind(now_ms)
    .fetch_all(pool)
    .await
    .context("list_due_schedules failed")?;

    rows.iter().map(schedule_row).collect()
}

fn schedule_row(r: &SqliteRow) -> Result<ScheduleRow> {
    Ok(ScheduleRow {
        schedule_id: r.try_get("schedule_id")?,
        doc_id: r.try_get("doc_id")?,
        interval_hours: r.try_get("interval_hours")?,
        inner_command_text: r.try_get("inner_command_text")?,
        next_run_at: r.try_get("next_run_at")?,
        status: r.try_get("status")?,
        total_runs: r.try_get("total_runs")?,
        last_run_at: r.try_get("last_run_at")?,
    })
}

/// Advance a fired schedule: one run per due schedule per tick; late ticks
/// are not batched into catch-up runs.
pub async fn advance_schedule(pool: &SqlitePool, schedule_id: &str, now_ms: i64) -> Result<()> {
    let res = sqlx::query(
        r#"
        update schedules
        set total_runs = total_runs + 1,
            last_run_at = ?2,
            next_run_at = ?2 + interval_hours * 3600000
        where schedule_id = ?1 and status = 'ACTIVE'
        "#,
    )
    .bind(schedule_id)
    .bind(now_ms)
    .execute(pool)
    .await
    .context("advance_schedule failed")?;

    if res.rows_affected() == 0 {
        bail!("schedule {schedule_id} is not active");
    }
    Ok(())
}

/// Fire a schedule: advance it and insert its pre-approved child command in
/// one transaction. Returns false (and inserts nothing) if the schedule is
/// no longer ACTIVE.
pub async fn fire_schedule_with_child(
    pool: &SqlitePool,
    schedule_id: &str,
    child: &NewCommand,
    now_ms: i64,
) -> Result<bool> {
    let parsed = child
        .parsed
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("serialize parsed command")?;

    let mut tx = pool.begin().await.context("fire_schedule begin")?;

    let res = sqlx::query(
        r#"
        update schedules
        set total_runs = total_runs + 1,
            last_run_at = ?2,
            next_run_at = ?2 + interval_hours * 3600000
        where schedule_id = ?1 and status = 'ACTIVE'
        "#,
    )
    .bind(schedule_id)
    .bind(now_ms)
    .execute(&mut *tx)
    .await
    .context("fire_schedule advance failed")?;

    if res.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query(
        r#"
        insert into commands (cmd_id, doc_id, raw_text, parsed, status, error, created_at, updated_at)
        values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        "#,
    )
    .bind(&child.cmd_id)
    .bind(&child.doc_id)
    .bind(&child.raw_text)
    .bind(parsed)
    .bind(child.status.as_str())
    .bind(&child.error)
    .bind(now_ms)
    .execute(&mut *tx)
    .await
    .context("fire_schedule insert child failed")?;

    tx.commit().await.context("fire_schedule commit")?;
    Ok(true)
}

/// Returns false if the schedule was unknown or already cancelled.
pub async fn cancel_schedule(pool: &SqlitePool, schedule_id: &str) -> Result<bool> {
    let res = sqlx::query(
        "update schedules set status = 'CANCELLED' where schedule_id = ?1 and status = 'ACTIVE'",
    )
    .bind(schedule_id)
    .execute(pool)
    .await
    .context("cancel_schedule failed")?;
    Ok(res.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Conditional orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConditionalOrderRow {
    pub order_id: String,
    pub doc_id: String,
    pub kind: String, // STOP_LOSS | TAKE_PROFIT
    pub base: String,
    pub quote: String,
    pub trigger_price: f64,
    pub qty: f64,
    pub status: String, // ACTIVE | TRIGGERED | CANCELLED
    pub triggered_cmd_id: Option<String>,
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_conditional_order(
    pool: &SqlitePool,
    order_id: &str,
    doc_id: &str,
    kind: &str,
    base: &str,
    quote: &str,
    trigger_price: f64,
    qty: f64,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into conditional_orders
            (order_id, doc_id, kind, base, quote, trigger_price, qty, status)
        values (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'ACTIVE')
        "#,
    )
    .bind(order_id)
    .bind(doc_id)
    .bind(kind)
    .bind(base)
    .bind(quote)
    .bind(trigger_price)
    .bind(qty)
    .execute(pool)
    .await
    .context("insert_conditional_order failed")?;
    Ok(())
}

pub async fn list_active_conditional_orders(pool: &SqlitePool) -> Result<Vec<ConditionalOrderRow>> {
    let rows = sqlx::query(
        r#"
        select order_id, doc_id, kind, base, quote, trigger_price, qty, status, triggered_cmd_id
        from conditional_orders where status = 'ACTIVE' order by order_id asc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("list_active_conditional_orders failed")?;

    rows.iter().map(conditional_row).collect()
}

pub async fn list_conditional_orders(
    pool: &SqlitePool,
    doc_id: &str,
) -> Result<Vec<ConditionalOrderRow>> {
    let rows = sqlx::query(
        r#"
        select order_id, doc_id, kind, base, quote, trigger_price, qty, status, triggered_cmd_id
        from conditional_orders where doc_id = ?1 order by order_id asc
        "#,
    )
    .bind(doc_id)
    .fetch_all(pool)
    .await
    .context("list_conditional_orders failed")?;

    rows.iter().map(conditional_row).collect()
}

fn conditional_row(r: &SqliteRow) -> Result<ConditionalOrderRow> {
    Ok(ConditionalOrderRow {
        order_id: r.try_get("order_id")?,
        doc_id: r.try_get("doc_id")?,
        kind: r.try_get("kind")?,
        base: r.try_get("base")?,
        quote: r.try_get("quote")?,
        trigger_price: r.try_get("trigger_price")?,
        qty: r.try_get("qty")?,
        status: r.try_get("status")?,
        triggered_cmd_id: r.try_get("triggered_cmd_id")?,
    })
}

/// Mark an ACTIVE order TRIGGERED with the spawned command. Triggered orders
/// are final; returns false if the order was not ACTIVE (concurrent trigger).
pub async fn trigger_conditional_order(
    pool: &SqlitePool,
    order_id: &str,
    cmd_id: &str,
) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update conditional_orders
        set status = 'TRIGGERED', triggered_cmd_id = ?2
        where order_id = ?1 and status = 'ACTIVE'
        "#,
    )
    .bind(order_id)
    .bind(cmd_id)
    .execute(pool)
    .await
    .context("trigger_conditional_order failed")?;
    Ok(res.rows_affected() > 0)
}

/// Trigger an ACTIVE conditional order and insert the market-sell child it
/// spawns, atomically. Returns false (and inserts nothing) if the order was
/// already triggered or cancelled.
pub async fn trigger_conditional_with_child(
    pool: &SqlitePool,
    order_id: &str,
    child: &NewCommand,
    now_ms: i64,
) -> Result<bool> {
    let parsed = child
        .parsed
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("serialize parsed command")?;

    let mut tx = pool.begin().await.context("trigger_conditional begin")?;

    let res = sqlx::query(
        r#"
        update conditional_orders
        set status = 'TRIGGERED', triggered_cmd_id = ?2
        where order_id = ?1 and status = 'ACTIVE'
        "#,
    )
    .bind(order_id)
    .bind(&child.cmd_id)
    .execute(&mut *tx)
    .await
    .context("trigger_conditional update failed")?;

    if res.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query(
        r#"
        insert into commands (cmd_id, doc_id, raw_text, parsed, status, error, created_at, updated_at)
        values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        "#,
    )
    .bind(&child.cmd_id)
    .bind(&child.doc_id)
    .bind(&child.raw_text)
    .bind(parsed)
    .bind(child.status.as_str())
    .bind(&child.error)
    .bind(now_ms)
    .execute(&mut *tx)
    .await
    .context("trigger_conditional insert child failed")?;

    tx.commit().await.context("trigger_conditional commit")?;
    Ok(true)
}

pub async fn cancel_conditional_order(pool: &SqlitePool, order_id: &str) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update conditional_orders
        set status = 'CANCELLED'
        where order_id = ?1 and status = 'ACTIVE'
        "#,
    )
    .bind(order_id)
    .execute(pool)
    .await
    .context("cancel_conditional_order failed")?;
    Ok(res.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Trades + price cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TradeRow {
    pub trade_id: String,
    pub doc_id: String,
    pub cmd_id: String,
    pub side: String,
    pub qty: f64,
    pub price: f64,
    pub notional: f64,
    pub fee: f64,
    pub tx_id: Option<String>,
    pub at: i64,
}

pub async fn insert_trade(pool: &SqlitePool, t: &TradeRow) -> Result<()> {
    sqlx::query(
        r#"
        insert into trades (trade_id, doc_id, cmd_id, side, qty, price, notional, fee, tx_id, at)
        values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&t.trade_id)
    .bind(&t.doc_id)
    .bind(&t.cmd_id)
    .bind(&t.side)
    .bind(t.qty)
    .bind(t.price)
    .bind(t.notional)
    .bind(t.fee)
    .bind(&t.tx_id)
    .bind(t.at)
    .execute(pool)
    .await
    .context("insert_trade failed")?;
    Ok(())
}

pub async fn list_trades(pool: &SqlitePool, doc_id: &str, limit: i64) -> Result<Vec<TradeRow>> {
    let rows = sqlx::query(
        r#"
        select trade_id, doc_id, cmd_id, side, qty, price, notional, fee, tx_id, at
        from trades where doc_id = ?1 order by at desc, trade_id desc limit ?2
        "#,
    )
    .bind(doc_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("list_trades failed")?;

    Ok(rows
        .into_iter()
        .map(|r| TradeRow {
            trade_id: r.get("trade_id"),
            doc_id: r.get("doc_id"),
            cmd_id: r.get("cmd_id"),
            side: r.get("side"),
            qty: r.get("qty"),
            price: r.get("price"),
            notional: r.get("notional"),
            fee: r.get("fee"),
            tx_id: r.get("tx_id"),
            at: r.get("at"),
        })
        .collect())
}

#[derive(Debug, Clone)]
pub struct PriceRow {
    pub pair: String,
    pub mid: f64,
    pub bid: f64,
    pub ask: f64,
    pub source: String,
    pub at: i64,
}

/// One row per pair, overwritten on each oracle tick.
pub async fn upsert_price(pool: &SqlitePool, p: &PriceRow) -> Result<()> {
    sqlx::query(
        r#"
        insert into price_cache (pair, mid, bid, ask, source, at)
        values (?1, ?2, ?3, ?4, ?5, ?6)
        on conflict (pair) do update
            set mid = excluded.mid, bid = excluded.bid, ask = excluded.ask,
                source = excluded.source, at = excluded.at
        "#,
    )
    .bind(&p.pair)
    .bind(p.mid)
    .bind(p.bid)
    .bind(p.ask)
    .bind(&p.source)
    .bind(p.at)
    .execute(pool)
    .await
    .context("upsert_price failed")?;
    Ok(())
}

pub async fn get_price(pool: &SqlitePool, pair: &str) -> Result<Option<PriceRow>> {
    let row = sqlx::query("select pair, mid, bid, ask, source, at from price_cache where pair = ?1")
        .bind(pair)
        .fetch_optional(pool)
        .await
        .context("get_price failed")?;

    Ok(row.map(|r| PriceRow {
        pair: r.get("pair"),
        mid: r.get("mid"),
        bid: r.get("bid"),
        ask: r.get("ask"),
        source: r.get("source"),
        at: r.get("at"),
    }))
}

// ---------------------------------------------------------------------------
// Daily-spend query
// ---------------------------------------------------------------------------

/// Sum of `parsed.amountUsdc` over this doc's EXECUTED commands updated in
/// the last 24 h, for kinds PAYOUT / PAYOUT_SPLIT / BRIDGE. The single
/// context input to the policy engine.
pub async fn daily_spend_usdc(pool: &SqlitePool, doc_id: &str, now_ms: i64) -> Result<f64> {
    let rows = sqlx::query(
        r#"
        select parsed from commands
        where doc_id = ?1
          and status = 'EXECUTED'
          and updated_at >= ?2
          and parsed is not null
        "#,
    )
    .bind(doc_id)
    .bind(now_ms - DAY_MS)
    .fetch_all(pool)
    .await
    .context("daily_spend_usdc failed")?;

    let mut total = 0.0;
    for row in rows {
        let parsed: String = row.try_get("parsed")?;
        let cmd: ParsedCommand = serde_json::from_str(&parsed).context("decode parsed command")?;
        if matches!(
            cmd,
            ParsedCommand::Payout { .. }
                | ParsedCommand::PayoutSplit { .. }
                | ParsedCommand::Bridge { .. }
        ) {
            total += cmd.amount_usdc().unwrap_or(0.0);
        }
    }
    Ok(total)
}

// ---------------------------------------------------------------------------
// State-channel sessions + session keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChannelSessionRow {
    pub doc_id: String,
    pub session_id: String,
    pub definition: String,
    pub version: i64,
    pub status: String, // OPEN | CLOSED
    pub allocations: String,
}

pub async fn upsert_channel_session(pool: &SqlitePool, s: &ChannelSessionRow) -> Result<()> {
    sqlx::query(
        r#"
        insert into channel_sessions (doc_id, session_id, definition, version, status, allocations)
        values (?1, ?2, ?3, ?4, ?5, ?6)
        on conflict (doc_id) do update
            set session_id = excluded.session_id, definition = excluded.definition,
                version = excluded.version, status = excluded.status,
                allocations = excluded.allocations
        "#,
    )
    .bind(&s.doc_id)
    .bind(&s.session_id)
    .bind(&s.definition)
    .bind(s.version)
    .bind(&s.status)
    .bind(&s.allocations)
    .execute(pool)
    .await
    .context("upsert_channel_session failed")?;
    Ok(())
}

pub async fn get_channel_session(
    pool: &SqlitePool,
    doc_id: &str,
) -> Result<Option<ChannelSessionRow>> {
    let row = sqlx::query(
        r#"
        select doc_id, session_id, definition, version, status, allocations
        from channel_sessions where doc_id = ?1
        "#,
    )
    .bind(doc_id)
    .fetch_optional(pool)
    .await
    .context("get_channel_session failed")?;

    Ok(row.map(|r| ChannelSessionRow {
        doc_id: r.get("doc_id"),
        session_id: r.get("session_id"),
        definition: r.get("definition"),
        version: r.get("version"),
        status: r.get("status"),
        allocations: r.get("allocations"),
    }))
}

/// Versions are monotonic; a stale write (version <= stored) is an error.
pub async fn set_channel_session_version(
    pool: &SqlitePool,
    doc_id: &str,
    version: i64,
) -> Result<()> {
    let res = sqlx::query(
        "update channel_sessions set version = ?2 where doc_id = ?1 and version < ?2",
    )
    .bind(doc_id)
    .bind(version)
    .execute(pool)
    .await
    .context("set_channel_session_version failed")?;

    if res.rows_affected() == 0 {
        bail!("stale channel session version {version} for {doc_id}");
    }
    Ok(())
}

pub async fn close_channel_session(pool: &SqlitePool, doc_id: &str) -> Result<()> {
    sqlx::query("update channel_sessions set status = 'CLOSED' where doc_id = ?1")
        .bind(doc_id)
        .execute(pool)
        .await
        .context("close_channel_session failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SessionKeyRow {
    pub doc_id: String,
    pub signer_address: String,
    pub session_key_address: String,
    pub encrypted_private_key: String,
    pub expires_at: i64,
    pub jwt: Option<String>,
}

pub async fn upsert_session_key(pool: &SqlitePool, k: &SessionKeyRow) -> Result<()> {
    sqlx::query(
        r#"
        insert into session_keys
            (doc_id, signer_address, session_key_address, encrypted_private_key, expires_at, jwt)
        values (?1, ?2, ?3, ?4, ?5, ?6)
        on conflict (doc_id, signer_address) do update
            set session_key_address = excluded.session_key_address,
                encrypted_private_key = excluded.encrypted_private_key,
                expires_at = excluded.expires_at, jwt = excluded.jwt
        "#,
    )
    .bind(&k.doc_id)
    .bind(&k.signer_address)
    .bind(&k.session_key_address)
    .bind(&k.encrypted_private_key)
    .bind(k.expires_at)
    .bind(&k.jwt)
    .execute(pool)
    .await
    .context("upsert_session_key failed")?;
    Ok(())
}

pub async fn get_session_key(
    pool: &SqlitePool,
    doc_id: &str,
    signer_address: &str,
) -> Result<Option<SessionKeyRow>> {
    let row = sqlx::query(
        r#"
        select doc_id, signer_address, session_key_address, encrypted_private_key, expires_at, jwt
        from session_keys where doc_id = ?1 and signer_address = ?2
        "#,
    )
    .bind(doc_id)
    .bind(signer_address)
    .fetch_optional(pool)
    .await
    .context("get_session_key failed")?;

    Ok(row.map(|r| SessionKeyRow {
        doc_id: r.get("doc_id"),
        signer_address: r.get("signer_address"),
        session_key_address: r.get("session_key_address"),
        encrypted_private_key: r.get("encrypted_private_key"),
        expires_at: r.get("expires_at"),
        jwt: r.get("jwt"),
    }))
}

// ---------------------------------------------------------------------------
// HTTP auth sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AuthSessionRow {
    pub token: String,
    pub doc_id: String,
    pub address: String,
    pub expires_at: i64,
}

pub async fn insert_auth_session(pool: &SqlitePool, s: &AuthSessionRow) -> Result<()> {
    sqlx::query(
        r#"
        insert into auth_sessions (token, doc_id, address, expires_at)
        values (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(&s.token)
    .bind(&s.doc_id)
    .bind(&s.address)
    .bind(s.expires_at)
    .execute(pool)
    .await
    .context("insert_auth_session failed")?;
    Ok(())
}

/// Look up a session token; expired rows are purged on access and not
/// returned.
pub async fn get_auth_session(
    pool: &SqlitePool,
    token: &str,
    now_ms: i64,
) -> Result<Option<AuthSessionRow>> {
    let row = sqlx::query(
        "select token, doc_id, address, expires_at from auth_sessions where token = ?1",
    )
    .bind(token)
    .fetch_optional(pool)
    .await
    .context("get_auth_session failed")?;

    let Some(row) = row else { return Ok(None) };
    let s = AuthSessionRow {
        token: row.get("token"),
        doc_id: row.get("doc_id"),
        address: row.get("address"),
        expires_at: row.get("expires_at"),
    };

    if s.expires_at <= now_ms {
        sqlx::query("delete from auth_sessions where token = ?1")
            .bind(token)
            .execute(pool)
            .await
            .context("purge expired auth session failed")?;
        return Ok(None);
    }
    Ok(Some(s))
}

// ---------------------------------------------------------------------------
// Encrypted secrets blob
// ---------------------------------------------------------------------------

/// The blob is opaque to the store; encryption happens in the vault
/// capability and decrypted material only ever lives inside a single
/// executor dispatch.
pub async fn set_doc_secrets(pool: &SqlitePool, doc_id: &str, blob: &str) -> Result<()> {
    sqlx::query(
        r#"
        insert into doc_secrets (doc_id, blob) values (?1, ?2)
        on conflict (doc_id) do update set blob = excluded.blob
        "#,
    )
    .bind(doc_id)
    .bind(blob)
    .execute(pool)
    .await
    .context("set_doc_secrets failed")?;
    Ok(())
}

pub async fn get_doc_secrets(pool: &SqlitePool, doc_id: &str) -> Result<Option<String>> {
    let row = sqlx::query("select blob from doc_secrets where doc_id = ?1")
        .bind(doc_id)
        .fetch_optional(pool)
        .await
        .context("get_doc_secrets failed")?;
    Ok(row.map(|r| r.get("blob")))
}
