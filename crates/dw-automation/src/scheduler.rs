//! Recurring schedules.
//!
//! A schedule carried its human approval once, at SCHEDULE time; every child
//! command it spawns is therefore born APPROVED and flows straight to the
//! executor. One run per due schedule per tick — a late tick does not batch
//! catch-up runs.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dw_audit::AuditWriter;
use dw_backends::DocProvider;
use dw_schemas::{CommandStatus, DocRow, ParsedCommand};
use dw_store::{NewCommand, ScheduleRow, SqlitePool};

pub struct Scheduler {
    pool: SqlitePool,
    docs: Arc<dyn DocProvider>,
    audit: Arc<Mutex<AuditWriter>>,
    guard: tokio::sync::Mutex<()>,
}

impl Scheduler {
    pub fn new(pool: SqlitePool, docs: Arc<dyn DocProvider>, audit: Arc<Mutex<AuditWriter>>) -> Self {
        Self { pool, docs, audit, guard: tokio::sync::Mutex::new(()) }
    }

    /// Fire every ACTIVE schedule whose `next_run_at <= now`. Returns how
    /// many children were spawned.
    pub async fn tick(&self, now_ms: i64) -> Result<usize> {
        let Ok(_guard) = self.guard.try_lock() else {
            debug!("scheduler tick still running, skipping");
            return Ok(0);
        };

        let mut fired = 0;
        for schedule in dw_store::list_due_schedules(&self.pool, now_ms).await? {
            if self.fire(&schedule, now_ms).await? {
                fired += 1;
            }
        }
        Ok(fired)
    }

    async fn fire(&self, schedule: &ScheduleRow, now_ms: i64) -> Result<bool> {
        // The inner text was validated when the schedule was accepted, but
        // grammar and policy move on; a stale inner cancels the schedule.
        let parsed = match dw_parser::parse(&schedule.inner_command_text) {
            Ok(p)
                if !matches!(
                    p,
                    ParsedCommand::Schedule { .. } | ParsedCommand::CancelSchedule { .. }
                ) =>
            {
                p
            }
            Ok(_) => {
                self.cancel_stale(schedule, "schedule inner command may not be a schedule", now_ms)
                    .await?;
                return Ok(false);
            }
            Err(reason) => {
                self.cancel_stale(schedule, &reason, now_ms).await?;
                return Ok(false);
            }
        };

        let run_no = schedule.total_runs + 1;
        let cmd_id = Uuid::new_v4().to_string();
        let raw_text = format!(
            "[SCHED:{}#{}] {}",
            schedule.schedule_id, run_no, schedule.inner_command_text
        );

        let child = NewCommand {
            cmd_id: cmd_id.clone(),
            doc_id: schedule.doc_id.clone(),
            raw_text: raw_text.clone(),
            parsed: Some(parsed),
            status: CommandStatus::Approved,
            error: None,
        };

        if !dw_store::fire_schedule_with_child(&self.pool, &schedule.schedule_id, &child, now_ms)
            .await?
        {
            // Cancelled between the due query and the fire.
            return Ok(false);
        }

        info!(schedule_id = %schedule.schedule_id, cmd_id = %cmd_id, run_no, "schedule fired");

        // Projection: show the spawned child in the document. Store is
        // authoritative, so a failed append is only staleness.
        let row = DocRow {
            id: Some(cmd_id.clone()),
            text: raw_text,
            status: Some(CommandStatus::Approved.as_str().to_string()),
            ..DocRow::default()
        };
        if let Err(e) = self.docs.append_row(&schedule.doc_id, &row).await {
            warn!(schedule_id = %schedule.schedule_id, "doc append failed: {e}");
        }

        if let Ok(mut w) = self.audit.lock() {
            let _ = w.append(
                &schedule.doc_id,
                "schedule",
                "FIRED",
                json!({ "scheduleId": schedule.schedule_id, "cmdId": cmd_id, "run": run_no }),
                now_ms,
            );
        }
        Ok(true)
    }

    async fn cancel_stale(&self, schedule: &ScheduleRow, reason: &str, now_ms: i64) -> Result<()> {
        warn!(schedule_id = %schedule.schedule_id, "cancelling stale schedule: {reason}");
        dw_store::cancel_schedule(&self.pool, &schedule.schedule_id).await?;
        if let Ok(mut w) = self.audit.lock() {
            let _ = w.append(
                &schedule.doc_id,
                "schedule",
                "CANCELLED",
                json!({ "scheduleId": schedule.schedule_id, "reason": reason }),
                now_ms,
            );
        }
        Ok(())
    }
}
