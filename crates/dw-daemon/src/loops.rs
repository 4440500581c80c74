//! Loop supervision: one tokio task per periodic loop, each with its own
//! interval and its own re-entrancy guard (inside the component — a tick
//! that finds the guard held skips, it does not queue).
//!
//! Shutdown is cooperative: a watch flag flips, each task finishes its
//! in-flight tick and exits. Slow loops never block fast ones.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use dw_automation::{Advisor, AdvisorConfig, BalancesLoop, PriceOracle, Scheduler};
use dw_docsync::{DocSync, SyncConfig};
use dw_executor::Executor;

use crate::state::{now_ms, AppState};

pub fn spawn_loops(state: Arc<AppState>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    let cfg = &state.config;

    let docsync = Arc::new(DocSync::new(
        state.pool.clone(),
        state.backends.docs.clone(),
        state.backends.resolver.clone(),
        SyncConfig {
            public_base_url: cfg.public_base_url.clone(),
            cell_approvals: cfg.cell_approvals,
        },
    ));
    let executor = Arc::new(Executor::new(
        state.pool.clone(),
        state.backends.clone(),
        state.audit.clone(),
        cfg.orderbook_pool.clone(),
    ));
    let scheduler = Arc::new(Scheduler::new(
        state.pool.clone(),
        state.backends.docs.clone(),
        state.audit.clone(),
    ));
    let oracle = Arc::new(PriceOracle::new(
        state.pool.clone(),
        state.backends.clone(),
        state.audit.clone(),
        cfg.orderbook_pool.clone(),
    ));
    let balances = Arc::new(BalancesLoop::new(state.pool.clone(), state.backends.clone()));
    let advisor = Arc::new(Advisor::new(
        state.pool.clone(),
        state.backends.clone(),
        state.audit.clone(),
        AdvisorConfig::default(),
    ));

    vec![
        spawn_loop("docsync", cfg.poll_interval, shutdown.clone(), move |now| {
            let docsync = docsync.clone();
            async move { docsync.tick(now).await }
        }),
        spawn_loop("executor", cfg.executor_interval, shutdown.clone(), move |now| {
            let executor = executor.clone();
            async move { executor.tick(now).await.map(|_| ()) }
        }),
        spawn_loop("scheduler", cfg.scheduler_interval, shutdown.clone(), move |now| {
            let scheduler = scheduler.clone();
            async move { scheduler.tick(now).await.map(|_| ()) }
        }),
        spawn_loop("oracle", cfg.oracle_interval, shutdown.clone(), move |now| {
            let oracle = oracle.clone();
            async move { oracle.tick(now).await.map(|_| ()) }
        }),
        spawn_loop("balances", cfg.balances_interval, shutdown.clone(), move |now| {
            let balances = balances.clone();
            async move { balances.tick(now).await }
        }),
        spawn_loop("advisor", cfg.advisor_interval, shutdown, move |now| {
            let advisor = advisor.clone();
            async move { advisor.tick(now).await.map(|_| ()) }
        }),
    ]
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(i64) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Errors never escape a tick; the next tick retries.
                    if let Err(e) = tick(now_ms()).await {
                        warn!(task = name, "tick failed: {e:#}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(task = name, "loop shutting down");
                        break;
                    }
                }
            }
        }
    })
}
