//! Fixed-cadence job scheduling
//!
//! Each job is its own task that ticks on an interval until the shared
//! cancellation token fires. A tick is a short-lived unit of work; a failed
//! tick is recorded and the next tick runs as usual.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::record_system_error;
use crate::config::Cadences;
use crate::risk::known_tenants;
use crate::Engine;

/// Spawn every scheduled job; the handles finish once `cancel` fires
pub fn spawn_jobs(engine: Arc<Engine>, cadences: &Cadences, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    {
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        let period = cadences.outbox;
        handles.push(tokio::spawn(async move { engine.fanout.run(cancel, period).await }));
    }

    {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(every(
            "notification_dispatch",
            cadences.notifications,
            cancel.clone(),
            move || {
                let engine = Arc::clone(&engine);
                async move {
                    if let Err(e) = engine.notifications.dispatch_pending().await {
                        warn!(error = %e, "Notification dispatch tick failed");
                    }
                }
            },
        )));
    }

    {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(every("risk_scoring", cadences.risk, cancel.clone(), move || {
            let engine = Arc::clone(&engine);
            async move {
                match engine.risk.run_all(Utc::now()).await {
                    Ok(report) => info!(
                        completed = report.completed,
                        skipped = report.skipped,
                        failed = report.failed,
                        "Risk scoring sweep finished"
                    ),
                    Err(e) => warn!(error = %e, "Risk scoring sweep failed"),
                }
            }
        })));
    }

    {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(every("daily_sweeps", cadences.daily, cancel.clone(), move || {
            let engine = Arc::clone(&engine);
            async move { run_daily_sweeps(&engine).await }
        })));
    }

    {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(every("manager_digest", cadences.digest, cancel, move || {
            let engine = Arc::clone(&engine);
            async move { run_manager_digests(&engine).await }
        })));
    }

    handles
}

/// Run `job` every `period` (first run one period from now) until cancelled
async fn every<F, Fut>(name: &'static str, period: Duration, cancel: CancellationToken, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(job = name, period_secs = period.as_secs(), "Scheduled job started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                debug!(job = name, "Tick");
                job().await;
            }
        }
    }

    info!(job = name, "Scheduled job stopped");
}

/// Reminders, overdue marking and certificate reconciliation for every tenant
pub async fn run_daily_sweeps(engine: &Engine) {
    let tenants = match known_tenants(&engine.store).await {
        Ok(tenants) => tenants,
        Err(e) => {
            warn!(error = %e, "Could not list tenants for daily sweeps");
            return;
        }
    };

    for tenant_id in tenants {
        let now = Utc::now();
        if let Err(e) = engine.sweeps.deadline_reminders(&tenant_id, now).await {
            record_system_error(&engine.store, &tenant_id, "deadline_reminders", e.to_string(), json!({})).await;
        }
        if let Err(e) = engine.sweeps.overdue_sweep(&tenant_id, now).await {
            record_system_error(&engine.store, &tenant_id, "overdue_sweep", e.to_string(), json!({})).await;
        }
        if let Err(e) = engine.certificates.issue_missing_certificates(&tenant_id).await {
            record_system_error(
                &engine.store,
                &tenant_id,
                "certificate_reconciliation",
                e.to_string(),
                json!({}),
            )
            .await;
        }
    }
}

pub async fn run_manager_digests(engine: &Engine) {
    let tenants = match known_tenants(&engine.store).await {
        Ok(tenants) => tenants,
        Err(e) => {
            warn!(error = %e, "Could not list tenants for manager digest");
            return;
        }
    };

    for tenant_id in tenants {
        if let Err(e) = engine.sweeps.manager_digest(&tenant_id, Utc::now()).await {
            record_system_error(&engine.store, &tenant_id, "manager_digest", e.to_string(), json!({})).await;
        }
    }
}
