use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use shared::domain::{ReportId, ReportStatus};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{error, info, warn};

use crate::{
    error::RemoteError, lifecycle::ReportLifecycleCoordinator, remote::RescueApi,
    session::SessionContext,
};

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// A locally claimed report the backend still lists as unclaimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub report_id: ReportId,
    pub local: ReportStatus,
    pub remote: ReportStatus,
    pub first_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub updated: usize,
    pub diverged: usize,
    pub failed: usize,
}

/// Re-syncs claimed reports against the backend's authoritative status.
pub struct StatusReconciler {
    coordinator: Arc<ReportLifecycleCoordinator>,
    api: Arc<dyn RescueApi>,
    session: Option<SessionContext>,
    divergences: Mutex<HashMap<ReportId, Divergence>>,
}

impl StatusReconciler {
    pub fn new(coordinator: Arc<ReportLifecycleCoordinator>, api: Arc<dyn RescueApi>) -> Self {
        Self {
            coordinator,
            api,
            session: None,
            divergences: Mutex::new(HashMap::new()),
        }
    }

    /// Expire this session when a pass is rejected as unauthenticated.
    pub fn with_session(mut self, session: SessionContext) -> Self {
        self.session = Some(session);
        self
    }

    pub async fn divergences(&self) -> Vec<Divergence> {
        let mut items: Vec<Divergence> = self.divergences.lock().await.values().cloned().collect();
        items.sort_by(|a, b| a.report_id.cmp(&b.report_id));
        items
    }

    /// Fetch every claimed report concurrently and apply what the backend
    /// reports. An authentication failure aborts the pass before anything is
    /// applied.
    pub async fn reconcile_once(&self) -> Result<ReconcileSummary, RemoteError> {
        let claims = self.coordinator.accepted_reports().await;
        let fetches = claims.iter().map(|claim| async move {
            let result = self.api.fetch_report(&claim.report_id).await;
            (claim.report_id.clone(), result)
        });
        let results = join_all(fetches).await;

        if let Some(err) = results
            .iter()
            .find_map(|(_, result)| result.as_ref().err().filter(|e| e.is_authentication()))
        {
            return Err(err.clone());
        }

        let mut summary = ReconcileSummary {
            checked: results.len(),
            ..ReconcileSummary::default()
        };
        for (report_id, result) in results {
            let report = match result {
                Ok(report) => report,
                Err(err) => {
                    warn!(report_id = %report_id, error = %err, "reconcile: status fetch failed");
                    summary.failed += 1;
                    continue;
                }
            };

            if report.status == ReportStatus::Pending {
                let local = self.coordinator.current_status(&report_id).await;
                let mut divergences = self.divergences.lock().await;
                divergences
                    .entry(report_id.clone())
                    .or_insert_with(|| Divergence {
                        report_id: report_id.clone(),
                        local,
                        remote: report.status,
                        first_seen: Utc::now(),
                    });
                warn!(
                    report_id = %report_id,
                    local = %local,
                    remote = %report.status,
                    "reconcile: backend has not registered local claim"
                );
                summary.diverged += 1;
            } else {
                self.divergences.lock().await.remove(&report_id);
            }

            if self
                .coordinator
                .observe_status(&report_id, report.status)
                .await
                .is_some()
            {
                summary.updated += 1;
            }
        }

        info!(
            checked = summary.checked,
            updated = summary.updated,
            diverged = summary.diverged,
            failed = summary.failed,
            "reconcile: pass complete"
        );
        Ok(summary)
    }

    /// Run passes every `interval` until the handle is aborted or the session
    /// is rejected.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.reconcile_once().await {
                    error!(error = %err, "reconcile: session rejected; stopping");
                    if let Some(session) = &self.session {
                        session.expire();
                    }
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
