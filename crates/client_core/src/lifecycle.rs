use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::domain::{ActorId, ReportId, ReportStatus};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ClaimError;

const STATUS_EVENT_CAPACITY: usize = 256;

/// Per-report claim progress for this coordinator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    Unclaimed,
    ClaimPending,
    ClaimedLocal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRecord {
    pub report_id: ReportId,
    pub actor_id: ActorId,
    pub claim_id: Uuid,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(ClaimRecord),
    /// The report was claimed earlier in this session; nothing changed.
    AlreadyClaimed(ClaimRecord),
    /// Another claim for the same report is awaiting confirmation; nothing changed.
    InFlight,
}

impl ClaimOutcome {
    pub fn record(&self) -> Option<&ClaimRecord> {
        match self {
            Self::Claimed(record) | Self::AlreadyClaimed(record) => Some(record),
            Self::InFlight => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    LocalClaim,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub report_id: ReportId,
    pub previous: ReportStatus,
    pub current: ReportStatus,
    pub origin: ChangeOrigin,
}

/// Gate between `ClaimPending` and `ClaimedLocal`, typically the user's
/// confirmation prompt.
#[async_trait]
pub trait ClaimConfirmer: Send + Sync {
    async fn confirm(&self, report_id: &ReportId, actor_id: &ActorId) -> bool;
}

pub struct AutoConfirm;

#[async_trait]
impl ClaimConfirmer for AutoConfirm {
    async fn confirm(&self, _report_id: &ReportId, _actor_id: &ActorId) -> bool {
        true
    }
}

pub trait StatusObserver: Send + Sync {
    fn status_changed(&self, change: &StatusChange) -> anyhow::Result<()>;
}

#[derive(Default)]
struct LifecycleState {
    claims: HashMap<ReportId, ClaimRecord>,
    local_status: HashMap<ReportId, ReportStatus>,
    remote_status: HashMap<ReportId, ReportStatus>,
}

impl LifecycleState {
    fn current_status(&self, report_id: &ReportId) -> ReportStatus {
        self.local_status
            .get(report_id)
            .or_else(|| self.remote_status.get(report_id))
            .copied()
            .unwrap_or_default()
    }

    fn known_status(&self, report_id: &ReportId) -> Option<ReportStatus> {
        self.local_status
            .get(report_id)
            .or_else(|| self.remote_status.get(report_id))
            .copied()
    }
}

fn lock_inflight(inflight: &StdMutex<HashSet<ReportId>>) -> MutexGuard<'_, HashSet<ReportId>> {
    inflight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-flight mark for one claim. Dropping it releases the report, so a claim
/// whose future is cancelled mid-confirmation does not block later claims.
struct PendingClaim<'a> {
    inflight: &'a StdMutex<HashSet<ReportId>>,
    report_id: ReportId,
}

impl Drop for PendingClaim<'_> {
    fn drop(&mut self) {
        lock_inflight(self.inflight).remove(&self.report_id);
    }
}

/// Tracks which reports this actor has claimed and the status each one is in,
/// merging optimistic local claims with backend-observed status.
///
/// A claim is committed locally without waiting for the backend. Terminal
/// statuses observed from the backend always overwrite the local view, and
/// nothing moves a report out of a terminal status.
pub struct ReportLifecycleCoordinator {
    confirmer: Arc<dyn ClaimConfirmer>,
    inner: Mutex<LifecycleState>,
    inflight_claims: StdMutex<HashSet<ReportId>>,
    observers: RwLock<Vec<Arc<dyn StatusObserver>>>,
    events: broadcast::Sender<StatusChange>,
}

impl Default for ReportLifecycleCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportLifecycleCoordinator {
    pub fn new() -> Self {
        Self::with_confirmer(Arc::new(AutoConfirm))
    }

    pub fn with_confirmer(confirmer: Arc<dyn ClaimConfirmer>) -> Self {
        let (events, _) = broadcast::channel(STATUS_EVENT_CAPACITY);
        Self {
            confirmer,
            inner: Mutex::new(LifecycleState::default()),
            inflight_claims: StdMutex::new(HashSet::new()),
            observers: RwLock::new(Vec::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.events.subscribe()
    }

    pub async fn add_observer(&self, observer: Arc<dyn StatusObserver>) {
        self.observers.write().await.push(observer);
    }

    pub async fn accept_report(
        &self,
        report_id: &ReportId,
        actor_id: &ActorId,
    ) -> Result<ClaimOutcome, ClaimError> {
        if actor_id.is_blank() {
            return Err(ClaimError::NotAuthenticated);
        }
        if report_id.is_blank() {
            return Err(ClaimError::InvalidReference);
        }

        let pending = {
            let guard = self.inner.lock().await;
            let mut inflight = lock_inflight(&self.inflight_claims);
            if inflight.contains(report_id) {
                info!(report_id = %report_id, "claim: already in flight; ignoring duplicate");
                return Ok(ClaimOutcome::InFlight);
            }
            if let Some(existing) = guard.claims.get(report_id) {
                return Ok(ClaimOutcome::AlreadyClaimed(existing.clone()));
            }
            if let Some(status) = guard.known_status(report_id).filter(|s| s.is_terminal()) {
                return Err(ClaimError::AlreadyClosed { status });
            }
            inflight.insert(report_id.clone());
            PendingClaim {
                inflight: &self.inflight_claims,
                report_id: report_id.clone(),
            }
        };

        let confirmed = self.confirmer.confirm(report_id, actor_id).await;

        let (record, change) = {
            let mut guard = self.inner.lock().await;
            drop(pending);
            if !confirmed {
                info!(report_id = %report_id, "claim: declined; no state changed");
                return Err(ClaimError::Declined);
            }

            let record = ClaimRecord {
                report_id: report_id.clone(),
                actor_id: actor_id.clone(),
                claim_id: Uuid::new_v4(),
                claimed_at: Utc::now(),
            };
            guard.claims.insert(report_id.clone(), record.clone());

            // A terminal status observed while the claim was pending still wins.
            let previous = guard.current_status(report_id);
            let current = if previous.is_terminal() {
                previous
            } else {
                guard
                    .local_status
                    .insert(report_id.clone(), ReportStatus::InProgress);
                ReportStatus::InProgress
            };
            let change = (previous != current).then(|| StatusChange {
                report_id: report_id.clone(),
                previous,
                current,
                origin: ChangeOrigin::LocalClaim,
            });
            (record, change)
        };

        info!(
            report_id = %report_id,
            actor_id = %actor_id,
            claim_id = %record.claim_id,
            "claim: committed locally"
        );
        if let Some(change) = change {
            self.notify(change).await;
        }
        Ok(ClaimOutcome::Claimed(record))
    }

    /// Record a backend-reported status. Returns the resulting change, if the
    /// status visible through `current_status` moved.
    pub async fn observe_status(
        &self,
        report_id: &ReportId,
        status: ReportStatus,
    ) -> Option<StatusChange> {
        let change = {
            let mut guard = self.inner.lock().await;
            let previous = guard.current_status(report_id);
            guard.remote_status.insert(report_id.clone(), status);

            if previous.is_terminal() {
                if previous != status {
                    warn!(
                        report_id = %report_id,
                        current = %previous,
                        observed = %status,
                        "status: ignoring update for report in terminal status"
                    );
                }
                return None;
            }

            if status.is_terminal() {
                guard.local_status.insert(report_id.clone(), status);
            } else if guard.local_status.contains_key(report_id) {
                // The local claim stays authoritative until the backend closes the report.
                return None;
            }

            if previous == status {
                return None;
            }
            StatusChange {
                report_id: report_id.clone(),
                previous,
                current: status,
                origin: ChangeOrigin::Remote,
            }
        };

        info!(
            report_id = %report_id,
            previous = %change.previous,
            current = %change.current,
            "status: applied backend update"
        );
        self.notify(change.clone()).await;
        Some(change)
    }

    pub async fn is_accepted(&self, report_id: &ReportId) -> bool {
        self.inner.lock().await.claims.contains_key(report_id)
    }

    pub async fn current_status(&self, report_id: &ReportId) -> ReportStatus {
        self.inner.lock().await.current_status(report_id)
    }

    pub async fn claim_state(&self, report_id: &ReportId) -> ClaimState {
        let guard = self.inner.lock().await;
        if lock_inflight(&self.inflight_claims).contains(report_id) {
            ClaimState::ClaimPending
        } else if guard.claims.contains_key(report_id) {
            ClaimState::ClaimedLocal
        } else {
            ClaimState::Unclaimed
        }
    }

    pub async fn accepted_reports(&self) -> Vec<ClaimRecord> {
        let mut claims: Vec<ClaimRecord> =
            self.inner.lock().await.claims.values().cloned().collect();
        claims.sort_by(|a, b| a.claimed_at.cmp(&b.claimed_at));
        claims
    }

    /// Observers run after the mutation is committed; their failures are
    /// logged and never undo it.
    async fn notify(&self, change: StatusChange) {
        for observer in self.observers.read().await.iter() {
            if let Err(err) = observer.status_changed(&change) {
                warn!(
                    report_id = %change.report_id,
                    error = %err,
                    "status: observer failed"
                );
            }
        }
        let _ = self.events.send(change);
    }
}

#[cfg(test)]
#[path = "tests/lifecycle_tests.rs"]
mod tests;
