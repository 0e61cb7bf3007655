use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use shared::{
    domain::AccountType,
    error::ErrorCode,
    protocol::{DashboardStats, Profile},
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    error::{DashboardError, RemoteError},
    identity::{resolve_identity, ActorIdentity},
    remote::RescueApi,
    session::SessionContext,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardSource {
    Profile,
    Stats,
}

impl DashboardSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Stats => "stats",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradeReason {
    /// Connectivity failure; retrying later may succeed.
    NetworkUnavailable,
    Api { code: ErrorCode, message: String },
}

impl DegradeReason {
    fn from_remote(err: &RemoteError) -> Self {
        match err {
            RemoteError::Network(_) => Self::NetworkUnavailable,
            RemoteError::Api { code, message, .. } => Self::Api {
                code: *code,
                message: message.clone(),
            },
            RemoteError::Authentication { message, .. } => Self::Api {
                code: ErrorCode::Unauthorized,
                message: message.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradedSlot {
    pub source: DashboardSource,
    pub reason: DegradeReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardViewModel {
    pub identity: ActorIdentity,
    pub profile: Profile,
    pub stats: DashboardStats,
    pub notification_count: u64,
    /// Slots holding placeholders instead of live data.
    pub degraded: Vec<DegradedSlot>,
    pub refreshed_at: DateTime<Utc>,
}

impl DashboardViewModel {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn is_live(&self, source: DashboardSource) -> bool {
        !self.degraded.iter().any(|slot| slot.source == source)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Updated(DashboardViewModel),
    /// Another refresh was already running; this call did nothing.
    Skipped,
}

/// Marks a refresh as running; dropping it clears the mark, including when
/// the refresh future is cancelled.
struct RefreshGuard<'a> {
    refreshing: &'a AtomicBool,
}

impl<'a> RefreshGuard<'a> {
    fn acquire(refreshing: &'a AtomicBool) -> Option<Self> {
        refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { refreshing })
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.refreshing.store(false, Ordering::Release);
    }
}

/// Builds the dashboard from independent backend sources, degrading per
/// source instead of failing the whole view.
pub struct DashboardController {
    api: Arc<dyn RescueApi>,
    session: SessionContext,
    role: AccountType,
    refreshing: AtomicBool,
    view: Mutex<Option<DashboardViewModel>>,
}

impl DashboardController {
    pub fn new(api: Arc<dyn RescueApi>, session: SessionContext, role: AccountType) -> Self {
        Self {
            api,
            session,
            role,
            refreshing: AtomicBool::new(false),
            view: Mutex::new(None),
        }
    }

    pub fn role(&self) -> AccountType {
        self.role
    }

    /// Last view installed by a completed refresh.
    pub async fn current(&self) -> Option<DashboardViewModel> {
        self.view.lock().await.clone()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Re-resolve identity, fetch every source, and install the merged view.
    /// Calls made while a refresh is running return `Skipped`.
    pub async fn refresh(&self) -> Result<RefreshOutcome, DashboardError> {
        let Some(_running) = RefreshGuard::acquire(&self.refreshing) else {
            info!(role = %self.role, "dashboard: refresh already running; skipping");
            return Ok(RefreshOutcome::Skipped);
        };

        let view = self.aggregate().await?;
        *self.view.lock().await = Some(view.clone());
        Ok(RefreshOutcome::Updated(view))
    }

    async fn aggregate(&self) -> Result<DashboardViewModel, DashboardError> {
        let identity = resolve_identity(self.session.store().as_ref(), self.role).await?;

        let (profile, stats) = tokio::join!(
            self.api.fetch_profile(&identity),
            self.api.fetch_stats(&identity)
        );

        if let Some(err) = [profile.as_ref().err(), stats.as_ref().err()]
            .into_iter()
            .flatten()
            .find(|err| err.is_authentication())
        {
            warn!(role = %self.role, error = %err, "dashboard: session rejected");
            self.session.expire();
            return Err(DashboardError::SessionExpired {
                message: err.to_string(),
            });
        }

        let mut degraded = Vec::new();
        let profile = settle(DashboardSource::Profile, profile, &mut degraded, || {
            Profile::placeholder(identity.actor_id.clone())
        });
        let stats = settle(
            DashboardSource::Stats,
            stats,
            &mut degraded,
            DashboardStats::zeroed,
        );
        let notification_count = stats.notification_count();

        info!(
            role = %self.role,
            actor_id = %identity.actor_id,
            degraded = degraded.len(),
            notification_count,
            "dashboard: refresh complete"
        );
        Ok(DashboardViewModel {
            identity,
            profile,
            stats,
            notification_count,
            degraded,
            refreshed_at: Utc::now(),
        })
    }
}

fn settle<T>(
    source: DashboardSource,
    result: Result<T, RemoteError>,
    degraded: &mut Vec<DegradedSlot>,
    placeholder: impl FnOnce() -> T,
) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(source = source.as_str(), error = %err, "dashboard: source degraded to placeholder");
            degraded.push(DegradedSlot {
                source,
                reason: DegradeReason::from_remote(&err),
            });
            placeholder()
        }
    }
}

#[cfg(test)]
#[path = "tests/dashboard_tests.rs"]
mod tests;
