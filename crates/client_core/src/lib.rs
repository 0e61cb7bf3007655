//! Client core for the rescue coordination app: claim tracking for rescue
//! reports, the dashboard aggregation, session handling and the HTTP client
//! for the rescue backend.

pub mod dashboard;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod reconcile;
pub mod remote;
pub mod session;
pub mod sighting;

pub use dashboard::{DashboardController, DashboardViewModel, RefreshOutcome};
pub use error::{ClaimError, DashboardError, IdentityError, RemoteError, SightingError};
pub use identity::{resolve_identity, ActorIdentity};
pub use lifecycle::{ClaimOutcome, ReportLifecycleCoordinator, StatusChange};
pub use reconcile::StatusReconciler;
pub use remote::{HttpRescueApi, RescueApi};
pub use session::{Navigator, SessionContext, SessionOptions};
pub use sighting::{SightingOutcome, SightingReporter};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
