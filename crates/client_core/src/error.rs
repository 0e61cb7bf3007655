use shared::{
    domain::ReportStatus,
    error::{ApiError, ErrorCode},
};
use thiserror::Error;

/// Failure of a call to the rescue backend, classified by kind rather than by
/// message text.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("session rejected by server ({status}): {message}")]
    Authentication { status: u16, message: String },
    #[error("network unavailable: {0}")]
    Network(String),
    #[error("api error {status} ({code:?}): {message}")]
    Api {
        status: u16,
        code: ErrorCode,
        message: String,
    },
}

impl RemoteError {
    pub fn from_api_error(status: u16, body: ApiError) -> Self {
        if matches!(status, 401 | 403) || body.code.is_authentication() {
            return Self::Authentication {
                status,
                message: body.message,
            };
        }
        Self::Api {
            status,
            code: body.code,
            message: body.message,
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// True for 4xx responses the caller could fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Authentication { .. } => true,
            Self::Api { status, .. } => (400..500).contains(status),
            Self::Network(_) => false,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClaimError {
    #[error("no signed-in actor; sign in before accepting reports")]
    NotAuthenticated,
    #[error("missing or invalid report reference")]
    InvalidReference,
    #[error("claim declined before confirmation")]
    Declined,
    #[error("report is already {status} and cannot be claimed")]
    AlreadyClosed { status: ReportStatus },
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no actor identity found in local storage")]
    NotFound,
    #[error("failed to read local storage: {0}")]
    Store(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("no actor identity found in local storage")]
    IdentityNotFound,
    #[error("session expired: {message}")]
    SessionExpired { message: String },
    #[error("failed to read local storage: {0}")]
    Store(#[source] anyhow::Error),
}

impl From<IdentityError> for DashboardError {
    fn from(value: IdentityError) -> Self {
        match value {
            IdentityError::NotFound => Self::IdentityNotFound,
            IdentityError::Store(source) => Self::Store(source),
        }
    }
}

#[derive(Debug, Error)]
pub enum SightingError {
    #[error("sighting upload failed: {0}")]
    Upload(#[from] RemoteError),
    #[error("captured frame is empty")]
    EmptyFrame,
}
