use serde::{Deserialize, Serialize};

use crate::domain::{AccountType, ActorId};

/// Label shown in place of profile fields until a profile fetch succeeds.
pub const PROFILE_PLACEHOLDER_NAME: &str = "Loading...";

/// Structured session record cached under the `user_info` key at sign-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub account_type: AccountType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, alias = "id", skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<ActorId>,
    #[serde(default, alias = "ngo_name", alias = "username")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Profile {
    pub fn placeholder(entity_id: ActorId) -> Self {
        Self {
            entity_id: Some(entity_id),
            name: PROFILE_PLACEHOLDER_NAME.to_string(),
            ..Self::default()
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.name == PROFILE_PLACEHOLDER_NAME
    }
}

/// Dashboard counters. Every field is optional on the wire; absent counters
/// read as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_reports: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_reports: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_reports: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_reports: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_volunteers: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_volunteers: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_applications: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_applications: Option<u64>,
}

impl DashboardStats {
    pub fn zeroed() -> Self {
        Self {
            total_reports: Some(0),
            active_reports: Some(0),
            completed_reports: Some(0),
            pending_reports: Some(0),
            total_volunteers: Some(0),
            active_volunteers: Some(0),
            success_rate: Some(0.0),
            total_applications: Some(0),
            pending_applications: Some(0),
        }
    }

    /// Badge count: pending volunteer applications plus active reports.
    pub fn notification_count(&self) -> u64 {
        self.pending_applications
            .unwrap_or(0)
            .saturating_add(self.active_reports.unwrap_or(0))
    }
}
