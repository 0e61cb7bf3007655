use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{ActorId, Report, ReportId, ReportStatus, Severity},
    protocol::{DashboardStats, Profile},
};
use tokio::sync::{Mutex, Notify};

use crate::{
    error::RemoteError,
    identity::ActorIdentity,
    lifecycle::ClaimConfirmer,
    remote::{RescueApi, SightingUpload},
    session::Navigator,
};

pub(crate) fn network_down() -> RemoteError {
    RemoteError::Network("connection refused".to_string())
}

pub(crate) fn unauthorized() -> RemoteError {
    RemoteError::Authentication {
        status: 401,
        message: "token expired".to_string(),
    }
}

pub(crate) fn sample_profile(name: &str) -> Profile {
    Profile {
        entity_id: Some(ActorId::new("42")),
        name: name.to_string(),
        email: Some("rescue@example.org".to_string()),
        ..Profile::default()
    }
}

pub(crate) fn sample_report(report_id: &str, status: ReportStatus) -> Report {
    Report {
        report_id: ReportId::new(report_id),
        status,
        severity: Some(Severity::High),
        species: Some("dog".to_string()),
        breed: None,
        symptoms: Some("limping".to_string()),
        location: Default::default(),
        contact: Default::default(),
        created_at: None,
    }
}

/// Backend fake answering from canned results.
pub(crate) struct ScriptedApi {
    pub profile: Mutex<Result<Profile, RemoteError>>,
    pub stats: Mutex<Result<DashboardStats, RemoteError>>,
    pub reports: Mutex<HashMap<ReportId, Result<Report, RemoteError>>>,
    pub sighting: Mutex<Result<u16, RemoteError>>,
    pub delay: Option<Duration>,
    pub profile_calls: AtomicUsize,
    pub stats_calls: AtomicUsize,
    pub uploads: Mutex<Vec<SightingUpload>>,
}

impl ScriptedApi {
    pub fn healthy() -> Self {
        Self {
            profile: Mutex::new(Ok(sample_profile("Paws NGO"))),
            stats: Mutex::new(Ok(DashboardStats {
                active_reports: Some(2),
                pending_applications: Some(3),
                total_reports: Some(10),
                ..DashboardStats::default()
            })),
            reports: Mutex::new(HashMap::new()),
            sighting: Mutex::new(Ok(201)),
            delay: None,
            profile_calls: AtomicUsize::new(0),
            stats_calls: AtomicUsize::new(0),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn set_profile(&self, result: Result<Profile, RemoteError>) {
        *self.profile.lock().await = result;
    }

    pub async fn set_stats(&self, result: Result<DashboardStats, RemoteError>) {
        *self.stats.lock().await = result;
    }

    pub async fn set_report(&self, report_id: &str, result: Result<Report, RemoteError>) {
        self.reports
            .lock()
            .await
            .insert(ReportId::new(report_id), result);
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RescueApi for ScriptedApi {
    async fn fetch_profile(&self, _identity: &ActorIdentity) -> Result<Profile, RemoteError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.profile.lock().await.clone()
    }

    async fn fetch_stats(&self, _identity: &ActorIdentity) -> Result<DashboardStats, RemoteError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.stats.lock().await.clone()
    }

    async fn fetch_report(&self, report_id: &ReportId) -> Result<Report, RemoteError> {
        self.pause().await;
        self.reports
            .lock()
            .await
            .get(report_id)
            .cloned()
            .unwrap_or_else(|| {
                Err(RemoteError::Api {
                    status: 404,
                    code: shared::error::ErrorCode::NotFound,
                    message: format!("report {report_id} not found"),
                })
            })
    }

    async fn submit_sighting(&self, upload: SightingUpload) -> Result<u16, RemoteError> {
        self.uploads.lock().await.push(upload);
        self.sighting.lock().await.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NavCall {
    Replace(String),
    Reset(usize, Vec<String>),
    Navigate(String, serde_json::Value),
}

#[derive(Default)]
pub(crate) struct RecordingNavigator {
    pub calls: std::sync::Mutex<Vec<NavCall>>,
}

impl RecordingNavigator {
    pub fn calls(&self) -> Vec<NavCall> {
        self.calls.lock().expect("navigator lock").clone()
    }

    fn record(&self, call: NavCall) {
        self.calls.lock().expect("navigator lock").push(call);
    }
}

impl Navigator for RecordingNavigator {
    fn replace(&self, screen: &str) {
        self.record(NavCall::Replace(screen.to_string()));
    }

    fn reset(&self, index: usize, routes: &[String]) {
        self.record(NavCall::Reset(index, routes.to_vec()));
    }

    fn navigate(&self, screen: &str, params: serde_json::Value) {
        self.record(NavCall::Navigate(screen.to_string(), params));
    }
}

/// Holds every confirmation until `release` is called.
pub(crate) struct GatedConfirmer {
    pub gate: Arc<Notify>,
    pub approve: bool,
    pub calls: AtomicUsize,
}

impl GatedConfirmer {
    pub fn new(approve: bool) -> Self {
        Self {
            gate: Arc::new(Notify::new()),
            approve,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ClaimConfirmer for GatedConfirmer {
    async fn confirm(&self, _report_id: &ReportId, _actor_id: &ActorId) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        self.approve
    }
}
