use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{AccountType, Report, ReportId},
    error::{ApiError, ErrorCode},
    protocol::{DashboardStats, Profile},
};
use storage::KeyValueStore;
use tracing::{info, warn};
use url::Url;

use crate::{
    error::RemoteError,
    identity::{ActorIdentity, AUTH_TOKEN_KEY},
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const SIGHTING_UPLOAD_SEGMENTS: [&str; 2] = ["animal", "test-gemini"];
const SIGHTING_FILE_FIELD: &str = "image";

#[derive(Debug, Clone)]
pub struct SightingUpload {
    pub filename: String,
    pub mime_type: String,
    pub image: Vec<u8>,
}

/// The slice of the rescue backend the client core depends on.
#[async_trait]
pub trait RescueApi: Send + Sync {
    async fn fetch_profile(&self, identity: &ActorIdentity) -> Result<Profile, RemoteError>;
    async fn fetch_stats(&self, identity: &ActorIdentity) -> Result<DashboardStats, RemoteError>;
    async fn fetch_report(&self, report_id: &ReportId) -> Result<Report, RemoteError>;
    /// Returns the HTTP status of an accepted upload.
    async fn submit_sighting(&self, upload: SightingUpload) -> Result<u16, RemoteError>;
}

pub struct HttpRescueApi {
    http: Client,
    base_url: Url,
    token_store: Option<Arc<dyn KeyValueStore>>,
}

impl HttpRescueApi {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = normalize_base_url(base_url)?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url,
            token_store: None,
        })
    }

    /// Attach `auth_token` from this store as a bearer token on every request.
    pub fn with_token_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments).push("");
        }
        url
    }

    async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let Some(store) = &self.token_store else {
            return request;
        };
        match store.get_present(AUTH_TOKEN_KEY).await {
            Ok(Some(token)) => request.bearer_auth(token),
            Ok(None) => request,
            Err(err) => {
                warn!(error = %err, "http: failed to read auth token; sending request without it");
                request
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, RemoteError> {
        let response = self
            .authorized(self.http.get(url))
            .await
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        let status = response.status().as_u16();
        response.json::<T>().await.map_err(|err| {
            if err.is_decode() {
                RemoteError::Api {
                    status,
                    code: ErrorCode::Internal,
                    message: format!("invalid response body: {err}"),
                }
            } else {
                transport_error(err)
            }
        })
    }
}

fn entity_segment(account_type: AccountType) -> &'static str {
    match account_type {
        AccountType::Ngo => "ngo",
        AccountType::User => "user",
    }
}

#[async_trait]
impl RescueApi for HttpRescueApi {
    async fn fetch_profile(&self, identity: &ActorIdentity) -> Result<Profile, RemoteError> {
        let url = self.endpoint(&[
            entity_segment(identity.account_type),
            identity.actor_id.as_str(),
        ]);
        self.get_json(url).await
    }

    async fn fetch_stats(&self, identity: &ActorIdentity) -> Result<DashboardStats, RemoteError> {
        let url = self.endpoint(&[
            entity_segment(identity.account_type),
            identity.actor_id.as_str(),
            "stats",
        ]);
        self.get_json(url).await
    }

    async fn fetch_report(&self, report_id: &ReportId) -> Result<Report, RemoteError> {
        let url = self.endpoint(&["reports", report_id.as_str()]);
        self.get_json(url).await
    }

    async fn submit_sighting(&self, upload: SightingUpload) -> Result<u16, RemoteError> {
        let size_bytes = upload.image.len();
        let part = multipart::Part::bytes(upload.image)
            .file_name(upload.filename.clone())
            .mime_str(&upload.mime_type)
            .map_err(|err| RemoteError::Api {
                status: 400,
                code: ErrorCode::Validation,
                message: format!("invalid upload mime type '{}': {err}", upload.mime_type),
            })?;
        let form = multipart::Form::new().part(SIGHTING_FILE_FIELD, part);

        let response = self
            .authorized(self.http.post(self.endpoint(&SIGHTING_UPLOAD_SEGMENTS)))
            .await
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        let status = response.status().as_u16();
        info!(
            filename = %upload.filename,
            size_bytes,
            status,
            "sighting: upload accepted"
        );
        Ok(status)
    }
}

fn normalize_base_url(raw: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(raw.trim()).with_context(|| format!("invalid api url '{raw}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("api url must use http or https: '{raw}'");
    }
    if url.cannot_be_a_base() {
        bail!("api url cannot be used as a base: '{raw}'");
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let status = status.as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::from_api_error(
        status,
        parse_error_body(status, &body),
    ))
}

fn parse_error_body(status: u16, body: &str) -> ApiError {
    if let Ok(api_error) = serde_json::from_str::<ApiError>(body) {
        return api_error;
    }

    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["detail", "error", "message"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("http status {status}")
            } else {
                trimmed.to_string()
            }
        });
    ApiError::new(ErrorCode::from_status(status), message)
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    RemoteError::Network(err.to_string())
}

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod tests;
