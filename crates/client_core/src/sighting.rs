use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Local};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    error::SightingError,
    remote::{RescueApi, SightingUpload},
};

pub const TRACKED_ANIMALS: [&str; 6] = ["dog", "cat", "bird", "cow", "sheep", "horse"];
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_SIGHTING_COOLDOWN: Duration = Duration::from_secs(5);
const SIGHTING_MIME_TYPE: &str = "image/jpeg";

/// One object reported by the on-device detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub jpeg: Vec<u8>,
    pub captured_at: DateTime<Local>,
}

impl CapturedFrame {
    pub fn now(jpeg: Vec<u8>) -> Self {
        Self {
            jpeg,
            captured_at: Local::now(),
        }
    }

    pub fn upload_filename(&self) -> String {
        self.captured_at
            .format("detected_%Y%m%d_%H%M%S.jpg")
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct SightingOptions {
    pub tracked_labels: Vec<String>,
    pub min_confidence: f32,
    pub cooldown: Duration,
}

impl Default for SightingOptions {
    fn default() -> Self {
        Self {
            tracked_labels: TRACKED_ANIMALS.iter().map(|l| l.to_string()).collect(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            cooldown: DEFAULT_SIGHTING_COOLDOWN,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SightingOutcome {
    Sent { status: u16, filename: String },
    NoAnimal,
    CoolingDown { remaining: Duration },
}

/// Forwards camera frames containing an animal to the backend, at most once
/// per cooldown window.
pub struct SightingReporter {
    api: Arc<dyn RescueApi>,
    options: SightingOptions,
    last_attempt: Mutex<Option<Instant>>,
}

impl SightingReporter {
    pub fn new(api: Arc<dyn RescueApi>) -> Self {
        Self::with_options(api, SightingOptions::default())
    }

    pub fn with_options(api: Arc<dyn RescueApi>, options: SightingOptions) -> Self {
        Self {
            api,
            options,
            last_attempt: Mutex::new(None),
        }
    }

    /// The highest-confidence detection of a tracked animal, if any clears
    /// the threshold.
    pub fn best_match<'a>(&self, detections: &'a [Detection]) -> Option<&'a Detection> {
        detections
            .iter()
            .filter(|d| d.confidence >= self.options.min_confidence)
            .filter(|d| {
                self.options
                    .tracked_labels
                    .iter()
                    .any(|label| label.eq_ignore_ascii_case(&d.label))
            })
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }

    pub async fn report(
        &self,
        frame: CapturedFrame,
        detections: &[Detection],
    ) -> Result<SightingOutcome, SightingError> {
        let Some(best) = self.best_match(detections) else {
            return Ok(SightingOutcome::NoAnimal);
        };
        if frame.jpeg.is_empty() {
            return Err(SightingError::EmptyFrame);
        }

        {
            let mut last_attempt = self.last_attempt.lock().await;
            if let Some(last) = *last_attempt {
                let elapsed = last.elapsed();
                if elapsed < self.options.cooldown {
                    let remaining = self.options.cooldown - elapsed;
                    info!(
                        label = %best.label,
                        remaining_ms = remaining.as_millis() as u64,
                        "sighting: cooling down; frame skipped"
                    );
                    return Ok(SightingOutcome::CoolingDown { remaining });
                }
            }
            // Failed uploads also start the cooldown.
            *last_attempt = Some(Instant::now());
        }

        let filename = frame.upload_filename();
        info!(
            label = %best.label,
            confidence = best.confidence,
            filename = %filename,
            "sighting: animal detected; uploading frame"
        );
        let upload = SightingUpload {
            filename: filename.clone(),
            mime_type: SIGHTING_MIME_TYPE.to_string(),
            image: frame.jpeg,
        };
        match self.api.submit_sighting(upload).await {
            Ok(status) => Ok(SightingOutcome::Sent { status, filename }),
            Err(err) => {
                warn!(filename = %filename, error = %err, "sighting: upload failed");
                Err(SightingError::Upload(err))
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/sighting_tests.rs"]
mod tests;
