use std::{collections::HashMap, fs, time::Duration};

use anyhow::Context;
use storage::ensure_sqlite_parent_dir_exists;

const SETTINGS_FILE: &str = "rescue.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub database_url: String,
    pub logout_delay_ms: u64,
    pub reconcile_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub sighting_cooldown_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000/api/".into(),
            database_url: "sqlite://./data/rescue.db".into(),
            logout_delay_ms: 3000,
            reconcile_interval_secs: 30,
            request_timeout_secs: 15,
            sighting_cooldown_secs: 5,
        }
    }
}

impl Settings {
    pub fn logout_delay(&self) -> Duration {
        Duration::from_millis(self.logout_delay_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn sighting_cooldown(&self) -> Duration {
        Duration::from_secs(self.sighting_cooldown_secs)
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        apply_file(&mut settings, &raw);
    }

    if let Ok(v) = std::env::var("RESCUE_API_URL") {
        settings.api_url = v;
    }
    if let Ok(v) = std::env::var("APP__API_URL") {
        settings.api_url = v;
    }

    if let Ok(v) = std::env::var("RESCUE_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = env_u64("APP__LOGOUT_DELAY_MS") {
        settings.logout_delay_ms = v;
    }
    if let Some(v) = env_u64("APP__RECONCILE_INTERVAL_SECS") {
        settings.reconcile_interval_secs = v;
    }
    if let Some(v) = env_u64("APP__REQUEST_TIMEOUT_SECS") {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = env_u64("APP__SIGHTING_COOLDOWN_SECS") {
        settings.sighting_cooldown_secs = v;
    }

    settings
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Overlay values from a flat `key = "value"` settings file. Unknown keys and
/// unparsable numbers are ignored.
fn apply_file(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) else {
        return;
    };
    if let Some(v) = file_cfg.get("api_url") {
        settings.api_url = v.clone();
    }
    if let Some(v) = file_cfg.get("database_url") {
        settings.database_url = v.clone();
    }
    let number = |key: &str| file_cfg.get(key).and_then(|v| v.trim().parse::<u64>().ok());
    if let Some(v) = number("logout_delay_ms") {
        settings.logout_delay_ms = v;
    }
    if let Some(v) = number("reconcile_interval_secs") {
        settings.reconcile_interval_secs = v;
    }
    if let Some(v) = number("request_timeout_secs") {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = number("sighting_cooldown_secs") {
        settings.sighting_cooldown_secs = v;
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_sqlite_parent_dir_exists(&database_url)
        .with_context(|| format!("failed to prepare database url '{database_url}'"))?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_plain_file_path_to_sqlite_url() {
        assert_eq!(
            normalize_database_url("./data/test.db"),
            "sqlite://./data/test.db"
        );
        assert_eq!(
            normalize_database_url("sqlite:data\\test.db"),
            "sqlite://data/test.db"
        );
        assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(normalize_database_url("  "), Settings::default().database_url);
    }

    #[test]
    fn settings_file_overrides_defaults() {
        let mut settings = Settings::default();
        apply_file(
            &mut settings,
            r#"
            api_url = "https://rescue.example.org/api/"
            reconcile_interval_secs = "10"
            sighting_cooldown_secs = "soon"
            "#,
        );

        assert_eq!(settings.api_url, "https://rescue.example.org/api/");
        assert_eq!(settings.reconcile_interval(), Duration::from_secs(10));
        assert_eq!(settings.sighting_cooldown(), Duration::from_secs(5));
        assert_eq!(settings.database_url, Settings::default().database_url);
    }

    #[test]
    fn malformed_settings_file_is_ignored() {
        let mut settings = Settings::default();
        apply_file(&mut settings, "api_url = [");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn creates_parent_dir_for_sqlite_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("rescue.db");

        let url = prepare_database_url(db_path.to_str().expect("utf-8 path")).expect("prepare");

        assert!(url.starts_with("sqlite://"));
        assert!(dir.path().join("nested").exists());
    }
}
