use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use shared::protocol::UserInfo;
use storage::KeyValueStore;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info, warn};

use crate::identity::{legacy_id_keys, session_keys, AUTH_TOKEN_KEY, USER_INFO_KEY};

pub const DEFAULT_LOGOUT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_LOGIN_ROUTE: &str = "Login";
pub const DEFAULT_HOME_ROUTE: &str = "Dashboard";

/// Screen navigation owned by the presentation layer. Calls are
/// fire-and-forget.
pub trait Navigator: Send + Sync {
    fn replace(&self, screen: &str);
    fn reset(&self, index: usize, routes: &[String]);
    fn navigate(&self, screen: &str, params: serde_json::Value);
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Time the expiry message stays visible before the forced logout.
    pub logout_delay: Duration,
    pub login_route: String,
    pub home_route: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            logout_delay: DEFAULT_LOGOUT_DELAY,
            login_route: DEFAULT_LOGIN_ROUTE.to_string(),
            home_route: DEFAULT_HOME_ROUTE.to_string(),
        }
    }
}

/// Actor session handed to the coordinators: local store, navigation handle
/// and the forced-logout timer.
#[derive(Clone)]
pub struct SessionContext {
    store: Arc<dyn KeyValueStore>,
    navigator: Arc<dyn Navigator>,
    options: SessionOptions,
    logout_pending: Arc<watch::Sender<bool>>,
}

impl SessionContext {
    pub fn new(store: Arc<dyn KeyValueStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self::with_options(store, navigator, SessionOptions::default())
    }

    pub fn with_options(
        store: Arc<dyn KeyValueStore>,
        navigator: Arc<dyn Navigator>,
        options: SessionOptions,
    ) -> Self {
        Self {
            store,
            navigator,
            options,
            logout_pending: Arc::new(watch::channel(false).0),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Persist the session record and the role's primary legacy key so older
    /// readers keep resolving the same actor. Keys left by a previous session
    /// are removed first.
    pub async fn sign_in(&self, info: &UserInfo, auth_token: Option<&str>) -> Result<()> {
        self.store
            .remove(&session_keys())
            .await
            .context("failed to clear previous session")?;
        let encoded = serde_json::to_string(info).context("failed to encode user_info")?;
        self.store.set(USER_INFO_KEY, &encoded).await?;
        if let Some(entity_id) = info.entity_id.as_ref().filter(|id| !id.is_blank()) {
            if let Some(primary_key) = legacy_id_keys(info.account_type).first() {
                self.store.set(primary_key, entity_id.as_str()).await?;
            }
        }
        if let Some(token) = auth_token {
            self.store.set(AUTH_TOKEN_KEY, token).await?;
        }
        self.navigator.replace(&self.options.home_route);
        info!(account_type = %info.account_type, "session: signed in");
        Ok(())
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.store.remove(&session_keys()).await?;
        self.navigator
            .reset(0, std::slice::from_ref(&self.options.login_route));
        info!("session: signed out");
        Ok(())
    }

    pub fn logout_pending(&self) -> bool {
        *self.logout_pending.borrow()
    }

    /// Resolves once no forced logout is pending.
    pub async fn wait_for_logout(&self) {
        let mut pending = self.logout_pending.subscribe();
        let _ = pending.wait_for(|pending| !*pending).await;
    }

    /// Schedule the forced logout that follows an authentication failure.
    /// Returns `None` when one is already pending.
    pub fn expire(&self) -> Option<JoinHandle<()>> {
        let scheduled = self.logout_pending.send_if_modified(|pending| {
            if *pending {
                return false;
            }
            *pending = true;
            true
        });
        if !scheduled {
            info!("session: forced logout already scheduled");
            return None;
        }

        warn!(
            delay_ms = self.options.logout_delay.as_millis() as u64,
            "session: expired; scheduling forced logout"
        );
        let session = self.clone();
        Some(tokio::spawn(async move {
            tokio::time::sleep(session.options.logout_delay).await;
            if let Err(err) = session.store.purge_all().await {
                error!(error = %err, "session: failed to purge local store during forced logout");
            }
            session
                .navigator
                .reset(0, std::slice::from_ref(&session.options.login_route));
            session.logout_pending.send_replace(false);
            info!("session: forced logout complete");
        }))
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
