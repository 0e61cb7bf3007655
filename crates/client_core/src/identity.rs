use shared::{
    domain::{AccountType, ActorId},
    protocol::UserInfo,
};
use storage::KeyValueStore;
use tracing::{info, warn};

use crate::error::IdentityError;

pub const USER_INFO_KEY: &str = "user_info";
pub const AUTH_TOKEN_KEY: &str = "auth_token";

const NGO_LEGACY_ID_KEYS: [&str; 3] = ["currentNGOId", "ngoId", "NGO_ID"];
const USER_LEGACY_ID_KEYS: [&str; 3] = ["currentUserId", "userId", "USER_ID"];

/// Single-value id keys written by older builds, in lookup order.
pub fn legacy_id_keys(account_type: AccountType) -> &'static [&'static str] {
    match account_type {
        AccountType::Ngo => &NGO_LEGACY_ID_KEYS,
        AccountType::User => &USER_LEGACY_ID_KEYS,
    }
}

/// Every key that carries session identity for any role.
pub fn session_keys() -> Vec<&'static str> {
    let mut keys = vec![USER_INFO_KEY, AUTH_TOKEN_KEY];
    keys.extend(NGO_LEGACY_ID_KEYS);
    keys.extend(USER_LEGACY_ID_KEYS);
    keys
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorIdentity {
    pub account_type: AccountType,
    pub actor_id: ActorId,
}

/// Resolve the signed-in actor for `role`.
///
/// The structured `user_info` record wins when it names `role` and carries an
/// entity id. Otherwise the legacy keys are tried in order and the first
/// present value is used. Nothing is cached; every call re-reads the store.
pub async fn resolve_identity(
    store: &dyn KeyValueStore,
    role: AccountType,
) -> Result<ActorIdentity, IdentityError> {
    if let Some(actor_id) = identity_from_user_info(store, role).await? {
        return Ok(ActorIdentity {
            account_type: role,
            actor_id,
        });
    }

    for key in legacy_id_keys(role) {
        let value = store
            .get_present(key)
            .await
            .map_err(IdentityError::Store)?;
        if let Some(value) = value {
            info!(key = *key, role = %role, "identity: resolved from legacy key");
            return Ok(ActorIdentity {
                account_type: role,
                actor_id: ActorId::new(value.trim()),
            });
        }
    }

    Err(IdentityError::NotFound)
}

async fn identity_from_user_info(
    store: &dyn KeyValueStore,
    role: AccountType,
) -> Result<Option<ActorId>, IdentityError> {
    let Some(raw) = store
        .get_present(USER_INFO_KEY)
        .await
        .map_err(IdentityError::Store)?
    else {
        return Ok(None);
    };

    let info = match serde_json::from_str::<UserInfo>(&raw) {
        Ok(info) => info,
        Err(err) => {
            warn!(error = %err, "identity: ignoring malformed user_info record");
            return Ok(None);
        }
    };

    if info.account_type != role {
        info!(
            stored = %info.account_type,
            requested = %role,
            "identity: user_info belongs to another role"
        );
        return Ok(None);
    }

    Ok(info.entity_id.filter(|id| !id.is_blank()))
}

#[cfg(test)]
#[path = "tests/identity_tests.rs"]
mod tests;
