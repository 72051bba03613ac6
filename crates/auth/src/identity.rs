use serde::{Deserialize, Serialize};

use calth_core::{BusinessId, RoleId, UserId};

/// Identity of an authenticated user.
///
/// Produced once when a credential pair is issued and carried inside the
/// signed tokens; it is never re-derived mid-session. Role or tenant changes
/// become visible only once a new pair is issued.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: UserId,
    pub business_id: BusinessId,
    pub role_id: RoleId,
}

impl Identity {
    pub fn new(user_id: UserId, business_id: BusinessId, role_id: RoleId) -> Self {
        Self {
            user_id,
            business_id,
            role_id,
        }
    }
}

impl core::fmt::Display for Identity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "user={} business={} role={}",
            self.user_id, self.business_id, self.role_id
        )
    }
}

/// A freshly issued access/refresh token pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl core::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}
