use tracing::instrument;

use crate::{
    ActionKey, CapabilityMode, Deadline, Identity, PermissionLookup, RequiredCapabilities,
    StoreError,
};

/// Outcome of a permission check that completed.
///
/// A lookup that could not complete is reported as a [`StoreError`] by
/// [`authorize`] and never appears here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// `missing` lists the keys that were checked and found absent: the
    /// first missing key for `All`, every key for `Any`.
    Deny { missing: Vec<ActionKey> },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Decide whether `identity`'s role satisfies `required`.
///
/// - `All`: stops at the first key that is not granted.
/// - `Any`: stops at the first key that is granted.
///
/// Every lookup runs under `deadline`; if any lookup fails the whole call
/// fails, regardless of what earlier lookups returned.
#[instrument(
    skip(lookup, identity, deadline),
    fields(user_id = %identity.user_id, role_id = %identity.role_id, required = %required),
    err
)]
pub async fn authorize<L>(
    lookup: &L,
    identity: &Identity,
    required: &RequiredCapabilities,
    deadline: Deadline,
) -> Result<Decision, StoreError>
where
    L: PermissionLookup + ?Sized,
{
    let role_id = identity.role_id;

    let decision = match required.mode() {
        CapabilityMode::All => {
            let mut decision = Decision::Allow;
            for key in required.keys() {
                let granted = deadline
                    .run("has_permission", lookup.has_permission(role_id, key))
                    .await
                    .inspect_err(|e| tracing::error!(error = %e, key = %key, "permission lookup failed"))?;
                if !granted {
                    decision = Decision::Deny {
                        missing: vec![key.clone()],
                    };
                    break;
                }
            }
            decision
        }
        CapabilityMode::Any => {
            let mut decision = Decision::Deny {
                missing: required.keys().to_vec(),
            };
            for key in required.keys() {
                let granted = deadline
                    .run("has_permission", lookup.has_permission(role_id, key))
                    .await
                    .inspect_err(|e| tracing::error!(error = %e, key = %key, "permission lookup failed"))?;
                if granted {
                    decision = Decision::Allow;
                    break;
                }
            }
            decision
        }
    };

    if let Decision::Deny { missing } = &decision {
        tracing::debug!(?missing, "permission denied");
    }
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use calth_core::{BusinessId, RoleId, UserId};

    use super::*;

    #[derive(Default)]
    struct FakeLookup {
        grants: HashMap<RoleId, HashSet<String>>,
        failing: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeLookup {
        fn grant(mut self, role: RoleId, keys: &[&str]) -> Self {
            self.grants
                .entry(role)
                .or_default()
                .extend(keys.iter().map(|k| k.to_string()));
            self
        }

        fn fail_on(mut self, key: &str) -> Self {
            self.failing.insert(key.to_string());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PermissionLookup for FakeLookup {
        async fn has_permission(&self, role_id: RoleId, key: &ActionKey) -> Result<bool, StoreError> {
            self.calls.lock().unwrap().push(key.to_string());
            if self.failing.contains(key.as_str()) {
                return Err(StoreError::Backend("connection reset".into()));
            }
            Ok(self
                .grants
                .get(&role_id)
                .is_some_and(|keys| keys.contains(key.as_str())))
        }
    }

    fn identity(role: RoleId) -> Identity {
        Identity::new(UserId::new(), BusinessId::new(), role)
    }

    fn keys(raw: &[&str]) -> Vec<ActionKey> {
        raw.iter().map(|k| ActionKey::parse(k).unwrap()).collect()
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn all_mode_requires_every_key() {
        let role = RoleId::new();
        let lookup = FakeLookup::default().grant(role, &["a", "b"]);

        let ok = RequiredCapabilities::all(keys(&["a", "b"])).unwrap();
        let partial = RequiredCapabilities::all(keys(&["a", "c"])).unwrap();

        assert_eq!(
            authorize(&lookup, &identity(role), &ok, deadline()).await.unwrap(),
            Decision::Allow
        );
        assert_eq!(
            authorize(&lookup, &identity(role), &partial, deadline())
                .await
                .unwrap(),
            Decision::Deny {
                missing: keys(&["c"])
            }
        );
    }

    #[tokio::test]
    async fn all_mode_stops_at_first_missing_key() {
        let role = RoleId::new();
        let lookup = FakeLookup::default().grant(role, &["c"]);
        let req = RequiredCapabilities::all(keys(&["a", "b", "c"])).unwrap();

        let decision = authorize(&lookup, &identity(role), &req, deadline())
            .await
            .unwrap();
        assert!(!decision.is_allowed());
        assert_eq!(lookup.calls(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn any_mode_stops_at_first_match() {
        let role = RoleId::new();
        let lookup = FakeLookup::default().grant(role, &["b"]).fail_on("c");
        let req = RequiredCapabilities::any(keys(&["a", "b", "c"])).unwrap();

        assert_eq!(
            authorize(&lookup, &identity(role), &req, deadline()).await.unwrap(),
            Decision::Allow
        );
        assert_eq!(lookup.calls(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn any_mode_denies_when_nothing_matches() {
        let role = RoleId::new();
        let lookup = FakeLookup::default().grant(RoleId::new(), &["a"]);
        let req = RequiredCapabilities::any(keys(&["a", "b"])).unwrap();

        assert_eq!(
            authorize(&lookup, &identity(role), &req, deadline()).await.unwrap(),
            Decision::Deny {
                missing: keys(&["a", "b"])
            }
        );
    }

    #[tokio::test]
    async fn lookup_failure_is_an_error_not_a_deny() {
        let role = RoleId::new();
        let lookup = FakeLookup::default().grant(role, &["a"]).fail_on("b");
        let req = RequiredCapabilities::all(keys(&["a", "b"])).unwrap();

        let err = authorize(&lookup, &identity(role), &req, deadline())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Backend("connection reset".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookup_hits_the_deadline() {
        struct Stalled;

        #[async_trait]
        impl PermissionLookup for Stalled {
            async fn has_permission(&self, _: RoleId, _: &ActionKey) -> Result<bool, StoreError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(true)
            }
        }

        let req = RequiredCapabilities::single(ActionKey::from_static("roles-view"));
        let err = authorize(
            &Stalled,
            &identity(RoleId::new()),
            &req,
            Deadline::after(Duration::from_millis(10)),
        )
        .await
        .unwrap_err();
        assert_eq!(err, StoreError::Timeout("has_permission"));
    }
}
