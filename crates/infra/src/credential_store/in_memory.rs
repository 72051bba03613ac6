use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use calth_auth::store::{
    BusinessRecord, PermissionRecord, RoleGrants, RoleRecord, UserCredentials, UserProfile,
    UserRecord,
};
use calth_auth::{
    ActionKey, GrantSet, Identity, IdentityStore, NewRole, PermissionLookup, RoleFieldsUpdate,
    RoleGrantStore, SessionStore, StoreError,
};
use calth_core::{BusinessId, PermissionId, RoleId, UserId};

#[derive(Debug, Clone)]
struct StoredBusiness {
    record: BusinessRecord,
    deleted: bool,
}

#[derive(Debug, Clone)]
struct StoredUser {
    profile: UserProfile,
    password_hash: String,
    refresh_token: Option<String>,
    deleted: bool,
}

#[derive(Debug, Clone)]
struct StoredRole {
    record: RoleRecord,
    deleted: bool,
}

#[derive(Debug, Clone)]
struct StoredPermission {
    record: PermissionRecord,
    deleted: bool,
}

#[derive(Debug, Clone, Default)]
struct State {
    businesses: HashMap<BusinessId, StoredBusiness>,
    users: HashMap<UserId, StoredUser>,
    roles: HashMap<RoleId, StoredRole>,
    permissions: HashMap<PermissionId, StoredPermission>,
    /// Edge lists in insertion order.
    grants: HashMap<RoleId, Vec<PermissionId>>,
}

impl State {
    fn live_business(&self, business_id: BusinessId) -> Option<&StoredBusiness> {
        self.businesses.get(&business_id).filter(|b| !b.deleted)
    }

    fn live_user(&self, user_id: UserId) -> Option<&StoredUser> {
        self.users.get(&user_id).filter(|u| !u.deleted)
    }

    fn live_role(&self, role_id: RoleId) -> Option<&StoredRole> {
        self.roles.get(&role_id).filter(|r| !r.deleted)
    }

    fn value_taken(&self, value: &str, except: Option<RoleId>) -> bool {
        self.roles
            .values()
            .any(|r| r.record.value == value && Some(r.record.id) != except)
    }

    fn check_permissions_exist(&self, grants: &GrantSet) -> Result<(), StoreError> {
        match grants
            .ids()
            .iter()
            .find(|id| !self.permissions.contains_key(*id))
        {
            Some(id) => Err(StoreError::MissingReference(format!("permission {id}"))),
            None => Ok(()),
        }
    }
}

/// Seed data for a user row.
#[derive(Debug, Clone)]
pub struct SeedUser<'a> {
    pub business_id: BusinessId,
    pub role_id: RoleId,
    pub email: &'a str,
    pub user_name: &'a str,
    pub password_hash: String,
}

/// In-memory credential store.
///
/// Intended for tests/dev. Every write takes the single state lock, so each
/// trait call is atomic with respect to every other call. Multi-step writes
/// validate against the current state before mutating anything.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    state: RwLock<State>,
    offline: AtomicBool,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable backend: while set, every trait call fails
    /// with [`StoreError::Backend`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("credential store offline".to_string()));
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.online()?;
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.online()?;
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn seed(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_business(&self, name: &str) -> BusinessId {
        let id = BusinessId::new();
        self.seed().businesses.insert(
            id,
            StoredBusiness {
                record: BusinessRecord {
                    id,
                    name: name.to_string(),
                },
                deleted: false,
            },
        );
        id
    }

    pub fn add_role(&self, name: &str, value: &str) -> RoleId {
        let id = RoleId::new();
        let now = Utc::now();
        self.seed().roles.insert(
            id,
            StoredRole {
                record: RoleRecord {
                    id,
                    name: name.to_string(),
                    value: value.to_string(),
                    description: name.to_string(),
                    created_at: now,
                    updated_at: now,
                },
                deleted: false,
            },
        );
        id
    }

    pub fn add_permission(&self, name: &str, action_key: ActionKey) -> PermissionId {
        let id = PermissionId::new();
        self.seed().permissions.insert(
            id,
            StoredPermission {
                record: PermissionRecord {
                    id,
                    name: name.to_string(),
                    category: None,
                    action_key,
                    description: None,
                },
                deleted: false,
            },
        );
        id
    }

    /// Add a single grant edge, ignoring duplicates.
    pub fn grant(&self, role_id: RoleId, permission_id: PermissionId) {
        let mut state = self.seed();
        let edges = state.grants.entry(role_id).or_default();
        if !edges.contains(&permission_id) {
            edges.push(permission_id);
        }
    }

    pub fn add_user(&self, user: SeedUser<'_>) -> UserId {
        let id = UserId::new();
        let now = Utc::now();
        self.seed().users.insert(
            id,
            StoredUser {
                profile: UserProfile {
                    id,
                    ic: String::new(),
                    user_name: user.user_name.to_string(),
                    first_name: String::new(),
                    last_name: String::new(),
                    email: user.email.to_string(),
                    phone_number: String::new(),
                    role_id: user.role_id,
                    business_id: user.business_id,
                    created_at: now,
                    updated_at: now,
                },
                password_hash: user.password_hash,
                refresh_token: None,
                deleted: false,
            },
        );
        id
    }

    pub fn soft_delete_business(&self, business_id: BusinessId) {
        if let Some(b) = self.seed().businesses.get_mut(&business_id) {
            b.deleted = true;
        }
    }

    pub fn soft_delete_user(&self, user_id: UserId) {
        if let Some(u) = self.seed().users.get_mut(&user_id) {
            u.deleted = true;
        }
    }

    pub fn soft_delete_permission(&self, permission_id: PermissionId) {
        if let Some(p) = self.seed().permissions.get_mut(&permission_id) {
            p.deleted = true;
        }
    }

    /// Move a user to another role (stands in for user CRUD).
    pub fn assign_role(&self, user_id: UserId, role_id: RoleId) {
        if let Some(u) = self.seed().users.get_mut(&user_id) {
            u.profile.role_id = role_id;
            u.profile.updated_at = Utc::now();
        }
    }

    pub fn refresh_token_of(&self, user_id: UserId) -> Option<String> {
        self.seed()
            .users
            .get(&user_id)
            .and_then(|u| u.refresh_token.clone())
    }

    /// Raw edge list for a role, including edges to soft-deleted permissions.
    pub fn edges_of(&self, role_id: RoleId) -> Vec<PermissionId> {
        self.seed().grants.get(&role_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl IdentityStore for InMemoryCredentialStore {
    async fn find_business(&self, id: BusinessId) -> Result<Option<BusinessRecord>, StoreError> {
        let state = self.read()?;
        Ok(state.live_business(id).map(|b| b.record.clone()))
    }

    async fn find_user_by_email(
        &self,
        business_id: BusinessId,
        email: &str,
    ) -> Result<Option<UserCredentials>, StoreError> {
        let state = self.read()?;
        Ok(state
            .users
            .values()
            .find(|u| {
                !u.deleted && u.profile.business_id == business_id && u.profile.email == email
            })
            .map(|u| UserCredentials {
                user_id: u.profile.id,
                business_id: u.profile.business_id,
                role_id: u.profile.role_id,
                password_hash: u.password_hash.clone(),
            }))
    }

    async fn find_user(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let state = self.read()?;
        let user = state
            .live_user(user_id)
            .filter(|u| state.live_business(u.profile.business_id).is_some());
        Ok(user.map(|u| UserRecord {
            user_id: u.profile.id,
            business_id: u.profile.business_id,
            role_id: u.profile.role_id,
            refresh_token: u.refresh_token.clone(),
        }))
    }

    async fn user_profile(&self, identity: &Identity) -> Result<Option<UserProfile>, StoreError> {
        let state = self.read()?;
        Ok(state
            .live_user(identity.user_id)
            .filter(|u| u.profile.business_id == identity.business_id)
            .map(|u| u.profile.clone()))
    }
}

#[async_trait]
impl SessionStore for InMemoryCredentialStore {
    async fn record_refresh(&self, user_id: UserId, token: &str) -> Result<(), StoreError> {
        let mut state = self.write()?;
        match state.users.get_mut(&user_id).filter(|u| !u.deleted) {
            Some(user) => {
                user.refresh_token = Some(token.to_string());
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("user {user_id}"))),
        }
    }

    async fn swap_refresh(
        &self,
        user_id: UserId,
        expected: &str,
        new: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        match state.users.get_mut(&user_id).filter(|u| !u.deleted) {
            Some(user) if user.refresh_token.as_deref() == Some(expected) => {
                user.refresh_token = Some(new.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_refresh(&self, user_id: UserId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if let Some(user) = state.users.get_mut(&user_id) {
            user.refresh_token = None;
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionLookup for InMemoryCredentialStore {
    async fn has_permission(&self, role_id: RoleId, key: &ActionKey) -> Result<bool, StoreError> {
        let state = self.read()?;
        if state.live_role(role_id).is_none() {
            return Ok(false);
        }
        let Some(edges) = state.grants.get(&role_id) else {
            return Ok(false);
        };
        Ok(edges.iter().any(|pid| {
            state
                .permissions
                .get(pid)
                .is_some_and(|p| !p.deleted && &p.record.action_key == key)
        }))
    }
}

#[async_trait]
impl RoleGrantStore for InMemoryCredentialStore {
    async fn create_role(&self, role: &NewRole, grants: &GrantSet) -> Result<RoleId, StoreError> {
        let mut state = self.write()?;

        if state.value_taken(&role.value, None) {
            return Err(StoreError::Conflict(format!("role value {:?}", role.value)));
        }
        state.check_permissions_exist(grants)?;

        let id = RoleId::new();
        let now = Utc::now();
        state.roles.insert(
            id,
            StoredRole {
                record: RoleRecord {
                    id,
                    name: role.name.clone(),
                    value: role.value.clone(),
                    description: role.description.clone(),
                    created_at: now,
                    updated_at: now,
                },
                deleted: false,
            },
        );
        state.grants.insert(id, grants.ids().to_vec());
        Ok(id)
    }

    async fn replace_grants(
        &self,
        role_id: RoleId,
        fields: Option<&RoleFieldsUpdate>,
        grants: &GrantSet,
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;

        let Some(current) = state.live_role(role_id) else {
            return Err(StoreError::NotFound(format!("role {role_id}")));
        };
        let mut record = current.record.clone();

        if let Some(fields) = fields {
            if let Some(value) = &fields.value {
                if state.value_taken(value, Some(role_id)) {
                    return Err(StoreError::Conflict(format!("role value {value:?}")));
                }
                record.value = value.clone();
            }
            if let Some(name) = &fields.name {
                record.name = name.clone();
            }
            if let Some(description) = &fields.description {
                record.description = description.clone();
            }
        }
        state.check_permissions_exist(grants)?;

        // Nothing has been mutated yet; apply both parts together.
        record.updated_at = Utc::now();
        if let Some(stored) = state.roles.get_mut(&role_id) {
            stored.record = record;
        }
        state.grants.insert(role_id, grants.ids().to_vec());
        Ok(())
    }

    async fn role_with_grants(&self, role_id: RoleId) -> Result<Option<RoleGrants>, StoreError> {
        let state = self.read()?;
        let Some(role) = state.live_role(role_id) else {
            return Ok(None);
        };
        let permissions: Vec<PermissionRecord> = state
            .grants
            .get(&role_id)
            .map(|edges| {
                edges
                    .iter()
                    .filter_map(|pid| state.permissions.get(pid))
                    .filter(|p| !p.deleted)
                    .map(|p| p.record.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(Some(RoleGrants {
            role: role.record.clone(),
            permissions,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> ActionKey {
        ActionKey::parse(k).unwrap()
    }

    fn store_with_role() -> (InMemoryCredentialStore, RoleId, PermissionId, PermissionId) {
        let store = InMemoryCredentialStore::new();
        let role = store.add_role("Editor", "editor");
        let view = store.add_permission("View roles", key("roles-view"));
        let update = store.add_permission("Update roles", key("roles-update"));
        store.grant(role, view);
        (store, role, view, update)
    }

    #[tokio::test]
    async fn has_permission_follows_edges() {
        let (store, role, _, _) = store_with_role();
        assert!(store.has_permission(role, &key("roles-view")).await.unwrap());
        assert!(!store.has_permission(role, &key("roles-update")).await.unwrap());
        assert!(!store
            .has_permission(RoleId::new(), &key("roles-view"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn soft_deleted_permission_grants_nothing() {
        let (store, role, view, _) = store_with_role();
        store.soft_delete_permission(view);
        assert!(!store.has_permission(role, &key("roles-view")).await.unwrap());
    }

    #[tokio::test]
    async fn swap_refresh_is_compare_and_swap() {
        let store = InMemoryCredentialStore::new();
        let business = store.add_business("Clinic");
        let role = store.add_role("Staff", "staff");
        let user = store.add_user(SeedUser {
            business_id: business,
            role_id: role,
            email: "a@clinic.test",
            user_name: "a",
            password_hash: String::new(),
        });

        store.record_refresh(user, "r1").await.unwrap();
        assert!(!store.swap_refresh(user, "r0", "r2").await.unwrap());
        assert!(store.swap_refresh(user, "r1", "r2").await.unwrap());
        assert!(!store.swap_refresh(user, "r1", "r3").await.unwrap());
        assert_eq!(store.refresh_token_of(user).as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn users_of_a_soft_deleted_business_are_invisible() {
        let store = InMemoryCredentialStore::new();
        let business = store.add_business("Clinic");
        let role = store.add_role("Staff", "staff");
        let user = store.add_user(SeedUser {
            business_id: business,
            role_id: role,
            email: "a@clinic.test",
            user_name: "a",
            password_hash: String::new(),
        });
        assert!(store.find_user(user).await.unwrap().is_some());

        store.soft_delete_business(business);
        assert!(store.find_business(business).await.unwrap().is_none());
        assert!(store.find_user(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_refresh_for_unknown_user_fails() {
        let store = InMemoryCredentialStore::new();
        assert!(matches!(
            store.record_refresh(UserId::new(), "r").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn replace_grants_with_unknown_permission_changes_nothing() {
        let (store, role, view, update) = store_with_role();
        let grants = GrantSet::from_ids([update, PermissionId::new()]);
        let fields = RoleFieldsUpdate::new(Some("Renamed"), None, None).unwrap();

        let err = store
            .replace_grants(role, Some(&fields), &grants)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingReference(_)));
        assert_eq!(store.edges_of(role), vec![view]);
        let after = store.role_with_grants(role).await.unwrap().unwrap();
        assert_eq!(after.role.name, "Editor");
    }

    #[tokio::test]
    async fn replace_grants_rejects_taken_value() {
        let (store, role, _, _) = store_with_role();
        store.add_role("Admin", "admin");
        let fields = RoleFieldsUpdate::new(None, Some("admin"), None).unwrap();

        let err = store
            .replace_grants(role, Some(&fields), &GrantSet::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let (store, role, _, _) = store_with_role();
        store.set_offline(true);
        assert!(matches!(
            store.has_permission(role, &key("roles-view")).await,
            Err(StoreError::Backend(_))
        ));
        store.set_offline(false);
        assert!(store.has_permission(role, &key("roles-view")).await.unwrap());
    }
}
