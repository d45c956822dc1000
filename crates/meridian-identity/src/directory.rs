//! In-process user store.
//!
//! Users are keyed by an opaque id with uniqueness enforced on both username
//! and email. Writes go through optimistic versioning: an update that
//! observed a stale version fails with a conflict instead of clobbering a
//! concurrent write.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use meridian_common::auth::principal::roles;
use meridian_common::auth::server::CallContext;
use meridian_common::auth::{DirectoryUser, UserDirectory};
use meridian_common::clock::SharedClock;
use meridian_common::error::CoreError;

/// A stored user account.
#[derive(Debug, Clone)]
pub struct UserRecord {
    /// Opaque stable id.
    pub user_id: String,
    /// Unique username; token subject.
    pub username: String,
    /// Unique email.
    pub email: String,
    /// bcrypt hash of the password.
    pub password_hash: String,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Optional phone number.
    pub phone: Option<String>,
    /// Deactivated accounts cannot authenticate.
    pub is_active: bool,
    /// Set by the (out-of-scope) verification flow; new accounts start
    /// unverified.
    pub is_email_verified: bool,
    /// Consecutive failed logins; five locks the account.
    pub failed_login_attempts: u32,
    /// Explicit lockout deadline.
    pub locked_until: Option<DateTime<Utc>>,
    /// Granted authorities.
    pub authorities: Vec<String>,
    /// Optimistic-concurrency version.
    pub version: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// Eligibility predicate for order creation.
    pub fn is_valid_for_order(&self) -> bool {
        self.is_active && self.is_email_verified && self.failed_login_attempts < 5
    }

    /// Note a failed login.
    pub fn record_failed_login(&mut self) {
        self.failed_login_attempts += 1;
    }

    /// Note a successful login, clearing the failure counter.
    pub fn record_successful_login(&mut self) {
        self.failed_login_attempts = 0;
        self.locked_until = None;
    }

    /// Project onto the directory shape the resolver consumes.
    pub fn to_directory_user(&self) -> DirectoryUser {
        DirectoryUser {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            authorities: self.authorities.clone(),
            is_active: self.is_active,
            is_email_verified: self.is_email_verified,
            failed_login_attempts: self.failed_login_attempts,
            locked_until: self.locked_until,
        }
    }
}

/// Fields needed to create an account.
#[derive(Debug)]
pub struct NewUser {
    /// Unique username.
    pub username: String,
    /// Unique email.
    pub email: String,
    /// Already-hashed password.
    pub password_hash: String,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Optional phone number.
    pub phone: Option<String>,
}

/// Concurrent in-process user store.
pub struct UserStore {
    users: DashMap<String, UserRecord>,
    by_username: DashMap<String, String>,
    by_email: DashMap<String, String>,
    clock: SharedClock,
}

impl UserStore {
    /// Build an empty store.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            users: DashMap::new(),
            by_username: DashMap::new(),
            by_email: DashMap::new(),
            clock,
        }
    }

    /// Create an account. Fails with `AlreadyExists` when the username or
    /// email is taken.
    pub fn insert(&self, new_user: NewUser) -> Result<UserRecord, CoreError> {
        let user_id = Uuid::new_v4().to_string();

        match self.by_username.entry(new_user.username.clone()) {
            Entry::Occupied(_) => return Err(CoreError::AlreadyExists { entity: "user" }),
            Entry::Vacant(slot) => {
                slot.insert(user_id.clone());
            }
        }
        match self.by_email.entry(new_user.email.clone()) {
            Entry::Occupied(_) => {
                self.by_username.remove(&new_user.username);
                return Err(CoreError::AlreadyExists { entity: "user" });
            }
            Entry::Vacant(slot) => {
                slot.insert(user_id.clone());
            }
        }

        let now = self.clock.now_utc();
        let record = UserRecord {
            user_id: user_id.clone(),
            username: new_user.username,
            email: new_user.email,
            password_hash: new_user.password_hash,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            phone: new_user.phone,
            is_active: true,
            is_email_verified: false,
            failed_login_attempts: 0,
            locked_until: None,
            authorities: vec![roles::USER.to_string()],
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(user_id, record.clone());
        Ok(record)
    }

    /// Fetch by id.
    pub fn get(&self, user_id: &str) -> Option<UserRecord> {
        self.users.get(user_id).map(|r| r.clone())
    }

    /// Fetch by username.
    pub fn get_by_username(&self, username: &str) -> Option<UserRecord> {
        let id = self.by_username.get(username)?.clone();
        self.get(&id)
    }

    /// Persist a modified record.
    ///
    /// The write succeeds only when `record.version` matches the stored
    /// version; the stored version is then bumped and `updated_at` set.
    pub fn update(&self, mut record: UserRecord) -> Result<UserRecord, CoreError> {
        let mut current = self
            .users
            .get_mut(&record.user_id)
            .ok_or(CoreError::NotFound { entity: "user" })?;

        if current.version != record.version {
            return Err(CoreError::VersionConflict {
                entity: "user",
                expected: record.version,
                found: current.version,
            });
        }

        record.version += 1;
        record.updated_at = self.clock.now_utc();
        *current = record.clone();
        Ok(record)
    }
}

/// Directory view of the local store, consumed by the principal resolver.
pub struct LocalDirectory {
    store: Arc<UserStore>,
}

impl LocalDirectory {
    /// Wrap a store.
    pub fn new(store: Arc<UserStore>) -> Self {
        Self { store }
    }
}

#[tonic::async_trait]
impl UserDirectory for LocalDirectory {
    async fn lookup(
        &self,
        username: &str,
        _context: &CallContext,
    ) -> Result<Option<DirectoryUser>, CoreError> {
        Ok(self
            .store
            .get_by_username(username)
            .map(|r| r.to_directory_user()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_common::clock::ManualClock;

    fn store() -> UserStore {
        UserStore::new(ManualClock::at(1_700_000_000_000))
    }

    fn alice() -> NewUser {
        NewUser {
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: "$2b$10$hash".into(),
            first_name: "Alice".into(),
            last_name: "Johnson".into(),
            phone: None,
        }
    }

    #[test]
    fn insert_assigns_id_and_defaults() {
        let store = store();
        let record = store.insert(alice()).unwrap();
        assert!(!record.user_id.is_empty());
        assert!(record.is_active);
        assert!(!record.is_email_verified);
        assert_eq!(record.version, 0);
        assert_eq!(record.authorities, vec![roles::USER.to_string()]);
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let store = store();
        store.insert(alice()).unwrap();

        let mut dup = alice();
        dup.email = "other@example.com".into();
        assert!(matches!(
            store.insert(dup),
            Err(CoreError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn duplicate_email_is_rejected_and_username_stays_free() {
        let store = store();
        store.insert(alice()).unwrap();

        let mut dup = alice();
        dup.username = "alice2".into();
        assert!(matches!(
            store.insert(dup),
            Err(CoreError::AlreadyExists { .. })
        ));

        // The failed insert must not have claimed "alice2".
        let mut fresh = alice();
        fresh.username = "alice2".into();
        fresh.email = "alice2@example.com".into();
        assert!(store.insert(fresh).is_ok());
    }

    #[test]
    fn lookup_by_username_and_id_agree() {
        let store = store();
        let record = store.insert(alice()).unwrap();
        let by_name = store.get_by_username("alice").unwrap();
        assert_eq!(by_name.user_id, record.user_id);
        assert!(store.get_by_username("ghost").is_none());
    }

    #[test]
    fn update_bumps_version() {
        let store = store();
        let mut record = store.insert(alice()).unwrap();
        record.first_name = "Alicia".into();

        let updated = store.update(record).unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(store.get(&updated.user_id).unwrap().first_name, "Alicia");
    }

    #[test]
    fn stale_update_is_a_version_conflict() {
        let store = store();
        let record = store.insert(alice()).unwrap();

        let mut first = record.clone();
        first.first_name = "A".into();
        store.update(first).unwrap();

        let mut stale = record;
        stale.first_name = "B".into();
        assert!(matches!(
            store.update(stale),
            Err(CoreError::VersionConflict {
                expected: 0,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn eligibility_requires_active_verified_and_unlocked() {
        let store = store();
        let mut record = store.insert(alice()).unwrap();
        assert!(!record.is_valid_for_order());

        record.is_email_verified = true;
        assert!(record.is_valid_for_order());

        record.record_failed_login();
        assert!(record.is_valid_for_order());
        for _ in 0..4 {
            record.record_failed_login();
        }
        assert!(!record.is_valid_for_order());

        record.record_successful_login();
        assert!(record.is_valid_for_order());

        record.is_active = false;
        assert!(!record.is_valid_for_order());
    }

    #[tokio::test]
    async fn local_directory_projects_records() {
        let store = Arc::new(store());
        store.insert(alice()).unwrap();
        let directory = LocalDirectory::new(store);

        let ctx = CallContext::background();
        let user = directory.lookup("alice", &ctx).await.unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert!(directory.lookup("ghost", &ctx).await.unwrap().is_none());
    }
}
