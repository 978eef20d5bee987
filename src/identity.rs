//! Identity abstraction for lock holders.
//!
//! The lock manager never authenticates anyone. It consumes an identity
//! supplied by the caller's environment through the [`LockerId`] trait and
//! persists only its serialized form — a set of opaque `key=value` owner
//! fields — into the lock record. Two capabilities drive every arbitration
//! decision:
//!
//! - `same_id`: is this caller the same logical holder as the persisted
//!   owner (re-entrant acquisition and release)?
//! - `can_override`: may this caller seize a valid lease held by someone
//!   else (administrative override)?
//!
//! [`SessionId`] is the built-in adapter for environments without a richer
//! identity system: a `user@host` pair plus an optional session label.

use std::collections::BTreeMap;

/// Serialized owner identity, persisted as the owner lines of a lock record.
///
/// An ordered string map; ordering is deterministic (sorted by key) so that
/// serialized records are stable. The keys `created` and `expires` are
/// reserved by the record format and rejected by the codec at write time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerFields(BTreeMap<String, String>);

impl OwnerFields {
    /// Create an empty field set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, replacing any previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a field value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterate over fields in sorted key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no fields are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for OwnerFields {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Capability set of a lock-holding identity.
///
/// Implemented by the consumer's identity system; the manager only ever
/// calls these three methods. The serialized form produced by [`fields`]
/// must carry enough information for a later [`same_id`] comparison by an
/// equivalent identity, possibly in a different process.
///
/// [`fields`]: LockerId::fields
/// [`same_id`]: LockerId::same_id
pub trait LockerId {
    /// Serialize this identity into the owner fields of a lock record.
    fn fields(&self) -> OwnerFields;

    /// Whether the persisted `owner` denotes the same logical holder as
    /// this identity.
    fn same_id(&self, owner: &OwnerFields) -> bool;

    /// Whether this identity may seize a valid lease held by a different
    /// holder.
    fn can_override(&self) -> bool;
}

/// Owner field key for the user name.
pub const FIELD_USER: &str = "user";

/// Owner field key for the host name.
pub const FIELD_HOST: &str = "host";

/// Owner field key for the optional session label.
pub const FIELD_SESSION: &str = "session";

/// Built-in `user@host` identity adapter.
///
/// Two `SessionId`s are the same holder when user, host, and session label
/// all match. The override capability is a plain flag, set by the caller's
/// environment (e.g. for an administrative session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId {
    user: String,
    host: String,
    session: Option<String>,
    admin: bool,
}

impl SessionId {
    /// Create an identity for the given user and host.
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            session: None,
            admin: false,
        }
    }

    /// Create an identity for the current process environment.
    ///
    /// User comes from `USER` (or `USERNAME`), host from the system
    /// hostname; either falls back to `"unknown"` rather than failing,
    /// since identity resolution must never block a lock operation.
    pub fn current() -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());

        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self::new(user, host)
    }

    /// Attach a session label, distinguishing concurrent sessions of the
    /// same user on the same host.
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Grant the override capability.
    pub fn with_override(mut self) -> Self {
        self.admin = true;
        self
    }

    /// The `user@host` display form.
    pub fn display_name(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl LockerId for SessionId {
    fn fields(&self) -> OwnerFields {
        let mut fields = OwnerFields::new();
        fields.insert(FIELD_USER, &self.user);
        fields.insert(FIELD_HOST, &self.host);
        if let Some(session) = &self.session {
            fields.insert(FIELD_SESSION, session);
        }
        fields
    }

    fn same_id(&self, owner: &OwnerFields) -> bool {
        owner.get(FIELD_USER) == Some(self.user.as_str())
            && owner.get(FIELD_HOST) == Some(self.host.as_str())
            && owner.get(FIELD_SESSION) == self.session.as_deref()
    }

    fn can_override(&self) -> bool {
        self.admin
    }
}
