//! Lock keys and resource-type key-generation schemes.
//!
//! A [`LockKey`] is an opaque handle naming exactly one lock-record location
//! beneath the manager's lock root. Callers never construct keys directly;
//! the manager issues them through its registered [`KeyScheme`]s, which keeps
//! location-mapping policy in one place. Keys are deterministic — the same
//! (resource type, resource identity) pair maps to the same location across
//! processes and restarts — and cheap to recreate, so they are never cached.
//!
//! # Buckets
//!
//! Each resource type owns one directory ("bucket") under the lock root:
//!
//! - `applications/<name>.lock` — one lock per deployed application
//! - `server/server.lock` — the single server configuration lock
//! - `users/<name>.lock` — one lock per user's configuration
//!
//! Bucket directories are created once at manager construction, not per key.

use crate::error::{LockError, Result};
use std::path::{Path, PathBuf};

/// File extension for lock records, distinguishing them from data files.
pub const LOCK_FILE_EXTENSION: &str = "lock";

/// Resource-type tag for application locks.
pub const RESOURCE_APPLICATIONS: &str = "applications";

/// Resource-type tag for the server configuration lock.
pub const RESOURCE_SERVER_CONFIG: &str = "server-config";

/// Resource-type tag for per-user configuration locks.
pub const RESOURCE_USER_CONFIG: &str = "user-config";

/// Opaque handle identifying the storage location of one resource's lease.
///
/// Equality and hashing follow the underlying location, not object
/// identity: two keys issued for the same (type, identity) pair compare
/// equal regardless of when or where they were created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    path: PathBuf,
}

impl LockKey {
    /// Issue a key for the given record path. Manager-internal; callers
    /// obtain keys through `LockManager::lock_key`.
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The canonical record location this key addresses.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Rule mapping a resource identity to a canonical lock-record name.
///
/// One implementation per resource kind, registered in the manager's
/// lookup table at construction. Implementations must be pure: no storage
/// access, and the same identity always yields the same name.
pub trait KeyScheme: Send + Sync {
    /// Directory under the lock root that holds this resource type's
    /// records. Created once at manager initialization.
    fn bucket(&self) -> &'static str;

    /// Canonical file stem (without the `.lock` extension) for the given
    /// resource identity.
    ///
    /// # Errors
    ///
    /// [`LockError::InvalidResourceIdentity`] if the identity is empty or
    /// would name a location outside the bucket.
    fn file_stem(&self, resource_id: &str) -> Result<String>;

    /// Build the full record path beneath `root` for `resource_id`.
    fn lock_path(&self, root: &Path, resource_id: &str) -> Result<PathBuf> {
        let stem = self.file_stem(resource_id)?;
        let mut path = root.join(self.bucket());
        path.push(format!("{}.{}", stem, LOCK_FILE_EXTENSION));
        Ok(path)
    }
}

/// Reject identities that are empty or would escape their bucket.
fn checked_stem(resource_id: &str) -> Result<String> {
    if resource_id.is_empty() {
        return Err(LockError::InvalidResourceIdentity {
            identity: resource_id.to_string(),
            reason: "identity must not be empty".to_string(),
        });
    }

    if resource_id.contains(['/', '\\', '\0']) || resource_id == "." || resource_id == ".." {
        return Err(LockError::InvalidResourceIdentity {
            identity: resource_id.to_string(),
            reason: "identity must not contain path separators or traversal components"
                .to_string(),
        });
    }

    Ok(resource_id.to_string())
}

/// Keys application locks by application name.
#[derive(Debug, Default)]
pub struct ApplicationScheme;

impl KeyScheme for ApplicationScheme {
    fn bucket(&self) -> &'static str {
        "applications"
    }

    fn file_stem(&self, resource_id: &str) -> Result<String> {
        checked_stem(resource_id)
    }
}

/// Keys the server configuration lock by a fixed id.
///
/// There is exactly one server configuration, so the resource identity is
/// ignored and every key addresses the same record.
#[derive(Debug, Default)]
pub struct ServerConfigScheme;

impl KeyScheme for ServerConfigScheme {
    fn bucket(&self) -> &'static str {
        "server"
    }

    fn file_stem(&self, _resource_id: &str) -> Result<String> {
        Ok("server".to_string())
    }
}

/// Keys per-user configuration locks by user name.
#[derive(Debug, Default)]
pub struct UserConfigScheme;

impl KeyScheme for UserConfigScheme {
    fn bucket(&self) -> &'static str {
        "users"
    }

    fn file_stem(&self, resource_id: &str) -> Result<String> {
        checked_stem(resource_id)
    }
}
