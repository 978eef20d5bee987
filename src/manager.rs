//! Lock manager façade.
//!
//! [`LockManager`] owns the resource-type registry, the per-location
//! in-process guards, and the blocking/poll/timeout acquisition loop. All
//! durable state lives in lock records beneath the manager's root
//! directory; there is no in-memory lock table, so any process pointed at
//! the same root participates in the same lock space.
//!
//! # Waiting
//!
//! Contention is visible only by re-reading durable state, so a blocked
//! `acquire` sleeps a fixed poll interval (default 1 second) and retries
//! until granted, timed out, or cancelled through a [`CancelFlag`]. No
//! fairness is guaranteed among waiters: a later caller can win the race
//! when a lease expires or is released.
//!
//! # In-process guards
//!
//! Each record location has its own guard mutex, held across every
//! read-decide-write sequence for that location. Guards are created on
//! demand and pruned once no operation references them, so the map stays
//! proportional to the number of locations under active contention.

use crate::arbiter::{self, Verdict};
use crate::error::{LockError, Result};
use crate::identity::{FIELD_HOST, FIELD_USER, LockerId, OwnerFields};
use crate::key::{
    ApplicationScheme, KeyScheme, LockKey, RESOURCE_APPLICATIONS, RESOURCE_SERVER_CONFIG,
    RESOURCE_USER_CONFIG, ServerConfigScheme, UserConfigScheme,
};
use crate::record::{self, now_ms};
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

/// Default interval between retries while waiting for a contended lock.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of an [`LockManager::acquire`] call.
///
/// Contention and cancellation are ordinary outcomes, not errors; only
/// storage and corruption failures surface as [`LockError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The caller holds the lease (including the re-entrant case where it
    /// already held it).
    Acquired,

    /// Another identity holds a valid lease and the wait budget ran out.
    Denied {
        /// Remaining validity window of the incumbent lease, in ms.
        remaining_ms: i64,
        /// Owner fields of the incumbent.
        owner: OwnerFields,
    },

    /// The wait was cancelled through a [`CancelFlag`] before the lease
    /// could be acquired.
    Interrupted,
}

impl AcquireOutcome {
    /// True iff the caller holds the lease when the call returned.
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired)
    }
}

/// Cooperative cancellation token for blocking acquisitions.
///
/// Clone the flag, hand one clone to the waiting call, and raise it from
/// any thread; the waiter returns [`AcquireOutcome::Interrupted`] at its
/// next poll instead of continuing to wait.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unraised flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag, waking the waiter out of its retry loop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether the flag has been raised.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Read-only snapshot of a currently valid lease.
///
/// Exposes owner-identifying fields and timing without leaking the
/// persisted record format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    /// Owner fields of the holder.
    pub owner: OwnerFields,

    /// When the lease was (re)established, ms since epoch.
    pub created_ms: i64,

    /// Absolute expiry instant, ms since epoch.
    pub expires_at_ms: i64,

    /// Validity remaining at snapshot time, in ms.
    pub remaining_ms: i64,
}

impl LockInfo {
    /// Short display form of the owner (`user@host` when available,
    /// otherwise all fields).
    pub fn owner_display(&self) -> String {
        if let (Some(user), Some(host)) = (self.owner.get(FIELD_USER), self.owner.get(FIELD_HOST))
        {
            return format!("{}@{}", user, host);
        }

        self.owner
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format the remaining validity as a human-readable string.
    pub fn remaining_string(&self) -> String {
        let remaining = chrono::Duration::milliseconds(self.remaining_ms);
        let minutes = remaining.num_minutes();
        let hours = remaining.num_hours();
        let days = remaining.num_days();

        if days > 0 {
            format!("{}d {}h", days, hours % 24)
        } else if hours > 0 {
            format!("{}h {}m", hours, minutes % 60)
        } else {
            format!("{}m", minutes)
        }
    }
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "locked by {}, expires in {}",
            self.owner_display(),
            self.remaining_string()
        )
    }
}

/// Per-location guard mutexes, pruned when unreferenced.
#[derive(Debug, Default)]
struct LocationGuards {
    inner: Mutex<HashMap<PathBuf, Weak<Mutex<()>>>>,
}

impl LocationGuards {
    /// Get (or create) the guard for `path`. Dead entries are pruned on
    /// the way through, keeping the map bounded by live contention.
    fn guard(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut map = lock_unpoisoned(&self.inner);
        map.retain(|_, weak| weak.strong_count() > 0);

        if let Some(existing) = map.get(path).and_then(Weak::upgrade) {
            return existing;
        }

        let fresh = Arc::new(Mutex::new(()));
        map.insert(path.to_path_buf(), Arc::downgrade(&fresh));
        fresh
    }
}

/// Lock a mutex, disregarding poisoning: guards protect no in-memory data,
/// only the read-decide-write sequence, so a panicked holder leaves
/// nothing inconsistent behind.
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for [`LockManager`].
pub struct LockManagerBuilder {
    root: PathBuf,
    poll_interval: Duration,
    schemes: HashMap<String, Box<dyn KeyScheme>>,
}

impl LockManagerBuilder {
    fn new(root: PathBuf) -> Self {
        let mut schemes: HashMap<String, Box<dyn KeyScheme>> = HashMap::new();
        schemes.insert(
            RESOURCE_APPLICATIONS.to_string(),
            Box::new(ApplicationScheme),
        );
        schemes.insert(
            RESOURCE_SERVER_CONFIG.to_string(),
            Box::new(ServerConfigScheme),
        );
        schemes.insert(RESOURCE_USER_CONFIG.to_string(), Box::new(UserConfigScheme));

        Self {
            root,
            poll_interval: DEFAULT_POLL_INTERVAL,
            schemes,
        }
    }

    /// Override the retry interval used while waiting for contended locks.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Register (or replace) a key-generation scheme for a resource type.
    pub fn scheme(mut self, resource_type: impl Into<String>, scheme: Box<dyn KeyScheme>) -> Self {
        self.schemes.insert(resource_type.into(), scheme);
        self
    }

    /// Create the manager, ensuring the root and every registered bucket
    /// directory exist.
    pub fn build(self) -> Result<LockManager> {
        for scheme in self.schemes.values() {
            let bucket = self.root.join(scheme.bucket());
            std::fs::create_dir_all(&bucket)
                .map_err(|e| LockError::storage("create", &bucket, e))?;
        }

        Ok(LockManager {
            root: self.root,
            poll_interval: self.poll_interval,
            schemes: self.schemes,
            guards: LocationGuards::default(),
        })
    }
}

/// Lease-based advisory lock manager over a shared storage root.
///
/// Thread-safe; share one instance per process (e.g. behind an `Arc`).
/// Multiple processes pointing at the same root coordinate through the
/// durable records alone.
pub struct LockManager {
    root: PathBuf,
    poll_interval: Duration,
    schemes: HashMap<String, Box<dyn KeyScheme>>,
    guards: LocationGuards,
}

impl LockManager {
    /// Create a manager over `root` with the built-in resource-type
    /// schemes and default poll interval.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::builder(root).build()
    }

    /// Start building a manager over `root`.
    pub fn builder(root: impl Into<PathBuf>) -> LockManagerBuilder {
        LockManagerBuilder::new(root.into())
    }

    /// The storage root this manager coordinates through.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Issue the lock key for a (resource type, resource identity) pair.
    ///
    /// Pure and deterministic: the same pair always yields a key for the
    /// same location, across processes and restarts. No storage is
    /// touched.
    ///
    /// # Errors
    ///
    /// * [`LockError::UnsupportedResourceType`] - no scheme registered
    /// * [`LockError::InvalidResourceIdentity`] - identity rejected by the scheme
    pub fn lock_key(&self, resource_type: &str, resource_id: &str) -> Result<LockKey> {
        let scheme = self
            .schemes
            .get(resource_type)
            .ok_or_else(|| LockError::UnsupportedResourceType(resource_type.to_string()))?;

        Ok(LockKey::new(scheme.lock_path(&self.root, resource_id)?))
    }

    /// Acquire (or re-acquire) the lease behind `key` for `locker`.
    ///
    /// # Arguments
    ///
    /// * `lease_ms` - Requested lease duration. `0` means "release" (the
    ///   caller models "no lock needed" as a zero-duration request) and
    ///   trivially succeeds; negative is an input error.
    /// * `wait_ms` - Wait budget when the lock is contended: `0` returns
    ///   the denial immediately, positive waits up to that long, negative
    ///   retries forever.
    ///
    /// # Returns
    ///
    /// `Ok` with the outcome — [`AcquireOutcome::is_acquired`] is true iff
    /// `locker` holds the lease when the call returns, including the
    /// re-entrant case. Ordinary contention is never an error; only I/O
    /// and corruption failures are.
    pub fn acquire(
        &self,
        locker: &dyn LockerId,
        key: &LockKey,
        lease_ms: i64,
        wait_ms: i64,
    ) -> Result<AcquireOutcome> {
        self.acquire_cancellable(locker, key, lease_ms, wait_ms, &CancelFlag::new())
    }

    /// [`acquire`](Self::acquire) with a cooperative cancellation token.
    ///
    /// The flag is checked before every sleep; once raised, the call
    /// returns [`AcquireOutcome::Interrupted`] rather than a grant or an
    /// error.
    pub fn acquire_cancellable(
        &self,
        locker: &dyn LockerId,
        key: &LockKey,
        lease_ms: i64,
        wait_ms: i64,
        cancel: &CancelFlag,
    ) -> Result<AcquireOutcome> {
        if lease_ms < 0 {
            return Err(LockError::InvalidLeaseDuration(lease_ms));
        }
        if lease_ms == 0 {
            self.release(locker, key)?;
            return Ok(AcquireOutcome::Acquired);
        }

        let deadline = if wait_ms > 0 {
            Some(Instant::now() + Duration::from_millis(wait_ms as u64))
        } else {
            None // wait_ms == 0 never sleeps; negative waits forever
        };

        loop {
            let verdict = self.arbitrate(locker, key, lease_ms)?;
            let (remaining_ms, owner) = match verdict {
                Verdict::Granted => return Ok(AcquireOutcome::Acquired),
                Verdict::Denied {
                    remaining_ms,
                    owner,
                } => (remaining_ms, owner),
            };

            if wait_ms == 0 {
                return Ok(AcquireOutcome::Denied {
                    remaining_ms,
                    owner,
                });
            }

            if cancel.is_cancelled() {
                debug!("acquire of '{}' cancelled while waiting", key);
                return Ok(AcquireOutcome::Interrupted);
            }

            let mut sleep = self.poll_interval;
            if let Some(deadline) = deadline {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Ok(AcquireOutcome::Denied {
                        remaining_ms,
                        owner,
                    });
                }
                sleep = sleep.min(left);
            }

            debug!(
                "lock '{}' held for {}ms more; retrying in {:?}",
                key, remaining_ms, sleep
            );
            std::thread::sleep(sleep);
        }
    }

    /// Release the lease behind `key` if `locker` holds it.
    ///
    /// A no-op — not an error — when the record is absent, already
    /// expired and gone, or validly held by someone else; losing a lease
    /// to an override must not make the previous holder's release fail.
    /// Expired records are reclaimed regardless of owner.
    pub fn release(&self, locker: &dyn LockerId, key: &LockKey) -> Result<()> {
        let guard = self.guards.guard(key.path());
        let _held = lock_unpoisoned(&guard);

        let Some(current) = record::read_record(key.path())? else {
            return Ok(());
        };

        if locker.same_id(&current.owner) || current.is_expired(now_ms()) {
            debug!("releasing lease at '{}'", key);
            return record::remove_record(key.path());
        }

        debug!("release of '{}' ignored: lease held by another identity", key);
        Ok(())
    }

    /// Whether `locker` currently holds a valid lease behind `key`.
    ///
    /// Read-only: never reclaims, refreshes, or deletes.
    pub fn is_locked(&self, locker: &dyn LockerId, key: &LockKey) -> Result<bool> {
        let now = now_ms();
        match record::read_record(key.path())? {
            Some(current) => Ok(!current.is_expired(now) && locker.same_id(&current.owner)),
            None => Ok(false),
        }
    }

    /// Snapshot the currently valid lease behind `key`, if any.
    ///
    /// `None` when the record is absent or expired. Read-only.
    pub fn lock_info(&self, key: &LockKey) -> Result<Option<LockInfo>> {
        let now = now_ms();
        match record::read_record(key.path())? {
            Some(current) if !current.is_expired(now) => Ok(Some(LockInfo {
                created_ms: current.created_ms,
                expires_at_ms: current.expires_at_ms(),
                remaining_ms: current.remaining_ms(now),
                owner: current.owner,
            })),
            _ => Ok(None),
        }
    }

    /// One arbitration pass under the location's in-process guard.
    fn arbitrate(&self, locker: &dyn LockerId, key: &LockKey, lease_ms: i64) -> Result<Verdict> {
        let guard = self.guards.guard(key.path());
        let _held = lock_unpoisoned(&guard);
        arbiter::decide(key.path(), locker, lease_ms, now_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SessionId;
    use crate::key::{KeyScheme, RESOURCE_APPLICATIONS, RESOURCE_SERVER_CONFIG};
    use crate::record::{LockRecord, create_record_exclusive, read_record};
    use tempfile::TempDir;

    /// Manager with a fast poll interval for wait-loop tests.
    fn test_manager(dir: &TempDir) -> LockManager {
        LockManager::builder(dir.path())
            .poll_interval(Duration::from_millis(5))
            .build()
            .unwrap()
    }

    fn alice() -> SessionId {
        SessionId::new("alice", "h1")
    }

    fn bob() -> SessionId {
        SessionId::new("bob", "h2")
    }

    const MIN_30: i64 = 30 * 60 * 1000;

    #[test]
    fn construction_creates_bucket_directories() {
        let dir = TempDir::new().unwrap();
        let _manager = LockManager::new(dir.path()).unwrap();

        assert!(dir.path().join("applications").is_dir());
        assert!(dir.path().join("server").is_dir());
        assert!(dir.path().join("users").is_dir());
    }

    #[test]
    fn lock_key_is_deterministic_and_pure() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);

        let a = manager.lock_key(RESOURCE_APPLICATIONS, "petstore").unwrap();
        let b = manager.lock_key(RESOURCE_APPLICATIONS, "petstore").unwrap();
        assert_eq!(a, b);

        // Issuing a key must not touch storage.
        assert!(!dir.path().join("applications/petstore.lock").exists());
    }

    #[test]
    fn unknown_resource_type_is_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);

        let err = manager.lock_key("widgets", "x").unwrap_err();
        assert!(matches!(err, LockError::UnsupportedResourceType(t) if t == "widgets"));
    }

    #[test]
    fn custom_scheme_can_be_registered() {
        struct DomainScheme;
        impl KeyScheme for DomainScheme {
            fn bucket(&self) -> &'static str {
                "domains"
            }
            fn file_stem(&self, resource_id: &str) -> crate::error::Result<String> {
                Ok(resource_id.to_ascii_lowercase())
            }
        }

        let dir = TempDir::new().unwrap();
        let manager = LockManager::builder(dir.path())
            .scheme("domains", Box::new(DomainScheme))
            .build()
            .unwrap();

        assert!(dir.path().join("domains").is_dir());
        let key = manager.lock_key("domains", "Example").unwrap();
        assert!(key.to_string().ends_with("domains/example.lock"));
    }

    #[test]
    fn negative_lease_is_an_input_error() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);
        let key = manager.lock_key(RESOURCE_APPLICATIONS, "app").unwrap();

        let err = manager.acquire(&alice(), &key, -1, 0).unwrap_err();
        assert!(matches!(err, LockError::InvalidLeaseDuration(-1)));
    }

    #[test]
    fn zero_lease_releases_and_reports_acquired() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);
        let key = manager.lock_key(RESOURCE_APPLICATIONS, "app").unwrap();
        let alice = alice();

        assert!(manager.acquire(&alice, &key, MIN_30, 0).unwrap().is_acquired());
        assert!(manager.is_locked(&alice, &key).unwrap());

        let outcome = manager.acquire(&alice, &key, 0, 0).unwrap();
        assert!(outcome.is_acquired());
        assert!(!manager.is_locked(&alice, &key).unwrap());
    }

    #[test]
    fn end_to_end_contention_scenario() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);
        let key = manager.lock_key(RESOURCE_APPLICATIONS, "petstore").unwrap();
        let u1 = alice();
        let u2 = bob();

        // U1 takes a 30-minute lease without waiting.
        assert!(manager.acquire(&u1, &key, MIN_30, 0).unwrap().is_acquired());

        // U2 is denied immediately and can see who holds the lock.
        let outcome = manager.acquire(&u2, &key, MIN_30, 0).unwrap();
        assert!(!outcome.is_acquired());

        let info = manager.lock_info(&key).unwrap().unwrap();
        assert!(u1.same_id(&info.owner));
        assert_eq!(info.owner_display(), "alice@h1");

        // After U1 releases, U2 succeeds.
        manager.release(&u1, &key).unwrap();
        assert!(manager.acquire(&u2, &key, MIN_30, 0).unwrap().is_acquired());
    }

    #[test]
    fn reentrant_acquire_succeeds_and_never_shortens_lease() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);
        let key = manager.lock_key(RESOURCE_APPLICATIONS, "app").unwrap();
        let alice = alice();

        assert!(manager.acquire(&alice, &key, MIN_30, 0).unwrap().is_acquired());
        let before = manager.lock_info(&key).unwrap().unwrap();

        // A much shorter redundant re-lock still succeeds but leaves the
        // original expiry in place.
        assert!(manager.acquire(&alice, &key, 1_000, 0).unwrap().is_acquired());
        let after = manager.lock_info(&key).unwrap().unwrap();
        assert_eq!(after.expires_at_ms, before.expires_at_ms);
    }

    #[test]
    fn release_is_idempotent_across_absent_expired_and_foreign() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);
        let key = manager.lock_key(RESOURCE_APPLICATIONS, "app").unwrap();

        // Absent: no-op.
        manager.release(&alice(), &key).unwrap();

        // Expired: reclaimed without error even by a non-owner.
        let stale = LockRecord::establish(bob().fields(), 10, now_ms() - 1_000);
        assert!(create_record_exclusive(key.path(), &stale).unwrap());
        manager.release(&alice(), &key).unwrap();
        assert_eq!(read_record(key.path()).unwrap(), None);

        // Foreign and valid: no-op, and the lease survives.
        assert!(manager.acquire(&bob(), &key, MIN_30, 0).unwrap().is_acquired());
        manager.release(&alice(), &key).unwrap();
        assert!(manager.is_locked(&bob(), &key).unwrap());
    }

    #[test]
    fn expired_lease_is_grantable_to_a_third_party() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);
        let key = manager.lock_key(RESOURCE_APPLICATIONS, "app").unwrap();

        // A lease that expired in the past.
        let stale = LockRecord::establish(alice().fields(), 50, now_ms() - 1_000);
        assert!(create_record_exclusive(key.path(), &stale).unwrap());

        assert!(!manager.is_locked(&alice(), &key).unwrap());
        assert_eq!(manager.lock_info(&key).unwrap(), None);
        assert!(manager.acquire(&bob(), &key, MIN_30, 0).unwrap().is_acquired());
    }

    #[test]
    fn corruption_is_isolated_across_all_operations() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);
        let key = manager.lock_key(RESOURCE_APPLICATIONS, "app").unwrap();

        // Record missing the mandatory 'expires' field.
        std::fs::write(key.path(), "created=42\nuser=alice\n").unwrap();

        let err = manager.acquire(&bob(), &key, MIN_30, 0).unwrap_err();
        assert!(matches!(err, LockError::CorruptLockRecord { .. }));

        let err = manager.is_locked(&bob(), &key).unwrap_err();
        assert!(matches!(err, LockError::CorruptLockRecord { .. }));

        let err = manager.lock_info(&key).unwrap_err();
        assert!(matches!(err, LockError::CorruptLockRecord { .. }));

        // Nothing repaired or deleted behind the operator's back.
        assert!(key.path().exists());
    }

    #[test]
    fn override_identity_seizes_lease_and_old_release_is_noop() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);
        let key = manager.lock_key(RESOURCE_SERVER_CONFIG, "server").unwrap();
        let alice = alice();
        let admin = SessionId::new("root", "h9").with_override();

        assert!(manager.acquire(&alice, &key, MIN_30, 0).unwrap().is_acquired());
        assert!(manager.acquire(&admin, &key, MIN_30, 0).unwrap().is_acquired());

        let info = manager.lock_info(&key).unwrap().unwrap();
        assert!(admin.same_id(&info.owner));

        // The previous holder no longer owns the lease; its release must
        // neither fail nor delete the admin's lease.
        manager.release(&alice, &key).unwrap();
        assert!(manager.is_locked(&admin, &key).unwrap());
    }

    #[test]
    fn wait_budget_expires_with_denial() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);
        let key = manager.lock_key(RESOURCE_APPLICATIONS, "app").unwrap();

        assert!(manager.acquire(&alice(), &key, MIN_30, 0).unwrap().is_acquired());

        let start = Instant::now();
        let outcome = manager.acquire(&bob(), &key, MIN_30, 50).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));

        match outcome {
            AcquireOutcome::Denied { remaining_ms, owner } => {
                assert!(remaining_ms > 0);
                assert_eq!(owner.get("user"), Some("alice"));
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn waiter_wins_once_holder_releases() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(test_manager(&dir));
        let key = manager.lock_key(RESOURCE_APPLICATIONS, "app").unwrap();
        let alice = alice();

        assert!(manager.acquire(&alice, &key, MIN_30, 0).unwrap().is_acquired());

        let waiter = {
            let manager = Arc::clone(&manager);
            let key = key.clone();
            std::thread::spawn(move || manager.acquire(&bob(), &key, MIN_30, 2_000))
        };

        std::thread::sleep(Duration::from_millis(30));
        manager.release(&alice, &key).unwrap();

        let outcome = waiter.join().unwrap().unwrap();
        assert!(outcome.is_acquired());
        assert!(manager.is_locked(&bob(), &key).unwrap());
    }

    #[test]
    fn waiter_wins_once_lease_expires() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);
        let key = manager.lock_key(RESOURCE_APPLICATIONS, "app").unwrap();

        // 40ms lease, waiter has a generous budget.
        assert!(manager.acquire(&alice(), &key, 40, 0).unwrap().is_acquired());
        let outcome = manager.acquire(&bob(), &key, MIN_30, 2_000).unwrap();
        assert!(outcome.is_acquired());
    }

    #[test]
    fn cancelled_wait_reports_interrupted() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(test_manager(&dir));
        let key = manager.lock_key(RESOURCE_APPLICATIONS, "app").unwrap();

        assert!(manager.acquire(&alice(), &key, MIN_30, 0).unwrap().is_acquired());

        let cancel = CancelFlag::new();
        let waiter = {
            let manager = Arc::clone(&manager);
            let key = key.clone();
            let cancel = cancel.clone();
            // Negative budget: retry forever, until cancelled.
            std::thread::spawn(move || {
                manager.acquire_cancellable(&bob(), &key, MIN_30, -1, &cancel)
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        cancel.cancel();

        let outcome = waiter.join().unwrap().unwrap();
        assert_eq!(outcome, AcquireOutcome::Interrupted);
        // The lease was never handed over.
        assert!(manager.is_locked(&alice(), &key).unwrap());
    }

    #[test]
    fn concurrent_acquires_grant_exactly_one_holder() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(test_manager(&dir));
        let key = manager.lock_key(RESOURCE_APPLICATIONS, "app").unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let manager = Arc::clone(&manager);
            let key = key.clone();
            handles.push(std::thread::spawn(move || {
                let id = SessionId::new(format!("user{}", i), "h1");
                manager
                    .acquire(&id, &key, MIN_30, 0)
                    .unwrap()
                    .is_acquired()
            }));
        }

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(granted, 1, "exactly one identity may win the lease");
    }

    #[test]
    fn two_processes_share_lock_state_through_the_root() {
        let dir = TempDir::new().unwrap();

        // Two independent managers over the same root stand in for two
        // server processes sharing a storage volume.
        let first = test_manager(&dir);
        let second = test_manager(&dir);

        let key1 = first.lock_key(RESOURCE_APPLICATIONS, "app").unwrap();
        let key2 = second.lock_key(RESOURCE_APPLICATIONS, "app").unwrap();
        assert_eq!(key1, key2);

        assert!(first.acquire(&alice(), &key1, MIN_30, 0).unwrap().is_acquired());
        assert!(!second.acquire(&bob(), &key2, MIN_30, 0).unwrap().is_acquired());

        // Re-entrant from the other manager: same identity, same storage.
        assert!(second.acquire(&alice(), &key2, MIN_30, 0).unwrap().is_acquired());
    }

    #[test]
    fn lock_info_display_is_human_readable() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);
        let key = manager.lock_key(RESOURCE_APPLICATIONS, "app").unwrap();

        assert!(manager.acquire(&alice(), &key, MIN_30, 0).unwrap().is_acquired());
        let info = manager.lock_info(&key).unwrap().unwrap();

        let display = info.to_string();
        assert!(display.contains("alice@h1"));
        assert!(display.contains("expires in"));
        assert!(info.remaining_string().ends_with('m'));
    }
}
