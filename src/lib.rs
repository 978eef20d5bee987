//! Conflock: lease-based advisory lock manager for shared configuration
//! resources.
//!
//! Coordinates exclusive design-time access to shared resources
//! (applications, server configuration, per-user configuration) across
//! threads, sessions, and server processes that share one storage volume.
//! Unlike an in-process mutex, ownership survives process restarts: every
//! lease is persisted as a small text record, and any process pointed at
//! the same lock root participates in the same lock space.
//!
//! # Model
//!
//! - A **lease** is a time-bounded exclusive grant that expires on its own
//!   if not renewed; crashed holders therefore never wedge a resource.
//! - A **lock key** is an opaque handle naming the record location for one
//!   resource, issued by the manager's per-resource-type schemes.
//! - Re-acquisition by the same holder is re-entrant and never shortens
//!   the remaining lease. Privileged identities may force-override a
//!   foreign lease.
//! - Expired records are reclaimed lazily by the next acquire or release.
//!
//! # Cross-process exclusion
//!
//! Record creation uses exclusive-create semantics, the only atomic
//! primitive the storage layer offers; everything else (expiry, override
//! rules) is enforced cooperatively by every participant running the same
//! arbitration logic. This is not a distributed consensus system — it
//! assumes one shared volume, not independently failing nodes.
//!
//! # Example
//!
//! ```no_run
//! use conflock::{LockManager, SessionId, RESOURCE_APPLICATIONS};
//!
//! let manager = LockManager::new("/var/lib/myserver/locks")?;
//! let me = SessionId::current();
//! let key = manager.lock_key(RESOURCE_APPLICATIONS, "petstore")?;
//!
//! // Take a 30-minute lease, giving up after 5 seconds of contention.
//! let outcome = manager.acquire(&me, &key, 30 * 60 * 1000, 5_000)?;
//! if outcome.is_acquired() {
//!     // ... edit the application configuration ...
//!     manager.release(&me, &key)?;
//! } else if let Some(info) = manager.lock_info(&key)? {
//!     eprintln!("{}", info); // "locked by bob@host2, expires in 29m"
//! }
//! # Ok::<(), conflock::LockError>(())
//! ```

pub mod arbiter;
pub mod error;
pub mod identity;
pub mod key;
pub mod manager;
pub mod record;

pub use arbiter::Verdict;
pub use error::{LockError, Result};
pub use identity::{LockerId, OwnerFields, SessionId};
pub use key::{
    ApplicationScheme, KeyScheme, LockKey, RESOURCE_APPLICATIONS, RESOURCE_SERVER_CONFIG,
    RESOURCE_USER_CONFIG, ServerConfigScheme, UserConfigScheme,
};
pub use manager::{AcquireOutcome, CancelFlag, LockInfo, LockManager, LockManagerBuilder};
pub use record::LockRecord;
