//! Lease arbitration: the single grant/refresh/deny/reclaim decision.
//!
//! Given a record location, a caller identity, and a requested lease
//! duration, [`decide`] distinguishes four genuinely different states —
//! no lease, corrupt record, expired lease, foreign active lease — and
//! handles each:
//!
//! 1. Absent → establish a fresh lease, grant.
//! 2. Corrupt → propagate; never grant, never delete.
//! 3. Held by the caller (or caller can override) → re-lock, refreshing the
//!    record only when that would not move the expiry earlier; grant.
//! 4. Expired → reclaim the stale record, establish a fresh lease, grant.
//! 5. Valid and foreign → deny, reporting the remaining validity window.
//!
//! The caller must hold the in-process guard for the location (see
//! `manager::LocationGuards`) so that the read-decide-write sequence is
//! atomic within the process. Across processes, only the exclusive create
//! in [`record::create_record_exclusive`] is atomic; every other invariant
//! is enforced cooperatively by all participants running this same logic.

use crate::error::Result;
use crate::identity::{LockerId, OwnerFields};
use crate::record::{self, LockRecord};
use log::debug;
use std::path::Path;

/// Outcome of one lease arbitration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The caller holds the lease when the decision returns.
    Granted,

    /// Another identity holds a valid lease.
    Denied {
        /// Remaining validity window of the incumbent lease, in ms.
        remaining_ms: i64,
        /// Owner fields of the incumbent, for "locked by X" reporting.
        owner: OwnerFields,
    },
}

impl Verdict {
    /// True when the caller holds the lease.
    pub fn is_granted(&self) -> bool {
        matches!(self, Verdict::Granted)
    }
}

/// Decide whether `locker` may hold the lease at `path` for `lease_ms`.
///
/// `lease_ms` must be positive; zero-duration ("release") and negative
/// (input error) requests are handled by the manager before arbitration.
pub fn decide(path: &Path, locker: &dyn LockerId, lease_ms: i64, now: i64) -> Result<Verdict> {
    debug_assert!(lease_ms > 0, "manager must filter non-positive leases");

    let Some(current) = record::read_record(path)? else {
        return establish(path, locker, lease_ms, now);
    };

    let reentrant = locker.same_id(&current.owner);
    if reentrant || locker.can_override() {
        let refreshed = LockRecord::establish(locker.fields(), lease_ms, now);

        // Re-lock by the same holder must never move the expiry earlier
        // than it already is; a forced override always rewrites ownership.
        if !reentrant || refreshed.expires_at_ms() >= current.expires_at_ms() {
            record::rewrite_record(path, &refreshed)?;
            if !reentrant {
                debug!("lease at '{}' seized by override", path.display());
            }
        }
        return Ok(Verdict::Granted);
    }

    if current.is_expired(now) {
        debug!("reclaiming expired lease at '{}'", path.display());
        record::remove_record(path)?;
        return establish(path, locker, lease_ms, now);
    }

    Ok(Verdict::Denied {
        remaining_ms: current.remaining_ms(now),
        owner: current.owner,
    })
}

/// Attempt to establish a fresh lease via exclusive create.
///
/// Losing the create race to another process is ordinary contention, not a
/// failure: the winner's record is re-read and reported as a denial.
fn establish(path: &Path, locker: &dyn LockerId, lease_ms: i64, now: i64) -> Result<Verdict> {
    let fresh = LockRecord::establish(locker.fields(), lease_ms, now);
    if record::create_record_exclusive(path, &fresh)? {
        return Ok(Verdict::Granted);
    }

    // Lost the cross-process race. Report the winner; if the winner is the
    // same logical holder (another thread of this identity), that is still
    // a grant.
    match record::read_record(path)? {
        Some(winner) if locker.same_id(&winner.owner) => Ok(Verdict::Granted),
        Some(winner) => Ok(Verdict::Denied {
            remaining_ms: winner.remaining_ms(now),
            owner: winner.owner,
        }),
        // Winner released between our create and read; next retry will win.
        None => Ok(Verdict::Denied {
            remaining_ms: 0,
            owner: OwnerFields::new(),
        }),
    }
}
