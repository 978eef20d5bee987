//! Lock record codec and durable record storage.
//!
//! A lock record is the persisted lease state for one resource, stored as a
//! plain text key-value file:
//!
//! ```text
//! created=<i64 milliseconds since epoch>
//! expires=<i64 milliseconds, lease duration>
//! <owner-field>=<value>
//! ...
//! ```
//!
//! Absence of the file means the resource is free. A file whose `created` or
//! `expires` field is missing or non-numeric is **corrupt** — reported as a
//! distinct error, never silently treated as absent, because discarding a
//! corrupt record could let a second party acquire a lease someone else
//! believes they still hold.
//!
//! # Storage operations
//!
//! - [`create_record_exclusive`] uses **create_new** semantics (exclusive
//!   create); this is the sole cross-process mutual-exclusion primitive.
//! - [`rewrite_record`] refreshes an existing record via a temp file in the
//!   same directory, fsync, then atomic rename, so readers never observe a
//!   partially written record.
//! - [`remove_record`] deletes a record and treats "already gone" as success.

use crate::error::{LockError, Result};
use crate::identity::OwnerFields;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Record field holding the creation timestamp (ms since epoch).
pub const FIELD_CREATED: &str = "created";

/// Record field holding the lease duration (ms).
pub const FIELD_EXPIRES: &str = "expires";

/// Current wall-clock time in milliseconds since the epoch.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Persisted lease state for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    /// When the lease was (re)established, ms since epoch.
    pub created_ms: i64,

    /// How long, from `created_ms`, the lease remains valid.
    pub lease_ms: i64,

    /// Serialized identity of the holder.
    pub owner: OwnerFields,
}

impl LockRecord {
    /// Build a record establishing a lease for `owner` starting now.
    pub fn establish(owner: OwnerFields, lease_ms: i64, now: i64) -> Self {
        Self {
            created_ms: now,
            lease_ms,
            owner,
        }
    }

    /// Absolute expiry instant, ms since epoch.
    pub fn expires_at_ms(&self) -> i64 {
        self.created_ms.saturating_add(self.lease_ms)
    }

    /// Whether the lease has expired as of `now`.
    ///
    /// An expired record is treated as absent for acquisition purposes but
    /// reclaimed lazily, only by the next acquire or release attempt.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at_ms() <= now
    }

    /// Remaining validity window in ms as of `now` (zero if expired).
    pub fn remaining_ms(&self, now: i64) -> i64 {
        (self.expires_at_ms() - now).max(0)
    }
}

/// Parse record text read from `path` (the path is for error reporting only).
///
/// # Errors
///
/// [`LockError::CorruptLockRecord`] when a line is not `key=value`, when
/// `created` or `expires` is missing, or when either fails to parse as an
/// integer.
pub fn parse_record(text: &str, path: &Path) -> Result<LockRecord> {
    let mut created: Option<i64> = None;
    let mut lease: Option<i64> = None;
    let mut owner = OwnerFields::new();

    for line in text.lines() {
        if line.is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(LockError::corrupt(
                path,
                format!("malformed line '{}' (expected key=value)", line),
            ));
        };

        match key {
            FIELD_CREATED => {
                created = Some(parse_millis(key, value, path)?);
            }
            FIELD_EXPIRES => {
                lease = Some(parse_millis(key, value, path)?);
            }
            _ => owner.insert(key, value),
        }
    }

    let created_ms = created
        .ok_or_else(|| LockError::corrupt(path, format!("missing '{}' field", FIELD_CREATED)))?;
    let lease_ms = lease
        .ok_or_else(|| LockError::corrupt(path, format!("missing '{}' field", FIELD_EXPIRES)))?;

    Ok(LockRecord {
        created_ms,
        lease_ms,
        owner,
    })
}

fn parse_millis(key: &str, value: &str, path: &Path) -> Result<i64> {
    value.trim().parse::<i64>().map_err(|_| {
        LockError::corrupt(
            path,
            format!("non-numeric '{}' field value '{}'", key, value),
        )
    })
}

/// Serialize a record to its text form.
///
/// Timing fields come first, then owner fields in sorted key order, so the
/// output for a given record is byte-stable.
///
/// # Errors
///
/// [`LockError::InvalidOwnerField`] if an owner field uses a reserved key or
/// embeds characters the line format cannot carry.
pub fn serialize_record(record: &LockRecord) -> Result<String> {
    let mut out = String::new();
    out.push_str(&format!("{}={}\n", FIELD_CREATED, record.created_ms));
    out.push_str(&format!("{}={}\n", FIELD_EXPIRES, record.lease_ms));

    for (key, value) in record.owner.iter() {
        if key == FIELD_CREATED || key == FIELD_EXPIRES {
            return Err(LockError::InvalidOwnerField {
                key: key.to_string(),
                reason: "collides with a reserved record field".to_string(),
            });
        }
        if key.is_empty() || key.contains('=') || key.contains('\n') {
            return Err(LockError::InvalidOwnerField {
                key: key.to_string(),
                reason: "key must be non-empty and free of '=' and newlines".to_string(),
            });
        }
        if value.contains('\n') {
            return Err(LockError::InvalidOwnerField {
                key: key.to_string(),
                reason: "value must not contain newlines".to_string(),
            });
        }
        out.push_str(&format!("{}={}\n", key, value));
    }

    Ok(out)
}

/// Read the record at `path`.
///
/// # Returns
///
/// * `Ok(Some(record))` - A record exists and parsed cleanly
/// * `Ok(None)` - No record exists (the resource is free)
/// * `Err(LockError::CorruptLockRecord)` - A record exists but cannot be parsed
/// * `Err(LockError::Storage)` - The read itself failed
pub fn read_record(path: &Path) -> Result<Option<LockRecord>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(LockError::storage("read", path, e)),
    };

    parse_record(&text, path).map(Some)
}

/// Create the record at `path` exclusively.
///
/// Uses create_new semantics: creation succeeds iff no record exists, which
/// is the atomic create-if-absent primitive all cross-process exclusion
/// rests on.
///
/// # Returns
///
/// * `Ok(true)` - Record created; the caller now holds the lease
/// * `Ok(false)` - Another record appeared first (lost the race)
/// * `Err(_)` - Serialization or I/O failure
pub fn create_record_exclusive(path: &Path, record: &LockRecord) -> Result<bool> {
    let text = serialize_record(record)?;

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(LockError::storage("create", path, e)),
    };

    file.write_all(text.as_bytes()).map_err(|e| {
        // A half-written record must not linger as a phantom lease.
        let _ = fs::remove_file(path);
        LockError::storage("write", path, e)
    })?;

    file.sync_all().map_err(|e| {
        let _ = fs::remove_file(path);
        LockError::storage("sync", path, e)
    })?;

    Ok(true)
}

/// Atomically replace the record at `path` (lease refresh).
///
/// Writes to a temp file in the same directory, syncs, then renames over
/// the target, so a concurrent reader sees either the old or the new record
/// but never a torn one.
pub fn rewrite_record(path: &Path, record: &LockRecord) -> Result<()> {
    let text = serialize_record(record)?;
    let temp_path = temp_path_for(path)?;

    let mut file =
        File::create(&temp_path).map_err(|e| LockError::storage("create", &temp_path, e))?;

    file.write_all(text.as_bytes()).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        LockError::storage("write", &temp_path, e)
    })?;

    file.sync_all().map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        LockError::storage("sync", &temp_path, e)
    })?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        LockError::storage("rename", path, e)
    })
}

/// Delete the record at `path`. Already-absent records are not an error.
pub fn remove_record(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LockError::storage("remove", path, e)),
    }
}

/// Temp file path in the same directory as `target` (same filesystem, so
/// the final rename is atomic).
fn temp_path_for(target: &Path) -> Result<std::path::PathBuf> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let filename = target.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        LockError::storage(
            "rename",
            target,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid record path"),
        )
    })?;

    Ok(parent.join(format!(".{}.tmp", filename)))
}
