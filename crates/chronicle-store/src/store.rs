//! Append-only transcript store keyed by session id.
//!
//! Owns one Truth log per session: idempotent appends de-duplicated by
//! content fingerprint, transactional full-file rebuilds isolated through a
//! temp file, and administrative reset/backup. Append never raises; capture
//! must not be able to destabilize the host application.

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::fs_util::{backup_stamp, replace_file_atomic, unix_millis};
use crate::line_codec::{encode_line, normalize_payload, unescape_payload, Role};
use crate::reader::read_records;
use crate::tail_repair::repair_truncated_tail;

pub const MEMORY_DIR: &str = "Memory";
pub const CHATS_DIR: &str = "Chats";
pub const TRUTH_LOG_FILE: &str = "Truth.log";
pub const TRUTH_VIEW_FILE: &str = "Truth.view";
pub const REPAIR_AUDIT_FILE: &str = "Truth.repair.log";
pub const BACKUP_MARKER: &str = "pre_chronicle";

/// Optional observer invoked best-effort after each successful append.
///
/// Implementations must be cheap and must not panic; the store treats the
/// callback as fire-and-forget telemetry.
pub trait TelemetryObserver: Send + Sync {
    fn on_append(&self, session_id: &str, role: Role, payload_bytes: usize);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `AppendOutcome` values.
pub enum AppendOutcome {
    /// One new record landed on disk.
    Appended,
    /// The fingerprint was already present; nothing was written.
    Duplicate,
    /// Input failed boundary validation (empty id or text).
    Rejected,
    /// An I/O failure was absorbed; the caller may retry.
    Failed,
}

impl AppendOutcome {
    pub fn is_appended(self) -> bool {
        self == AppendOutcome::Appended
    }
}

#[derive(Debug)]
struct RebuildState {
    temp_path: PathBuf,
    fingerprints: HashSet<String>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct SessionState {
    fingerprints: HashSet<String>,
    hydrated: bool,
    duplicates_suppressed: u64,
    repair_events: u64,
    rebuild: Option<RebuildState>,
}

#[derive(Debug)]
/// Handle returned by [`TranscriptStore::begin_rebuild`].
pub struct RebuildTicket {
    pub backup_path: Option<PathBuf>,
    pub temp_path: PathBuf,
    cancelled: Arc<AtomicBool>,
}

impl RebuildTicket {
    /// Signals cancellation: further appends into the rebuild are dropped and
    /// commit fails cleanly, leaving the live file untouched.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Front-end owning every session's Truth log and in-memory de-dup state.
///
/// Sessions are isolated: callers for different session ids never contend,
/// while callers for the same id serialize around that session's lock.
pub struct TranscriptStore {
    root: PathBuf,
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionState>>>>,
    observer: Option<Arc<dyn TelemetryObserver>>,
}

impl TranscriptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sessions: Mutex::new(HashMap::new()),
            observer: None,
        }
    }

    pub fn with_observer(root: impl Into<PathBuf>, observer: Arc<dyn TelemetryObserver>) -> Self {
        Self {
            root: root.into(),
            sessions: Mutex::new(HashMap::new()),
            observer: Some(observer),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/Memory/Chats/<session id>`.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root
            .join(MEMORY_DIR)
            .join(CHATS_DIR)
            .join(session_id.trim())
    }

    /// `<root>/Memory/Chats/<session id>/Truth.log`.
    pub fn log_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(TRUTH_LOG_FILE)
    }

    pub fn ensure_session_dir(&self, session_id: &str) -> Result<PathBuf> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create session directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Appends one captured turn. Never raises: validation problems report
    /// `Rejected`, de-duplicated turns report `Duplicate`, and any absorbed
    /// I/O failure reports `Failed` so the capture loop may retry.
    pub fn append(&self, session_id: &str, role_tag: char, raw_text: &str) -> AppendOutcome {
        let Some(session_id) = valid_session_id(session_id) else {
            return AppendOutcome::Rejected;
        };
        if raw_text.trim().is_empty() {
            return AppendOutcome::Rejected;
        }
        let role = Role::from_capture_tag(role_tag);
        let payload = normalize_payload(raw_text);
        if payload.is_empty() {
            return AppendOutcome::Rejected;
        }

        let state = self.session_state(&session_id);
        let mut state = lock_session(&state);
        match self.append_locked(&session_id, role, &payload, &mut state) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(session_id, %error, "transcript append absorbed an I/O failure");
                AppendOutcome::Failed
            }
        }
    }

    fn append_locked(
        &self,
        session_id: &str,
        role: Role,
        payload: &str,
        state: &mut SessionState,
    ) -> Result<AppendOutcome> {
        let fingerprint = record_fingerprint(role, payload);

        if let Some(rebuild) = state.rebuild.as_mut() {
            if rebuild.cancelled.load(Ordering::SeqCst) {
                debug!(session_id, "append dropped: rebuild cancelled");
                return Ok(AppendOutcome::Failed);
            }
            if rebuild.fingerprints.contains(&fingerprint) {
                return Ok(AppendOutcome::Duplicate);
            }
            append_record_line(&rebuild.temp_path, role, payload)?;
            rebuild.fingerprints.insert(fingerprint);
            self.notify_observer(session_id, role, payload.len());
            return Ok(AppendOutcome::Appended);
        }

        let log_path = self.log_path(session_id);
        if !state.hydrated {
            self.hydrate_locked(session_id, &log_path, state)?;
        }
        if !log_path.exists() && !state.fingerprints.is_empty() {
            // The file was deleted out-of-band; resume with a clean slate.
            debug!(session_id, "log removed out-of-band; clearing seen set");
            state.fingerprints.clear();
        }
        if state.fingerprints.contains(&fingerprint) {
            state.duplicates_suppressed += 1;
            return Ok(AppendOutcome::Duplicate);
        }

        self.ensure_session_dir(session_id)?;
        append_record_line(&log_path, role, payload)?;
        // Marked seen only after the write lands, so a failed append never
        // produces a false-negative duplicate on retry.
        state.fingerprints.insert(fingerprint);
        self.notify_observer(session_id, role, payload.len());
        Ok(AppendOutcome::Appended)
    }

    /// Rebuilds the seen-set from disk so de-duplication survives restarts.
    fn hydrate_locked(
        &self,
        session_id: &str,
        log_path: &Path,
        state: &mut SessionState,
    ) -> Result<()> {
        if log_path.exists() {
            let outcome = repair_truncated_tail(log_path)?;
            if outcome.repaired {
                state.repair_events += 1;
                self.append_repair_event(session_id, outcome.bytes_removed);
            }
            for record in read_records(log_path) {
                state
                    .fingerprints
                    .insert(record_fingerprint(record.role, &record.payload));
            }
        }
        state.hydrated = true;
        Ok(())
    }

    /// Starts an exclusive rebuild for the session. All appends for this id
    /// are redirected into the returned temp file until abort or commit.
    pub fn begin_rebuild(&self, session_id: &str, backup_existing: bool) -> Result<RebuildTicket> {
        let Some(session_id) = valid_session_id(session_id) else {
            bail!("session id is empty or not filesystem-safe");
        };
        let state = self.session_state(&session_id);
        let mut state = lock_session(&state);
        if state.rebuild.is_some() {
            bail!("a rebuild is already active for session {session_id}");
        }

        let dir = self.ensure_session_dir(&session_id)?;
        let live_path = self.log_path(&session_id);
        let backup_path = if backup_existing && live_path.exists() {
            let backup = dir.join(format!("Truth.{BACKUP_MARKER}.{}.log", backup_stamp()));
            fs::copy(&live_path, &backup).with_context(|| {
                format!("failed to back up {} to {}", live_path.display(), backup.display())
            })?;
            Some(backup)
        } else {
            None
        };

        let temp_path = dir.join(format!(
            ".Truth.rebuild.{}-{}.tmp",
            std::process::id(),
            unix_millis()
        ));
        fs::write(&temp_path, "")
            .with_context(|| format!("failed to create rebuild temp {}", temp_path.display()))?;

        let cancelled = Arc::new(AtomicBool::new(false));
        state.rebuild = Some(RebuildState {
            temp_path: temp_path.clone(),
            fingerprints: HashSet::new(),
            cancelled: Arc::clone(&cancelled),
        });
        debug!(session_id, temp = %temp_path.display(), "rebuild started");
        Ok(RebuildTicket {
            backup_path,
            temp_path,
            cancelled,
        })
    }

    /// Flags the active rebuild as cancelled. Returns false when none is active.
    pub fn cancel_rebuild(&self, session_id: &str) -> bool {
        let Some(session_id) = valid_session_id(session_id) else {
            return false;
        };
        let state = self.session_state(&session_id);
        let state = lock_session(&state);
        match state.rebuild.as_ref() {
            Some(rebuild) => {
                rebuild.cancelled.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Discards the rebuild temp file; the live file is untouched.
    pub fn abort_rebuild(&self, session_id: &str) -> bool {
        let Some(session_id) = valid_session_id(session_id) else {
            return false;
        };
        let state = self.session_state(&session_id);
        let mut state = lock_session(&state);
        let Some(rebuild) = state.rebuild.take() else {
            return false;
        };
        if let Err(error) = fs::remove_file(&rebuild.temp_path) {
            debug!(session_id, %error, "rebuild temp removal failed during abort");
        }
        true
    }

    /// Atomically replaces the live file with the rebuild temp file. Returns
    /// false if no rebuild is active, it was cancelled, or the swap failed;
    /// in every failure case the live file is untouched.
    pub fn commit_rebuild(&self, session_id: &str) -> bool {
        let Some(session_id) = valid_session_id(session_id) else {
            return false;
        };
        let state = self.session_state(&session_id);
        let mut state = lock_session(&state);
        let Some(rebuild) = state.rebuild.take() else {
            return false;
        };
        if rebuild.cancelled.load(Ordering::SeqCst) {
            warn!(session_id, "rebuild commit refused: session was cancelled");
            let _ = fs::remove_file(&rebuild.temp_path);
            return false;
        }

        let live_path = self.log_path(&session_id);
        match fs::rename(&rebuild.temp_path, &live_path) {
            Ok(()) => {
                // Subsequent reads must re-hydrate from the new content.
                state.fingerprints.clear();
                state.hydrated = false;
                debug!(session_id, "rebuild committed");
                true
            }
            Err(error) => {
                warn!(session_id, %error, "rebuild commit failed to swap files");
                let _ = fs::remove_file(&rebuild.temp_path);
                false
            }
        }
    }

    /// Administrative reset: clears the de-dup cache and removes the live
    /// file, optionally preserving it under a timestamped backup name.
    pub fn reset_log(&self, session_id: &str, backup_existing: bool) -> bool {
        let Some(session_id) = valid_session_id(session_id) else {
            return false;
        };
        let state = self.session_state(&session_id);
        let mut state = lock_session(&state);
        state.fingerprints.clear();
        state.hydrated = false;
        state.duplicates_suppressed = 0;

        let live_path = self.log_path(&session_id);
        if !live_path.exists() {
            return true;
        }
        let result = if backup_existing {
            let backup = self
                .session_dir(&session_id)
                .join(format!("Truth.{BACKUP_MARKER}.{}.log", backup_stamp()));
            fs::rename(&live_path, &backup)
        } else {
            fs::remove_file(&live_path)
        };
        match result {
            Ok(()) => true,
            Err(error) => {
                warn!(session_id, %error, "log reset failed");
                false
            }
        }
    }

    /// Writes the human-readable `Truth.view` projection. Best-effort.
    pub fn write_view(&self, session_id: &str) -> bool {
        let Some(session_id) = valid_session_id(session_id) else {
            return false;
        };
        let records = read_records(&self.log_path(&session_id));
        let mut view = String::new();
        for record in &records {
            view.push_str(record.role.label());
            view.push_str(":\n");
            view.push_str(&unescape_payload(&record.payload));
            view.push_str("\n\n");
        }
        let view_path = self.session_dir(&session_id).join(TRUTH_VIEW_FILE);
        match replace_file_atomic(&view_path, view.trim_end()) {
            Ok(()) => true,
            Err(error) => {
                warn!(session_id, %error, "view projection write failed");
                false
            }
        }
    }

    /// Appends one line to the repair audit trail. Best-effort.
    fn append_repair_event(&self, session_id: &str, bytes_removed: u64) {
        let audit_path = self.session_dir(session_id).join(REPAIR_AUDIT_FILE);
        let line = format!(
            "{} bytes_removed={}\n",
            chrono::Utc::now().to_rfc3339(),
            bytes_removed
        );
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&audit_path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(error) = result {
            warn!(session_id, %error, "repair audit write failed");
        }
    }

    pub(crate) fn duplicates_suppressed(&self, session_id: &str) -> u64 {
        let state = self.session_state(session_id);
        let state = lock_session(&state);
        state.duplicates_suppressed
    }

    pub(crate) fn observed_repair_events(&self, session_id: &str) -> u64 {
        let state = self.session_state(session_id);
        let state = lock_session(&state);
        state.repair_events
    }

    fn notify_observer(&self, session_id: &str, role: Role, payload_bytes: usize) {
        if let Some(observer) = &self.observer {
            observer.on_append(session_id, role, payload_bytes);
        }
    }

    fn session_state(&self, session_id: &str) -> Arc<Mutex<SessionState>> {
        let mut sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SessionState::default()))),
        )
    }
}

fn lock_session(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Trims and validates a session id for use as a directory name.
fn valid_session_id(session_id: &str) -> Option<String> {
    let trimmed = session_id.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return None;
    }
    let safe = trimmed
        .chars()
        .all(|ch| !ch.is_control() && ch != '/' && ch != '\\' && ch != ':');
    if !safe {
        return None;
    }
    Some(trimmed.to_string())
}

/// One atomic OS-level append of a single encoded record line.
fn append_record_line(path: &Path, role: Role, payload: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {} for append", path.display()))?;
    let line = format!("{}\n", encode_line(role, payload));
    file.write_all(line.as_bytes())
        .with_context(|| format!("failed to append record to {}", path.display()))?;
    Ok(())
}

/// Collapses whitespace runs and case before fingerprinting so streaming
/// re-captures with whitespace jitter still de-duplicate.
pub fn aggressive_normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Stable hash of `(role, aggressively normalized text)`.
pub fn record_fingerprint(role: Role, payload: &str) -> String {
    let canonical = aggressive_normalize(&unescape_payload(payload));
    let mut hasher = Sha256::new();
    hasher.update([role.tag() as u8, 0x1f]);
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}
