//! Store tests covering codec, repair, reader, append de-duplication,
//! rebuild atomicity, and health reporting.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::tempdir;

use super::fs_util::{backup_stamp, replace_file_atomic};
use super::line_codec::{
    decode_line, encode_line, escape_payload, normalize_payload, strip_chrome, unescape_payload,
    Role,
};
use super::reader::{read_records, TruthLogReader};
use super::store::{record_fingerprint, AppendOutcome, TelemetryObserver, TranscriptStore};
use super::tail_repair::repair_truncated_tail;

#[test]
fn codec_round_trips_multiline_payloads() {
    let payload = escape_payload("first line\nsecond line\r\nthird");
    assert!(!payload.contains('\n'));
    let line = encode_line(Role::Assistant, &payload);
    let (role, decoded) = decode_line(&line).expect("decode");
    assert_eq!(role, Role::Assistant);
    assert_eq!(
        unescape_payload(decoded),
        "first line\nsecond line\nthird"
    );
}

#[test]
fn codec_rejects_malformed_lines() {
    assert!(decode_line("X|nope").is_none());
    assert!(decode_line("U-no-separator").is_none());
    assert!(decode_line("").is_none());
    assert!(decode_line("U").is_none());
    assert!(decode_line("Ü|multibyte tag").is_none());
}

#[test]
fn codec_accepts_lowercase_role_tags() {
    let (role, payload) = decode_line("a|hi").expect("decode");
    assert_eq!(role, Role::Assistant);
    assert_eq!(payload, "hi");
    let (role, _) = decode_line("u|hello").expect("decode");
    assert_eq!(role, Role::User);
}

#[test]
fn capture_tag_defaults_to_user() {
    assert_eq!(Role::from_capture_tag('A'), Role::Assistant);
    assert_eq!(Role::from_capture_tag('a'), Role::Assistant);
    assert_eq!(Role::from_capture_tag('U'), Role::User);
    assert_eq!(Role::from_capture_tag('?'), Role::User);
}

#[test]
fn chrome_stripping_removes_affordances_and_prefixes() {
    let raw = "You said:\nPasted image\nactual question\nCopy code\nmore text";
    assert_eq!(strip_chrome(raw), "actual question\nmore text");
}

#[test]
fn speaker_prefix_layered_over_attachment_labels_is_fully_stripped() {
    // The prefix is outermost; the labels it covered must still be removed.
    let raw = "You said:\nAttached file: report.pdf\nPasted image\nthe question";
    assert_eq!(strip_chrome(raw), "the question");
    assert_eq!(strip_chrome("ChatGPT said: inline reply"), "inline reply");
}

#[test]
fn normalize_payload_is_single_line_and_trimmed() {
    let payload = normalize_payload("  hello\nworld  ");
    assert_eq!(payload, "hello\\nworld");
}

#[test]
fn replace_file_atomic_writes_content_and_leaves_no_swap_residue() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("nested/deeper/Truth.view");
    replace_file_atomic(&path, "projection").expect("write");
    assert_eq!(fs::read_to_string(&path).expect("read"), "projection");

    replace_file_atomic(&path, "replaced").expect("rewrite");
    assert_eq!(fs::read_to_string(&path).expect("read"), "replaced");

    let residue: Vec<_> = fs::read_dir(path.parent().expect("parent"))
        .expect("read dir")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().contains("swap"))
        .collect();
    assert!(residue.is_empty());
}

#[test]
fn replace_file_atomic_rejects_directory_destination() {
    let temp = tempdir().expect("tempdir");
    assert!(replace_file_atomic(temp.path(), "nope").is_err());
}

#[test]
fn backup_stamp_is_a_compact_utc_timestamp() {
    let stamp = backup_stamp();
    assert_eq!(stamp.len(), 14);
    assert!(stamp.chars().all(|ch| ch.is_ascii_digit()));
}

#[test]
fn tail_repair_is_a_noop_on_well_formed_files() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("Truth.log");
    fs::write(&path, "U|hello\nA|hi there\n").expect("write");

    let outcome = repair_truncated_tail(&path).expect("repair");
    assert!(!outcome.repaired);
    assert_eq!(outcome.bytes_removed, 0);
    assert_eq!(
        fs::read_to_string(&path).expect("read"),
        "U|hello\nA|hi there\n"
    );
}

#[test]
fn tail_repair_truncates_to_last_record_boundary_once() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("Truth.log");
    fs::write(&path, "U|one\nA|two\nU|par").expect("write");

    let outcome = repair_truncated_tail(&path).expect("repair");
    assert!(outcome.repaired);
    assert_eq!(outcome.bytes_removed, 5);
    assert_eq!(fs::read_to_string(&path).expect("read"), "U|one\nA|two\n");

    let second = repair_truncated_tail(&path).expect("repair again");
    assert!(!second.repaired);
    assert_eq!(second.bytes_removed, 0);
}

#[test]
fn tail_repair_truncates_boundary_free_files_to_empty() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("Truth.log");
    fs::write(&path, "garbage").expect("write");

    let outcome = repair_truncated_tail(&path).expect("repair");
    assert!(outcome.repaired);
    assert_eq!(outcome.bytes_removed, 7);
    assert_eq!(fs::metadata(&path).expect("stat").len(), 0);
}

#[test]
fn tail_repair_handles_missing_and_empty_files() {
    let temp = tempdir().expect("tempdir");
    let missing = temp.path().join("absent.log");
    let outcome = repair_truncated_tail(&missing).expect("repair missing");
    assert!(!outcome.repaired);

    let empty = temp.path().join("empty.log");
    fs::write(&empty, "").expect("write");
    let outcome = repair_truncated_tail(&empty).expect("repair empty");
    assert!(!outcome.repaired);
}

#[test]
fn tail_repair_scans_past_one_block_of_partial_tail() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("Truth.log");
    let partial = "x".repeat(10_000);
    fs::write(&path, format!("U|kept\n{partial}")).expect("write");

    let outcome = repair_truncated_tail(&path).expect("repair");
    assert!(outcome.repaired);
    assert_eq!(outcome.bytes_removed, 10_000);
    assert_eq!(fs::read_to_string(&path).expect("read"), "U|kept\n");
}

#[test]
fn reader_skips_malformed_lines_but_keeps_physical_numbers() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("Truth.log");
    fs::write(
        &path,
        "U|hello\n\nX|nope\nno separator here\nA|hi there\n",
    )
    .expect("write");

    let records: Vec<_> = TruthLogReader::open(&path).expect("open").collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].line_number, 1);
    assert_eq!(records[0].role, Role::User);
    assert_eq!(records[0].payload, "hello");
    assert_eq!(records[1].line_number, 5);
    assert_eq!(records[1].role, Role::Assistant);
    assert_eq!(records[1].payload, "hi there");
}

#[test]
fn read_records_is_empty_for_missing_files() {
    let temp = tempdir().expect("tempdir");
    assert!(read_records(&temp.path().join("absent.log")).is_empty());
}

#[test]
fn append_then_reread_round_trips_and_dedupes() {
    let temp = tempdir().expect("tempdir");
    let store = TranscriptStore::new(temp.path());

    assert!(store.append("S", 'U', "hello").is_appended());
    assert!(store.append("S", 'A', "hi there").is_appended());
    assert_eq!(store.append("S", 'U', "hello"), AppendOutcome::Duplicate);

    let contents = fs::read_to_string(store.log_path("S")).expect("read");
    assert_eq!(contents, "U|hello\nA|hi there\n");
}

#[test]
fn dedup_survives_store_restart() {
    let temp = tempdir().expect("tempdir");
    {
        let store = TranscriptStore::new(temp.path());
        assert!(store.append("S", 'U', "hello").is_appended());
    }

    let reopened = TranscriptStore::new(temp.path());
    assert_eq!(reopened.append("S", 'U', "hello"), AppendOutcome::Duplicate);
    let records = read_records(&reopened.log_path("S"));
    assert_eq!(records.len(), 1);
}

#[test]
fn dedup_ignores_whitespace_and_case_jitter() {
    let temp = tempdir().expect("tempdir");
    let store = TranscriptStore::new(temp.path());

    assert!(store.append("S", 'U', "hello   world").is_appended());
    assert_eq!(
        store.append("S", 'U', "Hello world"),
        AppendOutcome::Duplicate
    );
    assert_eq!(
        store.append("S", 'U', "hello\nworld"),
        AppendOutcome::Duplicate
    );
    // Same text from the other role is a distinct record.
    assert!(store.append("S", 'A', "hello world").is_appended());
}

#[test]
fn append_rejects_invalid_inputs() {
    let temp = tempdir().expect("tempdir");
    let store = TranscriptStore::new(temp.path());

    assert_eq!(store.append("", 'U', "hello"), AppendOutcome::Rejected);
    assert_eq!(store.append("   ", 'U', "hello"), AppendOutcome::Rejected);
    assert_eq!(store.append("S", 'U', "   "), AppendOutcome::Rejected);
    assert_eq!(store.append("../S", 'U', "hello"), AppendOutcome::Rejected);
    assert_eq!(store.append("a/b", 'U', "hello"), AppendOutcome::Rejected);
    // Chrome-only captures carry no substantive content.
    assert_eq!(store.append("S", 'U', "Copy code"), AppendOutcome::Rejected);
}

#[test]
fn append_recovers_from_out_of_band_deletion() {
    let temp = tempdir().expect("tempdir");
    let store = TranscriptStore::new(temp.path());

    assert!(store.append("S", 'U', "hello").is_appended());
    fs::remove_file(store.log_path("S")).expect("delete");

    assert!(store.append("S", 'U', "hello").is_appended());
    assert_eq!(read_records(&store.log_path("S")).len(), 1);
}

#[test]
fn hydration_repairs_damaged_tail_and_records_audit_event() {
    let temp = tempdir().expect("tempdir");
    {
        let store = TranscriptStore::new(temp.path());
        assert!(store.append("S", 'U', "hello").is_appended());
    }
    let log_path = TranscriptStore::new(temp.path()).log_path("S");
    let mut damaged = fs::read_to_string(&log_path).expect("read");
    damaged.push_str("A|torn-mid-wri");
    fs::write(&log_path, damaged).expect("write");

    let store = TranscriptStore::new(temp.path());
    assert_eq!(store.append("S", 'U', "hello"), AppendOutcome::Duplicate);

    let report = store.health_report("S");
    assert_eq!(report.record_count, 1);
    assert_eq!(report.repair_events, 1);
    assert!(store
        .session_dir("S")
        .join(super::REPAIR_AUDIT_FILE)
        .exists());
}

#[test]
fn rebuild_redirects_appends_and_commits_atomically() {
    let temp = tempdir().expect("tempdir");
    let store = TranscriptStore::new(temp.path());
    assert!(store.append("S", 'U', "old question").is_appended());
    assert!(store.append("S", 'A', "old answer").is_appended());
    let before = fs::read_to_string(store.log_path("S")).expect("read");

    let ticket = store.begin_rebuild("S", true).expect("begin");
    assert!(ticket.backup_path.is_some());

    assert!(store.append("S", 'U', "summary turn").is_appended());
    // Live file untouched while the rebuild is active.
    assert_eq!(fs::read_to_string(store.log_path("S")).expect("read"), before);
    assert_eq!(
        fs::read_to_string(&ticket.temp_path).expect("read temp"),
        "U|summary turn\n"
    );

    assert!(store.commit_rebuild("S"));
    assert_eq!(
        fs::read_to_string(store.log_path("S")).expect("read"),
        "U|summary turn\n"
    );
    // Cache re-hydrates from the rebuilt file.
    assert_eq!(
        store.append("S", 'U', "summary turn"),
        AppendOutcome::Duplicate
    );
    assert!(store.append("S", 'U', "old question").is_appended());

    // The pre-rebuild backup preserved the original bytes.
    let backup = ticket.backup_path.expect("backup path");
    assert_eq!(fs::read_to_string(backup).expect("read backup"), before);
}

#[test]
fn rebuild_starts_with_its_own_clean_fingerprint_set() {
    let temp = tempdir().expect("tempdir");
    let store = TranscriptStore::new(temp.path());
    assert!(store.append("S", 'U', "repeated line").is_appended());

    store.begin_rebuild("S", false).expect("begin");
    assert!(store.append("S", 'U', "repeated line").is_appended());
    assert_eq!(
        store.append("S", 'U', "repeated line"),
        AppendOutcome::Duplicate
    );
    assert!(store.commit_rebuild("S"));
}

#[test]
fn aborted_rebuild_leaves_live_file_byte_identical() {
    let temp = tempdir().expect("tempdir");
    let store = TranscriptStore::new(temp.path());
    assert!(store.append("S", 'U', "keep me").is_appended());
    let before = fs::read(store.log_path("S")).expect("read");

    let ticket = store.begin_rebuild("S", false).expect("begin");
    assert!(store.append("S", 'A', "discarded").is_appended());
    assert!(store.abort_rebuild("S"));

    assert_eq!(fs::read(store.log_path("S")).expect("read"), before);
    assert!(!ticket.temp_path.exists());
    // Abort consumed the rebuild; commit is now a failing no-op.
    assert!(!store.commit_rebuild("S"));
    assert!(!store.abort_rebuild("S"));
}

#[test]
fn second_rebuild_begin_fails_fast_while_one_is_active() {
    let temp = tempdir().expect("tempdir");
    let store = TranscriptStore::new(temp.path());
    store.begin_rebuild("S", false).expect("begin");
    assert!(store.begin_rebuild("S", false).is_err());
    // A different session is unaffected.
    assert!(store.begin_rebuild("T", false).is_ok());
}

#[test]
fn cancelled_rebuild_drops_appends_and_refuses_commit() {
    let temp = tempdir().expect("tempdir");
    let store = TranscriptStore::new(temp.path());
    assert!(store.append("S", 'U', "live content").is_appended());
    let before = fs::read_to_string(store.log_path("S")).expect("read");

    let ticket = store.begin_rebuild("S", false).expect("begin");
    ticket.cancel();
    assert!(ticket.is_cancelled());
    assert_eq!(
        store.append("S", 'U', "dropped turn"),
        AppendOutcome::Failed
    );
    assert!(!store.commit_rebuild("S"));
    assert_eq!(fs::read_to_string(store.log_path("S")).expect("read"), before);
}

#[test]
fn cancel_rebuild_by_session_id() {
    let temp = tempdir().expect("tempdir");
    let store = TranscriptStore::new(temp.path());
    assert!(!store.cancel_rebuild("S"));
    store.begin_rebuild("S", false).expect("begin");
    assert!(store.cancel_rebuild("S"));
    assert!(!store.commit_rebuild("S"));
}

#[test]
fn reset_log_backs_up_or_deletes() {
    let temp = tempdir().expect("tempdir");
    let store = TranscriptStore::new(temp.path());
    assert!(store.append("S", 'U', "hello").is_appended());

    assert!(store.reset_log("S", true));
    assert!(!store.log_path("S").exists());
    let backups: Vec<_> = fs::read_dir(store.session_dir("S"))
        .expect("read dir")
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .contains(super::BACKUP_MARKER)
        })
        .collect();
    assert_eq!(backups.len(), 1);

    // After reset the same turn appends fresh.
    assert!(store.append("S", 'U', "hello").is_appended());
    assert!(store.reset_log("S", false));
    assert!(!store.log_path("S").exists());
    assert!(store.reset_log("S", false));
}

#[test]
fn view_projection_renders_normalized_transcript() {
    let temp = tempdir().expect("tempdir");
    let store = TranscriptStore::new(temp.path());
    assert!(store.append("S", 'U', "question\nwith detail").is_appended());
    assert!(store.append("S", 'A', "answer").is_appended());

    assert!(store.write_view("S"));
    let view = fs::read_to_string(store.session_dir("S").join(super::TRUTH_VIEW_FILE))
        .expect("read view");
    assert_eq!(view, "User:\nquestion\nwith detail\n\nAssistant:\nanswer");
}

#[test]
fn health_report_counts_structure_while_tolerating_damage() {
    let temp = tempdir().expect("tempdir");
    let store = TranscriptStore::new(temp.path());
    store.ensure_session_dir("S").expect("dir");
    fs::write(
        store.log_path("S"),
        "U|hello\n\nX|nope\nA|hi there\nA|more\n",
    )
    .expect("write");

    let report = store.health_report("S");
    assert!(report.log_exists);
    assert_eq!(report.record_count, 3);
    assert_eq!(report.user_records, 1);
    assert_eq!(report.assistant_records, 2);
    assert_eq!(report.malformed_lines, 1);
    assert_eq!(report.blank_lines, 1);

    let missing = store.health_report("missing-session");
    assert!(!missing.log_exists);
    assert_eq!(missing.record_count, 0);
}

#[test]
fn duplicate_suppression_is_reported() {
    let temp = tempdir().expect("tempdir");
    let store = TranscriptStore::new(temp.path());
    assert!(store.append("S", 'U', "hello").is_appended());
    assert_eq!(store.append("S", 'U', "hello"), AppendOutcome::Duplicate);
    assert_eq!(store.append("S", 'U', "hello"), AppendOutcome::Duplicate);
    assert_eq!(store.health_report("S").duplicates_suppressed, 2);
}

struct CountingObserver {
    appends: AtomicUsize,
}

impl TelemetryObserver for CountingObserver {
    fn on_append(&self, _session_id: &str, _role: Role, _payload_bytes: usize) {
        self.appends.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn observer_fires_only_on_successful_appends() {
    let temp = tempdir().expect("tempdir");
    let observer = Arc::new(CountingObserver {
        appends: AtomicUsize::new(0),
    });
    let store = TranscriptStore::with_observer(temp.path(), Arc::clone(&observer) as _);

    assert!(store.append("S", 'U', "hello").is_appended());
    assert_eq!(store.append("S", 'U', "hello"), AppendOutcome::Duplicate);
    assert_eq!(store.append("S", 'U', ""), AppendOutcome::Rejected);
    assert_eq!(observer.appends.load(Ordering::SeqCst), 1);
}

#[test]
fn sessions_do_not_share_dedup_state() {
    let temp = tempdir().expect("tempdir");
    let store = TranscriptStore::new(temp.path());
    assert!(store.append("S", 'U', "hello").is_appended());
    assert!(store.append("T", 'U', "hello").is_appended());
    assert_eq!(store.append("S", 'U', "hello"), AppendOutcome::Duplicate);
}

#[test]
fn concurrent_appends_to_one_session_serialize() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(TranscriptStore::new(temp.path()));

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for turn in 0..20 {
                    store.append("S", 'U', &format!("worker {worker} turn {turn}"));
                    // Every worker also races on one shared turn.
                    store.append("S", 'A', "shared answer");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("join");
    }

    let records = read_records(&store.log_path("S"));
    assert_eq!(records.len(), 8 * 20 + 1);
    let fingerprints: std::collections::HashSet<_> = records
        .iter()
        .map(|record| record_fingerprint(record.role, &record.payload))
        .collect();
    assert_eq!(fingerprints.len(), records.len());
}
