use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crossbeam::channel::Receiver;
use proptest::prelude::*;

use super::*;
use crate::config::NewDocumentConfig;
use crate::engine::{RopeEngine, TextEngine};

fn make_buffer(path: &Path, status: FileStatus) -> (Buffer, Receiver<BufferEvent>) {
    let bus = ChangeBus::new();
    let events = bus.subscribe();
    let mut engine = RopeEngine::new();
    let buffer = Buffer::new(BufferInit {
        id: BufferId(1),
        document: engine.create_document(),
        path,
        status,
        large_file: false,
        defaults: &NewDocumentConfig::default(),
        languages: &LanguageMap::default(),
        bus,
    });
    (buffer, events)
}

fn drain(events: &Receiver<BufferEvent>) -> ChangeSet {
    events
        .try_iter()
        .fold(ChangeSet::empty(), |acc, event| acc | event.changes)
}

#[test]
fn test_construction_is_silent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.py");
    fs::write(&path, "print(1)\n").unwrap();

    let (buffer, events) = make_buffer(&path, FileStatus::Regular);
    assert!(events.try_recv().is_err());
    assert_eq!(buffer.file_name(), "main.py");
    assert_eq!(buffer.lang_type(), &LangType::Python);
    assert!(buffer.timestamp().is_some());
    assert_eq!(buffer.encoding_id(), -1);
}

#[test]
fn test_status_regular_to_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.txt");
    fs::write(&path, "a").unwrap();
    let (mut buffer, events) = make_buffer(&path, FileStatus::Regular);

    assert!(!buffer.check_file_state());
    assert_eq!(buffer.status(), FileStatus::Regular);

    fs::remove_file(&path).unwrap();
    assert!(buffer.check_file_state());
    assert_eq!(buffer.status(), FileStatus::Deleted);
    assert!(buffer.is_dirty());
    assert!(!buffer.is_file_readonly());
    assert_eq!(buffer.timestamp(), None);
    assert!(drain(&events).contains(ChangeSet::STATUS));
}

#[test]
fn test_status_deleted_stays_deleted_while_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.txt");
    fs::write(&path, "a").unwrap();
    let (mut buffer, _events) = make_buffer(&path, FileStatus::Regular);

    fs::remove_file(&path).unwrap();
    assert!(buffer.check_file_state());
    assert!(!buffer.check_file_state());
    assert_eq!(buffer.status(), FileStatus::Deleted);
}

#[test]
fn test_status_deleted_to_modified_when_file_returns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.txt");
    fs::write(&path, "a").unwrap();
    let (mut buffer, events) = make_buffer(&path, FileStatus::Regular);

    fs::remove_file(&path).unwrap();
    buffer.check_file_state();
    drain(&events);

    fs::write(&path, "back").unwrap();
    assert!(buffer.check_file_state());
    assert_eq!(buffer.status(), FileStatus::Modified);
    assert!(buffer.timestamp().is_some());
    assert!(drain(&events).contains(ChangeSet::STATUS | ChangeSet::TIMESTAMP));
}

#[test]
fn test_status_timestamp_change_refires_status() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.txt");
    fs::write(&path, "a").unwrap();
    let (mut buffer, events) = make_buffer(&path, FileStatus::Regular);

    buffer.set_timestamp(Some(UNIX_EPOCH));
    drain(&events);
    assert!(buffer.check_file_state());
    assert_eq!(buffer.status(), FileStatus::Modified);
    assert!(drain(&events).contains(ChangeSet::STATUS | ChangeSet::TIMESTAMP));

    // already Modified: a second disk change still notifies
    buffer.set_timestamp(Some(UNIX_EPOCH));
    drain(&events);
    assert!(buffer.check_file_state());
    assert_eq!(buffer.status(), FileStatus::Modified);
    assert!(drain(&events).contains(ChangeSet::STATUS));
}

#[test]
fn test_status_readonly_change_alone_counts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.txt");
    fs::write(&path, "a").unwrap();
    let (mut buffer, events) = make_buffer(&path, FileStatus::Regular);

    buffer.set_file_readonly(true);
    drain(&events);
    assert!(buffer.check_file_state());
    assert!(!buffer.is_file_readonly());
    assert!(drain(&events).contains(ChangeSet::READ_ONLY | ChangeSet::STATUS));
}

#[test]
fn test_unnamed_never_transitions() {
    let dir = tempfile::tempdir().unwrap();
    let (mut buffer, events) = make_buffer(Path::new("new 1"), FileStatus::Unnamed);
    assert!(!buffer.check_file_state());
    assert_eq!(buffer.status(), FileStatus::Unnamed);

    // even when a file of that name shows up
    let named = dir.path().join("new 1");
    fs::write(&named, "x").unwrap();
    let (mut other, _) = make_buffer(&named, FileStatus::Unnamed);
    assert!(!other.check_file_state());
    assert_eq!(other.status(), FileStatus::Unnamed);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_deferred_reload_clears_dirty() {
    let (mut buffer, events) = make_buffer(Path::new("new 1"), FileStatus::Unnamed);
    buffer.set_dirty(true);
    drain(&events);

    buffer.set_deferred_reload();
    assert!(!buffer.is_dirty());
    assert!(buffer.needs_reload());
    assert_eq!(drain(&events), ChangeSet::DIRTY);
}

#[test]
fn test_setters_fire_their_changes() {
    let (mut buffer, events) = make_buffer(Path::new("new 1"), FileStatus::Unnamed);

    buffer.set_encoding(Some(crate::encoding::Codepage(1251)));
    assert_eq!(drain(&events), ChangeSet::UNICODE | ChangeSet::DIRTY);
    assert_eq!(buffer.encoding_id(), 1251);

    buffer.set_unicode_mode(crate::encoding::UniMode::Utf16LeBom);
    assert_eq!(drain(&events), ChangeSet::UNICODE | ChangeSet::DIRTY);

    buffer.set_lang_type(LangType::Rust);
    assert_eq!(drain(&events), ChangeSet::LANGUAGE | ChangeSet::LEXING);
    assert!(buffer.needs_lexing());
}

#[test]
fn test_explicit_language_survives_rename() {
    let (mut buffer, _events) = make_buffer(Path::new("new 1"), FileStatus::Unnamed);
    buffer.set_lang_type(LangType::Sql);
    buffer.set_file_name(Path::new("/tmp/query.py"), &LangType::Text, &LanguageMap::default());
    assert_eq!(buffer.lang_type(), &LangType::Sql);
    assert_eq!(buffer.file_name(), "query.py");
}

#[test]
fn test_suppressed_notifications() {
    let (mut buffer, events) = make_buffer(Path::new("new 1"), FileStatus::Unnamed);
    buffer.set_notifications_enabled(false);
    buffer.set_dirty(true);
    assert!(events.try_recv().is_err());
    buffer.set_notifications_enabled(true);
    buffer.set_dirty(false);
    assert_eq!(drain(&events), ChangeSet::DIRTY);
}

#[test]
fn test_view_state_requires_reference() {
    let (mut buffer, _events) = make_buffer(Path::new("new 1"), FileStatus::Unnamed);
    buffer.set_position(ViewId(0), Position::at(4));
    assert_eq!(buffer.position(ViewId(0)), None);

    buffer.add_reference(ViewId(0));
    buffer.set_position(ViewId(0), Position::at(4));
    buffer.set_fold_state(ViewId(0), vec![2, 9]);
    assert_eq!(buffer.position(ViewId(0)), Some(Position::at(4)));
    assert_eq!(buffer.fold_state(ViewId(0)), Some(&[2, 9][..]));
}

#[derive(Debug, Clone)]
enum RefOp {
    Add(u32),
    Remove(u32),
}

fn ref_ops() -> impl Strategy<Value = Vec<RefOp>> {
    proptest::collection::vec(
        prop_oneof![(0u32..4).prop_map(RefOp::Add), (0u32..4).prop_map(RefOp::Remove)],
        0..40,
    )
}

proptest! {
    #[test]
    fn reference_count_matches_registered_views(ops in ref_ops()) {
        let (mut buffer, _events) = make_buffer(Path::new("new 1"), FileStatus::Unnamed);
        let mut model = std::collections::BTreeSet::new();

        for op in ops {
            let count = match op {
                RefOp::Add(v) => {
                    model.insert(v);
                    buffer.add_reference(ViewId(v))
                }
                RefOp::Remove(v) => {
                    model.remove(&v);
                    buffer.remove_reference(ViewId(v))
                }
            };
            prop_assert_eq!(count, model.len());
            prop_assert_eq!(buffer.reference_count(), model.len());
            for v in 0..4 {
                prop_assert_eq!(buffer.position(ViewId(v)).is_some(), model.contains(&v));
            }
        }
    }
}
