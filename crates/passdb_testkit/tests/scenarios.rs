//! End-to-end document scenarios.

use passdb_core::{ChangeEvent, CoreError};
use passdb_model::{ModelError, StringField, PASSWORD};
use passdb_testkit::prelude::*;

#[test]
fn soft_then_hard_delete() {
    let fixture = TestDocument::new(DatabaseVersion::V4);
    let WorkEmail { work, email } = work_email(&fixture.doc);
    let trash = fixture.trash_id().unwrap().unwrap();

    fixture.delete_group(work).unwrap();
    let moved = fixture.find_group(work).unwrap().unwrap();
    assert_eq!(moved.parent(), Some(trash));
    assert!(fixture.is_trashed(email).unwrap());

    fixture.delete_group(work).unwrap();
    assert!(fixture.find_group(work).unwrap().is_none());
    assert!(fixture.find_entry(email).unwrap().is_none());

    fixture.undo().unwrap();
    assert!(fixture.find_entry(email).unwrap().is_some());
    fixture.undo().unwrap();
    let root = fixture.root_id().unwrap();
    assert_eq!(fixture.find_group(work).unwrap().unwrap().parent(), Some(root));
}

#[test]
fn duplicate_field_is_rejected() {
    let fixture = TestDocument::new(DatabaseVersion::V4);
    let WorkEmail { email, .. } = work_email(&fixture.doc);
    let err = fixture
        .add_string_field(email, StringField::new(PASSWORD, "again", true), 0)
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Model(ModelError::DuplicateField { .. })
    ));
    assert_eq!(
        fixture.find_entry(email).unwrap().unwrap().value(PASSWORD),
        "x"
    );
}

#[test]
fn choosing_a_new_trash_demotes_the_old_one() {
    let fixture = TestDocument::new(DatabaseVersion::V4);
    let WorkEmail { work, .. } = work_email(&fixture.doc);
    let old = fixture.trash_id().unwrap().unwrap();
    let events = fixture.subscribe();

    fixture.use_group_as_trash(work).unwrap();
    assert_eq!(fixture.trash_id().unwrap(), Some(work));
    assert!(!fixture.find_group(old).unwrap().unwrap().has_role(passdb_model::Role::Trash));
    assert!(events
        .try_iter()
        .any(|e| matches!(e, ChangeEvent::RolesChanged { .. })));

    fixture.undo().unwrap();
    assert_eq!(fixture.trash_id().unwrap(), Some(old));
}

#[test]
fn attachment_dedup_and_compaction() {
    let fixture = TestDocument::new(DatabaseVersion::V4);
    let WorkEmail { work, email } = work_email(&fixture.doc);
    let other = fixture.create_entry(work).unwrap();

    let a = fixture.add_attachment(email, "a.bin", vec![1, 2, 3]).unwrap();
    let b = fixture.add_attachment(other, "b.bin", vec![1, 2, 3]).unwrap();
    let c = fixture.add_attachment(other, "c.bin", vec![9]).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);

    fixture.delete_entry(email).unwrap();
    fixture.empty_trash().unwrap();
    // Still referenced by `other`.
    assert_eq!(fixture.with_tree(|t| t.attachments().len()).unwrap(), 2);

    fixture.remove_attachment(other, 0).unwrap();
    assert_eq!(fixture.compact_attachments().unwrap(), 1);
    let entry = fixture.find_entry(other).unwrap().unwrap();
    let binary = fixture.find_binary(&entry.attachments()[0]).unwrap().unwrap();
    assert_eq!(binary.data(), &[9]);
}

#[test]
fn attachment_file_roundtrip() {
    let fixture = TestDocument::new(DatabaseVersion::V4);
    let WorkEmail { email, .. } = work_email(&fixture.doc);
    let source = fixture.dir().join("photo.jpg");
    std::fs::write(&source, b"jpeg bytes").unwrap();

    fixture.add_attachment_file(email, &source).unwrap();
    let entry = fixture.find_entry(email).unwrap().unwrap();
    assert_eq!(entry.attachments()[0].name, "photo.jpg");

    let target = fixture.dir().join("copy.jpg");
    fixture.save_attachment(email, 0, &target).unwrap();
    assert_eq!(std::fs::read(target).unwrap(), b"jpeg bytes");
}

#[test]
fn locked_document_hides_content() {
    let fixture = TestDocument::new(DatabaseVersion::V4);
    let WorkEmail { email, .. } = work_email(&fixture.doc);
    fixture.save("pw");

    fixture.lock().unwrap();
    assert!(matches!(fixture.find_entry(email), Err(CoreError::Locked)));
    assert!(matches!(fixture.undo(), Err(CoreError::Locked)));
    assert!(!fixture
        .unlock(&passdb_codec::Credentials::password("nope"))
        .unwrap());
    assert!(fixture
        .unlock(&passdb_codec::Credentials::password("pw"))
        .unwrap());
    assert!(fixture.can_undo());
    assert!(fixture.find_entry(email).unwrap().is_some());
}
