//! Save/open round trips across crates.

use passdb_model::Tree;
use passdb_testkit::prelude::*;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn kdbx_roundtrip_preserves_tree(script in edit_script_strategy(24)) {
        let fixture = TestDocument::new(DatabaseVersion::V4);
        apply_script(&fixture.doc, &script);
        let before = fixture.with_tree(Tree::clone).unwrap();

        let reopened = fixture.save_and_reopen("pw");
        let after = reopened.with_tree(Tree::clone).unwrap();
        prop_assert_eq!(after, before);
    }

    #[test]
    fn kdb_roundtrip_preserves_outline(script in edit_script_strategy(24)) {
        let fixture = TestDocument::new(DatabaseVersion::V3);
        apply_script(&fixture.doc, &script);
        let before = fixture.with_tree(Outline::of).unwrap().without_roles();

        let reopened = fixture.save_and_reopen("pw");
        let after = reopened.with_tree(Outline::of).unwrap().without_roles();
        prop_assert_eq!(after, before);
    }

    #[test]
    fn wrong_password_never_opens(password in "[a-z]{1,12}") {
        prop_assume!(password != "pw");
        let fixture = TestDocument::new(DatabaseVersion::V4);
        fixture.save("pw");
        let doc = passdb_core::Document::closed(fast_config(DatabaseVersion::V4));
        let err = doc
            .open(
                Box::new(passdb_storage::FileBackend::new(&fixture.path)),
                &passdb_codec::Credentials::password(password),
            )
            .unwrap_err();
        prop_assert!(err.is_wrong_credentials());
    }
}

#[test]
fn work_email_scenario() {
    let fixture = TestDocument::new(DatabaseVersion::V4);
    let WorkEmail { work, email } = work_email(&fixture.doc);

    let reopened = fixture.save_and_reopen("correct horse");
    let entry = reopened.find_entry(email).unwrap().unwrap();
    assert_eq!(entry.group(), work);
    assert_eq!(entry.title(), "Email");
    assert_eq!(entry.value(passdb_model::PASSWORD), "x");
    let root = reopened.root_id().unwrap();
    assert_eq!(
        reopened.find_group(work).unwrap().unwrap().parent(),
        Some(root)
    );
}

#[test]
fn kdb_scenario_keeps_backup_group() {
    let fixture = TestDocument::new(DatabaseVersion::V3);
    let WorkEmail { email, .. } = work_email(&fixture.doc);
    fixture.delete_entry(email).unwrap();

    let reopened = fixture.save_and_reopen("pw");
    let outline = reopened.with_tree(Outline::of).unwrap();
    let backup = outline
        .children
        .iter()
        .find(|g| g.trash)
        .expect("trash group survives");
    assert_eq!(backup.name, passdb_codec::kdb::BACKUP_GROUP);
    assert_eq!(backup.entries.len(), 1);
    assert!(reopened.is_trashed(email).unwrap());
}
