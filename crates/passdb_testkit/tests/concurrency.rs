//! Readers running alongside a single writer.

use passdb_core::Document;
use passdb_model::Tree;
use passdb_testkit::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

const READERS: usize = 4;
const ROUNDS: usize = 100;

#[test]
fn readers_never_observe_a_partial_action() {
    let doc = Document::new(fast_config(DatabaseVersion::V4));
    let root = doc.root_id().unwrap();
    let work = doc.create_group(root).unwrap();
    let anchor = doc.create_entry(work).unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        for _ in 0..READERS {
            scope.spawn(|| {
                let mut reads = 0usize;
                while reads == 0 || !done.load(Ordering::Acquire) {
                    doc.with_tree(|tree| {
                        tree.validate().unwrap();
                        for entry in tree.walk_entries() {
                            assert!(tree.find_group(entry.group()).is_some());
                        }
                    })
                    .unwrap();
                    assert!(doc.find_entry(anchor).unwrap().is_some());
                    assert!(doc.find_group(work).unwrap().is_some());
                    reads += 1;
                }
            });
        }

        scope.spawn(|| {
            for _ in 0..ROUNDS {
                let entry = doc.create_entry(work).unwrap();
                doc.delete_entry(entry).unwrap();
                doc.delete_entry(entry).unwrap();
                doc.undo().unwrap();
                doc.redo().unwrap();
            }
            done.store(true, Ordering::Release);
        });
    });

    doc.with_tree(Tree::validate).unwrap().unwrap();
    let live: Vec<_> = doc
        .with_tree(|tree| tree.walk_entries().iter().map(|e| e.id()).collect())
        .unwrap();
    assert_eq!(live, vec![anchor]);
}

#[test]
fn concurrent_lookups_agree() {
    let fixture = TestDocument::new(DatabaseVersion::V4);
    let WorkEmail { work, email } = work_email(&fixture.doc);
    let expected = fixture.find_entry(email).unwrap().unwrap();

    thread::scope(|scope| {
        for _ in 0..READERS {
            scope.spawn(|| {
                for _ in 0..ROUNDS {
                    let entry = fixture.find_entry(email).unwrap().unwrap();
                    assert_eq!(entry.title(), expected.title());
                    assert_eq!(entry.group(), work);
                    assert!(fixture.find_group(work).unwrap().is_some());
                }
            });
        }
    });
}
