//! Change notifications.
//!
//! Every committed action produces [`ChangeEvent`]s. Observers either
//! register a callback with [`Listeners::add`] or take a channel with
//! [`Listeners::subscribe`]. Nothing in the engine depends on an observer
//! existing.
//!
//! # Usage
//!
//! ```rust,ignore
//! use passdb_core::{ChangeEvent, Document};
//!
//! let doc = Document::new(Default::default());
//! let id = doc.add_listener(|event| {
//!     if let ChangeEvent::EntryAdded { entry, .. } = event {
//!         println!("new entry {entry}");
//!     }
//! });
//! doc.create_entry(doc.root_id()?)?;
//! doc.remove_listener(id);
//! ```

use parking_lot::RwLock;
use passdb_model::{EntryId, GroupId, Role};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// A change to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A group (with its subtree) appeared under `parent`.
    GroupAdded {
        /// The group.
        group: GroupId,
        /// Its parent.
        parent: GroupId,
    },
    /// An entry appeared in `group`.
    EntryAdded {
        /// The entry.
        entry: EntryId,
        /// Its group.
        group: GroupId,
    },
    /// A group (with its subtree) left the tree.
    GroupRemoved {
        /// The group.
        group: GroupId,
        /// Its former parent.
        parent: GroupId,
    },
    /// An entry left the tree.
    EntryRemoved {
        /// The entry.
        entry: EntryId,
        /// Its former group.
        group: GroupId,
    },
    /// A group changed parent or position.
    GroupMoved {
        /// The group.
        group: GroupId,
        /// Former parent.
        from: GroupId,
        /// New parent.
        to: GroupId,
    },
    /// An entry changed group or position.
    EntryMoved {
        /// The entry.
        entry: EntryId,
        /// Former group.
        from: GroupId,
        /// New group.
        to: GroupId,
    },
    /// Fields, attachments, icon or times of an entry changed.
    EntryChanged {
        /// The entry.
        entry: EntryId,
    },
    /// Name, icon or times of a group changed.
    GroupChanged {
        /// The group.
        group: GroupId,
    },
    /// A role moved to another group or was cleared.
    RolesChanged {
        /// The role.
        role: Role,
        /// The new holder.
        group: Option<GroupId>,
    },
    /// The trash was emptied.
    TrashEmptied {
        /// Groups removed directly below the trash.
        groups: usize,
        /// Entries removed directly in the trash.
        entries: usize,
        /// Binaries released from the attachment store.
        released: usize,
    },
    /// Unreferenced binaries were released.
    AttachmentsCompacted {
        /// Number of binaries dropped.
        released: usize,
    },
    /// The undo or redo stack changed.
    HistoryChanged {
        /// Whether undo is possible now.
        can_undo: bool,
        /// Whether redo is possible now.
        can_redo: bool,
    },
    /// The document was reloaded from its backend.
    DocumentReverted,
    /// The document needs credentials before it can be saved.
    PasswordSaveRequested,
    /// The document was locked.
    Locked,
    /// The document was unlocked.
    Unlocked,
}

/// Handle returned by [`Listeners::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Registered observers of one document.
///
/// Callbacks run synchronously on the thread that committed the change.
/// Channel subscribers whose receiver was dropped are removed on the next
/// emit.
pub struct Listeners {
    next_id: AtomicU64,
    callbacks: RwLock<Vec<(ListenerId, Callback)>>,
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
}

impl Listeners {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            callbacks: RwLock::new(Vec::new()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Registers a callback.
    pub fn add<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().push((id, Arc::new(callback)));
        id
    }

    /// Unregisters a callback. Returns false if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(other, _)| *other != id);
        callbacks.len() != before
    }

    /// Returns a receiver for all future events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Delivers events in order to every observer.
    ///
    /// The registry lock is not held while callbacks run, so a callback
    /// may register or remove listeners.
    pub fn emit(&self, events: &[ChangeEvent]) {
        if events.is_empty() {
            return;
        }
        let callbacks: Vec<Callback> = self.callbacks.read().iter().map(|(_, cb)| cb.clone()).collect();
        for event in events {
            for callback in &callbacks {
                callback(event);
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
    }

    /// Number of registered callbacks and live subscribers.
    pub fn len(&self) -> usize {
        self.callbacks.read().len() + self.subscribers.read().len()
    }

    /// Returns true if nobody is listening.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Listeners {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn callbacks_see_events_in_order() {
        let listeners = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        listeners.add(move |event| sink.lock().push(event.clone()));

        listeners.emit(&[ChangeEvent::Locked, ChangeEvent::Unlocked]);
        assert_eq!(*seen.lock(), vec![ChangeEvent::Locked, ChangeEvent::Unlocked]);
    }

    #[test]
    fn removed_callback_is_not_called() {
        let listeners = Listeners::new();
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        let id = listeners.add(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        listeners.emit(&[ChangeEvent::DocumentReverted]);
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.emit(&[ChangeEvent::DocumentReverted]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let listeners = Listeners::new();
        let rx = listeners.subscribe();
        let dropped = listeners.subscribe();
        drop(dropped);

        listeners.emit(&[ChangeEvent::PasswordSaveRequested]);
        assert_eq!(rx.try_recv().unwrap(), ChangeEvent::PasswordSaveRequested);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn callback_may_register_another() {
        let listeners = Arc::new(Listeners::new());
        let inner = listeners.clone();
        listeners.add(move |_| {
            inner.add(|_| {});
        });
        listeners.emit(&[ChangeEvent::Locked]);
        assert_eq!(listeners.len(), 2);
    }
}
