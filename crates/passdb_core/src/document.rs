//! The document façade: one open password database.

use crate::background::{check_cancelled, Background};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::events::{ChangeEvent, ListenerId, Listeners};
use crate::guard::MutationGuard;
use crate::history::{Action, UndoHistory};
use crate::operation::{Batch, Operation};
use crate::verifier::Verifier;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use passdb_codec::{kdb, CompositeKey, Credentials};
use passdb_model::{
    Binary, BinaryId, BinaryRef, Compression, DatabaseVersion, Entry, EntryId, Group, GroupId,
    GroupSubtree, Role, StringField, Times, Tree, PASSWORD, STANDARD_KEYS, TITLE,
};
use passdb_storage::{FileBackend, StorageBackend};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of groups created by [`Document::create_group`].
pub const NEW_GROUP_NAME: &str = "New Group";
/// Title of entries created by [`Document::create_entry`].
pub const NEW_ENTRY_TITLE: &str = "New Entry";
/// Base key of fields created by [`Document::create_string_field`].
pub const NEW_FIELD_KEY: &str = "New Field";

const TRASH_ICON: u32 = 43;
const BACKUP_ICON: u32 = 4;

type SharedBackend = Arc<Mutex<Box<dyn StorageBackend>>>;

/// Lifecycle state of a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    /// No database loaded.
    Closed,
    /// A database is being read and decrypted.
    Decrypting,
    /// Content is readable and writable.
    Unlocked,
    /// Content is loaded but hidden until the credentials are re-entered.
    Locked,
}

/// A group or an entry, for operations that accept either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Item {
    /// A group.
    Group(GroupId),
    /// An entry.
    Entry(EntryId),
}

impl From<GroupId> for Item {
    fn from(id: GroupId) -> Self {
        Item::Group(id)
    }
}

impl From<EntryId> for Item {
    fn from(id: EntryId) -> Self {
        Item::Entry(id)
    }
}

/// One open password database.
///
/// `Document` owns the decrypted [`Tree`] and is the only way to change it.
/// It provides:
/// - Undoable mutations with change notifications
/// - Soft delete into the trash, permanent delete from the trash
/// - Lock/unlock against a cached credential verifier
/// - Open, save and revert against a [`StorageBackend`], synchronously or
///   on a worker thread
///
/// # Concurrency
///
/// Reads take a shared lock on the tree. Every mutation first enters a
/// non-reentrant [`MutationGuard`] and fails with
/// [`CoreError::ConcurrentMutation`] if another mutation is running, then
/// takes the exclusive lock. Listeners are called after the exclusive lock
/// is released but while the guard is still held: they can read the
/// document, and any attempt to mutate it from a listener fails.
///
/// # Example
///
/// ```rust,ignore
/// use passdb_core::{Config, Document};
/// use passdb_codec::Credentials;
/// use passdb_storage::FileBackend;
///
/// let doc = Document::new(Config::default());
/// let work = doc.create_group(doc.root_id()?)?;
/// doc.set_group_name(work, "Work")?;
/// let email = doc.create_entry(work)?;
/// doc.update_string_field(email, "Password", "x", true)?;
///
/// doc.set_credentials(&Credentials::password("correct horse"))?;
/// doc.save_to(Box::new(FileBackend::new("vault.kdbx".as_ref())))?;
/// ```
pub struct Document {
    config: Config,
    state: RwLock<DocumentState>,
    tree: RwLock<Option<Tree>>,
    history: Mutex<UndoHistory>,
    guard: MutationGuard,
    listeners: Listeners,
    backend: Mutex<Option<SharedBackend>>,
    key: Mutex<Option<CompositeKey>>,
    verifier: Mutex<Option<Verifier>>,
}

impl Document {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Creates an unlocked, empty database in the configured layout.
    ///
    /// The tree holds a root and a trash group. No credentials are set.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let version = config.version;
        let mut tree = Tree::new(version, kdb::ROOT_NAME);
        tree.meta_mut().transform_rounds = config.transform_rounds;
        tree.meta_mut().compression = match version {
            DatabaseVersion::V3 => Compression::None,
            DatabaseVersion::V4 => config.compression,
        };
        let trash = trash_group(version, &config);
        let trash_id = trash.id();
        let root = tree.root_id();
        // A fresh tree accepts a first child and role unconditionally.
        if let Err(err) = tree
            .add_group(root, trash)
            .and_then(|_| tree.set_role(Role::Trash, Some(trash_id)))
        {
            warn!(error = %err, "could not create trash group");
        }
        debug!(%version, "created new database");
        Self::with_state(config, DocumentState::Unlocked, Some(tree))
    }

    /// Creates a document with nothing loaded, ready for [`open`](Self::open).
    #[must_use]
    pub fn closed(config: Config) -> Self {
        Self::with_state(config, DocumentState::Closed, None)
    }

    /// Wraps an existing tree as an unlocked document without credentials.
    #[must_use]
    pub fn from_tree(tree: Tree, config: Config) -> Self {
        Self::with_state(config, DocumentState::Unlocked, Some(tree))
    }

    fn with_state(config: Config, state: DocumentState, tree: Option<Tree>) -> Self {
        Self {
            history: Mutex::new(UndoHistory::new(config.undo_depth)),
            config,
            state: RwLock::new(state),
            tree: RwLock::new(tree),
            guard: MutationGuard::new(),
            listeners: Listeners::new(),
            backend: Mutex::new(None),
            key: Mutex::new(None),
            verifier: Mutex::new(None),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> DocumentState {
        *self.state.read()
    }

    // ------------------------------------------------------------------
    // Opening and closing
    // ------------------------------------------------------------------

    /// Reads and decrypts a database.
    ///
    /// On failure the document stays closed and the codec error surfaces.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Codec`] with `WrongCredentials` if the credentials do
    ///   not open the file, `CorruptDatabase` if its content is malformed
    /// - [`CoreError::Storage`] if the backend cannot be read
    /// - [`CoreError::Busy`] unless the document is closed
    pub fn open(&self, backend: Box<dyn StorageBackend>, credentials: &Credentials) -> CoreResult<()> {
        let _token = self.guard.enter()?;
        self.begin_decrypting()?;
        let backend: SharedBackend = Arc::new(Mutex::new(backend));
        match load(&backend, credentials) {
            Ok((tree, key)) => {
                self.install(tree, key, backend);
                Ok(())
            }
            Err(err) => {
                *self.state.write() = DocumentState::Closed;
                warn!(error = %err, "open failed");
                Err(err)
            }
        }
    }

    /// Like [`open`](Self::open), but decrypts on a worker thread.
    ///
    /// The document is [`DocumentState::Decrypting`] until the worker
    /// finishes. A cancelled open leaves the document closed.
    ///
    /// # Errors
    ///
    /// Fails immediately unless the document is closed; the open itself
    /// reports through the returned handle.
    pub fn open_in_background(
        self: &Arc<Self>,
        backend: Box<dyn StorageBackend>,
        credentials: Credentials,
    ) -> CoreResult<Background<()>> {
        {
            let _token = self.guard.enter()?;
            self.begin_decrypting()?;
        }
        let doc = Arc::clone(self);
        let backend: SharedBackend = Arc::new(Mutex::new(backend));
        let spawned = Background::spawn("passdb-open", move |cancelled| {
            let result = load(&backend, &credentials).and_then(|loaded| {
                check_cancelled(cancelled)?;
                Ok(loaded)
            });
            match result.and_then(|(tree, key)| doc.install_decrypted(tree, key, backend)) {
                Ok(()) => Ok(()),
                Err(err) => {
                    let mut state = doc.state.write();
                    if *state == DocumentState::Decrypting {
                        *state = DocumentState::Closed;
                    }
                    debug!(error = %err, "background open did not complete");
                    Err(err)
                }
            }
        });
        if spawned.is_err() {
            *self.state.write() = DocumentState::Closed;
        }
        spawned
    }

    /// Drops the loaded database, its history and credentials.
    ///
    /// A background open has to be cancelled and waited for first.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ConcurrentMutation`] if a mutation is running
    /// - [`CoreError::Busy`] while a background open is decrypting
    pub fn close(&self) -> CoreResult<()> {
        let _token = self.guard.enter()?;
        if self.state() == DocumentState::Decrypting {
            return Err(CoreError::Busy);
        }
        *self.tree.write() = None;
        self.history.lock().clear();
        *self.key.lock() = None;
        *self.verifier.lock() = None;
        *self.backend.lock() = None;
        *self.state.write() = DocumentState::Closed;
        info!("document closed");
        Ok(())
    }

    fn begin_decrypting(&self) -> CoreResult<()> {
        let mut state = self.state.write();
        if *state != DocumentState::Closed {
            return Err(CoreError::Busy);
        }
        *state = DocumentState::Decrypting;
        Ok(())
    }

    /// Installs the result of a background open, unless the document left
    /// [`DocumentState::Decrypting`] in the meantime.
    fn install_decrypted(
        &self,
        tree: Tree,
        key: CompositeKey,
        backend: SharedBackend,
    ) -> CoreResult<()> {
        if self.state() != DocumentState::Decrypting {
            debug!("discarding superseded open");
            return Err(CoreError::Cancelled);
        }
        self.install(tree, key, backend);
        Ok(())
    }

    fn install(&self, tree: Tree, key: CompositeKey, backend: SharedBackend) {
        info!(
            version = %tree.version(),
            groups = tree.group_count(),
            entries = tree.entry_count(),
            "document opened"
        );
        *self.tree.write() = Some(tree);
        self.history.lock().clear();
        *self.verifier.lock() = Some(Verifier::new(&key));
        *self.key.lock() = Some(key);
        *self.backend.lock() = Some(backend);
        *self.state.write() = DocumentState::Unlocked;
    }

    // ------------------------------------------------------------------
    // Credentials and locking
    // ------------------------------------------------------------------

    /// Replaces the credentials used for the next save and for unlocking.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] with `MissingCredentials` if neither a
    /// password nor a key file is set.
    pub fn set_credentials(&self, credentials: &Credentials) -> CoreResult<()> {
        let version = self.with_tree(Tree::version)?;
        let key = credentials.composite_key(version)?;
        *self.verifier.lock() = Some(Verifier::new(&key));
        *self.key.lock() = Some(key);
        debug!(
            password = credentials.has_password(),
            key_file = credentials.has_key_file(),
            "credentials changed"
        );
        Ok(())
    }

    /// Returns true if a password and/or key file is set.
    pub fn has_password_or_key(&self) -> bool {
        self.key.lock().is_some()
    }

    /// Returns true if the document or its backend refuses writes.
    pub fn is_read_only(&self) -> bool {
        self.config.read_only
            || self
                .backend
                .lock()
                .as_ref()
                .is_some_and(|b| b.lock().is_read_only())
    }

    /// Returns true if a decrypted tree is loaded (locked or not).
    pub fn is_decrypted(&self) -> bool {
        matches!(self.state(), DocumentState::Unlocked | DocumentState::Locked)
    }

    /// Returns true if the content is hidden behind the lock.
    pub fn is_locked(&self) -> bool {
        self.state() == DocumentState::Locked
    }

    /// Hides the content until [`unlock`](Self::unlock) succeeds.
    ///
    /// The tree and the undo history are kept.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingCredentials`] if there is nothing to
    /// unlock with, or a state error unless the document is unlocked.
    pub fn lock(&self) -> CoreResult<()> {
        let _token = self.guard.enter()?;
        self.ensure_unlocked()?;
        if !self.has_password_or_key() {
            return Err(CoreError::MissingCredentials);
        }
        *self.state.write() = DocumentState::Locked;
        info!("document locked");
        self.listeners.emit(&[ChangeEvent::Locked]);
        Ok(())
    }

    /// Checks `credentials` against the cached verifier and unlocks on a
    /// match.
    ///
    /// Returns false, staying locked, if they do not match. The result does
    /// not say which part of the credentials was wrong.
    ///
    /// # Errors
    ///
    /// Returns a state error if the document is closed or decrypting.
    pub fn unlock(&self, credentials: &Credentials) -> CoreResult<bool> {
        let _token = self.guard.enter()?;
        match self.state() {
            DocumentState::Locked => {}
            DocumentState::Unlocked => return Ok(true),
            DocumentState::Closed => return Err(CoreError::Closed),
            DocumentState::Decrypting => return Err(CoreError::Busy),
        }
        let version = self.version_unchecked()?;
        let Ok(key) = credentials.composite_key(version) else {
            return Ok(false);
        };
        let matches = self
            .verifier
            .lock()
            .as_ref()
            .is_some_and(|verifier| verifier.matches(&key));
        if !matches {
            warn!("unlock rejected");
            return Ok(false);
        }
        *self.state.write() = DocumentState::Unlocked;
        info!("document unlocked");
        self.listeners.emit(&[ChangeEvent::Unlocked]);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Encrypts the tree and atomically replaces the backend's content.
    ///
    /// If no credentials are set, listeners get
    /// [`ChangeEvent::PasswordSaveRequested`] and the save fails.
    ///
    /// # Errors
    ///
    /// - [`CoreError::MissingCredentials`] without credentials
    /// - [`CoreError::NoBackend`] if the document was never opened or saved
    /// - [`CoreError::ReadOnly`] for read-only documents or backends
    /// - codec and storage errors; the previous file is left untouched
    pub fn save(&self) -> CoreResult<()> {
        let (tree, key, backend) = self.save_inputs(None)?;
        let bytes = passdb_codec::encode(&tree, &key)?;
        backend.lock().replace(&bytes)?;
        self.after_save(&key, bytes.len());
        Ok(())
    }

    /// Saves to `backend` and makes it the document's location.
    ///
    /// The location only changes once the write succeeded; after a failure
    /// later saves still go to the previous backend.
    ///
    /// # Errors
    ///
    /// As [`save`](Self::save), with the read-only check applied to
    /// `backend`.
    pub fn save_to(&self, backend: Box<dyn StorageBackend>) -> CoreResult<()> {
        let target: SharedBackend = Arc::new(Mutex::new(backend));
        let (tree, key, backend) = self.save_inputs(Some(target))?;
        let bytes = passdb_codec::encode(&tree, &key)?;
        backend.lock().replace(&bytes)?;
        *self.backend.lock() = Some(backend);
        self.after_save(&key, bytes.len());
        Ok(())
    }

    /// Like [`save`](Self::save), but encrypts and writes on a worker
    /// thread from a snapshot of the current tree.
    ///
    /// A cancelled or failed save never touches the persisted file.
    ///
    /// # Errors
    ///
    /// Fails immediately on the same preconditions as [`save`](Self::save).
    pub fn save_in_background(self: &Arc<Self>) -> CoreResult<Background<()>> {
        let (tree, key, backend) = self.save_inputs(None)?;
        let doc = Arc::clone(self);
        Background::spawn("passdb-save", move |cancelled| {
            let bytes = passdb_codec::encode(&tree, &key)?;
            check_cancelled(cancelled)?;
            backend.lock().replace(&bytes)?;
            doc.after_save(&key, bytes.len());
            Ok(())
        })
    }

    /// Collects what a save needs. `target` overrides the current backend.
    fn save_inputs(
        &self,
        target: Option<SharedBackend>,
    ) -> CoreResult<(Tree, CompositeKey, SharedBackend)> {
        self.ensure_unlocked()?;
        let backend = target.or_else(|| self.backend.lock().clone());
        let backend_read_only = backend.as_ref().is_some_and(|b| b.lock().is_read_only());
        if self.config.read_only || backend_read_only {
            return Err(CoreError::ReadOnly);
        }
        let Some(key) = self.key.lock().clone() else {
            self.listeners.emit(&[ChangeEvent::PasswordSaveRequested]);
            return Err(CoreError::MissingCredentials);
        };
        let backend = backend.ok_or(CoreError::NoBackend)?;
        let tree = self.with_tree(Tree::clone)?;
        Ok((tree, key, backend))
    }

    fn after_save(&self, key: &CompositeKey, bytes: usize) {
        *self.verifier.lock() = Some(Verifier::new(key));
        info!(bytes, "document saved");
    }

    /// Discards in-memory changes and reloads from the backend with the
    /// current credentials.
    ///
    /// Clears the undo history and emits [`ChangeEvent::DocumentReverted`].
    ///
    /// # Errors
    ///
    /// Fails without a backend or credentials, or if the file no longer
    /// decodes; the in-memory tree is kept in that case.
    pub fn revert(&self) -> CoreResult<()> {
        let _token = self.guard.enter()?;
        self.ensure_unlocked()?;
        let backend = self.backend.lock().clone().ok_or(CoreError::NoBackend)?;
        let key = self.key.lock().clone().ok_or(CoreError::MissingCredentials)?;
        let bytes = backend.lock().read_all()?;
        let tree = passdb_codec::decode(&bytes, &key)?;
        *self.tree.write() = Some(tree);
        self.history.lock().clear();
        info!("document reverted");
        self.listeners.emit(&[
            ChangeEvent::DocumentReverted,
            ChangeEvent::HistoryChanged {
                can_undo: false,
                can_redo: false,
            },
        ]);
        Ok(())
    }

    /// Asks observers to collect credentials so the document can be saved.
    pub fn request_password_save(&self) {
        self.listeners.emit(&[ChangeEvent::PasswordSaveRequested]);
    }

    /// Renders the tree as plain-text XML.
    ///
    /// # Errors
    ///
    /// Fails unless the document is unlocked.
    pub fn export_xml(&self) -> CoreResult<String> {
        Ok(self.with_tree(passdb_codec::export_xml)??)
    }

    /// Writes the plain-text XML export to `path`, replacing it atomically.
    ///
    /// # Errors
    ///
    /// Fails unless the document is unlocked, or if the file cannot be
    /// written.
    pub fn export_xml_to(&self, path: &Path) -> CoreResult<()> {
        let xml = self.export_xml()?;
        FileBackend::new(path).replace(xml.as_bytes())?;
        info!(path = %path.display(), "exported XML");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Registers a callback for every [`ChangeEvent`].
    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.listeners.add(callback)
    }

    /// Unregisters a callback.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Returns a channel receiving every future [`ChangeEvent`].
    pub fn subscribe(&self) -> std::sync::mpsc::Receiver<ChangeEvent> {
        self.listeners.subscribe()
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Runs `f` with shared access to the tree.
    ///
    /// # Errors
    ///
    /// Fails unless the document is unlocked.
    pub fn with_tree<R>(&self, f: impl FnOnce(&Tree) -> R) -> CoreResult<R> {
        self.ensure_unlocked()?;
        let slot = self.tree.read();
        let tree = slot.as_ref().ok_or(CoreError::Closed)?;
        Ok(f(tree))
    }

    /// Returns a copy of the entry with this id.
    pub fn find_entry(&self, id: EntryId) -> CoreResult<Option<Entry>> {
        self.with_tree(|tree| tree.find_entry(id).cloned())
    }

    /// Returns a copy of the group with this id.
    pub fn find_group(&self, id: GroupId) -> CoreResult<Option<Group>> {
        self.with_tree(|tree| tree.find_group(id).cloned())
    }

    /// Id of the root group.
    pub fn root_id(&self) -> CoreResult<GroupId> {
        self.with_tree(Tree::root_id)
    }

    /// Id of the trash group, if there is one.
    pub fn trash_id(&self) -> CoreResult<Option<GroupId>> {
        self.with_tree(Tree::trash)
    }

    /// Id of the template group, if there is one.
    pub fn template_id(&self) -> CoreResult<Option<GroupId>> {
        self.with_tree(Tree::template)
    }

    /// Layout of the loaded database.
    pub fn version(&self) -> CoreResult<DatabaseVersion> {
        self.with_tree(Tree::version)
    }

    /// Returns true if the item is the trash group or lies below it.
    pub fn is_trashed(&self, item: impl Into<Item>) -> CoreResult<bool> {
        let item = item.into();
        self.with_tree(|tree| match item {
            Item::Group(id) => tree.is_group_trashed(id),
            Item::Entry(id) => tree.is_entry_trashed(id),
        })
    }

    /// Returns a copy of the binary a reference points at.
    pub fn find_binary(&self, reference: &BinaryRef) -> CoreResult<Option<Binary>> {
        self.with_tree(|tree| tree.attachments().binary(reference.id).cloned())
    }

    /// The id the next newly stored attachment will receive.
    pub fn next_binary_id(&self) -> CoreResult<BinaryId> {
        self.with_tree(|tree| tree.attachments().next_id())
    }

    /// Writes the content of attachment `index` of `entry` to `path`.
    ///
    /// # Errors
    ///
    /// Fails for an unknown entry or index, or if the file cannot be
    /// written.
    pub fn save_attachment(&self, entry: EntryId, index: usize, path: &Path) -> CoreResult<()> {
        let data = self.with_tree(|tree| -> CoreResult<Vec<u8>> {
            let reference = tree
                .entry(entry)?
                .attachments()
                .get(index)
                .ok_or_else(|| CoreError::not_found(format!("attachment {index} of {entry}")))?;
            let binary = tree
                .attachments()
                .binary(reference.id)
                .ok_or(passdb_model::ModelError::UnknownReference(reference.id))?;
            Ok(binary.data().to_vec())
        })??;
        FileBackend::new(path).replace(&data)?;
        debug!(path = %path.display(), bytes = data.len(), "attachment saved");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Undo
    // ------------------------------------------------------------------

    /// Returns true if there is an action to undo.
    pub fn can_undo(&self) -> bool {
        self.history.lock().can_undo()
    }

    /// Returns true if there is an action to redo.
    pub fn can_redo(&self) -> bool {
        self.history.lock().can_redo()
    }

    /// Label of the action [`undo`](Self::undo) would revert.
    pub fn undo_label(&self) -> Option<String> {
        self.history.lock().undo_label().map(str::to_string)
    }

    /// Label of the action [`redo`](Self::redo) would repeat.
    pub fn redo_label(&self) -> Option<String> {
        self.history.lock().redo_label().map(str::to_string)
    }

    /// Reverts the most recent action.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NothingToUndo`] if the undo stack is empty.
    pub fn undo(&self) -> CoreResult<()> {
        self.travel(true)
    }

    /// Repeats the most recently undone action.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NothingToUndo`] if the redo stack is empty.
    pub fn redo(&self) -> CoreResult<()> {
        self.travel(false)
    }

    fn travel(&self, backwards: bool) -> CoreResult<()> {
        let _token = self.guard.enter()?;
        self.ensure_writable()?;
        let events = {
            let mut slot = self.tree.write();
            let tree = slot.as_mut().ok_or(CoreError::Closed)?;
            let mut history = self.history.lock();
            let action = if backwards {
                history.pop_undo()
            } else {
                history.pop_redo()
            };
            let Some(action) = action else {
                return Err(CoreError::NothingToUndo {
                    action: if backwards { "undo" } else { "redo" },
                });
            };
            match action.batch.clone().apply(tree) {
                Ok((reverse, mut events)) => {
                    debug!(label = %action.label, backwards, "history step");
                    let step = Action::new(action.label, reverse);
                    if backwards {
                        history.push_redo(step);
                    } else {
                        history.push_undo(step);
                    }
                    events.push(history_event(&history));
                    events
                }
                Err(err) => {
                    warn!(label = %action.label, error = %err, "history step failed");
                    if backwards {
                        history.push_undo(action);
                    } else {
                        history.push_redo(action);
                    }
                    return Err(err.into());
                }
            }
        };
        self.listeners.emit(&events);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Creating items
    // ------------------------------------------------------------------

    /// Appends a new group named "New Group" to `parent`.
    pub fn create_group(&self, parent: GroupId) -> CoreResult<GroupId> {
        self.perform("Add Group", |tree| {
            let len = tree.group(parent)?.groups().len();
            let group = Group::new(GroupId::new(), NEW_GROUP_NAME);
            let id = group.id();
            let batch = Batch::from(Operation::InsertGroup {
                parent,
                index: len,
                subtree: GroupSubtree::single(group),
            });
            Ok((batch, id))
        })
    }

    /// Appends a new entry titled "New Entry" with empty standard fields
    /// to `parent`.
    ///
    /// # Errors
    ///
    /// KDB databases cannot hold entries in the root group.
    pub fn create_entry(&self, parent: GroupId) -> CoreResult<EntryId> {
        self.perform("Add Entry", |tree| {
            check_entry_parent(tree, parent)?;
            let len = tree.group(parent)?.entries().len();
            let entry = STANDARD_KEYS
                .iter()
                .fold(Entry::new(EntryId::new()), |entry, key| {
                    let value = if *key == TITLE { NEW_ENTRY_TITLE } else { "" };
                    entry.with_field(StringField::new(*key, value, *key == PASSWORD))
                });
            let id = entry.id();
            let batch = Batch::from(Operation::InsertEntry {
                group: parent,
                index: len,
                entry,
            });
            Ok((batch, id))
        })
    }

    /// Appends an empty custom field with an unused key ("New Field",
    /// "New Field 2", ...). Returns the key.
    ///
    /// # Errors
    ///
    /// KDB databases have no custom fields.
    pub fn create_string_field(&self, entry: EntryId) -> CoreResult<String> {
        self.perform("Add Field", |tree| {
            check_custom_fields(tree)?;
            let current = tree.entry(entry)?;
            let key = (1..)
                .map(|n| {
                    if n == 1 {
                        NEW_FIELD_KEY.to_string()
                    } else {
                        format!("{NEW_FIELD_KEY} {n}")
                    }
                })
                .find(|key| current.field(key).is_none())
                .unwrap_or_else(|| NEW_FIELD_KEY.to_string());
            let batch = touch_entry(
                tree,
                entry,
                Batch::from(Operation::InsertField {
                    entry,
                    index: current.fields().len(),
                    field: StringField::new(key.clone(), "", false),
                }),
            )?;
            Ok((batch, key))
        })
    }

    // ------------------------------------------------------------------
    // String fields
    // ------------------------------------------------------------------

    /// Inserts `field` at `index` (clamped to the end).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Model`] with `DuplicateField` if the key is
    /// taken; KDB databases only accept their standard keys.
    pub fn add_string_field(&self, entry: EntryId, field: StringField, index: usize) -> CoreResult<()> {
        self.perform("Add Field", |tree| {
            if !field.is_standard() {
                check_custom_fields(tree)?;
            }
            let len = tree.entry(entry)?.fields().len();
            let batch = touch_entry(
                tree,
                entry,
                Batch::from(Operation::InsertField {
                    entry,
                    index: index.min(len),
                    field,
                }),
            )?;
            Ok((batch, ()))
        })
    }

    /// Removes the field with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for an unknown key. KDB entries have
    /// a fixed set of fields.
    pub fn remove_string_field(&self, entry: EntryId, key: &str) -> CoreResult<()> {
        self.perform("Remove Field", |tree| {
            check_custom_fields(tree)?;
            let index = field_index(tree, entry, key)?;
            let batch = touch_entry(tree, entry, Batch::from(Operation::RemoveField { entry, index }))?;
            Ok((batch, ()))
        })
    }

    /// Sets the value and protection of the field with `key`, keeping its
    /// position. Does nothing if both are unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for an unknown key.
    pub fn update_string_field(
        &self,
        entry: EntryId,
        key: &str,
        value: &str,
        protected: bool,
    ) -> CoreResult<()> {
        self.perform("Edit Field", |tree| {
            let index = field_index(tree, entry, key)?;
            let current = &tree.entry(entry)?.fields()[index];
            if current.value() == value && current.is_protected() == protected {
                return Ok((Batch::new(), ()));
            }
            let batch = touch_entry(
                tree,
                entry,
                Batch::from(Operation::ReplaceField {
                    entry,
                    index,
                    field: StringField::new(key, value, protected),
                }),
            )?;
            Ok((batch, ()))
        })
    }

    /// Renames the field `key` to `new_key`, keeping value and position.
    ///
    /// # Errors
    ///
    /// Fails if `new_key` is taken or `key` is unknown; KDB fields cannot
    /// be renamed.
    pub fn rename_string_field(&self, entry: EntryId, key: &str, new_key: &str) -> CoreResult<()> {
        self.perform("Rename Field", |tree| {
            check_custom_fields(tree)?;
            let index = field_index(tree, entry, key)?;
            let current = &tree.entry(entry)?.fields()[index];
            let field = StringField::new(new_key, current.value(), current.is_protected());
            let batch = touch_entry(
                tree,
                entry,
                Batch::from(Operation::ReplaceField { entry, index, field }),
            )?;
            Ok((batch, ()))
        })
    }

    // ------------------------------------------------------------------
    // Names and icons
    // ------------------------------------------------------------------

    /// Renames a group.
    pub fn set_group_name(&self, group: GroupId, name: &str) -> CoreResult<()> {
        self.perform("Rename Group", |tree| {
            let batch = touch_group(
                tree,
                group,
                Batch::from(Operation::RenameGroup {
                    group,
                    name: name.to_string(),
                }),
            )?;
            Ok((batch, ()))
        })
    }

    /// Changes a group's icon.
    pub fn set_group_icon(&self, group: GroupId, icon: u32) -> CoreResult<()> {
        self.perform("Change Icon", |tree| {
            let batch = touch_group(tree, group, Batch::from(Operation::SetGroupIcon { group, icon }))?;
            Ok((batch, ()))
        })
    }

    /// Changes an entry's icon.
    pub fn set_entry_icon(&self, entry: EntryId, icon: u32) -> CoreResult<()> {
        self.perform("Change Icon", |tree| {
            let batch = touch_entry(tree, entry, Batch::from(Operation::SetEntryIcon { entry, icon }))?;
            Ok((batch, ()))
        })
    }

    /// Sets or clears an entry's expiry time.
    pub fn set_entry_expiry(
        &self,
        entry: EntryId,
        expiry: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        self.perform("Change Expiry", |tree| {
            let mut times = *tree.entry(entry)?.times();
            times.expiry = expiry.map(|at| Times::at(at).creation);
            let times = times.touched(Utc::now());
            Ok((Batch::from(Operation::SetEntryTimes { entry, times }), ()))
        })
    }

    // ------------------------------------------------------------------
    // Moving
    // ------------------------------------------------------------------

    /// Moves a group to position `index` among the children of `parent`
    /// (clamped to the end).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Model`] with `InvalidReparent` if `parent` is
    /// the group itself or lies below it; the tree is unchanged.
    pub fn move_group(&self, group: GroupId, parent: GroupId, index: usize) -> CoreResult<()> {
        self.perform("Move Group", |tree| {
            let current = tree.group(group)?;
            let len = tree.group(parent)?.groups().len()
                - usize::from(current.parent() == Some(parent));
            let batch = Batch::from(Operation::MoveGroup {
                group,
                parent,
                index: index.min(len),
            });
            Ok((batch, ()))
        })
    }

    /// Moves an entry to position `index` of `group` (clamped to the end).
    ///
    /// # Errors
    ///
    /// KDB databases cannot hold entries in the root group.
    pub fn move_entry(&self, entry: EntryId, group: GroupId, index: usize) -> CoreResult<()> {
        self.perform("Move Entry", |tree| {
            check_entry_parent(tree, group)?;
            let current = tree.entry(entry)?;
            let len = tree.group(group)?.entries().len() - usize::from(current.group() == group);
            let batch = Batch::from(Operation::MoveEntry {
                entry,
                group,
                index: index.min(len),
            });
            Ok((batch, ()))
        })
    }

    // ------------------------------------------------------------------
    // Deleting
    // ------------------------------------------------------------------

    /// Deletes a group.
    ///
    /// - Outside the trash: moves the group to the end of the trash,
    ///   creating the trash first if the database has none.
    /// - Inside the trash, for the trash itself, when the trash is
    ///   disabled, or when the group contains the trash: removes the group
    ///   and its subtree.
    ///
    /// Both are undoable.
    pub fn delete_group(&self, group: GroupId) -> CoreResult<()> {
        self.perform("Delete Group", |tree| {
            if group == tree.root_id() {
                return Err(passdb_model::ModelError::RootImmutable.into());
            }
            tree.group(group)?;
            let contains_trash = tree.trash().is_some_and(|t| tree.is_ancestor(group, t));
            if tree.is_group_trashed(group) || !tree.meta().recycle_bin_enabled || contains_trash {
                debug!(%group, "deleting group permanently");
                return Ok((Batch::from(Operation::DetachGroup { group }), ()));
            }
            let mut batch = Batch::new();
            let (trash, len) = self.ensure_trash(tree, &mut batch);
            batch.push(Operation::MoveGroup {
                group,
                parent: trash,
                index: len.groups,
            });
            Ok((batch, ()))
        })
    }

    /// Deletes an entry.
    ///
    /// - Outside the trash: moves the entry to the end of the trash,
    ///   creating the trash first if the database has none.
    /// - Inside the trash or with the trash disabled: removes the entry.
    ///
    /// Both are undoable.
    pub fn delete_entry(&self, entry: EntryId) -> CoreResult<()> {
        self.perform("Delete Entry", |tree| {
            tree.entry(entry)?;
            if tree.is_entry_trashed(entry) || !tree.meta().recycle_bin_enabled {
                debug!(%entry, "deleting entry permanently");
                return Ok((Batch::from(Operation::DetachEntry { entry }), ()));
            }
            let mut batch = Batch::new();
            let (trash, len) = self.ensure_trash(tree, &mut batch);
            batch.push(Operation::MoveEntry {
                entry,
                group: trash,
                index: len.entries,
            });
            Ok((batch, ()))
        })
    }

    /// Returns the trash id, queueing its creation in `batch` if missing,
    /// together with its current child counts.
    fn ensure_trash(&self, tree: &Tree, batch: &mut Batch) -> (GroupId, ChildCounts) {
        if let Some(trash) = tree.trash().and_then(|id| tree.find_group(id)) {
            return (
                trash.id(),
                ChildCounts {
                    groups: trash.groups().len(),
                    entries: trash.entries().len(),
                },
            );
        }
        let group = trash_group(tree.version(), &self.config);
        let id = group.id();
        info!(name = group.name(), "creating trash group");
        batch.push(Operation::InsertGroup {
            parent: tree.root_id(),
            index: tree.root().groups().len(),
            subtree: GroupSubtree::single(group),
        });
        batch.push(Operation::SetRole {
            role: Role::Trash,
            group: Some(id),
        });
        (id, ChildCounts::default())
    }

    /// Permanently removes everything in the trash and releases the
    /// binaries only the removed entries referenced.
    ///
    /// This cannot be undone: the undo history is cleared so nothing
    /// removed here can come back through it.
    pub fn empty_trash(&self) -> CoreResult<()> {
        let _token = self.guard.enter()?;
        self.ensure_writable()?;
        let events = {
            let mut slot = self.tree.write();
            let tree = slot.as_mut().ok_or(CoreError::Closed)?;
            let Some(trash) = tree.trash().and_then(|id| tree.find_group(id)) else {
                debug!("no trash to empty");
                return Ok(());
            };
            let groups = trash.groups().to_vec();
            let entries = trash.entries().to_vec();

            let mut batch = Batch::new();
            for group in &groups {
                batch.push(Operation::DetachGroup { group: *group });
            }
            for entry in &entries {
                batch.push(Operation::DetachEntry { entry: *entry });
            }
            let (inverse, _) = batch.apply(tree)?;
            let report = match tree.release_unreferenced() {
                Ok(report) => report,
                Err(err) => {
                    if let Err(rollback) = inverse.apply(tree) {
                        warn!(error = %rollback, "rollback after failed release failed");
                    }
                    return Err(err.into());
                }
            };

            let mut history = self.history.lock();
            history.clear();
            info!(
                groups = groups.len(),
                entries = entries.len(),
                released = report.released,
                "trash emptied"
            );
            vec![
                ChangeEvent::TrashEmptied {
                    groups: groups.len(),
                    entries: entries.len(),
                    released: report.released,
                },
                history_event(&history),
            ]
        };
        self.listeners.emit(&events);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Roles
    // ------------------------------------------------------------------

    /// Makes `group` the trash, demoting the previous trash group.
    ///
    /// # Errors
    ///
    /// KDB databases always use their top-level "Backup" group.
    pub fn use_group_as_trash(&self, group: GroupId) -> CoreResult<()> {
        self.perform("Change Trash", |tree| {
            if tree.version() == DatabaseVersion::V3 {
                return Err(CoreError::unsupported("choosing the trash group", DatabaseVersion::V3));
            }
            tree.group(group)?;
            Ok((
                Batch::from(Operation::SetRole {
                    role: Role::Trash,
                    group: Some(group),
                }),
                (),
            ))
        })
    }

    /// Makes `group` the template group, demoting the previous one.
    ///
    /// # Errors
    ///
    /// KDB databases have no templates.
    pub fn use_group_as_template(&self, group: GroupId) -> CoreResult<()> {
        self.perform("Change Templates", |tree| {
            if !tree.version().supports_templates() {
                return Err(CoreError::unsupported("entry templates", tree.version()));
            }
            tree.group(group)?;
            Ok((
                Batch::from(Operation::SetRole {
                    role: Role::Template,
                    group: Some(group),
                }),
                (),
            ))
        })
    }

    // ------------------------------------------------------------------
    // Attachments
    // ------------------------------------------------------------------

    /// Attaches `data` to `entry` under `filename`.
    ///
    /// Content identical to a stored binary reuses it. Returns the binary
    /// id the new reference points at.
    ///
    /// # Errors
    ///
    /// KDB entries hold at most one attachment.
    pub fn add_attachment(&self, entry: EntryId, filename: &str, data: Vec<u8>) -> CoreResult<BinaryId> {
        self.perform("Add Attachment", |tree| {
            let current = tree.entry(entry)?;
            if let Some(limit) = tree.version().attachment_limit() {
                if current.attachments().len() >= limit {
                    return Err(CoreError::unsupported(
                        format!("more than {limit} attachment per entry"),
                        tree.version(),
                    ));
                }
            }
            let mut batch = Batch::new();
            let id = match tree.attachments().find(&data) {
                Some(existing) => existing,
                None => {
                    let id = tree.attachments().next_id();
                    batch.push(Operation::InsertBinary {
                        id,
                        binary: Binary::new(data, true),
                    });
                    id
                }
            };
            batch.push(Operation::InsertAttachment {
                entry,
                index: current.attachments().len(),
                reference: BinaryRef::new(filename, id),
            });
            Ok((touch_entry(tree, entry, batch)?, id))
        })
    }

    /// Reads `path` and attaches it under its file name.
    ///
    /// # Errors
    ///
    /// As [`add_attachment`](Self::add_attachment), plus storage errors.
    pub fn add_attachment_file(&self, entry: EntryId, path: &Path) -> CoreResult<BinaryId> {
        let data = FileBackend::open_read_only(path).read_all()?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        self.add_attachment(entry, &filename, data)
    }

    /// Removes attachment reference `index` from `entry`.
    ///
    /// The binary stays stored until the trash is emptied or attachments
    /// are compacted.
    pub fn remove_attachment(&self, entry: EntryId, index: usize) -> CoreResult<()> {
        self.perform("Remove Attachment", |tree| {
            let batch = touch_entry(tree, entry, Batch::from(Operation::RemoveAttachment { entry, index }))?;
            Ok((batch, ()))
        })
    }

    /// Removes every attachment reference from `entry`.
    pub fn remove_all_attachments(&self, entry: EntryId) -> CoreResult<()> {
        self.perform("Remove Attachments", |tree| {
            let len = tree.entry(entry)?.attachments().len();
            let mut batch = Batch::new();
            for index in (0..len).rev() {
                batch.push(Operation::RemoveAttachment { entry, index });
            }
            if batch.is_empty() {
                return Ok((batch, ()));
            }
            Ok((touch_entry(tree, entry, batch)?, ()))
        })
    }

    /// Drops every binary no entry references and renumbers the rest.
    ///
    /// Rewrites binary ids, so the undo history is cleared.
    pub fn compact_attachments(&self) -> CoreResult<usize> {
        let _token = self.guard.enter()?;
        self.ensure_writable()?;
        let (released, events) = {
            let mut slot = self.tree.write();
            let tree = slot.as_mut().ok_or(CoreError::Closed)?;
            let report = tree.release_unreferenced()?;
            let mut history = self.history.lock();
            history.clear();
            info!(released = report.released, "attachments compacted");
            (
                report.released,
                vec![
                    ChangeEvent::AttachmentsCompacted {
                        released: report.released,
                    },
                    history_event(&history),
                ],
            )
        };
        self.listeners.emit(&events);
        Ok(released)
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    /// Builds a batch against the current tree, applies it and records its
    /// inverse under `label`.
    ///
    /// `build` only reads; all validation happens before anything changes.
    /// An empty batch is a no-op and is not recorded.
    fn perform<T>(
        &self,
        label: &str,
        build: impl FnOnce(&Tree) -> CoreResult<(Batch, T)>,
    ) -> CoreResult<T> {
        let _token = self.guard.enter()?;
        self.ensure_writable()?;
        let (value, events) = {
            let mut slot = self.tree.write();
            let tree = slot.as_mut().ok_or(CoreError::Closed)?;
            let (batch, value) = build(tree)?;
            if batch.is_empty() {
                return Ok(value);
            }
            let (inverse, mut events) = batch.apply(tree)?;
            let mut history = self.history.lock();
            history.record(Action::new(label, inverse));
            events.push(history_event(&history));
            debug!(label, events = events.len(), "action committed");
            (value, events)
        };
        self.listeners.emit(&events);
        Ok(value)
    }

    fn ensure_unlocked(&self) -> CoreResult<()> {
        match self.state() {
            DocumentState::Unlocked => Ok(()),
            DocumentState::Locked => Err(CoreError::Locked),
            DocumentState::Closed => Err(CoreError::Closed),
            DocumentState::Decrypting => Err(CoreError::Busy),
        }
    }

    fn ensure_writable(&self) -> CoreResult<()> {
        self.ensure_unlocked()?;
        if self.is_read_only() {
            return Err(CoreError::ReadOnly);
        }
        Ok(())
    }

    /// Layout of the loaded tree regardless of the lock.
    fn version_unchecked(&self) -> CoreResult<DatabaseVersion> {
        self.tree
            .read()
            .as_ref()
            .map(Tree::version)
            .ok_or(CoreError::Closed)
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("state", &self.state())
            .field("has_password_or_key", &self.has_password_or_key())
            .field("read_only", &self.config.read_only)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ChildCounts {
    groups: usize,
    entries: usize,
}

/// Reads the backend and decodes it with `credentials`.
fn load(backend: &SharedBackend, credentials: &Credentials) -> CoreResult<(Tree, CompositeKey)> {
    let bytes = {
        let backend = backend.lock();
        debug!(backend = %backend.describe(), "reading database");
        backend.read_all()?
    };
    let version = passdb_codec::detect_version(&bytes)?;
    let key = credentials.composite_key(version)?;
    let tree = passdb_codec::decode(&bytes, &key)?;
    Ok((tree, key))
}

/// A fresh trash group in the layout's convention.
fn trash_group(version: DatabaseVersion, config: &Config) -> Group {
    match version {
        DatabaseVersion::V3 => Group::new(GroupId::new(), kdb::BACKUP_GROUP).with_icon(BACKUP_ICON),
        DatabaseVersion::V4 => Group::new(GroupId::new(), config.trash_name.as_str()).with_icon(TRASH_ICON),
    }
}

fn history_event(history: &UndoHistory) -> ChangeEvent {
    ChangeEvent::HistoryChanged {
        can_undo: history.can_undo(),
        can_redo: history.can_redo(),
    }
}

/// Appends an update of the entry's modification time to `batch`.
fn touch_entry(tree: &Tree, entry: EntryId, mut batch: Batch) -> CoreResult<Batch> {
    let times = tree.entry(entry)?.times().touched(Utc::now());
    batch.push(Operation::SetEntryTimes { entry, times });
    Ok(batch)
}

/// Appends an update of the group's modification time to `batch`.
fn touch_group(tree: &Tree, group: GroupId, mut batch: Batch) -> CoreResult<Batch> {
    let times = tree.group(group)?.times().touched(Utc::now());
    batch.push(Operation::SetGroupTimes { group, times });
    Ok(batch)
}

fn field_index(tree: &Tree, entry: EntryId, key: &str) -> CoreResult<usize> {
    tree.entry(entry)?
        .field_index(key)
        .ok_or_else(|| CoreError::not_found(format!("field {key:?} of {entry}")))
}

fn check_custom_fields(tree: &Tree) -> CoreResult<()> {
    if tree.version().supports_custom_fields() {
        Ok(())
    } else {
        Err(CoreError::unsupported("custom string fields", tree.version()))
    }
}

fn check_entry_parent(tree: &Tree, group: GroupId) -> CoreResult<()> {
    tree.group(group)?;
    if tree.version() == DatabaseVersion::V3 && group == tree.root_id() {
        return Err(CoreError::unsupported("entries in the root group", DatabaseVersion::V3));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use passdb_codec::CodecError;
    use passdb_model::ModelError;
    use passdb_storage::InMemoryBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> Config {
        Config::new().transform_rounds(16)
    }

    fn doc() -> Document {
        Document::new(config())
    }

    fn work_and_email(doc: &Document) -> (GroupId, EntryId) {
        let work = doc.create_group(doc.root_id().unwrap()).unwrap();
        doc.set_group_name(work, "Work").unwrap();
        let email = doc.create_entry(work).unwrap();
        doc.update_string_field(email, TITLE, "Email", false).unwrap();
        doc.update_string_field(email, PASSWORD, "x", true).unwrap();
        (work, email)
    }

    #[test]
    fn new_document_has_root_and_trash() {
        let doc = doc();
        assert_eq!(doc.state(), DocumentState::Unlocked);
        let trash = doc.trash_id().unwrap().unwrap();
        let group = doc.find_group(trash).unwrap().unwrap();
        assert_eq!(group.name(), crate::config::DEFAULT_TRASH_NAME);
        assert_eq!(group.icon(), TRASH_ICON);
        assert!(!doc.can_undo());
        assert!(!doc.has_password_or_key());
    }

    #[test]
    fn created_entry_has_standard_fields() {
        let doc = doc();
        let (_, email) = work_and_email(&doc);
        let entry = doc.find_entry(email).unwrap().unwrap();
        let keys: Vec<&str> = entry.fields().iter().map(StringField::key).collect();
        assert_eq!(keys, STANDARD_KEYS);
        assert_eq!(entry.title(), "Email");
        assert!(entry.field(PASSWORD).unwrap().is_protected());
    }

    #[test]
    fn save_and_reopen_with_password() {
        let doc = doc();
        let (work, email) = work_and_email(&doc);
        let storage = InMemoryBackend::new();
        doc.set_credentials(&Credentials::password("pw")).unwrap();
        doc.save_to(Box::new(storage.clone())).unwrap();

        let reopened = Document::closed(config());
        reopened
            .open(Box::new(storage.clone()), &Credentials::password("pw"))
            .unwrap();
        let entry = reopened.find_entry(email).unwrap().unwrap();
        assert_eq!(entry.group(), work);
        assert_eq!(entry.value(PASSWORD), "x");
        assert_eq!(reopened.find_group(work).unwrap().unwrap().name(), "Work");

        let rejected = Document::closed(config());
        let err = rejected
            .open(Box::new(storage), &Credentials::password("nope"))
            .unwrap_err();
        assert!(err.is_wrong_credentials());
        assert_eq!(rejected.state(), DocumentState::Closed);
    }

    #[test]
    fn save_without_credentials_requests_password() {
        let doc = doc();
        let events = doc.subscribe();
        let err = doc.save_to(Box::new(InMemoryBackend::new())).unwrap_err();
        assert!(matches!(err, CoreError::MissingCredentials));
        assert_eq!(events.try_recv().unwrap(), ChangeEvent::PasswordSaveRequested);
    }

    #[test]
    fn failed_save_keeps_previous_content() {
        let doc = doc();
        let storage = InMemoryBackend::new();
        doc.set_credentials(&Credentials::password("pw")).unwrap();
        doc.save_to(Box::new(storage.clone())).unwrap();
        let saved = storage.data().unwrap();

        doc.save_to(Box::new(storage.read_only())).unwrap_err();
        assert_eq!(storage.data().unwrap(), saved);
    }

    #[test]
    fn failed_save_to_keeps_previous_location() {
        let doc = doc();
        let storage = InMemoryBackend::new();
        doc.set_credentials(&Credentials::password("pw")).unwrap();
        doc.save_to(Box::new(storage.clone())).unwrap();

        let err = doc.save_to(Box::new(storage.read_only())).unwrap_err();
        assert!(matches!(err, CoreError::ReadOnly));
        assert!(!doc.is_read_only());

        let root = doc.root_id().unwrap();
        let group = doc.create_group(root).unwrap();
        doc.set_group_name(group, "After").unwrap();
        doc.save().unwrap();

        let reopened = Document::closed(config());
        reopened
            .open(Box::new(storage), &Credentials::password("pw"))
            .unwrap();
        assert_eq!(reopened.find_group(group).unwrap().unwrap().name(), "After");
    }

    /// Blocks `read_all` until the test lets it through.
    struct GatedBackend {
        inner: InMemoryBackend,
        gate: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl StorageBackend for GatedBackend {
        fn read_all(&self) -> passdb_storage::StorageResult<Vec<u8>> {
            self.gate.lock().recv().ok();
            self.inner.read_all()
        }

        fn replace(&mut self, data: &[u8]) -> passdb_storage::StorageResult<()> {
            self.inner.replace(data)
        }

        fn exists(&self) -> passdb_storage::StorageResult<bool> {
            self.inner.exists()
        }

        fn size(&self) -> passdb_storage::StorageResult<u64> {
            self.inner.size()
        }

        fn describe(&self) -> String {
            "gated".to_string()
        }
    }

    #[test]
    fn decrypting_document_cannot_be_closed_or_reopened() {
        let storage = InMemoryBackend::new();
        let original = doc();
        original.set_credentials(&Credentials::password("pw")).unwrap();
        original.save_to(Box::new(storage.clone())).unwrap();

        let (release, gate) = std::sync::mpsc::channel();
        let doc = Arc::new(Document::closed(config()));
        let task = doc
            .open_in_background(
                Box::new(GatedBackend {
                    inner: storage.clone(),
                    gate: Mutex::new(gate),
                }),
                Credentials::password("pw"),
            )
            .unwrap();
        assert_eq!(doc.state(), DocumentState::Decrypting);
        assert!(matches!(doc.close(), Err(CoreError::Busy)));
        assert!(matches!(
            doc.open(Box::new(storage), &Credentials::password("pw")),
            Err(CoreError::Busy)
        ));
        assert_eq!(doc.state(), DocumentState::Decrypting);

        release.send(()).unwrap();
        task.wait().unwrap();
        assert_eq!(doc.state(), DocumentState::Unlocked);
        doc.close().unwrap();
        assert_eq!(doc.state(), DocumentState::Closed);
        assert!(doc.root_id().is_err());
    }

    #[test]
    fn superseded_open_result_is_discarded() {
        let doc = Document::closed(config());
        let tree = Tree::new(DatabaseVersion::V4, kdb::ROOT_NAME);
        let key = Credentials::password("pw")
            .composite_key(DatabaseVersion::V4)
            .unwrap();
        let boxed: Box<dyn StorageBackend> = Box::new(InMemoryBackend::new());
        let backend: SharedBackend = Arc::new(Mutex::new(boxed));

        let err = doc.install_decrypted(tree, key, backend).unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
        assert_eq!(doc.state(), DocumentState::Closed);
        assert!(!doc.has_password_or_key());
    }

    #[test]
    fn delete_moves_to_trash_then_removes() {
        let doc = doc();
        let (_, email) = work_and_email(&doc);
        let trash = doc.trash_id().unwrap().unwrap();

        doc.delete_entry(email).unwrap();
        assert_eq!(doc.find_entry(email).unwrap().unwrap().group(), trash);
        assert!(doc.is_trashed(email).unwrap());

        doc.delete_entry(email).unwrap();
        assert!(doc.find_entry(email).unwrap().is_none());

        doc.undo().unwrap();
        assert_eq!(doc.find_entry(email).unwrap().unwrap().group(), trash);
    }

    #[test]
    fn delete_creates_missing_trash_in_one_action() {
        let doc = doc();
        let (work, email) = work_and_email(&doc);
        let trash = doc.trash_id().unwrap().unwrap();
        doc.delete_group(trash).unwrap();
        assert_eq!(doc.trash_id().unwrap(), None);

        doc.delete_entry(email).unwrap();
        let new_trash = doc.trash_id().unwrap().unwrap();
        assert_ne!(new_trash, trash);
        assert!(doc.is_trashed(email).unwrap());

        doc.undo().unwrap();
        assert_eq!(doc.trash_id().unwrap(), None);
        assert_eq!(doc.find_entry(email).unwrap().unwrap().group(), work);
    }

    #[test]
    fn disabled_trash_deletes_permanently() {
        let mut tree = Tree::new(DatabaseVersion::V4, "Root");
        tree.meta_mut().recycle_bin_enabled = false;
        let group = tree.add_group(tree.root_id(), Group::new(GroupId::new(), "G")).unwrap();
        let doc = Document::from_tree(tree, config());
        doc.delete_group(group).unwrap();
        assert!(doc.find_group(group).unwrap().is_none());
        assert_eq!(doc.trash_id().unwrap(), None);
    }

    #[test]
    fn empty_trash_cannot_be_undone() {
        let doc = doc();
        let (_, email) = work_and_email(&doc);
        doc.add_attachment(email, "a.txt", b"payload".to_vec()).unwrap();
        doc.delete_entry(email).unwrap();

        let events = doc.subscribe();
        doc.empty_trash().unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            ChangeEvent::TrashEmptied {
                groups: 0,
                entries: 1,
                released: 1
            }
        );
        assert!(!doc.can_undo());
        assert!(matches!(doc.undo(), Err(CoreError::NothingToUndo { .. })));
        assert!(doc.find_entry(email).unwrap().is_none());
        assert_eq!(doc.with_tree(|t| t.attachments().len()).unwrap(), 0);
    }

    #[test]
    fn move_group_under_descendant_fails_without_change() {
        let doc = doc();
        let (work, _) = work_and_email(&doc);
        let inner = doc.create_group(work).unwrap();
        let before = doc.with_tree(Tree::clone).unwrap();
        let err = doc.move_group(work, inner, 0).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Model(ModelError::InvalidReparent { .. })
        ));
        assert_eq!(doc.with_tree(Tree::clone).unwrap(), before);
    }

    #[test]
    fn undo_redo_field_edit() {
        let doc = doc();
        let (_, email) = work_and_email(&doc);
        doc.update_string_field(email, PASSWORD, "y", true).unwrap();
        assert_eq!(doc.undo_label().as_deref(), Some("Edit Field"));
        doc.undo().unwrap();
        assert_eq!(doc.find_entry(email).unwrap().unwrap().value(PASSWORD), "x");
        assert!(doc.can_redo());
        doc.redo().unwrap();
        assert_eq!(doc.find_entry(email).unwrap().unwrap().value(PASSWORD), "y");
    }

    #[test]
    fn unchanged_field_is_not_recorded() {
        let doc = doc();
        let (_, email) = work_and_email(&doc);
        let depth = doc.history.lock().undo_len();
        doc.update_string_field(email, PASSWORD, "x", true).unwrap();
        assert_eq!(doc.history.lock().undo_len(), depth);
    }

    #[test]
    fn new_fields_get_unique_keys() {
        let doc = doc();
        let (_, email) = work_and_email(&doc);
        assert_eq!(doc.create_string_field(email).unwrap(), "New Field");
        assert_eq!(doc.create_string_field(email).unwrap(), "New Field 2");
        doc.rename_string_field(email, "New Field", "Pin").unwrap();
        assert_eq!(doc.create_string_field(email).unwrap(), "New Field");
        doc.remove_string_field(email, "Pin").unwrap();
        let entry = doc.find_entry(email).unwrap().unwrap();
        assert!(entry.field("Pin").is_none());
        assert!(entry.field("New Field 2").is_some());
    }

    #[test]
    fn listener_cannot_mutate_reentrantly() {
        let doc = Arc::new(doc());
        let root = doc.root_id().unwrap();
        let failures = Arc::new(AtomicUsize::new(0));
        let (inner, count) = (Arc::downgrade(&doc), failures.clone());
        doc.add_listener(move |event| {
            if matches!(event, ChangeEvent::GroupAdded { .. }) {
                if let Some(doc) = inner.upgrade() {
                    if matches!(doc.create_group(root), Err(CoreError::ConcurrentMutation)) {
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                    // Reads are fine.
                    assert!(doc.root_id().is_ok());
                }
            }
        });
        doc.create_group(root).unwrap();
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(doc.find_group(root).unwrap().unwrap().groups().len(), 2);
    }

    #[test]
    fn lock_and_unlock() {
        let doc = doc();
        assert!(matches!(doc.lock(), Err(CoreError::MissingCredentials)));
        doc.set_credentials(&Credentials::password("pw")).unwrap();
        doc.lock().unwrap();
        assert!(doc.is_locked());
        assert!(doc.is_decrypted());
        assert!(matches!(doc.root_id(), Err(CoreError::Locked)));

        assert!(!doc.unlock(&Credentials::password("wrong")).unwrap());
        assert!(!doc.unlock(&Credentials::new()).unwrap());
        assert!(doc.is_locked());
        assert!(doc.unlock(&Credentials::password("pw")).unwrap());
        assert!(!doc.is_locked());
    }

    #[test]
    fn read_only_blocks_mutations() {
        let doc = Document::new(config().read_only(true));
        assert!(doc.is_read_only());
        let root = doc.root_id().unwrap();
        assert!(matches!(doc.create_group(root), Err(CoreError::ReadOnly)));
    }

    #[test]
    fn v3_restrictions() {
        let doc = Document::new(config().version(DatabaseVersion::V3));
        let root = doc.root_id().unwrap();
        let trash = doc.trash_id().unwrap().unwrap();
        assert_eq!(doc.find_group(trash).unwrap().unwrap().name(), kdb::BACKUP_GROUP);
        assert!(matches!(
            doc.create_entry(root),
            Err(CoreError::UnsupportedByVersion { .. })
        ));
        let group = doc.create_group(root).unwrap();
        let entry = doc.create_entry(group).unwrap();
        assert!(matches!(
            doc.create_string_field(entry),
            Err(CoreError::UnsupportedByVersion { .. })
        ));
        assert!(matches!(
            doc.use_group_as_template(group),
            Err(CoreError::UnsupportedByVersion { .. })
        ));
        doc.add_attachment(entry, "a", vec![1]).unwrap();
        assert!(matches!(
            doc.add_attachment(entry, "b", vec![2]),
            Err(CoreError::UnsupportedByVersion { .. })
        ));
    }

    #[test]
    fn identical_attachments_share_a_binary() {
        let doc = doc();
        let (work, email) = work_and_email(&doc);
        let other = doc.create_entry(work).unwrap();
        let a = doc.add_attachment(email, "a.txt", b"same".to_vec()).unwrap();
        let b = doc.add_attachment(other, "b.txt", b"same".to_vec()).unwrap();
        assert_eq!(a, b);
        assert_eq!(doc.with_tree(|t| t.attachments().len()).unwrap(), 1);

        doc.remove_all_attachments(email).unwrap();
        doc.remove_all_attachments(other).unwrap();
        assert_eq!(doc.compact_attachments().unwrap(), 1);
        assert!(!doc.can_undo());
    }

    #[test]
    fn background_save_and_open() {
        let doc = Arc::new(doc());
        let (_, email) = work_and_email(&doc);
        let storage = InMemoryBackend::new();
        doc.set_credentials(&Credentials::password("pw")).unwrap();
        doc.save_to(Box::new(storage.clone())).unwrap();
        doc.update_string_field(email, PASSWORD, "changed", true).unwrap();
        doc.save_in_background().unwrap().wait().unwrap();

        let reopened = Arc::new(Document::closed(config()));
        let task = reopened
            .open_in_background(Box::new(storage), Credentials::password("pw"))
            .unwrap();
        task.wait().unwrap();
        assert_eq!(
            reopened.find_entry(email).unwrap().unwrap().value(PASSWORD),
            "changed"
        );
    }

    #[test]
    fn revert_discards_changes() {
        let doc = doc();
        let (work, _) = work_and_email(&doc);
        doc.set_credentials(&Credentials::password("pw")).unwrap();
        doc.save_to(Box::new(InMemoryBackend::new())).unwrap();
        doc.set_group_name(work, "Changed").unwrap();
        doc.revert().unwrap();
        assert_eq!(doc.find_group(work).unwrap().unwrap().name(), "Work");
        assert!(!doc.can_undo());
    }

    #[test]
    fn open_rejects_garbage() {
        let doc = Document::closed(config());
        let err = doc
            .open(
                Box::new(InMemoryBackend::with_data(b"not a database".to_vec())),
                &Credentials::password("pw"),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Codec(CodecError::Unsupported { .. })
            | CoreError::Codec(CodecError::CorruptDatabase { .. })));
        assert_eq!(doc.state(), DocumentState::Closed);
    }
}
