//! Linear undo/redo history.

use crate::operation::Batch;

/// A committed action as stored in the history.
///
/// `batch` is what has to be applied to travel back over the action: the
/// inverse while the action sits on the undo stack, the original
/// operations while it sits on the redo stack.
#[derive(Debug, Clone)]
pub struct Action {
    /// Human-readable name, e.g. "Delete Entry".
    pub label: String,
    /// Operations that reverse the action.
    pub batch: Batch,
}

impl Action {
    /// Creates an action.
    pub fn new(label: impl Into<String>, batch: Batch) -> Self {
        Self {
            label: label.into(),
            batch,
        }
    }
}

/// Undo and redo stacks with an optional depth limit.
///
/// - Recording a new action clears the redo stack.
/// - With a limit, the oldest undo action is forgotten once the stack is
///   full.
#[derive(Debug, Default)]
pub struct UndoHistory {
    undo: Vec<Action>,
    redo: Vec<Action>,
    depth: usize,
}

impl UndoHistory {
    /// Creates a history keeping at most `depth` undo actions (0 = unlimited).
    #[must_use]
    pub fn new(depth: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            depth,
        }
    }

    /// Records a freshly performed action.
    pub fn record(&mut self, action: Action) {
        self.redo.clear();
        self.push_undo(action);
    }

    /// Takes the most recent undo action.
    pub fn pop_undo(&mut self) -> Option<Action> {
        self.undo.pop()
    }

    /// Takes the most recent redo action.
    pub fn pop_redo(&mut self) -> Option<Action> {
        self.redo.pop()
    }

    /// Pushes an action that can be undone, keeping the redo stack.
    pub fn push_undo(&mut self, action: Action) {
        self.undo.push(action);
        if self.depth > 0 && self.undo.len() > self.depth {
            self.undo.remove(0);
        }
    }

    /// Pushes an action that can be redone.
    pub fn push_redo(&mut self, action: Action) {
        self.redo.push(action);
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Returns true if there is something to undo.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    /// Returns true if there is something to redo.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Label of the action `undo` would revert.
    #[must_use]
    pub fn undo_label(&self) -> Option<&str> {
        self.undo.last().map(|a| a.label.as_str())
    }

    /// Label of the action `redo` would repeat.
    #[must_use]
    pub fn redo_label(&self) -> Option<&str> {
        self.redo.last().map(|a| a.label.as_str())
    }

    /// Number of undoable actions.
    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(label: &str) -> Action {
        Action::new(label, Batch::new())
    }

    #[test]
    fn lifo_order() {
        let mut history = UndoHistory::new(0);
        history.record(action("a"));
        history.record(action("b"));
        assert_eq!(history.undo_label(), Some("b"));
        assert_eq!(history.pop_undo().unwrap().label, "b");
        assert_eq!(history.pop_undo().unwrap().label, "a");
        assert!(history.pop_undo().is_none());
    }

    #[test]
    fn new_action_truncates_redo() {
        let mut history = UndoHistory::new(0);
        history.record(action("a"));
        let undone = history.pop_undo().unwrap();
        history.push_redo(undone);
        assert_eq!(history.redo_label(), Some("a"));

        history.record(action("b"));
        assert!(!history.can_redo());
        assert_eq!(history.undo_label(), Some("b"));
    }

    #[test]
    fn depth_limit_drops_oldest() {
        let mut history = UndoHistory::new(2);
        for label in ["a", "b", "c"] {
            history.record(action(label));
        }
        assert_eq!(history.undo_len(), 2);
        assert_eq!(history.pop_undo().unwrap().label, "c");
        assert_eq!(history.pop_undo().unwrap().label, "b");
        assert!(!history.can_undo());
    }

    #[test]
    fn clear_empties_both_stacks() {
        let mut history = UndoHistory::new(0);
        history.record(action("a"));
        history.push_redo(action("b"));
        history.clear();
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert_eq!(history.undo_label(), None);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn depth_is_never_exceeded(depth in 1usize..8, pushes in 0usize..32) {
                let mut history = UndoHistory::new(depth);
                for n in 0..pushes {
                    history.record(action(&n.to_string()));
                }
                prop_assert_eq!(history.undo_len(), pushes.min(depth));
                if pushes > 0 {
                    let newest = (pushes - 1).to_string();
                    prop_assert_eq!(history.undo_label(), Some(newest.as_str()));
                }
            }
        }
    }
}
