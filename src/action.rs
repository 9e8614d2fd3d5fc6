//! Undoable actions and the undo history they are recorded in.
//!
//! An [`Action`] is performed once when it is enacted and recorded in the
//! [`UndoStack`]. Actions enacted while an [`UndoScope`] is open are grouped into
//! one undo step, and consecutive scopes sharing a merge group collapse into a
//! single step (dragging a slider records one step, not hundreds).

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::plug::PlugId;

/// A reversible edit.
pub trait Action: Send + Sync + 'static {
    /// The plug this action edits.
    fn subject(&self) -> PlugId;

    /// Perform the edit.
    fn do_action(&self);

    /// Revert the edit.
    fn undo_action(&self);

    /// Returns true if `other`, enacted right after `self`, can be folded into it.
    fn can_merge(&self, _other: &dyn Action) -> bool {
        false
    }

    /// Fold `other` into `self`. Only called when [`can_merge`](Self::can_merge)
    /// returned true.
    fn merge(&mut self, _other: &dyn Action) {}

    /// Get the action as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// One undo step.
struct UndoGroup {
    merge_group: Option<String>,
    actions: Vec<Box<dyn Action>>,
}

impl UndoGroup {
    fn new(merge_group: Option<String>) -> Self {
        Self {
            merge_group,
            actions: Vec::new(),
        }
    }

    fn push(&mut self, action: Box<dyn Action>) {
        if let Some(last) = self.actions.last_mut() {
            if last.can_merge(action.as_ref()) {
                last.merge(action.as_ref());
                return;
            }
        }
        self.actions.push(action);
    }

    fn undo(&self) {
        for action in self.actions.iter().rev() {
            action.undo_action();
        }
    }

    fn redo(&self) {
        for action in &self.actions {
            action.do_action();
        }
    }
}

struct OpenScope {
    depth: usize,
    group: UndoGroup,
}

#[derive(Default)]
struct UndoState {
    done: Vec<UndoGroup>,
    undone: Vec<UndoGroup>,
    open: Option<OpenScope>,
    /// An undo or redo is running its actions outside the lock.
    replaying: bool,
    /// Bumped whenever a new step is recorded or the history is cleared.
    generation: u64,
}

impl UndoState {
    fn record(&mut self, group: UndoGroup) {
        self.done.push(group);
        self.generation += 1;
    }
}

/// Undo and redo history.
///
/// Shared by every thread of a [`Session`](crate::Session). Actions run outside
/// the history lock, so an action may itself read plugs.
#[derive(Default)]
pub struct UndoStack {
    state: Mutex<UndoState>,
}

impl UndoStack {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Perform `action` and record it.
    pub fn enact(&self, action: Box<dyn Action>) {
        action.do_action();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.undone.clear();
        match &mut state.open {
            Some(scope) => {
                scope.group.push(action);
                state.generation += 1;
            }
            None => {
                let mut group = UndoGroup::new(None);
                group.push(action);
                state.record(group);
            }
        }
    }

    /// Revert the most recent undo step.
    ///
    /// Returns false if there is nothing to undo, a scope is still open or
    /// another undo or redo is in progress. A step recorded while the actions
    /// run makes the undone step unreachable, as any new step does.
    pub fn undo(&self) -> bool {
        let (group, generation) = {
            let mut state = self.state.lock();
            if state.open.is_some() || state.replaying {
                return false;
            }
            let Some(group) = state.done.pop() else {
                return false;
            };
            state.replaying = true;
            (group, state.generation)
        };
        group.undo();

        let mut state = self.state.lock();
        state.replaying = false;
        if state.generation == generation {
            state.undone.push(group);
        }
        true
    }

    /// Reapply the most recently undone step.
    ///
    /// Returns false if there is nothing to redo, a scope is still open or
    /// another undo or redo is in progress. Steps recorded while the actions
    /// run stay above the redone step.
    pub fn redo(&self) -> bool {
        let (group, generation, position) = {
            let mut state = self.state.lock();
            if state.open.is_some() || state.replaying {
                return false;
            }
            let Some(group) = state.undone.pop() else {
                return false;
            };
            state.replaying = true;
            (group, state.generation, state.done.len())
        };
        group.redo();

        let mut state = self.state.lock();
        state.replaying = false;
        if state.generation == generation {
            state.done.push(group);
        } else {
            let position = position.min(state.done.len());
            state.done.insert(position, group);
        }
        true
    }

    /// Returns true if [`undo`](Self::undo) would revert something.
    pub fn can_undo(&self) -> bool {
        let state = self.state.lock();
        state.open.is_none() && !state.replaying && !state.done.is_empty()
    }

    /// Returns true if [`redo`](Self::redo) would reapply something.
    pub fn can_redo(&self) -> bool {
        let state = self.state.lock();
        state.open.is_none() && !state.replaying && !state.undone.is_empty()
    }

    /// Number of recorded undo steps.
    pub fn undo_len(&self) -> usize {
        self.state.lock().done.len()
    }

    /// Number of steps available to redo.
    pub fn redo_len(&self) -> usize {
        self.state.lock().undone.len()
    }

    /// Number of actions in the most recent undo step.
    pub fn last_step_len(&self) -> usize {
        self.state
            .lock()
            .done
            .last()
            .map_or(0, |group| group.actions.len())
    }

    /// Forget all history.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.done.clear();
        state.undone.clear();
        state.generation += 1;
    }

    /// Open a scope grouping subsequent actions into one undo step.
    ///
    /// Scopes nest; the merge group of the outermost scope wins. The step is
    /// recorded when the outermost scope is dropped.
    pub fn scope(self: &Arc<Self>, merge_group: Option<&str>) -> UndoScope {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match &mut state.open {
            Some(scope) => scope.depth += 1,
            None => {
                state.open = Some(OpenScope {
                    depth: 1,
                    group: UndoGroup::new(merge_group.map(str::to_string)),
                })
            }
        }
        drop(guard);
        UndoScope {
            stack: self.clone(),
        }
    }

    fn close_scope(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(scope) = state.open.as_mut() else {
            return;
        };
        scope.depth -= 1;
        if scope.depth > 0 {
            return;
        }
        let Some(OpenScope { group, .. }) = state.open.take() else {
            return;
        };
        if group.actions.is_empty() {
            return;
        }

        let merges_with_previous = group.merge_group.as_deref().is_some_and(|name| {
            !name.is_empty()
                && state
                    .done
                    .last()
                    .is_some_and(|last| last.merge_group.as_deref() == Some(name))
        });
        if merges_with_previous {
            if let Some(last) = state.done.last_mut() {
                for action in group.actions {
                    last.push(action);
                }
                state.generation += 1;
                return;
            }
        }
        state.record(group);
    }
}

/// Guard returned by [`UndoStack::scope`]; closes the scope when dropped.
#[must_use = "the undo scope closes as soon as this guard is dropped"]
pub struct UndoScope {
    stack: Arc<UndoStack>,
}

impl Drop for UndoScope {
    fn drop(&mut self) {
        self.stack.close_scope();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::Weak;

    /// Adds `delta` to a shared counter.
    struct Add {
        target: Arc<AtomicI64>,
        delta: i64,
    }

    impl Action for Add {
        fn subject(&self) -> PlugId {
            PlugId(0)
        }

        fn do_action(&self) {
            self.target.fetch_add(self.delta, Ordering::SeqCst);
        }

        fn undo_action(&self) {
            self.target.fetch_sub(self.delta, Ordering::SeqCst);
        }

        fn can_merge(&self, other: &dyn Action) -> bool {
            other.as_any().is::<Add>()
        }

        fn merge(&mut self, other: &dyn Action) {
            if let Some(other) = other.as_any().downcast_ref::<Add>() {
                self.delta += other.delta;
            }
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn add(target: &Arc<AtomicI64>, delta: i64) -> Box<dyn Action> {
        Box::new(Add {
            target: target.clone(),
            delta,
        })
    }

    /// Adds one, and records a `+10` step from inside the next replay once
    /// armed, like an editor applying a change while history is stepping.
    struct Interrupting {
        stack: Weak<UndoStack>,
        target: Arc<AtomicI64>,
        armed: Arc<AtomicBool>,
    }

    impl Interrupting {
        fn interrupt(&self) {
            if self.armed.swap(false, Ordering::SeqCst) {
                if let Some(stack) = self.stack.upgrade() {
                    // Nothing else may replay until this one is done.
                    assert!(!stack.undo());
                    assert!(!stack.redo());
                    stack.enact(add(&self.target, 10));
                }
            }
        }
    }

    impl Action for Interrupting {
        fn subject(&self) -> PlugId {
            PlugId(0)
        }

        fn do_action(&self) {
            self.target.fetch_add(1, Ordering::SeqCst);
            self.interrupt();
        }

        fn undo_action(&self) {
            self.target.fetch_sub(1, Ordering::SeqCst);
            self.interrupt();
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn interrupting(stack: &Arc<UndoStack>, target: &Arc<AtomicI64>) -> Arc<AtomicBool> {
        let armed = Arc::new(AtomicBool::new(false));
        stack.enact(Box::new(Interrupting {
            stack: Arc::downgrade(stack),
            target: target.clone(),
            armed: armed.clone(),
        }));
        armed
    }

    #[test]
    fn test_step_recorded_during_undo_drops_redo() {
        let stack = Arc::new(UndoStack::new());
        let total = Arc::new(AtomicI64::new(0));
        let armed = interrupting(&stack, &total);
        assert_eq!(total.load(Ordering::SeqCst), 1);

        armed.store(true, Ordering::SeqCst);
        assert!(stack.undo());
        assert_eq!(total.load(Ordering::SeqCst), 10);
        assert_eq!(stack.undo_len(), 1);
        assert!(!stack.redo());

        assert!(stack.undo());
        assert_eq!(total.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_step_recorded_during_redo_stays_on_top() {
        let stack = Arc::new(UndoStack::new());
        let total = Arc::new(AtomicI64::new(0));
        let armed = interrupting(&stack, &total);
        assert!(stack.undo());

        armed.store(true, Ordering::SeqCst);
        assert!(stack.redo());
        assert_eq!(total.load(Ordering::SeqCst), 11);
        assert_eq!(stack.undo_len(), 2);
        assert!(!stack.can_redo());

        // The newer step is undone first.
        assert!(stack.undo());
        assert_eq!(total.load(Ordering::SeqCst), 1);
        assert!(stack.undo());
        assert_eq!(total.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_each_enact_is_a_step_outside_scopes() {
        let stack = Arc::new(UndoStack::new());
        let total = Arc::new(AtomicI64::new(0));
        stack.enact(add(&total, 1));
        stack.enact(add(&total, 2));
        assert_eq!(total.load(Ordering::SeqCst), 3);
        assert_eq!(stack.undo_len(), 2);

        assert!(stack.undo());
        assert_eq!(total.load(Ordering::SeqCst), 1);
        assert!(stack.redo());
        assert_eq!(total.load(Ordering::SeqCst), 3);
        assert!(!stack.redo());
    }

    #[test]
    fn test_scope_groups_and_merges() {
        let stack = Arc::new(UndoStack::new());
        let total = Arc::new(AtomicI64::new(0));
        {
            let _scope = stack.scope(None);
            stack.enact(add(&total, 1));
            stack.enact(add(&total, 2));
            // Undo is refused while the scope is open.
            assert!(!stack.undo());
        }
        assert_eq!(stack.undo_len(), 1);
        assert_eq!(stack.last_step_len(), 1);

        assert!(stack.undo());
        assert_eq!(total.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_merge_groups_collapse_steps() {
        let stack = Arc::new(UndoStack::new());
        let total = Arc::new(AtomicI64::new(0));
        for _ in 0..3 {
            let _scope = stack.scope(Some("drag"));
            stack.enact(add(&total, 1));
        }
        {
            let _scope = stack.scope(Some("other"));
            stack.enact(add(&total, 10));
        }
        assert_eq!(stack.undo_len(), 2);

        assert!(stack.undo());
        assert_eq!(total.load(Ordering::SeqCst), 3);
        assert!(stack.undo());
        assert_eq!(total.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_merge_group_never_merges() {
        let stack = Arc::new(UndoStack::new());
        let total = Arc::new(AtomicI64::new(0));
        for _ in 0..2 {
            let _scope = stack.scope(Some(""));
            stack.enact(add(&total, 1));
        }
        assert_eq!(stack.undo_len(), 2);
    }

    #[test]
    fn test_nested_scopes_record_one_step() {
        let stack = Arc::new(UndoStack::new());
        let total = Arc::new(AtomicI64::new(0));
        {
            let _outer = stack.scope(None);
            stack.enact(add(&total, 1));
            {
                let _inner = stack.scope(Some("ignored"));
                stack.enact(add(&total, 1));
            }
            assert_eq!(stack.undo_len(), 0);
        }
        assert_eq!(stack.undo_len(), 1);
    }

    #[test]
    fn test_enact_clears_redo() {
        let stack = Arc::new(UndoStack::new());
        let total = Arc::new(AtomicI64::new(0));
        stack.enact(add(&total, 1));
        assert!(stack.undo());
        assert!(stack.can_redo());
        stack.enact(add(&total, 5));
        assert!(!stack.can_redo());
        assert_eq!(total.load(Ordering::SeqCst), 5);
    }
}
