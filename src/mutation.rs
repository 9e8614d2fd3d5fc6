//! The undoable record of a static value write.

use std::any::Any;
use std::sync::Arc;

use crate::action::Action;
use crate::plug::{Plug, PlugId};
use crate::value::Value;

/// Sets the static value of a plug, remembering the value it replaced.
///
/// Merging two actions on the same plug keeps the first action's previous
/// value and adopts the second action's new value, so undoing the merged
/// action restores the state from before both writes.
pub struct SetValueAction {
    plug: Arc<Plug>,
    new_value: Value,
    previous_value: Option<Value>,
}

impl SetValueAction {
    /// Record a write of `new_value` to `plug`, capturing its current value.
    pub fn new(plug: Arc<Plug>, new_value: Value) -> Self {
        let previous_value = plug.static_value();
        Self {
            plug,
            new_value,
            previous_value,
        }
    }

    /// The plug being written.
    pub fn plug(&self) -> &Arc<Plug> {
        &self.plug
    }

    /// The value installed by [`do_action`](Action::do_action).
    pub fn new_value(&self) -> &Value {
        &self.new_value
    }

    /// The value reinstalled by [`undo_action`](Action::undo_action).
    pub fn previous_value(&self) -> Option<&Value> {
        self.previous_value.as_ref()
    }
}

impl Action for SetValueAction {
    fn subject(&self) -> PlugId {
        self.plug.id()
    }

    fn do_action(&self) {
        self.plug
            .set_value_internal(Some(self.new_value.clone()), true);
    }

    fn undo_action(&self) {
        self.plug
            .set_value_internal(self.previous_value.clone(), true);
    }

    fn can_merge(&self, other: &dyn Action) -> bool {
        other
            .as_any()
            .downcast_ref::<SetValueAction>()
            .is_some_and(|other| other.plug.id() == self.plug.id())
    }

    fn merge(&mut self, other: &dyn Action) {
        if let Some(other) = other.as_any().downcast_ref::<SetValueAction>() {
            self.new_value = other.new_value.clone();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
