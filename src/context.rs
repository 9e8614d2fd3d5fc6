//! Execution context passed through plug evaluation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::hash::{StructuralHash, StructuralHasher};
use crate::value::{PlugValue, Value};
use crate::PlugError;

/// Shared cancellation flag.
///
/// Clones observe the same flag, so the canceller can be handed to a UI thread
/// while workers evaluate with a [`Context`] holding another clone.
#[derive(Debug, Clone, Default)]
pub struct Canceller(Arc<AtomicBool>);

impl Canceller {
    /// Create a canceller that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every computation observing this flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Variables and cancellation state for a read.
///
/// Variables participate in producer hashes, so the same plug evaluated in two
/// contexts with different variables is cached separately. The canceller does
/// not affect hashing.
#[derive(Debug, Clone, Default)]
pub struct Context {
    variables: BTreeMap<String, Value>,
    canceller: Option<Canceller>,
}

impl Context {
    /// Create an empty context that can never be cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a cancellation flag.
    pub fn with_canceller(mut self, canceller: Canceller) -> Self {
        self.canceller = Some(canceller);
        self
    }

    /// Set a variable.
    pub fn with<T: PlugValue + 'static>(mut self, name: impl Into<String>, value: T) -> Self {
        self.set(name, Value::new(value));
        self
    }

    /// Set a variable in place.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Get a variable as an untyped value.
    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Get a variable as a concrete type.
    pub fn get<T: PlugValue + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.variables.get(name).and_then(Value::downcast::<T>)
    }

    /// The attached cancellation flag, if any.
    pub fn canceller(&self) -> Option<&Canceller> {
        self.canceller.as_ref()
    }

    /// Returns true if cancellation has been requested.
    pub fn cancellation_requested(&self) -> bool {
        self.canceller.as_ref().is_some_and(Canceller::is_cancelled)
    }

    /// Fail with [`PlugError::Cancelled`] if cancellation has been requested.
    ///
    /// Long running producers should call this periodically.
    pub fn check_cancelled(&self) -> Result<(), PlugError> {
        if self.cancellation_requested() {
            Err(PlugError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Hash of the variables, in name order.
    pub fn hash(&self) -> StructuralHash {
        let mut hasher = StructuralHasher::new();
        hasher.append(&self.variables.len());
        for (name, value) in &self.variables {
            hasher.append(name.as_str());
            hasher.append_hash(value.hash());
        }
        hasher.finish_structural()
    }
}
