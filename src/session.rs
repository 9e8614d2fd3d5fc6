//! The session: entry point for reading and writing plugs.

use std::sync::Arc;

use crate::action::{UndoScope, UndoStack};
use crate::cache::{ValueCache, DEFAULT_CACHE_CEILING, DEFAULT_CACHE_SHARDS};
use crate::computation::{self, Computation};
use crate::context::Context;
use crate::hash::StructuralHash;
use crate::mutation::SetValueAction;
use crate::plug::{Direction, Plug};
use crate::stack;
use crate::tracer::{NoopTracer, Tracer, TracerPlug};
use crate::value::{PlugValue, Value};
use crate::PlugError;

/// Owns the value cache, the undo history and the tracer that plug reads
/// and writes go through.
///
/// This is cheap to clone - all data is behind `Arc`. Clones share the cache
/// and history, so one session can be handed to many threads.
///
/// # Example
///
/// ```ignore
/// let session = Session::new();
/// let value = session.read_as::<i32>(&node.output)?;
/// session.write(&node.input, Value::new(5i32))?;
/// session.undo();
/// ```
#[derive(Clone)]
pub struct Session {
    cache: Arc<ValueCache>,
    undo: Arc<UndoStack>,
    tracer: Arc<dyn Tracer>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("cache_len", &self.cache.len())
            .field("cache_cost", &self.cache.current_cost())
            .field("undo_len", &self.undo.undo_len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for customizing the session.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let session = Session::builder()
    ///     .cache_ceiling(64 * 1024 * 1024)
    ///     .tracer(MyTracer)
    ///     .build();
    /// ```
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Read `plug` in an empty context.
    pub fn read(&self, plug: &Arc<Plug>) -> Result<Value, PlugError> {
        self.read_in(plug, &Context::new())
    }

    /// Read `plug` in `context`.
    ///
    /// Unconnected inputs, and plugs with no way of computing a value, return
    /// their static value without hashing or touching the cache.
    pub fn read_in(&self, plug: &Arc<Plug>, context: &Context) -> Result<Value, PlugError> {
        if computation::reads_statically(plug) {
            return computation::static_value(plug);
        }
        Computation::new(self, plug, context).run()
    }

    /// Read `plug` as a concrete type in an empty context.
    pub fn read_as<T: PlugValue + 'static>(&self, plug: &Arc<Plug>) -> Result<Arc<T>, PlugError> {
        self.read_as_in(plug, &Context::new())
    }

    /// Read `plug` as a concrete type in `context`.
    pub fn read_as_in<T: PlugValue + 'static>(
        &self,
        plug: &Arc<Plug>,
        context: &Context,
    ) -> Result<Arc<T>, PlugError> {
        let value = self.read_in(plug, context)?;
        value.downcast::<T>().ok_or_else(|| PlugError::TypeMismatch {
            plug: plug.name().to_string(),
            expected: std::any::type_name::<T>(),
            found: value.type_name(),
        })
    }

    /// Structural hash of `plug` in an empty context.
    pub fn hash(&self, plug: &Arc<Plug>) -> Result<StructuralHash, PlugError> {
        self.hash_in(plug, &Context::new())
    }

    /// Structural hash of `plug` in `context`.
    pub fn hash_in(&self, plug: &Arc<Plug>, context: &Context) -> Result<StructuralHash, PlugError> {
        computation::plug_hash(self, plug, context)
    }

    /// Write `value` to `plug`.
    ///
    /// During a computation the value becomes the result of that computation,
    /// which must be for `plug`; while a producer is hashing, every write
    /// fails. Otherwise `plug` must be an unconnected, writable input; the
    /// write is recorded in the undo history unless the value is unchanged.
    pub fn write(&self, plug: &Arc<Plug>, value: Value) -> Result<(), PlugError> {
        if let Some(frame) = stack::current() {
            return frame.deposit(plug, value);
        }

        if plug.direction() != Direction::In || plug.has_input() {
            return Err(PlugError::SetOutsideComputation {
                plug: plug.name().to_string(),
            });
        }
        if plug.is_read_only() {
            return Err(PlugError::ReadOnly {
                plug: plug.name().to_string(),
            });
        }
        if plug.static_value().as_ref() == Some(&value) {
            return Ok(());
        }

        self.undo
            .enact(Box::new(SetValueAction::new(plug.clone(), value)));
        self.tracer.on_plug_set(TracerPlug::new(plug));
        Ok(())
    }

    /// Returns true if `plug` can be written right now.
    pub fn settable(&self, plug: &Plug) -> bool {
        plug.settable()
    }

    /// Returns true if this thread is inside a computation.
    pub fn in_compute(&self) -> bool {
        stack::in_compute()
    }

    /// Revert the most recent undo step. Returns false if there was none.
    pub fn undo(&self) -> bool {
        let undone = self.undo.undo();
        if undone {
            self.tracer.on_undo();
        }
        undone
    }

    /// Reapply the most recently undone step. Returns false if there was none.
    pub fn redo(&self) -> bool {
        let redone = self.undo.redo();
        if redone {
            self.tracer.on_redo();
        }
        redone
    }

    /// Group subsequent writes into one undo step until the guard is dropped.
    ///
    /// Consecutive scopes with the same non-empty `merge_group` collapse into
    /// a single step.
    pub fn undo_scope(&self, merge_group: Option<&str>) -> UndoScope {
        self.undo.scope(merge_group)
    }

    /// The undo history.
    pub fn undo_stack(&self) -> &Arc<UndoStack> {
        &self.undo
    }

    /// The value cache.
    pub fn cache(&self) -> &Arc<ValueCache> {
        &self.cache
    }

    /// Maximum total cost of cached values, in bytes.
    pub fn cache_ceiling(&self) -> usize {
        self.cache.ceiling()
    }

    /// Change the cache ceiling, evicting immediately if it was lowered.
    pub fn set_cache_ceiling(&self, bytes: usize) {
        for evicted in self.cache.set_ceiling(bytes) {
            self.tracer.on_cache_evicted(evicted.hash, evicted.cost);
        }
    }

    /// Total cost of the values currently cached, in bytes.
    pub fn cache_memory_usage(&self) -> usize {
        self.cache.current_cost()
    }

    pub(crate) fn tracer(&self) -> &dyn Tracer {
        self.tracer.as_ref()
    }
}

/// Builder for creating a [`Session`] with custom settings.
pub struct SessionBuilder {
    cache_ceiling: usize,
    cache_shards: usize,
    cache: Option<Arc<ValueCache>>,
    tracer: Arc<dyn Tracer>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            cache_ceiling: DEFAULT_CACHE_CEILING,
            cache_shards: DEFAULT_CACHE_SHARDS,
            cache: None,
            tracer: Arc::new(NoopTracer),
        }
    }

    /// Maximum total cost of cached values, in bytes (500 MiB by default).
    pub fn cache_ceiling(mut self, bytes: usize) -> Self {
        self.cache_ceiling = bytes;
        self
    }

    /// Number of independently locked cache shards (16 by default).
    ///
    /// Shards only split lock contention; eviction order is the same for
    /// any count.
    pub fn cache_shards(mut self, shards: usize) -> Self {
        self.cache_shards = shards;
        self
    }

    /// Use an existing cache, shared with other sessions.
    ///
    /// Overrides [`cache_ceiling`](Self::cache_ceiling) and
    /// [`cache_shards`](Self::cache_shards).
    pub fn cache(mut self, cache: Arc<ValueCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Observe evaluation with `tracer`.
    pub fn tracer<T: Tracer>(mut self, tracer: T) -> Self {
        self.tracer = Arc::new(tracer);
        self
    }

    /// Build the session with the configured settings.
    pub fn build(self) -> Session {
        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(ValueCache::with_shards(self.cache_ceiling, self.cache_shards))
        });
        Session {
            cache,
            undo: Arc::new(UndoStack::new()),
            tracer: self.tracer,
        }
    }
}
