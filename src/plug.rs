//! Plugs: the value slots of the node graph.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::producer::Producer;
use crate::stack;
use crate::value::{PlugValue, Value};
use crate::PlugError;

/// Global counter for plug identifiers.
static NEXT_PLUG_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a plug within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlugId(pub u64);

/// Direction of a plug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Receives a value: either stored directly or from a connection.
    In,
    /// Provides a value computed by the owning producer.
    Out,
}

/// Converts a value read from an input connection into this plug's type.
pub type Converter = Arc<dyn Fn(&Value) -> Result<Value, PlugError> + Send + Sync>;

/// Callback invoked with the plug that was set or dirtied.
pub type Listener = Arc<dyn Fn(&Plug) + Send + Sync>;

/// A single value slot in the dependency graph.
///
/// A plug is either freestanding (an input holding a static value), fed by an
/// input connection, or computed by its owning [`Producer`]. Plugs are always
/// shared through `Arc`; the owning node keeps them alive. A plug holds its
/// input connection strongly and its downstream outputs weakly.
///
/// Values are read and written through a [`Session`](crate::Session).
pub struct Plug {
    id: PlugId,
    name: String,
    direction: Direction,
    value_type: Option<&'static str>,
    converter: Option<Converter>,
    cacheable: AtomicBool,
    read_only: AtomicBool,
    static_value: RwLock<Option<Value>>,
    input: RwLock<Option<Arc<Plug>>>,
    outputs: RwLock<Vec<Weak<Plug>>>,
    producer: RwLock<Option<Weak<dyn Producer>>>,
    set_listeners: RwLock<Vec<Listener>>,
    dirtied_listeners: RwLock<Vec<Listener>>,
    dirty_count: AtomicU64,
}

impl Plug {
    /// Start building an input plug with a default value.
    pub fn input<T: PlugValue + 'static>(name: impl Into<String>, default: T) -> PlugBuilder {
        PlugBuilder::new(name.into(), Direction::In)
            .value_type::<T>()
            .default_value(Value::new(default))
    }

    /// Start building an output plug.
    pub fn output(name: impl Into<String>) -> PlugBuilder {
        PlugBuilder::new(name.into(), Direction::Out)
    }

    /// Unique identifier of this plug.
    pub fn id(&self) -> PlugId {
        self.id
    }

    /// Name used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direction of this plug.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Declared value type, if any.
    pub fn value_type(&self) -> Option<&'static str> {
        self.value_type
    }

    /// Returns true if computed values of this plug may be cached.
    pub fn is_cacheable(&self) -> bool {
        self.cacheable.load(Ordering::Acquire)
    }

    /// Enable or disable caching for this plug.
    pub fn set_cacheable(&self, cacheable: bool) {
        self.cacheable.store(cacheable, Ordering::Release);
    }

    /// Returns true if direct writes are rejected.
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Mark this plug read-only (or writable again).
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    /// The statically stored value.
    ///
    /// For connected plugs this is the value that will be restored when the
    /// connection is removed.
    pub fn static_value(&self) -> Option<Value> {
        self.static_value.read().clone()
    }

    /// The upstream plug this plug is connected to.
    pub fn input_plug(&self) -> Option<Arc<Plug>> {
        self.input.read().clone()
    }

    /// Returns true if this plug has an input connection.
    pub fn has_input(&self) -> bool {
        self.input.read().is_some()
    }

    /// Connect this plug to `input`, or disconnect it with `None`.
    ///
    /// Disconnecting restores the pre-connection static value. Either way,
    /// dirtiness is propagated downstream.
    pub fn set_input(self: &Arc<Self>, input: Option<Arc<Plug>>) {
        let previous = {
            let current = self.input.read();
            match (&*current, &input) {
                (Some(current), Some(new)) if Arc::ptr_eq(current, new) => return,
                (None, None) => return,
                _ => current.clone(),
            }
        };

        if let Some(previous) = &previous {
            previous
                .outputs
                .write()
                .retain(|weak| weak.upgrade().is_some_and(|p| p.id != self.id));
        }
        if let Some(input) = &input {
            input.outputs.write().push(Arc::downgrade(self));
        }
        let disconnecting = input.is_none();
        *self.input.write() = input;

        if disconnecting {
            // Back to the static value; dirtiness is propagated once below.
            self.emit_plug_set();
        }
        self.propagate_dirtiness();
    }

    /// Live downstream plugs connected to this one.
    pub fn outputs(&self) -> Vec<Arc<Plug>> {
        let mut outputs = self.outputs.write();
        outputs.retain(|weak| weak.strong_count() > 0);
        outputs.iter().filter_map(Weak::upgrade).collect()
    }

    /// The owning producer, if it is still alive.
    pub fn producer(&self) -> Option<Arc<dyn Producer>> {
        self.producer.read().as_ref().and_then(Weak::upgrade)
    }

    /// Returns true if a producer was ever attached, alive or not.
    pub(crate) fn has_producer_link(&self) -> bool {
        self.producer.read().is_some()
    }

    /// Attach the owning producer.
    pub fn set_producer(&self, producer: Weak<dyn Producer>) {
        *self.producer.write() = Some(producer);
    }

    /// Returns true if this plug can be written right now.
    ///
    /// Read-only and connected plugs are never settable. During a computation
    /// only the plug being computed is settable; otherwise input plugs are.
    pub fn settable(&self) -> bool {
        if self.is_read_only() || self.has_input() {
            return false;
        }
        match stack::current() {
            Some(frame) => frame.accepts(self.id),
            None => self.direction == Direction::In,
        }
    }

    /// Register a callback for when the plug's static value is set.
    ///
    /// Callbacks also fire when an upstream plug this one is connected to is set.
    pub fn on_set(&self, listener: impl Fn(&Plug) + Send + Sync + 'static) {
        self.set_listeners.write().push(Arc::new(listener));
    }

    /// Register a callback for when the plug is marked dirty.
    pub fn on_dirtied(&self, listener: impl Fn(&Plug) + Send + Sync + 'static) {
        self.dirtied_listeners.write().push(Arc::new(listener));
    }

    /// Number of times this plug has been marked dirty.
    pub fn dirty_count(&self) -> u64 {
        self.dirty_count.load(Ordering::Acquire)
    }

    /// Convert a value read from the input connection.
    pub(crate) fn convert_from_input(&self, value: Value) -> Result<Value, PlugError> {
        match &self.converter {
            Some(converter) => converter(&value),
            None => Ok(value),
        }
    }

    /// Returns true if values from `input` reach this plug unchanged.
    pub(crate) fn shares_hash_with(&self, input: &Plug) -> bool {
        self.converter.is_none() && self.value_type == input.value_type
    }

    /// Store a new static value and notify listeners.
    pub(crate) fn set_value_internal(&self, value: Option<Value>, propagate_dirtiness: bool) {
        *self.static_value.write() = value;
        // Set notifications go out before dirtiness, so listeners on dirtied
        // outputs observe the new value when they pull.
        self.emit_plug_set();
        if propagate_dirtiness {
            self.propagate_dirtiness();
        }
    }

    fn emit_plug_set(&self) {
        let listeners = self.set_listeners.read().clone();
        for listener in listeners {
            listener(self);
        }
        for output in self.outputs() {
            output.emit_plug_set();
        }
    }

    fn mark_dirty(&self) {
        self.dirty_count.fetch_add(1, Ordering::AcqRel);
        let listeners = self.dirtied_listeners.read().clone();
        for listener in listeners {
            listener(self);
        }
    }

    /// Dependents of this plug: connected outputs and plugs the producer
    /// reports as affected.
    fn dependents(&self) -> Vec<Arc<Plug>> {
        let mut dependents = self.outputs();
        if let Some(producer) = self.producer() {
            dependents.extend(producer.affects(self));
        }
        dependents
    }

    /// Mark this plug and everything downstream of it dirty, each plug once.
    pub(crate) fn propagate_dirtiness(&self) {
        let mut visited = ahash::HashSet::default();
        visited.insert(self.id);
        self.mark_dirty();

        let mut queue: VecDeque<Arc<Plug>> = self.dependents().into();
        while let Some(plug) = queue.pop_front() {
            if !visited.insert(plug.id) {
                continue;
            }
            plug.mark_dirty();
            queue.extend(plug.dependents());
        }
    }
}

impl fmt::Debug for Plug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plug")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("value_type", &self.value_type)
            .field("cacheable", &self.is_cacheable())
            .field("read_only", &self.is_read_only())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Plug`].
///
/// # Example
///
/// ```ignore
/// let input = Plug::input("in", 1i32).build();
/// let output = Plug::output("out").value_type::<i32>().cacheable(false).build();
/// ```
pub struct PlugBuilder {
    name: String,
    direction: Direction,
    value_type: Option<&'static str>,
    default: Option<Value>,
    converter: Option<Converter>,
    cacheable: bool,
    read_only: bool,
    producer: Option<Weak<dyn Producer>>,
}

impl PlugBuilder {
    fn new(name: String, direction: Direction) -> Self {
        Self {
            name,
            direction,
            value_type: None,
            default: None,
            converter: None,
            cacheable: true,
            read_only: false,
            producer: None,
        }
    }

    /// Declare the value type carried by the plug.
    ///
    /// Connections between plugs of different declared types do not share
    /// cache entries.
    pub fn value_type<T: 'static>(mut self) -> Self {
        self.value_type = Some(std::any::type_name::<T>());
        self
    }

    /// Set the initial static value.
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Convert values arriving through an input connection.
    pub fn converter(
        mut self,
        converter: impl Fn(&Value) -> Result<Value, PlugError> + Send + Sync + 'static,
    ) -> Self {
        self.converter = Some(Arc::new(converter));
        self
    }

    /// Enable or disable caching (enabled by default).
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    /// Reject direct writes.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Attach the owning producer.
    pub fn producer(mut self, producer: Weak<dyn Producer>) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Build the plug.
    pub fn build(self) -> Arc<Plug> {
        Arc::new(Plug {
            id: PlugId(NEXT_PLUG_ID.fetch_add(1, Ordering::Relaxed)),
            name: self.name,
            direction: self.direction,
            value_type: self.value_type,
            converter: self.converter,
            cacheable: AtomicBool::new(self.cacheable),
            read_only: AtomicBool::new(self.read_only),
            static_value: RwLock::new(self.default),
            input: RwLock::new(None),
            outputs: RwLock::new(Vec::new()),
            producer: RwLock::new(self.producer),
            set_listeners: RwLock::new(Vec::new()),
            dirtied_listeners: RwLock::new(Vec::new()),
            dirty_count: AtomicU64::new(0),
        })
    }
}
