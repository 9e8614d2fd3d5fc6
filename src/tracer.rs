//! Tracer trait for observing plug evaluation.
//!
//! This module defines the [`Tracer`] trait and related types for observing
//! computations, cache traffic and undo history. The default [`NoopTracer`]
//! provides zero-cost when tracing is not needed.
//!
//! # Example
//!
//! ```ignore
//! use plug_flow::{ExecutionResult, Session, SpanId, Tracer, TracerPlug};
//!
//! struct PrintTracer;
//!
//! impl Tracer for PrintTracer {
//!     fn new_span_id(&self) -> SpanId {
//!         SpanId(1)
//!     }
//!
//!     fn on_compute_end(&self, _span_id: SpanId, plug: TracerPlug, result: ExecutionResult) {
//!         println!("{} -> {:?}", plug.name, result);
//!     }
//! }
//!
//! let session = Session::builder().tracer(PrintTracer).build();
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::hash::StructuralHash;
use crate::plug::{Plug, PlugId};

/// Unique identifier for a computation span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId(pub u64);

/// A plug described for tracing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TracerPlug {
    /// Identifier of the plug.
    pub id: PlugId,
    /// Name of the plug.
    pub name: String,
}

impl TracerPlug {
    /// Describe `plug`.
    #[inline]
    pub fn new(plug: &Plug) -> Self {
        Self {
            id: plug.id(),
            name: plug.name().to_string(),
        }
    }
}

/// Computation result classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// The value was found in the cache.
    CacheHit,
    /// The value was produced and inserted into the cache.
    Computed,
    /// The value was produced but the plug (or its input chain) is not cacheable.
    Uncached,
    /// The computation observed a cancellation request.
    Cancelled,
    /// The computation failed.
    Error {
        /// Display form of the error.
        message: String,
    },
}

/// Tracer trait for observing plug evaluation.
///
/// All methods except [`new_span_id`](Tracer::new_span_id) have default empty
/// implementations, so you only need to override the events you're interested
/// in.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` as the tracer may be called from
/// multiple threads concurrently.
pub trait Tracer: Send + Sync + 'static {
    /// Generate a new unique span ID.
    ///
    /// This is the only required method. Called at the start of each computation.
    fn new_span_id(&self) -> SpanId;

    /// Called when a computation starts.
    #[inline]
    fn on_compute_start(&self, _span_id: SpanId, _plug: TracerPlug) {}

    /// Called after the cache has been probed.
    #[inline]
    fn on_cache_check(&self, _span_id: SpanId, _plug: TracerPlug, _hash: StructuralHash, _hit: bool) {
    }

    /// Called when a computation ends.
    #[inline]
    fn on_compute_end(&self, _span_id: SpanId, _plug: TracerPlug, _result: ExecutionResult) {}

    /// Called when the cache evicts an entry.
    #[inline]
    fn on_cache_evicted(&self, _hash: StructuralHash, _cost: usize) {}

    /// Called when a plug's static value is written.
    #[inline]
    fn on_plug_set(&self, _plug: TracerPlug) {}

    /// Called when an undo step is reverted.
    #[inline]
    fn on_undo(&self) {}

    /// Called when an undo step is reapplied.
    #[inline]
    fn on_redo(&self) {}

    /// Called when a dependency cycle is detected.
    #[inline]
    fn on_cycle_detected(&self, _path: Vec<String>) {}
}

/// Zero-cost tracer that discards all events.
///
/// This is the default tracer for [`Session`](crate::Session).
pub struct NoopTracer;

/// Global span counter for NoopTracer.
static NOOP_SPAN_COUNTER: AtomicU64 = AtomicU64::new(1);

impl Tracer for NoopTracer {
    #[inline(always)]
    fn new_span_id(&self) -> SpanId {
        SpanId(NOOP_SPAN_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}
