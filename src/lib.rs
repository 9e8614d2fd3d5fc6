#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

mod action;
mod cache;
mod computation;
mod context;
mod error;
mod hash;
mod mutation;
mod plug;
mod producer;
mod session;
mod stack;
pub mod tracer;
mod value;

pub use action::{Action, UndoScope, UndoStack};
pub use cache::{Evicted, ValueCache, DEFAULT_CACHE_CEILING, DEFAULT_CACHE_SHARDS};
pub use context::{Canceller, Context};
pub use error::{ErrorKind, PlugError};
pub use hash::{StructuralHash, StructuralHasher};
pub use mutation::SetValueAction;
pub use plug::{Converter, Direction, Listener, Plug, PlugBuilder, PlugId};
pub use producer::{ComputeContext, Producer};
pub use session::{Session, SessionBuilder};
pub use tracer::{ExecutionResult, NoopTracer, SpanId, Tracer, TracerPlug};
pub use value::{DynEq, MemoryUsage, PlugValue, Value};
