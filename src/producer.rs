//! The downward interface: nodes that hash and compute output plugs.

use std::sync::Arc;

use crate::context::Context;
use crate::hash::{StructuralHash, StructuralHasher};
use crate::plug::Plug;
use crate::session::Session;
use crate::stack;
use crate::value::{PlugValue, Value};
use crate::PlugError;

/// A node that computes the values of its output plugs.
///
/// Implementors usually own their plugs and hand each output a
/// `Weak<dyn Producer>` pointing back at themselves (see
/// [`PlugBuilder::producer`](crate::PlugBuilder::producer) and
/// [`Arc::new_cyclic`]).
///
/// # Example
///
/// ```ignore
/// struct Double { input: Arc<Plug>, output: Arc<Plug> }
///
/// impl Producer for Double {
///     fn hash(&self, _output: &Plug, ctx: &ComputeContext<'_>, h: &mut StructuralHasher)
///         -> Result<(), PlugError>
///     {
///         h.append("double").append_hash(ctx.hash(&self.input)?);
///         Ok(())
///     }
///
///     fn compute(&self, output: &Plug, ctx: &ComputeContext<'_>) -> Result<(), PlugError> {
///         let value = ctx.read_as::<i32>(&self.input)?;
///         ctx.set(output, *value * 2)
///     }
/// }
/// ```
pub trait Producer: Send + Sync + 'static {
    /// Name used in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Append everything `output`'s value depends on to `hasher`.
    ///
    /// Leaving the hasher untouched is reported as
    /// [`PlugError::HashNotImplemented`]. The context hash is mixed in by the
    /// engine afterwards.
    fn hash(
        &self,
        _output: &Plug,
        _ctx: &ComputeContext<'_>,
        _hasher: &mut StructuralHasher,
    ) -> Result<(), PlugError> {
        Ok(())
    }

    /// Compute `output` and deposit it with [`ComputeContext::set`].
    fn compute(&self, output: &Plug, ctx: &ComputeContext<'_>) -> Result<(), PlugError>;

    /// Outputs whose values depend on `input`, for dirty propagation.
    fn affects(&self, _input: &Plug) -> Vec<Arc<Plug>> {
        Vec::new()
    }
}

/// Access to the engine from inside [`Producer::hash`] and
/// [`Producer::compute`].
pub struct ComputeContext<'a> {
    session: &'a Session,
    context: &'a Context,
}

impl<'a> ComputeContext<'a> {
    pub(crate) fn new(session: &'a Session, context: &'a Context) -> Self {
        Self { session, context }
    }

    /// The execution context of this computation.
    pub fn context(&self) -> &Context {
        self.context
    }

    /// The session driving this computation.
    pub fn session(&self) -> &Session {
        self.session
    }

    /// Read another plug in the same context.
    pub fn read(&self, plug: &Arc<Plug>) -> Result<Value, PlugError> {
        self.session.read_in(plug, self.context)
    }

    /// Read another plug as a concrete type.
    pub fn read_as<T: PlugValue + 'static>(&self, plug: &Arc<Plug>) -> Result<Arc<T>, PlugError> {
        self.session.read_as_in(plug, self.context)
    }

    /// Hash of another plug in the same context.
    pub fn hash(&self, plug: &Arc<Plug>) -> Result<StructuralHash, PlugError> {
        self.session.hash_in(plug, self.context)
    }

    /// Deposit the result of the current computation.
    pub fn set<T: PlugValue + 'static>(&self, output: &Plug, value: T) -> Result<(), PlugError> {
        self.set_value(output, Value::new(value))
    }

    /// Deposit an already wrapped result.
    pub fn set_value(&self, output: &Plug, value: Value) -> Result<(), PlugError> {
        match stack::current() {
            Some(frame) => frame.deposit(output, value),
            None => Err(PlugError::SetOutsideComputation {
                plug: output.name().to_string(),
            }),
        }
    }

    /// Fail with [`PlugError::Cancelled`] if cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<(), PlugError> {
        self.context.check_cancelled()
    }
}
