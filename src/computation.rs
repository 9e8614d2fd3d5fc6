//! Single-shot evaluation of one plug in one context.
//!
//! A computation runs in three phases:
//!
//! 1. decide cacheability by walking the plug and its chain of inputs,
//! 2. if cacheable, hash the plug and probe the [`ValueCache`](crate::ValueCache),
//! 3. on a miss, copy from the input connection or ask the owning producer to
//!    deposit the value into a fresh frame, then cache it.

use std::sync::Arc;

use crate::context::Context;
use crate::hash::{StructuralHash, StructuralHasher};
use crate::plug::{Direction, Plug};
use crate::producer::ComputeContext;
use crate::session::Session;
use crate::stack::{self, FrameGuard, FrameKind};
use crate::tracer::{ExecutionResult, SpanId, TracerPlug};
use crate::value::Value;
use crate::PlugError;

pub(crate) struct Computation<'a> {
    session: &'a Session,
    plug: &'a Arc<Plug>,
    context: &'a Context,
    context_hash: StructuralHash,
}

impl<'a> Computation<'a> {
    pub(crate) fn new(session: &'a Session, plug: &'a Arc<Plug>, context: &'a Context) -> Self {
        Self {
            session,
            plug,
            context,
            context_hash: context.hash(),
        }
    }

    pub(crate) fn run(self) -> Result<Value, PlugError> {
        let tracer = self.session.tracer();
        if let Some(path) = stack::cycle_path(self.plug, self.context_hash) {
            tracer.on_cycle_detected(path.clone());
            return Err(PlugError::Cycle { path });
        }

        let span_id = tracer.new_span_id();
        tracer.on_compute_start(span_id, TracerPlug::new(self.plug));

        let result = self.compute(span_id);

        let execution_result = match &result {
            Ok((_, outcome)) => outcome.clone(),
            Err(PlugError::Cancelled) => ExecutionResult::Cancelled,
            Err(e) => ExecutionResult::Error {
                message: e.to_string(),
            },
        };
        tracer.on_compute_end(span_id, TracerPlug::new(self.plug), execution_result);

        result.map(|(value, _)| value)
    }

    fn compute(&self, span_id: SpanId) -> Result<(Value, ExecutionResult), PlugError> {
        let hash = if chain_is_cacheable(self.plug) {
            Some(plug_hash(self.session, self.plug, self.context)?)
        } else {
            None
        };

        if let Some(hash) = hash {
            let cached = self.session.cache().get(&hash);
            self.session.tracer().on_cache_check(
                span_id,
                TracerPlug::new(self.plug),
                hash,
                cached.is_some(),
            );
            if let Some(value) = cached {
                return Ok((value, ExecutionResult::CacheHit));
            }
        }

        self.context.check_cancelled()?;
        let value = self.produce()?;
        self.context.check_cancelled()?;

        match hash {
            Some(hash) => {
                let cost = value.memory_usage();
                for evicted in self.session.cache().set(hash, value.clone(), cost) {
                    self.session
                        .tracer()
                        .on_cache_evicted(evicted.hash, evicted.cost);
                }
                Ok((value, ExecutionResult::Computed))
            }
            None => Ok((value, ExecutionResult::Uncached)),
        }
    }

    fn produce(&self) -> Result<Value, PlugError> {
        let guard = FrameGuard::push(self.plug.clone(), self.context_hash, FrameKind::Compute);

        if let Some(input) = self.plug.input_plug() {
            let value = self.session.read_in(&input, self.context)?;
            let value = self.plug.convert_from_input(value)?;
            guard.frame().deposit(self.plug, value)?;
        } else {
            let producer = self.plug.producer().ok_or_else(|| PlugError::NoProducer {
                plug: self.plug.name().to_string(),
            })?;
            producer.compute(self.plug, &ComputeContext::new(self.session, self.context))?;
        }

        guard.frame().take().ok_or_else(|| PlugError::ValueNotSet {
            plug: self.plug.name().to_string(),
        })
    }
}

/// A read is cacheable only if the plug and every plug up its input chain is.
pub(crate) fn chain_is_cacheable(plug: &Arc<Plug>) -> bool {
    let mut current = plug.clone();
    loop {
        if !current.is_cacheable() {
            return false;
        }
        match current.input_plug() {
            Some(input) => current = input,
            None => return true,
        }
    }
}

/// Returns true if reading `plug` returns its static value directly.
pub(crate) fn reads_statically(plug: &Plug) -> bool {
    !plug.has_input() && (plug.direction() == Direction::In || !plug.has_producer_link())
}

pub(crate) fn static_value(plug: &Plug) -> Result<Value, PlugError> {
    plug.static_value().ok_or_else(|| PlugError::MissingValue {
        plug: plug.name().to_string(),
    })
}

/// Structural hash of `plug` in `context`.
pub(crate) fn plug_hash(
    session: &Session,
    plug: &Arc<Plug>,
    context: &Context,
) -> Result<StructuralHash, PlugError> {
    if let Some(input) = plug.input_plug() {
        let mut hash = plug_hash(session, &input, context)?;
        if !plug.shares_hash_with(&input) {
            // A converting connection must not share cache entries with its input.
            hash.append(&input.value_type());
            hash.append(&plug.value_type());
        }
        return Ok(hash);
    }

    if reads_statically(plug) {
        return Ok(static_value(plug)?.hash());
    }

    let producer = plug.producer().ok_or_else(|| PlugError::NoProducer {
        plug: plug.name().to_string(),
    })?;
    let context_hash = context.hash();
    if let Some(path) = stack::cycle_path(plug, context_hash) {
        session.tracer().on_cycle_detected(path.clone());
        return Err(PlugError::Cycle { path });
    }

    let mut hasher = StructuralHasher::new();
    {
        let _guard = FrameGuard::push(plug.clone(), context_hash, FrameKind::Hash);
        producer.hash(plug, &ComputeContext::new(session, context), &mut hasher)?;
    }
    if hasher.is_empty() {
        return Err(PlugError::HashNotImplemented {
            plug: plug.name().to_string(),
        });
    }
    hasher.append_hash(context_hash);
    Ok(hasher.finish_structural())
}
