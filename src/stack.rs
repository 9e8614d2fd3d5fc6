//! Per-thread stack of in-flight computations.
//!
//! Each thread evaluates one linear chain of nested computations. The frame on
//! top of the stack is the one a producer deposits its result into, and the
//! stack as a whole is what cycle detection walks.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::hash::StructuralHash;
use crate::plug::{Plug, PlugId};
use crate::value::Value;
use crate::PlugError;

thread_local! {
    static COMPUTATION_STACK: RefCell<Vec<Rc<Frame>>> = const { RefCell::new(Vec::new()) };
}

/// Result slot of a frame. Written at most once.
#[derive(Debug)]
pub(crate) enum FrameResult {
    Pending,
    Ready(Value),
}

/// What a frame is doing with its plug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Compute,
    /// Hashing never produces a value, so nothing may be deposited.
    Hash,
}

/// A single in-flight computation, bound to one plug in one context.
#[derive(Debug)]
pub(crate) struct Frame {
    plug: Arc<Plug>,
    context_hash: StructuralHash,
    kind: FrameKind,
    result: RefCell<FrameResult>,
}

impl Frame {
    /// Returns true if a result for `plug` may be deposited here.
    pub(crate) fn accepts(&self, plug: PlugId) -> bool {
        self.kind == FrameKind::Compute && self.plug.id() == plug
    }

    /// Store the result for `plug`.
    pub(crate) fn deposit(&self, plug: &Plug, value: Value) -> Result<(), PlugError> {
        if self.kind == FrameKind::Hash {
            return Err(PlugError::SetOutsideComputation {
                plug: plug.name().to_string(),
            });
        }
        if plug.id() != self.plug.id() {
            return Err(PlugError::SetDuringComputation {
                plug: plug.name().to_string(),
                computing: self.plug.name().to_string(),
            });
        }
        let mut result = self.result.borrow_mut();
        if let FrameResult::Ready(_) = &*result {
            return Err(PlugError::ResultAlreadySet {
                plug: plug.name().to_string(),
            });
        }
        *result = FrameResult::Ready(value);
        Ok(())
    }

    /// Take the deposited result, leaving the slot pending.
    pub(crate) fn take(&self) -> Option<Value> {
        match self.result.replace(FrameResult::Pending) {
            FrameResult::Ready(value) => Some(value),
            FrameResult::Pending => None,
        }
    }
}

/// Pushes a frame on creation and pops it when dropped, including on early
/// return and unwinding.
pub(crate) struct FrameGuard {
    frame: Rc<Frame>,
}

impl FrameGuard {
    pub(crate) fn push(plug: Arc<Plug>, context_hash: StructuralHash, kind: FrameKind) -> Self {
        let frame = Rc::new(Frame {
            plug,
            context_hash,
            kind,
            result: RefCell::new(FrameResult::Pending),
        });
        COMPUTATION_STACK.with(|stack| stack.borrow_mut().push(frame.clone()));
        Self { frame }
    }

    pub(crate) fn frame(&self) -> &Frame {
        &self.frame
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        COMPUTATION_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert!(
                popped.is_some_and(|frame| Rc::ptr_eq(&frame, &self.frame)),
                "computation frames popped out of order"
            );
        });
    }
}

/// The innermost frame on this thread.
pub(crate) fn current() -> Option<Rc<Frame>> {
    COMPUTATION_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Returns true if this thread is inside a computation.
pub(crate) fn in_compute() -> bool {
    COMPUTATION_STACK.with(|stack| !stack.borrow().is_empty())
}

/// If `plug` is already being computed in the same context on this thread,
/// return the chain of plug names from that frame to the new request.
pub(crate) fn cycle_path(plug: &Plug, context_hash: StructuralHash) -> Option<Vec<String>> {
    COMPUTATION_STACK.with(|stack| {
        let stack = stack.borrow();
        let start = stack
            .iter()
            .position(|frame| frame.plug.id() == plug.id() && frame.context_hash == context_hash)?;
        let mut path: Vec<String> = stack[start..]
            .iter()
            .map(|frame| frame.plug.name().to_string())
            .collect();
        path.push(plug.name().to_string());
        Some(path)
    })
}
