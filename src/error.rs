//! Error types for plug evaluation and assignment.

use std::sync::Arc;

/// Broad classification of a [`PlugError`].
///
/// Callers use this to tell "try again later" ([`ErrorKind::Cancelled`]) apart
/// from integration mistakes without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The graph is not set up to produce a value for the plug.
    Configuration,
    /// A producer or caller broke the evaluation contract.
    ContractViolation,
    /// A direct write targeted a read-only plug.
    ReadOnly,
    /// The computation observed a cancellation request.
    Cancelled,
    /// A producer reported a domain error of its own.
    Producer,
}

/// Errors raised while reading or writing plugs.
///
/// All errors surface synchronously to the caller of
/// [`Session::read`](crate::Session::read) or
/// [`Session::write`](crate::Session::write). A cache miss is never an error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlugError {
    /// The plug has neither an input connection nor a producer.
    #[error("unable to compute value for plug \"{plug}\" as it has no producer")]
    NoProducer {
        /// Name of the plug.
        plug: String,
    },

    /// The plug has no static value to return.
    #[error("plug \"{plug}\" has no value")]
    MissingValue {
        /// Name of the plug.
        plug: String,
    },

    /// A write happened outside of any computation on a plug that is not a
    /// freestanding input.
    #[error("cannot set value for plug \"{plug}\" except during computation")]
    SetOutsideComputation {
        /// Name of the plug.
        plug: String,
    },

    /// A write during a computation targeted a plug other than the one being
    /// computed.
    #[error("cannot set value for plug \"{plug}\" during computation for plug \"{computing}\"")]
    SetDuringComputation {
        /// Name of the plug that was written.
        plug: String,
        /// Name of the plug the active computation is for.
        computing: String,
    },

    /// The producer returned without depositing a value.
    #[error("value for plug \"{plug}\" not set as expected")]
    ValueNotSet {
        /// Name of the plug.
        plug: String,
    },

    /// The producer deposited a value twice.
    #[error("value for plug \"{plug}\" was already set during this computation")]
    ResultAlreadySet {
        /// Name of the plug.
        plug: String,
    },

    /// The producer did not append anything to the hasher.
    #[error("hash not implemented for plug \"{plug}\"")]
    HashNotImplemented {
        /// Name of the plug.
        plug: String,
    },

    /// A producer tried to read the plug it is computing.
    #[error("dependency cycle detected: {}", .path.join(" -> "))]
    Cycle {
        /// Names of the plugs forming the cycle.
        path: Vec<String>,
    },

    /// A typed read found a value of another type.
    #[error("plug \"{plug}\" holds a value of type {found}, expected {expected}")]
    TypeMismatch {
        /// Name of the plug.
        plug: String,
        /// Requested type.
        expected: &'static str,
        /// Stored type.
        found: &'static str,
    },

    /// A direct write targeted a read-only plug.
    #[error("cannot set value for read only plug \"{plug}\"")]
    ReadOnly {
        /// Name of the plug.
        plug: String,
    },

    /// The computation was cancelled.
    #[error("computation cancelled")]
    Cancelled,

    /// Domain error raised by a producer.
    ///
    /// Use `?` on any `anyhow::Error`, or [`PlugError::producer`], to raise one.
    #[error("producer error: {0}")]
    Producer(Arc<anyhow::Error>),
}

impl PlugError {
    /// Wrap a producer failure.
    pub fn producer(err: impl Into<anyhow::Error>) -> Self {
        PlugError::Producer(Arc::new(err.into()))
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlugError::NoProducer { .. } | PlugError::MissingValue { .. } => {
                ErrorKind::Configuration
            }
            PlugError::SetOutsideComputation { .. }
            | PlugError::SetDuringComputation { .. }
            | PlugError::ValueNotSet { .. }
            | PlugError::ResultAlreadySet { .. }
            | PlugError::HashNotImplemented { .. }
            | PlugError::Cycle { .. }
            | PlugError::TypeMismatch { .. } => ErrorKind::ContractViolation,
            PlugError::ReadOnly { .. } => ErrorKind::ReadOnly,
            PlugError::Cancelled => ErrorKind::Cancelled,
            PlugError::Producer(_) => ErrorKind::Producer,
        }
    }

    /// Returns true for [`PlugError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PlugError::Cancelled)
    }

    /// Returns a reference to the inner producer error, if any.
    pub fn producer_error(&self) -> Option<&Arc<anyhow::Error>> {
        match self {
            PlugError::Producer(e) => Some(e),
            _ => None,
        }
    }

    /// Attempts to downcast the producer error to a specific type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.producer_error().and_then(|e| e.downcast_ref::<E>())
    }

    /// Returns `true` if this is a producer error of type `E`.
    pub fn is<E: std::error::Error + Send + Sync + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }
}

impl From<anyhow::Error> for PlugError {
    fn from(err: anyhow::Error) -> Self {
        PlugError::Producer(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("grid {0} is empty")]
    struct EmptyGrid(u32);

    #[test]
    fn test_kinds() {
        assert_eq!(PlugError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            PlugError::NoProducer { plug: "out".into() }.kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            PlugError::ValueNotSet { plug: "out".into() }.kind(),
            ErrorKind::ContractViolation
        );
        assert_eq!(
            PlugError::ReadOnly { plug: "in".into() }.kind(),
            ErrorKind::ReadOnly
        );
    }

    #[test]
    fn test_producer_error_downcast() {
        let err = PlugError::producer(EmptyGrid(3));
        assert_eq!(err.kind(), ErrorKind::Producer);
        assert!(err.is::<EmptyGrid>());
        assert_eq!(err.downcast_ref::<EmptyGrid>().map(|e| e.0), Some(3));
        assert!(err.to_string().contains("grid 3 is empty"));
    }

    #[test]
    fn test_from_anyhow() {
        fn fails() -> Result<(), PlugError> {
            let scan: Result<(), anyhow::Error> = Err(anyhow::anyhow!("no voxels"));
            scan?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert!(matches!(err, PlugError::Producer(_)));
    }

    #[test]
    fn test_messages_name_the_plug() {
        let err = PlugError::SetDuringComputation {
            plug: "node.in".into(),
            computing: "node.out".into(),
        };
        assert_eq!(
            err.to_string(),
            "cannot set value for plug \"node.in\" during computation for plug \"node.out\""
        );
        let cycle = PlugError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(cycle.to_string(), "dependency cycle detected: a -> b -> a");
    }
}
