//! Crate-level error types.
//!
//! [`ThingError`] is the domain taxonomy a caller sees in a rejected reply.
//! The remaining enums describe failures of the adapters and of the actor
//! machinery around them.

use std::time::Duration;

use serde_json::{Value, json};

use crate::command::Headers;
use crate::model::ThingId;
use crate::pointer::JsonPointer;

/// Malformed identifiers and pointers, raised while parsing input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid thing ID '{id}': {reason}")]
    InvalidThingId { id: String, reason: &'static str },

    #[error("invalid pointer '{pointer}': {reason}")]
    InvalidPointer {
        pointer: String,
        reason: &'static str,
    },

    #[error("invalid feature ID '{0}': must be non-empty and must not contain '/'")]
    InvalidFeatureId(String),
}

/// Domain error returned to the issuer of a command.
///
/// Each variant maps onto an HTTP-like [`status`](ThingError::status) and a
/// stable [`error_code`](ThingError::error_code) so transport adapters can
/// render it without matching on variants. "Never existed" and "deleted"
/// deliberately share [`ThingError::NotAccessible`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThingError {
    /// The thing does not exist, is deleted, or is still recovering.
    #[error("the thing '{thing_id}' could not be found or is not accessible")]
    NotAccessible { thing_id: ThingId },

    /// A create command addressed a thing that already exists.
    #[error("the thing '{thing_id}' already exists")]
    Conflict { thing_id: ThingId },

    #[error("the attributes of thing '{thing_id}' could not be found")]
    AttributesNotAccessible { thing_id: ThingId },

    #[error("the attribute '{pointer}' of thing '{thing_id}' could not be found")]
    AttributeNotAccessible {
        thing_id: ThingId,
        pointer: JsonPointer,
    },

    #[error("the features of thing '{thing_id}' could not be found")]
    FeaturesNotAccessible { thing_id: ThingId },

    #[error("the feature '{feature_id}' of thing '{thing_id}' could not be found")]
    FeatureNotAccessible {
        thing_id: ThingId,
        feature_id: String,
    },

    #[error(
        "the property '{pointer}' of feature '{feature_id}' on thing '{thing_id}' could not be found"
    )]
    FeaturePropertyNotAccessible {
        thing_id: ThingId,
        feature_id: String,
        pointer: JsonPointer,
    },

    /// The payload names a different thing than the command addresses.
    #[error("the thing ID '{found}' in the payload does not match the addressed thing '{expected}'")]
    IdMismatch { expected: ThingId, found: ThingId },

    /// The command is structurally valid but semantically unacceptable.
    #[error("invalid command for thing '{thing_id}': {reason}")]
    InvalidCommand { thing_id: ThingId, reason: String },

    /// The command kind has no strategy in the table that was consulted.
    #[error("the command '{command_type}' is not supported")]
    CommandNotSupported { command_type: String },

    /// Persistence failed or timed out; the thing state is unchanged.
    #[error("the thing '{thing_id}' is temporarily unavailable: {reason}")]
    Unavailable { thing_id: ThingId, reason: String },
}

impl ThingError {
    /// HTTP-like status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            ThingError::NotAccessible { .. }
            | ThingError::AttributesNotAccessible { .. }
            | ThingError::AttributeNotAccessible { .. }
            | ThingError::FeaturesNotAccessible { .. }
            | ThingError::FeatureNotAccessible { .. }
            | ThingError::FeaturePropertyNotAccessible { .. } => 404,
            ThingError::Conflict { .. } => 409,
            ThingError::IdMismatch { .. }
            | ThingError::InvalidCommand { .. }
            | ThingError::CommandNotSupported { .. } => 400,
            ThingError::Unavailable { .. } => 503,
        }
    }

    /// Stable machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            ThingError::NotAccessible { .. } => "things:thing.notfound",
            ThingError::Conflict { .. } => "things:thing.conflict",
            ThingError::AttributesNotAccessible { .. } => "things:attributes.notfound",
            ThingError::AttributeNotAccessible { .. } => "things:attribute.notfound",
            ThingError::FeaturesNotAccessible { .. } => "things:features.notfound",
            ThingError::FeatureNotAccessible { .. } => "things:feature.notfound",
            ThingError::FeaturePropertyNotAccessible { .. } => "things:feature.property.notfound",
            ThingError::IdMismatch { .. } => "things:id.notsettable",
            ThingError::InvalidCommand { .. } => "things:command.invalid",
            ThingError::CommandNotSupported { .. } => "things:command.notsupported",
            ThingError::Unavailable { .. } => "things:thing.unavailable",
        }
    }
}

/// A domain error paired with the headers of the command that caused it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct ErrorResponse {
    pub error: ThingError,
    pub headers: Headers,
}

impl ErrorResponse {
    pub fn new(error: ThingError, headers: Headers) -> Self {
        Self { error, headers }
    }

    /// Wire representation: status, error code, and message.
    pub fn to_json(&self) -> Value {
        json!({
            "status": self.error.status(),
            "error": self.error.error_code(),
            "message": self.error.to_string(),
            "correlationId": self.headers.correlation_id,
        })
    }
}

/// Error returned by [`ThingHandle::ask`](crate::ThingHandle::ask) and
/// [`ThingSupervisor::ask`](crate::ThingSupervisor::ask).
#[derive(Debug, thiserror::Error)]
pub enum AskError {
    /// The actor answered with a domain error.
    #[error(transparent)]
    Rejected(#[from] ErrorResponse),

    /// No reply within the ask timeout. The command may still be processed.
    #[error("no reply from thing actor within {0:?}")]
    Timeout(Duration),

    /// The actor task has exited.
    #[error("thing actor is no longer running")]
    ActorGone,

    /// The actor dropped the command as unhandled.
    #[error("thing actor dropped the command without replying")]
    NoReply,
}

/// Failure of a journal adapter.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// The journal's last revision differs from the expected one, meaning
    /// another writer appended to this stream.
    #[error("journal conflict for '{thing_id}': expected revision {expected}, journal is at {actual}")]
    Conflict {
        thing_id: ThingId,
        expected: u64,
        actual: u64,
    },

    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a snapshot store.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure while rebuilding a thing from its snapshot and journal.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("loading events failed: {0}")]
    Journal(#[from] JournalError),

    #[error("loading snapshot failed: {0}")]
    Snapshot(#[from] SnapshotError),

    /// The journal returned a gap or a reordered event.
    #[error("event out of order during replay: expected revision {expected}, found {found}")]
    OutOfOrder { expected: u64, found: u64 },

    #[error("recovery did not complete within {0:?}")]
    TimedOut(Duration),
}

/// Invalid [`ThingConfig`](crate::ThingConfig).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("snapshot threshold must not be negative, got {0}")]
    NegativeSnapshotThreshold(i64),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("mailbox capacity must be greater than zero")]
    ZeroMailbox,

    #[error("restart backoff minimum {min:?} exceeds maximum {max:?}")]
    InvertedBackoff { min: Duration, max: Duration },
}
