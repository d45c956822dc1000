//! Error types shared across the Meridian services.
//!
//! Every failure the services can produce is a variant here, independent of
//! its wire representation. The wire mapping lives in [`CoreError::code`] and
//! [`CoreError::into_status`] so there is exactly one place where internal
//! failures turn into RPC status codes.

use thiserror::Error;
use tonic::metadata::MetadataValue;
use tonic::{Code, Status};

use crate::auth::token::TokenError;

/// Result type for operations inside the services.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Failure taxonomy for the identity and order services.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Token could not be issued or verified.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Token verified but its subject is not in the directory.
    #[error("unknown subject: {subject}")]
    UnknownSubject {
        /// The token subject that failed resolution
        subject: String,
    },

    /// Token verified but the account is disabled or locked.
    #[error("account disabled or locked: {subject}")]
    AccountDisabled {
        /// The affected account's username
        subject: String,
    },

    /// Caller is authenticated but not allowed to invoke the method.
    #[error("access denied for {method}")]
    PolicyDenied {
        /// Fully-qualified method name
        method: String,
    },

    /// Request payload failed validation.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// What is invalid
        message: String,
    },

    /// User failed the order-eligibility check; the saga compensated.
    #[error("user {user_id} is not eligible for orders")]
    UserNotEligible {
        /// The ineligible user
        user_id: String,
    },

    /// Entity does not exist (or is not visible to the caller).
    #[error("{entity} not found")]
    NotFound {
        /// Entity kind, e.g. "user" or "order"
        entity: &'static str,
    },

    /// Unique constraint would be violated by a create.
    #[error("{entity} already exists")]
    AlreadyExists {
        /// Entity kind
        entity: &'static str,
    },

    /// Requested state transition is not in the transition table.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Optimistic concurrency conflict on save.
    #[error("version conflict on {entity}: expected {expected}, found {found}")]
    VersionConflict {
        /// Entity kind
        entity: &'static str,
        /// Version the writer observed
        expected: u64,
        /// Version currently persisted
        found: u64,
    },

    /// Remote peer could not be reached (transport failure).
    #[error("peer {peer} unavailable: {message}")]
    RemoteUnavailable {
        /// Peer name
        peer: String,
        /// Transport-level detail
        message: String,
    },

    /// Remote call exceeded its deadline.
    #[error("call to {peer} timed out")]
    RemoteDeadline {
        /// Peer name
        peer: String,
    },

    /// Circuit breaker is open for the peer; the call never left the process.
    #[error("circuit open for {peer}")]
    CircuitOpen {
        /// Peer name
        peer: String,
    },

    /// Bulkhead admission failed; too many concurrent calls in flight.
    #[error("bulkhead full for {peer}")]
    BulkheadFull {
        /// Peer name
        peer: String,
    },

    /// Cache store failed. Always recovered locally by falling through to
    /// the authoritative lookup; never surfaces to a caller on its own.
    #[error("cache unavailable: {message}")]
    CacheUnavailable {
        /// Store-level detail
        message: String,
    },

    /// Anything that has no more specific classification. The message is
    /// logged server-side; callers only ever see a generic internal error.
    #[error("internal error [{context}]: {message}")]
    Unexpected {
        /// Where the error occurred
        context: &'static str,
        /// Detail for the server log, never echoed to callers
        message: String,
    },
}

impl CoreError {
    /// Create an input-validation error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    /// Create an unexpected-error with context for the server log.
    pub fn unexpected(context: &'static str, msg: impl Into<String>) -> Self {
        Self::Unexpected {
            context,
            message: msg.into(),
        }
    }

    /// Classify a transport-level [`Status`] from a remote call.
    ///
    /// Only `UNAVAILABLE` and `DEADLINE_EXCEEDED` keep their transport
    /// meaning; any other remote status is unexpected at the fabric level
    /// and callers that care about business statuses inspect them before
    /// handing the error here.
    pub fn from_remote_status(peer: &str, status: &Status) -> Self {
        match status.code() {
            Code::Unavailable => Self::RemoteUnavailable {
                peer: peer.to_string(),
                message: status.message().to_string(),
            },
            Code::DeadlineExceeded | Code::Cancelled => Self::RemoteDeadline {
                peer: peer.to_string(),
            },
            _ => Self::unexpected("remote-call", format!("{}: {}", peer, status.message())),
        }
    }

    /// Whether the fabric's transport retry policy may retry this failure.
    pub fn is_transport_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable { .. } | Self::RemoteDeadline { .. }
        )
    }

    /// Whether a circuit breaker counts this outcome as a failure of the
    /// callee. Caller-side errors (bad input, denied policy, absent
    /// entities) say nothing about the callee's health.
    pub fn is_peer_failure(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable { .. }
                | Self::RemoteDeadline { .. }
                | Self::Unexpected { .. }
        )
    }

    /// The RPC status code this error maps to.
    pub fn code(&self) -> Code {
        match self {
            Self::Token(_) | Self::UnknownSubject { .. } | Self::AccountDisabled { .. } => {
                Code::Unauthenticated
            }
            Self::PolicyDenied { .. } => Code::PermissionDenied,
            Self::InvalidInput { .. } => Code::InvalidArgument,
            Self::NotFound { .. } => Code::NotFound,
            Self::AlreadyExists { .. } => Code::AlreadyExists,
            Self::InvalidTransition { .. } | Self::UserNotEligible { .. } => {
                Code::FailedPrecondition
            }
            Self::VersionConflict { .. } => Code::Aborted,
            Self::RemoteUnavailable { .. } | Self::CircuitOpen { .. } | Self::BulkheadFull { .. } => {
                Code::Unavailable
            }
            Self::RemoteDeadline { .. } => Code::DeadlineExceeded,
            Self::CacheUnavailable { .. } | Self::Unexpected { .. } => Code::Internal,
        }
    }

    /// The caller-visible description. Kept free of secrets: no tokens, no
    /// password material, no internal backtraces.
    fn public_message(&self) -> String {
        match self {
            Self::Token(e) => e.to_string(),
            Self::UnknownSubject { .. } | Self::AccountDisabled { .. } => {
                "identity unknown or disabled".to_string()
            }
            Self::Unexpected { .. } | Self::CacheUnavailable { .. } => {
                "internal error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Convert into a wire [`Status`], attaching the correlation id to the
    /// trailers so callers can reference the failing request.
    pub fn into_status(self, correlation_id: &str) -> Status {
        if matches!(self, Self::Unexpected { .. }) {
            tracing::error!(
                correlation_id = %correlation_id,
                error = %self,
                "request failed with unexpected error"
            );
        }
        let status = Status::new(self.code(), self.public_message());
        with_correlation(status, correlation_id)
    }
}

/// Attach a correlation id to the trailers of a [`Status`].
pub fn with_correlation(mut status: Status, correlation_id: &str) -> Status {
    if let Ok(value) = MetadataValue::try_from(correlation_id) {
        status
            .metadata_mut()
            .insert(meridian_proto::metadata::CORRELATION_ID, value);
    }
    status
}
