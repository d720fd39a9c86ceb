use std::fmt;
use std::time::Duration;

/// The store call an [`Error`] originated from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Operation {
    /// Establishing the transport to the store.
    Connect,
    /// Exchanging credentials for a token.
    Authenticate,
    /// Writing a key.
    Put,
    /// Reading a key.
    Get,
    /// Subscribing to or consuming a change feed.
    Watch,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Connect => "connect",
            Operation::Authenticate => "authenticate",
            Operation::Put => "put",
            Operation::Get => "get",
            Operation::Watch => "watch",
        })
    }
}

/// A boxed error coming from one of the underlying transports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can happen within the kvbench-client.
///
/// None of these are retried by the client; the caller decides what a failure means.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport to the store could not be established.
    #[error("failed to connect to `{endpoint}`")]
    Connection {
        /// The endpoint that was dialed.
        endpoint: String,
        /// The underlying transport error.
        #[source]
        cause: BoxError,
    },
    /// The store rejected the credentials or did not hand out a token.
    #[error("authentication failed: {message}")]
    Auth {
        /// A description of the rejection, including the response status if any.
        message: String,
    },
    /// The request reached the store, but it answered with a non-success status.
    #[error("{operation} failed with status {status}: {message}")]
    Status {
        /// The failed call.
        operation: Operation,
        /// The HTTP status or gRPC code reported by the store.
        status: String,
        /// The response body or status message.
        message: String,
    },
    /// The request could not be sent or its response could not be received.
    #[error("{operation} request failed")]
    Request {
        /// The failed call.
        operation: Operation,
        /// The underlying transport error.
        #[source]
        cause: BoxError,
    },
    /// A response or event payload was malformed.
    #[error("failed to decode {operation} response")]
    Decode {
        /// The call whose response was malformed.
        operation: Operation,
        /// The underlying decoding error.
        #[source]
        cause: BoxError,
    },
    /// The call did not complete within its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// The call that timed out.
        operation: Operation,
        /// The deadline that was exceeded.
        timeout: Duration,
    },
    /// The store ended a watch subscription.
    #[error("watch stream was closed by the store")]
    WatchClosed,
}

impl Error {
    pub(crate) fn request(operation: Operation, cause: impl Into<BoxError>) -> Self {
        Self::Request {
            operation,
            cause: cause.into(),
        }
    }

    pub(crate) fn decode(operation: Operation, cause: impl Into<BoxError>) -> Self {
        Self::Decode {
            operation,
            cause: cause.into(),
        }
    }

    pub(crate) fn status(
        operation: Operation,
        status: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        Self::Status {
            operation,
            status: status.to_string(),
            message: message.into(),
        }
    }

    /// Returns the call this error originated from.
    pub fn operation(&self) -> Operation {
        match self {
            Error::Connection { .. } => Operation::Connect,
            Error::Auth { .. } => Operation::Authenticate,
            Error::Status { operation, .. }
            | Error::Request { operation, .. }
            | Error::Decode { operation, .. }
            | Error::Timeout { operation, .. } => *operation,
            Error::WatchClosed => Operation::Watch,
        }
    }
}

/// A convenience alias that defaults our [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
