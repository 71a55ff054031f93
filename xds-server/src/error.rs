//! Error types for the xDS server.

use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by pluggable collaborators (generators, authenticators,
/// rate limiters).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for the xDS server.
///
/// Every variant terminates exactly one stream; none of them is fatal to the
/// server as a whole.
#[derive(Debug, Error)]
pub enum Error {
    /// The server has not been marked ready to serve discovery information.
    #[error("server is not ready to serve discovery information")]
    NotReady,

    /// The stream exceeded the connection rate limit.
    #[error("request rate limit exceeded: {0}")]
    RateLimited(String),

    /// None of the configured authenticators accepted the stream.
    #[error("authentication failed: {0}")]
    Unauthenticated(String),

    /// The first request of a stream carried no node identifier.
    #[error("missing node information")]
    MissingNode,

    /// A generator failed to produce resources for a type.
    #[error("failed to generate {type_url}: {source}")]
    Generator {
        /// The type URL that was being generated.
        type_url: String,
        /// The generator's error.
        #[source]
        source: BoxError,
    },

    /// Writing a response did not complete within the configured timeout.
    #[error("timed out after {0:?} writing response")]
    SendTimeout(Duration),

    /// The response side of the stream is gone.
    #[error("stream closed")]
    StreamClosed,

    /// Transport-level error reported by the gRPC stack.
    #[cfg(feature = "transport-tonic")]
    #[error("transport error: {0}")]
    Transport(#[from] tonic::Status),

    /// A wire message could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Invalid configuration.
    #[error("validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Returns true if the error is a normal end of stream (client went away,
    /// deadline hit) rather than a fault worth reporting.
    pub fn is_expected_close(&self) -> bool {
        match self {
            Error::StreamClosed => true,
            #[cfg(feature = "transport-tonic")]
            Error::Transport(status) => {
                use tonic::Code;
                match status.code() {
                    Code::Cancelled | Code::DeadlineExceeded => true,
                    Code::Unavailable | Code::Unknown => {
                        let message = status.message();
                        message.contains("transport is closing")
                            || message.contains("connection reset")
                            || message.contains("stream no longer needed")
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

#[cfg(feature = "transport-tonic")]
impl From<Error> for tonic::Status {
    fn from(error: Error) -> Self {
        let message = error.to_string();
        match error {
            Error::NotReady => tonic::Status::unavailable(message),
            Error::RateLimited(_) => tonic::Status::resource_exhausted(message),
            Error::Unauthenticated(_) => tonic::Status::unauthenticated(message),
            Error::MissingNode | Error::Decode(_) => tonic::Status::invalid_argument(message),
            Error::SendTimeout(_) => tonic::Status::deadline_exceeded(message),
            Error::StreamClosed => tonic::Status::cancelled(message),
            Error::Transport(status) => status,
            Error::Generator { .. } | Error::Validation(_) => tonic::Status::internal(message),
        }
    }
}

/// Result type alias for xDS server operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(all(test, feature = "transport-tonic"))]
mod tests {
    use super::*;
    use tonic::{Code, Status};

    #[test]
    fn test_status_mapping() {
        assert_eq!(Status::from(Error::MissingNode).code(), Code::InvalidArgument);
        assert_eq!(
            Status::from(Error::RateLimited("slow down".into())).code(),
            Code::ResourceExhausted
        );
        assert_eq!(
            Status::from(Error::Unauthenticated("no token".into())).code(),
            Code::Unauthenticated
        );
        assert_eq!(Status::from(Error::NotReady).code(), Code::Unavailable);
        let generator = Error::Generator {
            type_url: "type".into(),
            source: "boom".into(),
        };
        assert_eq!(Status::from(generator).code(), Code::Internal);
    }

    #[test]
    fn test_expected_close() {
        assert!(Error::Transport(Status::cancelled("client gone")).is_expected_close());
        assert!(Error::Transport(Status::deadline_exceeded("late")).is_expected_close());
        assert!(Error::Transport(Status::unavailable("transport is closing")).is_expected_close());
        assert!(!Error::Transport(Status::internal("bad frame")).is_expected_close());
        assert!(!Error::MissingNode.is_expected_close());
    }
}
