//! Stream authentication.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{BoxError, Error, Result};
use crate::transport::StreamContext;

/// Establishes the identities of the peer behind a stream.
///
/// Invoked once per stream, before any request is read, concurrently for all
/// streams.
pub trait Authenticator: Send + Sync + 'static {
    /// Short name used in logs and failure messages.
    fn authenticator_type(&self) -> &str;

    /// Authenticate the stream, returning the identities of the peer.
    fn authenticate(&self, ctx: &StreamContext) -> std::result::Result<Vec<String>, BoxError>;
}

/// Runs `authenticators` in order and returns the identities from the first
/// that succeeds.
///
/// No authenticators means the stream is anonymous and `Ok(None)` is
/// returned.
pub(crate) fn authenticate(
    authenticators: &[Arc<dyn Authenticator>],
    ctx: &StreamContext,
) -> Result<Option<Vec<String>>> {
    if authenticators.is_empty() {
        return Ok(None);
    }

    let mut failures = Vec::with_capacity(authenticators.len());
    for authenticator in authenticators {
        match authenticator.authenticate(ctx) {
            Ok(identities) => {
                debug!(
                    peer = %ctx.peer(),
                    authenticator = authenticator.authenticator_type(),
                    ?identities,
                    "authentication successful"
                );
                return Ok(Some(identities));
            }
            Err(e) => failures.push(format!("{}: {e}", authenticator.authenticator_type())),
        }
    }

    let message = failures.join("; ");
    warn!(peer = %ctx.peer(), "failed to authenticate client: {message}");
    Err(Error::Unauthenticated(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Header(&'static str);

    impl Authenticator for Header {
        fn authenticator_type(&self) -> &str {
            self.0
        }

        fn authenticate(&self, ctx: &StreamContext) -> std::result::Result<Vec<String>, BoxError> {
            match ctx.metadata.get(self.0) {
                Some(value) => Ok(vec![value.clone()]),
                None => Err(format!("no {} header", self.0).into()),
            }
        }
    }

    #[test]
    fn test_no_authenticators_is_anonymous() {
        assert_eq!(authenticate(&[], &StreamContext::default()).unwrap(), None);
    }

    #[test]
    fn test_first_success_wins() {
        let authenticators: Vec<Arc<dyn Authenticator>> =
            vec![Arc::new(Header("x-token")), Arc::new(Header("x-spiffe"))];
        let ctx = StreamContext::default().with_metadata("X-Spiffe", "spiffe://cluster.local/ns/a");

        let identities = authenticate(&authenticators, &ctx).unwrap();
        assert_eq!(identities, Some(vec!["spiffe://cluster.local/ns/a".to_string()]));
    }

    #[test]
    fn test_all_failures_are_reported() {
        let authenticators: Vec<Arc<dyn Authenticator>> =
            vec![Arc::new(Header("x-token")), Arc::new(Header("x-spiffe"))];

        let err = authenticate(&authenticators, &StreamContext::default()).unwrap_err();
        match err {
            Error::Unauthenticated(message) => {
                assert!(message.contains("x-token: no x-token header"));
                assert!(message.contains("x-spiffe: no x-spiffe header"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
