//! Admission control for new streams.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::BoxError;
use crate::server::config::RateLimitConfig;
use crate::transport::StreamContext;

/// A boxed future, as returned by [`RequestLimiter::wait`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Decides whether a new stream may proceed.
///
/// Invoked once per stream before any request is read, concurrently for all
/// streams.
pub trait RequestLimiter: Send + Sync + 'static {
    /// Wait until the stream may proceed, or fail if it must be rejected.
    fn wait<'a>(&'a self, ctx: &'a StreamContext) -> BoxFuture<'a, Result<(), BoxError>>;
}

/// Token bucket limiter.
///
/// Tokens are added at a fixed rate up to `burst`. Each stream takes one
/// token, waiting for it if necessary, but never longer than `max_wait`.
#[derive(Debug)]
pub struct TokenBucket {
    /// Tokens added per second.
    rate: f64,
    /// Maximum tokens that can accumulate.
    capacity: f64,
    max_wait: Duration,
    state: Mutex<TokenBucketState>,
}

#[derive(Debug)]
struct TokenBucketState {
    /// May go negative: outstanding reservations waiting for refill.
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    /// Create a full bucket from `config`.
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = f64::from(config.burst());
        Self {
            rate: config.per_second(),
            capacity,
            max_wait: config.max_wait(),
            state: Mutex::new(TokenBucketState {
                tokens: capacity,
                last_update: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut TokenBucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_update).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_update = now;
    }

    /// Take a token now if one is available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Reserve a token, returning how long the caller must wait for it, or
    /// `None` (reserving nothing) if that would exceed `max_wait`.
    fn reserve(&self) -> Option<Duration> {
        let mut state = self.state.lock();
        self.refill(&mut state);
        let remaining = state.tokens - 1.0;
        let delay = if remaining >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-remaining / self.rate)
        };
        if delay > self.max_wait {
            return None;
        }
        state.tokens = remaining;
        Some(delay)
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.tokens = (state.tokens + 1.0).min(self.capacity);
    }
}

impl TokenBucket {
    async fn acquire(&self, ctx: &StreamContext) -> Result<(), BoxError> {
        let Some(delay) = self.reserve() else {
            return Err(format!("would exceed maximum wait of {:?}", self.max_wait).into());
        };
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = ctx.cancel.cancelled() => {
                self.release();
                Err("stream cancelled while waiting for admission".into())
            }
        }
    }
}

impl RequestLimiter for TokenBucket {
    fn wait<'a>(&'a self, ctx: &'a StreamContext) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(self.acquire(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(per_second: f64, burst: u32, max_wait: Duration) -> TokenBucket {
        TokenBucket::new(&RateLimitConfig::new(per_second, burst, max_wait).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_wait() {
        let limiter = bucket(10.0, 2, Duration::from_secs(1));
        let ctx = StreamContext::default();

        let start = Instant::now();
        limiter.wait(&ctx).await.unwrap();
        limiter.wait(&ctx).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        // Third stream waits for one refill interval.
        limiter.wait(&ctx).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_beyond_max_wait() {
        let limiter = bucket(1.0, 1, Duration::from_millis(100));
        let ctx = StreamContext::default();

        limiter.wait(&ctx).await.unwrap();
        assert!(limiter.wait(&ctx).await.is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_returns_token() {
        let limiter = bucket(1.0, 1, Duration::from_secs(5));
        let ctx = StreamContext::default();
        limiter.wait(&ctx).await.unwrap();

        ctx.cancel.cancel();
        assert!(limiter.wait(&ctx).await.is_err());

        // The cancelled reservation was returned, so one refill suffices.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.try_acquire());
    }
}
