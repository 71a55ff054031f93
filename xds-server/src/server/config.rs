//! Configuration for the discovery server.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default identifier reported as the control plane in every response.
pub const DEFAULT_CONTROL_PLANE_ID: &str = "xds-server";

/// Configuration for the discovery server.
///
/// # Example
///
/// ```
/// use xds_server::{RateLimitConfig, ServerConfig};
/// use std::time::Duration;
///
/// let config = ServerConfig::new("sail-7d9f")
///     .with_push_channel_capacity(4).unwrap()
///     .with_send_timeout(Some(Duration::from_secs(10))).unwrap()
///     .with_rate_limit(Some(RateLimitConfig::default()));
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Identifier sent as `control_plane` in every response.
    control_plane_id: String,

    /// Number of push events that may queue for one connection before the
    /// producer waits.
    ///
    /// Default: 1.
    push_channel_capacity: usize,

    /// Upper bound on writing one response. `None` waits indefinitely (the
    /// stream's own cancellation still applies).
    ///
    /// Default: None.
    send_timeout: Option<Duration>,

    /// Limit on how fast new streams are accepted. `None` disables limiting.
    ///
    /// Default: `Some(RateLimitConfig::default())`.
    rate_limit: Option<RateLimitConfig>,
}

impl ServerConfig {
    /// Create a configuration with the given control plane identifier.
    pub fn new(control_plane_id: impl Into<String>) -> Self {
        Self {
            control_plane_id: control_plane_id.into(),
            ..Default::default()
        }
    }

    /// Identifier sent as `control_plane` in every response.
    pub fn control_plane_id(&self) -> &str {
        &self.control_plane_id
    }

    /// Number of push events that may queue for one connection.
    pub fn push_channel_capacity(&self) -> usize {
        self.push_channel_capacity
    }

    /// Upper bound on writing one response.
    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout
    }

    /// Limit on how fast new streams are accepted.
    pub fn rate_limit(&self) -> Option<&RateLimitConfig> {
        self.rate_limit.as_ref()
    }

    /// Set the push channel capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if `capacity` is zero.
    pub fn with_push_channel_capacity(mut self, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Validation(
                "push_channel_capacity must be greater than zero".into(),
            ));
        }
        self.push_channel_capacity = capacity;
        Ok(self)
    }

    /// Set the send timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if `timeout` is zero.
    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Result<Self> {
        if timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::Validation(
                "send_timeout must be greater than zero".into(),
            ));
        }
        self.send_timeout = timeout;
        Ok(self)
    }

    /// Set the rate limit.
    pub fn with_rate_limit(mut self, rate_limit: Option<RateLimitConfig>) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            control_plane_id: DEFAULT_CONTROL_PLANE_ID.to_string(),
            push_channel_capacity: 1,
            send_timeout: None,
            rate_limit: Some(RateLimitConfig::default()),
        }
    }
}

/// Token bucket parameters for accepting new streams.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Streams admitted per second.
    ///
    /// Default: 100.
    per_second: f64,

    /// Streams that may be admitted at once after an idle period.
    ///
    /// Default: 1.
    burst: u32,

    /// How long a new stream may wait for admission before it is rejected.
    ///
    /// Default: 1 second.
    max_wait: Duration,
}

impl RateLimitConfig {
    /// Create a rate limit with custom parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `per_second` is not a positive finite number
    /// - `burst` is zero
    ///
    /// # Example
    ///
    /// ```
    /// use xds_server::RateLimitConfig;
    /// use std::time::Duration;
    ///
    /// let limit = RateLimitConfig::new(
    ///     20.0,                    // per_second
    ///     5,                       // burst
    ///     Duration::from_secs(2),  // max_wait
    /// )?;
    /// # Ok::<(), xds_server::Error>(())
    /// ```
    pub fn new(per_second: f64, burst: u32, max_wait: Duration) -> Result<Self> {
        if !per_second.is_finite() || per_second <= 0.0 {
            return Err(Error::Validation(format!(
                "per_second must be a positive number, got {per_second}"
            )));
        }
        if burst == 0 {
            return Err(Error::Validation("burst must be greater than zero".into()));
        }
        Ok(Self {
            per_second,
            burst,
            max_wait,
        })
    }

    /// Streams admitted per second.
    pub fn per_second(&self) -> f64 {
        self.per_second
    }

    /// Streams that may be admitted at once after an idle period.
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// How long a new stream may wait for admission.
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 100.0,
            burst: 1,
            max_wait: Duration::from_secs(1),
        }
    }
}
