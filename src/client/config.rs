//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating
//! [`SubscriptionClient`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use graphql_socket::{ReconnectPolicy, SubscriptionClient};
//!
//! # async fn example() -> graphql_socket::Result<()> {
//! let client = SubscriptionClient::builder()
//!     .keepalive_timeout(Duration::from_secs(30))
//!     .reconnect(ReconnectPolicy::default())
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};
use crate::transport::{TransportFactory, default_factory};

use super::core::SubscriptionClient;
use super::reconnect::ReconnectPolicy;

// ============================================================================
// Constants
// ============================================================================

/// Default number of results kept per operation.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// Receives connection-scoped errors no single operation owns.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

// ============================================================================
// ClientConfig
// ============================================================================

/// Validated client settings.
#[derive(Clone)]
pub struct ClientConfig {
    /// Close a connection after this long without a keepalive. `None` disables.
    pub keepalive_timeout: Option<Duration>,
    /// Results kept per operation.
    pub history_limit: usize,
    /// Reconnect on unexpected close. `None` tears down instead.
    pub reconnect: Option<ReconnectPolicy>,
    /// Creates transports.
    pub transport: Arc<dyn TransportFactory>,
    /// Connection-scoped diagnostics.
    pub on_error: ErrorHandler,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("keepalive_timeout", &self.keepalive_timeout)
            .field("history_limit", &self.history_limit)
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Reports a connection-scoped error to the configured handler.
    #[inline]
    pub(crate) fn report(&self, error: &Error) {
        (self.on_error)(error);
    }
}

fn log_error(error: &Error) {
    warn!(error = %error, "Subscription engine error");
}

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`SubscriptionClient`].
///
/// Use [`SubscriptionClient::builder()`] to create a new builder.
#[derive(Clone)]
pub struct ClientBuilder {
    keepalive_timeout: Option<Duration>,
    history_limit: usize,
    reconnect: Option<ReconnectPolicy>,
    transport: Option<Arc<dyn TransportFactory>>,
    on_error: Option<ErrorHandler>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            keepalive_timeout: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            reconnect: None,
            transport: None,
            on_error: None,
        }
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("keepalive_timeout", &self.keepalive_timeout)
            .field("history_limit", &self.history_limit)
            .field("reconnect", &self.reconnect)
            .field("custom_transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes connections that stay silent for `timeout`.
    ///
    /// Also makes the client echo every server keepalive.
    #[inline]
    #[must_use]
    pub fn keepalive_timeout(mut self, timeout: Duration) -> Self {
        self.keepalive_timeout = Some(timeout);
        self
    }

    /// Sets how many results each operation accumulates.
    #[inline]
    #[must_use]
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Enables reconnection on unexpected close.
    #[inline]
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// Replaces the default WebSocket transport.
    #[inline]
    #[must_use]
    pub fn transport(mut self, factory: impl TransportFactory + 'static) -> Self {
        self.transport = Some(Arc::new(factory));
        self
    }

    /// Receives connection-scoped errors. Defaults to a `warn!` log.
    #[inline]
    #[must_use]
    pub fn on_error(mut self, handler: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Validates the settings without starting a client.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a value is out of range
    /// - [`Error::TransportUnavailable`] if no transport factory is available
    pub fn into_config(self) -> Result<ClientConfig> {
        if self.keepalive_timeout == Some(Duration::ZERO) {
            return Err(Error::config(
                "keepalive_timeout must be > 0; leave it unset to disable keepalive",
            ));
        }

        if self.history_limit == 0 {
            return Err(Error::config("history_limit must be > 0"));
        }

        if let Some(policy) = &self.reconnect {
            policy.validate()?;
        }

        let transport = self
            .transport
            .or_else(default_factory)
            .ok_or(Error::TransportUnavailable)?;

        Ok(ClientConfig {
            keepalive_timeout: self.keepalive_timeout,
            history_limit: self.history_limit,
            reconnect: self.reconnect,
            transport,
            on_error: self
                .on_error
                .unwrap_or_else(|| Arc::new(log_error) as ErrorHandler),
        })
    }

    /// Builds the client and starts its event loop.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Same as [`ClientBuilder::into_config`].
    pub fn build(self) -> Result<SubscriptionClient> {
        Ok(SubscriptionClient::start(self.into_config()?))
    }
}

// ============================================================================
// Tests
// ============================================================================
