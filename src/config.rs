//! Configuration for proxy behavior.

use crate::connection_string::APPLICATION_NAME;

/// Configuration options for a [`ConnectionProxy`](crate::ConnectionProxy).
///
/// # Example
///
/// ```rust
/// use sql_connection_proxy::ProxyConfig;
///
/// let config = ProxyConfig::default()
///     .with_component("billing-service")
///     .with_lifecycle_logging(true);
/// ```
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Application name forced into every connection string.
    /// Default: `"LeaseWeb"`
    pub application_name: String,

    /// Identifier of the component that owns the proxy, reported in every
    /// lifecycle record. A call site that names its own component takes
    /// precedence.
    /// Default: `None`
    pub component: Option<String>,

    /// Whether Open / Close / Dispose records are emitted at all.
    /// Default: `true`
    pub log_lifecycle: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            application_name: APPLICATION_NAME.to_string(),
            component: None,
            log_lifecycle: true,
        }
    }
}

impl ProxyConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the application name written into connection strings.
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the component reported in lifecycle records.
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Enable or disable lifecycle records.
    pub fn with_lifecycle_logging(mut self, enabled: bool) -> Self {
        self.log_lifecycle = enabled;
        self
    }
}
