//! Lifecycle-logging connection proxy.

use crate::config::ProxyConfig;
use crate::connection_string::normalize_with;
use crate::lifecycle::{self, CallSite, LifecycleEvent};
use crate::native::{ConnectionState, IsolationLevel, NativeConnection};

/// A logging wrapper around a native connection.
///
/// The proxy forces `Pooling=False`, `MultipleActiveResultSets=True`,
/// `Asynchronous Processing=True` and the configured application name into
/// every connection string it hands to the native connection, and reports
/// Open / Close / Dispose to the `SqlConnectionProxy` logger together with the
/// place the proxy was created.
///
/// Everything else is forwarded untouched. Properties are read from the
/// native connection on every call, and transactions and commands come back
/// as the connector's own types.
///
/// # Example
///
/// ```rust,ignore
/// use sql_connection_proxy::{ConnectionProxy, SeaOrmConnection};
///
/// let mut proxy = ConnectionProxy::<SeaOrmConnection>::new(Some(
///     "Provider=postgres;Server=db01;Database=sales;User Id=app;Password=secret",
/// ))?;
///
/// // Opens lazily and hands back the native connection.
/// let native = proxy.materialize().await?;
/// ```
#[derive(Debug)]
pub struct ConnectionProxy<C: NativeConnection> {
    inner: C,
    config: ProxyConfig,
    call_site: CallSite,
    last_error: Option<String>,
}

impl<C: NativeConnection> ConnectionProxy<C> {
    /// Create a proxy with default configuration, recording the caller's location.
    #[track_caller]
    pub fn new(connection_string: Option<&str>) -> Result<Self, C::Error> {
        Self::with_call_site(connection_string, ProxyConfig::default(), CallSite::caller())
    }

    /// Create a proxy with the given configuration, recording the caller's location.
    #[track_caller]
    pub fn with_config(
        connection_string: Option<&str>,
        config: ProxyConfig,
    ) -> Result<Self, C::Error> {
        Self::with_call_site(connection_string, config, CallSite::caller())
    }

    /// Create a proxy for an explicitly supplied call site.
    ///
    /// A missing or blank connection string yields a default native
    /// connection; anything else is normalized first.
    pub fn with_call_site(
        connection_string: Option<&str>,
        config: ProxyConfig,
        mut call_site: CallSite,
    ) -> Result<Self, C::Error> {
        let inner = match connection_string.filter(|s| !s.trim().is_empty()) {
            Some(raw) => {
                let normalized = normalize_with(raw, &config.application_name)?;
                C::new(Some(normalized.as_str()))?
            }
            None => C::new(None)?,
        };

        if call_site.component.is_none() {
            call_site.component = config.component.clone();
        }

        Ok(Self {
            inner,
            config,
            call_site,
            last_error: None,
        })
    }

    /// Get a reference to the native connection.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Consume the proxy without disposing, returning the native connection.
    pub fn into_inner(self) -> C {
        self.inner
    }

    /// Get the proxy configuration.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Where this proxy was created.
    pub fn call_site(&self) -> &CallSite {
        &self.call_site
    }

    pub fn connection_string(&self) -> &str {
        self.inner.connection_string()
    }

    /// Normalize `value` and hand it to the native connection.
    pub fn set_connection_string(&mut self, value: &str) -> Result<(), C::Error> {
        let normalized = normalize_with(value, &self.config.application_name)?;
        self.inner.set_connection_string(&normalized)
    }

    pub fn database(&self) -> &str {
        self.inner.database()
    }

    pub fn data_source(&self) -> &str {
        self.inner.data_source()
    }

    pub fn server_version(&self) -> Option<&str> {
        self.inner.server_version()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub async fn change_database(&mut self, database: &str) -> Result<(), C::Error> {
        self.inner.change_database(database).await
    }

    /// Open the native connection if needed, then log.
    ///
    /// A failed open returns the native error and logs nothing.
    pub async fn open(&mut self) -> Result<(), C::Error> {
        if self.inner.state() != ConnectionState::Open {
            self.inner.open().await?;
        }
        self.log(LifecycleEvent::Open);
        Ok(())
    }

    /// Log, then close the native connection if it is not already closed.
    pub async fn close(&mut self) -> Result<(), C::Error> {
        self.log(LifecycleEvent::Close);
        if self.inner.state() != ConnectionState::Closed {
            self.inner.close().await?;
        }
        Ok(())
    }

    /// Log, then dispose the native connection.
    pub async fn dispose(self) -> Result<(), C::Error> {
        self.log(LifecycleEvent::Dispose);
        self.inner.dispose().await
    }

    /// Begin a read-committed transaction on the native connection.
    pub async fn begin_transaction(&self) -> Result<C::Transaction, C::Error> {
        self.begin_transaction_with(IsolationLevel::ReadCommitted).await
    }

    pub async fn begin_transaction_with(
        &self,
        isolation_level: IsolationLevel,
    ) -> Result<C::Transaction, C::Error> {
        self.inner.begin_transaction(isolation_level).await
    }

    pub fn create_command(&self) -> C::Command {
        self.inner.create_command()
    }

    /// Open the native connection if it is not open and hand it out.
    ///
    /// This opening is not logged. The returned handle is the proxy's own
    /// connection: closing it through the handle shows up in [`state`](Self::state).
    pub async fn materialize(&mut self) -> Result<&mut C, C::Error> {
        if self.inner.state() != ConnectionState::Open {
            self.inner.open().await?;
        }
        Ok(&mut self.inner)
    }

    /// Empty every pool the native connector keeps in this process.
    pub async fn clear_all_pools() -> Result<(), C::Error> {
        C::clear_all_pools().await
    }

    /// Empty the pool `connection` belongs to.
    pub async fn clear_pool(connection: &C) -> Result<(), C::Error> {
        C::clear_pool(connection).await
    }

    fn log(&self, event: LifecycleEvent) {
        if self.config.log_lifecycle {
            lifecycle::emit(event, &self.call_site, self.last_error.as_deref());
        }
    }
}

impl<C: NativeConnection> AsRef<C> for ConnectionProxy<C> {
    fn as_ref(&self) -> &C {
        &self.inner
    }
}

/// Materialize an optional proxy; `None` stays `None`.
pub async fn materialize<C: NativeConnection>(
    proxy: Option<&mut ConnectionProxy<C>>,
) -> Result<Option<&mut C>, C::Error> {
    match proxy {
        Some(proxy) => proxy.materialize().await.map(Some),
        None => Ok(None),
    }
}

/// Create a [`ConnectionProxy`] stamped with the invoking crate, file and line.
///
/// ```rust,ignore
/// let proxy = connection_proxy!(SeaOrmConnection, Some("Server=db01;Database=sales"))?;
/// ```
#[macro_export]
macro_rules! connection_proxy {
    ($native:ty, $connection_string:expr) => {
        $crate::connection_proxy!($native, $connection_string, $crate::ProxyConfig::default())
    };
    ($native:ty, $connection_string:expr, $config:expr) => {
        $crate::ConnectionProxy::<$native>::with_call_site(
            $connection_string,
            $config,
            $crate::CallSite::new(file!(), line!()).with_component(env!("CARGO_PKG_NAME")),
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::capture;
    use crate::native::mock::{all_pool_clears, MockConnection, MockError};

    const E2E: &str = "Server=host;Database=db;User Id=u;Password=p;Pooling=true";

    fn proxy(connection_string: &str) -> ConnectionProxy<MockConnection> {
        ConnectionProxy::new(Some(connection_string)).unwrap()
    }

    #[test]
    fn test_construction_normalizes() {
        let proxy = proxy(E2E);

        assert_eq!(
            proxy.connection_string(),
            "Server=host;Database=db;User Id=u;Password=p;Pooling=False;\
             MultipleActiveResultSets=True;Asynchronous Processing=True;Application Name=LeaseWeb"
        );
        assert_eq!(proxy.database(), "db");
        assert_eq!(proxy.data_source(), "mock");
        assert_eq!(proxy.state(), ConnectionState::Closed);
        assert_eq!(proxy.server_version(), None);
    }

    #[test]
    fn test_blank_string_creates_default_connection() {
        let blank = ConnectionProxy::<MockConnection>::new(Some("   ")).unwrap();
        assert_eq!(blank.connection_string(), "");

        let missing = ConnectionProxy::<MockConnection>::new(None).unwrap();
        assert_eq!(missing.connection_string(), "");
    }

    #[test]
    fn test_malformed_string_is_rejected() {
        let result = ConnectionProxy::<MockConnection>::new(Some("Server=h;nonsense"));
        assert!(matches!(result, Err(MockError::ConnectionString(_))));
    }

    #[test]
    fn test_set_connection_string_forces_options() {
        let mut proxy = proxy("Server=a");
        proxy
            .set_connection_string("Server=b;Pooling=true;MARS=false;Application Name=Other")
            .unwrap();

        assert_eq!(
            proxy.connection_string(),
            "Server=b;Pooling=False;MultipleActiveResultSets=True;\
             Asynchronous Processing=True;Application Name=LeaseWeb"
        );
    }

    #[test]
    fn test_configured_application_name() {
        let config = ProxyConfig::default().with_application_name("Billing");
        let proxy =
            ConnectionProxy::<MockConnection>::with_config(Some("Server=a"), config).unwrap();
        assert!(proxy.connection_string().ends_with("Application Name=Billing"));
        assert_eq!(proxy.config().application_name, "Billing");
        assert!(proxy.config().log_lifecycle);
    }

    #[test]
    fn test_call_site_is_captured() {
        let config = ProxyConfig::default().with_component("orders");
        let proxy =
            ConnectionProxy::<MockConnection>::with_config(Some("Server=a"), config).unwrap();
        let line = line!() - 1;

        assert_eq!(proxy.call_site().file, "proxy.rs");
        assert_eq!(proxy.call_site().line, line);
        assert_eq!(proxy.call_site().component.as_deref(), Some("orders"));
    }

    #[test]
    fn test_macro_stamps_component() {
        let proxy = crate::connection_proxy!(MockConnection, Some("Server=a")).unwrap();

        assert_eq!(
            proxy.call_site().component.as_deref(),
            Some(env!("CARGO_PKG_NAME"))
        );
        assert_eq!(proxy.call_site().file, "proxy.rs");
    }

    #[tokio::test]
    async fn test_materialize_opens_lazily() {
        let mut proxy = proxy(E2E);
        let calls = proxy.inner().calls.clone();

        let native = proxy.materialize().await.unwrap();
        assert_eq!(native.state(), ConnectionState::Open);
        assert_eq!(calls.lock().opens, 1);

        proxy.materialize().await.unwrap();
        assert_eq!(calls.lock().opens, 1);
    }

    #[tokio::test]
    async fn test_materialize_none() {
        let result = materialize::<MockConnection>(None).await.unwrap();
        assert!(result.is_none());

        let mut proxy = proxy(E2E);
        let native = materialize(Some(&mut proxy)).await.unwrap();
        assert_eq!(native.map(|n| n.state()), Some(ConnectionState::Open));
    }

    #[tokio::test]
    async fn test_materialize_is_not_logged() {
        let (captured, _guard) = capture::install();
        let mut proxy = proxy(E2E);

        proxy.materialize().await.unwrap();

        assert!(captured.records().is_empty());
    }

    #[tokio::test]
    async fn test_state_mirrors_native_handle() {
        let mut proxy = proxy(E2E);

        let native = proxy.materialize().await.unwrap();
        native.close().await.unwrap();

        assert_eq!(proxy.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_open_logs_after_opening() {
        let (captured, _guard) = capture::install();
        let mut proxy = proxy(E2E);
        let calls = proxy.inner().calls.clone();

        proxy.open().await.unwrap();
        proxy.open().await.unwrap();

        assert_eq!(calls.lock().opens, 1);
        assert_eq!(
            captured.events(),
            vec!["SqlConnection.Open", "SqlConnection.Open"]
        );
        let record = &captured.records()[0];
        assert_eq!(record["severity"], "50000");
        assert_eq!(record["file"], "proxy.rs");
        assert_eq!(proxy.server_version(), Some("1.0"));
    }

    #[tokio::test]
    async fn test_failed_open_is_not_logged() {
        let (captured, _guard) = capture::install();
        let mut proxy = proxy("Server=a;Refuse=yes");

        let result = proxy.open().await;

        assert!(matches!(result, Err(MockError::Refused)));
        assert!(captured.records().is_empty());
        assert_eq!(proxy.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_always_logs_once() {
        let (captured, _guard) = capture::install();
        let mut proxy = proxy(E2E);
        let calls = proxy.inner().calls.clone();

        proxy.close().await.unwrap();
        assert_eq!(captured.events(), vec!["SqlConnection.Close"]);
        assert_eq!(calls.lock().closes, 0);

        proxy.materialize().await.unwrap();
        proxy.close().await.unwrap();
        assert_eq!(
            captured.events(),
            vec!["SqlConnection.Close", "SqlConnection.Close"]
        );
        assert_eq!(calls.lock().closes, 1);
        assert_eq!(proxy.state(), ConnectionState::Closed);
        assert_eq!(captured.records()[1]["severity"], "60000");
    }

    #[tokio::test]
    async fn test_close_error_propagates_after_logging() {
        let (captured, _guard) = capture::install();
        let mut proxy = proxy(E2E);
        proxy.materialize().await.unwrap();
        proxy.inner.broken = true;

        let result = proxy.close().await;

        assert!(matches!(result, Err(MockError::Broken)));
        assert_eq!(captured.events(), vec!["SqlConnection.Close"]);
    }

    #[tokio::test]
    async fn test_dispose_logs_then_disposes() {
        let (captured, _guard) = capture::install();
        let proxy = proxy(E2E);
        let calls = proxy.inner().calls.clone();

        proxy.dispose().await.unwrap();

        assert_eq!(captured.events(), vec!["SqlConnection.Dispose"]);
        assert_eq!(captured.records()[0]["severity"], "70000");
        assert_eq!(calls.lock().disposes, 1);
    }

    #[tokio::test]
    async fn test_lifecycle_logging_can_be_disabled() {
        let (captured, _guard) = capture::install();
        let config = ProxyConfig::default().with_lifecycle_logging(false);
        let mut proxy =
            ConnectionProxy::<MockConnection>::with_config(Some(E2E), config).unwrap();

        proxy.open().await.unwrap();
        proxy.close().await.unwrap();
        proxy.dispose().await.unwrap();

        assert!(captured.records().is_empty());
    }

    #[tokio::test]
    async fn test_transactions_and_commands_are_native() {
        let mut proxy = proxy(E2E);
        let calls = proxy.inner().calls.clone();
        proxy.open().await.unwrap();

        let default = proxy.begin_transaction().await.unwrap();
        let serializable = proxy
            .begin_transaction_with(IsolationLevel::Serializable)
            .await
            .unwrap();

        assert_eq!(default, IsolationLevel::ReadCommitted);
        assert_eq!(serializable, IsolationLevel::Serializable);
        assert_eq!(
            calls.lock().transactions,
            vec![IsolationLevel::ReadCommitted, IsolationLevel::Serializable]
        );
        assert_eq!(
            proxy.create_command().connection_string,
            proxy.connection_string()
        );
    }

    #[tokio::test]
    async fn test_change_database_forwards() {
        let mut proxy = proxy(E2E);
        proxy.change_database("archive").await.unwrap();
        assert_eq!(proxy.database(), "archive");
    }

    #[tokio::test]
    async fn test_pool_operations_delegate() {
        let proxy = proxy(E2E);
        let calls = proxy.inner().calls.clone();
        let before = all_pool_clears();

        ConnectionProxy::<MockConnection>::clear_all_pools()
            .await
            .unwrap();
        ConnectionProxy::clear_pool(proxy.inner()).await.unwrap();

        assert!(all_pool_clears() > before);
        assert_eq!(calls.lock().pool_clears, 1);
    }
}
