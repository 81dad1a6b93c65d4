//! SeaORM-backed native connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbBackend,
    DbErr, ExecResult, QueryResult, Statement, TransactionTrait, Value,
};
use url::Url;

use crate::connection_string::{ConnectionStringBuilder, Keyword};
use crate::error::ConnectionStringError;
use crate::native::{ConnectionState, IsolationLevel, NativeConnection};

const DEFAULT_MAX_POOL_SIZE: u32 = 100;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

// Live handle shared between a connection and the commands it created.
type Handle = Arc<RwLock<Option<DatabaseConnection>>>;

// Shared pools for connections opened with `Pooling=True`, keyed by connection string.
static SHARED_POOLS: Lazy<Mutex<HashMap<String, DatabaseConnection>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

impl From<ConnectionStringError> for DbErr {
    fn from(err: ConnectionStringError) -> Self {
        DbErr::Custom(err.to_string())
    }
}

/// Database engines a [`SeaOrmConnection`] can reach, chosen with `Provider=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provider {
    #[default]
    Postgres,
    MySql,
    Sqlite,
}

impl Provider {
    fn parse(value: &str) -> Result<Self, ConnectionStringError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Provider::Postgres),
            "mysql" | "mariadb" => Ok(Provider::MySql),
            "sqlite" => Ok(Provider::Sqlite),
            _ => Err(ConnectionStringError::InvalidValue {
                keyword: Keyword::Provider.as_str(),
                value: value.to_string(),
            }),
        }
    }

    fn backend(&self) -> DbBackend {
        match self {
            Provider::Postgres => DbBackend::Postgres,
            Provider::MySql => DbBackend::MySql,
            Provider::Sqlite => DbBackend::Sqlite,
        }
    }

    fn version_query(&self) -> &'static str {
        match self {
            Provider::Postgres => "SHOW server_version",
            Provider::MySql => "SELECT VERSION()",
            Provider::Sqlite => "SELECT sqlite_version()",
        }
    }
}

/// Connection settings read out of a connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Settings {
    provider: Provider,
    data_source: String,
    host: String,
    port: Option<u16>,
    database: String,
    user: Option<String>,
    password: Option<String>,
    application_name: Option<String>,
    connect_timeout: Option<Duration>,
    pooling: bool,
    min_pool_size: u32,
    max_pool_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            data_source: String::new(),
            host: String::new(),
            port: None,
            database: String::new(),
            user: None,
            password: None,
            application_name: None,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            pooling: true,
            min_pool_size: 0,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
        }
    }
}

impl Settings {
    fn parse(connection_string: &str) -> Result<Self, ConnectionStringError> {
        let builder = ConnectionStringBuilder::parse(connection_string)?;
        let text = |keyword: Keyword| builder.get_keyword(keyword).map(str::to_string);

        let provider = match builder.get_keyword(Keyword::Provider) {
            Some(value) => Provider::parse(value)?,
            None => Provider::default(),
        };

        let data_source = text(Keyword::DataSource).unwrap_or_default();
        let address = strip_protocol(&data_source);
        let (host, mut port) = match address.split_once(',') {
            Some((host, port)) => (host.trim().to_string(), Some(parse_port(port)?)),
            None => (address.to_string(), None),
        };
        if port.is_none() {
            port = builder
                .get_keyword(Keyword::Port)
                .map(parse_port)
                .transpose()?;
        }

        // Zero waits indefinitely.
        let connect_timeout = match builder.get_u32(Keyword::ConnectTimeout)? {
            None => Some(DEFAULT_CONNECT_TIMEOUT),
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs.into())),
        };

        Ok(Self {
            provider,
            data_source,
            host,
            port,
            database: text(Keyword::InitialCatalog).unwrap_or_default(),
            user: text(Keyword::UserId),
            password: text(Keyword::Password),
            application_name: text(Keyword::ApplicationName),
            connect_timeout,
            pooling: builder.get_bool(Keyword::Pooling)?.unwrap_or(true),
            min_pool_size: builder.get_u32(Keyword::MinPoolSize)?.unwrap_or(0),
            max_pool_size: builder
                .get_u32(Keyword::MaxPoolSize)?
                .unwrap_or(DEFAULT_MAX_POOL_SIZE),
        })
    }

    /// Build the SeaORM connection URL.
    fn url(&self) -> Result<String, DbErr> {
        let scheme = match self.provider {
            Provider::Sqlite => {
                return Ok(match self.data_source.trim() {
                    "" | ":memory:" => "sqlite::memory:".to_string(),
                    path => format!("sqlite://{path}?mode=rwc"),
                });
            }
            Provider::Postgres => "postgres",
            Provider::MySql => "mysql",
        };

        let host = if self.host.is_empty() {
            "localhost"
        } else {
            self.host.as_str()
        };
        let invalid = |what: &str| DbErr::Custom(format!("invalid {what} in connection string"));

        let mut url = Url::parse(&format!("{scheme}://{host}")).map_err(|_| invalid("host"))?;
        url.set_port(self.port).map_err(|_| invalid("port"))?;
        if let Some(user) = &self.user {
            url.set_username(user).map_err(|_| invalid("user id"))?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password.as_str()))
                .map_err(|_| invalid("password"))?;
        }
        url.set_path(&self.database);
        if self.provider == Provider::Postgres {
            if let Some(name) = &self.application_name {
                url.query_pairs_mut().append_pair("application_name", name);
            }
        }
        Ok(url.into())
    }

    fn connect_options(&self) -> Result<ConnectOptions, DbErr> {
        let mut options = ConnectOptions::new(self.url()?);
        if let Some(timeout) = self.connect_timeout {
            options.connect_timeout(timeout);
        }
        if self.pooling {
            options
                .min_connections(self.min_pool_size)
                .max_connections(self.max_pool_size.max(1));
        } else {
            options.min_connections(0).max_connections(1);
        }
        Ok(options)
    }
}

fn strip_protocol(data_source: &str) -> &str {
    let trimmed = data_source.trim();
    match trimmed.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("tcp:") => &trimmed[4..],
        _ => trimmed,
    }
}

fn parse_port(value: &str) -> Result<u16, ConnectionStringError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConnectionStringError::InvalidValue {
            keyword: Keyword::Port.as_str(),
            value: value.to_string(),
        })
}

/// A native connection that opens SeaORM connections from ADO-style
/// connection strings.
///
/// `Provider=postgres|mysql|sqlite` picks the engine (PostgreSQL when absent).
/// With `Pooling=False` each open gets a private single-connection pool that
/// is torn down on close. Otherwise connections with the same connection
/// string share one pool for the whole process, which
/// [`clear_all_pools`](NativeConnection::clear_all_pools) and
/// [`clear_pool`](NativeConnection::clear_pool) tear down.
#[derive(Debug, Default)]
pub struct SeaOrmConnection {
    connection_string: String,
    settings: Settings,
    inner: Handle,
    server_version: Option<String>,
}

impl SeaOrmConnection {
    /// The open SeaORM connection, if any.
    pub fn connection(&self) -> Option<DatabaseConnection> {
        self.inner.read().clone()
    }

    fn is_open(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Engine selected by the connection string.
    pub fn provider(&self) -> Provider {
        self.settings.provider
    }

    fn open_connection(&self) -> Result<DatabaseConnection, DbErr> {
        self.connection()
            .ok_or_else(|| DbErr::Custom("connection is closed".to_string()))
    }

    async fn connect(&self) -> Result<DatabaseConnection, DbErr> {
        if !self.settings.pooling {
            return Database::connect(self.settings.connect_options()?).await;
        }

        let existing = SHARED_POOLS.lock().get(&self.connection_string).cloned();
        if let Some(pool) = existing {
            return Ok(pool);
        }

        let pool = Database::connect(self.settings.connect_options()?).await?;
        tracing::debug!(
            provider = ?self.settings.provider,
            data_source = %self.settings.data_source,
            "created shared connection pool"
        );
        Ok(SHARED_POOLS
            .lock()
            .entry(self.connection_string.clone())
            .or_insert(pool)
            .clone())
    }
}

#[async_trait]
impl NativeConnection for SeaOrmConnection {
    type Transaction = DatabaseTransaction;
    type Command = SeaOrmCommand;
    type Error = DbErr;

    fn new(connection_string: Option<&str>) -> Result<Self, Self::Error> {
        let mut connection = Self::default();
        if let Some(connection_string) = connection_string {
            connection.set_connection_string(connection_string)?;
        }
        Ok(connection)
    }

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn set_connection_string(&mut self, connection_string: &str) -> Result<(), Self::Error> {
        if self.is_open() {
            return Err(DbErr::Custom(
                "the connection string cannot be changed while the connection is open"
                    .to_string(),
            ));
        }
        self.settings = Settings::parse(connection_string)?;
        self.connection_string = connection_string.to_string();
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        if self.is_open() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    fn database(&self) -> &str {
        &self.settings.database
    }

    fn data_source(&self) -> &str {
        &self.settings.data_source
    }

    fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    async fn open(&mut self) -> Result<(), Self::Error> {
        if self.is_open() {
            return Err(DbErr::Custom("connection is already open".to_string()));
        }

        let connection = self.connect().await?;
        let statement = Statement::from_string(
            self.settings.provider.backend(),
            self.settings.provider.version_query(),
        );
        let version = match connection.query_one(statement).await? {
            Some(row) => Some(row.try_get_by_index::<String>(0)?),
            None => None,
        };

        self.server_version = version;
        *self.inner.write() = Some(connection);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.server_version = None;
        let connection = self.inner.write().take();
        match connection {
            // Shared pools outlive the connections drawn from them.
            Some(connection) if !self.settings.pooling => connection.close().await,
            _ => Ok(()),
        }
    }

    async fn change_database(&mut self, database: &str) -> Result<(), Self::Error> {
        self.open_connection()?;

        let mut builder = ConnectionStringBuilder::parse(&self.connection_string)?;
        builder.set_keyword(Keyword::InitialCatalog, database);

        self.close().await?;
        self.set_connection_string(&builder.to_string())?;
        self.open().await
    }

    async fn begin_transaction(
        &self,
        isolation_level: IsolationLevel,
    ) -> Result<Self::Transaction, Self::Error> {
        let connection = self.open_connection()?;

        let isolation_level = match (self.settings.provider, isolation_level) {
            (_, IsolationLevel::Snapshot) => {
                return Err(DbErr::Custom(
                    "snapshot isolation is not supported by this provider".to_string(),
                ))
            }
            // SQLite transactions are always serializable.
            (Provider::Sqlite, _) => None,
            (_, IsolationLevel::ReadUncommitted) => Some(sea_orm::IsolationLevel::ReadUncommitted),
            (_, IsolationLevel::ReadCommitted) => Some(sea_orm::IsolationLevel::ReadCommitted),
            (_, IsolationLevel::RepeatableRead) => Some(sea_orm::IsolationLevel::RepeatableRead),
            (_, IsolationLevel::Serializable) => Some(sea_orm::IsolationLevel::Serializable),
        };

        connection.begin_with_config(isolation_level, None).await
    }

    fn create_command(&self) -> Self::Command {
        SeaOrmCommand {
            connection: Arc::clone(&self.inner),
            backend: self.settings.provider.backend(),
            text: String::new(),
            parameters: Vec::new(),
        }
    }

    async fn dispose(self) -> Result<(), Self::Error> {
        let mut connection = self;
        connection.close().await
    }

    async fn clear_all_pools() -> Result<(), Self::Error> {
        let pools: Vec<DatabaseConnection> = SHARED_POOLS.lock().drain().map(|(_, p)| p).collect();
        for pool in pools {
            pool.close().await?;
        }
        Ok(())
    }

    async fn clear_pool(connection: &Self) -> Result<(), Self::Error> {
        let pool = SHARED_POOLS.lock().remove(&connection.connection_string);
        match pool {
            Some(pool) => pool.close().await,
            None => Ok(()),
        }
    }
}

/// A statement bound to the connection it was created from.
///
/// The command follows its connection: it runs on whatever the connection has
/// open at execution time and fails while the connection is closed.
#[derive(Debug, Clone)]
pub struct SeaOrmCommand {
    connection: Handle,
    backend: DbBackend,
    text: String,
    parameters: Vec<Value>,
}

impl SeaOrmCommand {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace the SQL text.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Append a positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.parameters.push(value.into());
        self
    }

    fn statement(&self) -> Result<(DatabaseConnection, Statement), DbErr> {
        let connection = self
            .connection
            .read()
            .clone()
            .ok_or_else(|| DbErr::Custom("command requires an open connection".to_string()))?;
        let statement =
            Statement::from_sql_and_values(self.backend, self.text.as_str(), self.parameters.clone());
        Ok((connection, statement))
    }

    pub async fn execute(&self) -> Result<ExecResult, DbErr> {
        let (connection, statement) = self.statement()?;
        connection.execute(statement).await
    }

    pub async fn query_one(&self) -> Result<Option<QueryResult>, DbErr> {
        let (connection, statement) = self.statement()?;
        connection.query_one(statement).await
    }

    pub async fn query_all(&self) -> Result<Vec<QueryResult>, DbErr> {
        let (connection, statement) = self.statement()?;
        connection.query_all(statement).await
    }
}
