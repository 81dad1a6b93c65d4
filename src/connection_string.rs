//! Parsing, editing and normalization of ADO-style connection strings.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ConnectionStringError;

/// Application name forced into every normalized connection string.
pub const APPLICATION_NAME: &str = "LeaseWeb";

/// Connection-string keywords understood by the proxy and its connectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    DataSource,
    Port,
    InitialCatalog,
    UserId,
    Password,
    IntegratedSecurity,
    Pooling,
    MinPoolSize,
    MaxPoolSize,
    MultipleActiveResultSets,
    AsynchronousProcessing,
    ApplicationName,
    ConnectTimeout,
    Encrypt,
    TrustServerCertificate,
    PacketSize,
    WorkstationId,
    Provider,
}

impl Keyword {
    /// Returns the canonical spelling used when the keyword is written out.
    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::DataSource => "Data Source",
            Keyword::Port => "Port",
            Keyword::InitialCatalog => "Initial Catalog",
            Keyword::UserId => "User ID",
            Keyword::Password => "Password",
            Keyword::IntegratedSecurity => "Integrated Security",
            Keyword::Pooling => "Pooling",
            Keyword::MinPoolSize => "Min Pool Size",
            Keyword::MaxPoolSize => "Max Pool Size",
            Keyword::MultipleActiveResultSets => "MultipleActiveResultSets",
            Keyword::AsynchronousProcessing => "Asynchronous Processing",
            Keyword::ApplicationName => "Application Name",
            Keyword::ConnectTimeout => "Connect Timeout",
            Keyword::Encrypt => "Encrypt",
            Keyword::TrustServerCertificate => "TrustServerCertificate",
            Keyword::PacketSize => "Packet Size",
            Keyword::WorkstationId => "Workstation ID",
            Keyword::Provider => "Provider",
        }
    }

    /// Resolves a key (any casing, any known synonym) to its keyword.
    pub fn lookup(key: &str) -> Option<Keyword> {
        KEYWORDS.get(key.trim().to_lowercase().as_str()).copied()
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static KEYWORDS: Lazy<HashMap<&'static str, Keyword>> = Lazy::new(|| {
    [
        ("data source", Keyword::DataSource),
        ("server", Keyword::DataSource),
        ("address", Keyword::DataSource),
        ("addr", Keyword::DataSource),
        ("network address", Keyword::DataSource),
        ("host", Keyword::DataSource),
        ("port", Keyword::Port),
        ("initial catalog", Keyword::InitialCatalog),
        ("database", Keyword::InitialCatalog),
        ("user id", Keyword::UserId),
        ("uid", Keyword::UserId),
        ("user", Keyword::UserId),
        ("password", Keyword::Password),
        ("pwd", Keyword::Password),
        ("integrated security", Keyword::IntegratedSecurity),
        ("trusted_connection", Keyword::IntegratedSecurity),
        ("pooling", Keyword::Pooling),
        ("min pool size", Keyword::MinPoolSize),
        ("max pool size", Keyword::MaxPoolSize),
        ("multipleactiveresultsets", Keyword::MultipleActiveResultSets),
        ("mars", Keyword::MultipleActiveResultSets),
        ("asynchronous processing", Keyword::AsynchronousProcessing),
        ("async", Keyword::AsynchronousProcessing),
        ("application name", Keyword::ApplicationName),
        ("app", Keyword::ApplicationName),
        ("connect timeout", Keyword::ConnectTimeout),
        ("connection timeout", Keyword::ConnectTimeout),
        ("timeout", Keyword::ConnectTimeout),
        ("encrypt", Keyword::Encrypt),
        ("trustservercertificate", Keyword::TrustServerCertificate),
        ("trust server certificate", Keyword::TrustServerCertificate),
        ("packet size", Keyword::PacketSize),
        ("workstation id", Keyword::WorkstationId),
        ("wsid", Keyword::WorkstationId),
        ("provider", Keyword::Provider),
    ]
    .into_iter()
    .collect()
});

// One `key=value` segment, anchored at the start of the remaining input.
// `==` inside a key stands for a literal `=`; quoted values double their quote.
static ENTRY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<key>(?:==|[^=;\s]|[ \t]+[^=;\s])+)\s*=\s*(?:"(?P<dq>(?:[^"]|"")*)"|'(?P<sq>(?:[^']|'')*)'|(?P<plain>[^;]*?))\s*(?:;|$)"#,
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    key: String,
    keyword: Option<Keyword>,
    value: String,
}

impl Entry {
    fn matches(&self, keyword: Option<Keyword>, key: &str) -> bool {
        match (self.keyword, keyword) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.key.eq_ignore_ascii_case(key.trim()),
            _ => false,
        }
    }
}

/// An ordered, editable connection string.
///
/// Keys keep the spelling and position the caller gave them. Lookups are
/// case-insensitive and treat synonyms (`Server` / `Data Source`, `MARS` /
/// `MultipleActiveResultSets`, ...) as the same keyword. Keys the proxy does
/// not know about are kept verbatim.
///
/// # Example
///
/// ```rust
/// use sql_connection_proxy::{ConnectionStringBuilder, Keyword};
///
/// let mut builder: ConnectionStringBuilder = "Server=db01;Database=sales".parse().unwrap();
/// builder.set_keyword(Keyword::InitialCatalog, "archive");
///
/// assert_eq!(builder.get("Initial Catalog"), Some("archive"));
/// assert_eq!(builder.to_string(), "Server=db01;Database=archive");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStringBuilder {
    entries: Vec<Entry>,
}

impl ConnectionStringBuilder {
    /// Create an empty connection string.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection string.
    ///
    /// A key given more than once keeps its first position and its last value.
    pub fn parse(input: &str) -> Result<Self, ConnectionStringError> {
        let mut builder = Self::new();
        let mut offset = 0;

        loop {
            let rest = &input[offset..];
            let skipped = rest.len()
                - rest
                    .trim_start_matches(|c: char| c == ';' || c.is_whitespace())
                    .len();
            offset += skipped;
            if offset >= input.len() {
                break;
            }

            let rest = &input[offset..];
            let captures = ENTRY_REGEX
                .captures(rest)
                .ok_or(ConnectionStringError::Syntax { offset })?;

            let key = captures["key"].replace("==", "=");
            let value = if let Some(dq) = captures.name("dq") {
                dq.as_str().replace("\"\"", "\"")
            } else if let Some(sq) = captures.name("sq") {
                sq.as_str().replace("''", "'")
            } else {
                let plain = captures.name("plain").map_or("", |m| m.as_str());
                if plain.starts_with('"') || plain.starts_with('\'') {
                    return Err(ConnectionStringError::UnterminatedQuote { offset });
                }
                plain.to_string()
            };

            builder.set(&key, value);
            offset += captures[0].len();
        }

        Ok(builder)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the connection string has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the value for a key or any of its synonyms.
    pub fn get(&self, key: &str) -> Option<&str> {
        let keyword = Keyword::lookup(key);
        self.entries
            .iter()
            .find(|e| e.matches(keyword, key))
            .map(|e| e.value.as_str())
    }

    /// Get the value stored under a keyword, whatever synonym it was written with.
    pub fn get_keyword(&self, keyword: Keyword) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.keyword == Some(keyword))
            .map(|e| e.value.as_str())
    }

    /// Whether a key or any of its synonyms is present.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Read a boolean keyword (`true`/`false`, `yes`/`no`, `1`/`0`).
    pub fn get_bool(&self, keyword: Keyword) -> Result<Option<bool>, ConnectionStringError> {
        let Some(value) = self.get_keyword(keyword) else {
            return Ok(None);
        };
        let parsed = match value.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => true,
            "false" | "no" | "0" => false,
            _ => {
                return Err(ConnectionStringError::InvalidValue {
                    keyword: keyword.as_str(),
                    value: value.to_string(),
                })
            }
        };
        Ok(Some(parsed))
    }

    /// Read an unsigned integer keyword.
    pub fn get_u32(&self, keyword: Keyword) -> Result<Option<u32>, ConnectionStringError> {
        self.get_keyword(keyword)
            .map(|value| {
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConnectionStringError::InvalidValue {
                        keyword: keyword.as_str(),
                        value: value.to_string(),
                    })
            })
            .transpose()
    }

    /// Set a value, replacing an existing entry in place if the key is already present.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let keyword = Keyword::lookup(key);
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|e| e.matches(keyword, key)) {
            entry.value = value;
        } else {
            self.entries.push(Entry {
                key: key.trim().to_string(),
                keyword,
                value,
            });
        }
    }

    /// Set a keyword, writing its canonical name when it is not yet present.
    pub fn set_keyword(&mut self, keyword: Keyword, value: impl Into<String>) {
        self.set(keyword.as_str(), value);
    }

    /// Remove a key and its synonyms, returning the value that was in effect.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let keyword = Keyword::lookup(key);
        let position = self.entries.iter().position(|e| e.matches(keyword, key))?;
        Some(self.entries.remove(position).value)
    }

    /// Iterate over `(key, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.key.as_str(), e.value.as_str()))
    }

    /// Drop any existing entry for `keyword` and append it with its canonical name.
    fn force(&mut self, keyword: Keyword, value: &str) {
        self.entries.retain(|e| e.keyword != Some(keyword));
        self.entries.push(Entry {
            key: keyword.as_str().to_string(),
            keyword: Some(keyword),
            value: value.to_string(),
        });
    }
}

impl FromStr for ConnectionStringBuilder {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionStringBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}=", entry.key.replace('=', "=="))?;
            write_value(f, &entry.value)?;
        }
        Ok(())
    }
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    let needs_quotes = value.contains(';')
        || value.starts_with(['"', '\''])
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace);

    if !needs_quotes {
        f.write_str(value)
    } else if !value.contains('"') {
        write!(f, "\"{value}\"")
    } else if !value.contains('\'') {
        write!(f, "'{value}'")
    } else {
        write!(f, "\"{}\"", value.replace('"', "\"\""))
    }
}

/// Normalize a connection string with the default application name.
///
/// See [`normalize_with`].
pub fn normalize(raw: &str) -> Result<String, ConnectionStringError> {
    normalize_with(raw, APPLICATION_NAME)
}

/// Normalize a connection string.
///
/// Every other key passes through untouched; pooling, MARS, asynchronous
/// processing and the application name are always overwritten and appended
/// in that order.
///
/// ```rust
/// let normalized = sql_connection_proxy::normalize_with("Server=db01;MARS=no", "Billing").unwrap();
/// assert_eq!(
///     normalized,
///     "Server=db01;Pooling=False;MultipleActiveResultSets=True;\
///      Asynchronous Processing=True;Application Name=Billing"
/// );
/// ```
pub fn normalize_with(raw: &str, application_name: &str) -> Result<String, ConnectionStringError> {
    let mut builder = ConnectionStringBuilder::parse(raw)?;
    builder.force(Keyword::Pooling, "False");
    builder.force(Keyword::MultipleActiveResultSets, "True");
    builder.force(Keyword::AsynchronousProcessing, "True");
    builder.force(Keyword::ApplicationName, application_name);
    Ok(builder.to_string())
}
