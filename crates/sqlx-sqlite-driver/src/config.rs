//! Connection descriptor and SQLite driver configuration

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Connection descriptor handed to [`Driver::attach`](crate::Driver::attach)
/// and [`Driver::create`](crate::Driver::create).
///
/// Only `database` is required. Backends ignore the fields that have no meaning
/// for them (SQLite has no host, port or credentials).
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_driver::ConnectionOptions;
///
/// let options = ConnectionOptions::new("app.db").with_charset("UTF8");
/// assert!(options.validate().is_ok());
///
/// let options: ConnectionOptions =
///    serde_json::from_str(r#"{ "database": "app.db", "user": "sysdba" }"#).unwrap();
/// assert_eq!(options.user.as_deref(), Some("sysdba"));
/// ```
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConnectionOptions {
   pub host: Option<String>,
   pub port: Option<u16>,
   /// Database name or file path
   pub database: String,
   pub charset: Option<String>,
   pub user: Option<String>,
   pub password: Option<String>,
}

impl ConnectionOptions {
   pub fn new(database: impl Into<String>) -> Self {
      Self {
         database: database.into(),
         ..Default::default()
      }
   }

   pub fn with_host(mut self, host: impl Into<String>, port: Option<u16>) -> Self {
      self.host = Some(host.into());
      self.port = port;
      self
   }

   pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
      self.charset = Some(charset.into());
      self
   }

   pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
      self.user = Some(user.into());
      self.password = Some(password.into());
      self
   }

   /// Check the descriptor for values no backend could accept.
   pub fn validate(&self) -> Result<()> {
      if self.database.trim().is_empty() {
         return Err(Error::InvalidOptions("database must not be empty".into()));
      }

      match (&self.host, self.port) {
         (_, Some(0)) => return Err(Error::InvalidOptions("port must be non-zero".into())),
         (None, Some(port)) => {
            return Err(Error::InvalidOptions(format!(
               "port {} given without a host",
               port
            )));
         }
         (Some(host), _) if host.trim().is_empty() => {
            return Err(Error::InvalidOptions("host must not be empty".into()));
         }
         _ => {}
      }

      if let Some(charset) = &self.charset
         && charset.trim().is_empty()
      {
         return Err(Error::InvalidOptions("charset must not be empty".into()));
      }

      if self.password.is_some() && self.user.is_none() {
         return Err(Error::InvalidOptions("password given without a user".into()));
      }

      Ok(())
   }
}

impl fmt::Debug for ConnectionOptions {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("ConnectionOptions")
         .field("host", &self.host)
         .field("port", &self.port)
         .field("database", &self.database)
         .field("charset", &self.charset)
         .field("user", &self.user)
         .field("password", &self.password.as_ref().map(|_| "<redacted>"))
         .finish()
   }
}

/// Configuration for [`SqliteDriver`](crate::SqliteDriver) connection pools
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_driver::SqliteDriverConfig;
/// use std::time::Duration;
///
/// // Override just one field
/// let config = SqliteDriverConfig {
///     max_read_connections: 3,
///     ..Default::default()
/// };
/// assert_eq!(config.acquire_timeout, Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqliteDriverConfig {
   /// Maximum number of concurrent read connections
   ///
   /// Every READ transaction holds one of these for its whole lifetime.
   ///
   /// Default: 6
   pub max_read_connections: u32,

   /// Idle timeout for pooled connections that are not held by a transaction
   ///
   /// Default: 30 seconds
   pub idle_timeout: Duration,

   /// How long a transaction start waits for a free connection
   ///
   /// Write transactions share one connection, so a second concurrent writer
   /// waits here until the first one commits or rolls back.
   ///
   /// Default: 30 seconds
   pub acquire_timeout: Duration,

   /// How long detaching waits for transactions that still hold a connection
   ///
   /// When it runs out the detach fails with
   /// [`Error::CloseTimeout`](crate::Error::CloseTimeout). The database stays
   /// closed to new transactions and detaching can be retried once the
   /// outstanding ones are finalized.
   ///
   /// Default: 30 seconds
   pub close_timeout: Duration,
}

impl Default for SqliteDriverConfig {
   fn default() -> Self {
      Self {
         max_read_connections: 6,
         idle_timeout: Duration::from_secs(30),
         acquire_timeout: Duration::from_secs(30),
         close_timeout: Duration::from_secs(30),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_valid_options() {
      assert!(ConnectionOptions::new("main.db").validate().is_ok());
      assert!(
         ConnectionOptions::new("employee")
            .with_host("db.internal", Some(3050))
            .with_credentials("sysdba", "masterkey")
            .with_charset("UTF8")
            .validate()
            .is_ok()
      );
   }

   #[test]
   fn test_invalid_options() {
      let cases = [
         ConnectionOptions::new(""),
         ConnectionOptions::new("  "),
         ConnectionOptions::new("db").with_host("h", Some(0)),
         ConnectionOptions {
            port: Some(3050),
            ..ConnectionOptions::new("db")
         },
         ConnectionOptions::new("db").with_host("", None),
         ConnectionOptions::new("db").with_charset(""),
         ConnectionOptions {
            password: Some("secret".into()),
            ..ConnectionOptions::new("db")
         },
      ];

      for options in cases {
         let err = options.validate().unwrap_err();
         assert!(matches!(err, Error::InvalidOptions(_)), "{options:?}");
      }
   }

   #[test]
   fn test_debug_redacts_password() {
      let options = ConnectionOptions::new("db").with_credentials("sysdba", "masterkey");
      let debug = format!("{options:?}");
      assert!(debug.contains("sysdba"));
      assert!(!debug.contains("masterkey"));
   }

   #[test]
   fn test_deserialize_rejects_unknown_fields() {
      let result: std::result::Result<ConnectionOptions, _> =
         serde_json::from_str(r#"{ "database": "db", "hostname": "x" }"#);
      assert!(result.is_err());
   }
}
