//! Error types for sqlx-sqlite-driver

use std::time::Duration;

use thiserror::Error;

/// Errors that may occur at the driver boundary
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when accessing database files. Standard library IO errors
   /// are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// Connection descriptor failed validation
   #[error("invalid connection options: {0}")]
   InvalidOptions(String),

   /// SQLite type that cannot be mapped to JSON
   #[error("unsupported datatype: {0}")]
   UnsupportedDatatype(String),

   /// Database has been closed and cannot be used
   #[error("Database has been closed")]
   DatabaseClosed,

   /// Connections were still checked out when the close timeout ran out
   #[error("timed out after {0:?} waiting for open transactions before closing")]
   CloseTimeout(Duration),

   /// Failure reported by a backend that has no richer error type
   #[error("{0}")]
   Other(String),
}

impl Error {
   /// The backend's own diagnostic text, without any wrapper prefix.
   ///
   /// For database errors this is the message SQLite produced (for example
   /// `UNIQUE constraint failed: users.email`).
   pub fn diagnostic(&self) -> String {
      match self {
         Error::Sqlx(e) => match e.as_database_error() {
            Some(db_err) => db_err.message().to_string(),
            None => e.to_string(),
         },
         Error::Io(e) => e.to_string(),
         Error::InvalidOptions(msg) | Error::UnsupportedDatatype(msg) | Error::Other(msg) => {
            msg.clone()
         }
         Error::DatabaseClosed | Error::CloseTimeout(_) => self.to_string(),
      }
   }

   /// Machine-readable error code.
   pub fn code(&self) -> String {
      match self {
         Error::Sqlx(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::Io(_) => "IO_ERROR".to_string(),
         Error::InvalidOptions(_) => "INVALID_OPTIONS".to_string(),
         Error::UnsupportedDatatype(_) => "UNSUPPORTED_DATATYPE".to_string(),
         Error::DatabaseClosed => "DATABASE_CLOSED".to_string(),
         Error::CloseTimeout(_) => "CLOSE_TIMEOUT".to_string(),
         Error::Other(_) => "DRIVER_ERROR".to_string(),
      }
   }
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_code_sqlx_non_database() {
      // RowNotFound is not a database error, so no SQLite code
      let err = Error::Sqlx(sqlx::Error::RowNotFound);
      assert_eq!(err.code(), "SQLX_ERROR");
   }

   #[test]
   fn test_diagnostic_is_untouched() {
      let err = Error::Other("constraint violated".into());
      assert_eq!(err.diagnostic(), "constraint violated");
      assert_eq!(err.to_string(), "constraint violated");
      assert_eq!(err.code(), "DRIVER_ERROR");
   }

   #[test]
   fn test_code_io() {
      let err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
      assert_eq!(err.code(), "IO_ERROR");
      assert_eq!(err.diagnostic(), "missing");
   }

   #[test]
   fn test_code_database_closed() {
      assert_eq!(Error::DatabaseClosed.code(), "DATABASE_CLOSED");
   }

   #[test]
   fn test_code_close_timeout() {
      let err = Error::CloseTimeout(Duration::from_millis(250));
      assert_eq!(err.code(), "CLOSE_TIMEOUT");
      assert!(err.diagnostic().contains("250ms"));
   }
}
