/// Result type alias for connection and transaction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for connection and transaction lifecycle operations.
///
/// Backend failures keep the driver error as their source, so the backend's
/// diagnostic is available untouched through [`Error::diagnostic`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Connection descriptor is malformed. Only raised at construction.
   #[error("invalid connection options: {0}")]
   Config(#[source] sqlx_sqlite_driver::Error),

   /// Operation requires a live connection.
   #[error("not connected to a database")]
   NotConnected,

   /// `open()`/`create()` called while a handle is already held.
   #[error("already connected to a database")]
   AlreadyConnected,

   /// Backend refused attach, detach or transaction start.
   #[error("connection error: {0}")]
   Connection(#[source] sqlx_sqlite_driver::Error),

   /// Malformed SQL, constraint violation or execution failure.
   #[error("query error: {0}")]
   Query(#[source] sqlx_sqlite_driver::Error),

   /// Transaction has already been committed or rolled back.
   #[error("transaction has already been finalized (committed or rolled back)")]
   TransactionAlreadyFinalized,

   /// Backend rejected commit or rollback.
   #[error("transaction error: {0}")]
   Transaction(#[source] sqlx_sqlite_driver::Error),

   /// An operation failed and the rollback that followed failed too.
   ///
   /// `error` is the failure the caller should act on; `rollback_error` is
   /// context only.
   #[error("{error}; rollback also failed: {rollback_error}")]
   RollbackFailed {
      error: Box<Error>,
      rollback_error: Box<Error>,
   },
}

impl Error {
   /// The failure that triggered this error, looking through any rollback
   /// failure attached to it.
   pub fn primary(&self) -> &Error {
      match self {
         Error::RollbackFailed { error, .. } => error.primary(),
         other => other,
      }
   }

   /// The rollback failure attached to this error, if any.
   pub fn rollback_error(&self) -> Option<&Error> {
      match self {
         Error::RollbackFailed { rollback_error, .. } => Some(rollback_error),
         _ => None,
      }
   }

   /// The backend's own diagnostic message, when the error came from the driver.
   pub fn diagnostic(&self) -> Option<String> {
      match self.primary() {
         Error::Config(e) | Error::Connection(e) | Error::Query(e) | Error::Transaction(e) => {
            Some(e.diagnostic())
         }
         _ => None,
      }
   }

   /// Attach a failed rollback to the error that caused it.
   pub(crate) fn with_rollback_failure(self, rollback_error: Error) -> Error {
      Error::RollbackFailed {
         error: Box::new(self),
         rollback_error: Box::new(rollback_error),
      }
   }

   /// Extract a structured error code from the error type.
   ///
   /// Errors carrying a rollback failure report the code of the original
   /// failure.
   pub fn error_code(&self) -> String {
      match self {
         Error::Config(_) => "CONFIG_ERROR".to_string(),
         Error::NotConnected => "NOT_CONNECTED".to_string(),
         Error::AlreadyConnected => "ALREADY_CONNECTED".to_string(),
         Error::Connection(_) => "CONNECTION_ERROR".to_string(),
         Error::Query(e) => match e {
            sqlx_sqlite_driver::Error::Sqlx(_) => e.code(),
            _ => "QUERY_ERROR".to_string(),
         },
         Error::TransactionAlreadyFinalized => "TRANSACTION_ALREADY_FINALIZED".to_string(),
         Error::Transaction(_) => "TRANSACTION_ERROR".to_string(),
         Error::RollbackFailed { error, .. } => error.error_code(),
      }
   }
}
