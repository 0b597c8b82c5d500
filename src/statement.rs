use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx_sqlite_driver::{Driver, Row};
use tracing::trace;

use crate::transaction::Transaction;
use crate::Result;

/// A compiled statement bound to the transaction it was prepared on.
///
/// Executing it after that transaction is committed or rolled back fails with
/// [`Error::TransactionAlreadyFinalized`](crate::Error::TransactionAlreadyFinalized)
/// instead of reaching the backend. Release it with [`dispose`](Self::dispose),
/// or use [`Transaction::with_statement`] to have that done on every exit path.
pub struct PreparedStatement<D: Driver> {
   transaction: Arc<Transaction<D>>,
   sql: String,
   handle: D::StmtHandle,
}

impl<D: Driver> PreparedStatement<D> {
   pub(crate) fn new(transaction: Arc<Transaction<D>>, sql: &str, handle: D::StmtHandle) -> Self {
      Self {
         transaction,
         sql: sql.to_string(),
         handle,
      }
   }

   pub fn sql(&self) -> &str {
      &self.sql
   }

   pub fn transaction(&self) -> &Arc<Transaction<D>> {
      &self.transaction
   }

   /// Run the statement with a fresh set of parameters
   pub async fn execute(&self, params: Vec<JsonValue>) -> Result<Vec<Row>> {
      self.transaction.execute_prepared(&self.handle, params).await
   }

   /// Release the compiled statement
   pub async fn dispose(self) -> Result<()> {
      let Self {
         transaction,
         sql,
         handle,
      } = self;

      transaction.release(handle).await?;
      trace!(tx_id = transaction.id(), sql = %sql, "Statement disposed");
      Ok(())
   }
}

impl<D: Driver> fmt::Debug for PreparedStatement<D> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("PreparedStatement")
         .field("transaction", &self.transaction.id())
         .field("sql", &self.sql)
         .finish_non_exhaustive()
   }
}
