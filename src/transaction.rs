//! Transaction lifecycle: `Active` until exactly one commit or rollback.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use serde_json::Value as JsonValue;
use sqlx_sqlite_driver::{Driver, Isolation, Row};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::activity::Activity;
use crate::executor::QueryExecutor;
use crate::statement::PreparedStatement;
use crate::{Error, Result};

/// Externally visible state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
   Active,
   Committed,
   RolledBack,
}

enum Slot<H> {
   Active(H),
   Committed,
   RolledBack,
}

impl<H> Slot<H> {
   fn active_mut(&mut self) -> Result<&mut H> {
      match self {
         Slot::Active(handle) => Ok(handle),
         Slot::Committed | Slot::RolledBack => Err(Error::TransactionAlreadyFinalized),
      }
   }

   fn state(&self) -> TransactionState {
      match self {
         Slot::Active(_) => TransactionState::Active,
         Slot::Committed => TransactionState::Committed,
         Slot::RolledBack => TransactionState::RolledBack,
      }
   }
}

/// One backend transaction.
///
/// The transaction exclusively owns its driver handle. Operations on the same
/// transaction are serialized, so a shared READ transaction can be queried
/// from many tasks at once. Once committed or rolled back every further
/// operation fails with [`Error::TransactionAlreadyFinalized`].
pub struct Transaction<D: Driver> {
   id: String,
   isolation: Isolation,
   driver: Arc<D>,
   activity: Arc<Activity>,
   slot: Mutex<Slot<D::TxHandle>>,
   /// Mirrors `slot` leaving `Active`, readable without the lock
   finalized: AtomicBool,
}

impl<D: Driver> Transaction<D> {
   pub(crate) fn new(
      driver: Arc<D>,
      activity: Arc<Activity>,
      isolation: Isolation,
      handle: D::TxHandle,
   ) -> Self {
      Self {
         id: Uuid::new_v4().to_string(),
         isolation,
         driver,
         activity,
         slot: Mutex::new(Slot::Active(handle)),
         finalized: AtomicBool::new(false),
      }
   }

   pub fn id(&self) -> &str {
      &self.id
   }

   pub fn isolation(&self) -> Isolation {
      self.isolation
   }

   pub async fn state(&self) -> TransactionState {
      self.slot.lock().await.state()
   }

   /// Whether commit or rollback has run. Does not wait for an operation in
   /// progress.
   pub fn is_finalized(&self) -> bool {
      self.finalized.load(Ordering::Acquire)
   }

   /// Execute a statement and return its rows
   pub async fn query(&self, sql: &str, params: Vec<JsonValue>) -> Result<Vec<Row>> {
      self.activity.touch();
      let mut slot = self.slot.lock().await;
      let handle = slot.active_mut()?;
      QueryExecutor::new(&*self.driver)
         .execute(handle, sql, params)
         .await
   }

   /// Commit this transaction
   ///
   /// A commit the backend rejects leaves the transaction active so that it
   /// can still be rolled back.
   pub async fn commit(&self) -> Result<()> {
      self.activity.touch();
      let mut slot = self.slot.lock().await;
      self
         .driver
         .commit(slot.active_mut()?)
         .await
         .map_err(Error::Transaction)?;

      // Dropping the handle returns its connection to the backend
      *slot = Slot::Committed;
      self.finalized.store(true, Ordering::Release);
      debug!(tx_id = %self.id, isolation = %self.isolation, "Transaction committed");
      Ok(())
   }

   /// Rollback this transaction
   ///
   /// The transaction is finalized even when the backend reports a failure;
   /// its handle is released either way.
   pub async fn rollback(&self) -> Result<()> {
      self.activity.touch();
      let mut slot = self.slot.lock().await;
      let result = self.driver.rollback(slot.active_mut()?).await;
      *slot = Slot::RolledBack;
      self.finalized.store(true, Ordering::Release);

      match result {
         Ok(()) => {
            debug!(tx_id = %self.id, isolation = %self.isolation, "Transaction rolled back");
            Ok(())
         }
         Err(e) => {
            warn!(tx_id = %self.id, error = %e, "Rollback failed, handle released");
            Err(Error::Transaction(e))
         }
      }
   }

   /// Compile `sql` against this transaction
   pub async fn prepare_statement(self: &Arc<Self>, sql: &str) -> Result<PreparedStatement<D>> {
      self.activity.touch();
      let mut slot = self.slot.lock().await;
      let handle = QueryExecutor::new(&*self.driver)
         .prepare(slot.active_mut()?, sql)
         .await?;

      Ok(PreparedStatement::new(Arc::clone(self), sql, handle))
   }

   /// Prepare `sql`, hand the statement to `f`, and dispose of it afterwards
   /// whether `f` succeeded or not.
   ///
   /// An error from `f` is returned in preference to a disposal error.
   ///
   /// ```ignore
   /// let counts = tx
   ///    .with_statement("SELECT COUNT(*) AS n FROM users WHERE team = $1", |stmt| {
   ///       Box::pin(async move {
   ///          let a = stmt.execute(vec![json!("red")]).await?;
   ///          let b = stmt.execute(vec![json!("blue")]).await?;
   ///          Ok((a, b))
   ///       })
   ///    })
   ///    .await?;
   /// ```
   pub async fn with_statement<T, F>(self: &Arc<Self>, sql: &str, f: F) -> Result<T>
   where
      F: for<'s> FnOnce(&'s PreparedStatement<D>) -> BoxFuture<'s, Result<T>>,
   {
      let stmt = self.prepare_statement(sql).await?;
      let result = f(&stmt).await;

      match (result, stmt.dispose().await) {
         (Ok(value), Ok(())) => Ok(value),
         (Ok(_), Err(dispose_error)) => Err(dispose_error),
         (Err(e), Ok(())) => Err(e),
         (Err(e), Err(dispose_error)) => {
            warn!(tx_id = %self.id, error = %dispose_error, "Statement disposal failed");
            Err(e)
         }
      }
   }

   pub(crate) async fn execute_prepared(
      &self,
      stmt: &D::StmtHandle,
      params: Vec<JsonValue>,
   ) -> Result<Vec<Row>> {
      self.activity.touch();
      let mut slot = self.slot.lock().await;
      QueryExecutor::new(&*self.driver)
         .execute_prepared(slot.active_mut()?, stmt, params)
         .await
   }

   pub(crate) async fn release(&self, stmt: D::StmtHandle) -> Result<()> {
      self.activity.touch();
      self.driver.release(stmt).await.map_err(Error::Query)
   }
}

impl<D: Driver> fmt::Debug for Transaction<D> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Transaction")
         .field("id", &self.id)
         .field("isolation", &self.isolation)
         .finish_non_exhaustive()
   }
}

impl<D: Driver> Drop for Transaction<D> {
   fn drop(&mut self) {
      if matches!(self.slot.get_mut(), Slot::Active(_)) {
         // The driver handle is dropped with us; backends discard the open
         // transaction when its handle goes away.
         warn!(
            tx_id = %self.id,
            isolation = %self.isolation,
            "Transaction dropped while still active"
         );
      }
   }
}
