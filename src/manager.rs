use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use sqlx_sqlite_driver::{ConnectionOptions, Driver, Isolation, Row, SqliteDriver};
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tracing::{debug, warn};

use crate::activity::Activity;
use crate::statement::PreparedStatement;
use crate::transaction::Transaction;
use crate::{Error, Result};

/// Create-once slot for the shared READ transaction of one connection epoch.
type ReadSlot<D> = Arc<OnceCell<Arc<Transaction<D>>>>;

/// Owns one database attachment and the transactions started on it.
///
/// ## Transactions
///
/// - **Read**: one shared READ transaction per open epoch, created on first
///   use and reused by every read call until [`close`](Self::close) or
///   [`discard_read_transaction`](Self::discard_read_transaction). It is never
///   committed.
/// - **Write**: a fresh WRITE transaction for every request, finalized by
///   exactly one commit or rollback.
///
/// ## Activity
///
/// Every entry point records activity before doing any I/O, and so does every
/// transaction handed out by this manager. [`idle_duration`](Self::idle_duration)
/// reports the time since then so an external reaper can close idle
/// connections; the manager itself runs no timers.
pub struct ConnectionManager<D: Driver> {
   driver: Arc<D>,
   options: ConnectionOptions,
   handle: RwLock<Option<Arc<D::Handle>>>,
   read_tx: Mutex<ReadSlot<D>>,
   activity: Arc<Activity>,
   /// Serializes open/create/close
   lifecycle: AsyncMutex<()>,
   /// Set while `close` runs; new work fails with `NotConnected`
   closing: AtomicBool,
}

impl ConnectionManager<SqliteDriver> {
   /// Manager for a SQLite database using the default pool settings
   pub fn sqlite(options: ConnectionOptions) -> Result<Self> {
      Self::new(SqliteDriver::default(), options)
   }
}

impl<D: Driver> ConnectionManager<D> {
   /// Validate `options` and build a disconnected manager.
   ///
   /// Malformed options fail here with [`Error::Config`], never on later use.
   pub fn new(driver: D, options: ConnectionOptions) -> Result<Self> {
      options.validate().map_err(Error::Config)?;

      Ok(Self {
         driver: Arc::new(driver),
         options,
         handle: RwLock::new(None),
         read_tx: Mutex::new(Arc::new(OnceCell::new())),
         activity: Arc::new(Activity::new()),
         lifecycle: AsyncMutex::new(()),
         closing: AtomicBool::new(false),
      })
   }

   pub fn options(&self) -> &ConnectionOptions {
      &self.options
   }

   pub fn driver(&self) -> &D {
      &self.driver
   }

   /// Attach to an existing database
   pub async fn open(&self) -> Result<()> {
      self.activity.touch();
      let _lifecycle = self.lifecycle.lock().await;
      if self.is_connected() {
         return Err(Error::AlreadyConnected);
      }

      let handle = self
         .driver
         .attach(&self.options)
         .await
         .map_err(Error::Connection)?;

      self.install(handle);
      debug!(database = %self.options.database, "Connection opened");
      Ok(())
   }

   /// Initialise a new database and attach to it
   pub async fn create(&self) -> Result<()> {
      self.activity.touch();
      let _lifecycle = self.lifecycle.lock().await;
      if self.is_connected() {
         return Err(Error::AlreadyConnected);
      }

      let handle = self
         .driver
         .create(&self.options)
         .await
         .map_err(Error::Connection)?;

      self.install(handle);
      debug!(database = %self.options.database, "Database created");
      Ok(())
   }

   fn install(&self, handle: D::Handle) {
      *self.read_tx.lock() = Arc::new(OnceCell::new());
      *self.handle.write() = Some(Arc::new(handle));
   }

   /// Roll back the shared READ transaction, if any, and detach.
   ///
   /// New work fails with [`Error::NotConnected`] as soon as close starts. A
   /// READ transaction still being created is waited for and rolled back. If
   /// that rollback fails the failure is logged; it is only returned, attached
   /// to the detach error, when detaching fails as well.
   ///
   /// The handle is only released once the driver has detached. If detaching
   /// fails, or the returned future is dropped before it finishes, the manager
   /// stays connected and close can be called again.
   pub async fn close(&self) -> Result<()> {
      self.activity.touch();
      let _lifecycle = self.lifecycle.lock().await;
      let handle = self.handle()?;
      let _closing = ClosingGuard::set(&self.closing);

      let slot = Arc::clone(&*self.read_tx.lock());
      let rollback_error = match settle(&slot).await {
         Some(tx) => finalize_read(&tx).await.err(),
         None => None,
      };

      if let Err(e) = self.driver.detach(&handle).await {
         let error = Error::Connection(e);
         return Err(match rollback_error {
            Some(rollback_error) => error.with_rollback_failure(rollback_error),
            None => error,
         });
      }

      *self.handle.write() = None;
      *self.read_tx.lock() = Arc::new(OnceCell::new());

      if let Some(rollback_error) = rollback_error {
         warn!(error = %rollback_error, "Read transaction rollback failed during close");
      }
      debug!(database = %self.options.database, "Connection closed");
      Ok(())
   }

   /// Whether a handle is held and no close is in progress
   pub fn is_connected(&self) -> bool {
      !self.closing.load(Ordering::Acquire) && self.handle.read().is_some()
   }

   fn handle(&self) -> Result<Arc<D::Handle>> {
      if self.closing.load(Ordering::Acquire) {
         return Err(Error::NotConnected);
      }
      self.handle.read().clone().ok_or(Error::NotConnected)
   }

   async fn start_transaction(&self, isolation: Isolation) -> Result<Arc<Transaction<D>>> {
      let handle = self.handle()?;
      let tx_handle = self
         .driver
         .start_transaction(&handle, isolation)
         .await
         .map_err(Error::Connection)?;

      let tx = Transaction::new(
         Arc::clone(&self.driver),
         Arc::clone(&self.activity),
         isolation,
         tx_handle,
      );
      debug!(tx_id = tx.id(), isolation = %isolation, "Transaction started");
      Ok(Arc::new(tx))
   }

   /// The shared READ transaction, started on first use.
   ///
   /// Callers that arrive while the first start is still in flight wait for it
   /// and receive the same transaction. A failed start is not cached; the next
   /// caller tries again. If a caller committed or rolled back the shared
   /// transaction, it is replaced by a fresh one.
   pub async fn get_read_transaction(&self) -> Result<Arc<Transaction<D>>> {
      self.activity.touch();
      loop {
         if !self.is_connected() {
            return Err(Error::NotConnected);
         }

         let slot = Arc::clone(&*self.read_tx.lock());
         let tx = slot
            .get_or_try_init(|| self.start_transaction(Isolation::Read))
            .await?;
         if !tx.is_finalized() {
            return Ok(Arc::clone(tx));
         }

         {
            let mut current = self.read_tx.lock();
            // Another caller may have replaced it already
            if Arc::ptr_eq(&*current, &slot) {
               *current = Arc::new(OnceCell::new());
               debug!(tx_id = tx.id(), "Replacing finalized read transaction");
            }
         }
      }
   }

   /// A new WRITE transaction owned by the caller
   pub async fn get_write_transaction(&self) -> Result<Arc<Transaction<D>>> {
      self.activity.touch();
      self.start_transaction(Isolation::Write).await
   }

   /// Roll back the shared READ transaction so the next read starts a fresh
   /// one. Returns whether there was one to discard.
   pub async fn discard_read_transaction(&self) -> Result<bool> {
      self.activity.touch();
      if !self.is_connected() {
         return Err(Error::NotConnected);
      }

      let previous = std::mem::replace(&mut *self.read_tx.lock(), Arc::new(OnceCell::new()));
      match settle(&previous).await {
         Some(tx) => {
            finalize_read(&tx).await?;
            Ok(true)
         }
         None => Ok(false),
      }
   }

   /// Run `sql` on a transaction obtained from this manager
   pub async fn query(
      &self,
      tx: &Transaction<D>,
      sql: &str,
      params: Vec<JsonValue>,
   ) -> Result<Vec<Row>> {
      self.activity.touch();
      tx.query(sql, params).await
   }

   /// Run `sql` on the shared READ transaction
   pub async fn query_read(&self, sql: &str, params: Vec<JsonValue>) -> Result<Vec<Row>> {
      let tx = self.get_read_transaction().await?;
      tx.query(sql, params).await
   }

   /// Run `sql` in its own WRITE transaction, committing on success
   pub async fn query_write(&self, sql: &str, params: Vec<JsonValue>) -> Result<Vec<Row>> {
      self
         .run_in_write_transaction(move |tx| async move { tx.query(sql, params).await })
         .await
   }

   /// Run `action` against a fresh WRITE transaction.
   ///
   /// This method:
   /// 1. Starts a WRITE transaction
   /// 2. Runs `action` with it
   /// 3. Commits on success and returns the action's value
   /// 4. Rolls back if the action or the commit fails
   ///
   /// The error from step 2 or 3 is always the one returned. If the rollback
   /// fails too, its error is attached ([`Error::RollbackFailed`]) and
   /// [`Error::primary`] still yields the original. `action` must not commit
   /// or roll back the transaction itself.
   pub async fn run_in_write_transaction<T, F, Fut>(&self, action: F) -> Result<T>
   where
      F: FnOnce(Arc<Transaction<D>>) -> Fut,
      Fut: Future<Output = Result<T>>,
   {
      let tx = self.get_write_transaction().await?;

      let outcome = match action(Arc::clone(&tx)).await {
         Ok(value) => tx.commit().await.map(|()| value),
         Err(e) => Err(e),
      };

      let error = match outcome {
         Ok(value) => return Ok(value),
         Err(e) => e,
      };

      match tx.rollback().await {
         Ok(()) | Err(Error::TransactionAlreadyFinalized) => Err(error),
         Err(rollback_error) => {
            warn!(
               tx_id = tx.id(),
               error = %error,
               rollback_error = %rollback_error,
               "Rollback after failed write transaction also failed"
            );
            Err(error.with_rollback_failure(rollback_error))
         }
      }
   }

   /// Compile `sql` against a transaction obtained from this manager
   pub async fn prepare_statement(
      &self,
      tx: &Arc<Transaction<D>>,
      sql: &str,
   ) -> Result<PreparedStatement<D>> {
      self.activity.touch();
      tx.prepare_statement(sql).await
   }

   /// Compile `sql` against the shared READ transaction
   pub async fn prepare_read_statement(&self, sql: &str) -> Result<PreparedStatement<D>> {
      let tx = self.get_read_transaction().await?;
      tx.prepare_statement(sql).await
   }

   /// Scoped form of [`prepare_read_statement`](Self::prepare_read_statement);
   /// see [`Transaction::with_statement`].
   pub async fn with_read_statement<T, F>(&self, sql: &str, f: F) -> Result<T>
   where
      F: for<'s> FnOnce(&'s PreparedStatement<D>) -> BoxFuture<'s, Result<T>>,
   {
      let tx = self.get_read_transaction().await?;
      tx.with_statement(sql, f).await
   }

   /// Time since the last recorded activity. No I/O.
   pub fn idle_duration(&self) -> Duration {
      self.activity.idle()
   }

   /// Close the connection if it has been idle for longer than `max_idle`.
   ///
   /// Returns `true` when this call closed it.
   pub async fn close_if_idle(&self, max_idle: Duration) -> Result<bool> {
      if !self.is_connected() || self.idle_duration() <= max_idle {
         return Ok(false);
      }

      debug!(idle_ms = self.idle_duration().as_millis() as u64, "Closing idle connection");
      match self.close().await {
         Ok(()) => Ok(true),
         // Closed concurrently by someone else
         Err(Error::NotConnected) => Ok(false),
         Err(e) => Err(e),
      }
   }
}

impl<D: Driver> Drop for ConnectionManager<D> {
   fn drop(&mut self) {
      if self.handle.get_mut().is_some() {
         warn!(
            database = %self.options.database,
            "ConnectionManager dropped while connected; close() was not called"
         );
      }
   }
}

/// Marks a close in progress until dropped, including when the close future
/// is cancelled.
struct ClosingGuard<'a>(&'a AtomicBool);

impl<'a> ClosingGuard<'a> {
   fn set(flag: &'a AtomicBool) -> Self {
      flag.store(true, Ordering::Release);
      Self(flag)
   }
}

impl Drop for ClosingGuard<'_> {
   fn drop(&mut self) {
      self.0.store(false, Ordering::Release);
   }
}

/// Wait for an in-flight READ transaction start, if any, and return the
/// transaction it produced.
async fn settle<D: Driver>(slot: &OnceCell<Arc<Transaction<D>>>) -> Option<Arc<Transaction<D>>> {
   slot
      .get_or_try_init(|| async { Err::<Arc<Transaction<D>>, ()>(()) })
      .await
      .ok()
      .cloned()
}

/// Roll back a READ transaction. One that a caller already finalized counts as
/// done.
async fn finalize_read<D: Driver>(tx: &Transaction<D>) -> Result<()> {
   match tx.rollback().await {
      Ok(()) | Err(Error::TransactionAlreadyFinalized) => Ok(()),
      Err(e) => Err(e),
   }
}
