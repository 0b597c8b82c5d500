//! SQLite implementation of the driver boundary

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value as JsonValue;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
   SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteStatement,
};
use sqlx::{Executor, Pool, Sqlite, Statement};
use tracing::{debug, trace, warn};

use crate::value::{bind_all, decode_rows};
use crate::{ConnectionOptions, Driver, Error, Isolation, Result, Row, SqliteDriverConfig};

/// An attached SQLite database.
///
/// ## Architecture
///
/// The database maintains two connection pools:
/// - **`read_pool`**: Pool of read-only connections, one per READ transaction
/// - **`write_conn`**: Single-connection pool for WRITE transactions (enforced by max_connections=1)
///
/// Both pools are closed together by [`SqliteDriver::detach`], after which
/// the database refuses new transactions.
#[derive(Debug)]
pub struct SqliteDatabase {
   /// Pool of read-only connections for READ transactions
   read_pool: Pool<Sqlite>,

   /// Single read-write connection pool (max_connections=1) for serialized writes
   write_conn: Pool<Sqlite>,

   /// Marks database as closed to prevent further operations
   closed: AtomicBool,

   /// Set once both pools have finished closing
   detached: AtomicBool,

   close_timeout: Duration,

   path: PathBuf,
}

impl SqliteDatabase {
   pub fn path(&self) -> &Path {
      &self.path
   }

   pub fn is_closed(&self) -> bool {
      self.closed.load(Ordering::Acquire)
   }

   fn read_pool(&self) -> Result<&Pool<Sqlite>> {
      if self.is_closed() {
         return Err(Error::DatabaseClosed);
      }
      Ok(&self.read_pool)
   }

   fn write_pool(&self) -> Result<&Pool<Sqlite>> {
      if self.is_closed() {
         return Err(Error::DatabaseClosed);
      }
      Ok(&self.write_conn)
   }

   /// Close both pools, waiting at most `close_timeout` for connections that
   /// are still checked out.
   ///
   /// New transactions are refused from the first call on. After a timeout the
   /// pools stay closed to new work and a later call waits again.
   async fn close(&self) -> Result<()> {
      if self.detached.load(Ordering::Acquire) {
         return Err(Error::DatabaseClosed);
      }
      self.closed.store(true, Ordering::Release);

      // The writer goes last; read-only connections cannot checkpoint the WAL
      let pools = async {
         self.read_pool.close().await;
         self.write_conn.close().await;
      };
      if tokio::time::timeout(self.close_timeout, pools).await.is_err() {
         warn!(
            path = %self.path.display(),
            timeout_ms = self.close_timeout.as_millis() as u64,
            "Connections still in use, database not detached"
         );
         return Err(Error::CloseTimeout(self.close_timeout));
      }

      self.detached.store(true, Ordering::Release);
      debug!(path = %self.path.display(), "Database pools closed");
      Ok(())
   }
}

/// A transaction running on one pooled connection.
pub struct SqliteTransaction {
   conn: PoolConnection<Sqlite>,
   isolation: Isolation,
   /// True while a `BEGIN` is outstanding on `conn`
   open: bool,
}

impl SqliteTransaction {
   pub fn isolation(&self) -> Isolation {
      self.isolation
   }
}

impl Drop for SqliteTransaction {
   fn drop(&mut self) {
      if self.open {
         // Never hand a connection with an open BEGIN back to the pool; closing
         // it makes SQLite discard the transaction.
         trace!(isolation = %self.isolation, "Closing connection with unfinished transaction");
         self.conn.close_on_drop();
      }
   }
}

/// [`Driver`] backed by SQLx's SQLite support.
///
/// - **READ** transactions run on a read-only connection in autocommit mode, so
///   every statement observes the latest committed data.
/// - **WRITE** transactions take the single write connection and issue
///   `BEGIN IMMEDIATE`. Concurrent writers queue for that connection.
/// - WAL journaling lets readers proceed while a writer holds its transaction.
#[derive(Debug, Clone, Default)]
pub struct SqliteDriver {
   config: SqliteDriverConfig,
}

impl SqliteDriver {
   pub fn new(config: SqliteDriverConfig) -> Self {
      Self { config }
   }

   pub fn config(&self) -> &SqliteDriverConfig {
      &self.config
   }

   async fn open(&self, options: &ConnectionOptions, create: bool) -> Result<SqliteDatabase> {
      options.validate()?;

      if let Some(charset) = &options.charset
         && !matches!(charset.to_ascii_uppercase().as_str(), "UTF8" | "UTF-8")
      {
         return Err(Error::InvalidOptions(format!(
            "SQLite only supports UTF8, got charset {}",
            charset
         )));
      }

      let path = PathBuf::from(&options.database);

      if create {
         if tokio::fs::try_exists(&path).await? {
            return Err(Error::Io(std::io::Error::new(
               std::io::ErrorKind::AlreadyExists,
               format!("database already exists: {}", path.display()),
            )));
         }
         if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
         {
            tokio::fs::create_dir_all(parent).await?;
         }
      }

      // The writer is opened first: it creates the file and switches it to WAL,
      // which read-only connections cannot do themselves.
      let write_options = SqliteConnectOptions::new()
         .filename(&path)
         .create_if_missing(create)
         .journal_mode(SqliteJournalMode::Wal)
         .foreign_keys(true)
         .busy_timeout(self.config.acquire_timeout);

      // min_connections keeps the writer open so the WAL files outlive idle periods
      let write_conn = SqlitePoolOptions::new()
         .max_connections(1)
         .min_connections(1)
         .idle_timeout(self.config.idle_timeout)
         .acquire_timeout(self.config.acquire_timeout)
         .connect_with(write_options)
         .await?;

      // Opened with SQLITE_OPEN_READONLY, so writes fail with SQLITE_READONLY
      let read_options = SqliteConnectOptions::new()
         .filename(&path)
         .read_only(true)
         .busy_timeout(self.config.acquire_timeout);

      let read_pool = match SqlitePoolOptions::new()
         .max_connections(self.config.max_read_connections)
         .idle_timeout(self.config.idle_timeout)
         .acquire_timeout(self.config.acquire_timeout)
         .connect_with(read_options)
         .await
      {
         Ok(pool) => pool,
         Err(e) => {
            write_conn.close().await;
            return Err(e.into());
         }
      };

      debug!(path = %path.display(), create, "Database attached");

      Ok(SqliteDatabase {
         read_pool,
         write_conn,
         closed: AtomicBool::new(false),
         detached: AtomicBool::new(false),
         close_timeout: self.config.close_timeout,
         path,
      })
   }
}

impl Driver for SqliteDriver {
   type Handle = SqliteDatabase;
   type TxHandle = SqliteTransaction;
   type StmtHandle = SqliteStatement<'static>;

   async fn attach(&self, options: &ConnectionOptions) -> Result<SqliteDatabase> {
      self.open(options, false).await
   }

   async fn create(&self, options: &ConnectionOptions) -> Result<SqliteDatabase> {
      self.open(options, true).await
   }

   async fn detach(&self, handle: &SqliteDatabase) -> Result<()> {
      handle.close().await
   }

   async fn start_transaction(
      &self,
      handle: &SqliteDatabase,
      isolation: Isolation,
   ) -> Result<SqliteTransaction> {
      let tx = match isolation {
         Isolation::Read => SqliteTransaction {
            conn: handle.read_pool()?.acquire().await?,
            isolation,
            open: false,
         },
         Isolation::Write => {
            let mut conn = handle.write_pool()?.acquire().await?;
            sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
            SqliteTransaction {
               conn,
               isolation,
               open: true,
            }
         }
      };

      trace!(isolation = %isolation, "Transaction started");
      Ok(tx)
   }

   async fn commit(&self, tx: &mut SqliteTransaction) -> Result<()> {
      if tx.open {
         sqlx::query("COMMIT").execute(&mut *tx.conn).await?;
         tx.open = false;
      }
      Ok(())
   }

   async fn rollback(&self, tx: &mut SqliteTransaction) -> Result<()> {
      if tx.open {
         sqlx::query("ROLLBACK").execute(&mut *tx.conn).await?;
         tx.open = false;
      }
      Ok(())
   }

   async fn prepare(
      &self,
      tx: &mut SqliteTransaction,
      sql: &str,
   ) -> Result<SqliteStatement<'static>> {
      let stmt = Executor::prepare(&mut *tx.conn, sql).await?;
      Ok(Statement::to_owned(&stmt))
   }

   async fn execute(
      &self,
      tx: &mut SqliteTransaction,
      sql: &str,
      params: Vec<JsonValue>,
   ) -> Result<Vec<Row>> {
      let rows = bind_all(sqlx::query(sql), params)
         .fetch_all(&mut *tx.conn)
         .await?;
      decode_rows(rows)
   }

   async fn execute_prepared(
      &self,
      tx: &mut SqliteTransaction,
      stmt: &SqliteStatement<'static>,
      params: Vec<JsonValue>,
   ) -> Result<Vec<Row>> {
      let rows = bind_all(stmt.query(), params)
         .fetch_all(&mut *tx.conn)
         .await?;
      decode_rows(rows)
   }

   async fn release(&self, stmt: SqliteStatement<'static>) -> Result<()> {
      trace!(sql = stmt.sql(), "Statement released");
      drop(stmt);
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;
   use tempfile::TempDir;

   async fn create_test_db() -> (SqliteDriver, SqliteDatabase, TempDir) {
      let temp_dir = TempDir::new().expect("Failed to create temp directory");
      let db_path = temp_dir.path().join("test.db");
      let driver = SqliteDriver::default();
      let db = driver
         .create(&ConnectionOptions::new(db_path.to_string_lossy()))
         .await
         .expect("Failed to create test database");

      (driver, db, temp_dir)
   }

   #[tokio::test]
   async fn test_attach_missing_database_fails() {
      let temp_dir = TempDir::new().unwrap();
      let options = ConnectionOptions::new(temp_dir.path().join("missing.db").to_string_lossy());

      let err = SqliteDriver::default().attach(&options).await.unwrap_err();
      assert!(matches!(err, Error::Sqlx(_)), "{err:?}");
   }

   #[tokio::test]
   async fn test_create_existing_database_fails() {
      let (driver, db, _temp) = create_test_db().await;
      let options = ConnectionOptions::new(db.path().to_string_lossy());

      let err = driver.create(&options).await.unwrap_err();
      assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::AlreadyExists));

      driver.detach(&db).await.unwrap();
   }

   #[tokio::test]
   async fn test_rejects_non_utf8_charset() {
      let temp_dir = TempDir::new().unwrap();
      let options =
         ConnectionOptions::new(temp_dir.path().join("x.db").to_string_lossy()).with_charset("WIN1252");

      let err = SqliteDriver::default().create(&options).await.unwrap_err();
      assert!(matches!(err, Error::InvalidOptions(_)));
   }

   #[tokio::test]
   async fn test_write_then_read_sees_commit() {
      let (driver, db, _temp) = create_test_db().await;

      let mut reader = driver.start_transaction(&db, Isolation::Read).await.unwrap();

      let mut writer = driver.start_transaction(&db, Isolation::Write).await.unwrap();
      driver
         .execute(&mut writer, "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", vec![])
         .await
         .unwrap();
      driver
         .execute(&mut writer, "INSERT INTO t (name) VALUES ($1)", vec![json!("Alice")])
         .await
         .unwrap();
      driver.commit(&mut writer).await.unwrap();
      drop(writer);

      let rows = driver
         .execute(&mut reader, "SELECT name FROM t", vec![])
         .await
         .unwrap();
      assert_eq!(rows.len(), 1);
      assert_eq!(rows[0]["name"], json!("Alice"));

      drop(reader);
      driver.detach(&db).await.unwrap();
   }

   #[tokio::test]
   async fn test_rollback_discards_writes() {
      let (driver, db, _temp) = create_test_db().await;

      let mut writer = driver.start_transaction(&db, Isolation::Write).await.unwrap();
      driver
         .execute(&mut writer, "CREATE TABLE t (id INTEGER)", vec![])
         .await
         .unwrap();
      driver.commit(&mut writer).await.unwrap();
      drop(writer);

      let mut writer = driver.start_transaction(&db, Isolation::Write).await.unwrap();
      driver
         .execute(&mut writer, "INSERT INTO t VALUES (1)", vec![])
         .await
         .unwrap();
      driver.rollback(&mut writer).await.unwrap();
      drop(writer);

      let mut reader = driver.start_transaction(&db, Isolation::Read).await.unwrap();
      let rows = driver
         .execute(&mut reader, "SELECT COUNT(*) AS n FROM t", vec![])
         .await
         .unwrap();
      assert_eq!(rows[0]["n"], json!(0));

      drop(reader);
      driver.detach(&db).await.unwrap();
   }

   #[tokio::test]
   async fn test_read_transaction_rejects_writes() {
      let (driver, db, _temp) = create_test_db().await;

      let mut reader = driver.start_transaction(&db, Isolation::Read).await.unwrap();
      let err = driver
         .execute(&mut reader, "CREATE TABLE t (id INTEGER)", vec![])
         .await
         .unwrap_err();
      assert!(matches!(err, Error::Sqlx(_)));

      drop(reader);
      driver.detach(&db).await.unwrap();
   }

   #[tokio::test]
   async fn test_prepared_statement_executes_repeatedly() {
      let (driver, db, _temp) = create_test_db().await;

      let mut writer = driver.start_transaction(&db, Isolation::Write).await.unwrap();
      driver
         .execute(&mut writer, "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", vec![])
         .await
         .unwrap();

      let stmt = driver
         .prepare(&mut writer, "INSERT INTO t (v) VALUES ($1)")
         .await
         .unwrap();
      for v in ["a", "b", "c"] {
         driver
            .execute_prepared(&mut writer, &stmt, vec![json!(v)])
            .await
            .unwrap();
      }
      driver.release(stmt).await.unwrap();

      let rows = driver
         .execute(&mut writer, "SELECT v FROM t ORDER BY id", vec![])
         .await
         .unwrap();
      assert_eq!(rows.len(), 3);
      assert_eq!(rows[2]["v"], json!("c"));

      driver.commit(&mut writer).await.unwrap();
      drop(writer);
      driver.detach(&db).await.unwrap();
   }

   #[tokio::test]
   async fn test_detach_times_out_while_transaction_open() {
      let temp_dir = TempDir::new().unwrap();
      let driver = SqliteDriver::new(SqliteDriverConfig {
         close_timeout: Duration::from_millis(100),
         ..Default::default()
      });
      let db = driver
         .create(&ConnectionOptions::new(temp_dir.path().join("test.db").to_string_lossy()))
         .await
         .unwrap();

      let mut writer = driver.start_transaction(&db, Isolation::Write).await.unwrap();
      let err = driver.detach(&db).await.unwrap_err();
      assert!(matches!(err, Error::CloseTimeout(_)));
      assert!(db.is_closed());
      assert!(matches!(
         driver.start_transaction(&db, Isolation::Read).await,
         Err(Error::DatabaseClosed)
      ));

      driver.rollback(&mut writer).await.unwrap();
      drop(writer);
      driver.detach(&db).await.unwrap();
      assert!(matches!(driver.detach(&db).await, Err(Error::DatabaseClosed)));
   }

   #[tokio::test]
   async fn test_detach_twice_fails() {
      let (driver, db, _temp) = create_test_db().await;

      driver.detach(&db).await.unwrap();
      assert!(matches!(driver.detach(&db).await, Err(Error::DatabaseClosed)));
      assert!(matches!(
         driver.start_transaction(&db, Isolation::Read).await,
         Err(Error::DatabaseClosed)
      ));
   }
}
