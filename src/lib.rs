//! # sqlx-txn-manager
//!
//! Connection and transaction lifecycle management on top of a
//! [`Driver`](sqlx_sqlite_driver::Driver).
//!
//! ## Core Types
//!
//! - **[`ConnectionManager`]**: Owns the attachment, caches one shared READ
//!   transaction per open epoch, hands out fresh WRITE transactions, and wraps
//!   units of work in commit/rollback
//! - **[`Transaction`]**: One backend transaction, `Active` until exactly one
//!   commit or rollback
//! - **[`PreparedStatement`]**: A compiled statement bound to its transaction
//! - **[`QueryExecutor`]**: Maps driver execution onto the crate's error type
//! - **[`Error`]**: Error type for all of the above
//!
//! ## Example
//!
//! ```no_run
//! use serde_json::json;
//! use sqlx_txn_manager::{ConnectionManager, ConnectionOptions};
//!
//! # async fn example() -> sqlx_txn_manager::Result<()> {
//! let db = ConnectionManager::sqlite(ConnectionOptions::new("app.db"))?;
//! db.open().await?;
//!
//! db.query_write("INSERT INTO users (name) VALUES ($1)", vec![json!("Alice")])
//!    .await?;
//! let rows = db.query_read("SELECT name FROM users", vec![]).await?;
//! assert_eq!(rows[0]["name"], json!("Alice"));
//!
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

mod activity;
mod error;
mod executor;
mod manager;
mod statement;
mod transaction;

pub use error::{Error, Result};
pub use executor::QueryExecutor;
pub use manager::ConnectionManager;
pub use statement::PreparedStatement;
pub use transaction::{Transaction, TransactionState};

pub use sqlx_sqlite_driver::{
   ConnectionOptions, Driver, Isolation, Row, SqliteDriver, SqliteDriverConfig,
};
