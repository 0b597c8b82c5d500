//! # sqlx-sqlite-driver
//!
//! The backend boundary used by `sqlx-txn-manager`: attach/detach a database,
//! start READ or WRITE transactions, finalize them, prepare and execute SQL.
//!
//! ## Core Types
//!
//! - **[`Driver`]**: The async operations a backend must provide
//! - **[`SqliteDriver`]**: SQLite backend built on SQLx
//! - **[`ConnectionOptions`]**: Connection descriptor (host, port, database, charset, credentials)
//! - **[`SqliteDriverConfig`]**: Pool settings for the SQLite backend
//! - **[`Error`]**: Error type for driver operations
//!
//! ## Value model
//!
//! Parameters are bound from `serde_json::Value`s and rows come back as
//! [`Row`]s (column name → JSON value, in select-list order). BLOBs are
//! base64 encoded.

mod config;
mod driver;
mod error;
mod sqlite;
mod value;

// Re-export public types
pub use config::{ConnectionOptions, SqliteDriverConfig};
pub use driver::{Driver, Isolation, Row};
pub use error::{Error, Result};
pub use sqlite::{SqliteDatabase, SqliteDriver, SqliteTransaction};
