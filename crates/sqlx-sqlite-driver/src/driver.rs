//! The driver boundary consumed by the transaction manager

use std::fmt;
use std::future::Future;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::{ConnectionOptions, Result};

/// One result row, keyed by column name in select-list order.
pub type Row = IndexMap<String, JsonValue>;

/// Isolation level requested when starting a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Isolation {
   /// Read-only, sees data committed by other transactions
   Read,
   /// Read/write, finalized by exactly one commit or rollback
   Write,
}

impl fmt::Display for Isolation {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Isolation::Read => f.write_str("READ"),
         Isolation::Write => f.write_str("WRITE"),
      }
   }
}

/// Opaque backend operations.
///
/// Each method is a single suspension point that resolves to success or one
/// error; implementations do not retry. Handles are exclusively owned by the
/// caller that received them.
pub trait Driver: Send + Sync + 'static {
   /// An attachment to one database
   type Handle: Send + Sync + 'static;
   /// A started transaction
   type TxHandle: Send + 'static;
   /// A compiled statement bound to the transaction it was prepared on
   type StmtHandle: Send + Sync + 'static;

   /// Attach to an existing database.
   fn attach(&self, options: &ConnectionOptions) -> impl Future<Output = Result<Self::Handle>> + Send;

   /// Initialise a new database and attach to it.
   fn create(&self, options: &ConnectionOptions) -> impl Future<Output = Result<Self::Handle>> + Send;

   /// Release an attachment. Transactions started on it must not be used afterwards.
   fn detach(&self, handle: &Self::Handle) -> impl Future<Output = Result<()>> + Send;

   fn start_transaction(
      &self,
      handle: &Self::Handle,
      isolation: Isolation,
   ) -> impl Future<Output = Result<Self::TxHandle>> + Send;

   fn commit(&self, tx: &mut Self::TxHandle) -> impl Future<Output = Result<()>> + Send;

   fn rollback(&self, tx: &mut Self::TxHandle) -> impl Future<Output = Result<()>> + Send;

   fn prepare(
      &self,
      tx: &mut Self::TxHandle,
      sql: &str,
   ) -> impl Future<Output = Result<Self::StmtHandle>> + Send;

   fn execute(
      &self,
      tx: &mut Self::TxHandle,
      sql: &str,
      params: Vec<JsonValue>,
   ) -> impl Future<Output = Result<Vec<Row>>> + Send;

   fn execute_prepared(
      &self,
      tx: &mut Self::TxHandle,
      stmt: &Self::StmtHandle,
      params: Vec<JsonValue>,
   ) -> impl Future<Output = Result<Vec<Row>>> + Send;

   /// Release a compiled statement.
   fn release(&self, stmt: Self::StmtHandle) -> impl Future<Output = Result<()>> + Send;
}
