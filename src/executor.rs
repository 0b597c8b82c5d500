use serde_json::Value as JsonValue;
use sqlx_sqlite_driver::{Driver, Row};
use tracing::trace;

use crate::{Error, Result};

/// Runs SQL against a transaction handle and maps every backend failure to
/// [`Error::Query`]. Never retries.
pub struct QueryExecutor<'d, D: Driver> {
   driver: &'d D,
}

impl<'d, D: Driver> QueryExecutor<'d, D> {
   pub fn new(driver: &'d D) -> Self {
      Self { driver }
   }

   pub async fn execute(
      &self,
      tx: &mut D::TxHandle,
      sql: &str,
      params: Vec<JsonValue>,
   ) -> Result<Vec<Row>> {
      trace!(sql, params = params.len(), "Executing query");
      self.driver.execute(tx, sql, params).await.map_err(Error::Query)
   }

   pub async fn execute_prepared(
      &self,
      tx: &mut D::TxHandle,
      stmt: &D::StmtHandle,
      params: Vec<JsonValue>,
   ) -> Result<Vec<Row>> {
      trace!(params = params.len(), "Executing prepared statement");
      self
         .driver
         .execute_prepared(tx, stmt, params)
         .await
         .map_err(Error::Query)
   }

   pub async fn prepare(&self, tx: &mut D::TxHandle, sql: &str) -> Result<D::StmtHandle> {
      trace!(sql, "Preparing statement");
      self.driver.prepare(tx, sql).await.map_err(Error::Query)
   }
}
