//! Conversion between JSON values and SQLite parameters/columns

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value as JsonValue;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow, SqliteValueRef};
use sqlx::{Column, Row as _, TypeInfo, Value, ValueRef};

use crate::{Error, Result, Row};

/// Bind a JSON value to a SQLx query
pub(crate) fn bind_value<'a>(
   query: Query<'a, Sqlite, SqliteArguments<'a>>,
   value: JsonValue,
) -> Query<'a, Sqlite, SqliteArguments<'a>> {
   match value {
      JsonValue::Null => query.bind(None::<JsonValue>),
      JsonValue::String(s) => query.bind(s),
      JsonValue::Bool(b) => query.bind(b),
      JsonValue::Number(number) => {
         // Preserve integer precision by binding as i64 when possible
         if let Some(int_val) = number.as_i64() {
            query.bind(int_val)
         } else if let Some(uint_val) = number.as_u64() {
            // u64 above i64::MAX does not fit SQLite's INTEGER, fall back to REAL
            query.bind(uint_val as f64)
         } else {
            query.bind(number.as_f64().unwrap_or_default())
         }
      }
      other => query.bind(other),
   }
}

pub(crate) fn bind_all<'a>(
   mut query: Query<'a, Sqlite, SqliteArguments<'a>>,
   values: Vec<JsonValue>,
) -> Query<'a, Sqlite, SqliteArguments<'a>> {
   for value in values {
      query = bind_value(query, value);
   }
   query
}

/// Decode SQLite rows to JSON objects, preserving column order
pub(crate) fn decode_rows(rows: Vec<SqliteRow>) -> Result<Vec<Row>> {
   let mut values = Vec::with_capacity(rows.len());
   for row in rows {
      let mut value = Row::default();
      for (i, column) in row.columns().iter().enumerate() {
         let v = row.try_get_raw(i)?;
         value.insert(column.name().to_string(), to_json(v)?);
      }
      values.push(value);
   }
   Ok(values)
}

/// Decode a single column value to JSON
pub(crate) fn to_json(v: SqliteValueRef<'_>) -> Result<JsonValue> {
   if v.is_null() {
      return Ok(JsonValue::Null);
   }

   let type_name = v.type_info().name().to_string();
   let value = ValueRef::to_owned(&v);

   let json = match type_name.as_str() {
      "TEXT" | "DATE" | "TIME" | "DATETIME" => {
         JsonValue::String(value.try_decode_unchecked::<String>()?)
      }
      "INTEGER" | "BOOLEAN" => JsonValue::from(value.try_decode_unchecked::<i64>()?),
      "REAL" => JsonValue::from(value.try_decode_unchecked::<f64>()?),
      "NUMERIC" => {
         let real = value.try_decode_unchecked::<f64>()?;
         if real.fract() == 0.0 && real.abs() < i64::MAX as f64 {
            JsonValue::from(real as i64)
         } else {
            JsonValue::from(real)
         }
      }
      "BLOB" => JsonValue::String(STANDARD.encode(value.try_decode_unchecked::<Vec<u8>>()?)),
      "NULL" => JsonValue::Null,
      other => return Err(Error::UnsupportedDatatype(other.to_string())),
   };

   Ok(json)
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;
   use sqlx::{Connection, SqliteConnection};

   async fn roundtrip(sql: &str, values: Vec<JsonValue>) -> Vec<Row> {
      let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
      let rows = bind_all(sqlx::query(sql), values)
         .fetch_all(&mut conn)
         .await
         .unwrap();
      decode_rows(rows).unwrap()
   }

   #[tokio::test]
   async fn test_decode_storage_classes() {
      let rows = roundtrip(
         "SELECT NULL AS n, 42 AS i, 1.5 AS r, 'hi' AS t, X'48656C6C6F' AS b",
         vec![],
      )
      .await;

      assert_eq!(rows[0]["n"], JsonValue::Null);
      assert_eq!(rows[0]["i"], json!(42));
      assert_eq!(rows[0]["r"], json!(1.5));
      assert_eq!(rows[0]["t"], json!("hi"));
      assert_eq!(rows[0]["b"], json!("SGVsbG8="));
   }

   #[tokio::test]
   async fn test_bind_preserves_large_integers() {
      let large_int: i64 = 9_007_199_254_740_993;
      let rows = roundtrip("SELECT $1 AS big, $2 AS s", vec![json!(large_int), json!("x")]).await;

      assert_eq!(rows[0]["big"], json!(large_int));
      assert_eq!(rows[0]["s"], json!("x"));
   }

   #[tokio::test]
   async fn test_column_order_preserved() {
      let rows = roundtrip("SELECT 1 AS z, 2 AS a, 3 AS m", vec![]).await;
      let keys: Vec<&String> = rows[0].keys().collect();
      assert_eq!(keys, vec!["z", "a", "m"]);
   }
}
