//! MySQL engine connection.

use sqlx::mysql::{MySqlConnectOptions, MySqlConnection as SqlxConnection, MySqlRow};
use sqlx::{Column, ConnectOptions, Executor, Row, Statement, TypeInfo, ValueRef};
use tracing::warn;

use crate::config::ConnectionParams;
use crate::error::{BridgeError, Result};
use crate::row::ResultSet;
use crate::value::{SqlNullType, SqlValue};

/// One physical MySQL connection.
///
/// Same contract as the PostgreSQL engine: statements run inside an
/// implicit transaction, a failed statement rolls the transaction back and
/// surfaces a Command error, and the connection itself stays open.
pub(crate) struct MysqlConnection {
    conn: SqlxConnection,
    in_txn: bool,
}

impl MysqlConnection {
    /// A single connection attempt; the caller owns retry policy.
    pub(crate) async fn connect_once(
        params: &ConnectionParams,
        password: &str,
    ) -> std::result::Result<Self, String> {
        let options = MySqlConnectOptions::new()
            .host(&params.host)
            .port(params.port())
            .database(&params.database)
            .username(&params.user)
            .password(password);

        let conn = options.connect().await.map_err(|e| e.to_string())?;
        Ok(Self {
            conn,
            in_txn: false,
        })
    }

    pub(crate) async fn execute(&mut self, sql: &str) -> Result<Option<ResultSet>> {
        self.ensure_transaction().await?;
        match self.run_statement(sql).await {
            Ok(result) => Ok(result),
            Err(detail) => {
                self.rollback_after_failure().await;
                Err(BridgeError::command(sql, detail))
            }
        }
    }

    pub(crate) async fn commit(&mut self) -> Result<()> {
        if self.in_txn {
            sqlx::query("COMMIT").execute(&mut self.conn).await?;
            self.in_txn = false;
        }
        Ok(())
    }

    pub(crate) async fn rollback(&mut self) -> Result<()> {
        if self.in_txn {
            sqlx::query("ROLLBACK").execute(&mut self.conn).await?;
            self.in_txn = false;
        }
        Ok(())
    }

    async fn ensure_transaction(&mut self) -> Result<()> {
        if !self.in_txn {
            sqlx::query("START TRANSACTION")
                .execute(&mut self.conn)
                .await?;
            self.in_txn = true;
        }
        Ok(())
    }

    async fn run_statement(&mut self, sql: &str) -> std::result::Result<Option<ResultSet>, String> {
        let columns: Vec<String> = {
            let stmt = (&mut self.conn)
                .prepare(sql)
                .await
                .map_err(|e| e.to_string())?;
            stmt.columns().iter().map(|c| c.name().to_string()).collect()
        };

        if columns.is_empty() {
            sqlx::query(sql)
                .execute(&mut self.conn)
                .await
                .map_err(|e| e.to_string())?;
            return Ok(None);
        }

        let my_rows: Vec<MySqlRow> = sqlx::query(sql)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| e.to_string())?;

        let rows = my_rows
            .iter()
            .map(|row| (0..columns.len()).map(|idx| decode_value(row, idx)).collect())
            .collect();

        Ok(Some(ResultSet { columns, rows }))
    }

    async fn rollback_after_failure(&mut self) {
        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut self.conn).await {
            warn!("rollback after failed statement also failed: {}", e);
        }
        self.in_txn = false;
    }
}

/// Convert one field of a row to [`SqlValue`], keyed by the column's type
/// name. Unknown types fall back to their string form.
fn decode_value(row: &MySqlRow, idx: usize) -> SqlValue {
    let type_name = row.column(idx).type_info().name().to_lowercase();

    let is_null = row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true);
    if is_null {
        return SqlValue::Null(null_type_for(&type_name));
    }

    match type_name.as_str() {
        "tinyint" => row
            .try_get::<i8, _>(idx)
            .map(|v| SqlValue::I16(v as i16))
            .unwrap_or(SqlValue::Null(SqlNullType::I16)),
        "smallint" | "year" => row
            .try_get::<i16, _>(idx)
            .map(SqlValue::I16)
            .unwrap_or(SqlValue::Null(SqlNullType::I16)),
        "mediumint" | "int" | "integer" => row
            .try_get::<i32, _>(idx)
            .map(SqlValue::I32)
            .unwrap_or(SqlValue::Null(SqlNullType::I32)),
        "bigint" => row
            .try_get::<i64, _>(idx)
            .map(SqlValue::I64)
            .unwrap_or(SqlValue::Null(SqlNullType::I64)),
        "float" => row
            .try_get::<f32, _>(idx)
            .map(SqlValue::F32)
            .unwrap_or(SqlValue::Null(SqlNullType::F32)),
        "double" | "real" => row
            .try_get::<f64, _>(idx)
            .map(SqlValue::F64)
            .unwrap_or(SqlValue::Null(SqlNullType::F64)),
        "decimal" | "numeric" => row
            .try_get::<rust_decimal::Decimal, _>(idx)
            .map(SqlValue::Decimal)
            .unwrap_or(SqlValue::Null(SqlNullType::Decimal)),
        "bit" | "boolean" | "bool" => row
            .try_get::<bool, _>(idx)
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null(SqlNullType::Bool)),
        "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" => row
            .try_get::<Vec<u8>, _>(idx)
            .map(SqlValue::Bytes)
            .unwrap_or(SqlValue::Null(SqlNullType::Bytes)),
        "date" => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .map(SqlValue::Date)
            .unwrap_or(SqlValue::Null(SqlNullType::Date)),
        "time" => row
            .try_get::<chrono::NaiveTime, _>(idx)
            .map(SqlValue::Time)
            .unwrap_or(SqlValue::Null(SqlNullType::Time)),
        "datetime" | "timestamp" => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null(SqlNullType::DateTime)),
        _ => row
            .try_get::<String, _>(idx)
            .map(SqlValue::String)
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
    }
}

fn null_type_for(type_name: &str) -> SqlNullType {
    match type_name {
        "tinyint" | "smallint" | "year" => SqlNullType::I16,
        "mediumint" | "int" | "integer" => SqlNullType::I32,
        "bigint" => SqlNullType::I64,
        "float" => SqlNullType::F32,
        "double" | "real" => SqlNullType::F64,
        "decimal" | "numeric" => SqlNullType::Decimal,
        "bit" | "boolean" | "bool" => SqlNullType::Bool,
        "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" => {
            SqlNullType::Bytes
        }
        "date" => SqlNullType::Date,
        "time" => SqlNullType::Time,
        "datetime" | "timestamp" => SqlNullType::DateTime,
        _ => SqlNullType::String,
    }
}
