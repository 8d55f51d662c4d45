//! PostgreSQL engine connection.

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::warn;

use crate::config::ConnectionParams;
use crate::error::{BridgeError, Result};
use crate::row::ResultSet;
use crate::value::{SqlNullType, SqlValue};

const COPY_BUFFER_SIZE: usize = 8192;

/// One physical PostgreSQL connection plus its driver task.
///
/// Statements run inside an implicit transaction: BEGIN is issued before
/// the first statement after open, commit, or rollback, matching how the
/// legacy callers' driver behaved.
pub(crate) struct PgConnection {
    client: Client,
    driver: JoinHandle<()>,
    in_txn: bool,
}

impl PgConnection {
    /// A single connection attempt; the caller owns retry policy.
    pub(crate) async fn connect_once(
        params: &ConnectionParams,
        password: &str,
    ) -> std::result::Result<Self, String> {
        let mut config = PgConfig::new();
        config.host(&params.host);
        config.port(params.port());
        config.dbname(&params.database);
        config.user(&params.user);
        config.password(password);

        let (client, connection) = config.connect(NoTls).await.map_err(|e| e.to_string())?;
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("postgres connection task ended: {}", e);
            }
        });

        Ok(Self {
            client,
            driver,
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
            self.client.batch_execute("COMMIT").await?;
            self.in_txn = false;
        }
        Ok(())
    }

    pub(crate) async fn rollback(&mut self) -> Result<()> {
        if self.in_txn {
            self.client.batch_execute("ROLLBACK").await?;
            self.in_txn = false;
        }
        Ok(())
    }

    /// Stream `source` into the table through the COPY protocol.
    pub(crate) async fn copy_from<R>(
        &mut self,
        mut source: R,
        table: &str,
        delimiter: char,
        null_token: &str,
        columns: Option<&[String]>,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.ensure_transaction().await?;
        let copy_sql = build_copy_statement(table, delimiter, null_token, columns);
        match self.stream_copy(&mut source, &copy_sql).await {
            Ok(rows) => Ok(rows),
            Err(detail) => {
                self.rollback_after_failure().await;
                Err(BridgeError::command(copy_sql, detail))
            }
        }
    }

    async fn ensure_transaction(&mut self) -> Result<()> {
        if !self.in_txn {
            self.client.batch_execute("BEGIN").await?;
            self.in_txn = true;
        }
        Ok(())
    }

    async fn run_statement(&mut self, sql: &str) -> std::result::Result<Option<ResultSet>, String> {
        let stmt = self.client.prepare(sql).await.map_err(|e| e.to_string())?;

        // no column descriptors means no rows can come back at all, which
        // callers must distinguish from a SELECT matching zero rows
        if stmt.columns().is_empty() {
            self.client
                .execute(&stmt, &[])
                .await
                .map_err(|e| e.to_string())?;
            return Ok(None);
        }

        let columns: Vec<String> = stmt
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let pg_rows = self
            .client
            .query(&stmt, &[])
            .await
            .map_err(|e| e.to_string())?;

        let mut rows = Vec::with_capacity(pg_rows.len());
        for row in &pg_rows {
            let mut values = Vec::with_capacity(columns.len());
            for (idx, col) in row.columns().iter().enumerate() {
                values.push(decode_value(row, idx, col.type_().name()));
            }
            rows.push(values);
        }

        Ok(Some(ResultSet { columns, rows }))
    }

    async fn stream_copy<R>(
        &mut self,
        source: &mut R,
        copy_sql: &str,
    ) -> std::result::Result<u64, String>
    where
        R: AsyncRead + Unpin,
    {
        let sink = self
            .client
            .copy_in(copy_sql)
            .await
            .map_err(|e| e.to_string())?;
        tokio::pin!(sink);

        let mut chunk = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = source.read(&mut chunk).await.map_err(|e| e.to_string())?;
            if n == 0 {
                break;
            }
            sink.send(Bytes::copy_from_slice(&chunk[..n]))
                .await
                .map_err(|e| e.to_string())?;
        }

        sink.finish().await.map_err(|e| e.to_string())
    }

    async fn rollback_after_failure(&mut self) {
        if let Err(e) = self.client.batch_execute("ROLLBACK").await {
            warn!("rollback after failed statement also failed: {}", e);
        }
        self.in_txn = false;
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn build_copy_statement(
    table: &str,
    delimiter: char,
    null_token: &str,
    columns: Option<&[String]>,
) -> String {
    let col_list = match columns {
        Some(cols) if !cols.is_empty() => format!(" ({})", cols.join(", ")),
        _ => String::new(),
    };
    format!(
        "COPY {}{} FROM STDIN WITH (FORMAT text, DELIMITER '{}', NULL '{}')",
        table,
        col_list,
        escape_literal(&delimiter.to_string()),
        escape_literal(null_token)
    )
}

fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

/// Convert one field of a row to [`SqlValue`], keyed by the column's
/// declared type name. Unknown types fall back to their string form.
fn decode_value(row: &tokio_postgres::Row, idx: usize, type_name: &str) -> SqlValue {
    match type_name {
        "bool" => row
            .try_get::<_, bool>(idx)
            .ok()
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null(SqlNullType::Bool)),
        "int2" => row
            .try_get::<_, i16>(idx)
            .ok()
            .map(SqlValue::I16)
            .unwrap_or(SqlValue::Null(SqlNullType::I16)),
        "int4" => row
            .try_get::<_, i32>(idx)
            .ok()
            .map(SqlValue::I32)
            .unwrap_or(SqlValue::Null(SqlNullType::I32)),
        "int8" => row
            .try_get::<_, i64>(idx)
            .ok()
            .map(SqlValue::I64)
            .unwrap_or(SqlValue::Null(SqlNullType::I64)),
        "float4" => row
            .try_get::<_, f32>(idx)
            .ok()
            .map(SqlValue::F32)
            .unwrap_or(SqlValue::Null(SqlNullType::F32)),
        "float8" => row
            .try_get::<_, f64>(idx)
            .ok()
            .map(SqlValue::F64)
            .unwrap_or(SqlValue::Null(SqlNullType::F64)),
        "numeric" => row
            .try_get::<_, rust_decimal::Decimal>(idx)
            .ok()
            .map(SqlValue::Decimal)
            .unwrap_or(SqlValue::Null(SqlNullType::Decimal)),
        "timestamp" => row
            .try_get::<_, chrono::NaiveDateTime>(idx)
            .ok()
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null(SqlNullType::DateTime)),
        "timestamptz" => row
            .try_get::<_, chrono::DateTime<chrono::FixedOffset>>(idx)
            .ok()
            .map(SqlValue::DateTimeOffset)
            .unwrap_or(SqlValue::Null(SqlNullType::DateTimeOffset)),
        "date" => row
            .try_get::<_, chrono::NaiveDate>(idx)
            .ok()
            .map(SqlValue::Date)
            .unwrap_or(SqlValue::Null(SqlNullType::Date)),
        "time" => row
            .try_get::<_, chrono::NaiveTime>(idx)
            .ok()
            .map(SqlValue::Time)
            .unwrap_or(SqlValue::Null(SqlNullType::Time)),
        "bytea" => row
            .try_get::<_, Vec<u8>>(idx)
            .ok()
            .map(SqlValue::Bytes)
            .unwrap_or(SqlValue::Null(SqlNullType::Bytes)),
        _ => row
            .try_get::<_, String>(idx)
            .ok()
            .map(SqlValue::String)
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
    }
}
