//! Batch execution of translated statements.

use std::collections::HashMap;
use std::io::Write;

use tokio::io::AsyncRead;
use tracing::debug;

use crate::config::EngineKind;
use crate::dialect;
use crate::error::{BridgeError, Result};
use crate::manager::ConnectionManager;
use crate::row::{ResultSet, RowView};
use crate::value::SqlValue;

/// What to do with the rows a statement returns.
pub enum RowSink<'a> {
    /// Collect rows into the returned result set.
    Collect,
    /// Drop rows without collecting them.
    Discard,
    /// Invoke the callback once per row instead of collecting.
    ForEach(Box<dyn FnMut(RowView) + Send + 'a>),
}

/// Per-run options for [`BatchRunner::run`].
///
/// When present, `row_limits` and `sinks` must have exactly one entry per
/// statement; a limit of 0 means unlimited.
#[derive(Default)]
pub struct RunOptions<'a> {
    pub row_limits: Option<Vec<u32>>,
    pub sinks: Option<Vec<RowSink<'a>>>,
}

/// Orchestrates statements against the shared connection: injects row
/// limits, applies the translation passes, logs each command, and shapes
/// results.
pub struct BatchRunner {
    manager: ConnectionManager,
    auto_translate: bool,
    backend_translate: bool,
    command_log: Option<Box<dyn Write + Send>>,
    index_defs: HashMap<String, Vec<String>>,
}

impl BatchRunner {
    /// Wrap a connection manager. The generic translation pass is on by
    /// default; the backend pass is opt-in.
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            auto_translate: true,
            backend_translate: false,
            command_log: None,
            index_defs: HashMap::new(),
        }
    }

    /// Enable or disable the generic translation pass.
    pub fn with_generic_translation(mut self, on: bool) -> Self {
        self.auto_translate = on;
        self
    }

    /// Enable or disable the backend-specific translation pass.
    pub fn with_backend_translation(mut self, on: bool) -> Self {
        self.backend_translate = on;
        self
    }

    /// Install a write-only sink that receives every translated command
    /// plus a newline. Write failures are never propagated.
    pub fn set_command_log(&mut self, sink: Box<dyn Write + Send>) {
        self.command_log = Some(sink);
    }

    /// Access the underlying manager.
    pub fn manager(&mut self) -> &mut ConnectionManager {
        &mut self.manager
    }

    /// Run a single statement, optionally capped to `limit` rows.
    pub async fn run_one(&mut self, sql: &str, limit: Option<u32>) -> Result<Option<ResultSet>> {
        let cmd = self.prepare_statement(sql, limit.unwrap_or(0));
        self.log_command(&cmd);
        self.manager.execute(&cmd).await
    }

    /// Run an ordered list of statements, returning one outcome per
    /// statement. Option arities are validated before anything executes.
    pub async fn run(
        &mut self,
        statements: &[&str],
        options: RunOptions<'_>,
    ) -> Result<Vec<Option<ResultSet>>> {
        let RunOptions { row_limits, sinks } = options;

        if let Some(ref limits) = row_limits {
            if limits.len() != statements.len() {
                return Err(BridgeError::ArityMismatch(format!(
                    "{} statements but {} row limits",
                    statements.len(),
                    limits.len()
                )));
            }
        }
        let mut sinks = sinks;
        if let Some(ref s) = sinks {
            if s.len() != statements.len() {
                return Err(BridgeError::ArityMismatch(format!(
                    "{} statements but {} row sinks",
                    statements.len(),
                    s.len()
                )));
            }
        }

        let mut outcomes = Vec::with_capacity(statements.len());
        for (i, sql) in statements.iter().enumerate() {
            let limit = row_limits.as_ref().map(|l| l[i]).unwrap_or(0);
            let cmd = self.prepare_statement(sql, limit);
            self.log_command(&cmd);
            let result = self.manager.execute(&cmd).await?;

            let outcome = match sinks.as_mut().map(|s| &mut s[i]) {
                Some(RowSink::ForEach(callback)) => {
                    if let Some(ref rs) = result {
                        for view in rs.view_rows() {
                            callback(view);
                        }
                    }
                    None
                }
                Some(RowSink::Discard) => None,
                _ => result,
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Commit outstanding work; the shared connection stays open.
    pub async fn commit(&mut self) -> Result<()> {
        self.manager.commit().await
    }

    /// Roll back outstanding work and discard the shared connection.
    pub async fn rollback(&mut self) -> Result<()> {
        self.manager.rollback().await
    }

    /// Stream delimited data straight into a table, bypassing translation.
    pub async fn copy_from<R>(
        &mut self,
        source: R,
        table: &str,
        delimiter: char,
        null_token: &str,
        columns: Option<&[String]>,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.manager
            .copy_from(source, table, delimiter, null_token, columns)
            .await
    }

    /// Capture and drop every index on `table`, keeping the definitions so
    /// [`BatchRunner::restore_indexes`] can replay them after a bulk load.
    /// Returns the number of indexes dropped.
    pub async fn drop_indexes(&mut self, table: &str) -> Result<usize> {
        self.require_postgres("index maintenance")?;
        let table_key = table.to_lowercase();
        let cmd = format!(
            "select indexname, indexdef from pg_indexes where tablename = '{}'",
            table_key
        );
        let result = self.manager.execute(&cmd).await?;
        let Some(rs) = result else {
            return Ok(0);
        };

        let mut defs = Vec::with_capacity(rs.len());
        for row in &rs.rows {
            let (Some(SqlValue::String(name)), Some(SqlValue::String(def))) =
                (row.first(), row.get(1))
            else {
                continue;
            };
            self.manager.execute(&format!("drop index {}", name)).await?;
            defs.push(def.clone());
        }

        let count = defs.len();
        self.index_defs.insert(table_key, defs);
        Ok(count)
    }

    /// Replay the index definitions captured by
    /// [`BatchRunner::drop_indexes`], then forget them. Returns the number
    /// of indexes recreated.
    pub async fn restore_indexes(&mut self, table: &str) -> Result<usize> {
        self.require_postgres("index maintenance")?;
        let defs = match self.index_defs.remove(&table.to_lowercase()) {
            Some(defs) => defs,
            None => return Ok(0),
        };
        let count = defs.len();
        for def in defs {
            self.manager.execute(&def).await?;
        }
        Ok(count)
    }

    fn require_postgres(&self, operation: &'static str) -> Result<()> {
        match self.manager.engine() {
            EngineKind::Postgres => Ok(()),
            EngineKind::Mysql => Err(BridgeError::Unsupported {
                engine: "mysql",
                operation,
            }),
        }
    }

    /// Inject the row limit and apply the enabled translation passes.
    fn prepare_statement(&self, sql: &str, limit: u32) -> String {
        let mut cmd = sql.to_string();
        if limit > 0 && dialect::find_keyword(&cmd, "select").is_some() {
            cmd = format!("{} limit {}", cmd, limit);
        }
        if self.auto_translate {
            cmd = dialect::translate(&cmd);
        }
        if self.backend_translate {
            cmd = dialect::postgres::translate_backend(&cmd);
        }
        cmd
    }

    fn log_command(&mut self, cmd: &str) {
        debug!("command: {}", cmd);
        if let Some(log) = self.command_log.as_mut() {
            let _ = writeln!(log, "{}", cmd);
            let _ = log.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionParams, EngineKind};
    use std::sync::{Arc, Mutex};

    fn runner() -> BatchRunner {
        let params = ConnectionParams {
            engine: EngineKind::Postgres,
            host: "dbserver".into(),
            port: None,
            database: "mgd".into(),
            user: "mgd_public".into(),
            password: Some("mgdpub".into()),
            password_file: None,
        };
        BatchRunner::new(ConnectionManager::new(params).unwrap())
    }

    #[test]
    fn test_row_limit_injected_for_selects() {
        let r = runner().with_generic_translation(false);
        assert_eq!(
            r.prepare_statement("select * from mrk_marker", 100),
            "select * from mrk_marker limit 100"
        );
    }

    #[test]
    fn test_row_limit_skipped_for_non_selects() {
        let r = runner().with_generic_translation(false);
        assert_eq!(
            r.prepare_statement("delete from mrk_marker", 100),
            "delete from mrk_marker"
        );
    }

    #[test]
    fn test_zero_limit_means_unlimited() {
        let r = runner().with_generic_translation(false);
        assert_eq!(
            r.prepare_statement("select * from mrk_marker", 0),
            "select * from mrk_marker"
        );
    }

    #[test]
    fn test_limit_injected_before_translation() {
        let r = runner();
        assert_eq!(
            r.prepare_statement("select * from t where symbol = 'Pax6'", 10),
            "select * from t where lower(symbol) = 'pax6' limit 10"
        );
    }

    #[test]
    fn test_both_passes_apply_in_order() {
        let r = runner().with_backend_translation(true);
        assert_eq!(
            r.prepare_statement("select offset from imsr..Label", 0),
            "select cmOffset from imsr.Label"
        );
    }

    #[tokio::test]
    async fn test_mismatched_row_limit_count() {
        let mut r = runner();
        let err = r
            .run(
                &["select 1", "select 2"],
                RunOptions {
                    row_limits: Some(vec![10]),
                    sinks: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ArityMismatch(_)));
    }

    #[tokio::test]
    async fn test_mismatched_sink_count() {
        let mut r = runner();
        let err = r
            .run(
                &["select 1", "select 2"],
                RunOptions {
                    row_limits: None,
                    sinks: Some(vec![RowSink::Collect]),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ArityMismatch(_)));
    }

    #[test]
    fn test_command_log_receives_translated_text() {
        #[derive(Clone)]
        struct SharedBuf(Arc<Mutex<Vec<u8>>>);
        impl Write for SharedBuf {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buf = SharedBuf(Arc::new(Mutex::new(Vec::new())));
        let mut r = runner();
        r.set_command_log(Box::new(buf.clone()));

        let cmd = r.prepare_statement("select * from t where x = 'A'", 0);
        r.log_command(&cmd);

        let logged = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(logged, "select * from t where lower(x) = 'a'\n");
    }

    #[test]
    fn test_command_log_failures_are_swallowed() {
        struct FailingSink;
        impl Write for FailingSink {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "sink closed"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "sink closed"))
            }
        }

        let mut r = runner();
        r.set_command_log(Box::new(FailingSink));
        r.log_command("select 1");
    }
}
