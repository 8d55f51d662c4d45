//! Resilient connection management.
//!
//! A [`ConnectionManager`] owns at most one physical connection to the
//! target engine. The connection is opened lazily on first execute,
//! retried with bounded exponential backoff on transient failures, kept
//! open across `commit()`, and closed and discarded by `rollback()` so the
//! next execute acquires a fresh one.

mod mysql;
mod postgres;

use std::future::Future;
use std::time::Duration;

use tokio::io::AsyncRead;
use tracing::{info, warn};

use crate::config::{ConnectionParams, EngineKind};
use crate::error::{BridgeError, FatalKind, Result};
use crate::row::ResultSet;

use mysql::MysqlConnection;
use postgres::PgConnection;

/// Number of attempted connections before giving up.
const MAX_ATTEMPTS: u32 = 10;

/// Initial delay between attempts. The delay doubles after each failed
/// attempt, giving 0.1, 0.2, 0.4, 0.8, 1.6, 3.2, 6.4, 12.8, and 25.6
/// seconds, or about 51 seconds in total before we give up entirely. The
/// server may transiently refuse connections under load, and short-lived
/// callers should not fail on a momentary spike.
const INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Classify a connection error's text against the fatal signatures.
///
/// These failures cannot succeed on retry, so they fail immediately:
/// bad credentials, a database that does not exist, or a host that does
/// not resolve. Anything else is assumed to be transient (typically the
/// server's connection limit) and is retried.
fn classify_fatal(detail: &str) -> Option<FatalKind> {
    if detail.contains("password authentication failed") || detail.contains("Access denied") {
        return Some(FatalKind::BadCredentials);
    }
    if (detail.contains("database \"") && detail.contains("does not exist"))
        || detail.contains("Unknown database")
    {
        return Some(FatalKind::UnknownDatabase);
    }
    if detail.contains("could not translate host")
        || detail.contains("failed to lookup address")
        || detail.contains("Name or service not known")
    {
        return Some(FatalKind::UnknownHost);
    }
    None
}

/// Run `connect` until it succeeds, a fatal signature appears, or the
/// attempt ceiling is reached.
async fn acquire_with_backoff<T, F, Fut>(params: &ConnectionParams, mut connect: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, String>>,
{
    let mut attempts = 0;
    let mut delay = INITIAL_DELAY;
    loop {
        attempts += 1;
        match connect().await {
            Ok(conn) => {
                info!(
                    "Connected to {} {}:{}/{} as {}",
                    params.engine,
                    params.host,
                    params.port(),
                    params.database,
                    params.user
                );
                return Ok(conn);
            }
            Err(detail) => {
                if let Some(kind) = classify_fatal(&detail) {
                    return Err(BridgeError::ConnectionFatal { kind, detail });
                }
                if attempts >= MAX_ATTEMPTS {
                    return Err(BridgeError::RetriesExhausted {
                        host: params.host.clone(),
                        database: params.database.clone(),
                        user: params.user.clone(),
                        attempts,
                    });
                }
                warn!(
                    "Failed to get connection for {}:{} as {}; waiting to retry (attempt {})",
                    params.host, params.database, params.user, attempts
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
}

/// The physical connection, resolved to a concrete engine once at
/// construction.
pub(crate) enum EngineConnection {
    Postgres(PgConnection),
    Mysql(MysqlConnection),
}

impl EngineConnection {
    async fn execute(&mut self, sql: &str) -> Result<Option<ResultSet>> {
        match self {
            Self::Postgres(conn) => conn.execute(sql).await,
            Self::Mysql(conn) => conn.execute(sql).await,
        }
    }

    async fn commit(&mut self) -> Result<()> {
        match self {
            Self::Postgres(conn) => conn.commit().await,
            Self::Mysql(conn) => conn.commit().await,
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        match self {
            Self::Postgres(conn) => conn.rollback().await,
            Self::Mysql(conn) => conn.rollback().await,
        }
    }

    async fn copy_from<R>(
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
        match self {
            Self::Postgres(conn) => {
                conn.copy_from(source, table, delimiter, null_token, columns).await
            }
            Self::Mysql(_) => Err(BridgeError::Unsupported {
                engine: "mysql",
                operation: "bulk load",
            }),
        }
    }
}

/// Manager for the optionally-shared physical connection.
pub struct ConnectionManager {
    params: ConnectionParams,
    password: String,
    shared: Option<EngineConnection>,
}

impl ConnectionManager {
    /// Build a manager from connection parameters. The credential is
    /// resolved here, once; parameters are immutable afterwards.
    pub fn new(params: ConnectionParams) -> Result<Self> {
        params.validate()?;
        let password = params.resolve_password()?;
        Ok(Self {
            params,
            password,
            shared: None,
        })
    }

    /// The engine this manager talks to.
    pub fn engine(&self) -> EngineKind {
        self.params.engine
    }

    /// The parameters this manager was built from.
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Whether a shared connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.shared.is_some()
    }

    /// Execute one already-translated statement on the shared connection,
    /// opening it first if necessary.
    ///
    /// Returns `None` when the statement produced no column descriptors
    /// (plain DML or DDL). A failed statement rolls back the transaction on
    /// the owning connection before the error is returned; the connection
    /// itself stays open.
    pub async fn execute(&mut self, sql: &str) -> Result<Option<ResultSet>> {
        self.connection().await?.execute(sql).await
    }

    /// Stream delimited data straight into the target table's bulk-copy
    /// mechanism, bypassing translation entirely.
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
        self.connection()
            .await?
            .copy_from(source, table, delimiter, null_token, columns)
            .await
    }

    /// Commit outstanding work. The shared connection stays open for reuse.
    pub async fn commit(&mut self) -> Result<()> {
        if let Some(conn) = self.shared.as_mut() {
            conn.commit().await?;
        }
        Ok(())
    }

    /// Roll back outstanding work, then close and discard the shared
    /// connection; the next execute acquires a fresh one.
    pub async fn rollback(&mut self) -> Result<()> {
        if let Some(mut conn) = self.shared.take() {
            conn.rollback().await?;
        }
        Ok(())
    }

    /// Close the shared connection without touching the transaction state.
    pub fn close(&mut self) {
        self.shared = None;
    }

    async fn connection(&mut self) -> Result<&mut EngineConnection> {
        let conn = match self.shared.take() {
            Some(conn) => conn,
            None => self.open().await?,
        };
        Ok(self.shared.insert(conn))
    }

    async fn open(&self) -> Result<EngineConnection> {
        match self.params.engine {
            EngineKind::Postgres => {
                let conn = acquire_with_backoff(&self.params, || {
                    PgConnection::connect_once(&self.params, &self.password)
                })
                .await?;
                Ok(EngineConnection::Postgres(conn))
            }
            EngineKind::Mysql => {
                let conn = acquire_with_backoff(&self.params, || {
                    MysqlConnection::connect_once(&self.params, &self.password)
                })
                .await?;
                Ok(EngineConnection::Mysql(conn))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn params() -> ConnectionParams {
        ConnectionParams {
            engine: EngineKind::Postgres,
            host: "dbserver".into(),
            port: None,
            database: "mgd".into(),
            user: "mgd_public".into(),
            password: Some("mgdpub".into()),
            password_file: None,
        }
    }

    #[test]
    fn test_classify_fatal_signatures() {
        assert_eq!(
            classify_fatal("FATAL: password authentication failed for user \"x\""),
            Some(FatalKind::BadCredentials)
        );
        assert_eq!(
            classify_fatal("Access denied for user 'x'@'localhost'"),
            Some(FatalKind::BadCredentials)
        );
        assert_eq!(
            classify_fatal("FATAL: database \"nope\" does not exist"),
            Some(FatalKind::UnknownDatabase)
        );
        assert_eq!(
            classify_fatal("ERROR 1049: Unknown database 'nope'"),
            Some(FatalKind::UnknownDatabase)
        );
        assert_eq!(
            classify_fatal("could not translate host name \"bad\" to address"),
            Some(FatalKind::UnknownHost)
        );
        assert_eq!(
            classify_fatal("FATAL: sorry, too many clients already"),
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_makes_exactly_one_attempt() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = acquire_with_backoff(&params(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("password authentication failed".to_string()) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        match result.unwrap_err() {
            BridgeError::ConnectionFatal { kind, .. } => {
                assert_eq!(kind, FatalKind::BadCredentials);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_exhaust_after_ten_attempts() {
        let attempts = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result: Result<()> = acquire_with_backoff(&params(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("too many connections".to_string()) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 10);
        // nine sleeps: 0.1 + 0.2 + ... + 25.6 seconds
        assert_eq!(started.elapsed(), Duration::from_millis(51_100));
        match result.unwrap_err() {
            BridgeError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 10),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let attempts = AtomicU32::new(0);
        let result = acquire_with_backoff(&params(), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("too many connections".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_manager_requires_credential() {
        let mut p = params();
        p.password = None;
        assert!(matches!(
            ConnectionManager::new(p),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_manager_starts_disconnected() {
        let manager = ConnectionManager::new(params()).unwrap();
        assert!(!manager.is_connected());
        assert_eq!(manager.engine(), EngineKind::Postgres);
    }
}
