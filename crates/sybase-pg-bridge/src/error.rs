//! Error types for the bridge library.

use thiserror::Error;

/// Classification of a connection failure that must never be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// The server rejected the username or password.
    BadCredentials,
    /// The named database does not exist on the server.
    UnknownDatabase,
    /// The server host could not be resolved.
    UnknownHost,
}

impl std::fmt::Display for FatalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatalKind::BadCredentials => write!(f, "unknown user or password"),
            FatalKind::UnknownDatabase => write!(f, "unknown database"),
            FatalKind::UnknownHost => write!(f, "unknown host"),
        }
    }
}

/// Main error type for bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Invalid or missing connection configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection failure with a fatal signature; retrying cannot help.
    #[error("Connection failed ({kind}): {detail}")]
    ConnectionFatal { kind: FatalKind, detail: String },

    /// Transient connection failures persisted past the retry ceiling.
    #[error("Failed to get connection for {host}:{database} as {user}; giving up (attempt {attempts})")]
    RetriesExhausted {
        host: String,
        database: String,
        user: String,
        attempts: u32,
    },

    /// A statement was rejected by the target engine. Carries the command
    /// text so callers can log exactly what was sent.
    #[error("Command failed ({sql}): {detail}")]
    Command { sql: String, detail: String },

    /// Row projection lookup found no matching field after case folding
    /// and alias resolution.
    #[error("Unknown field {key:?}; available fields: {available:?}")]
    UnknownField { key: String, available: Vec<String> },

    /// Batch runner inputs disagree on length.
    #[error("Mismatched counts: {0}")]
    ArityMismatch(String),

    /// The operation is not available for the configured engine.
    #[error("{operation} is not supported for {engine}")]
    Unsupported {
        engine: &'static str,
        operation: &'static str,
    },

    /// PostgreSQL driver error.
    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// MySQL driver error.
    #[error("MySQL error: {0}")]
    Mysql(#[from] sqlx::Error),

    /// IO error (password files, bulk-load streams).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a Config error.
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config(message.into())
    }

    /// Create a Command error carrying the offending SQL.
    pub fn command(sql: impl Into<String>, detail: impl Into<String>) -> Self {
        BridgeError::Command {
            sql: sql.into(),
            detail: detail.into(),
        }
    }
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
