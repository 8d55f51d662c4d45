//! Connection configuration.
//!
//! Parameters are immutable once a [`crate::ConnectionManager`] has been
//! built from them. They can be deserialized from a YAML/JSON document,
//! assembled in code, or bootstrapped from environment variables with
//! [`ConnectionParams::from_env`].

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BridgeError, Result};

/// The engines a bridge connection can target.
///
/// Resolved once at construction; nothing downstream compares type strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Postgres,
    Mysql,
}

impl EngineKind {
    /// Default server port for the engine.
    pub fn default_port(self) -> u16 {
        match self {
            EngineKind::Postgres => 5432,
            EngineKind::Mysql => 3306,
        }
    }

    /// Short identifier, as used in configuration files and log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Postgres => "postgres",
            EngineKind::Mysql => "mysql",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(EngineKind::Postgres),
            "mysql" => Ok(EngineKind::Mysql),
            other => Err(BridgeError::config(format!(
                "Unknown target database type: {other}"
            ))),
        }
    }
}

/// Parameters needed to open a physical connection to the target engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Target engine; defaults to Postgres.
    #[serde(default)]
    pub engine: EngineKind,

    /// Server host.
    pub host: String,

    /// Server port; the engine default is used when absent.
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name within the server.
    pub database: String,

    /// Username.
    pub user: String,

    /// Inline password.
    #[serde(default)]
    pub password: Option<String>,

    /// Path to a file whose first line (trimmed) is the password.
    #[serde(default)]
    pub password_file: Option<PathBuf>,
}

impl ConnectionParams {
    /// Empty parameter set, to be filled in by setters or env application.
    pub fn empty() -> Self {
        Self {
            engine: EngineKind::default(),
            host: String::new(),
            port: None,
            database: String::new(),
            user: String::new(),
            password: None,
            password_file: None,
        }
    }

    /// Bootstrap parameters from the environment.
    ///
    /// Later variables override earlier ones. The user must be applied
    /// before the password files are consulted, since the pgpass lookup is
    /// keyed by username.
    pub fn from_env() -> Self {
        let mut params = Self::empty();
        if let Ok(v) = env::var("PG_DBSERVER") {
            params.host = v;
        }
        if let Ok(v) = env::var("PG_DBNAME") {
            params.database = v;
        }
        if let Ok(v) = env::var("PG_DBUSER") {
            params.user = v;
        }
        if let Ok(v) = env::var("PG_DBPASSWORD") {
            params.password = Some(v);
        }
        if let Ok(v) = env::var("PG_DBPASSWORDFILE") {
            params.apply_pgpass(Path::new(&v));
        }
        if let Ok(v) = env::var("PGPASSFILE") {
            params.apply_pgpass(Path::new(&v));
        }
        params
    }

    /// Effective port.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.engine.default_port())
    }

    /// Check that the parameters describe a usable connection.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(BridgeError::config("no server host specified"));
        }
        if self.database.is_empty() {
            return Err(BridgeError::config("no database specified"));
        }
        if self.user.is_empty() {
            return Err(BridgeError::config("no user specified"));
        }
        if self.password.is_none() && self.password_file.is_none() {
            return Err(BridgeError::config(
                "could not initialize; no password specified",
            ));
        }
        Ok(())
    }

    /// Resolve the credential: inline password first, then the password
    /// file's first line.
    pub fn resolve_password(&self) -> Result<String> {
        if let Some(ref password) = self.password {
            return Ok(password.clone());
        }
        if let Some(ref file) = self.password_file {
            return read_password_file(file);
        }
        Err(BridgeError::config(
            "could not initialize; no password specified",
        ))
    }

    /// Look up this user's password in a pgpass-style file (colon-delimited,
    /// five fields, field four is the username) and apply the first match.
    ///
    /// Best effort: a missing file, unreadable file, or absent entry is
    /// silently ignored, since some hosts do not carry the file at all and
    /// callers are expected to fail later on their own terms.
    pub fn apply_pgpass(&mut self, path: &Path) {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                debug!("skipping password file {}: {}", path.display(), e);
                return;
            }
        };
        for line in contents.lines() {
            let pieces: Vec<&str> = line.trim().split(':').collect();
            if pieces.len() == 5 && pieces[3] == self.user {
                self.password = Some(pieces[4].to_string());
                return;
            }
        }
        debug!(
            "no entry for user {} in {}",
            self.user,
            path.display()
        );
    }
}

/// Read a password from the file at `path`: the first line, trimmed.
pub fn read_password_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(BridgeError::config(format!(
            "Unknown password file: {}",
            path.display()
        )));
    }
    let contents = std::fs::read_to_string(path).map_err(|e| {
        BridgeError::config(format!(
            "Cannot read password file {}: {}",
            path.display(),
            e
        ))
    })?;
    Ok(contents.lines().next().unwrap_or_default().trim().to_string())
}
