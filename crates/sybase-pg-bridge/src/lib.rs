//! # sybase-pg-bridge
//!
//! Compatibility bridge that lets application code written against a
//! legacy Sybase-style SQL dialect execute, unmodified or nearly so,
//! against PostgreSQL or MySQL.
//!
//! Two coupled jobs:
//!
//! - **Dialect translation**: an ordered, pattern-driven rewrite pipeline
//!   converting legacy SQL text into target-engine SQL, in two passes (a
//!   generic pass and a backend-specific pass) composed by the caller.
//! - **Resilient execution**: a lazily-opened, optionally-shared physical
//!   connection with bounded exponential backoff on transient failures,
//!   fatal-error classification, rollback-on-failure statement execution,
//!   and legacy-shaped row projection.
//!
//! Translation is best effort over a curated rule set, not parsing: only
//! the dialect subset observed in the calling codebase is covered, and
//! unmatched text passes through verbatim.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sybase_pg_bridge::{BatchRunner, ConnectionManager, ConnectionParams};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let params = ConnectionParams::from_env();
//!     let manager = ConnectionManager::new(params)?;
//!     let mut runner = BatchRunner::new(manager).with_backend_translation(true);
//!
//!     let result = runner
//!         .run_one("select * from mrk_marker where symbol = 'pax6'", Some(100))
//!         .await?;
//!     if let Some(rows) = result {
//!         for row in rows.view_rows() {
//!             println!("{}", row.get("symbol")?);
//!         }
//!     }
//!     runner.commit().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dialect;
pub mod error;
pub mod manager;
pub mod row;
pub mod runner;
pub mod value;

// Re-exports for convenient access
pub use config::{ConnectionParams, EngineKind};
pub use error::{BridgeError, FatalKind, Result};
pub use manager::ConnectionManager;
pub use row::{ResultSet, RowView};
pub use runner::{BatchRunner, RowSink, RunOptions};
pub use value::{SqlNullType, SqlValue};
