//! sybase-pg-bridge CLI - run legacy Sybase-dialect SQL against PostgreSQL
//! or MySQL.
//!
//! This binary is the composition root: it owns the single shared
//! [`BatchRunner`] that all statements in one invocation serialize onto.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sybase_pg_bridge::{dialect, BatchRunner, ConnectionManager, ConnectionParams, ResultSet};
use tracing::Level;

#[derive(Parser)]
#[command(name = "sybase-pg-bridge")]
#[command(about = "Run legacy Sybase-dialect SQL against PostgreSQL or MySQL")]
#[command(version)]
struct Cli {
    /// Path to a YAML connection configuration file (PG_DB* environment
    /// variables are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate legacy SQL from a file (or stdin) and print the result
    Translate {
        /// SQL file to read; stdin when omitted
        file: Option<PathBuf>,

        /// Also apply the backend-specific pass
        #[arg(long)]
        backend: bool,
    },

    /// Execute statements in order and print any rows
    Exec {
        /// Statements to run
        #[arg(required = true)]
        sql: Vec<String>,

        /// Cap the number of rows returned per SELECT
        #[arg(long)]
        limit: Option<u32>,

        /// Apply the backend-specific translation pass
        #[arg(long)]
        backend: bool,

        /// Send statements verbatim, skipping the generic pass
        #[arg(long)]
        no_translate: bool,

        /// Commit on success (the default is to roll back)
        #[arg(long)]
        commit: bool,
    },

    /// Bulk-load a delimited file into a table, bypassing translation
    Copy {
        /// Target table
        table: String,

        /// Data file to stream
        file: PathBuf,

        /// Column delimiter (a single character)
        #[arg(long, default_value = "\t")]
        delimiter: String,

        /// Literal that marks NULL in the data
        #[arg(long, default_value = "\\N")]
        null_token: String,

        /// Explicit column list; the table's column order when omitted
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
    },

    /// Open a connection and report whether the target is reachable
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.verbosity);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbosity: &str) {
    let level = match verbosity {
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Translate { file, backend } => translate(file.as_deref(), backend).await,
        Commands::Exec {
            sql,
            limit,
            backend,
            no_translate,
            commit,
        } => {
            let mut runner = build_runner(cli.config.as_deref(), backend, !no_translate)?;
            exec(&mut runner, &sql, limit, commit).await
        }
        Commands::Copy {
            table,
            file,
            delimiter,
            null_token,
            columns,
        } => {
            let mut runner = build_runner(cli.config.as_deref(), false, true)?;
            copy(&mut runner, &table, &file, &delimiter, &null_token, &columns).await
        }
        Commands::HealthCheck => {
            let mut runner = build_runner(cli.config.as_deref(), false, true)?;
            health_check(&mut runner).await
        }
    }
}

fn load_params(config: Option<&Path>) -> anyhow::Result<ConnectionParams> {
    match config {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
        }
        None => Ok(ConnectionParams::from_env()),
    }
}

fn build_runner(
    config: Option<&Path>,
    backend: bool,
    generic: bool,
) -> anyhow::Result<BatchRunner> {
    let params = load_params(config)?;
    let manager = ConnectionManager::new(params)?;
    Ok(BatchRunner::new(manager)
        .with_generic_translation(generic)
        .with_backend_translation(backend))
}

async fn translate(file: Option<&Path>, backend: bool) -> anyhow::Result<()> {
    let text = match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            use tokio::io::AsyncReadExt;
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    let mut out = dialect::translate(&text);
    if backend {
        out = dialect::postgres::translate_backend(&out);
    }
    println!("{out}");
    Ok(())
}

async fn exec(
    runner: &mut BatchRunner,
    statements: &[String],
    limit: Option<u32>,
    commit: bool,
) -> anyhow::Result<()> {
    for sql in statements {
        match runner.run_one(sql, limit).await? {
            Some(rows) => print_result_set(&rows),
            None => println!("(no result)"),
        }
    }
    if commit {
        runner.commit().await?;
    } else {
        runner.rollback().await?;
    }
    Ok(())
}

fn print_result_set(rows: &ResultSet) {
    println!("{}", rows.columns.join("\t"));
    for row in &rows.rows {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        println!("{}", line.join("\t"));
    }
    println!("({} rows)", rows.len());
}

async fn copy(
    runner: &mut BatchRunner,
    table: &str,
    file: &Path,
    delimiter: &str,
    null_token: &str,
    columns: &[String],
) -> anyhow::Result<()> {
    anyhow::ensure!(
        delimiter.chars().count() == 1,
        "delimiter must be a single character"
    );
    let delimiter = delimiter.chars().next().expect("length checked above");

    let source = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;
    let cols = if columns.is_empty() {
        None
    } else {
        Some(columns)
    };

    let rows = runner
        .copy_from(source, table, delimiter, null_token, cols)
        .await?;
    runner.commit().await?;
    println!("Loaded {rows} rows into {table}");
    Ok(())
}

async fn health_check(runner: &mut BatchRunner) -> anyhow::Result<()> {
    runner.run_one("select 1", None).await?;
    let params = runner.manager().params();
    println!(
        "Connection OK: {} {}:{}/{}",
        params.engine,
        params.host,
        params.port(),
        params.database
    );
    runner.rollback().await?;
    Ok(())
}
