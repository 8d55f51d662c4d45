//! CLI integration tests for sybase-pg-bridge.
//!
//! These tests cover argument parsing, help output, and the translate
//! subcommand, which needs no database.

use assert_cmd::Command;
use predicates::prelude::*;

/// Get a command for the sybase-pg-bridge binary with a clean environment.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("sybase-pg-bridge").unwrap();
    cmd.env_remove("PG_DBSERVER")
        .env_remove("PG_DBNAME")
        .env_remove("PG_DBUSER")
        .env_remove("PG_DBPASSWORD")
        .env_remove("PG_DBPASSWORDFILE")
        .env_remove("PGPASSFILE");
    cmd
}

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("translate"))
        .stdout(predicate::str::contains("exec"))
        .stdout(predicate::str::contains("copy"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sybase-pg-bridge"));
}

#[test]
fn test_exec_requires_a_statement() {
    cmd().arg("exec").assert().failure();
}

#[test]
fn test_exec_without_configuration_fails() {
    cmd()
        .args(["exec", "select 1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_translate_rewrites_select_alias() {
    cmd()
        .arg("translate")
        .write_stdin("select alleleKey=_allele_key from all_allele")
        .assert()
        .success()
        .stdout(predicate::str::contains("_allele_key as alleleKey"));
}

#[test]
fn test_translate_folds_where_comparisons() {
    cmd()
        .arg("translate")
        .write_stdin("select * from mrk_marker where symbol = 'Pax6'")
        .assert()
        .success()
        .stdout(predicate::str::contains("lower(symbol) = 'pax6'"));
}

#[test]
fn test_translate_backend_rewrites_temp_tables() {
    cmd()
        .args(["translate", "--backend"])
        .write_stdin("select _marker_key into #markerKeys from mrk_marker")
        .assert()
        .success()
        .stdout(predicate::str::contains("INTO TEMPORARY TABLE markerKeys"));
}

#[test]
fn test_translate_generic_pass_leaves_temp_tables() {
    cmd()
        .arg("translate")
        .write_stdin("select _marker_key into #markerKeys from mrk_marker")
        .assert()
        .success()
        .stdout(predicate::str::contains("into #markerKeys"));
}

#[test]
fn test_copy_help_shows_defaults() {
    cmd()
        .args(["copy", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--delimiter"))
        .stdout(predicate::str::contains("--null-token"))
        .stdout(predicate::str::contains("--columns"));
}
