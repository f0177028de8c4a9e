//! Apply a SQL script to every shard atomically.
//!
//! Runs the script through two-phase commit across all shards in the
//! mapping file.
//!
//! Exit codes:
//!   0  committed on every shard
//!   1  usage or configuration error, nothing attempted
//!   2  aborted, rolled back everywhere
//!   3  partially committed, manual resolution required
//!
//! Usage:
//!   apply-all migrations/0002_add_tags.sql --mapping mapping.json --timeout-ms 60000

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tripshard_api::telemetry::{init_tracing, LogFormat, TelemetryConfig};
use tripshard_api::PgConnector;
use tripshard_core::{CommitError, ShardMapping};
use tripshard_storage::TwoPhaseCommitCoordinator;

const USAGE_ERROR: u8 = 1;

#[derive(Parser, Debug)]
#[command(name = "apply-all")]
#[command(about = "Apply a SQL script to every shard with two-phase commit", long_about = None)]
struct Args {
    /// SQL script to run inside one transaction per shard.
    sql_file: PathBuf,

    /// JSON file mapping shard keys to connection strings.
    #[arg(long, env = "MAPPING_FILE", default_value = "mapping.json")]
    mapping: PathBuf,

    /// Per-statement timeout in milliseconds; 0 disables it.
    #[arg(long, default_value_t = 300_000)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let telemetry = TelemetryConfig {
        log_format: std::env::var("TRIPSHARD_LOG_FORMAT")
            .map(|s| LogFormat::parse(&s))
            .unwrap_or(LogFormat::Pretty),
        ..TelemetryConfig::default()
    };
    if let Err(e) = init_tracing(&telemetry) {
        eprintln!("{}", e);
    }

    let mapping = match ShardMapping::load(&args.mapping) {
        Ok(mapping) => mapping,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(USAGE_ERROR);
        }
    };

    let script = match std::fs::read_to_string(&args.sql_file) {
        Ok(script) => script,
        Err(e) => {
            eprintln!("error: cannot read {}: {}", args.sql_file.display(), e);
            return ExitCode::from(USAGE_ERROR);
        }
    };

    let coordinator = TwoPhaseCommitCoordinator::new(PgConnector)
        .with_statement_timeout(Some(Duration::from_millis(args.timeout_ms)));

    match coordinator.apply(&mapping, &script).await {
        Ok(report) => {
            println!(
                "Committed {} on {} shard(s): {}",
                report.base_gid,
                report.committed.len(),
                join_keys(report.committed.iter())
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            report_failure(&err);
            ExitCode::from(err.exit_code())
        }
    }
}

fn report_failure(err: &CommitError) {
    eprintln!("{}", err);
    if let CommitError::PartialCommit {
        failed_shard,
        committed,
        prepared,
        ..
    } = err
    {
        eprintln!("Committed shards: {}", join_keys(committed.iter()));
        eprintln!("Shard {} is in doubt; inspect pg_prepared_xacts on it.", failed_shard);
        if !prepared.is_empty() {
            eprintln!("Still prepared (resolve with COMMIT PREPARED or ROLLBACK PREPARED):");
            for (shard, gid) in prepared {
                eprintln!("  shard {}: '{}'", shard, gid);
            }
        }
    }
}

fn join_keys<'a>(keys: impl Iterator<Item = &'a tripshard_core::ShardKey>) -> String {
    keys.map(|k| k.to_string()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["apply-all", "schema.sql"]).unwrap();
        assert_eq!(args.sql_file, PathBuf::from("schema.sql"));
        assert_eq!(args.timeout_ms, 300_000);
    }

    #[test]
    fn test_args_require_script() {
        assert!(Args::try_parse_from(["apply-all"]).is_err());
    }

    #[test]
    fn test_args_flags() {
        let args = Args::try_parse_from([
            "apply-all",
            "m.sql",
            "--mapping",
            "/etc/tripshard/mapping.json",
            "--timeout-ms",
            "0",
        ])
        .unwrap();
        assert_eq!(args.mapping, PathBuf::from("/etc/tripshard/mapping.json"));
        assert_eq!(args.timeout_ms, 0);
    }
}
