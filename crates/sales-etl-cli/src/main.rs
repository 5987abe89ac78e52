mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::query::QueryCommand;

#[derive(Parser)]
#[command(
    name = "sales-etl",
    version,
    about = "Daily retail sales pipeline: online and in-store sales into one warehouse table"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Run key naming this run's artifacts (default: today's UTC date)
        #[arg(long)]
        run_key: Option<String>,
        /// Preview mode: extract and transform, print the aggregate, skip load
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate pipeline configuration and connectivity
    Check {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// Read the aggregate table as JSON
    Query {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        #[command(subcommand)]
        query: QueryCommand,
    },
    /// Show recent runs from the run ledger
    Runs {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Number of runs to show, newest first
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run {
            pipeline,
            run_key,
            dry_run,
        } => commands::run::execute(&pipeline, run_key.as_deref(), dry_run).await,
        Commands::Check { pipeline } => commands::check::execute(&pipeline).await,
        Commands::Query { pipeline, query } => commands::query::execute(&pipeline, query).await,
        Commands::Runs { pipeline, limit } => commands::runs::execute(&pipeline, limit).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_run_key_and_dry_run() {
        let cli = Cli::try_parse_from([
            "sales-etl",
            "run",
            "pipeline.yaml",
            "--run-key",
            "2024-03-01",
            "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                pipeline,
                run_key,
                dry_run,
            } => {
                assert_eq!(pipeline, PathBuf::from("pipeline.yaml"));
                assert_eq!(run_key.as_deref(), Some("2024-03-01"));
                assert!(dry_run);
            }
            _ => panic!("expected run"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn query_subcommands_parse() {
        let cli =
            Cli::try_parse_from(["sales-etl", "query", "p.yaml", "top", "3", "--log-level", "debug"])
                .unwrap();
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(
            cli.command,
            Commands::Query {
                query: QueryCommand::Top { n: 3 },
                ..
            }
        ));

        let cli = Cli::try_parse_from(["sales-etl", "query", "p.yaml", "get", "42"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Query {
                query: QueryCommand::Get { product_id: 42 },
                ..
            }
        ));
    }

    #[test]
    fn runs_limit_defaults_to_ten() {
        let cli = Cli::try_parse_from(["sales-etl", "runs", "p.yaml"]).unwrap();
        assert!(matches!(cli.command, Commands::Runs { limit: 10, .. }));
    }

    #[test]
    fn query_requires_a_subcommand() {
        assert!(Cli::try_parse_from(["sales-etl", "query", "p.yaml"]).is_err());
    }
}
