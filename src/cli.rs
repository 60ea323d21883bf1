//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// registrar - status reconciliation controller
#[derive(Parser, Debug)]
#[command(name = "registrar")]
#[command(version)]
#[command(about = "Keeps the status of declared resources in line with their spec")]
#[command(
    long_about = "registrar watches Student and Guestbook resources, derives each object's status from its spec and writes it back only when it changed."
)]
pub struct Cli {
    /// Log filter, e.g. `debug` or `registrar_reconciler=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controllers until Ctrl+C
    Run {
        /// Controller config file (.toml, .yaml, .yml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Manifests to load into the store before starting
        #[arg(short, long)]
        manifests: Option<PathBuf>,
    },

    /// Reconcile every object once and print the result as JSON
    Reconcile {
        /// Controller config file (.toml, .yaml, .yml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Manifests to reconcile
        #[arg(short, long)]
        manifests: PathBuf,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_options() {
        let cli = Cli::parse_from([
            "registrar",
            "--log-level",
            "debug",
            "run",
            "--config",
            "registrar.toml",
            "--manifests",
            "school.yaml",
        ]);

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Commands::Run { config, manifests } = cli.command else {
            panic!("expected the run subcommand");
        };
        assert_eq!(config, Some(PathBuf::from("registrar.toml")));
        assert_eq!(manifests, Some(PathBuf::from("school.yaml")));
    }

    #[test]
    fn test_reconcile_requires_manifests() {
        assert!(Cli::try_parse_from(["registrar", "reconcile"]).is_err());
        assert!(Cli::try_parse_from(["registrar", "reconcile", "-m", "school.yaml"]).is_ok());
    }
}
