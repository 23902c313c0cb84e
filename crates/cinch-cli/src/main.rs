//! CinchDB CLI entry point.
//!
//! Exit codes: 0 success, 1 user-visible error, 2 invalid invocation
//! (clap's default for usage errors).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cinch_engine::Engine;

#[derive(Parser)]
#[command(
    name = "cinch",
    about = "CinchDB - a Git-like SQLite database management system",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new CinchDB project.
    Init {
        /// Directory to initialize the project in (default: current directory).
        path: Option<PathBuf>,
    },
    /// Show the engine version.
    Version,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> cinch_core::Result<()> {
    match cli.command {
        Commands::Init { path } => {
            let root = match path {
                Some(path) => path,
                None => std::env::current_dir()?,
            };
            let engine = Engine::new();
            let result = engine.init_project(&root);
            engine.close_all();
            result?;
            println!("Initialized CinchDB project in {}", root.display());
            Ok(())
        }
        Commands::Version => {
            let version = std::env::var("CINCHDB_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());
            println!("CinchDB version {version}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_then_reinit_fails() {
        let dir = TempDir::new().unwrap();
        run(Cli {
            command: Commands::Init {
                path: Some(dir.path().to_path_buf()),
            },
        })
        .unwrap();
        assert!(dir.path().join(".cinchdb/config.toml").exists());

        let err = run(Cli {
            command: Commands::Init {
                path: Some(dir.path().to_path_buf()),
            },
        })
        .unwrap_err();
        assert!(matches!(err, cinch_core::CinchError::AlreadyExists(_)));
    }

    #[test]
    fn test_cli_parses() {
        Cli::try_parse_from(["cinch", "init", "/tmp/p"]).unwrap();
        Cli::try_parse_from(["cinch", "version"]).unwrap();
        assert!(Cli::try_parse_from(["cinch", "bogus"]).is_err());
    }
}
