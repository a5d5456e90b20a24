//! `psm`: local store for the plant-protection product registry.
//!
//! Reads `psm.toml` (or the path given with `--config`) layered under `PSM_*`
//! environment variables, opens the SQLite store and runs one subcommand.
//!
//! # Usage
//!
//! ```text
//! psm sync
//! psm query --culture TRZAW --text fungizid
//! psm serve
//! psm backup registry.sqlite
//! ```

mod commands;
mod settings;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use settings::Settings;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "psm", author, version, about = "Plant-protection registry store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "psm.toml", global = true)]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the RPC endpoint over HTTP.
  Serve,

  /// Bring the registry up to date with the configured source.
  Sync,

  /// Query products and print the enriched result as JSON.
  Query {
    /// Crop code (e.g. `TRZAW`).
    #[arg(long)]
    culture:         Option<String>,
    /// Pest code (e.g. `ERYSGR`).
    #[arg(long)]
    pest:            Option<String>,
    /// Case-insensitive search over names, registration numbers and codes.
    #[arg(long)]
    text:            Option<String>,
    #[arg(long)]
    include_expired: bool,
  },

  /// Migrate the store and print its schema version.
  Migrate {
    /// Also print the shape of every registry table.
    #[arg(long)]
    diagnose: bool,
  },

  /// Write the user data snapshot as JSON (`-` for stdout).
  Export { file: PathBuf },

  /// Replace user data with a JSON snapshot.
  Import { file: PathBuf },

  /// Copy the whole store to a SQLite file.
  Backup { file: PathBuf },

  /// Replace the whole store with a SQLite file.
  Restore { file: PathBuf },

  /// Show recent sync attempts.
  Log {
    #[arg(short = 'n', long, default_value_t = 10)]
    limit: u32,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;

  match cli.command {
    Command::Serve => commands::serve(&settings).await,
    Command::Sync => commands::sync(&settings).await,
    Command::Query { culture, pest, text, include_expired } => {
      let query = psm_core::query::RegistryQuery { culture, pest, text, include_expired };
      commands::query(&settings, query).await
    }
    Command::Migrate { diagnose } => commands::migrate(&settings, diagnose).await,
    Command::Export { file } => commands::export(&settings, &file).await,
    Command::Import { file } => commands::import(&settings, &file).await,
    Command::Backup { file } => commands::backup(&settings, &file).await,
    Command::Restore { file } => commands::restore(&settings, &file).await,
    Command::Log { limit } => commands::log(&settings, limit).await,
  }
}
