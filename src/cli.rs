use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "statdiff")]
#[command(about = "Report which PostgreSQL tables changed between a start and an end snapshot")]
#[command(version)]
pub struct Cli {
    /// Take the baseline snapshot (start) or compare against it (end)
    #[arg(value_enum)]
    pub mode: Mode,

    /// Correlation key pairing a start run with its end run
    pub key: String,

    /// Configuration file (TOML). Missing file is fine.
    #[arg(long, default_value = "statdiff.toml")]
    pub config: PathBuf,

    /// Directory holding snapshot files
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,

    /// Connection string, overrides DATABASE_URL
    #[arg(long)]
    pub database_url: Option<String>,

    /// Enable debug logging
    #[arg(long, short = 'v', default_value_t = false)]
    pub verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Capture counters and store them under the key
    Start,
    /// Capture counters again and print the diff
    End,
}
