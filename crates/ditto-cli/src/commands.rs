use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "ditto")]
#[command(about = "Find byte-for-byte duplicate files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a duplicate scan over the configured paths
    Scan,
    /// List recent scans, newest first
    History {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show the largest unresolved duplicate groups
    Groups {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Print configuration values
    PrintConfig,
}
