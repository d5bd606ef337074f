//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

/// Collection commands.
#[derive(Debug, Subcommand)]
pub enum CollectCommand {
    /// Poll the gateway every tick until interrupted
    Run,

    /// Run a single collection cycle
    Once {
        /// Only collect these methods (repeatable)
        #[arg(short, long = "method", value_name = "METHOD")]
        methods: Vec<String>,
    },
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Report command arguments.
#[derive(Debug, Args)]
pub struct ReportCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Analyze command arguments.
#[derive(Debug, Args)]
pub struct AnalyzeCommand {
    /// Method to analyze (e.g. "weight")
    pub method: String,

    /// Numeric field under the method (e.g. "inKilograms")
    pub key: String,

    /// Look back this many days (default: dashboard.default_days)
    #[arg(short, long)]
    pub days: Option<u32>,

    /// Outlier detection method
    #[arg(short, long, value_enum, default_value = "iqr")]
    pub outliers: OutlierArg,

    /// Moving average window over daily values
    #[arg(short, long, default_value = "7")]
    pub window: usize,

    /// How values of one day are combined
    #[arg(short, long, value_enum, default_value = "mean")]
    pub agg: AggArg,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Correlate command arguments.
#[derive(Debug, Args)]
pub struct CorrelateCommand {
    /// Fields to correlate as METHOD.KEY (e.g. "steps.count")
    #[arg(required = true, num_args = 2..)]
    pub fields: Vec<String>,

    /// Look back this many days (default: dashboard.default_days)
    #[arg(short, long)]
    pub days: Option<u32>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Summary command arguments.
#[derive(Debug, Args)]
pub struct SummaryCommand {
    /// Method to summarize
    pub method: String,

    /// Look back this many days; all records when omitted
    #[arg(short, long)]
    pub days: Option<u32>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Export command arguments.
#[derive(Debug, Args)]
pub struct ExportCommand {
    /// Export only this method
    #[arg(short, long)]
    pub method: Option<String>,

    /// Output directory (default: storage.export_dir)
    #[arg(short, long, value_name = "DIR")]
    pub out: Option<PathBuf>,
}

/// Import command arguments.
#[derive(Debug, Args)]
pub struct ImportCommand {
    /// CSV files to import
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,

    /// Store rows under this method instead of the file name
    #[arg(short, long)]
    pub method: Option<String>,
}

/// Prune command arguments.
#[derive(Debug, Args)]
pub struct PruneCommand {
    /// Delete records that started before this: a span ("90d", "12w"), a
    /// date ("2024-01-15") or an RFC 3339 timestamp
    #[arg(long, value_name = "WHEN")]
    pub older_than: String,
}

/// Methods command arguments.
#[derive(Debug, Args)]
pub struct MethodsCommand {
    /// List every method the gateway serves, not only the configured ones
    #[arg(short, long)]
    pub all: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Outlier method argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutlierArg {
    /// Outside 1.5 IQR of the quartiles
    #[default]
    Iqr,
    /// More than 3 standard deviations from the mean
    Zscore,
}

impl From<OutlierArg> for crate::analytics::OutlierMethod {
    fn from(arg: OutlierArg) -> Self {
        match arg {
            OutlierArg::Iqr => Self::Iqr,
            OutlierArg::Zscore => Self::ZScore,
        }
    }
}

/// Daily aggregation argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AggArg {
    /// Sum of the day's values
    Sum,
    /// Mean of the day's values
    #[default]
    Mean,
    /// Number of values
    Count,
    /// Smallest value
    Min,
    /// Largest value
    Max,
}

impl From<AggArg> for crate::analytics::AggFunc {
    fn from(arg: AggArg) -> Self {
        match arg {
            AggArg::Sum => Self::Sum,
            AggArg::Mean => Self::Mean,
            AggArg::Count => Self::Count,
            AggArg::Min => Self::Min,
            AggArg::Max => Self::Max,
        }
    }
}
