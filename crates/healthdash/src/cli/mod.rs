//! Command-line interface for healthdash.
//!
//! This module provides the CLI structure for the `hdash` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    AggArg, AnalyzeCommand, CollectCommand, ConfigCommand, CorrelateCommand, ExportCommand,
    ImportCommand, MethodsCommand, OutlierArg, PruneCommand, ReportCommand, StatusCommand,
    SummaryCommand,
};

/// hdash - Personal health dashboard
///
/// Collects Health Connect records from an HCGateway server into a local
/// database and analyzes them from the terminal.
#[derive(Debug, Parser)]
#[command(name = "hdash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Pull records from the gateway
    #[command(subcommand)]
    Collect(CollectCommand),

    /// Show stored records and sync state per method
    Status(StatusCommand),

    /// Show the health dashboard (step, distance and calorie averages are
    /// means of per-day totals)
    Report(ReportCommand),

    /// Statistics, trend and outliers for one numeric field
    Analyze(AnalyzeCommand),

    /// Correlate daily means of several fields
    Correlate(CorrelateCommand),

    /// Summarize the records of one method
    Summary(SummaryCommand),

    /// Export records to CSV
    Export(ExportCommand),

    /// Import records from CSV
    Import(ImportCommand),

    /// Delete old records
    Prune(PruneCommand),

    /// List collectable methods
    Methods(MethodsCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
