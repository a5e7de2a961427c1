//! CLI argument parsing for the kerntrace demo

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for the kernel table
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "kerntrace")]
#[command(version)]
#[command(
    about = "Trace a simulated GPU workload and report per-kernel timing",
    long_about = None
)]
pub struct Cli {
    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Suffix kernel names with SIMD width, group count and group size
    #[arg(short, long)]
    pub verbose: bool,

    /// Load tracer configuration from a TOML file
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of kernel launches in the simulated workload
    #[arg(short = 'k', long = "kernels", default_value_t = 4)]
    pub kernels: u32,

    /// Print every finished call as it completes
    #[arg(long = "print-calls")]
    pub print_calls: bool,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
