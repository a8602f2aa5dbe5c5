use std::path::PathBuf;

use clap::{Args, Parser};

/// Replay an I2C controller script against simulated devices.
#[derive(Debug, Parser)]
#[clap(about, version)]
pub struct App {
    /// Script of controller operations, one per line.
    pub script: PathBuf,

    /// TOML controller configuration. Defaults apply when omitted.
    #[clap(long, short)]
    pub config: Option<PathBuf>,

    #[clap(flatten)]
    pub output: OutputOptions,
}

#[derive(Clone, Debug, Args)]
#[command(next_help_heading = "Output Options")]
pub struct OutputOptions {
    /// Tracing filter for the controller engine.
    #[clap(
        long = "trace",
        alias = "log",
        env = "I2C_SIM_TRACE",
        default_value = "warn"
    )]
    pub trace_filter: tracing_subscriber::filter::Targets,
}
