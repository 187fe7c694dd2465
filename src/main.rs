//! APM Capture CLI
//!
//! Offline tooling around captured traces: rolls up raw capture records,
//! renders trace profiles as flamegraphs and validates files.

use anyhow::Result;
use apm_capture::commands::{
    display_schema, display_version, execute_flamegraph, execute_rollup, validate_args,
    validate_config_file, validate_trace_file, FlamegraphArgs, RollupArgs,
};
use apm_capture::flamegraph::{FlamegraphConfig, FlamegraphPalette};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use std::path::PathBuf;

/// APM Capture - trace capture and rollup tooling
#[derive(Parser, Debug)]
#[command(name = "apm-capture")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Palette {
    Hot,
    Cool,
}

impl From<Palette> for FlamegraphPalette {
    fn from(palette: Palette) -> Self {
        match palette {
            Palette::Hot => FlamegraphPalette::Hot,
            Palette::Cool => FlamegraphPalette::Cool,
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Roll up raw capture records into coarser buckets
    Rollup {
        /// JSON array of raw capture records
        #[arg(short, long)]
        input: PathBuf,

        /// Output path for rolled-up records
        #[arg(short, long, default_value = "rollup.json")]
        output: PathBuf,

        /// Config file with rollup levels
        #[arg(short, long, env = "APM_CAPTURE_CONFIG")]
        config: Option<PathBuf>,

        /// Level to write (1 = first rollup level)
        #[arg(long, default_value = "1")]
        level: usize,

        /// Epoch millis to use as the current time
        #[arg(long)]
        now: Option<u64>,

        /// Print text summary to stdout
        #[arg(long)]
        summary: bool,
    },

    /// Render the stack profile of a trace as an SVG flamegraph
    Flamegraph {
        /// Trace view JSON
        #[arg(short, long)]
        input: PathBuf,

        /// Output path for SVG flamegraph
        #[arg(short, long, default_value = "flamegraph.svg")]
        output: PathBuf,

        /// Use the fine profile
        #[arg(long)]
        fine: bool,

        /// Flamegraph title
        #[arg(long)]
        title: Option<String>,

        /// Flamegraph width in pixels
        #[arg(long, default_value = "1200")]
        width: usize,

        /// Frame colors
        #[arg(long, value_enum, default_value = "hot")]
        palette: Palette,

        /// Print this many hottest stacks to stdout
        #[arg(long)]
        summary: Option<usize>,
    },

    /// Validate a trace view JSON file
    Validate {
        /// Path to trace JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Validate a configuration file
    Config {
        /// Path to config JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Display schema information
    Schema {
        /// Show full schema details
        #[arg(long)]
        show: bool,
    },

    /// Display version information
    Version,
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    // Execute command
    match cli.command {
        Commands::Rollup {
            input,
            output,
            config,
            level,
            now,
            summary,
        } => {
            let args = RollupArgs {
                input,
                output,
                config,
                level,
                now_millis: now,
                print_summary: summary,
            };

            // Validate args first
            validate_args(&args)?;

            execute_rollup(args)?;
        }

        Commands::Flamegraph {
            input,
            output,
            fine,
            title,
            width,
            palette,
            summary,
        } => {
            let mut config = FlamegraphConfig::new().with_palette(palette.into());
            if let Some(title_str) = title {
                config = config.with_title(title_str);
            }
            config.width = width;

            execute_flamegraph(FlamegraphArgs {
                input,
                output,
                fine,
                flamegraph_config: config,
                summary_lines: summary,
            })?;
        }

        Commands::Validate { file } => {
            validate_trace_file(file)?;
        }

        Commands::Config { file } => {
            validate_config_file(file)?;
        }

        Commands::Schema { show } => {
            display_schema(show);
        }

        Commands::Version => {
            display_version();
        }
    }

    Ok(())
}
