//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::builder::BoolishValueParser;
use clap::{Parser, Subcommand};

use unity::output::{ColorChoice, OutputConfig};

use crate::commands;

/// Unity - Test recorded tool scripts across many tool versions
#[derive(Parser, Debug)]
#[command(name = "unity")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Colorize the report
    #[arg(long, global = true, value_name = "WHEN", value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Log at debug level regardless of --log-level
    #[arg(long, global = true, env = "UNITY_DEBUG", value_parser = BoolishValueParser::new())]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run module scripts against their manifest versions and extra versions
    Test(commands::test::TestArgs),

    /// Run one module's scripts in this process (used inside the container)
    #[command(hide = true)]
    Sandbox(commands::sandbox::SandboxArgs),
}

impl Cli {
    fn init_logging(&self) {
        let level = if self.debug {
            "debug"
        } else {
            self.log_level.as_str()
        };
        let _ = env_logger::Builder::new()
            .parse_filters(level)
            .format_timestamp(None)
            .format_target(false)
            .try_init();
    }

    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        self.init_logging();
        let output = OutputConfig::new(self.color);

        match self.command {
            Commands::Test(args) => commands::test::execute(args, &output),
            Commands::Sandbox(args) => commands::sandbox::execute(args),
        }
    }
}
