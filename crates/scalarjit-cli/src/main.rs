//! scalarjit command-line tool
//!
//! Compiles JSON expression trees, runs them natively on the host or on
//! emulated accelerator devices, and inspects the runtime support module.

mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use scalarjit_engine::{CodegenConfig, CompilationOptions, DeviceType, OptLevel};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scalarjit")]
#[command(about = "Scalar expression compiler", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG applies otherwise
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Load the runtime support module from a file instead of the embedded copy
    #[arg(long = "runtime", global = true)]
    runtime_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an expression and print its IR and input slots
    Compile {
        /// Expression tree (JSON)
        file: PathBuf,
        #[command(flatten)]
        codegen: CodegenArgs,
        /// Print the IR as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compile an expression to native code and evaluate it
    Eval {
        /// Expression tree (JSON)
        file: PathBuf,
        #[command(flatten)]
        codegen: CodegenArgs,
        /// Argument values in slot order; hoisted literals default to their values
        #[arg(short, long = "input")]
        inputs: Vec<String>,
        /// Number of emulated accelerator devices
        #[arg(long, default_value_t = 1)]
        devices: usize,
    },

    /// List runtime support functions
    Runtime {
        /// Only show functions whose name contains this string
        #[arg(long)]
        filter: Option<String>,
        /// Print full IR bodies
        #[arg(long)]
        bodies: bool,
        /// Write the runtime module to this file
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DeviceArg {
    Host,
    Accelerator,
}

#[derive(Clone, Copy, ValueEnum)]
enum OptLevelArg {
    None,
    Default,
    Aggressive,
}

/// Flags shared by `compile` and `eval`
#[derive(Args)]
struct CodegenArgs {
    /// Target device
    #[arg(long, value_enum, default_value = "host")]
    device: DeviceArg,
    /// Pass literals as arguments instead of embedding them
    #[arg(long)]
    hoist_literals: bool,
    /// IR optimization level
    #[arg(long, value_enum, default_value = "default")]
    opt_level: OptLevelArg,
    /// Skip IR optimization and log every intermediate form
    #[arg(long)]
    debug: bool,
    /// Reject column references (constant expressions only)
    #[arg(long)]
    no_fetch_inputs: bool,
}

impl CodegenArgs {
    fn options(&self) -> CompilationOptions {
        CompilationOptions {
            device: match self.device {
                DeviceArg::Host => DeviceType::Host,
                DeviceArg::Accelerator => DeviceType::Accelerator,
            },
            hoist_literals: self.hoist_literals,
            opt_level: match self.opt_level {
                OptLevelArg::None => OptLevel::None,
                OptLevelArg::Default => OptLevel::Default,
                OptLevelArg::Aggressive => OptLevel::Aggressive,
            },
            debug: self.debug,
        }
    }

    fn fetch_inputs(&self) -> bool {
        !self.no_fetch_inputs
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = CodegenConfig { runtime_path: cli.runtime_path, ..Default::default() };

    match cli.command {
        Commands::Compile { file, codegen, json } => {
            commands::compile::execute(config, &file, codegen.options(), codegen.fetch_inputs(), json)
        }
        Commands::Eval { file, codegen, inputs, devices } => commands::eval::execute(
            config,
            &file,
            codegen.options(),
            codegen.fetch_inputs(),
            &inputs,
            devices,
        ),
        Commands::Runtime { filter, bodies, export } => {
            commands::runtime::execute(config, filter.as_deref(), bodies, export.as_deref())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_codegen_flags_map_to_options() {
        let cli = Cli::parse_from([
            "scalarjit",
            "eval",
            "expr.json",
            "--device",
            "accelerator",
            "--opt-level",
            "aggressive",
            "--hoist-literals",
            "--no-fetch-inputs",
        ]);
        let Commands::Eval { codegen, devices, .. } = cli.command else {
            panic!("expected eval");
        };
        let options = codegen.options();
        assert_eq!(options.device, DeviceType::Accelerator);
        assert_eq!(options.opt_level, OptLevel::Aggressive);
        assert!(options.hoist_literals);
        assert!(!options.debug);
        assert!(!codegen.fetch_inputs());
        assert_eq!(devices, 1);
    }
}
