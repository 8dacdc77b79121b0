//! Clusterkit CLI entrypoint.
//!
//! This is the main entrypoint for the clusterkit command-line tool.

use std::process::ExitCode;
use std::sync::Arc;

use clusterkit::cli::{Cli, Commands, OutputFormatter};
use clusterkit::config::toolkit_version;
use clusterkit::error::Result;
use clusterkit::modulereader::ModuleResolver;
use clusterkit::pipeline::{self, ExpandOptions, Pipeline};

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(output) => {
            print_output(&output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprint!("{}", formatter.format_error(&e));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[allow(clippy::print_stdout)]
fn print_output(output: &str) {
    print!("{output}");
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<String> {
    let create = cli.command.create_options();

    match cli.command {
        Commands::Version => Ok(formatter.format_version(&toolkit_version())),
        Commands::Expand { blueprint, out } => {
            let options = ExpandOptions::from(blueprint);
            let pipeline = build_pipeline(&options)?;
            let expansion = pipeline.expand_to_file(&options, &out).await?;
            Ok(formatter.format_expansion(&expansion, &out))
        }
        Commands::Create { blueprint, .. } => {
            let options = ExpandOptions::from(blueprint);
            let pipeline = build_pipeline(&options)?;
            let create = create.unwrap_or_default();
            let created = pipeline.create(&options, &create).await?;
            Ok(formatter.format_created(&created))
        }
    }
}

/// Loads the blueprint's `.env` file and builds the pipeline.
fn build_pipeline(options: &ExpandOptions) -> Result<Pipeline> {
    pipeline::load_environment(&options.blueprint)?;

    let resolver = ModuleResolver::default();
    debug!(
        "Embedded modules root: {}",
        resolver.embedded_root().display()
    );
    Ok(Pipeline::new(Arc::new(resolver)))
}
