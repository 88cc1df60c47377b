mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::build::{BuildArgs, BuildExit};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "prodline",
    about = "Sample, order and build the variants of a product line",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .prodline/ or .git/)
    #[arg(long, global = true, env = "PRODLINE_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize prodline in the current project
    Init {
        /// Project name written to config.yaml (default: folder name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Sample configurations and build them
    Build(BuildArgs),

    /// Count the valid configurations of the feature model
    Count,

    /// Check one .config file against the feature model
    Check {
        /// Path to the configuration file
        file: PathBuf,
    },

    /// Inspect the project config
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Build(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { name } => cmd::init::run(&root, name.as_deref()),
        Commands::Build(args) => cmd::build::run(&root, args, cli.json),
        Commands::Count => cmd::count::run(&root, cli.json),
        Commands::Check { file } => cmd::check::run(&root, &file, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        if let Some(exit) = e.downcast_ref::<BuildExit>() {
            eprintln!("{exit}");
            std::process::exit(exit.exit_code());
        }
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
