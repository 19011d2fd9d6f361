// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use vcamera::Config;
use vcamera::backends::virtual_camera::SourceKind;

mod cli;

#[derive(Parser)]
#[command(name = "vcamera")]
#[command(about = "Sandboxed application host with a virtual camera")]
#[command(version = vcamera::constants::app_info::version())]
struct Cli {
    /// Configuration file (default: ~/.config/vcamera/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Sandbox root, overriding the configured data_root
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Log every launch fix
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a package binary (metadata is read from <binary>.json)
    Install {
        binary: PathBuf,

        /// Owning user id
        #[arg(short, long, default_value = "0")]
        user: u32,
    },

    /// Remove an installed package and its data
    Uninstall { package: String },

    /// List installed packages
    List,

    /// Launch an installed package
    Launch {
        package: String,

        #[arg(short, long, default_value = "0")]
        user: u32,
    },

    /// Show launch counters
    Stats {
        /// Reset the counters to zero
        #[arg(long)]
        reset: bool,
    },

    /// Show or change the virtual camera source
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Run a synthetic preview of the active source
    Preview {
        /// Preview duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Save the last delivered frame as PNG
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show which packages get camera interception
    Hooks,
}

#[derive(Subcommand)]
enum SourceAction {
    /// Print the active source
    Show,

    /// Switch to a new source
    Set {
        kind: SourceArg,

        /// File, directory or URL; unused for the real device
        locator: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Real,
    Video,
    Stream,
    Image,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Real => SourceKind::RealDevice,
            SourceArg::Video => SourceKind::LocalVideo,
            SourceArg::Stream => SourceKind::NetworkStream,
            SourceArg::Image => SourceKind::StaticImage,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=vcamera=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    if let Some(root) = cli.root {
        config.data_root = root;
    }
    if cli.verbose {
        config.verbose_launch_logging = true;
    }

    match cli.command {
        Commands::Install { binary, user } => cli::install(config, binary, user),
        Commands::Uninstall { package } => cli::uninstall(config, &package),
        Commands::List => cli::list(config),
        Commands::Launch { package, user } => cli::launch(config, &package, user),
        Commands::Stats { reset } => cli::stats(config, reset),
        Commands::Source { action } => match action {
            SourceAction::Show => cli::show_source(config),
            SourceAction::Set { kind, locator } => {
                cli::set_source(config, kind.into(), locator.unwrap_or_default())
            }
        },
        Commands::Preview { duration, output } => cli::preview(config, duration, output),
        Commands::Hooks => cli::hooks(config),
    }
}
