//! spkg-compose CLI
//!
//! Entry point for the `spkg-compose` command-line tool.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use spkg_buildserver::{BuildServer, BuildServerConfig, LoadOutcome, ShellBackend};
use spkg_compose::build::build_local;
use spkg_compose::config::{DEFAULT_BUILD_SERVER_CONFIG_PATH, DEFAULT_CONFIG_PATH};
use spkg_compose::{FetchOutcome, Orchestrator, OrchestratorConfig};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "spkg-compose")]
#[command(about = "Build orchestration for spkg packages", version)]
struct Cli {
    /// Orchestrator root directory
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a compose file on this machine (work dir: <root>/_work)
    Build {
        /// Path to the compose file
        compose: PathBuf,
    },

    /// Run the orchestrator: routines, upstream tracking and updates
    Server {
        /// Path to config file (default: <root>/data/config.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// Run a build server
    BuildServer {
        /// Path to config file (default: <root>/data/buildserver.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// Run one indexing pass
    Index {
        /// Path to config file (default: <root>/data/config.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// Run one checkout pass now
    Check {
        /// Path to config file (default: <root>/data/config.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Only check this package
        package: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    spkg_compose::logging::init(cli.verbose);

    match cli.command {
        Commands::Build { compose } => run_build(&cli.root, &compose),
        Commands::Server { config } => run_server(&cli.root, config),
        Commands::BuildServer { config } => run_build_server(&cli.root, config),
        Commands::Index { config } => run_index(&cli.root, config),
        Commands::Check { config, package } => run_check(&cli.root, config, package.as_deref()),
    }
}

fn run_build(root: &Path, compose: &Path) {
    match build_local(root, compose, &ShellBackend::new()) {
        Ok(package) => println!("Package built as {}", package.display()),
        Err(e) => {
            error!(compose = %compose.display(), error = %e, "build failed");
            process::exit(1);
        }
    }
}

/// Stop flag set on Ctrl-C.
fn stop_flag() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("shutdown requested");
        handler_flag.store(true, Ordering::Release);
    }) {
        error!(error = %e, "failed to install Ctrl-C handler");
    }
    stop
}

fn load_orchestrator(root: &Path, config_path: Option<PathBuf>) -> Orchestrator {
    let path = config_path.unwrap_or_else(|| root.join(DEFAULT_CONFIG_PATH));
    let config = match OrchestratorConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %path.display(), error = %e, "configuration error");
            process::exit(1);
        }
    };

    match Orchestrator::new(root, config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!(error = %e, "failed to start orchestrator");
            process::exit(1);
        }
    }
}

fn run_server(root: &Path, config_path: Option<PathBuf>) {
    info!(version = env!("CARGO_PKG_VERSION"), "starting spkg-compose server");
    let orchestrator = Arc::new(load_orchestrator(root, config_path));
    let stop = stop_flag();

    orchestrator.scheduler().run(&stop);
}

fn run_build_server(root: &Path, config_path: Option<PathBuf>) {
    let path = config_path.unwrap_or_else(|| root.join(DEFAULT_BUILD_SERVER_CONFIG_PATH));
    let config = match BuildServerConfig::load_or_init(&path) {
        Ok(LoadOutcome::Loaded(config)) => config,
        Ok(LoadOutcome::Created(path)) => {
            info!(
                path = %path.display(),
                "created default build server config; adjust it and start again"
            );
            return;
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "configuration error");
            process::exit(1);
        }
    };

    info!(
        version = spkg_buildserver::BUILD_SERVER_VERSION,
        name = %config.name,
        "starting build server"
    );
    let server = BuildServer::with_defaults(config);
    let listener = match server.bind() {
        Ok(listener) => listener,
        Err(e) => {
            error!(
                address = %server.context().config.bind_address(),
                error = %e,
                "failed to bind"
            );
            process::exit(1);
        }
    };

    let stop = stop_flag();
    if let Err(e) = server.serve(listener, &stop) {
        error!(error = %e, "build server failed");
        process::exit(1);
    }
}

fn run_index(root: &Path, config_path: Option<PathBuf>) {
    let orchestrator = load_orchestrator(root, config_path);
    match orchestrator.index_packages() {
        Ok(found) => println!("Indexed {} new package(s)", found),
        Err(e) => {
            error!(error = %e, "indexing failed");
            process::exit(1);
        }
    }
}

fn run_check(root: &Path, config_path: Option<PathBuf>, package: Option<&str>) {
    let orchestrator = load_orchestrator(root, config_path);
    match orchestrator.checkout(package) {
        Ok(outcomes) => {
            for (id, outcome) in outcomes {
                println!("{}: {}", id, describe(&outcome));
            }
        }
        Err(e) => {
            error!(error = %e, "checkout failed");
            process::exit(1);
        }
    }
}

fn describe(outcome: &FetchOutcome) -> String {
    use spkg_compose::UpdateOutcome;

    match outcome {
        FetchOutcome::NotTracked => "not tracked".to_string(),
        FetchOutcome::NoUpstreamState => "no upstream releases or commits".to_string(),
        FetchOutcome::FirstObservation { marker } => format!("now tracking {}", marker),
        FetchOutcome::UpToDate => "up to date".to_string(),
        FetchOutcome::Updated(UpdateOutcome::Committed { version }) => format!("updated to {}", version),
        FetchOutcome::Updated(UpdateOutcome::RolledBack { failed }) => {
            format!("update rolled back, failed: {}", failed.join(", "))
        }
        FetchOutcome::Updated(UpdateOutcome::Aborted { missing }) => {
            format!("update aborted, no build server for: {}", missing.join(", "))
        }
        FetchOutcome::Updated(UpdateOutcome::Skipped) => "already at target version".to_string(),
    }
}
