//! `libfs` — CLI entry point. Mirrors `scripts/libfs.py::main`'s subparser
//! wiring (`update`/`mount`), rebuilt on `clap` derive, with a
//! `tracing`/`tracing-subscriber` bootstrap.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "libfs=debug";

#[derive(Parser)]
#[command(name = "libfs", version, about = "A tag-driven virtual filesystem for media libraries")]
struct Cli {
    /// Optional structured logging config (filter directives, log file path).
    #[arg(long, global = true)]
    logconf: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scans `source_dir` and folds every readable file into `library`.
    Update {
        #[arg(long = "type", value_enum)]
        r#type: PluginType,
        #[arg(long)]
        remove_obsolete: bool,
        source_dir: PathBuf,
        library: String,
    },
    /// Mounts `library` read/rename-only at `mountpoint`.
    Mount {
        #[arg(long)]
        debug_fuse: bool,
        #[arg(long)]
        view: Option<String>,
        library: String,
        mountpoint: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PluginType {
    Audio,
    Image,
    None,
}

impl PluginType {
    fn as_str(self) -> &'static str {
        match self {
            PluginType::Audio => "audio",
            PluginType::Image => "image",
            PluginType::None => "none",
        }
    }
}

/// Loads filter directives from `--logconf` via the `config` crate, falling
/// back to `RUST_LOG` / [`DEFAULT_FILTER`] when no config file is given.
fn init_logging(logconf: Option<&PathBuf>) -> Result<()> {
    let filter = match logconf {
        Some(path) => {
            let settings = config::Config::builder()
                .add_source(config::File::from(path.as_path()))
                .build()
                .with_context(|| format!("loading --logconf {}", path.display()))?;
            settings
                .get_string("filter")
                .unwrap_or_else(|_| DEFAULT_FILTER.to_string())
        }
        None => std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.logconf.as_ref()) {
        eprintln!("libfs: failed to initialize logging: {e:#}");
        return ExitCode::from(2);
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start tokio runtime");
            return ExitCode::from(2);
        }
    };

    match run(&rt, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "libfs command failed");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Maps a fatal mount/open-time failure onto the exit codes the CLI grammar
/// documents: 1 for an unusable/missing database, 2 for an unsupported
/// backend scheme, 1 for anything else fatal.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<libfs_storage::StorageError>() {
        Some(libfs_storage::StorageError::UnsupportedScheme(_)) => 2,
        _ => 1,
    }
}

/// Validates the connection-string scheme before doing anything else, so an
/// unsupported backend is reported with exit code 2 even once the string
/// has passed through `Library::open`'s `LibfsError` wrapping, which would
/// otherwise erase the distinction from a plain missing-database failure
/// (exit code 1).
fn check_connection_string(connection_string: &str) -> Result<()> {
    match libfs_storage::backend::resolve_db_path(connection_string) {
        Err(e @ libfs_storage::StorageError::UnsupportedScheme(_)) => Err(e.into()),
        _ => Ok(()),
    }
}

fn run(rt: &tokio::runtime::Runtime, command: Command) -> Result<()> {
    match command {
        Command::Update {
            r#type,
            remove_obsolete,
            source_dir,
            library,
        } => {
            check_connection_string(&library)?;
            rt.block_on(run_update(r#type, remove_obsolete, &source_dir, &library))
        }
        Command::Mount {
            debug_fuse,
            view,
            library,
            mountpoint,
        } => {
            check_connection_string(&library)?;
            libfs_fuse::mount(rt, &library, view.as_deref(), &mountpoint, debug_fuse)
        }
    }
}

async fn run_update(
    plugin_type: PluginType,
    remove_obsolete: bool,
    source_dir: &std::path::Path,
    library: &str,
) -> Result<()> {
    let plugin = libfs_storage::by_name(plugin_type.as_str())
        .with_context(|| format!("unknown plugin type {}", plugin_type.as_str()))?;
    let magic = libfs_core::Magic {
        valid_keys: plugin.valid_keys(),
        default_view: plugin.default_view(),
        plugin: plugin_type.as_str().to_string(),
    };

    let catalog = libfs_storage::Catalog::open(library, Some(magic)).await?;
    let report =
        libfs_storage::scanner::scan(&catalog, plugin.as_ref(), source_dir, remove_obsolete)
            .await?;

    tracing::info!(
        added = report.added,
        skipped = report.skipped,
        removed = report.removed,
        "update complete"
    );
    Ok(())
}
