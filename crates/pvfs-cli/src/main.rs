//! # pvfs CLI
//!
//! Inspect and verify a pvfs record store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pvfs_config::logging::{init_logging, LogLevel};
use pvfs_config::Config;
use pvfs_store::FsRecords;

mod browse;
mod inspect;

/// pvfs - persistent virtual file system metadata store
#[derive(Parser)]
#[command(name = "pvfs")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Store root directory (overrides config and PVFS_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header, storage and content statistics
    Info {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Cross-check all storages and report problems
    Check,

    /// List the file system roots
    Roots {
        #[arg(long)]
        json: bool,
    },

    /// List the children of a directory
    Ls {
        /// Record id, or a root url followed by a path
        #[arg(value_name = "TARGET")]
        target: String,

        #[arg(long)]
        json: bool,
    },

    /// Write the stored content of a file to stdout
    Cat {
        #[arg(value_name = "TARGET")]
        target: String,
    },

    /// Print the path of every live record with one of the given names
    Find {
        #[arg(value_name = "NAME", required = true)]
        names: Vec<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file locations
    Path,
    /// Write a default config file
    Init {
        /// Write to ~/.pvfs/config.toml instead of .pvfs/config.toml
        #[arg(long)]
        global: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn });

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(root) = cli.root {
        config.storage.root = root;
    }
    // One-shot commands never need the background flusher.
    config.flush.enabled = false;

    match cli.command {
        Commands::Config { command } => cmd_config(&config, command),
        Commands::Info { json } => with_store(&config, |store| inspect::cmd_info(store, json)),
        Commands::Check => with_store(&config, inspect::cmd_check),
        Commands::Roots { json } => with_store(&config, |store| inspect::cmd_roots(store, json)),
        Commands::Ls { target, json } => with_store(&config, |store| browse::cmd_ls(store, &target, json)),
        Commands::Cat { target } => with_store(&config, |store| browse::cmd_cat(store, &target)),
        Commands::Find { names } => with_store(&config, |store| browse::cmd_find(store, &names)),
    }
}

/// Open the store, run `f`, and close the store even if `f` failed.
fn with_store(config: &Config, f: impl FnOnce(&FsRecords) -> Result<()>) -> Result<()> {
    let store = FsRecords::open(config)
        .with_context(|| format!("Failed to open store at {}", config.storage_root().display()))?;
    let result = f(&store);
    store.close().context("Failed to close store")?;
    result
}

fn cmd_config(config: &Config, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let text = toml::to_string_pretty(config).context("Failed to serialize config")?;
            print!("{}", text);
        }
        ConfigCommands::Path => {
            match Config::global_config_path() {
                Some(path) => println!("Global:  {}", path.display()),
                None => println!("Global:  (no home directory)"),
            }
            println!("Project: .pvfs/config.toml");
            println!("Store:   {}", config.storage_root().display());
        }
        ConfigCommands::Init { global } => {
            let path = if global {
                Config::global_config_path().context("No home directory")?
            } else {
                PathBuf::from(".pvfs/config.toml")
            };
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, Config::default_toml())?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
