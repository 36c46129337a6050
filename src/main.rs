//! matchstats CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use matchstats::{
    commands::{
        cmd_audit, cmd_clean, cmd_extract, cmd_forget, cmd_init, cmd_run, cmd_status,
        cmd_transform, print_audit, print_extract_stats, print_init, print_prune_stats,
        print_status, print_transform_stats, AuditOptions, ExtractOptions, InitOptions,
    },
    config::Config,
    error::{Error, Result},
    meta::MetaDb,
    models::EntityRef,
    progress::LogWriterFactory,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit code of an extraction that stopped early and can be resumed
const EXIT_RESUMABLE: i32 = 2;

#[derive(Parser)]
#[command(name = "matchstats")]
#[command(version, about = "Football statistics crawler and table builder", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize matchstats configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,

        /// Root entity to walk from, as kind:id (repeatable)
        #[arg(long = "root", value_name = "KIND:ID")]
        roots: Vec<EntityRef>,
    },

    /// Fetch every match document reachable from the roots
    Extract {
        /// Walk these roots instead of the configured ones (kind:id, repeatable)
        #[arg(long = "root", value_name = "KIND:ID")]
        roots: Vec<EntityRef>,

        /// Discard any saved frontier and walk from the roots again
        #[arg(long)]
        fresh: bool,
    },

    /// Rebuild the match, team and player tables from stored documents
    Transform,

    /// Extract, then transform
    Run {
        /// Walk these roots instead of the configured ones (kind:id, repeatable)
        #[arg(long = "root", value_name = "KIND:ID")]
        roots: Vec<EntityRef>,

        /// Discard any saved frontier and walk from the roots again
        #[arg(long)]
        fresh: bool,
    },

    /// Show system status
    Status,

    /// Show skipped, dropped and flagged entities
    Audit {
        /// Only entries of this run
        #[arg(long = "run", value_name = "RUN_ID")]
        run_id: Option<String>,

        /// Maximum number of entries
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Delete stored documents so the next extraction fetches them again
    Forget {
        /// Match ids to forget
        #[arg(required = true)]
        match_ids: Vec<String>,
    },

    /// Delete every stored document
    Clean {
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(LogWriterFactory::default()))
            .init();
    }

    // Handle init command specially (doesn't need existing config)
    if matches!(cli.command, Commands::Init { .. }) {
        return handle_init(cli).await;
    }

    // Handle completions command (doesn't need config/db)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "matchstats", &mut std::io::stdout());
        return Ok(0);
    }

    // Load configuration
    let config = load_config(cli.config.as_deref())?;
    let db = MetaDb::connect(&config).await?;
    db.init_schema().await?;

    let json = cli.json;
    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Extract { roots, fresh } => {
            let stats = cmd_extract(&config, &db, ExtractOptions { roots, fresh }).await?;
            emit(json, &stats, print_extract_stats)?;
            if stats.is_resumable() {
                return Ok(EXIT_RESUMABLE);
            }
        }

        Commands::Transform => {
            let stats = cmd_transform(&config, &db).await?;
            emit(json, &stats, print_transform_stats)?;
        }

        Commands::Run { roots, fresh } => {
            let stats = cmd_run(&config, &db, ExtractOptions { roots, fresh }).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_extract_stats(&stats.extract);
                print_transform_stats(&stats.transform);
            }
            if stats.extract.is_resumable() {
                return Ok(EXIT_RESUMABLE);
            }
        }

        Commands::Status => {
            let status = cmd_status(&config, &db).await?;
            emit(json, &status, print_status)?;
        }

        Commands::Audit { run_id, limit } => {
            let report = cmd_audit(&db, AuditOptions { run_id, limit }).await?;
            emit(json, &report, print_audit)?;
        }

        Commands::Forget { match_ids } => {
            let stats = cmd_forget(&config, &match_ids)?;
            emit(json, &stats, print_prune_stats)?;
        }

        Commands::Clean { yes } => {
            if !yes {
                eprintln!("⚠️  This will delete ALL stored match documents!");
                eprintln!("Run with --yes to confirm.");
                return Ok(1);
            }
            let removed = cmd_clean(&config)?;
            if json {
                println!(r#"{{"status": "ok", "removed": {}}}"#, removed);
            } else {
                println!("✓ Removed {} stored document(s)", removed);
            }
        }
    }

    Ok(0)
}

fn emit<T: Serialize>(json: bool, value: &T, print: fn(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

async fn handle_init(cli: Cli) -> Result<i32> {
    let Commands::Init { force, roots } = cli.command else {
        unreachable!()
    };

    // Get the base directory: if user specifies config file, use its parent dir
    // Otherwise use default base dir
    let base_dir = match cli.config {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(Config::default_base_dir),
        Some(dir) => dir,
        None => Config::default_base_dir(),
    };

    let info = cmd_init(InitOptions {
        base_dir,
        force,
        roots,
    })
    .await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        let config = Config::load(&info.config_file)?;
        print_init(&info, &config.api.key_env);
    }
    Ok(0)
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = match path {
        Some(p) if p.is_dir() => p.join("config.toml"),
        Some(p) => p.to_path_buf(),
        None => Config::default_config_path(),
    };

    if !config_path.exists() {
        eprintln!("Config file not found: {}", config_path.display());
        return Err(Error::NotInitialized);
    }

    Config::load(&config_path)
}
