//! Init command implementation

use crate::config::{Config, RootEntity};
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use crate::models::EntityRef;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub force: bool,
    /// Roots written into the new config
    pub roots: Vec<EntityRef>,
}

/// Where things were created
#[derive(Debug, Clone, Serialize)]
pub struct InitInfo {
    pub base_dir: PathBuf,
    pub config_file: PathBuf,
    pub db_file: PathBuf,
    pub documents_dir: PathBuf,
    pub tables_dir: PathBuf,
    pub roots: usize,
}

/// Initialize matchstats configuration and database
pub async fn cmd_init(options: InitOptions) -> Result<InitInfo> {
    let InitOptions {
        base_dir,
        force,
        roots,
    } = options;

    let mut config = Config::default();
    config.init_paths(Some(base_dir));
    config.roots = roots
        .iter()
        .map(|r| RootEntity {
            kind: r.kind,
            id: r.id.clone(),
        })
        .collect();

    if config.paths.config_file.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config.paths.config_file.display()
        )));
    }

    std::fs::create_dir_all(&config.paths.base_dir)?;
    config.validate()?;
    config.save()?;
    info!("Created config at {:?}", config.paths.config_file);

    let db = MetaDb::connect(&config).await?;
    db.init_schema().await?;
    info!("Created database at {:?}", config.paths.db_file);

    std::fs::create_dir_all(config.documents_dir())?;
    std::fs::create_dir_all(config.tables_dir())?;

    Ok(InitInfo {
        documents_dir: config.documents_dir(),
        tables_dir: config.tables_dir(),
        base_dir: config.paths.base_dir,
        config_file: config.paths.config_file,
        db_file: config.paths.db_file,
        roots: config.roots.len(),
    })
}

/// Print init result to console
pub fn print_init(info: &InitInfo, key_env: &str) {
    println!("✓ Initialized matchstats at {:?}", info.base_dir);
    println!("\nConfiguration: {:?}", info.config_file);
    println!("Database: {:?}", info.db_file);
    println!("Documents: {:?}", info.documents_dir);
    println!("Tables: {:?}", info.tables_dir);
    println!("\nNext steps:");
    if info.roots == 0 {
        println!("  Add [[roots]] entries to the config (kind = \"season\", id = \"sr:season:...\")");
    }
    println!("  export {}=...                 # API key", key_env);
    println!("  matchstats extract                # Fetch match documents");
    println!("  matchstats transform              # Build the tables");
}
