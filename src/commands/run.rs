//! Run command: extract, then rebuild the tables

use super::{cmd_extract, cmd_transform, ExtractOptions, ExtractStats, TransformStats};
use crate::config::Config;
use crate::error::Result;
use crate::meta::MetaDb;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub extract: ExtractStats,
    pub transform: TransformStats,
}

/// Extract then transform. Tables are rebuilt from whatever is stored even
/// when the walk paused, so partial progress is usable right away.
pub async fn cmd_run(config: &Config, db: &MetaDb, options: ExtractOptions) -> Result<PipelineStats> {
    let extract = cmd_extract(config, db, options).await?;
    if extract.is_resumable() {
        warn!(
            "Extraction {} with {} entities pending; building tables from stored documents",
            extract.status, extract.pending_entities
        );
    }
    let transform = cmd_transform(config, db).await?;
    Ok(PipelineStats { extract, transform })
}
