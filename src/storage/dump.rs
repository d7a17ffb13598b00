// src/storage/dump.rs

//! One-shot export of every stored area into a single JSON document.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Area;
use crate::storage::LocalStorage;

/// Exported document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaDump {
    pub exported_at: DateTime<Utc>,
    pub count: usize,
    pub areas: Vec<Area>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpSummary {
    pub count: usize,
    pub routes: usize,
    pub output: PathBuf,
}

/// Write all stored areas, ordered by key, to `output`.
pub async fn dump(storage: &LocalStorage, output: &Path) -> Result<DumpSummary> {
    let areas = storage.load_areas().await?;
    let routes: usize = areas.iter().map(Area::route_count).sum();

    let document = AreaDump {
        exported_at: Utc::now(),
        count: areas.len(),
        areas,
    };
    let bytes = serde_json::to_vec_pretty(&document)?;

    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = output.with_extension("tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, output).await?;

    log::info!(
        "Exported {} areas ({} routes) to {}",
        document.count,
        routes,
        output.display()
    );

    Ok(DumpSummary {
        count: document.count,
        routes,
        output: output.to_path_buf(),
    })
}
