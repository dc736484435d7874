// Read-only static geospatial data served by the hub
// Contract only: raw bytes plus a last-write stamp used as the cache key.
// Parsing the OSM PBF / boundaries / shapefile content is the client's job.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::warn;

/// The three resources a hub can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticResource {
    /// Sector/airspace boundaries file
    Boundaries,
    /// Directory of terrain shape files
    Topologies,
    /// OSM PBF extract
    Geos,
}

impl FromStr for StaticResource {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "boundaries" => Ok(StaticResource::Boundaries),
            "topologies" => Ok(StaticResource::Topologies),
            "geos" => Ok(StaticResource::Geos),
            _ => Err(()),
        }
    }
}

/// Paths configured at startup; any of them may be absent, which turns the
/// matching endpoints into 404s.
pub struct StaticData {
    boundaries: Option<PathBuf>,
    topologies: Option<PathBuf>,
    geos: Option<PathBuf>,
}

impl StaticData {
    pub fn new(boundaries: Option<PathBuf>, topologies: Option<PathBuf>, geos: Option<PathBuf>) -> Self {
        StaticData { boundaries, topologies, geos }
    }

    pub fn topologies_dir(&self) -> Option<&Path> {
        self.topologies.as_deref()
    }

    fn path_of(&self, resource: StaticResource) -> Option<&Path> {
        match resource {
            StaticResource::Boundaries => self.boundaries.as_deref(),
            StaticResource::Topologies => self.topologies.as_deref(),
            StaticResource::Geos => self.geos.as_deref(),
        }
    }

    /// Last-write time of a resource; for the shapefile directory this is
    /// the newest entry.
    pub async fn last_write(&self, resource: StaticResource) -> Option<DateTime<Utc>> {
        let path = self.path_of(resource)?;
        match resource {
            StaticResource::Topologies => newest_mtime(path).await,
            _ => mtime(path).await,
        }
    }

    /// Raw download body. Files are served byte-for-byte; the shapefile
    /// directory is served as a JSON listing of its entries.
    pub async fn read(&self, resource: StaticResource) -> Option<Vec<u8>> {
        let path = self.path_of(resource)?;
        match resource {
            StaticResource::Topologies => {
                let listing = list_dir(path).await?;
                serde_json::to_vec(&listing).ok()
            }
            _ => match tokio::fs::read(path).await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!("static resource {:?} unreadable: {}", resource, e);
                    None
                }
            },
        }
    }
}

async fn mtime(path: &Path) -> Option<DateTime<Utc>> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    let modified = meta.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

async fn newest_mtime(dir: &Path) -> Option<DateTime<Utc>> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut newest: Option<DateTime<Utc>> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Ok(meta) = entry.metadata().await {
            if let Ok(modified) = meta.modified() {
                let stamp = DateTime::<Utc>::from(modified);
                if newest.map_or(true, |n| stamp > n) {
                    newest = Some(stamp);
                }
            }
        }
    }
    newest
}

async fn list_dir(dir: &Path) -> Option<serde_json::Value> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut files = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
        files.push(json!({ "name": name, "size": size }));
    }
    files.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    Some(serde_json::Value::Array(files))
}
