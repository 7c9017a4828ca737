//! JSON snapshot persistence for the attestation service.
//!
//! The snapshot is a cache: losing it only means re-observing messages from
//! the source chains. The destination chain stays authoritative for whether a
//! message was applied.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::aggregator::StoredAggregation;
use crate::error::Result;
use crate::protocol::Domain;

/// Current snapshot format
pub const SNAPSHOT_VERSION: u32 = 1;

/// Source polling position for one domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCursor {
    pub domain: Domain,
    pub cursor: u64,
}

/// Everything the service writes to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    pub cursors: Vec<SourceCursor>,
    pub entries: Vec<StoredAggregation>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            cursors: Vec::new(),
            entries: Vec::new(),
        }
    }
}

/// Stores snapshots in one JSON file, replaced atomically on each save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot, `None` if the file does not exist yet.
    pub async fn load(&self) -> Result<Option<Snapshot>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), event = "snapshot_missing");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        info!(
            path = %self.path.display(),
            entries = snapshot.entries.len(),
            event = "snapshot_loaded"
        );
        Ok(Some(snapshot))
    }

    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(
            path = %self.path.display(),
            entries = snapshot.entries.len(),
            event = "snapshot_saved"
        );
        Ok(())
    }
}
