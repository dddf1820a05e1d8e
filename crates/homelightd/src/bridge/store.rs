use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;

use super::model::LightSnapshot;
use super::model::StoredState;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to access state file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse state file {0}: {1}")]
    Parse(PathBuf, #[source] serde_json::Error),

    #[error("Failed to serialize stored state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("State writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Per-light snapshots, kept in memory and mirrored to a JSON file.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so a crash never leaves a truncated file behind.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    entries: Mutex<StoredState>,
}

impl StateStore {
    /// Load the store from `path`; a missing file yields an empty store
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| StoreError::Parse(path.clone(), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No stored state at {}, starting empty", path.display());
                StoredState::new()
            }
            Err(e) => return Err(StoreError::Io(path, e)),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot stored for a light, if any
    pub async fn get(&self, id: &str) -> Option<LightSnapshot> {
        self.entries.lock().await.get(id).cloned()
    }

    pub async fn snapshot(&self) -> StoredState {
        self.entries.lock().await.clone()
    }

    /// Merge new snapshots into the store and rewrite the file
    pub async fn merge(
        &self,
        updates: impl IntoIterator<Item = (String, LightSnapshot)>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let mut merged = entries.clone();
        merged.extend(updates);

        let contents = serde_json::to_vec_pretty(&merged)?;
        let path = self.path.clone();

        // Still holding the lock, so writers cannot reorder on disk
        tokio::task::spawn_blocking(move || write_atomic(&path, &contents)).await??;

        // Memory only moves forward once the file has been replaced
        *entries = merged;
        debug!("Stored state for {} lights", entries.len());
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let io_err = |e| StoreError::Io(path.to_path_buf(), e);

    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    file.write_all(contents).map_err(io_err)?;
    file.as_file().sync_all().map_err(io_err)?;
    file.persist(path).map_err(|e| io_err(e.error))?;

    Ok(())
}
