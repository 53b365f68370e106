pub mod batch;
pub mod list_store;

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

pub use batch::{BatchWriter, FlushMode};
pub use list_store::{merge_record, JsonListStore, UpsertOutcome};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o failure on `{path}`: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("could not serialize records for `{path}`: {source}")]
    Serialize { path: PathBuf, source: serde_json::Error },
    #[error("{failed} background flush(es) failed; first failure: {first}")]
    BackgroundFlush { failed: usize, first: String },
    #[error("batch writer task stopped before acknowledging the flush")]
    WriterStopped,
}

/// Serializes `value` as pretty JSON and replaces `path` via a sibling temp
/// file, so readers never observe a half-written document.
pub async fn write_json_atomic<T>(path: &Path, value: &T) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec_pretty(value)
        .map_err(|source| StoreError::Serialize { path: path.to_path_buf(), source })?;
    write_bytes_atomic(path, &body).await
}

pub async fn write_bytes_atomic(path: &Path, body: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| StoreError::Io { path: parent.to_path_buf(), source })?;
    }

    let mut temp_name = path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    tokio::fs::write(&temp_path, body)
        .await
        .map_err(|source| StoreError::Io { path: temp_path.clone(), source })?;
    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|source| StoreError::Io { path: path.to_path_buf(), source })
}
