use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::store::{JsonListStore, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushMode {
    /// Buffers until `flush`/`flush_all` is awaited.
    Manual,
    /// Hands a destination's batch to the writer task once it reaches
    /// `batch_size`, without blocking the caller.
    Auto,
}

enum WriterCommand {
    Flush { path: PathBuf, records: Vec<Value> },
    Barrier { reply: oneshot::Sender<FlushReport> },
}

#[derive(Debug, Default)]
struct FlushReport {
    written: usize,
    failures: Vec<String>,
}

/// Buffered upsert persistence, one buffer per destination file.
///
/// In `Auto` mode all writes go through a single writer task, so batches for
/// the same file land in the order they were handed off. Anything still
/// buffered must be drained with `flush_all` before the writer is dropped.
pub struct BatchWriter {
    store: JsonListStore,
    batch_size: usize,
    mode: FlushMode,
    pending: BTreeMap<PathBuf, Vec<Value>>,
    auto_flushes: Arc<AtomicUsize>,
    writer: Option<mpsc::UnboundedSender<WriterCommand>>,
}

impl BatchWriter {
    pub fn manual(store: JsonListStore, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            mode: FlushMode::Manual,
            pending: BTreeMap::new(),
            auto_flushes: Arc::new(AtomicUsize::new(0)),
            writer: None,
        }
    }

    /// Spawns the writer task; must be called from within a tokio runtime.
    pub fn auto(store: JsonListStore, batch_size: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(store.clone(), receiver));

        Self {
            store,
            batch_size: batch_size.max(1),
            mode: FlushMode::Auto,
            pending: BTreeMap::new(),
            auto_flushes: Arc::new(AtomicUsize::new(0)),
            writer: Some(sender),
        }
    }

    pub fn mode(&self) -> FlushMode {
        self.mode
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn append(&mut self, path: &Path, record: Value) {
        let buffer = self.pending.entry(path.to_path_buf()).or_default();
        buffer.push(record);

        if self.mode == FlushMode::Auto && buffer.len() >= self.batch_size {
            let records = std::mem::take(buffer);
            self.auto_flushes.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(
                event_name = "batch.auto_flush",
                path = %path.display(),
                records = records.len(),
                "batch size reached; handing batch to writer"
            );
            self.dispatch(path.to_path_buf(), records);
        }
    }

    pub fn pending_count(&self, path: Option<&Path>) -> usize {
        match path {
            Some(path) => self.pending.get(path).map(Vec::len).unwrap_or(0),
            None => self.pending.values().map(Vec::len).sum(),
        }
    }

    /// Number of batches handed off automatically since construction.
    pub fn auto_flush_count(&self) -> usize {
        self.auto_flushes.load(Ordering::SeqCst)
    }

    /// In `Manual` mode a failed write leaves the batch buffered.
    pub async fn flush(&mut self, path: &Path) -> Result<usize, StoreError> {
        let records = self.pending.remove(path).unwrap_or_default();
        match self.mode {
            FlushMode::Manual => self.write_or_restore(path.to_path_buf(), records).await,
            FlushMode::Auto => {
                if !records.is_empty() {
                    self.dispatch(path.to_path_buf(), records);
                }
                self.barrier().await
            }
        }
    }

    /// Writes every buffered record. In `Auto` mode this also waits for the
    /// batches already handed to the writer and reports their failures. In
    /// `Manual` mode the first failing file stops the flush, and its batch and
    /// every batch not yet written stay buffered.
    pub async fn flush_all(&mut self) -> Result<usize, StoreError> {
        let pending = std::mem::take(&mut self.pending);

        match self.mode {
            FlushMode::Manual => {
                let mut written = 0;
                let mut batches = pending.into_iter();
                while let Some((path, records)) = batches.next() {
                    match self.write_or_restore(path, records).await {
                        Ok(count) => written += count,
                        Err(error) => {
                            self.pending.extend(batches);
                            return Err(error);
                        }
                    }
                }
                Ok(written)
            }
            FlushMode::Auto => {
                for (path, records) in pending.into_iter().filter(|(_, records)| !records.is_empty())
                {
                    self.dispatch(path, records);
                }
                self.barrier().await
            }
        }
    }

    async fn write_or_restore(&mut self, path: PathBuf, records: Vec<Value>) -> Result<usize, StoreError> {
        match self.store.upsert_many(&path, records.clone()).await {
            Ok(written) => Ok(written),
            Err(error) => {
                tracing::warn!(
                    event_name = "batch.flush_failed",
                    path = %path.display(),
                    records = records.len(),
                    error = %error,
                    "flush failed; batch stays buffered"
                );
                self.pending.entry(path).or_default().splice(0..0, records);
                Err(error)
            }
        }
    }

    fn dispatch(&self, path: PathBuf, records: Vec<Value>) {
        let Some(writer) = &self.writer else {
            return;
        };
        if writer.send(WriterCommand::Flush { path: path.clone(), records }).is_err() {
            tracing::error!(
                event_name = "batch.writer_stopped",
                path = %path.display(),
                "writer task is gone; batch was not persisted"
            );
        }
    }

    async fn barrier(&self) -> Result<usize, StoreError> {
        let writer = self.writer.as_ref().ok_or(StoreError::WriterStopped)?;
        let (reply, receive) = oneshot::channel();
        writer.send(WriterCommand::Barrier { reply }).map_err(|_| StoreError::WriterStopped)?;
        let report = receive.await.map_err(|_| StoreError::WriterStopped)?;

        match report.failures.first() {
            None => Ok(report.written),
            Some(first) => Err(StoreError::BackgroundFlush {
                failed: report.failures.len(),
                first: first.clone(),
            }),
        }
    }
}

impl Drop for BatchWriter {
    fn drop(&mut self) {
        let unflushed = self.pending_count(None);
        if unflushed > 0 {
            tracing::error!(
                event_name = "batch.unflushed_on_drop",
                records = unflushed,
                "batch writer dropped with buffered records that were never written"
            );
        }
    }
}

async fn run_writer(store: JsonListStore, mut commands: mpsc::UnboundedReceiver<WriterCommand>) {
    let mut report = FlushReport::default();

    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Flush { path, records } => {
                match store.upsert_many(&path, records).await {
                    Ok(written) => report.written += written,
                    Err(error) => {
                        tracing::error!(
                            event_name = "batch.flush_failed",
                            path = %path.display(),
                            error = %error,
                            "background batch flush failed"
                        );
                        report.failures.push(error.to_string());
                    }
                }
            }
            WriterCommand::Barrier { reply } => {
                let _ = reply.send(std::mem::take(&mut report));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::{BatchWriter, FlushMode};
    use crate::audit::RunContext;
    use crate::store::JsonListStore;

    fn store() -> JsonListStore {
        JsonListStore::new(RunContext::new("test"))
    }

    #[tokio::test]
    async fn auto_flush_fires_once_per_full_batch() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("matches.json");
        let mut writer = BatchWriter::auto(store(), 5);

        for index in 0..15 {
            writer.append(&path, json!({"registration_id": format!("R{index}")}));
        }
        assert_eq!(writer.auto_flush_count(), 3);
        assert_eq!(writer.pending_count(None), 0);

        let written = writer.flush_all().await.expect("barrier");
        assert_eq!(written, 15);
        assert_eq!(store().read_list(&path).await.expect("read").len(), 15);
    }

    #[tokio::test]
    async fn partial_batch_never_auto_flushes() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("matches.json");
        let mut writer = BatchWriter::auto(store(), 5);

        for index in 0..4 {
            writer.append(&path, json!({"registration_id": format!("R{index}")}));
        }
        assert_eq!(writer.auto_flush_count(), 0);
        assert_eq!(writer.pending_count(Some(&path)), 4);
        assert!(!path.exists());

        assert_eq!(writer.flush_all().await.expect("final flush"), 4);
        assert_eq!(store().read_list(&path).await.expect("read").len(), 4);
    }

    #[tokio::test]
    async fn buffers_are_kept_per_destination() {
        let dir = TempDir::new().expect("tempdir");
        let matches = dir.path().join("matches.json");
        let pos = dir.path().join("pos.json");
        let mut writer = BatchWriter::auto(store(), 2);

        writer.append(&matches, json!({"registration_id": "R1"}));
        writer.append(&pos, json!({"registration_id": "R1"}));
        assert_eq!(writer.auto_flush_count(), 0);

        writer.append(&matches, json!({"registration_id": "R2"}));
        assert_eq!(writer.auto_flush_count(), 1);
        assert_eq!(writer.pending_count(Some(&pos)), 1);

        writer.flush_all().await.expect("final flush");
        assert_eq!(store().read_list(&pos).await.expect("read").len(), 1);
    }

    #[tokio::test]
    async fn manual_flush_of_one_file_leaves_others_buffered() {
        let dir = TempDir::new().expect("tempdir");
        let matches = dir.path().join("matches.json");
        let pos = dir.path().join("pos.json");
        let mut writer = BatchWriter::manual(store(), 1);
        assert_eq!(writer.mode(), FlushMode::Manual);

        writer.append(&matches, json!({"registration_id": "R1", "v": 1}));
        writer.append(&matches, json!({"registration_id": "R1", "v": 2}));
        writer.append(&pos, json!({"registration_id": "R1"}));
        assert_eq!(writer.auto_flush_count(), 0);

        assert_eq!(writer.flush(&matches).await.expect("flush matches"), 2);
        assert_eq!(writer.pending_count(Some(&pos)), 1);
        assert_eq!(
            store().read_list(&matches).await.expect("read"),
            vec![json!({"registration_id": "R1", "v": 2})]
        );

        writer.flush_all().await.expect("flush rest");
        assert_eq!(writer.pending_count(None), 0);
    }

    #[tokio::test]
    async fn failed_manual_flush_keeps_every_unwritten_batch() {
        let dir = TempDir::new().expect("tempdir");
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "not a directory").expect("write blocker");
        let unreachable = blocker.join("matches.json");
        let pos = dir.path().join("pos.json");
        let mut writer = BatchWriter::manual(store(), 10);

        writer.append(&unreachable, json!({"registration_id": "R1"}));
        writer.append(&pos, json!({"registration_id": "R1", "price": 3}));

        assert!(writer.flush_all().await.is_err());
        assert_eq!(writer.pending_count(Some(&unreachable)), 1);
        assert_eq!(writer.pending_count(Some(&pos)), 1);
        assert!(!pos.exists());

        std::fs::remove_file(&blocker).expect("remove blocker");
        assert_eq!(writer.flush_all().await.expect("retry succeeds"), 2);
        assert_eq!(writer.pending_count(None), 0);
        assert_eq!(store().read_list(&unreachable).await.expect("read").len(), 1);
    }
}
