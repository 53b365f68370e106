use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::audit::RunContext;
use crate::domain::registration::record_key;
use crate::store::{write_json_atomic, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Replaced(usize),
    Appended,
    /// The record carried no usable key and was appended verbatim.
    AppendedUnkeyed,
}

/// Upsert persistence for JSON list files keyed by registration id.
///
/// Every read-merge-write cycle runs under one lock shared by all clones,
/// so concurrent writers never interleave on the same file.
#[derive(Clone, Debug)]
pub struct JsonListStore {
    write_lock: Arc<Mutex<()>>,
    context: RunContext,
}

impl JsonListStore {
    pub fn new(context: RunContext) -> Self {
        Self { write_lock: Arc::new(Mutex::new(())), context }
    }

    /// Missing files read as empty; corrupt or non-list content reads as
    /// empty with a warning. Only genuine I/O failures are errors.
    pub async fn read_list(&self, path: &Path) -> Result<Vec<Value>, StoreError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path: path.to_path_buf(), source }),
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(items)) => Ok(items),
            Ok(_) => {
                tracing::warn!(
                    event_name = "store.not_a_list",
                    run_id = %self.context.run_id,
                    path = %path.display(),
                    "stored file does not contain a list; starting from an empty list"
                );
                Ok(Vec::new())
            }
            Err(error) => {
                tracing::warn!(
                    event_name = "store.corrupt_file",
                    run_id = %self.context.run_id,
                    path = %path.display(),
                    error = %error,
                    "stored file is not valid JSON; starting from an empty list"
                );
                Ok(Vec::new())
            }
        }
    }

    pub async fn upsert(&self, path: &Path, record: Value) -> Result<UpsertOutcome, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut list = self.read_list(path).await?;
        let outcome = self.merge_logged(&mut list, record, path);
        write_json_atomic(path, &list).await?;
        Ok(outcome)
    }

    /// Merges the whole batch in order and writes the file once.
    pub async fn upsert_many(&self, path: &Path, records: Vec<Value>) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let mut list = self.read_list(path).await?;
        let count = records.len();
        for record in records {
            self.merge_logged(&mut list, record, path);
        }
        write_json_atomic(path, &list).await?;

        tracing::debug!(
            event_name = "store.batch_written",
            run_id = %self.context.run_id,
            path = %path.display(),
            records = count,
            total = list.len(),
            "batch upserted"
        );
        Ok(count)
    }

    fn merge_logged(&self, list: &mut Vec<Value>, record: Value, path: &Path) -> UpsertOutcome {
        let outcome = merge_record(list, record);
        if outcome == UpsertOutcome::AppendedUnkeyed {
            tracing::warn!(
                event_name = "store.unkeyed_record",
                run_id = %self.context.run_id,
                path = %path.display(),
                "record has no registration id; appended without deduplication"
            );
        }
        outcome
    }
}

/// Replaces the first record sharing `record`'s key in place, else appends.
/// A one-element list is unwrapped to its single record first.
pub fn merge_record(list: &mut Vec<Value>, record: Value) -> UpsertOutcome {
    let record = match record {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    };

    let Some(key) = record_key(&record) else {
        list.push(record);
        return UpsertOutcome::AppendedUnkeyed;
    };

    match list.iter().position(|existing| record_key(existing).as_deref() == Some(key.as_str())) {
        Some(index) => {
            list[index] = record;
            UpsertOutcome::Replaced(index)
        }
        None => {
            list.push(record);
            UpsertOutcome::Appended
        }
    }
}
