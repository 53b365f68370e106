//! Capacity allocator: the single writer of the supplier capacity file.
//!
//! The ledger lives behind one async mutex. An increment mutates a copy,
//! awaits the file write and only then commits, so a failed write leaves the
//! in-memory ledger and the file in agreement.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::audit::RunContext;
use crate::domain::capacity::CapacityRecord;
use crate::domain::offer::{OfferCatalog, SupplierId};
use crate::store::{write_json_atomic, StoreError};

#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("supplier {supplier_id} capacity exceeded: {used} of {capacity} already used")]
    Exceeded { supplier_id: SupplierId, used: u32, capacity: u32 },
    #[error("supplier {0} is not present in the capacity ledger")]
    UnknownSupplier(SupplierId),
    #[error("match record carries neither `supplier_id` nor `SupplierID`")]
    MissingSupplier,
    #[error("capacity file not found: `{0}`")]
    NotFound(PathBuf),
    #[error("capacity file `{path}` is not a valid capacity map: {source}")]
    Format { path: PathBuf, source: serde_json::Error },
    #[error("could not read capacity file `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error(transparent)]
    Write(#[from] StoreError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResetTarget {
    All,
    Supplier(SupplierId),
}

/// Map from supplier id to its capacity record, serialized as a JSON object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapacityLedger {
    records: BTreeMap<SupplierId, CapacityRecord>,
}

impl CapacityLedger {
    pub fn from_catalog(catalog: &OfferCatalog) -> Self {
        let records = catalog
            .supplier_offers
            .iter()
            .filter(|offer| !offer.supplier_id.0.trim().is_empty())
            .map(|offer| {
                (offer.supplier_id.clone(), CapacityRecord::new(offer.supplier_id.clone(), offer.capacity))
            })
            .collect();
        Self { records }
    }

    pub fn get(&self, supplier_id: &SupplierId) -> Option<&CapacityRecord> {
        self.records.get(supplier_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &CapacityRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fails without mutation when the supplier is unknown or full.
    pub fn increment(&mut self, supplier_id: &SupplierId) -> Result<CapacityRecord, CapacityError> {
        let record = self
            .records
            .get_mut(supplier_id)
            .ok_or_else(|| CapacityError::UnknownSupplier(supplier_id.clone()))?;
        record.try_increment().map_err(|(used, capacity)| CapacityError::Exceeded {
            supplier_id: supplier_id.clone(),
            used,
            capacity,
        })?;
        Ok(record.clone())
    }

    pub fn reset(&mut self, target: &ResetTarget) -> Result<usize, CapacityError> {
        match target {
            ResetTarget::All => {
                self.records.values_mut().for_each(CapacityRecord::reset);
                Ok(self.records.len())
            }
            ResetTarget::Supplier(supplier_id) => {
                let record = self
                    .records
                    .get_mut(supplier_id)
                    .ok_or_else(|| CapacityError::UnknownSupplier(supplier_id.clone()))?;
                record.reset();
                Ok(1)
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct CapacityAllocator {
    path: PathBuf,
    ledger: Arc<Mutex<CapacityLedger>>,
    context: RunContext,
}

impl CapacityAllocator {
    /// Loads the capacity file, or initializes it from `catalog` with every
    /// supplier at `Used = 0` when it does not exist yet.
    pub async fn open(
        path: impl Into<PathBuf>,
        catalog: &OfferCatalog,
        context: RunContext,
    ) -> Result<Self, CapacityError> {
        let path = path.into();
        let ledger = match read_ledger(&path).await {
            Ok(ledger) => ledger,
            Err(CapacityError::NotFound(_)) => {
                let ledger = CapacityLedger::from_catalog(catalog);
                write_json_atomic(&path, &ledger).await?;
                tracing::info!(
                    event_name = "capacity.initialized",
                    run_id = %context.run_id,
                    path = %path.display(),
                    suppliers = ledger.len(),
                    "capacity file initialized from offer catalog"
                );
                ledger
            }
            Err(error) => return Err(error),
        };

        Ok(Self { path, ledger: Arc::new(Mutex::new(ledger)), context })
    }

    /// Opens an existing capacity file; a missing file is an error.
    pub async fn load(path: impl Into<PathBuf>, context: RunContext) -> Result<Self, CapacityError> {
        let path = path.into();
        let ledger = read_ledger(&path).await?;
        Ok(Self { path, ledger: Arc::new(Mutex::new(ledger)), context })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> CapacityLedger {
        self.ledger.lock().await.clone()
    }

    /// Consumes one unit of `supplier_id`'s capacity and persists the ledger
    /// before returning.
    pub async fn increment(&self, supplier_id: &SupplierId) -> Result<CapacityRecord, CapacityError> {
        let mut ledger = self.ledger.lock().await;
        let mut next = ledger.clone();

        let record = match next.increment(supplier_id) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(
                    event_name = "capacity.increment_rejected",
                    run_id = %self.context.run_id,
                    supplier_id = %supplier_id,
                    error = %error,
                    "capacity increment rejected"
                );
                return Err(error);
            }
        };

        write_json_atomic(&self.path, &next).await?;
        *ledger = next;

        tracing::info!(
            event_name = "capacity.incremented",
            run_id = %self.context.run_id,
            supplier_id = %supplier_id,
            used = record.used,
            capacity = record.capacity,
            used_pct = record.used_pct,
            "supplier capacity consumed"
        );
        Ok(record)
    }

    /// Increments the supplier of the last record in `matches`, the business
    /// rule being one unit of one supplier per registration.
    pub async fn increment_for_latest_match(
        &self,
        matches: &[Value],
    ) -> Result<CapacityRecord, CapacityError> {
        let supplier_id = matches.last().and_then(supplier_of).ok_or(CapacityError::MissingSupplier)?;
        self.increment(&supplier_id).await
    }

    pub async fn reset(&self, target: &ResetTarget) -> Result<usize, CapacityError> {
        let mut ledger = self.ledger.lock().await;
        let mut next = ledger.clone();
        let reset = next.reset(target)?;
        write_json_atomic(&self.path, &next).await?;
        *ledger = next;

        tracing::info!(
            event_name = "capacity.reset",
            run_id = %self.context.run_id,
            path = %self.path.display(),
            suppliers = reset,
            "supplier capacity reset"
        );
        Ok(reset)
    }
}

/// Supplier id of a match record, from `supplier_id` or `SupplierID`.
pub fn supplier_of(record: &Value) -> Option<SupplierId> {
    ["supplier_id", "SupplierID"].iter().find_map(|key| match record.get(*key) {
        Some(Value::String(id)) if !id.trim().is_empty() => Some(SupplierId(id.clone())),
        Some(Value::Number(id)) => Some(SupplierId(id.to_string())),
        _ => None,
    })
}

async fn read_ledger(path: &Path) -> Result<CapacityLedger, CapacityError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Err(CapacityError::NotFound(path.to_path_buf()))
        }
        Err(source) => return Err(CapacityError::Read { path: path.to_path_buf(), source }),
    };

    serde_json::from_str(&raw)
        .map_err(|source| CapacityError::Format { path: path.to_path_buf(), source })
}
