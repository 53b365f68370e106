use std::path::Path;

use serde_json::Value;

use crate::domain::offer::OfferCatalog;
use crate::domain::registration::{parse_registrations, Registration};
use crate::errors::WorkflowError;
use crate::scenario::WorkflowPaths;

/// Everything a run reads up front. Input files are required and must be
/// well formed; unlike storage files, corruption here aborts the run.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkflowInputs {
    pub registrations: Vec<Registration>,
    pub catalog: OfferCatalog,
    pub incentives: Option<Value>,
}

impl WorkflowInputs {
    pub async fn load(
        paths: &WorkflowPaths,
        max_items: Option<usize>,
    ) -> Result<Self, WorkflowError> {
        let mut registrations = parse_registrations(read_json(&paths.registrations).await?)
            .map_err(|error| {
                WorkflowError::DataFormat(format!("`{}`: {error}", paths.registrations.display()))
            })?;
        if let Some(limit) = max_items {
            registrations.truncate(limit);
        }

        let catalog: OfferCatalog = serde_json::from_value(read_json(&paths.offers).await?)
            .map_err(|error| {
                WorkflowError::DataFormat(format!(
                    "`{}` is not an offer catalog: {error}",
                    paths.offers.display()
                ))
            })?;

        let incentives = match &paths.incentives {
            Some(path) => Some(read_json(path).await?),
            None => None,
        };

        tracing::info!(
            event_name = "workflow.inputs_loaded",
            registrations = registrations.len(),
            suppliers = catalog.supplier_offers.len(),
            incentives = incentives.is_some(),
            "workflow inputs loaded"
        );

        Ok(Self { registrations, catalog, incentives })
    }
}

async fn read_json(path: &Path) -> Result<Value, WorkflowError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Err(WorkflowError::ConfigNotFound(format!(
                "input file `{}` does not exist",
                path.display()
            )))
        }
        Err(error) => {
            return Err(WorkflowError::DataFormat(format!(
                "could not read `{}`: {error}",
                path.display()
            )))
        }
    };

    serde_json::from_str(&raw).map_err(|error| {
        WorkflowError::DataFormat(format!("`{}` is not valid JSON: {error}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;

    use crate::errors::WorkflowError;
    use crate::scenario::WorkflowPaths;
    use crate::workflow::inputs::WorkflowInputs;

    fn paths(dir: &Path) -> WorkflowPaths {
        WorkflowPaths::from_inputs(dir.join("registrations.json"), dir.join("offers.json"), dir)
    }

    async fn write(path: &Path, value: &serde_json::Value) {
        tokio::fs::write(path, value.to_string()).await.expect("write fixture");
    }

    #[tokio::test]
    async fn loads_and_limits_registrations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = paths(dir.path());
        write(
            &paths.registrations,
            &json!([{"registration_id": "R1"}, {"RegistrationNumber": 2}, {"registration_id": "R3"}]),
        )
        .await;
        write(&paths.offers, &json!({"SupplierOffers": [{"SupplierID": "S1", "Capacity": 1}]})).await;

        let inputs = WorkflowInputs::load(&paths, Some(2)).await.expect("load");

        assert_eq!(inputs.registrations.len(), 2);
        assert_eq!(inputs.registrations[1].id.0, "2");
        assert_eq!(inputs.catalog.supplier_offers.len(), 1);
        assert!(inputs.incentives.is_none());
    }

    #[tokio::test]
    async fn registrations_must_be_a_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = paths(dir.path());
        write(&paths.registrations, &json!({"registration_id": "R1"})).await;
        write(&paths.offers, &json!({"SupplierOffers": []})).await;

        let error = WorkflowInputs::load(&paths, None).await.expect_err("not a list");

        assert!(matches!(error, WorkflowError::DataFormat(_)));
        assert!(error.is_fatal());
    }

    #[tokio::test]
    async fn missing_and_corrupt_inputs_are_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = paths(dir.path());

        let missing = WorkflowInputs::load(&paths, None).await.expect_err("missing");
        assert!(matches!(missing, WorkflowError::ConfigNotFound(_)));

        tokio::fs::write(&paths.registrations, "[{").await.expect("write corrupt");
        let corrupt = WorkflowInputs::load(&paths, None).await.expect_err("corrupt");
        assert!(matches!(corrupt, WorkflowError::DataFormat(_)));
    }
}
