use thiserror::Error;

use crate::capacity::CapacityError;
use crate::config::ConfigError;
use crate::constellation::ConstellationError;
use crate::domain::offer::SupplierId;
use crate::domain::registration::RegistrationError;
use crate::flows::FlowTransitionError;
use crate::negotiation::RunnerError;
use crate::prompts::PromptError;
use crate::scenario::ScenarioError;
use crate::store::StoreError;

/// Run-level error taxonomy. Startup failures abort the run; everything else
/// is caught at the phase boundary and fails one registration.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("not found: {0}")]
    ConfigNotFound(String),
    #[error("data format error: {0}")]
    DataFormat(String),
    #[error("capacity exceeded for supplier `{supplier_id}` ({used}/{capacity})")]
    CapacityExceeded { supplier_id: SupplierId, used: u32, capacity: u32 },
    #[error("negotiation failed: {0}")]
    NegotiationFailure(String),
    #[error("rate limited after {attempts} attempt(s): {last}")]
    RateLimited { attempts: u32, last: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("phase timed out after {seconds}s")]
    PhaseTimeout { seconds: u64 },
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl WorkflowError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigNotFound(_) | Self::DataFormat(_) | Self::Configuration(_))
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::ConfigNotFound(_) => "config_not_found",
            Self::DataFormat(_) => "data_format",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::NegotiationFailure(_) => "negotiation_failure",
            Self::RateLimited { .. } => "rate_limited",
            Self::Persistence(_) => "persistence",
            Self::PhaseTimeout { .. } => "phase_timeout",
            Self::Configuration(_) => "configuration",
        }
    }
}

impl From<ConfigError> for WorkflowError {
    fn from(value: ConfigError) -> Self {
        match value {
            ConfigError::MissingConfigFile(_) => Self::ConfigNotFound(value.to_string()),
            other => Self::Configuration(other.to_string()),
        }
    }
}

impl From<ConstellationError> for WorkflowError {
    fn from(value: ConstellationError) -> Self {
        match value {
            ConstellationError::NotFound { .. } => Self::ConfigNotFound(value.to_string()),
            other => Self::Configuration(other.to_string()),
        }
    }
}

impl From<ScenarioError> for WorkflowError {
    fn from(value: ScenarioError) -> Self {
        match value {
            ScenarioError::NotFound(_) => Self::ConfigNotFound(value.to_string()),
            other => Self::Configuration(other.to_string()),
        }
    }
}

impl From<PromptError> for WorkflowError {
    fn from(value: PromptError) -> Self {
        Self::Configuration(value.to_string())
    }
}

impl From<RegistrationError> for WorkflowError {
    fn from(value: RegistrationError) -> Self {
        Self::DataFormat(value.to_string())
    }
}

impl From<CapacityError> for WorkflowError {
    fn from(value: CapacityError) -> Self {
        match value {
            CapacityError::Exceeded { supplier_id, used, capacity } => {
                Self::CapacityExceeded { supplier_id, used, capacity }
            }
            CapacityError::UnknownSupplier(_) | CapacityError::MissingSupplier => {
                Self::NegotiationFailure(value.to_string())
            }
            CapacityError::NotFound(_) => Self::ConfigNotFound(value.to_string()),
            CapacityError::Format { .. } => Self::DataFormat(value.to_string()),
            CapacityError::Read { .. } | CapacityError::Write(_) => {
                Self::Persistence(value.to_string())
            }
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(value: StoreError) -> Self {
        Self::Persistence(value.to_string())
    }
}

impl From<RunnerError> for WorkflowError {
    fn from(value: RunnerError) -> Self {
        match value {
            RunnerError::RateLimited { attempts, last } => Self::RateLimited { attempts, last },
            RunnerError::Session(error) => Self::NegotiationFailure(error.to_string()),
        }
    }
}

impl From<FlowTransitionError> for WorkflowError {
    fn from(value: FlowTransitionError) -> Self {
        Self::Configuration(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use crate::capacity::CapacityError;
    use crate::constellation::ConstellationError;
    use crate::errors::WorkflowError;
    use crate::negotiation::{RunnerError, SessionError};
    use crate::store::StoreError;

    #[test]
    fn unknown_constellation_is_fatal_config_not_found() {
        let error = WorkflowError::from(ConstellationError::NotFound {
            name: "x".into(),
            known: vec!["p1m1_p2m2".into()],
        });

        assert_eq!(error.error_class(), "config_not_found");
        assert!(error.is_fatal());
        assert!(error.to_string().contains("p1m1_p2m2"));
    }

    #[test]
    fn capacity_exceeded_keeps_its_numbers_and_is_recoverable() {
        let error = WorkflowError::from(CapacityError::Exceeded {
            supplier_id: "S1".into(),
            used: 1,
            capacity: 1,
        });

        assert!(matches!(
            &error,
            WorkflowError::CapacityExceeded { supplier_id, used: 1, capacity: 1 } if supplier_id.0 == "S1"
        ));
        assert!(!error.is_fatal());
    }

    #[test]
    fn runner_errors_split_into_rate_limit_and_negotiation() {
        let limited = WorkflowError::from(RunnerError::RateLimited { attempts: 3, last: "429".into() });
        assert_eq!(limited.error_class(), "rate_limited");

        let session = WorkflowError::from(RunnerError::Session(SessionError::Transport("reset".into())));
        assert_eq!(session.error_class(), "negotiation_failure");
        assert!(!session.is_fatal());
    }

    #[test]
    fn store_failures_are_persistence_errors() {
        let error = WorkflowError::from(StoreError::WriterStopped);
        assert_eq!(error.error_class(), "persistence");
        assert!(!error.is_fatal());
    }
}
