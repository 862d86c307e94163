use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} `{key}` was not found")]
    EntityNotFound { entity: &'static str, key: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("model invocation failed: {0}")]
    ModelInvocation(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::EntityNotFound { entity, key: key.into() }
    }

    /// Stable class name used in logs and command outcomes.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Domain(_) => "domain",
            Self::EntityNotFound { .. } => "entity_not_found",
            Self::Persistence(_) => "persistence",
            Self::Integration(_) => "integration",
            Self::ModelInvocation(_) => "model_invocation",
            Self::Configuration(_) => "configuration",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError};

    #[test]
    fn not_found_names_entity_and_key() {
        let error = ApplicationError::not_found("channel", "#missing");
        assert_eq!(error.to_string(), "channel `#missing` was not found");
        assert_eq!(error.class(), "entity_not_found");
    }

    #[test]
    fn domain_errors_convert_into_application_errors() {
        let error: ApplicationError =
            DomainError::InvariantViolation("message needs a target".to_owned()).into();
        assert_eq!(error.class(), "domain");
    }
}
