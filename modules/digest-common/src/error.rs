use thiserror::Error;

/// Result type alias for digest operations.
pub type Result<T> = std::result::Result<T, DigestError>;

#[derive(Error, Debug)]
pub enum DigestError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DigestError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Request-level errors caused by the operator rather than the system.
    /// These never leave partial state behind.
    pub fn is_operator_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::InvalidState(_) | Self::Validation(_)
        )
    }
}

impl From<sqlx::Error> for DigestError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound {
                entity: "row",
                id: String::new(),
            },
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for DigestError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("invalid JSON: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_errors_are_classified() {
        assert!(DigestError::not_found("digest", "x").is_operator_error());
        assert!(DigestError::InvalidState("already approved".into()).is_operator_error());
        assert!(DigestError::Validation("projectId required".into()).is_operator_error());
        assert!(!DigestError::Database("down".into()).is_operator_error());
        assert!(!DigestError::Model("timeout".into()).is_operator_error());
    }

    #[test]
    fn not_found_message_names_entity() {
        let err = DigestError::not_found("task draft", "abc");
        assert_eq!(err.to_string(), "task draft not found: abc");
    }
}
