//! Library error type shared by the registry, binder and stores.
use crate::config::ConfigError;
use crate::schema::Violation;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown database `{0}`")]
    UnknownDatabase(String),
    #[error("Invalid supermarket: {0}")]
    InvalidSupermarket(String),
    #[error("database `{database}` is unavailable")]
    Unavailable { database: String },
    #[error("no database connection could be established")]
    NoConnections,
    #[error("connecting to `{database}` timed out after {timeout_ms} ms")]
    Timeout { database: String, timeout_ms: u64 },
    #[error("{model} `{id}` not found")]
    NotFound { model: &'static str, id: String },
    #[error("{model} validation failed: {}", joined(.violations))]
    Validation {
        model: &'static str,
        violations: Vec<Violation>,
    },
    #[error("{model} with this {field} already exists")]
    Duplicate { model: &'static str, field: String },
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("{0}")]
    Rejected(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// HTTP status a transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::UnknownDatabase(_)
            | Error::InvalidSupermarket(_)
            | Error::Validation { .. }
            | Error::InvalidQuery(_)
            | Error::Rejected(_) => 400,
            Error::NotFound { .. } => 404,
            Error::Duplicate { .. } => 409,
            Error::Unavailable { .. } | Error::NoConnections | Error::Timeout { .. } => 503,
            Error::Database(_) | Error::Json(_) | Error::Config(_) => 500,
        }
    }

    pub(crate) fn validation(model: &'static str, field: &str, message: impl Into<String>) -> Self {
        Error::Validation {
            model,
            violations: vec![Violation::new(field, message)],
        }
    }
}

fn joined(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_http_conventions() {
        assert_eq!(Error::InvalidSupermarket("walmart".into()).status_code(), 400);
        assert_eq!(
            Error::Unavailable {
                database: "dia".into()
            }
            .status_code(),
            503
        );
        assert_eq!(
            Error::NotFound {
                model: "Product",
                id: "x".into()
            }
            .status_code(),
            404
        );
        assert_eq!(
            Error::Duplicate {
                model: "ProductType",
                field: "slug".into()
            }
            .to_string(),
            "ProductType with this slug already exists"
        );
    }

    #[test]
    fn validation_message_lists_every_violation() {
        let err = Error::Validation {
            model: "User",
            violations: vec![
                Violation::new("email", "is required"),
                Violation::new("username", "must be at least 3 characters"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "User validation failed: email: is required; username: must be at least 3 characters"
        );
    }
}
