//! Error types.

use thiserror::Error;

/// Boxed error produced by a fallible service factory.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A write was attempted on a computed (derivation-backed) field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field `{field}` of `{type_name}` is computed and cannot be written")]
pub struct ReadOnlyFieldError {
    pub type_name: &'static str,
    pub field: &'static str,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    ReadOnlyField(#[from] ReadOnlyFieldError),

    #[error("`{type_name}` has no reactive field named `{field}`")]
    UnknownField {
        type_name: &'static str,
        field: String,
    },

    #[error("field `{field}` of `{type_name}` does not hold a `{expected}`")]
    FieldType {
        type_name: &'static str,
        field: &'static str,
        expected: &'static str,
    },

    #[error("scope is already closed")]
    ScopeClosed,

    #[error("failed to construct service `{service}`")]
    Construction {
        service: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("invalid runtime configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
