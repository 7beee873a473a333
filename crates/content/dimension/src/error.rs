use thiserror::Error;

/// Result type for dimension space operations.
pub type DimensionResult<T> = Result<T, DimensionError>;

/// Errors raised while building or querying the dimension space.
///
/// Everything except [`DimensionError::InvalidPoint`] and
/// [`DimensionError::PointNotAllowed`] is a configuration error: it is raised
/// once, at construction, and is not recoverable at runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DimensionError {
    #[error("dimension '{0}' is declared more than once")]
    DuplicateDimension(String),

    #[error("dimension '{0}' declares no values")]
    EmptyDimension(String),

    #[error("dimension '{dimension}' declares value '{value}' more than once")]
    DuplicateValue { dimension: String, value: String },

    #[error("value '{value}' of dimension '{dimension}' falls back to unknown value '{fallback}'")]
    UnknownFallback {
        dimension: String,
        value: String,
        fallback: String,
    },

    #[error("fallback chain of dimension '{dimension}' contains a cycle at value '{value}'")]
    FallbackCycle { dimension: String, value: String },

    #[error("constraint on '{dimension}:{value}' references unknown dimension '{constrained}'")]
    UnknownConstraintDimension {
        dimension: String,
        value: String,
        constrained: String,
    },

    #[error("constraint on '{dimension}:{value}' references unknown value '{constrained_value}' of dimension '{constrained}'")]
    UnknownConstraintValue {
        dimension: String,
        value: String,
        constrained: String,
        constrained_value: String,
    },

    #[error("constraint on '{dimension}:{value}' must not constrain its own dimension")]
    SelfConstraint { dimension: String, value: String },

    #[error("variation graph contains a cycle through {0}")]
    VariationCycle(String),

    #[error("invalid dimension space point: {0}")]
    InvalidPoint(String),

    #[error("dimension space point {0} is not part of the allowed dimension subspace")]
    PointNotAllowed(String),
}
