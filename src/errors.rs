use thiserror::Error;

use crate::trigger::Stage;

/// Failures raised while running a computed-value expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("syntax error at offset {offset}: {message} (near `{fragment}`)")]
    Syntax {
        message: String,
        fragment: String,
        offset: usize,
    },

    #[error("runtime error: {message} (in `{fragment}`)")]
    Runtime { message: String, fragment: String },

    #[error("`${name}` is read-only inside a computed expression")]
    ReadOnly { name: String },

    #[error("expression exceeded its execution budget ({limit})")]
    Timeout { limit: String },
}

/// Failures raised while normalizing a raw output into its storage shape.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoercionError {
    #[error("value {0} is not numeric")]
    NotNumeric(String),

    #[error("value {value} needs {digits} digits but precision is {precision}")]
    PrecisionExceeded {
        value: String,
        digits: usize,
        precision: u32,
    },

    #[error("negative value {0} cannot be stored in an unsigned column")]
    SignMismatch(i128),

    #[error("value {value} does not fit a {size} integer column")]
    OutOfRange { value: String, size: String },

    #[error("value of type {0} cannot be stored as text")]
    NotScalar(&'static str),

    #[error("text contains non-ASCII characters but the column is ASCII-only")]
    NotAscii,
}

/// Invalid descriptor settings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error("precision {0} is outside 10..=32")]
    Precision(u32),

    #[error("scale {0} is outside 0..=10")]
    Scale(u32),

    #[error("scale {scale} exceeds precision {precision}")]
    ScaleExceedsPrecision { precision: u32, scale: u32 },

    #[error("max_length must be at least 1")]
    MaxLength,

    #[error("the expression is required")]
    EmptyExpression,

    #[error("invalid settings document: {0}")]
    Malformed(String),
}

/// Any failure of the computed-value pipeline for one field instance.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComputeError {
    #[error("record cannot be introspected: {0}")]
    ContextUnavailable(String),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Coercion(#[from] CoercionError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// A failed save, naming the field instance and the stage it reached.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("computed field `{field}` (delta {delta}) failed after {stage}: {source}")]
pub struct SaveError {
    pub field: String,
    pub delta: usize,
    pub stage: Stage,
    #[source]
    pub source: ComputeError,
}

/// Error returned by a builtin function; the evaluator attaches the call site.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct CallError(pub String);

impl CallError {
    pub fn new(msg: impl Into<String>) -> Self {
        CallError(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ComputeError>;
