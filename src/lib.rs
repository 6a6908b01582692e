pub mod errors;
pub mod config;
pub mod record;
pub mod context;
pub mod evaluator;
pub mod functions;  // plugin model
pub mod coercion;
pub mod decimal;
pub mod descriptor;
pub mod trigger;
mod expression;
mod parser;
mod comparison;
mod value;

use serde_json::Value;
use errors::{EvaluationError, SaveError};
use context::EvaluationContext;

pub use coercion::{Column, NormalizedValue, SizeClass, ValueKind};
pub use config::EngineConfig;
pub use context::{ContextBuilder, EntityLoader, Services};
pub use decimal::FixedDecimal;
pub use descriptor::{ComputedFieldDescriptor, FieldSettings, KindTag};
pub use evaluator::Evaluator;
pub use functions::{Function, Registry};
pub use record::{MemoryStore, Record, RecordMut, RecordSnapshot};
pub use trigger::{InstanceState, SaveTrigger, Stage};

/// Convenience: evaluate an expression with the builtin registry and
/// default limits.
pub fn evaluate(expression: &str, ctx: &EvaluationContext) -> Result<Value, EvaluationError> {
    Evaluator::default().evaluate(expression, ctx)
}

/// Convenience: compute one instance of a computed field with default
/// services, registry and limits.
pub fn compute<R>(
    record: &R,
    field: &str,
    descriptor: &ComputedFieldDescriptor,
    delta: usize,
) -> Result<NormalizedValue, SaveError>
where
    R: RecordSnapshot + ?Sized,
{
    SaveTrigger::default().compute_instance(record, field, descriptor, delta)
}
