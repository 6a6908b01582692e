use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::errors::{ComputeError, Result};
use crate::record::RecordSnapshot;

/// Capability for expressions that need to resolve related records.
pub trait EntityLoader: Send + Sync {
    /// Returns the entity handle of the record, or `None` when it does not exist.
    fn load(&self, entity_type: &str, id: &Value) -> Option<Value>;
}

/// Explicit service handles passed into every evaluation.
#[derive(Clone, Default)]
pub struct Services {
    loader: Option<Arc<dyn EntityLoader>>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loader(mut self, loader: Arc<dyn EntityLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn loader(&self) -> Option<&dyn EntityLoader> {
        self.loader.as_deref()
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("loader", &self.loader.is_some())
            .finish()
    }
}

/// Read-only snapshot handed to one expression run.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    /// Field name to the ordered list of instance values.
    pub fields: Map<String, Value>,
    /// Object-style view of the owning record.
    pub entity: Value,
    /// Index of the instance being computed.
    pub delta: usize,
    pub services: Services,
}

/// Builds evaluation contexts from records.
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    services: Services,
}

impl ContextBuilder {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub fn build<R>(&self, record: &R, delta: usize) -> Result<EvaluationContext>
    where
        R: RecordSnapshot + ?Sized,
    {
        let table = record.field_table().ok_or_else(|| {
            ComputeError::ContextUnavailable(format!(
                "{} record has no field table",
                record.entity_type()
            ))
        })?;
        let fields: Map<String, Value> = table
            .into_iter()
            .map(|(name, items)| (name, Value::Array(items)))
            .collect();
        let entity = handle_from(&fields, record);
        Ok(EvaluationContext {
            fields,
            entity,
            delta,
            services: self.services.clone(),
        })
    }
}

/// Object-style handle for a record: its fields plus `entity_type` and `id`
/// unless a field already uses those names.
pub fn entity_handle<R>(record: &R) -> Option<Value>
where
    R: RecordSnapshot + ?Sized,
{
    let fields: Map<String, Value> = record
        .field_table()?
        .into_iter()
        .map(|(name, items)| (name, Value::Array(items)))
        .collect();
    Some(handle_from(&fields, record))
}

fn handle_from<R>(fields: &Map<String, Value>, record: &R) -> Value
where
    R: RecordSnapshot + ?Sized,
{
    let mut handle = fields.clone();
    handle
        .entry("entity_type")
        .or_insert_with(|| Value::String(record.entity_type().to_string()));
    if let Some(id) = record.id() {
        handle.entry("id").or_insert(id);
    }
    Value::Object(handle)
}
