//! Save-time orchestration: context, evaluation, coercion and write-back
//! for every instance of a computed field.

use std::fmt;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::EngineConfig;
use crate::context::{ContextBuilder, Services};
use crate::coercion::NormalizedValue;
use crate::descriptor::ComputedFieldDescriptor;
use crate::errors::{ComputeError, SaveError};
use crate::evaluator::Evaluator;
use crate::functions::Registry;
use crate::record::{item, RecordMut, RecordSnapshot};

/// Progress of one field instance through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    ContextBuilt,
    Evaluated,
    Coerced,
    Committed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Idle => "idle",
            Stage::ContextBuilt => "context built",
            Stage::Evaluated => "evaluated",
            Stage::Coerced => "coerced",
            Stage::Committed => "committed",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of a single instance run.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceState {
    Coerced(NormalizedValue),
    Failed { after: Stage, error: ComputeError },
}

/// Runs computed fields right before their record is written.
#[derive(Debug, Clone, Default)]
pub struct SaveTrigger {
    builder: ContextBuilder,
    evaluator: Evaluator,
}

impl SaveTrigger {
    pub fn new(services: Services, registry: Registry, config: EngineConfig) -> Self {
        Self {
            builder: ContextBuilder::new(services),
            evaluator: Evaluator::new(registry, config),
        }
    }

    pub fn with_services(services: Services) -> Self {
        Self::new(services, Registry::with_builtins(), EngineConfig::default())
    }

    /// Runs `Idle -> ContextBuilt -> Evaluated -> Coerced` for one instance.
    /// Nothing is written to the record.
    pub fn run_instance<R>(
        &self,
        record: &R,
        descriptor: &ComputedFieldDescriptor,
        delta: usize,
    ) -> InstanceState
    where
        R: RecordSnapshot + ?Sized,
    {
        let mut stage = Stage::Idle;
        match self.advance(record, descriptor, delta, &mut stage) {
            Ok(v) => InstanceState::Coerced(v),
            Err(error) => InstanceState::Failed {
                after: stage,
                error,
            },
        }
    }

    fn advance<R>(
        &self,
        record: &R,
        descriptor: &ComputedFieldDescriptor,
        delta: usize,
        stage: &mut Stage,
    ) -> Result<NormalizedValue, ComputeError>
    where
        R: RecordSnapshot + ?Sized,
    {
        descriptor.kind.validate()?;
        let ctx = self.builder.build(record, delta)?;
        *stage = Stage::ContextBuilt;
        let raw = self.evaluator.evaluate(&descriptor.expression, &ctx)?;
        *stage = Stage::Evaluated;
        debug!(%raw, "raw output");
        let normalized = descriptor.kind.coerce(&raw)?;
        *stage = Stage::Coerced;
        Ok(normalized)
    }

    /// Computes the normalized value of one instance without committing it.
    pub fn compute_instance<R>(
        &self,
        record: &R,
        field: &str,
        descriptor: &ComputedFieldDescriptor,
        delta: usize,
    ) -> Result<NormalizedValue, SaveError>
    where
        R: RecordSnapshot + ?Sized,
    {
        match self.run_instance(record, descriptor, delta) {
            InstanceState::Coerced(v) => Ok(v),
            InstanceState::Failed { after, error } => {
                warn!(field, delta, stage = %after, %error, "computed field failed");
                Err(SaveError {
                    field: field.to_string(),
                    delta,
                    stage: after,
                    source: error,
                })
            }
        }
    }

    /// Computes every instance of `field` and writes them back as
    /// `{"value": ...}` items. On failure the record is left untouched.
    #[instrument(level = "debug", skip(self, record, descriptor))]
    pub fn pre_save<R>(
        &self,
        record: &mut R,
        field: &str,
        descriptor: &ComputedFieldDescriptor,
    ) -> Result<Vec<NormalizedValue>, SaveError>
    where
        R: RecordMut + ?Sized,
    {
        let count = instance_count(&*record, field, descriptor);
        let values = (0..count)
            .map(|delta| self.compute_instance(&*record, field, descriptor, delta))
            .collect::<Result<Vec<_>, _>>()?;
        let items: Vec<Value> = values.iter().map(|v| item(v.to_json())).collect();
        record.set_field(field, items);
        debug!(field, count, stage = %Stage::Committed, "computed field committed");
        Ok(values)
    }

    /// Runs several computed fields in order on a staged copy, so later
    /// fields see earlier results. The record is replaced only when all
    /// succeed.
    pub fn pre_save_all<R>(
        &self,
        record: &mut R,
        fields: &[(&str, &ComputedFieldDescriptor)],
    ) -> Result<(), SaveError>
    where
        R: RecordMut + Clone,
    {
        let mut staged = record.clone();
        for (field, descriptor) in fields {
            self.pre_save(&mut staged, field, descriptor)?;
        }
        *record = staged;
        Ok(())
    }
}

fn instance_count<R>(record: &R, field: &str, descriptor: &ComputedFieldDescriptor) -> usize
where
    R: RecordSnapshot + ?Sized,
{
    let existing = record
        .field_table()
        .and_then(|t| t.get(field).map(Vec::len))
        .unwrap_or(0);
    existing.max(descriptor.cardinality).max(1)
}
