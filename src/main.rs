use std::sync::Arc;

use clap::Parser;
use computed_field::{
    ComputedFieldDescriptor, EngineConfig, FieldSettings, MemoryStore, Record, Registry, SaveTrigger, Services,
};
use tracing_subscriber::EnvFilter;

/// Simple runner: compute a field on a record passed via CLI.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Field settings document (JSON string)
    settings: String,
    /// Record JSON: {"entity_type": ..., "id": ..., "fields": {...}}
    #[arg(required_unless_present = "schema")]
    record: Option<String>,
    /// Name the computed field is stored under
    #[arg(long, default_value = "field_computed")]
    field: String,
    /// Engine limits document (JSON string)
    #[arg(long)]
    config: Option<String>,
    /// Override the step budget
    #[arg(long)]
    max_steps: Option<u64>,
    /// Related records reachable through `$services->load` (JSON array)
    #[arg(long)]
    related: Option<String>,
    /// Print the storage column of the field and exit
    #[arg(long)]
    schema: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    // Settings are validated before anything else.
    let descriptor = ComputedFieldDescriptor::try_from(FieldSettings::from_json_str(&args.settings)?)?;
    descriptor.validate()?;

    if args.schema {
        println!("{}", serde_json::to_string_pretty(&descriptor.kind.column())?);
        return Ok(());
    }

    let mut config = match args.config.as_deref() {
        Some(s) => EngineConfig::from_json_str(s)?,
        None => EngineConfig::default(),
    };
    if let Some(n) = args.max_steps {
        config.max_steps = n;
    }

    let mut services = Services::new();
    if let Some(related) = args.related.as_deref() {
        let mut store = MemoryStore::new();
        for r in serde_json::from_str::<Vec<Record>>(related)? {
            store.insert(r);
        }
        services = services.with_loader(Arc::new(store));
    }

    let Some(raw) = args.record.as_deref() else {
        return Err("a record is required unless --schema is given".into());
    };
    let mut record: Record = serde_json::from_str(raw)?;
    let trigger = SaveTrigger::new(services, Registry::with_builtins(), config);
    trigger.pre_save(&mut record, &args.field, &descriptor)?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
