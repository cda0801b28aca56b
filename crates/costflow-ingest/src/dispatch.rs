//! Destination dispatcher
//!
//! Writers are registered under case-insensitive names. A run resolves every
//! requested name before invoking anything, then calls the writers in the
//! order given and stops at the first failure. Destinations that already
//! completed are not rolled back.

use crate::error::{IngestError, Result};
use crate::pipeline::Pipeline;
use crate::writers::{DatabaseWriter, MonitoringWriter, WarehouseWriter, Writer};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

#[derive(Default)]
pub struct Dispatcher {
    writers: BTreeMap<String, Arc<dyn Writer>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in destinations:
    /// `database`, `warehouse` (alias `bigquery`) and `mackerel`
    pub fn with_defaults(pipeline: Arc<Pipeline>) -> Self {
        let mut dispatcher = Self::new();
        let warehouse: Arc<dyn Writer> = Arc::new(WarehouseWriter::new(Arc::clone(&pipeline)));

        dispatcher.register("database", Arc::new(DatabaseWriter::new(Arc::clone(&pipeline))));
        dispatcher.register("warehouse", Arc::clone(&warehouse));
        dispatcher.register("bigquery", warehouse);
        dispatcher.register("mackerel", Arc::new(MonitoringWriter::new(pipeline)));
        dispatcher
    }

    /// Register `writer` under `name`, replacing any previous registration
    pub fn register(&mut self, name: &str, writer: Arc<dyn Writer>) {
        self.writers.insert(name.trim().to_lowercase(), writer);
    }

    pub fn names(&self) -> Vec<&str> {
        self.writers.keys().map(String::as_str).collect()
    }

    /// Run the named writers in order, fail-fast
    pub async fn run(&self, names: &[String]) -> Result<()> {
        let plan = names
            .iter()
            .map(|name| {
                let key = name.trim().to_lowercase();
                self.writers
                    .get(&key)
                    .map(|writer| (key, Arc::clone(writer)))
                    .ok_or_else(|| IngestError::UnknownDestination(name.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        for (name, writer) in plan {
            info!(destination = %name, "Writing destination");
            let started = Instant::now();

            if let Err(e) = writer.write().await {
                error!(destination = %name, error = %e, "Destination failed");
                return Err(IngestError::Destination {
                    name,
                    source: Box::new(e),
                });
            }

            info!(
                destination = %name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Destination complete"
            );
        }

        Ok(())
    }
}
