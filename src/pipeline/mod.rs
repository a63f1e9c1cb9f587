use std::sync::{Arc, Mutex};

use crate::error::{PipelineError, PipelineResult};
use crate::record::{Record, Schema};
use crate::stats::FilterStats;

pub mod builders;
pub mod options;
pub mod stages;

pub use builders::*;
pub use options::*;
pub use stages::*;

/// One stage of a filter chain.
///
/// `process` receives ownership of a record and decides how often to hand
/// it on through `next`: never (discard), once, or several times (fan-out).
/// Every call after the first must pass a record obtained from
/// [`Record::copy`] or [`Next::create_record`]; moving the record into the
/// first call makes reuse of the original a compile error for native stages.
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;
    fn process(&self, record: Record, next: &Next) -> PipelineResult<()>;
    fn stats(&self) -> FilterStats;

    /// Self-test hook for stages that carry a validation function
    fn validate(&self, _record: &Record) -> Option<PipelineResult<Validation>> {
        None
    }
}

/// Outcome of a stage's validation function: `ok`, or the failing field index.
///
/// Only test tooling looks at this; the chain never acts on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validation {
    pub ok: bool,
    pub index: i64,
}

/// Receives records that made it past the last stage
pub trait Sink: Send + Sync {
    fn emit(&self, record: Record) -> PipelineResult<()>;
}

impl<F> Sink for F
where
    F: Fn(Record) -> PipelineResult<()> + Send + Sync,
{
    fn emit(&self, record: Record) -> PipelineResult<()> {
        self(record)
    }
}

/// Collects emitted records in memory, in emission order
#[derive(Default)]
pub struct CollectSink {
    records: Mutex<Vec<Record>>,
}

impl CollectSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self) -> Vec<Record> {
        match self.records.lock() {
            Ok(mut records) => std::mem::take(&mut *records),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Sink for CollectSink {
    fn emit(&self, record: Record) -> PipelineResult<()> {
        self.records
            .lock()
            .map_err(|_| PipelineError::Sink("collector lock poisoned".to_string()))?
            .push(record);
        Ok(())
    }
}

/// Continuation handed to a stage: calling [`Next::emit`] runs every stage
/// after it, inline on the current thread, and finally the sink.
#[derive(Clone)]
pub struct Next {
    schema: Arc<Schema>,
    stages: Arc<[Box<dyn Filter>]>,
    position: usize,
    sink: Arc<dyn Sink>,
}

impl Next {
    pub fn emit(&self, record: Record) -> PipelineResult<()> {
        match self.stages.get(self.position) {
            Some(stage) => {
                let after = Next {
                    schema: Arc::clone(&self.schema),
                    stages: Arc::clone(&self.stages),
                    position: self.position + 1,
                    sink: Arc::clone(&self.sink),
                };
                stage.process(record, &after)
            }
            None => self.sink.emit(record),
        }
    }

    /// Empty record of the chain's schema; forwarding it starts at the next stage
    pub fn create_record(&self) -> Record {
        Record::empty(&self.schema)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Index of the stage this continuation will invoke (chain length = sink)
    pub fn position(&self) -> usize {
        self.position
    }
}

/// Ordered, immutable sequence of filters sharing one schema
pub struct Chain {
    schema: Arc<Schema>,
    stages: Arc<[Box<dyn Filter>]>,
}

impl Chain {
    pub fn new(schema: Arc<Schema>, stages: Vec<Box<dyn Filter>>) -> Self {
        Self {
            schema,
            stages: stages.into(),
        }
    }

    /// Run one traversal: `record` enters the first stage, survivors reach `sink`
    pub fn process(&self, record: Record, sink: Arc<dyn Sink>) -> PipelineResult<()> {
        self.head(sink).emit(record)
    }

    /// Continuation that enters the chain at its first stage
    pub fn head(&self, sink: Arc<dyn Sink>) -> Next {
        Next {
            schema: Arc::clone(&self.schema),
            stages: Arc::clone(&self.stages),
            position: 0,
            sink,
        }
    }

    pub fn create_record(&self) -> Record {
        Record::empty(&self.schema)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// Run every stage's validation function against `record`
    pub fn validate(&self, record: &Record) -> Vec<(String, PipelineResult<Validation>)> {
        self.stages
            .iter()
            .filter_map(|stage| {
                stage
                    .validate(record)
                    .map(|result| (stage.name().to_string(), result))
            })
            .collect()
    }

    /// Per-stage counter snapshots, safe to call while traversals are running
    pub fn stats(&self) -> Vec<(String, FilterStats)> {
        self.stages
            .iter()
            .map(|stage| (stage.name().to_string(), stage.stats()))
            .collect()
    }
}
