use rhai::{Dynamic, Engine, EvalAltResult, Position};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::record::RecordRef;
use crate::error::PipelineError;
use crate::pipeline::Next;
use crate::record::{Record, Schema};

/// Error raised by a stage downstream of a script's `next.emit`.
///
/// Carried through the interpreter untouched so the script stage can hand the
/// original error kind back to the chain instead of wrapping it.
#[derive(Debug, Clone)]
pub struct DownstreamError(pub PipelineError);

/// Script-side continuation passed as the second argument of `process`
#[derive(Clone)]
pub struct ScriptNext {
    next: Next,
    emitted: Arc<AtomicU64>,
}

impl ScriptNext {
    pub fn new(next: Next) -> Self {
        Self {
            next,
            emitted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of records the script forwarded through this continuation
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    fn emit(&mut self, record: RecordRef) -> Result<(), Box<EvalAltResult>> {
        let record = record.take()?;
        self.emitted.fetch_add(1, Ordering::Relaxed);
        self.next.emit(record).map_err(|err| {
            Box::new(EvalAltResult::ErrorRuntime(
                Dynamic::from(DownstreamError(err)),
                Position::NONE,
            ))
        })
    }
}

pub fn register_functions(engine: &mut Engine, schema: &Arc<Schema>) {
    engine.register_type_with_name::<ScriptNext>("Next");
    engine.register_type_with_name::<DownstreamError>("DownstreamError");

    engine.register_fn("emit", ScriptNext::emit);

    let schema = Arc::clone(schema);
    engine.register_fn("create_record", move || RecordRef::new(Record::empty(&schema)));
}
