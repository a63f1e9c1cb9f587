use rhai::{Dynamic, Engine, EvalAltResult, ImmutableString, Position};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::PipelineError;
use crate::record::{Record, Value};

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

/// What a record handle currently holds
enum Slot {
    Live(Record),
    /// Read-only snapshot taken when the record was forwarded; `None` when no
    /// other handle could observe it
    Forwarded(Option<Record>),
}

/// Script-side handle to a record.
///
/// Rhai clones custom values freely, so the record sits behind a shared slot.
/// Forwarding the handle through `next.emit` moves the record downstream and
/// leaves a snapshot behind: every clone of the handle can still read and
/// `copy()` it, but emitting or modifying it again is an error.
#[derive(Clone)]
pub struct RecordRef {
    slot: Arc<Mutex<Slot>>,
}

impl RecordRef {
    pub fn new(record: Record) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Live(record))),
        }
    }

    /// Move the record out for forwarding
    pub fn take(&self) -> RhaiResult<Record> {
        let observed = Arc::strong_count(&self.slot) > 1;
        let mut guard = self.lock()?;
        let snapshot = match &*guard {
            Slot::Live(record) => observed.then(|| record.copy()),
            Slot::Forwarded(_) => {
                return Err(script_error(
                    "record was already forwarded; call copy() before emitting it again",
                ))
            }
        };
        match std::mem::replace(&mut *guard, Slot::Forwarded(snapshot)) {
            Slot::Live(record) => Ok(record),
            Slot::Forwarded(_) => Err(forwarded_error()),
        }
    }

    /// Record still held by the handle, if it was never forwarded
    #[cfg(test)]
    fn into_record(self) -> Option<Record> {
        let slot = match self.slot.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, Slot::Forwarded(None)),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), Slot::Forwarded(None)),
        };
        match slot {
            Slot::Live(record) => Some(record),
            Slot::Forwarded(_) => None,
        }
    }

    fn is_forwarded(&self) -> RhaiResult<bool> {
        Ok(matches!(&*self.lock()?, Slot::Forwarded(_)))
    }

    fn lock(&self) -> RhaiResult<MutexGuard<'_, Slot>> {
        self.slot
            .lock()
            .map_err(|_| script_error("record handle lock poisoned"))
    }

    fn with<T>(&self, f: impl FnOnce(&Record) -> Result<T, PipelineError>) -> RhaiResult<T> {
        let guard = self.lock()?;
        let record = match &*guard {
            Slot::Live(record) | Slot::Forwarded(Some(record)) => record,
            Slot::Forwarded(None) => return Err(forwarded_error()),
        };
        f(record).map_err(|e| script_error(&e.to_string()))
    }

    fn with_mut<T>(&self, f: impl FnOnce(&mut Record) -> Result<T, PipelineError>) -> RhaiResult<T> {
        let mut guard = self.lock()?;
        match &mut *guard {
            Slot::Live(record) => f(record).map_err(|e| script_error(&e.to_string())),
            Slot::Forwarded(_) => Err(script_error(
                "record was already forwarded and can no longer be modified; modify a copy()",
            )),
        }
    }
}

fn forwarded_error() -> Box<EvalAltResult> {
    script_error("record was already forwarded")
}

/// Plain runtime error raised by a script helper; becomes `ScriptError`
pub fn script_error(message: &str) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(message.to_string()),
        Position::NONE,
    ))
}

fn to_index(index: i64) -> RhaiResult<usize> {
    usize::try_from(index).map_err(|_| script_error(&format!("negative field index {}", index)))
}

pub fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Int(i) => Dynamic::from(*i),
        Value::Float(x) => Dynamic::from(*x),
        Value::Str(s) => Dynamic::from(s.clone()),
    }
}

pub fn dynamic_to_value(value: Dynamic) -> RhaiResult<Value> {
    if value.is_unit() {
        return Ok(Value::Null);
    }
    if let Ok(b) = value.as_bool() {
        return Ok(Value::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Ok(Value::Int(i));
    }
    if let Ok(x) = value.as_float() {
        return Ok(Value::Float(x));
    }
    if let Ok(c) = value.as_char() {
        return Ok(Value::Str(c.to_string()));
    }
    let type_name = value.type_name();
    value
        .into_immutable_string()
        .map(|s| Value::Str(s.to_string()))
        .map_err(|_| script_error(&format!("cannot store a value of type {} in a record", type_name)))
}

fn get(record: &mut RecordRef, index: i64) -> RhaiResult<Dynamic> {
    let index = to_index(index)?;
    record.with(|r| r.get(index).map(value_to_dynamic))
}

fn get_by_name(record: &mut RecordRef, name: ImmutableString) -> RhaiResult<Dynamic> {
    record.with(|r| r.get_by_name(&name).map(value_to_dynamic))
}

fn set(record: &mut RecordRef, index: i64, value: Dynamic) -> RhaiResult<()> {
    let index = to_index(index)?;
    let value = dynamic_to_value(value)?;
    record.with_mut(|r| r.set(index, value))
}

fn set_by_name(record: &mut RecordRef, name: ImmutableString, value: Dynamic) -> RhaiResult<()> {
    let value = dynamic_to_value(value)?;
    record.with_mut(|r| r.set_by_name(&name, value))
}

pub fn register_functions(engine: &mut Engine) {
    engine.register_type_with_name::<RecordRef>("Record");

    engine.register_fn("get", get);
    engine.register_fn("get", get_by_name);
    engine.register_fn("set", set);
    engine.register_fn("set", set_by_name);
    engine.register_indexer_get(get);
    engine.register_indexer_get(get_by_name);
    engine.register_indexer_set(set);
    engine.register_indexer_set(set_by_name);

    engine.register_fn("copy", |record: &mut RecordRef| -> RhaiResult<RecordRef> {
        record.with(|r| Ok(RecordRef::new(r.copy())))
    });
    engine.register_fn("len", |record: &mut RecordRef| -> RhaiResult<i64> {
        record.with(|r| Ok(r.len() as i64))
    });
    engine.register_fn(
        "index",
        |record: &mut RecordRef, name: ImmutableString| -> RhaiResult<i64> {
            record.with(|r| r.field_index(&name).map(|i| i as i64))
        },
    );
    engine.register_fn("is_forwarded", |record: &mut RecordRef| record.is_forwarded());
    engine.register_fn("to_string", |record: &mut RecordRef| -> String {
        record
            .with(|r| {
                let values: Vec<String> = r.fields().iter().map(|v| v.to_string()).collect();
                Ok(format!("[{}]", values.join(", ")))
            })
            .unwrap_or_else(|_| "<forwarded record>".to_string())
    });
}
