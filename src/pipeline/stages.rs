use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use super::options::{FilterOptions, OptionKind, OptionSpec};
use super::{Filter, Next, Validation};
use crate::engine::{RhaiEngine, ScriptFailure};
use crate::error::{PipelineError, PipelineResult};
use crate::record::{Record, Schema, Value};
use crate::stats::{Counters, FilterStats};

/// Pass-through stage
pub struct NoopStage {
    name: String,
    counters: Counters,
}

impl NoopStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counters: Counters::new(),
        }
    }

    pub fn option_specs() -> Vec<OptionSpec> {
        Vec::new()
    }

    pub fn from_options(opts: &FilterOptions, _schema: &Arc<Schema>) -> PipelineResult<Self> {
        Ok(Self::new(opts.stage()))
    }
}

impl Filter for NoopStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, record: Record, next: &Next) -> PipelineResult<()> {
        self.counters.add_processed();
        next.emit(record)
    }

    fn stats(&self) -> FilterStats {
        self.counters.snapshot()
    }
}

/// Exchanges the values of two fields
pub struct SwapStage {
    name: String,
    a: usize,
    b: usize,
    counters: Counters,
}

impl SwapStage {
    pub fn new(name: impl Into<String>, a: usize, b: usize) -> Self {
        Self {
            name: name.into(),
            a,
            b,
            counters: Counters::new(),
        }
    }

    pub fn option_specs() -> Vec<OptionSpec> {
        vec![
            OptionSpec::required("a", OptionKind::Field, "first field"),
            OptionSpec::required("b", OptionKind::Field, "second field"),
        ]
    }

    pub fn from_options(opts: &FilterOptions, schema: &Arc<Schema>) -> PipelineResult<Self> {
        Ok(Self::new(
            opts.stage(),
            opts.field("a", schema)?,
            opts.field("b", schema)?,
        ))
    }
}

impl Filter for SwapStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, mut record: Record, next: &Next) -> PipelineResult<()> {
        self.counters.add_processed();
        record.swap(self.a, self.b)?;
        next.emit(record)
    }

    fn stats(&self) -> FilterStats {
        self.counters.snapshot()
    }
}

/// Drops records whose field matches a value (or does not, when inverted)
pub struct DiscardStage {
    name: String,
    field: usize,
    equals: Value,
    invert: bool,
    counters: Counters,
}

impl DiscardStage {
    pub fn new(name: impl Into<String>, field: usize, equals: Value, invert: bool) -> Self {
        Self {
            name: name.into(),
            field,
            equals,
            invert,
            counters: Counters::new(),
        }
    }

    pub fn option_specs() -> Vec<OptionSpec> {
        vec![
            OptionSpec::required("field", OptionKind::Field, "field to compare"),
            OptionSpec::required("equals", OptionKind::Scalar, "value that triggers a discard"),
            OptionSpec::optional("invert", OptionKind::Bool, "discard when the field differs instead")
                .with_default(json!(false)),
        ]
    }

    pub fn from_options(opts: &FilterOptions, schema: &Arc<Schema>) -> PipelineResult<Self> {
        let equals = opts.scalar("equals").ok_or_else(|| {
            PipelineError::config(format!("stage '{}': option 'equals' is not set", opts.stage()))
        })?;
        Ok(Self::new(
            opts.stage(),
            opts.field("field", schema)?,
            equals,
            opts.bool("invert").unwrap_or(false),
        ))
    }

    fn should_discard(&self, record: &Record) -> PipelineResult<bool> {
        let matches = *record.get(self.field)? == self.equals;
        Ok(matches != self.invert)
    }
}

impl Filter for DiscardStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, record: Record, next: &Next) -> PipelineResult<()> {
        self.counters.add_processed();
        if self.should_discard(&record)? {
            self.counters.add_discarded();
            return Ok(());
        }
        next.emit(record)
    }

    fn stats(&self) -> FilterStats {
        self.counters.snapshot()
    }
}

/// Fans a record out into `copies` extra copies followed by the original
pub struct DuplicateStage {
    name: String,
    copies: usize,
    counters: Counters,
}

impl DuplicateStage {
    pub fn new(name: impl Into<String>, copies: usize) -> Self {
        Self {
            name: name.into(),
            copies,
            counters: Counters::with_extra(&["copies"]),
        }
    }

    pub fn option_specs() -> Vec<OptionSpec> {
        vec![
            OptionSpec::optional("copies", OptionKind::Int, "extra copies per record")
                .with_default(json!(1)),
        ]
    }

    pub fn from_options(opts: &FilterOptions, _schema: &Arc<Schema>) -> PipelineResult<Self> {
        let copies = opts.int("copies").unwrap_or(1);
        if copies < 0 {
            return Err(PipelineError::config(format!(
                "stage '{}': option 'copies' must not be negative",
                opts.stage()
            )));
        }
        Ok(Self::new(opts.stage(), copies as usize))
    }
}

impl Filter for DuplicateStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, record: Record, next: &Next) -> PipelineResult<()> {
        self.counters.add_processed();
        for _ in 0..self.copies {
            next.emit(record.copy())?;
            self.counters.add("copies", 1);
        }
        next.emit(record)
    }

    fn stats(&self) -> FilterStats {
        self.counters.snapshot()
    }
}

/// Overwrites one field with a constant
pub struct SetStage {
    name: String,
    field: usize,
    value: Value,
    counters: Counters,
}

impl SetStage {
    pub fn new(name: impl Into<String>, field: usize, value: Value) -> Self {
        Self {
            name: name.into(),
            field,
            value,
            counters: Counters::new(),
        }
    }

    pub fn option_specs() -> Vec<OptionSpec> {
        vec![
            OptionSpec::required("field", OptionKind::Field, "field to overwrite"),
            OptionSpec::optional("value", OptionKind::Scalar, "new value")
                .with_default(json!(null)),
        ]
    }

    pub fn from_options(opts: &FilterOptions, schema: &Arc<Schema>) -> PipelineResult<Self> {
        Ok(Self::new(
            opts.stage(),
            opts.field("field", schema)?,
            opts.scalar("value").unwrap_or_default(),
        ))
    }
}

impl Filter for SetStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, mut record: Record, next: &Next) -> PipelineResult<()> {
        self.counters.add_processed();
        record.set(self.field, self.value.clone())?;
        next.emit(record)
    }

    fn stats(&self) -> FilterStats {
        self.counters.snapshot()
    }
}

/// Stage backed by a Rhai function `process(record, next)`
pub struct ScriptStage {
    name: String,
    engine: RhaiEngine,
    function: String,
    validate: Option<String>,
    counters: Counters,
}

impl ScriptStage {
    /// Compile `script` and check that it defines the process function
    pub fn new(
        name: impl Into<String>,
        schema: &Arc<Schema>,
        script: &str,
        origin: &str,
        function: &str,
        validate: &str,
    ) -> PipelineResult<Self> {
        let name = name.into();
        let engine = RhaiEngine::compile(schema, script, origin)?;

        if !engine.has_fn(function, 2) {
            return Err(PipelineError::config(format!(
                "stage '{}': script '{}' does not define {}(record, next)",
                name, origin, function
            )));
        }
        let validate = engine.has_fn(validate, 1).then(|| validate.to_string());

        engine.run_init()?;
        log::debug!(
            "stage '{}': loaded script '{}' (function {}, validation {})",
            name,
            origin,
            function,
            validate.as_deref().unwrap_or("none")
        );

        Ok(Self {
            name,
            engine,
            function: function.to_string(),
            validate,
            counters: Counters::with_extra(&["emitted", "errors"]),
        })
    }

    pub fn option_specs() -> Vec<OptionSpec> {
        vec![
            OptionSpec::optional("path", OptionKind::Str, "script file, relative to the config file"),
            OptionSpec::optional("source", OptionKind::Str, "inline script source"),
            OptionSpec::optional("function", OptionKind::Str, "function called per record")
                .with_default(json!("process")),
            OptionSpec::optional("validate", OptionKind::Str, "validation function for `recflow check`")
                .with_default(json!("validate")),
        ]
    }

    pub fn from_options(opts: &FilterOptions, schema: &Arc<Schema>, base_dir: &Path) -> PipelineResult<Self> {
        let (script, origin) = match (opts.str("path"), opts.str("source")) {
            (Some(path), None) => {
                let full = base_dir.join(path);
                let script = std::fs::read_to_string(&full).map_err(|e| {
                    PipelineError::config(format!(
                        "stage '{}': cannot read script {}: {}",
                        opts.stage(),
                        full.display(),
                        e
                    ))
                })?;
                (script, full.display().to_string())
            }
            (None, Some(source)) => (source.to_string(), opts.stage().to_string()),
            _ => {
                return Err(PipelineError::config(format!(
                    "stage '{}': exactly one of 'path' or 'source' must be set",
                    opts.stage()
                )));
            }
        };

        Self::new(
            opts.stage(),
            schema,
            &script,
            &origin,
            opts.require_str("function")?,
            opts.require_str("validate")?,
        )
    }
}

impl Filter for ScriptStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, record: Record, next: &Next) -> PipelineResult<()> {
        self.counters.add_processed();
        let outcome = self
            .engine
            .call_process(&self.name, &self.function, record, next.clone());
        self.counters.add("emitted", outcome.emitted);

        match outcome.result {
            Ok(()) => {
                if outcome.emitted == 0 {
                    self.counters.add_discarded();
                }
                Ok(())
            }
            Err(ScriptFailure::Local(err)) => {
                self.counters.add("errors", 1);
                Err(err)
            }
            // Counted by the stage that raised it
            Err(ScriptFailure::Downstream(err)) => Err(err),
        }
    }

    fn stats(&self) -> FilterStats {
        self.counters.snapshot()
    }

    fn validate(&self, record: &Record) -> Option<PipelineResult<Validation>> {
        self.validate
            .as_deref()
            .map(|function| self.engine.call_validate(&self.name, function, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Chain, CollectSink};

    fn schema() -> Arc<Schema> {
        Schema::new(["id", "method", "path"]).unwrap()
    }

    fn run(stage: Box<dyn Filter>, values: [&str; 3]) -> (Vec<Record>, FilterStats) {
        let schema = schema();
        let chain = Chain::new(Arc::clone(&schema), vec![stage]);
        let sink = CollectSink::new();
        chain
            .process(Record::from_values(&schema, values).unwrap(), sink.clone())
            .unwrap();
        let stats = chain.stats().remove(0).1;
        (sink.take(), stats)
    }

    #[test]
    fn test_swap_stage() {
        let (out, stats) = run(Box::new(SwapStage::new("swap", 1, 2)), ["x", "bar", "baz"]);
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].fields(),
            &[Value::from("x"), Value::from("baz"), Value::from("bar")]
        );
        assert_eq!(stats.processed, 1);
    }

    #[test]
    fn test_discard_stage() {
        let stage = || Box::new(DiscardStage::new("drop", 1, "DELETE".into(), false));

        let (out, stats) = run(stage(), ["1", "DELETE", "/"]);
        assert!(out.is_empty());
        assert_eq!(stats.discarded, 1);

        let (out, stats) = run(stage(), ["1", "GET", "/"]);
        assert_eq!(out.len(), 1);
        assert_eq!(stats.discarded, 0);
    }

    #[test]
    fn test_discard_stage_inverted() {
        let (out, _) = run(
            Box::new(DiscardStage::new("keep-get", 1, "GET".into(), true)),
            ["1", "POST", "/"],
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_duplicate_stage_copies_first() {
        let (out, stats) = run(Box::new(DuplicateStage::new("dup", 2)), ["1", "GET", "/"]);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|r| r.get(0).unwrap().as_str() == Some("1")));
        assert_eq!(stats.extra("copies"), Some(2));
    }

    #[test]
    fn test_set_stage_out_of_range_is_reported() {
        let schema = schema();
        let chain = Chain::new(
            Arc::clone(&schema),
            vec![Box::new(SetStage::new("set", 9, Value::Int(1)))],
        );
        let err = chain
            .process(chain.create_record(), CollectSink::new())
            .unwrap_err();
        assert_eq!(err, PipelineError::OutOfRange { index: 9, len: 3 });
    }
}
