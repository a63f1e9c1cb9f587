use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Scope, AST};
use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{Next, Validation};
use crate::record::{Record, Schema};
use crate::rhai_functions::emit::{DownstreamError, ScriptNext};
use crate::rhai_functions::record::RecordRef;

/// Why a call into a script failed
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptFailure {
    /// Raised by the script itself
    Local(PipelineError),
    /// Returned by a stage after the script, passed back through `next.emit`
    Downstream(PipelineError),
}

impl ScriptFailure {
    pub fn into_error(self) -> PipelineError {
        match self {
            ScriptFailure::Local(err) | ScriptFailure::Downstream(err) => err,
        }
    }
}

/// Result of one `process` call
#[derive(Debug)]
pub struct ProcessOutcome {
    /// Records handed to `next.emit`, including one whose downstream call failed
    pub emitted: u64,
    pub result: Result<(), ScriptFailure>,
}

/// A compiled script together with the engine it runs on.
///
/// Built with the `sync` feature, so one instance is shared by every
/// traversal thread; each call gets a fresh scope.
pub struct RhaiEngine {
    engine: Engine,
    ast: AST,
    origin: String,
}

impl RhaiEngine {
    /// Engine with the record bridge registered for `schema`
    pub fn new_engine(schema: &Arc<Schema>) -> Engine {
        let mut engine = Engine::new();
        engine.set_optimization_level(rhai::OptimizationLevel::Simple);

        engine.on_print(|text| log::debug!(target: "recflow::script", "{}", text));
        engine.on_debug(|text, source, pos| match source {
            Some(source) => log::debug!(target: "recflow::script", "{} @ {}: {}", source, pos, text),
            None => log::debug!(target: "recflow::script", "{}: {}", pos, text),
        });

        crate::rhai_functions::register_all_functions(&mut engine, schema);
        engine
    }

    /// Compile `script`; `origin` names it in error messages (file path or stage name)
    pub fn compile(schema: &Arc<Schema>, script: &str, origin: &str) -> PipelineResult<Self> {
        let engine = Self::new_engine(schema);
        let ast = engine.compile(script).map_err(|e| {
            PipelineError::config(format!("failed to compile script '{}': {}", origin, e))
        })?;
        log::debug!(
            "compiled script '{}' ({} functions)",
            origin,
            ast.iter_functions().count()
        );
        Ok(Self {
            engine,
            ast,
            origin: origin.to_string(),
        })
    }

    pub fn has_fn(&self, name: &str, arity: usize) -> bool {
        self.ast
            .iter_functions()
            .any(|f| f.name == name && f.params.len() == arity)
    }

    /// Run the script body once, then `init()` if the script defines it
    pub fn run_init(&self) -> PipelineResult<()> {
        self.engine.run_ast(&self.ast).map_err(|e| {
            PipelineError::config(format!("script '{}' failed to load: {}", self.origin, e))
        })?;

        if self.has_fn("init", 0) {
            self.call("init", ()).map_err(|e| {
                PipelineError::config(format!("script '{}': init() failed: {}", self.origin, e))
            })?;
        }
        Ok(())
    }

    /// Call `function(record, next)` and report how many records the script forwarded
    pub fn call_process(&self, stage: &str, function: &str, record: Record, next: Next) -> ProcessOutcome {
        let script_next = ScriptNext::new(next);
        let result = self
            .call(function, (RecordRef::new(record), script_next.clone()))
            .map(|_| ())
            .map_err(|e| classify_error(stage, *e));
        ProcessOutcome {
            emitted: script_next.emitted(),
            result,
        }
    }

    /// Call `function(record)` and read the `[ok, index]` validation convention
    pub fn call_validate(&self, stage: &str, function: &str, record: &Record) -> PipelineResult<Validation> {
        let result = self
            .call(function, (RecordRef::new(record.copy()),))
            .map_err(|e| to_pipeline_error(stage, *e))?;

        let parts = result.into_array().map_err(|t| {
            PipelineError::script(stage, format!("{}() must return [ok, index], got {}", function, t))
        })?;
        match parts.as_slice() {
            [ok, index] => match (ok.as_bool(), index.as_int()) {
                (Ok(ok), Ok(index)) => Ok(Validation { ok, index }),
                _ => Err(PipelineError::script(
                    stage,
                    format!("{}() must return [bool, int]", function),
                )),
            },
            _ => Err(PipelineError::script(
                stage,
                format!("{}() must return a two-element array, got {} elements", function, parts.len()),
            )),
        }
    }

    fn call(&self, function: &str, args: impl rhai::FuncArgs) -> Result<Dynamic, Box<EvalAltResult>> {
        let mut scope = Scope::new();
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        self.engine
            .call_fn_with_options(options, &mut scope, &self.ast, function, args)
    }
}

/// Sort an interpreter failure by where it came from.
///
/// Errors that came from stages after the script keep their kind; anything
/// raised by the script itself is a `ScriptError` for `stage`.
pub fn classify_error(stage: &str, err: EvalAltResult) -> ScriptFailure {
    let mut current = &err;
    loop {
        match current {
            EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => current = inner,
            EvalAltResult::ErrorRuntime(value, _) => {
                if let Some(DownstreamError(original)) = value.clone().try_cast::<DownstreamError>() {
                    return ScriptFailure::Downstream(original);
                }
                break;
            }
            _ => break,
        }
    }
    ScriptFailure::Local(PipelineError::script(stage, err.to_string()))
}

pub fn to_pipeline_error(stage: &str, err: EvalAltResult) -> PipelineError {
    classify_error(stage, err).into_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Chain, CollectSink};

    fn schema() -> Arc<Schema> {
        Schema::new(["a", "b"]).unwrap()
    }

    #[test]
    fn test_compile_error_is_config_error() {
        let err = RhaiEngine::compile(&schema(), "fn process(r, next) { ", "broken.rhai")
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(err.to_string().contains("broken.rhai"));
    }

    #[test]
    fn test_has_fn_checks_arity() {
        let engine =
            RhaiEngine::compile(&schema(), "fn process(r, next) {} fn validate(r) { [true, 0] }", "t")
                .unwrap();
        assert!(engine.has_fn("process", 2));
        assert!(!engine.has_fn("process", 1));
        assert!(engine.has_fn("validate", 1));
        assert!(!engine.has_fn("init", 0));
    }

    #[test]
    fn test_init_failure_is_config_error() {
        let engine = RhaiEngine::compile(&schema(), r#"fn init() { throw "nope"; }"#, "t").unwrap();
        assert!(matches!(engine.run_init(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_call_process_counts_emits() {
        let schema = schema();
        let chain = Chain::new(Arc::clone(&schema), Vec::new());
        let sink = CollectSink::new();
        let engine = RhaiEngine::compile(
            &schema,
            "fn process(r, next) { next.emit(r.copy()); next.emit(r); }",
            "t",
        )
        .unwrap();

        let outcome = engine.call_process("t", "process", chain.create_record(), chain.head(sink.clone()));
        assert_eq!(outcome.result, Ok(()));
        assert_eq!(outcome.emitted, 2);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_call_process_separates_local_and_downstream_failures() {
        let schema = schema();
        let chain = Chain::new(Arc::clone(&schema), Vec::new());
        let engine = RhaiEngine::compile(
            &schema,
            r#"fn pass(r, next) { next.emit(r); } fn fail(r, next) { throw "own fault"; }"#,
            "t",
        )
        .unwrap();
        let closed: Arc<dyn crate::pipeline::Sink> =
            Arc::new(|_r: Record| -> PipelineResult<()> { Err(PipelineError::Sink("closed".into())) });

        let outcome = engine.call_process("t", "pass", chain.create_record(), chain.head(Arc::clone(&closed)));
        assert_eq!(outcome.emitted, 1);
        assert_eq!(
            outcome.result,
            Err(ScriptFailure::Downstream(PipelineError::Sink("closed".into())))
        );

        let outcome = engine.call_process("t", "fail", chain.create_record(), chain.head(closed));
        assert_eq!(outcome.emitted, 0);
        assert!(matches!(outcome.result, Err(ScriptFailure::Local(PipelineError::Script { .. }))));
    }

    #[test]
    fn test_validate_shape_errors() {
        let engine = RhaiEngine::compile(
            &schema(),
            "fn short(r) { [true] } fn typed(r) { [1, true] } fn good(r) { [false, 1] }",
            "t",
        )
        .unwrap();
        let record = Record::empty(&schema());
        assert!(engine.call_validate("t", "short", &record).is_err());
        assert!(engine.call_validate("t", "typed", &record).is_err());
        assert_eq!(
            engine.call_validate("t", "good", &record).unwrap(),
            Validation { ok: false, index: 1 }
        );
    }
}
