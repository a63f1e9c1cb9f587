use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::options::{FilterOptions, OptionSpec};
use super::{
    Chain, DiscardStage, DuplicateStage, Filter, NoopStage, ScriptStage, SetStage, SwapStage,
};
use crate::config::{FilterConfig, PipelineFileConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::record::Schema;

/// A filter type that can be named in a pipeline config
pub struct FilterKind {
    pub name: &'static str,
    pub help: &'static str,
    pub options: fn() -> Vec<OptionSpec>,
}

pub const FILTER_KINDS: &[FilterKind] = &[
    FilterKind {
        name: "noop",
        help: "forward every record unchanged",
        options: NoopStage::option_specs,
    },
    FilterKind {
        name: "swap",
        help: "exchange the values of two fields",
        options: SwapStage::option_specs,
    },
    FilterKind {
        name: "discard",
        help: "drop records whose field equals a value",
        options: DiscardStage::option_specs,
    },
    FilterKind {
        name: "duplicate",
        help: "forward copies of every record before the record itself",
        options: DuplicateStage::option_specs,
    },
    FilterKind {
        name: "set",
        help: "overwrite a field with a constant",
        options: SetStage::option_specs,
    },
    FilterKind {
        name: "script",
        help: "run a Rhai function process(record, next)",
        options: ScriptStage::option_specs,
    },
];

pub fn find_kind(name: &str) -> Option<&'static FilterKind> {
    FILTER_KINDS.iter().find(|kind| kind.name == name)
}

/// Builds a [`Chain`] from validated filter configs
#[derive(Clone)]
pub struct PipelineBuilder {
    schema: Arc<Schema>,
    filters: Vec<FilterConfig>,
    base_dir: PathBuf,
}

impl PipelineBuilder {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            filters: Vec::new(),
            base_dir: PathBuf::from("."),
        }
    }

    /// Builder for a parsed pipeline file; script paths resolve against `base_dir`
    pub fn from_config(config: &PipelineFileConfig, base_dir: &Path) -> PipelineResult<Self> {
        let schema = Schema::new(config.schema.iter().cloned())?;
        Ok(Self {
            schema,
            filters: config.filters.clone(),
            base_dir: base_dir.to_path_buf(),
        })
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn add_filter(mut self, filter: FilterConfig) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Construct every filter; the first bad config aborts the whole build
    pub fn build(&self) -> PipelineResult<Chain> {
        let mut names = HashSet::new();
        let mut stages: Vec<Box<dyn Filter>> = Vec::with_capacity(self.filters.len());

        for (position, config) in self.filters.iter().enumerate() {
            let name = config
                .name
                .clone()
                .unwrap_or_else(|| format!("{}#{}", config.kind, position));
            if !names.insert(name.clone()) {
                return Err(PipelineError::config(format!(
                    "duplicate stage name '{}'",
                    name
                )));
            }

            let stage = self.build_filter(&name, config)?;
            log::debug!("built stage {} '{}' ({})", position, name, config.kind);
            stages.push(stage);
        }

        Ok(Chain::new(Arc::clone(&self.schema), stages))
    }

    fn build_filter(&self, name: &str, config: &FilterConfig) -> PipelineResult<Box<dyn Filter>> {
        let kind = find_kind(&config.kind).ok_or_else(|| {
            PipelineError::config(format!(
                "stage '{}': unknown filter type '{}'",
                name, config.kind
            ))
        })?;
        let opts = FilterOptions::resolve(name, &(kind.options)(), &config.options)?;
        let schema = &self.schema;

        let stage: Box<dyn Filter> = match kind.name {
            "noop" => Box::new(NoopStage::from_options(&opts, schema)?),
            "swap" => Box::new(SwapStage::from_options(&opts, schema)?),
            "discard" => Box::new(DiscardStage::from_options(&opts, schema)?),
            "duplicate" => Box::new(DuplicateStage::from_options(&opts, schema)?),
            "set" => Box::new(SetStage::from_options(&opts, schema)?),
            "script" => Box::new(ScriptStage::from_options(&opts, schema, &self.base_dir)?),
            other => {
                return Err(PipelineError::config(format!(
                    "stage '{}': filter type '{}' has no constructor",
                    name, other
                )));
            }
        };
        Ok(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(kind: &str, options: serde_json::Value) -> FilterConfig {
        FilterConfig {
            kind: kind.to_string(),
            name: None,
            options: options.as_object().cloned().unwrap_or_default(),
        }
    }

    fn builder() -> PipelineBuilder {
        PipelineBuilder::new(Schema::new(["a", "b", "c"]).unwrap())
    }

    #[test]
    fn test_every_kind_has_a_constructor() {
        for kind in FILTER_KINDS {
            let options = match kind.name {
                "swap" => json!({"a": 0, "b": 1}),
                "discard" => json!({"field": 0, "equals": "x"}),
                "set" => json!({"field": "c", "value": 1}),
                "script" => json!({"source": "fn process(r, next) { next.emit(r) }"}),
                _ => json!({}),
            };
            let chain = builder().add_filter(filter(kind.name, options)).build();
            assert!(chain.is_ok(), "kind {} failed to build", kind.name);
        }
    }

    #[test]
    fn test_default_stage_names() {
        let chain = builder()
            .add_filter(filter("noop", json!({})))
            .add_filter(filter("swap", json!({"a": "a", "b": "c"})))
            .build()
            .unwrap();
        assert_eq!(chain.stage_names(), vec!["noop#0", "swap#1"]);
    }

    #[test]
    fn test_build_errors() {
        let err = builder()
            .add_filter(filter("teleport", json!({})))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("unknown filter type 'teleport'"));

        let err = builder()
            .add_filter(filter("swap", json!({"a": 0})))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("missing required option 'b'"));

        let mut named = filter("noop", json!({}));
        named.name = Some("same".into());
        let err = builder()
            .add_filter(named.clone())
            .add_filter(named)
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("duplicate stage name 'same'"));
    }

    #[test]
    fn test_script_needs_exactly_one_source() {
        let err = builder()
            .add_filter(filter("script", json!({})))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("exactly one of 'path' or 'source'"));

        let err = builder()
            .add_filter(filter("script", json!({"source": "fn other() {}"})))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("does not define process(record, next)"));
    }

    #[test]
    fn test_script_path_resolves_against_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pass.rhai"),
            "fn process(r, next) { next.emit(r) }",
        )
        .unwrap();

        let chain = builder()
            .with_base_dir(dir.path())
            .add_filter(filter("script", json!({"path": "pass.rhai"})))
            .build();
        assert!(chain.is_ok());
    }
}
