use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};

use crate::error::{PipelineError, PipelineResult};
use crate::record::{Schema, Value};

/// Accepted shape of a filter option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Int,
    Str,
    Bool,
    /// Field index or schema field name
    Field,
    /// Any scalar, used for record values
    Scalar,
}

impl OptionKind {
    fn describe(self) -> &'static str {
        match self {
            OptionKind::Int => "an integer",
            OptionKind::Str => "a string",
            OptionKind::Bool => "a boolean",
            OptionKind::Field => "a field index or field name",
            OptionKind::Scalar => "a scalar value",
        }
    }

    fn accepts(self, value: &JsonValue) -> bool {
        match self {
            OptionKind::Int => value.as_i64().is_some(),
            OptionKind::Str => value.is_string(),
            OptionKind::Bool => value.is_boolean(),
            OptionKind::Field => value.as_u64().is_some() || value.is_string(),
            OptionKind::Scalar => !value.is_array() && !value.is_object(),
        }
    }
}

/// Declaration of one option a filter kind understands
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
    pub required: bool,
    pub default: Option<JsonValue>,
    pub help: &'static str,
}

impl OptionSpec {
    pub fn required(name: &'static str, kind: OptionKind, help: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            help,
        }
    }

    pub fn optional(name: &'static str, kind: OptionKind, help: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            help,
        }
    }

    pub fn with_default(mut self, default: JsonValue) -> Self {
        self.default = Some(default);
        self
    }

    /// One-line description used by `recflow filters`
    pub fn describe(&self) -> String {
        let mut text = format!("{} ({})", self.name, self.kind.describe());
        if self.required {
            text.push_str(", required");
        }
        if let Some(default) = &self.default {
            text.push_str(&format!(", default {}", default));
        }
        if !self.help.is_empty() {
            text.push_str(&format!(": {}", self.help));
        }
        text
    }
}

/// Options of one filter after checking them against its declarations
#[derive(Debug, Clone)]
pub struct FilterOptions {
    stage: String,
    values: IndexMap<String, JsonValue>,
}

impl FilterOptions {
    /// Check `raw` against `specs`, filling in defaults.
    ///
    /// Unknown options, missing required options and wrongly typed values are
    /// all reported as config errors naming the stage.
    pub fn resolve(stage: &str, specs: &[OptionSpec], raw: &Map<String, JsonValue>) -> PipelineResult<Self> {
        for key in raw.keys() {
            if !specs.iter().any(|spec| spec.name == key) {
                return Err(PipelineError::config(format!(
                    "stage '{}': unknown option '{}'",
                    stage, key
                )));
            }
        }

        let mut values = IndexMap::new();
        for spec in specs {
            let value = match raw.get(spec.name).or(spec.default.as_ref()) {
                Some(value) => value.clone(),
                None if spec.required => {
                    return Err(PipelineError::config(format!(
                        "stage '{}': missing required option '{}'",
                        stage, spec.name
                    )));
                }
                None => continue,
            };

            if !spec.kind.accepts(&value) {
                return Err(PipelineError::config(format!(
                    "stage '{}': option '{}' must be {}, got {}",
                    stage,
                    spec.name,
                    spec.kind.describe(),
                    value
                )));
            }
            values.insert(spec.name.to_string(), value);
        }

        Ok(Self {
            stage: stage.to_string(),
            values,
        })
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(JsonValue::as_i64)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(JsonValue::as_str)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(JsonValue::as_bool)
    }

    pub fn scalar(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned().and_then(Value::from_json)
    }

    pub fn require_str(&self, name: &str) -> PipelineResult<&str> {
        self.str(name).ok_or_else(|| self.missing(name))
    }

    /// Resolve a field option to an index valid for `schema`
    pub fn field(&self, name: &str, schema: &Schema) -> PipelineResult<usize> {
        let index = match self.values.get(name) {
            Some(JsonValue::String(field)) => schema.field_index(field).map_err(|_| {
                PipelineError::config(format!(
                    "stage '{}': option '{}' names unknown field '{}'",
                    self.stage, name, field
                ))
            })?,
            Some(value) => value.as_u64().ok_or_else(|| self.missing(name))? as usize,
            None => return Err(self.missing(name)),
        };

        if index >= schema.len() {
            return Err(PipelineError::config(format!(
                "stage '{}': option '{}' index {} exceeds schema of {} fields",
                self.stage,
                name,
                index,
                schema.len()
            )));
        }
        Ok(index)
    }

    fn missing(&self, name: &str) -> PipelineError {
        PipelineError::config(format!(
            "stage '{}': option '{}' is not set",
            self.stage, name
        ))
    }
}
