use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};

/// A single field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
        }
    }

    /// Convert from a decoded JSON value; nested arrays and objects are rejected
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Value::Null),
            serde_json::Value::Bool(b) => Some(Value::Bool(b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float)),
            serde_json::Value::String(s) => Some(Value::Str(s)),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// The field-name table shared by every record of a pipeline run.
///
/// Built once before the chain starts and only ever handed out behind an
/// `Arc`, so lookups need no locking.
#[derive(Debug, PartialEq)]
pub struct Schema {
    names: IndexMap<String, usize>,
}

impl Schema {
    pub fn new<I, S>(names: I) -> PipelineResult<Arc<Self>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = IndexMap::new();
        for name in names {
            let name = name.into();
            let index = table.len();
            if table.insert(name.clone(), index).is_some() {
                return Err(PipelineError::config(format!(
                    "duplicate field name '{}' in schema",
                    name
                )));
            }
        }
        if table.is_empty() {
            return Err(PipelineError::config("schema must declare at least one field"));
        }
        Ok(Arc::new(Self { names: table }))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn field_index(&self, name: &str) -> PipelineResult<usize> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| PipelineError::UnknownField(name.to_string()))
    }

    pub fn field_name(&self, index: usize) -> Option<&str> {
        self.names.get_index(index).map(|(name, _)| name.as_str())
    }

    /// Name → index pairs in declaration order
    pub fn names(&self) -> impl Iterator<Item = (&str, usize)> {
        self.names.iter().map(|(name, index)| (name.as_str(), *index))
    }
}

/// The unit of data flowing through a chain.
///
/// A record is owned by exactly one stage at a time. Forwarding it moves it;
/// a stage that wants to forward the same data twice calls [`Record::copy`]
/// first.
#[derive(Debug, PartialEq)]
pub struct Record {
    schema: Arc<Schema>,
    fields: Vec<Value>,
}

impl Record {
    /// New record with every field set to the schema zero value
    pub fn empty(schema: &Arc<Schema>) -> Self {
        Self {
            schema: Arc::clone(schema),
            fields: vec![Value::Null; schema.len()],
        }
    }

    /// Build a record from positional values; missing trailing values read as null
    pub fn from_values<I>(schema: &Arc<Schema>, values: I) -> PipelineResult<Self>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let mut record = Self::empty(schema);
        for (index, value) in values.into_iter().enumerate() {
            record.set(index, value.into())?;
        }
        Ok(record)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    pub fn get(&self, index: usize) -> PipelineResult<&Value> {
        self.fields.get(index).ok_or(PipelineError::OutOfRange {
            index,
            len: self.fields.len(),
        })
    }

    pub fn set(&mut self, index: usize, value: Value) -> PipelineResult<()> {
        let len = self.fields.len();
        match self.fields.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(PipelineError::OutOfRange { index, len }),
        }
    }

    pub fn field_index(&self, name: &str) -> PipelineResult<usize> {
        self.schema.field_index(name)
    }

    pub fn get_by_name(&self, name: &str) -> PipelineResult<&Value> {
        self.get(self.field_index(name)?)
    }

    pub fn set_by_name(&mut self, name: &str, value: Value) -> PipelineResult<()> {
        let index = self.field_index(name)?;
        self.set(index, value)
    }

    pub fn swap(&mut self, a: usize, b: usize) -> PipelineResult<()> {
        let len = self.fields.len();
        for index in [a, b] {
            if index >= len {
                return Err(PipelineError::OutOfRange { index, len });
            }
        }
        self.fields.swap(a, b);
        Ok(())
    }

    /// Field-for-field copy with its own storage
    pub fn copy(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            fields: self.fields.clone(),
        }
    }
}
