// tests/common/mod.rs
// Shared test utilities for integration tests
#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use recflow::config::FilterConfig;
use recflow::pipeline::{Chain, CollectSink, PipelineBuilder};
use recflow::record::{Record, Schema};
use serde_json::Value as JsonValue;
use tempfile::TempDir;

/// Run the recflow binary with given arguments and input via stdin
pub fn run_recflow_with_input(args: &[&str], input: &str) -> (String, String, i32) {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_recflow"))
        .args(args)
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to start recflow");

    if let Some(mut stdin) = cmd.stdin.take() {
        stdin
            .write_all(input.as_bytes())
            .expect("Failed to write to stdin");
    }

    let output = cmd.wait_with_output().expect("Failed to read output");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}

/// A temporary directory holding a pipeline file and any scripts it refers to
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).expect("Failed to write fixture file");
        path
    }

    pub fn pipeline(&self, config: &JsonValue) -> PathBuf {
        self.write("pipeline.json", &config.to_string())
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

pub fn filter(kind: &str, options: JsonValue) -> FilterConfig {
    FilterConfig {
        kind: kind.to_string(),
        name: None,
        options: options.as_object().cloned().unwrap_or_default(),
    }
}

pub fn named(name: &str, kind: &str, options: JsonValue) -> FilterConfig {
    FilterConfig {
        name: Some(name.to_string()),
        ..filter(kind, options)
    }
}

/// Build a chain over `fields` from filter configs
pub fn build_chain(fields: &[&str], filters: Vec<FilterConfig>) -> Chain {
    let schema = Schema::new(fields.iter().copied()).expect("valid schema");
    filters
        .into_iter()
        .fold(PipelineBuilder::new(schema), |builder, f| builder.add_filter(f))
        .build()
        .expect("pipeline should build")
}

/// Chain with a single inline script stage named `script`
pub fn script_chain(fields: &[&str], source: &str) -> Chain {
    build_chain(
        fields,
        vec![named("script", "script", serde_json::json!({ "source": source }))],
    )
}

/// Run one traversal and return what reached the sink
pub fn run_one(chain: &Chain, values: &[&str]) -> Vec<Record> {
    let sink = CollectSink::new();
    let record = Record::from_values(chain.schema(), values.iter().copied()).expect("record fits schema");
    chain.process(record, sink.clone()).expect("traversal should succeed");
    sink.take()
}

/// Field values of a record as display strings, null as ""
pub fn strings(record: &Record) -> Vec<String> {
    record
        .fields()
        .iter()
        .map(|v| if v.is_null() { String::new() } else { v.to_string() })
        .collect()
}

pub fn schema(fields: &[&str]) -> Arc<Schema> {
    Schema::new(fields.iter().copied()).expect("valid schema")
}
