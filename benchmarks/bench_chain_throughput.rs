use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;

use recflow::codec::{decode_line, encode_record};
use recflow::config::{FilterConfig, OutputFormat};
use recflow::pipeline::{Chain, PipelineBuilder, Sink};
use recflow::record::{Record, Schema};
use recflow::PipelineResult;

const FIELDS: [&str; 5] = ["host", "method", "path", "status", "bytes"];

fn schema() -> Arc<Schema> {
    Schema::new(FIELDS).unwrap()
}

fn filter(kind: &str, options: serde_json::Value) -> FilterConfig {
    FilterConfig {
        kind: kind.to_string(),
        name: None,
        options: options.as_object().cloned().unwrap_or_default(),
    }
}

fn chain(filters: Vec<FilterConfig>) -> Chain {
    filters
        .into_iter()
        .fold(PipelineBuilder::new(schema()), |builder, f| builder.add_filter(f))
        .build()
        .unwrap()
}

fn record(schema: &Arc<Schema>) -> Record {
    Record::from_values(schema, ["10.0.0.1", "GET", "/index.html", "200", "5120"]).unwrap()
}

/// Sink that drops everything; keeps the sink cost out of the numbers
fn null_sink() -> Arc<dyn Sink> {
    Arc::new(|record: Record| -> PipelineResult<()> {
        black_box(record);
        Ok(())
    })
}

// =============================================================================
// Native stages
// =============================================================================

fn bench_empty_chain(c: &mut Criterion) {
    let chain = chain(Vec::new());
    let sink = null_sink();
    c.bench_function("empty_chain", |b| {
        b.iter(|| chain.process(record(chain.schema()), Arc::clone(&sink)).unwrap());
    });
}

fn bench_native_stages(c: &mut Criterion) {
    let chain = chain(vec![
        filter("noop", json!({})),
        filter("swap", json!({"a": "method", "b": "path"})),
        filter("discard", json!({"field": "status", "equals": "500"})),
        filter("set", json!({"field": "bytes", "value": 0})),
    ]);
    let sink = null_sink();
    c.bench_function("native_four_stages", |b| {
        b.iter(|| chain.process(record(chain.schema()), Arc::clone(&sink)).unwrap());
    });
}

fn bench_fan_out(c: &mut Criterion) {
    let chain = chain(vec![
        filter("duplicate", json!({"copies": 3})),
        filter("noop", json!({})),
    ]);
    let sink = null_sink();
    c.bench_function("fan_out_x4", |b| {
        b.iter(|| chain.process(record(chain.schema()), Arc::clone(&sink)).unwrap());
    });
}

// =============================================================================
// Script stages
// =============================================================================

fn bench_script_pass_through(c: &mut Criterion) {
    let chain = chain(vec![filter(
        "script",
        json!({"source": "fn process(r, next) { next.emit(r); }"}),
    )]);
    let sink = null_sink();
    c.bench_function("script_pass_through", |b| {
        b.iter(|| chain.process(record(chain.schema()), Arc::clone(&sink)).unwrap());
    });
}

fn bench_script_field_access(c: &mut Criterion) {
    let chain = chain(vec![filter(
        "script",
        json!({"source": r#"
            fn process(r, next) {
                if r["status"] == "200" {
                    r.set(schema::fields["path"], r["method"] + " " + r["path"]);
                    next.emit(r);
                }
            }
        "#}),
    )]);
    let sink = null_sink();
    c.bench_function("script_field_access", |b| {
        b.iter(|| chain.process(record(chain.schema()), Arc::clone(&sink)).unwrap());
    });
}

// =============================================================================
// Codec
// =============================================================================

fn bench_codec(c: &mut Criterion) {
    let schema = schema();
    let array_line = r#"["10.0.0.1", "GET", "/index.html", "200", "5120"]"#;
    let object_line =
        r#"{"host": "10.0.0.1", "method": "GET", "path": "/index.html", "status": "200"}"#;
    let encoded = record(&schema);

    c.bench_function("decode_array_line", |b| {
        b.iter(|| black_box(decode_line(&schema, black_box(array_line)).unwrap()));
    });
    c.bench_function("decode_object_line", |b| {
        b.iter(|| black_box(decode_line(&schema, black_box(object_line)).unwrap()));
    });
    c.bench_function("encode_array", |b| {
        b.iter(|| black_box(encode_record(&encoded, OutputFormat::Array)));
    });
}

criterion_group!(
    native_benches,
    bench_empty_chain,
    bench_native_stages,
    bench_fan_out,
);

criterion_group!(
    script_benches,
    bench_script_pass_through,
    bench_script_field_access,
);

criterion_group!(codec_benches, bench_codec);

criterion_main!(native_benches, script_benches, codec_benches);
