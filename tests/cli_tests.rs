mod common;
use common::*;

use serde_json::{json, Value as JsonValue};

fn parse_lines(stdout: &str) -> Vec<JsonValue> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("output line should be JSON"))
        .collect()
}

#[test]
fn test_help_flag() {
    let (stdout, _stderr, exit_code) = run_recflow_with_input(&["--help"], "");
    assert_eq!(exit_code, 0, "recflow --help should exit successfully");
    assert!(stdout.contains("record-processing pipeline"));
    assert!(stdout.contains("run"));
    assert!(stdout.contains("check"));
}

#[test]
fn test_filters_lists_kinds_and_options() {
    let (stdout, _stderr, exit_code) = run_recflow_with_input(&["filters"], "");
    assert_eq!(exit_code, 0);
    for kind in ["noop", "swap", "discard", "duplicate", "set", "script"] {
        assert!(stdout.contains(kind), "missing filter kind {}", kind);
    }
    assert!(stdout.contains("a (a field index or field name), required"));
}

#[test]
fn test_run_stdin_swap_and_discard() {
    let fixture = Fixture::new();
    let config = fixture.pipeline(&json!({
        "schema": ["host", "method", "path"],
        "filters": [
            {"type": "discard", "options": {"field": "method", "equals": "HEAD"}},
            {"type": "swap", "options": {"a": 1, "b": "path"}}
        ]
    }));

    let input = r#"["x", "bar", "baz"]
["y", "HEAD", "/"]

{"host": "z", "method": "GET"}
"#;
    let (stdout, stderr, exit_code) = run_recflow_with_input(
        &["run", "--config", config.to_str().unwrap(), "--input", "-"],
        input,
    );
    assert_eq!(exit_code, 0, "stderr: {}", stderr);
    assert_eq!(
        parse_lines(&stdout),
        vec![json!(["x", "baz", "bar"]), json!(["z", null, "GET"])]
    );
    assert!(stderr.contains("2 emitted"), "summary missing: {}", stderr);
}

#[test]
fn test_run_object_output_and_script_file() {
    let fixture = Fixture::new();
    fixture.write(
        "split.rhai",
        r#"
        fn process(r, next) {
            let extra = create_record();
            extra["host"] = "generated";
            next.emit(extra);
            next.emit(r);
        }
        "#,
    );
    let config = fixture.pipeline(&json!({
        "schema": ["host", "n"],
        "filters": [{"type": "script", "name": "split", "options": {"path": "split.rhai"}}]
    }));

    let (stdout, stderr, exit_code) = run_recflow_with_input(
        &[
            "run",
            "-c",
            config.to_str().unwrap(),
            "-i",
            "-",
            "--output-format",
            "object",
        ],
        "[\"a\", 1]\n",
    );
    assert_eq!(exit_code, 0, "stderr: {}", stderr);
    assert_eq!(
        parse_lines(&stdout),
        vec![
            json!({"host": "generated", "n": null}),
            json!({"host": "a", "n": 1})
        ]
    );
}

#[test]
fn test_bad_lines_are_logged_and_skipped() {
    let fixture = Fixture::new();
    let config = fixture.pipeline(&json!({
        "schema": ["a"],
        "filters": [{"type": "script", "name": "picky", "options": {
            "source": "fn process(r, next) { if r[0] == \"boom\" { throw \"bad value\"; } next.emit(r); }"
        }}]
    }));

    let input = "[\"ok\"]\nnot json\n[\"boom\"]\n{\"missing\": 1}\n[\"fine\"]\n";
    let (stdout, stderr, exit_code) = run_recflow_with_input(
        &["run", "-c", config.to_str().unwrap(), "-i", "-"],
        input,
    );
    assert_eq!(exit_code, 0);
    assert_eq!(parse_lines(&stdout), vec![json!(["ok"]), json!(["fine"])]);
    assert!(stderr.contains("stdin:2"), "{}", stderr);
    assert!(stderr.contains("picky"), "{}", stderr);
    assert!(stderr.contains("unknown field 'missing'"), "{}", stderr);
}

#[test]
fn test_output_file_and_threads() {
    let fixture = Fixture::new();
    let config = fixture.pipeline(&json!({
        "schema": ["n"],
        "filters": [{"type": "duplicate", "options": {"copies": 2}}]
    }));
    let input_path = fixture.write(
        "input.jsonl",
        &(0..50).map(|i| format!("[{}]\n", i)).collect::<String>(),
    );
    let output_path = fixture.path().join("out.jsonl");

    let (_stdout, stderr, exit_code) = run_recflow_with_input(
        &[
            "run",
            "-c",
            config.to_str().unwrap(),
            "-i",
            input_path.to_str().unwrap(),
            "-o",
            output_path.to_str().unwrap(),
            "--threads",
            "4",
            "-q",
        ],
        "",
    );
    assert_eq!(exit_code, 0, "stderr: {}", stderr);

    let written = std::fs::read_to_string(&output_path).unwrap();
    let mut values: Vec<i64> = parse_lines(&written)
        .iter()
        .map(|v| v[0].as_i64().unwrap())
        .collect();
    values.sort_unstable();
    let expected: Vec<i64> = (0..50).flat_map(|i| [i, i, i]).collect();
    assert_eq!(values, expected);
}

#[test]
fn test_config_errors_exit_with_usage_code() {
    let fixture = Fixture::new();
    let cases = [
        json!({"schema": ["a", "a"]}),
        json!({"schema": ["a"], "filters": [{"type": "warp"}]}),
        json!({"schema": ["a"], "filters": [{"type": "swap", "options": {"a": 0}}]}),
        json!({"schema": ["a"], "filters": [{"type": "swap", "options": {"a": 0, "b": "zzz"}}]}),
        json!({"schema": ["a"], "filters": [{"type": "noop", "options": {"speed": 1}}]}),
        json!({"schema": ["a"], "filters": [{"type": "script", "options": {"source": "fn process(r, next) {"}}]}),
    ];
    for config in cases {
        let path = fixture.pipeline(&config);
        let (_stdout, stderr, exit_code) =
            run_recflow_with_input(&["run", "-c", path.to_str().unwrap(), "-i", "-"], "");
        assert_eq!(exit_code, 2, "config {} gave stderr {}", config, stderr);
    }
}

#[test]
fn test_check_reports_validation_results() {
    let fixture = Fixture::new();
    let config = fixture.pipeline(&json!({
        "schema": ["user", "email"],
        "filters": [{"type": "script", "name": "emails", "options": {"source": r#"
            fn process(r, next) { next.emit(r); }
            fn validate(r) {
                if r["email"].contains("@") { [true, 0] } else { [false, schema::fields["email"]] }
            }
        "#}}]
    }));

    let good = fixture.write("good.jsonl", "[\"ann\", \"ann@example.org\"]\n");
    let (stdout, stderr, exit_code) = run_recflow_with_input(
        &["check", "-c", config.to_str().unwrap(), "-i", good.to_str().unwrap()],
        "",
    );
    assert_eq!(exit_code, 0, "stdout: {} stderr: {}", stdout, stderr);
    assert!(stdout.contains("emails: ok"));

    let (stdout, _stderr, exit_code) = run_recflow_with_input(
        &["check", "-c", config.to_str().unwrap(), "-i", "-"],
        "[\"bob\", \"nope\"]\n",
    );
    assert_eq!(exit_code, 1);
    assert!(stdout.contains("emails: invalid field 1 (email)"), "{}", stdout);
    assert!(stdout.contains("1 validation failures"));
}
