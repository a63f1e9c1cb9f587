//! `recflow check`: push sample records through a chain and report what came
//! out, together with each script stage's `validate(record)` verdict on every
//! emitted record.

use anyhow::Result;
use std::io::{BufRead, Write};

use crate::codec::{decode_line, encode_record};
use crate::config::OutputFormat;
use crate::pipeline::{Chain, CollectSink, Validation};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CheckSummary {
    pub lines: u64,
    pub emitted: u64,
    pub validation_failures: u64,
    pub errors: u64,
}

impl CheckSummary {
    pub fn passed(&self) -> bool {
        self.validation_failures == 0 && self.errors == 0
    }

    pub fn format_summary(&self) -> String {
        format!(
            "{} records checked, {} emitted, {} validation failures, {} errors",
            self.lines, self.emitted, self.validation_failures, self.errors
        )
    }
}

/// Run every non-blank line of `input` through `chain`, writing a report to `out`
pub fn run_check<R: BufRead, W: Write>(
    chain: &Chain,
    input: R,
    format: OutputFormat,
    out: &mut W,
) -> Result<CheckSummary> {
    let mut summary = CheckSummary::default();

    for (index, line) in input.lines().enumerate() {
        let line = line?;
        let line_no = index + 1;

        let record = match decode_line(chain.schema(), &line) {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(e) => {
                summary.errors += 1;
                writeln!(out, "line {}: decode error: {}", line_no, e)?;
                continue;
            }
        };
        summary.lines += 1;

        let sink = CollectSink::new();
        if let Err(e) = chain.process(record, sink.clone()) {
            summary.errors += 1;
            writeln!(out, "line {}: error: {}", line_no, e)?;
        }

        let emitted = sink.take();
        summary.emitted += emitted.len() as u64;
        writeln!(out, "line {}: {} emitted", line_no, emitted.len())?;

        for record in &emitted {
            writeln!(out, "  {}", encode_record(record, format))?;
            for (stage, result) in chain.validate(record) {
                match result {
                    Ok(Validation { ok: true, .. }) => writeln!(out, "    {}: ok", stage)?,
                    Ok(Validation { ok: false, index }) => {
                        summary.validation_failures += 1;
                        let field = usize::try_from(index)
                            .ok()
                            .and_then(|i| chain.schema().field_name(i))
                            .unwrap_or("?");
                        writeln!(out, "    {}: invalid field {} ({})", stage, index, field)?;
                    }
                    Err(e) => {
                        summary.errors += 1;
                        writeln!(out, "    {}: validate failed: {}", stage, e)?;
                    }
                }
            }
        }
    }

    writeln!(out, "{}", summary.format_summary())?;
    Ok(summary)
}
