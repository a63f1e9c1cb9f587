//! Output side of a run: records that leave the chain are queued on a
//! channel and written as JSON lines by a single writer thread.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::thread;

use crate::codec::encode_record;
use crate::config::OutputFormat;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::Sink;
use crate::record::Record;
use crate::unix::{is_broken_pipe, ExitCode};

/// Sink that hands records to the writer thread
#[derive(Clone)]
pub struct ChannelSink {
    sender: Sender<Record>,
}

impl ChannelSink {
    pub fn new(sender: Sender<Record>) -> Self {
        Self { sender }
    }
}

impl Sink for ChannelSink {
    fn emit(&self, record: Record) -> PipelineResult<()> {
        self.sender
            .send(record)
            .map_err(|_| PipelineError::Sink("output writer has stopped".to_string()))
    }
}

/// Running writer thread plus the sink feeding it
pub struct Writer {
    sink: ChannelSink,
    handle: thread::JoinHandle<Result<u64>>,
}

impl Writer {
    /// Start a writer on stdout, or on `path` when given
    pub fn spawn(path: Option<&Path>, format: OutputFormat, capacity: usize) -> Result<Self> {
        let output: Box<dyn Write + Send> = match path {
            Some(path) => Box::new(
                File::create(path)
                    .with_context(|| format!("Failed to create output file {}", path.display()))?,
            ),
            None => Box::new(io::stdout()),
        };
        Ok(Self::spawn_with(output, format, capacity))
    }

    pub fn spawn_with(output: Box<dyn Write + Send>, format: OutputFormat, capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        let handle = thread::spawn(move || writer_thread(receiver, output, format));
        Self {
            sink: ChannelSink::new(sender),
            handle,
        }
    }

    pub fn sink(&self) -> ChannelSink {
        self.sink.clone()
    }

    /// Close the channel, wait for queued records to be written, return the count.
    ///
    /// Every other clone of the sink must be dropped first or this blocks.
    pub fn finish(self) -> Result<u64> {
        drop(self.sink);
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("output writer thread panicked")),
        }
    }
}

fn writer_thread(
    receiver: Receiver<Record>,
    output: Box<dyn Write + Send>,
    format: OutputFormat,
) -> Result<u64> {
    let mut output = BufWriter::new(output);
    let mut written = 0u64;

    while let Ok(record) = receiver.recv() {
        let line = encode_record(&record, format);
        write_line(&mut output, &line)?;
        written += 1;

        // Flush whenever the queue runs dry so listeners see output promptly
        if receiver.is_empty() {
            flush(&mut output)?;
        }
    }

    flush(&mut output)?;
    log::debug!("writer finished after {} records", written);
    Ok(written)
}

fn write_line<W: Write>(output: &mut W, line: &str) -> Result<()> {
    match writeln!(output, "{}", line) {
        Ok(()) => Ok(()),
        Err(e) if is_broken_pipe(&e) => {
            // Broken pipe is normal in pipelines - exit quietly
            ExitCode::SignalPipe.exit();
        }
        Err(e) => Err(anyhow::anyhow!("Failed to write output: {}", e)),
    }
}

fn flush<W: Write>(output: &mut W) -> Result<()> {
    match output.flush() {
        Ok(()) => Ok(()),
        Err(e) if is_broken_pipe(&e) => ExitCode::SignalPipe.exit(),
        Err(e) => Err(anyhow::anyhow!("Failed to flush output: {}", e)),
    }
}
