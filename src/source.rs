//! Record sources: a TCP listener with one traversal thread per connection,
//! and a line reader (stdin or file) feeding a small worker pool.
//!
//! Each decoded line is one independent traversal of the shared chain.
//! Failures are logged and counted here; they never stop the source.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::codec::decode_line;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{Chain, Sink};
use crate::record::Record;
use crate::stats::SourceStats;

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const READ_POLL: Duration = Duration::from_millis(250);

/// Longest accepted input line, excluding the newline
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Everything a source needs to push records through the chain
#[derive(Clone)]
pub struct SourceContext {
    chain: Arc<Chain>,
    sink: Arc<dyn Sink>,
    stats: Arc<SourceStats>,
}

/// Counts records that reach the end of the chain, then passes them on
struct CountingSink {
    inner: Arc<dyn Sink>,
    stats: Arc<SourceStats>,
}

impl Sink for CountingSink {
    fn emit(&self, record: Record) -> PipelineResult<()> {
        self.inner.emit(record)?;
        self.stats.add_records_emitted(1);
        Ok(())
    }
}

impl SourceContext {
    pub fn new(chain: Arc<Chain>, sink: Arc<dyn Sink>, stats: Arc<SourceStats>) -> Self {
        let counting: Arc<dyn Sink> = Arc::new(CountingSink {
            inner: sink,
            stats: Arc::clone(&stats),
        });
        Self {
            chain,
            sink: counting,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<SourceStats> {
        &self.stats
    }

    /// Count and log a line that was dropped before decoding
    pub fn reject_line(&self, origin: &str, line_no: u64, reason: &str) {
        self.stats.add_decode_error();
        log::warn!("{}:{}: skipping line: {}", origin, line_no, reason);
    }

    /// Decode and run one input line. Returns false once the sink is gone.
    pub fn handle_line(&self, origin: &str, line_no: u64, line: &str) -> bool {
        let record = match decode_line(self.chain.schema(), line) {
            Ok(Some(record)) => record,
            Ok(None) => return true,
            Err(e) => {
                self.stats.add_decode_error();
                log::warn!("{}:{}: skipping line: {}", origin, line_no, e);
                return true;
            }
        };

        self.stats.add_record_read();
        match self.chain.process(record, Arc::clone(&self.sink)) {
            Ok(()) => true,
            Err(e @ PipelineError::Sink(_)) => {
                self.stats.add_traversal_error();
                log::error!("{}:{}: {}", origin, line_no, e);
                false
            }
            Err(e) => {
                self.stats.add_traversal_error();
                log::warn!("{}:{}: {}", origin, line_no, e);
                true
            }
        }
    }
}

/// Bind `addr` and serve connections until `stop` is set
pub fn listen(addr: &str, ctx: SourceContext, stop: &AtomicBool) -> Result<()> {
    let listener =
        TcpListener::bind(addr).with_context(|| format!("Failed to listen on {}", addr))?;
    log::info!("listening on {}", listener.local_addr()?);
    serve(listener, ctx, stop)
}

/// Accept loop; each connection gets its own thread and reads until EOF or `stop`
pub fn serve(listener: TcpListener, ctx: SourceContext, stop: &AtomicBool) -> Result<()> {
    listener.set_nonblocking(true)?;

    thread::scope(|scope| {
        let mut connections: Vec<thread::ScopedJoinHandle<'_, ()>> = Vec::new();

        while !stop.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    ctx.stats.add_connection();
                    log::debug!("connection from {}", peer);
                    let ctx = &ctx;
                    connections.push(scope.spawn(move || {
                        let origin = peer.to_string();
                        if let Err(e) = read_connection(stream, &origin, ctx, stop) {
                            log::warn!("{}: connection error: {}", origin, e);
                        }
                        log::debug!("{}: connection closed", origin);
                    }));
                    connections.retain(|handle| !handle.is_finished());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => log::warn!("accept failed: {}", e),
            }
        }

        log::debug!("listener stopping, waiting for {} connections", connections.len());
    });
    Ok(())
}

fn read_connection(
    stream: TcpStream,
    origin: &str,
    ctx: &SourceContext,
    stop: &AtomicBool,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_POLL))?;
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut line_no = 0u64;
    // Inside an over-long line that was already reported
    let mut skipping = false;

    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }
        match read_capped_line(&mut reader, &mut buf) {
            Ok(0) => {
                if !buf.is_empty() && !skipping {
                    line_no += 1;
                    ctx.handle_line(origin, line_no, &String::from_utf8_lossy(&buf));
                }
                return Ok(());
            }
            Ok(_) => {
                if buf.last() != Some(&b'\n') {
                    if buf.len() > MAX_LINE_BYTES {
                        if !skipping {
                            line_no += 1;
                            ctx.reject_line(origin, line_no, &too_long());
                            skipping = true;
                        }
                        buf.clear();
                    }
                    // EOF without newline arrives as a short read; next call returns 0
                    continue;
                }
                if skipping {
                    skipping = false;
                    buf.clear();
                    continue;
                }
                line_no += 1;
                let keep_going = ctx.handle_line(origin, line_no, &String::from_utf8_lossy(&buf));
                buf.clear();
                if !keep_going {
                    return Ok(());
                }
            }
            // Partial bytes stay in `buf` across timeouts
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

/// `read_until` that stops once `buf` holds more than [`MAX_LINE_BYTES`]
fn read_capped_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<usize> {
    let limit = (MAX_LINE_BYTES + 1).saturating_sub(buf.len()) as u64;
    reader.take(limit).read_until(b'\n', buf)
}

fn too_long() -> String {
    format!("line longer than {} bytes", MAX_LINE_BYTES)
}

/// Open stdin (`-`) or a file as a line reader
pub fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead + Send>> {
    let reader: Box<dyn Read + Send> = match path {
        None => Box::new(io::stdin()),
        Some(path) if path.as_os_str() == "-" => Box::new(io::stdin()),
        Some(path) => Box::new(
            File::open(path).with_context(|| format!("Failed to open input {}", path.display()))?,
        ),
    };
    Ok(Box::new(BufReader::new(reader)))
}

/// Read lines from `reader` and run them on `threads` workers until EOF or `stop`
pub fn run_batch(
    reader: Box<dyn BufRead + Send>,
    origin: &str,
    threads: usize,
    capacity: usize,
    ctx: SourceContext,
    stop: &AtomicBool,
) -> Result<()> {
    let threads = threads.max(1);
    let (sender, receiver) = bounded::<(u64, String)>(capacity.max(1));
    let halted = Arc::new(AtomicBool::new(false));

    let workers: Vec<_> = (0..threads)
        .map(|worker_id| {
            let receiver = receiver.clone();
            let ctx = ctx.clone();
            let origin = origin.to_string();
            let halted = Arc::clone(&halted);
            thread::Builder::new()
                .name(format!("recflow-worker-{}", worker_id))
                .spawn(move || worker_loop(receiver, &origin, &ctx, &halted))
        })
        .collect::<io::Result<_>>()?;
    drop(receiver);

    let mut reader = reader;
    let mut buf = Vec::new();
    let mut line_no = 0u64;
    let mut skipping = false;
    let mut result = Ok(());
    while !stop.load(Ordering::Relaxed) && !halted.load(Ordering::Relaxed) {
        buf.clear();
        match read_capped_line(&mut reader, &mut buf) {
            Ok(0) => break,
            Ok(_) if buf.len() > MAX_LINE_BYTES && buf.last() != Some(&b'\n') => {
                if !skipping {
                    line_no += 1;
                    ctx.reject_line(origin, line_no, &too_long());
                    skipping = true;
                }
            }
            Ok(_) if skipping => skipping = false,
            Ok(_) => {
                line_no += 1;
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if sender.send((line_no, line)).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                result = Err(anyhow::anyhow!("{}: read failed: {}", origin, e));
                break;
            }
        }
    }
    drop(sender);

    for worker in workers {
        if worker.join().is_err() {
            log::error!("worker thread panicked");
        }
    }
    result
}

fn worker_loop(receiver: Receiver<(u64, String)>, origin: &str, ctx: &SourceContext, halted: &AtomicBool) {
    while let Ok((line_no, line)) = receiver.recv() {
        if !ctx.handle_line(origin, line_no, &line) {
            halted.store(true, Ordering::Relaxed);
            return;
        }
    }
}
