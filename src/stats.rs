use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::pipeline::Chain;

/// Snapshot of one filter's counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterStats {
    pub processed: u64,
    pub discarded: u64,
    /// Filter-specific counters, in declaration order
    pub extra: Vec<(&'static str, u64)>,
}

impl FilterStats {
    pub fn extra(&self, name: &str) -> Option<u64> {
        self.extra
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
    }

    pub fn format_stats(&self) -> String {
        let mut output = format!("{} processed, {} discarded", self.processed, self.discarded);
        for (name, value) in &self.extra {
            output.push_str(&format!(", {} {}", value, name));
        }
        output
    }
}

/// Counters owned by a single filter.
///
/// Updated from every traversal thread running through the filter and read
/// from the reporter thread, so everything is atomic.
#[derive(Debug)]
pub struct Counters {
    processed: AtomicU64,
    discarded: AtomicU64,
    extra: Vec<(&'static str, AtomicU64)>,
}

impl Counters {
    pub fn new() -> Self {
        Self::with_extra(&[])
    }

    /// Declare filter-specific counters up front
    pub fn with_extra(names: &[&'static str]) -> Self {
        Self {
            processed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            extra: names.iter().map(|name| (*name, AtomicU64::new(0))).collect(),
        }
    }

    pub fn add_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Bump a counter declared in `with_extra`; unknown names are ignored
    pub fn add(&self, name: &str, delta: u64) {
        if let Some((_, counter)) = self.extra.iter().find(|(key, _)| *key == name) {
            counter.fetch_add(delta, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> FilterStats {
        FilterStats {
            processed: self.processed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            extra: self
                .extra
                .iter()
                .map(|(name, counter)| (*name, counter.load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters kept by the source side of the pipeline
#[derive(Debug)]
pub struct SourceStats {
    records_read: AtomicU64,
    decode_errors: AtomicU64,
    traversal_errors: AtomicU64,
    records_emitted: AtomicU64,
    connections: AtomicU64,
    start_time: Instant,
}

/// Plain copy of [`SourceStats`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceSnapshot {
    pub records_read: u64,
    pub decode_errors: u64,
    pub traversal_errors: u64,
    pub records_emitted: u64,
    pub connections: u64,
    pub elapsed: Duration,
}

impl SourceStats {
    pub fn new() -> Self {
        Self {
            records_read: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            traversal_errors: AtomicU64::new(0),
            records_emitted: AtomicU64::new(0),
            connections: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn add_record_read(&self) {
        self.records_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_traversal_error(&self) {
        self.traversal_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_records_emitted(&self, count: u64) {
        self.records_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SourceSnapshot {
        SourceSnapshot {
            records_read: self.records_read.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            traversal_errors: self.traversal_errors.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for SourceStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceSnapshot {
    pub fn format_stats(&self) -> String {
        let mut output = format!(
            "Records: {} read, {} emitted",
            self.records_read, self.records_emitted
        );

        if self.connections > 0 {
            output.push_str(&format!(", {} connections", self.connections));
        }
        if self.decode_errors > 0 {
            output.push_str(&format!(", {} decode errors", self.decode_errors));
        }
        if self.traversal_errors > 0 {
            output.push_str(&format!(", {} traversal errors", self.traversal_errors));
        }

        let elapsed_ms = self.elapsed.as_millis();
        output.push_str(&format!(" in {}ms", elapsed_ms));

        if elapsed_ms > 0 && self.records_read > 0 {
            let per_sec = (self.records_read as f64 * 1000.0) / elapsed_ms as f64;
            output.push_str(&format!(" ({:.0} records/s)", per_sec));
        }

        output
    }
}

/// Log the source counters and one line per filter
pub fn log_stats(chain: &Chain, source: &SourceStats) {
    log::info!("{}", source.snapshot().format_stats());
    for (name, stats) in chain.stats() {
        log::info!("  {}: {}", name, stats.format_stats());
    }
}

/// Background thread that calls [`log_stats`] every `interval` until stopped
pub struct StatsReporter {
    stop: Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl StatsReporter {
    pub fn spawn(chain: Arc<Chain>, source: Arc<SourceStats>, interval: Duration) -> Self {
        let (stop, stopped) = bounded::<()>(0);
        let handle = thread::spawn(move || loop {
            match stopped.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => log_stats(&chain, &source),
                _ => break,
            }
        });
        Self { stop, handle }
    }

    pub fn stop(self) {
        drop(self.stop);
        if self.handle.join().is_err() {
            log::error!("stats reporter thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_extra_counters() {
        let counters = Counters::with_extra(&["copies"]);
        counters.add_processed();
        counters.add("copies", 3);
        counters.add("unknown", 10);

        let stats = counters.snapshot();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.discarded, 0);
        assert_eq!(stats.extra("copies"), Some(3));
        assert_eq!(stats.extra("unknown"), None);
        assert_eq!(stats.format_stats(), "1 processed, 0 discarded, 3 copies");
    }

    #[test]
    fn test_counters_from_many_threads() {
        let counters = Arc::new(Counters::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counters = Arc::clone(&counters);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.add_processed();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counters.snapshot().processed, 8000);
    }

    #[test]
    fn test_source_stats_format() {
        let stats = SourceStats::new();
        stats.add_record_read();
        stats.add_decode_error();
        let text = stats.snapshot().format_stats();
        assert!(text.starts_with("Records: 1 read, 0 emitted, 1 decode errors"));
    }

    #[test]
    fn test_reporter_stops_promptly() {
        let schema = crate::record::Schema::new(["a"]).unwrap();
        let chain = Arc::new(Chain::new(schema, Vec::new()));
        let reporter = StatsReporter::spawn(
            chain,
            Arc::new(SourceStats::new()),
            Duration::from_secs(3600),
        );
        let started = Instant::now();
        reporter.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
