// Command-line interface definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "recflow")]
#[command(about = "A record-processing pipeline with embedded Rhai filter stages")]
#[command(
    long_about = "A record-processing pipeline with embedded Rhai filter stages\n\nRecords are JSON lines: an array maps fields by position, an object maps them by\nschema name. Each record flows through the configured filters in order; any filter\nmay change it, drop it, duplicate it or create new records.\n\nCOMMON EXAMPLES:\n  recflow run --config pipeline.json                 Listen on 0.0.0.0:6000\n  recflow run --config pipeline.json --input -       Read records from stdin\n  recflow check --config pipeline.json --input samples.jsonl\n  recflow filters                                    List filter types and options"
)]
#[command(author = "The recflow developers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// More log output (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short = 'q', long = "quiet", global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a pipeline over a TCP listener, stdin or a file
    Run(RunArgs),
    /// Run sample records through a pipeline and report script validation results
    Check(CheckArgs),
    /// List the available filter types and their options
    Filters,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Pipeline file (JSON: listen, schema, filters)
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,

    /// Listen address, overrides the pipeline file (host:port, :port or port)
    #[arg(long = "listen", conflicts_with = "input")]
    pub listen: Option<String>,

    /// Read records from FILE instead of listening ("-" for stdin)
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    pub input: Option<String>,

    /// Worker threads for --input (0 = one per CPU)
    #[arg(short = 't', long = "threads", default_value_t = 1)]
    pub threads: usize,

    /// Bounded queue size between reader, workers and writer
    #[arg(long = "channel-capacity", default_value_t = 1024, hide = true)]
    pub channel_capacity: usize,

    /// Write records to FILE instead of stdout
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output record encoding
    #[arg(long = "output-format", value_enum, default_value = "array")]
    pub output_format: OutputFormat,

    /// Log per-filter stats at this interval (e.g. 30s, 5m)
    #[arg(long = "stats-interval", value_name = "DURATION")]
    pub stats_interval: Option<String>,

    /// Skip the stats summary logged on exit
    #[arg(long = "no-summary")]
    pub no_summary: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Pipeline file (JSON: listen, schema, filters)
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,

    /// Sample records, one JSON line each ("-" for stdin)
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    pub input: String,

    /// Encoding of the emitted records shown in the report
    #[arg(long = "output-format", value_enum, default_value = "array")]
    pub output_format: OutputFormat,
}

impl Cli {
    /// Log filter used when RUST_LOG is not set
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["recflow", "run", "--config", "p.json"]).unwrap();
        let Command::Run(args) = &cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.threads, 1);
        assert_eq!(args.output_format, OutputFormat::Array);
        assert!(args.input.is_none());
        assert_eq!(cli.log_level(), "info");
    }

    #[test]
    fn test_verbosity() {
        let cli = Cli::try_parse_from(["recflow", "-vv", "filters"]).unwrap();
        assert_eq!(cli.log_level(), "trace");
        let cli = Cli::try_parse_from(["recflow", "filters", "-q"]).unwrap();
        assert_eq!(cli.log_level(), "warn");
    }

    #[test]
    fn test_listen_conflicts_with_input() {
        let result = Cli::try_parse_from([
            "recflow", "run", "-c", "p.json", "--listen", ":7000", "--input", "-",
        ]);
        assert!(result.is_err());
    }
}
