use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use recflow::check::run_check;
use recflow::cli::{CheckArgs, Cli, Command, RunArgs};
use recflow::config::{base_dir_of, InputSource, PipelineFileConfig, RecflowConfig};
use recflow::error::PipelineError;
use recflow::pipeline::{Chain, PipelineBuilder, Sink, FILTER_KINDS};
use recflow::sink::Writer;
use recflow::source::{self, SourceContext};
use recflow::stats::{log_stats, SourceStats, StatsReporter};
use recflow::unix::{signal_exit_code, ExitCode, SignalHandler, SHOULD_TERMINATE};

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let code = match &cli.command {
        Command::Run(args) => run(args),
        Command::Check(args) => check(args),
        Command::Filters => list_filters(),
    };
    code.exit()
}

/// Diagnostics go to stderr; stdout carries records
fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .init();
}

/// Startup failures caused by bad configuration exit with a usage code
fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    let is_config = err
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<PipelineError>(), Some(PipelineError::Config(_))));
    if is_config {
        ExitCode::InvalidUsage
    } else {
        ExitCode::GeneralError
    }
}

/// Script paths in the pipeline resolve against `base_dir`
fn build_chain(config_path: &Path, pipeline: &PipelineFileConfig, base_dir: &Path) -> Result<Chain> {
    let builder = PipelineBuilder::from_config(pipeline, base_dir)?;
    let chain = builder
        .build()
        .with_context(|| format!("Invalid pipeline {}", config_path.display()))?;
    log::debug!("pipeline stages: {}", chain.stage_names().join(" -> "));
    Ok(chain)
}

fn run(args: &RunArgs) -> ExitCode {
    let config = match RecflowConfig::from_cli(args) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{:#}", e);
            return exit_code_for(&e);
        }
    };
    let chain = match build_chain(&args.config, &config.pipeline, &config.base_dir) {
        Ok(chain) => Arc::new(chain),
        Err(e) => {
            log::error!("{:#}", e);
            return exit_code_for(&e);
        }
    };

    let _signal_handler = match SignalHandler::new() {
        Ok(handler) => handler,
        Err(e) => {
            log::error!("Failed to initialize signal handling: {}", e);
            return ExitCode::GeneralError;
        }
    };

    match run_pipeline(&config, chain) {
        Ok(()) => signal_exit_code().unwrap_or(ExitCode::Success),
        Err(e) => {
            log::error!("{:#}", e);
            signal_exit_code().unwrap_or(ExitCode::GeneralError)
        }
    }
}

fn run_pipeline(config: &RecflowConfig, chain: Arc<Chain>) -> Result<()> {
    let writer = Writer::spawn(
        config.output.file.as_deref(),
        config.output.format,
        config.performance.channel_capacity,
    )?;
    let stats = Arc::new(SourceStats::new());
    let reporter = config
        .stats
        .interval
        .map(|interval| StatsReporter::spawn(Arc::clone(&chain), Arc::clone(&stats), interval));

    let sink: Arc<dyn Sink> = Arc::new(writer.sink());
    let ctx = SourceContext::new(Arc::clone(&chain), sink, Arc::clone(&stats));

    let result = match &config.input.source {
        InputSource::Listen(addr) => source::listen(addr, ctx, &SHOULD_TERMINATE),
        InputSource::Stdin => source::open_input(None).and_then(|reader| {
            source::run_batch(
                reader,
                "stdin",
                config.effective_threads(),
                config.performance.channel_capacity,
                ctx,
                &SHOULD_TERMINATE,
            )
        }),
        InputSource::File(path) => source::open_input(Some(path.as_path())).and_then(|reader| {
            source::run_batch(
                reader,
                &path.display().to_string(),
                config.effective_threads(),
                config.performance.channel_capacity,
                ctx,
                &SHOULD_TERMINATE,
            )
        }),
    };

    if let Some(reporter) = reporter {
        reporter.stop();
    }
    let written = writer.finish();

    if config.stats.summary {
        log_stats(&chain, &stats);
    }
    let written = written?;
    log::debug!("{} records written", written);
    result
}

fn check(args: &CheckArgs) -> ExitCode {
    let result = PipelineFileConfig::load(&args.config)
        .and_then(|pipeline| build_chain(&args.config, &pipeline, &base_dir_of(&args.config)))
        .and_then(|chain| {
            let input = source::open_input(Some(Path::new(&args.input)))?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            let summary = run_check(&chain, input, args.output_format, &mut out)?;
            out.flush()?;
            Ok(summary)
        });

    match result {
        Ok(summary) if summary.passed() => ExitCode::Success,
        Ok(_) => ExitCode::GeneralError,
        Err(e) => {
            log::error!("{:#}", e);
            exit_code_for(&e)
        }
    }
}

fn list_filters() -> ExitCode {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let result = (|| -> io::Result<()> {
        for kind in FILTER_KINDS {
            writeln!(out, "{:<10} {}", kind.name, kind.help)?;
            for spec in (kind.options)() {
                writeln!(out, "    {}", spec.describe())?;
            }
        }
        out.flush()
    })();

    match result {
        Ok(()) => ExitCode::Success,
        Err(e) if recflow::unix::is_broken_pipe(&e) => ExitCode::SignalPipe,
        Err(e) => {
            log::error!("Failed to write filter list: {}", e);
            ExitCode::GeneralError
        }
    }
}
