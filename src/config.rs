use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};

/// Port the listener binds when none is given
pub const DEFAULT_PORT: u16 = 6000;
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Main configuration struct for a pipeline run
#[derive(Debug, Clone)]
pub struct RecflowConfig {
    pub pipeline: PipelineFileConfig,
    /// Directory script paths in the pipeline file are relative to
    pub base_dir: PathBuf,
    pub input: InputConfig,
    pub output: OutputConfig,
    pub performance: PerformanceConfig,
    pub stats: StatsConfig,
}

/// Contents of the JSON pipeline file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PipelineFileConfig {
    #[serde(default)]
    pub listen: Option<String>,
    pub schema: Vec<String>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

/// One entry of the `filters` list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub options: Map<String, JsonValue>,
}

/// Where records come from
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    /// TCP listener on `host:port`
    Listen(String),
    Stdin,
    File(PathBuf),
}

/// Input configuration
#[derive(Debug, Clone)]
pub struct InputConfig {
    pub source: InputSource,
}

/// Output configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub file: Option<PathBuf>,
}

/// Performance configuration
#[derive(Debug, Clone)]
pub struct PerformanceConfig {
    pub threads: usize,
    pub channel_capacity: usize,
}

/// Stats reporting configuration
#[derive(Debug, Clone)]
pub struct StatsConfig {
    pub interval: Option<Duration>,
    pub summary: bool,
}

/// Output record encoding
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON array of field values
    #[default]
    Array,
    /// JSON object keyed by schema field name
    Object,
}

impl PipelineFileConfig {
    pub fn parse(text: &str) -> PipelineResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| PipelineError::config(format!("invalid pipeline file: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
        let config = Self::parse(&text)
            .with_context(|| format!("Failed to load pipeline file {}", path.display()))?;
        Ok(config)
    }
}

impl RecflowConfig {
    /// Create configuration from `recflow run` arguments
    pub fn from_cli(args: &crate::cli::RunArgs) -> Result<Self> {
        let pipeline = PipelineFileConfig::load(&args.config)?;
        let base_dir = base_dir_of(&args.config);

        let source = match args.input.as_deref() {
            Some("-") => InputSource::Stdin,
            Some(path) => InputSource::File(PathBuf::from(path)),
            None => {
                let listen = args
                    .listen
                    .clone()
                    .or_else(|| pipeline.listen.clone())
                    .unwrap_or_else(|| format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT));
                InputSource::Listen(normalize_listen(&listen))
            }
        };

        let interval = match args.stats_interval.as_deref() {
            Some(text) => Some(
                humantime::parse_duration(text)
                    .with_context(|| format!("Invalid --stats-interval '{}'", text))?,
            ),
            None => None,
        };

        Ok(Self {
            pipeline,
            base_dir,
            input: InputConfig { source },
            output: OutputConfig {
                format: args.output_format,
                file: args.output.clone(),
            },
            performance: PerformanceConfig {
                threads: args.threads,
                channel_capacity: args.channel_capacity,
            },
            stats: StatsConfig {
                interval,
                summary: !args.no_summary,
            },
        })
    }

    /// Get effective worker count for stdin/file input
    pub fn effective_threads(&self) -> usize {
        if self.performance.threads == 0 {
            num_cpus::get()
        } else {
            self.performance.threads
        }
    }
}

/// Directory containing `path`, or `.` for a bare file name
pub fn base_dir_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Accept `host:port`, `:port`, a bare port or a bare host
pub fn normalize_listen(addr: &str) -> String {
    let addr = addr.trim();
    if let Some(port) = addr.strip_prefix(':') {
        return format!("{}:{}", DEFAULT_HOST, port);
    }
    if addr.parse::<u16>().is_ok() {
        return format!("{}:{}", DEFAULT_HOST, addr);
    }
    // IPv6 literals carry colons of their own, so only brackets count there
    let has_port = if addr.starts_with('[') {
        addr.contains("]:")
    } else {
        addr.contains(':')
    };
    if has_port {
        addr.to_string()
    } else {
        format!("{}:{}", addr, DEFAULT_PORT)
    }
}
