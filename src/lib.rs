// Core library for the recflow record pipeline

pub mod check;
pub mod cli;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod rhai_functions;
pub mod sink;
pub mod source;
pub mod stats;
pub mod unix;

pub use config::{OutputFormat, PipelineFileConfig, RecflowConfig};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{Chain, CollectSink, Filter, Next, PipelineBuilder, Sink, Validation};
pub use record::{Record, Schema, Value};
pub use stats::FilterStats;
