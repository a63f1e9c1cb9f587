use thiserror::Error;

/// Errors raised while building or running a filter chain.
///
/// `OutOfRange`, `UnknownField`, `Script` and `Sink` are per-record: they end
/// the current traversal and are handed back to whoever called the chain.
/// `Config` only appears while the chain is being built and stops startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("field index {index} out of range (record has {len} fields)")]
    OutOfRange { index: usize, len: usize },

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("script error in stage '{stage}': {message}")]
    Script { stage: String, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("sink error: {0}")]
    Sink(String),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Config(message.into())
    }

    pub fn script(stage: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Script {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
