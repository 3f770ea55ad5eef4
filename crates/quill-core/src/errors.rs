/// Failures at the completion-endpoint boundary.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    // Needs reconfiguration, never retried
    #[error("completion endpoint not configured: {0}")]
    Configuration(String),

    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("unexpected response shape: {0}")]
    ResponseShape(String),

    // Only ever logged by the stream decoder
    #[error("malformed stream chunk: {0}")]
    ChunkParse(String),
}

impl CompletionError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Transport(_) => "transport",
            Self::Upstream { .. } => "upstream",
            Self::ResponseShape(_) => "response_shape",
            Self::ChunkParse(_) => "chunk_parse",
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}
