use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReblobError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("unsupported feature '{0}' is required")]
    UnsupportedFeature(String),
    #[error("unexpected blob type '{0}'")]
    UnexpectedBlock(String),
    #[error("could not decode message: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("could not encode message: {0}")]
    Encode(#[from] prost::EncodeError),
    #[error("compression error: {0}")]
    CompressionError(String),
    #[error("decompression error: {0}")]
    DecompressionError(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("worker pool is stopped; no new work accepted")]
    PoolStopped,
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ReblobError>,
    },
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ReblobError {
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub(crate) fn format(message: impl Into<String>) -> Self {
        Self::InvalidFormat(message.into())
    }

    /// Returns true when this error, or any error it wraps, is
    /// [`ReblobError::PoolStopped`].
    pub fn is_pool_stopped(&self) -> bool {
        match self {
            Self::PoolStopped => true,
            Self::Context { source, .. } => source.is_pool_stopped(),
            _ => false,
        }
    }
}
