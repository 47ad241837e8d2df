use std::time::Duration;

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, CrimpError>;

#[derive(Debug, Error)]
pub enum CrimpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid format: {0}")]
    InvalidFormat(&'static str),
    #[error("unrecognized magic number {magic:02x?}")]
    UnrecognizedFormat { magic: [u8; 4] },
    #[error("corrupted payload (crc32 expected {expected:#010x}, actual {actual:#010x}, original size {original_size})")]
    Corruption {
        expected: u32,
        actual: u32,
        original_size: u64,
    },
    #[error("no algorithm named {name:?} is registered")]
    AlgorithmNotFound { name: String },
    #[error("plugin registry is empty")]
    EmptyRegistry,
    #[error("invalid scoring weights (throughput {throughput}, ratio {ratio})")]
    InvalidWeights { throughput: f64, ratio: f64 },
    #[error("{operation} deadline of {deadline:?} expired")]
    Timeout {
        operation: &'static str,
        deadline: Duration,
    },
    #[error("operation cancelled")]
    Cancelled,
    #[error("compression error: {0}")]
    CompressionError(String),
    #[error("decompression error: {0}")]
    DecompressionError(String),
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<CrimpError>,
    },
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CrimpError {
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}
