pub mod cancel;
pub mod engine;
pub mod error;
pub mod header;
pub mod io;
pub mod plugin;
pub mod supervisor;
pub mod tracker;

pub use cancel::{CancellationToken, OperationState, OperationStateCell};
pub use engine::{
    CompressOptions, CompressStats, DecompressOptions, DecompressStats, Engine, HeaderInfo,
};
pub use error::{CrimpError, Result};
pub use header::{FileHeader, FILE_EXTENSION, FORMAT_VERSION, HEADER_SIZE};
pub use io::InputPayload;
pub use plugin::registry::{init_plugins, list_plugins, PluginRegistry};
pub use plugin::select::ScoringWeights;
pub use plugin::{Algorithm, AlgorithmMetadata, RegisteredAlgorithm, DEFAULT_ALGORITHM};
pub use supervisor::DEFAULT_TIMEOUT;
pub use tracker::ResourceTracker;
