pub mod deflate;
pub mod framing;
pub mod lz4;
pub mod registry;
pub mod select;
pub mod store;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{CancellationToken, Result};

/// Name of the algorithm used when a timed-out or crashed worker needs a
/// fallback. It must never fail and cannot meaningfully hang.
pub const DEFAULT_ALGORITHM: &str = "store";

/// A compression algorithm the engine can select and run.
///
/// Implementations are registered once and shared across threads, so they
/// must be stateless or internally synchronized. Both codec directions
/// receive the operation's [`CancellationToken`] and are expected to poll it
/// at block boundaries, returning
/// [`CrimpError::Cancelled`](crate::CrimpError::Cancelled) once it trips.
/// An in-flight block is always finished or discarded whole.
pub trait Algorithm: Send + Sync {
    /// Static descriptor used for registration and selection. Must be pure
    /// and cheap; the registry caches it at registration time.
    fn metadata(&self) -> AlgorithmMetadata;

    /// Compresses `input` in full, honoring `cancel` between blocks.
    fn compress(&self, input: &[u8], cancel: &CancellationToken) -> Result<Vec<u8>>;

    /// Reverses [`compress`](Self::compress), honoring `cancel` between
    /// blocks.
    fn decompress(&self, input: &[u8], cancel: &CancellationToken) -> Result<Vec<u8>>;

    /// Heuristic check whether this algorithm suits `sample`. Purely
    /// advisory; the default claims nothing.
    fn detect(&self, _sample: &[u8]) -> bool {
        false
    }
}

/// Descriptor a plugin supplies at registration time.
///
/// `throughput_mbps` and `ratio` are the declared performance
/// characteristics that drive weighted selection; `ratio` is the fraction of
/// the input size the output typically retains (smaller is better).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmMetadata {
    pub name: String,
    pub version: String,
    pub magic: [u8; 4],
    pub throughput_mbps: f64,
    pub ratio: f64,
}

impl AlgorithmMetadata {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        magic: [u8; 4],
        throughput_mbps: f64,
        ratio: f64,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            magic,
            throughput_mbps,
            ratio,
        }
    }

    /// Checks the registration requirements: a non-empty name, a non-zero
    /// magic, a positive finite throughput, and a ratio within `[0, 1]`.
    pub fn validate(&self) -> std::result::Result<(), &'static str> {
        if self.name.is_empty() {
            return Err("empty name");
        }
        if self.magic == [0u8; 4] {
            return Err("zero magic number");
        }
        if !self.throughput_mbps.is_finite() || self.throughput_mbps <= 0.0 {
            return Err("throughput must be positive and finite");
        }
        if !self.ratio.is_finite() || !(0.0..=1.0).contains(&self.ratio) {
            return Err("ratio must lie within [0, 1]");
        }
        Ok(())
    }
}

/// A registered algorithm together with the metadata captured at
/// registration.
#[derive(Clone)]
pub struct RegisteredAlgorithm {
    pub metadata: AlgorithmMetadata,
    pub algorithm: Arc<dyn Algorithm>,
}

/// The algorithms compiled into this crate, in registration order.
pub fn builtin_plugins() -> Vec<Arc<dyn Algorithm>> {
    vec![
        Arc::new(store::StoreAlgorithm),
        Arc::new(lz4::Lz4Algorithm),
        Arc::new(deflate::DeflateAlgorithm),
    ]
}
