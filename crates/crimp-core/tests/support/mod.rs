#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crimp_core::{
    Algorithm, AlgorithmMetadata, CancellationToken, CrimpError, PluginRegistry,
    RegisteredAlgorithm,
};

pub const BLOCK: usize = 128 * 1024;

pub fn metadata(name: &str, magic: [u8; 4], throughput_mbps: f64, ratio: f64) -> AlgorithmMetadata {
    AlgorithmMetadata::new(name, "1.0.0", magic, throughput_mbps, ratio)
}

pub fn registry_with(plugins: Vec<Arc<dyn Algorithm>>) -> Arc<PluginRegistry> {
    let registry = Arc::new(PluginRegistry::new());
    registry.init(plugins);
    registry
}

pub fn entry(algorithm: Arc<dyn Algorithm>) -> RegisteredAlgorithm {
    RegisteredAlgorithm {
        metadata: algorithm.metadata(),
        algorithm,
    }
}

/// Pass-through codec with caller-chosen metadata.
pub struct StubAlgorithm {
    pub descriptor: AlgorithmMetadata,
}

impl StubAlgorithm {
    pub fn boxed(name: &str, magic: [u8; 4], throughput_mbps: f64, ratio: f64) -> Arc<dyn Algorithm> {
        Arc::new(Self {
            descriptor: metadata(name, magic, throughput_mbps, ratio),
        })
    }
}

impl Algorithm for StubAlgorithm {
    fn metadata(&self) -> AlgorithmMetadata {
        self.descriptor.clone()
    }

    fn compress(&self, input: &[u8], _cancel: &CancellationToken) -> crimp_core::Result<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8], _cancel: &CancellationToken) -> crimp_core::Result<Vec<u8>> {
        Ok(input.to_vec())
    }
}

/// Cooperative but slow codec: sleeps per block and polls the token between
/// blocks, like a well-behaved plugin under heavy load.
pub struct SlowAlgorithm {
    pub descriptor: AlgorithmMetadata,
    pub delay_per_block: Duration,
}

impl SlowAlgorithm {
    pub fn boxed(name: &str, magic: [u8; 4], delay_per_block: Duration) -> Arc<dyn Algorithm> {
        Arc::new(Self {
            descriptor: metadata(name, magic, 100.0, 0.9),
            delay_per_block,
        })
    }

    fn crawl(&self, input: &[u8], cancel: &CancellationToken) -> crimp_core::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len());
        for chunk in input.chunks(BLOCK) {
            if cancel.is_cancelled() {
                return Err(CrimpError::Cancelled);
            }
            thread::sleep(self.delay_per_block);
            out.extend_from_slice(chunk);
        }
        Ok(out)
    }
}

impl Algorithm for SlowAlgorithm {
    fn metadata(&self) -> AlgorithmMetadata {
        self.descriptor.clone()
    }

    fn compress(&self, input: &[u8], cancel: &CancellationToken) -> crimp_core::Result<Vec<u8>> {
        self.crawl(input, cancel)
    }

    fn decompress(&self, input: &[u8], cancel: &CancellationToken) -> crimp_core::Result<Vec<u8>> {
        self.crawl(input, cancel)
    }
}

/// Worst-case plugin: never looks at the token and blocks for `hang` before
/// answering.
pub struct HangingAlgorithm {
    pub descriptor: AlgorithmMetadata,
    pub hang: Duration,
}

impl HangingAlgorithm {
    pub fn boxed(name: &str, magic: [u8; 4], hang: Duration) -> Arc<dyn Algorithm> {
        Arc::new(Self {
            descriptor: metadata(name, magic, 50.0, 0.8),
            hang,
        })
    }
}

impl Algorithm for HangingAlgorithm {
    fn metadata(&self) -> AlgorithmMetadata {
        self.descriptor.clone()
    }

    fn compress(&self, input: &[u8], _cancel: &CancellationToken) -> crimp_core::Result<Vec<u8>> {
        thread::sleep(self.hang);
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8], _cancel: &CancellationToken) -> crimp_core::Result<Vec<u8>> {
        thread::sleep(self.hang);
        Ok(input.to_vec())
    }
}

/// Panics while compressing; decompression works.
pub struct PanicOnCompress {
    pub descriptor: AlgorithmMetadata,
}

impl PanicOnCompress {
    pub fn boxed(name: &str, magic: [u8; 4]) -> Arc<dyn Algorithm> {
        Arc::new(Self {
            descriptor: metadata(name, magic, 200.0, 0.7),
        })
    }
}

impl Algorithm for PanicOnCompress {
    fn metadata(&self) -> AlgorithmMetadata {
        self.descriptor.clone()
    }

    fn compress(&self, _input: &[u8], _cancel: &CancellationToken) -> crimp_core::Result<Vec<u8>> {
        panic!("compressor exploded");
    }

    fn decompress(&self, input: &[u8], _cancel: &CancellationToken) -> crimp_core::Result<Vec<u8>> {
        Ok(input.to_vec())
    }
}

/// Compresses as a pass-through; panics while decompressing.
pub struct PanicOnDecompress {
    pub descriptor: AlgorithmMetadata,
}

impl PanicOnDecompress {
    pub fn boxed(name: &str, magic: [u8; 4]) -> Arc<dyn Algorithm> {
        Arc::new(Self {
            descriptor: metadata(name, magic, 200.0, 0.7),
        })
    }
}

impl Algorithm for PanicOnDecompress {
    fn metadata(&self) -> AlgorithmMetadata {
        self.descriptor.clone()
    }

    fn compress(&self, input: &[u8], _cancel: &CancellationToken) -> crimp_core::Result<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decompress(&self, _input: &[u8], _cancel: &CancellationToken) -> crimp_core::Result<Vec<u8>> {
        panic!("decoder exploded");
    }
}

/// Fails cleanly with a typed error in both directions.
pub struct FailingAlgorithm {
    pub descriptor: AlgorithmMetadata,
}

impl FailingAlgorithm {
    pub fn boxed(name: &str, magic: [u8; 4]) -> Arc<dyn Algorithm> {
        Arc::new(Self {
            descriptor: metadata(name, magic, 200.0, 0.7),
        })
    }
}

impl Algorithm for FailingAlgorithm {
    fn metadata(&self) -> AlgorithmMetadata {
        self.descriptor.clone()
    }

    fn compress(&self, _input: &[u8], _cancel: &CancellationToken) -> crimp_core::Result<Vec<u8>> {
        Err(CrimpError::CompressionError("synthetic failure".to_string()))
    }

    fn decompress(&self, _input: &[u8], _cancel: &CancellationToken) -> crimp_core::Result<Vec<u8>> {
        Err(CrimpError::DecompressionError(
            "synthetic failure".to_string(),
        ))
    }
}
