use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::cancel::{OperationState, OperationStateCell};
use crate::header::{FileHeader, HEADER_SIZE};
use crate::io::InputPayload;
use crate::plugin::registry::{self, PluginRegistry};
use crate::plugin::select::{self, ScoringWeights};
use crate::plugin::{RegisteredAlgorithm, DEFAULT_ALGORITHM};
use crate::supervisor::{self, Direction, DEFAULT_TIMEOUT};
use crate::tracker::ResourceTracker;
use crate::{CancellationToken, CrimpError, Result};

/// Settings for one compression operation.
#[derive(Debug, Clone)]
pub struct CompressOptions {
    /// Skip scoring and use this algorithm. `None` selects by weights.
    pub algorithm: Option<String>,
    pub weights: ScoringWeights,
    /// Deadline for a single worker attempt.
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            algorithm: None,
            weights: ScoringWeights::default(),
            timeout: DEFAULT_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }
}

/// Settings for one decompression operation. The algorithm is always taken
/// from the stream header.
#[derive(Debug, Clone)]
pub struct DecompressOptions {
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl Default for DecompressOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompressStats {
    pub algorithm: String,
    pub original_size: u64,
    /// Total bytes written, header included.
    pub compressed_size: u64,
    /// `compressed_size / original_size`; 1.0 for empty input.
    pub ratio: f64,
    pub elapsed: Duration,
    /// Whether the fallback algorithm produced the output.
    pub fell_back: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecompressStats {
    pub algorithm: String,
    pub original_size: u64,
    pub output_size: u64,
    pub elapsed: Duration,
    /// CRC32 of the restored data, already verified against the header.
    pub crc32: u32,
}

/// Parsed header of a compressed stream, resolved against the registry.
#[derive(Debug, Clone, Serialize)]
pub struct HeaderInfo {
    pub magic: [u8; 4],
    /// Registered name for the magic, `None` when no plugin claims it.
    pub algorithm: Option<String>,
    pub version: u8,
    pub flags: u32,
    pub original_size: u64,
    pub crc32: u32,
}

/// Compression orchestrator.
///
/// Every operation selects an algorithm, runs it on a supervised worker
/// thread under a deadline, verifies integrity, and guarantees that a
/// cancelled or failed file operation leaves nothing behind on disk.
///
/// # Example
///
/// ```
/// use std::io::Cursor;
/// use crimp_core::{init_plugins, CompressOptions, DecompressOptions, Engine};
///
/// init_plugins()?;
/// let engine = Engine::new();
///
/// let mut compressed = Vec::new();
/// engine.compress(
///     Cursor::new(b"hello hello hello".to_vec()),
///     &mut compressed,
///     &CompressOptions::default(),
/// )?;
///
/// let mut restored = Vec::new();
/// engine.decompress(
///     Cursor::new(compressed),
///     &mut restored,
///     &DecompressOptions::default(),
/// )?;
/// assert_eq!(restored, b"hello hello hello");
/// # Ok::<(), crimp_core::CrimpError>(())
/// ```
pub struct Engine {
    registry: Arc<PluginRegistry>,
}

impl Engine {
    /// Engine backed by the global registry; call
    /// [`init_plugins`](crate::init_plugins) first.
    pub fn new() -> Self {
        Self {
            registry: registry::global(),
        }
    }

    /// Engine backed by a caller-owned registry.
    pub fn with_registry(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    /// Compresses everything from `reader` into `writer`.
    ///
    /// The output is the fixed header followed by the selected algorithm's
    /// payload. Nothing is written until the payload has been fully
    /// produced, so a cancellation or failure leaves the writer untouched.
    ///
    /// # Errors
    ///
    /// Selection errors ([`CrimpError::EmptyRegistry`],
    /// [`CrimpError::AlgorithmNotFound`], [`CrimpError::InvalidWeights`]),
    /// [`CrimpError::Cancelled`], [`CrimpError::Timeout`] once the fallback
    /// is exhausted, and I/O failures from the streams.
    pub fn compress<R: Read, W: Write>(
        &self,
        mut reader: R,
        mut writer: W,
        options: &CompressOptions,
    ) -> Result<CompressStats> {
        let state = OperationStateCell::new();
        let result = (|| {
            checkpoint(&state, &options.cancel)?;
            let payload = InputPayload::from_reader(&mut reader)?;
            self.compress_payload(payload, &mut writer, options, &state)
        })();
        finish_op(&state, result)
    }

    /// Restores the original data from a compressed stream, verifying its
    /// CRC32 before anything reaches `writer`.
    ///
    /// # Errors
    ///
    /// [`CrimpError::UnrecognizedFormat`] when no registered algorithm
    /// claims the header magic, [`CrimpError::Corruption`] when the restored
    /// data does not match the recorded checksum, plus the cancellation,
    /// timeout, and I/O failures compression can produce.
    pub fn decompress<R: Read, W: Write>(
        &self,
        mut reader: R,
        mut writer: W,
        options: &DecompressOptions,
    ) -> Result<DecompressStats> {
        let state = OperationStateCell::new();
        let result = (|| {
            checkpoint(&state, &options.cancel)?;
            let payload = InputPayload::from_reader(&mut reader)?;
            self.decompress_payload(payload, &mut writer, options, &state)
        })();
        finish_op(&state, result)
    }

    /// Reads just the header of a compressed stream.
    pub fn inspect<R: Read>(&self, mut reader: R) -> Result<HeaderInfo> {
        let header = FileHeader::read(&mut reader)?;
        let algorithm = self
            .registry
            .lookup(header.magic)
            .map(|entry| entry.metadata.name);
        Ok(HeaderInfo {
            magic: header.magic,
            algorithm,
            version: header.version(),
            flags: header.flags,
            original_size: header.original_size,
            crc32: header.crc32,
        })
    }

    /// Compresses `input` into `output`, memory-mapping large inputs.
    ///
    /// The output file is tracked by a [`ResourceTracker`]: on any failure
    /// or cancellation it is closed and deleted, never left partial.
    pub fn compress_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        options: &CompressOptions,
    ) -> Result<CompressStats> {
        let input = input.as_ref();
        let output = output.as_ref();
        let state = OperationStateCell::new();
        let tracker = ResourceTracker::new();
        tracker.register_output(output);

        let result = (|| {
            checkpoint(&state, &options.cancel)?;
            let payload = InputPayload::from_path(input)
                .map_err(|error| error.with_context(format!("reading {}", input.display())))?;
            let file = File::create(output)
                .map_err(CrimpError::Io)
                .map_err(|error| error.with_context(format!("creating {}", output.display())))?;
            let mut writer = BufWriter::new(file);
            let stats = self.compress_payload(payload, &mut writer, options, &state)?;
            let file = writer
                .into_inner()
                .map_err(|error| CrimpError::Io(error.into_error()))?;
            tracker.track_handle(file);
            Ok(stats)
        })();

        match result {
            Ok(stats) => {
                tracker.mark_complete();
                finish_op(&state, Ok(stats))
            }
            Err(error) => {
                tracker.cleanup_all();
                finish_op(&state, Err(error))
            }
        }
    }

    /// Decompresses `input` into `output` with the same cleanup guarantees
    /// as [`compress_file`](Self::compress_file). Permissions and the
    /// modification time of the input are restored onto the output on a
    /// best-effort basis.
    pub fn decompress_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        options: &DecompressOptions,
    ) -> Result<DecompressStats> {
        let input = input.as_ref();
        let output = output.as_ref();
        let state = OperationStateCell::new();
        let tracker = ResourceTracker::new();
        tracker.register_output(output);

        let input_meta = fs::metadata(input).ok();
        let result = (|| {
            checkpoint(&state, &options.cancel)?;
            let payload = InputPayload::from_path(input)
                .map_err(|error| error.with_context(format!("reading {}", input.display())))?;
            let file = File::create(output)
                .map_err(CrimpError::Io)
                .map_err(|error| error.with_context(format!("creating {}", output.display())))?;
            let mut writer = BufWriter::new(file);
            let stats = self.decompress_payload(payload, &mut writer, options, &state)?;
            let file = writer
                .into_inner()
                .map_err(|error| CrimpError::Io(error.into_error()))?;
            if let Some(meta) = &input_meta {
                restore_file_metadata(&file, meta, output);
            }
            tracker.track_handle(file);
            Ok(stats)
        })();

        match result {
            Ok(stats) => {
                tracker.mark_complete();
                finish_op(&state, Ok(stats))
            }
            Err(error) => {
                tracker.cleanup_all();
                finish_op(&state, Err(error))
            }
        }
    }

    fn compress_payload<W: Write>(
        &self,
        payload: InputPayload,
        writer: &mut W,
        options: &CompressOptions,
        state: &OperationStateCell,
    ) -> Result<CompressStats> {
        let started = Instant::now();
        let selected = select::select(&self.registry, options.algorithm.as_deref(), options.weights)?;
        let fallback = self.fallback_for(&selected);

        let original_size = payload.len() as u64;
        let checksum = crc32fast::hash(payload.as_slice());

        let outcome = supervisor::run_supervised(
            selected,
            fallback,
            payload,
            Direction::Compress,
            &options.cancel,
            options.timeout,
        )?;
        checkpoint(state, &options.cancel)?;

        let header = FileHeader::new(outcome.metadata.magic, original_size, checksum);
        header.write(writer)?;
        writer.write_all(&outcome.bytes)?;
        writer.flush()?;

        let compressed_size = (HEADER_SIZE + outcome.bytes.len()) as u64;
        Ok(CompressStats {
            algorithm: outcome.metadata.name,
            original_size,
            compressed_size,
            ratio: if original_size == 0 {
                1.0
            } else {
                compressed_size as f64 / original_size as f64
            },
            elapsed: started.elapsed(),
            fell_back: outcome.fell_back,
        })
    }

    fn decompress_payload<W: Write>(
        &self,
        payload: InputPayload,
        writer: &mut W,
        options: &DecompressOptions,
        state: &OperationStateCell,
    ) -> Result<DecompressStats> {
        let started = Instant::now();
        let data = payload.as_slice();
        if data.len() < HEADER_SIZE {
            return Err(CrimpError::InvalidFormat("input shorter than file header"));
        }
        let header = FileHeader::read(&mut &data[..HEADER_SIZE])?;
        let entry = self
            .registry
            .lookup(header.magic)
            .ok_or(CrimpError::UnrecognizedFormat {
                magic: header.magic,
            })?;
        let algorithm = entry.metadata.name.clone();
        let body = payload.slice(HEADER_SIZE..payload.len());

        // No fallback here: a different algorithm cannot decode this payload
        // and rerunning the same one adds nothing.
        let outcome = supervisor::run_supervised(
            entry,
            None,
            body,
            Direction::Decompress,
            &options.cancel,
            options.timeout,
        )?;
        checkpoint(state, &options.cancel)?;

        let actual = crc32fast::hash(&outcome.bytes);
        if outcome.bytes.len() as u64 != header.original_size || actual != header.crc32 {
            return Err(CrimpError::Corruption {
                expected: header.crc32,
                actual,
                original_size: header.original_size,
            });
        }

        writer.write_all(&outcome.bytes)?;
        writer.flush()?;

        Ok(DecompressStats {
            algorithm,
            original_size: header.original_size,
            output_size: outcome.bytes.len() as u64,
            elapsed: started.elapsed(),
            crc32: actual,
        })
    }

    /// Fallback entry for a supervised run: the default algorithm, unless
    /// the selection already is the default.
    fn fallback_for(&self, selected: &RegisteredAlgorithm) -> Option<RegisteredAlgorithm> {
        let default = self.registry.find_by_name(DEFAULT_ALGORITHM)?;
        if default.metadata.magic == selected.metadata.magic {
            return None;
        }
        Some(default)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Bails out with `Cancelled` between phases once the token has tripped.
fn checkpoint(state: &OperationStateCell, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        state.try_transition(OperationState::Running, OperationState::Cancelling);
        return Err(CrimpError::Cancelled);
    }
    Ok(())
}

/// Settles the operation state once cleanup has run: `Completed` on success,
/// `Cancelled` when the operation was cancelled. Other failures leave the
/// cell as-is.
fn finish_op<T>(state: &OperationStateCell, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => {
            state.try_transition(OperationState::Running, OperationState::Completed);
        }
        Err(CrimpError::Cancelled) => {
            state.try_transition(OperationState::Running, OperationState::Cancelling);
            state.try_transition(OperationState::Cancelling, OperationState::Cancelled);
        }
        Err(_) => {}
    }
    result
}

fn restore_file_metadata(file: &File, meta: &fs::Metadata, output: &Path) {
    if let Err(error) = file.set_permissions(meta.permissions()) {
        tracing::debug!(path = %output.display(), %error, "failed to restore permissions");
    }
    match meta.modified() {
        Ok(mtime) => {
            if let Err(error) = file.set_modified(mtime) {
                tracing::debug!(path = %output.display(), %error, "failed to restore modification time");
            }
        }
        Err(error) => {
            tracing::debug!(%error, "source modification time unavailable");
        }
    }
}
