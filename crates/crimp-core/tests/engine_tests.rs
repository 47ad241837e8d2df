mod support;

use std::fs;
use std::io::Cursor;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crimp_core::plugin::builtin_plugins;
use crimp_core::plugin::lz4::LZ4_MAGIC;
use crimp_core::plugin::store::StoreAlgorithm;
use crimp_core::{
    CompressOptions, CrimpError, DecompressOptions, Engine, FileHeader, FORMAT_VERSION,
    HEADER_SIZE,
};
use support::{registry_with, HangingAlgorithm, PanicOnDecompress};

fn builtin_engine() -> Engine {
    Engine::with_registry(registry_with(builtin_plugins()))
}

fn compress_with(engine: &Engine, input: &[u8], options: &CompressOptions) -> Vec<u8> {
    let mut compressed = Vec::new();
    engine
        .compress(Cursor::new(input.to_vec()), &mut compressed, options)
        .expect("compression should succeed");
    compressed
}

fn decompress_all(engine: &Engine, compressed: &[u8]) -> Vec<u8> {
    let mut restored = Vec::new();
    engine
        .decompress(
            Cursor::new(compressed.to_vec()),
            &mut restored,
            &DecompressOptions::default(),
        )
        .expect("decompression should succeed");
    restored
}

fn sample_input(len: usize) -> Vec<u8> {
    b"the quick brown fox jumps over the lazy dog. "
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

#[test]
fn every_builtin_round_trips() {
    let engine = builtin_engine();
    // Long enough to span multiple segments.
    let input = sample_input(300 * 1024);

    for name in ["store", "lz4", "deflate"] {
        let options = CompressOptions {
            algorithm: Some(name.to_string()),
            ..CompressOptions::default()
        };
        let mut compressed = Vec::new();
        let stats = engine
            .compress(Cursor::new(input.clone()), &mut compressed, &options)
            .expect("compression should succeed");

        assert_eq!(stats.algorithm, name);
        assert_eq!(stats.original_size, input.len() as u64);
        assert_eq!(stats.compressed_size, compressed.len() as u64);
        assert!(!stats.fell_back);

        let restored = decompress_all(&engine, &compressed);
        assert_eq!(restored, input, "{name} round trip diverged");
    }
}

#[test]
fn empty_input_is_a_bare_header() {
    let engine = builtin_engine();
    let mut compressed = Vec::new();
    let stats = engine
        .compress(
            Cursor::new(Vec::new()),
            &mut compressed,
            &CompressOptions::default(),
        )
        .expect("compression should succeed");

    assert_eq!(compressed.len(), HEADER_SIZE);
    assert_eq!(stats.original_size, 0);
    assert_eq!(stats.ratio, 1.0);

    let restored = decompress_all(&engine, &compressed);
    assert!(restored.is_empty());
}

#[test]
fn default_weights_select_lz4() {
    let engine = builtin_engine();
    let input = sample_input(64 * 1024);

    let mut compressed = Vec::new();
    let stats = engine
        .compress(
            Cursor::new(input.clone()),
            &mut compressed,
            &CompressOptions::default(),
        )
        .expect("compression should succeed");

    assert_eq!(stats.algorithm, "lz4");
    assert_eq!(decompress_all(&engine, &compressed), input);
}

#[test]
fn inspect_reports_the_header() {
    let engine = builtin_engine();
    let input = sample_input(4096);
    let options = CompressOptions {
        algorithm: Some("lz4".to_string()),
        ..CompressOptions::default()
    };
    let compressed = compress_with(&engine, &input, &options);

    let info = engine
        .inspect(Cursor::new(compressed))
        .expect("inspect should succeed");
    assert_eq!(info.magic, LZ4_MAGIC);
    assert_eq!(info.algorithm.as_deref(), Some("lz4"));
    assert_eq!(info.version, FORMAT_VERSION);
    assert_eq!(info.original_size, input.len() as u64);
}

#[test]
fn unrecognized_magic_is_rejected() {
    let engine = builtin_engine();

    let mut stream = Vec::new();
    FileHeader::new(*b"ZZZZ", 4, 0)
        .write(&mut stream)
        .expect("header write should succeed");
    stream.extend_from_slice(b"junk");

    let mut sink = Vec::new();
    let result = engine.decompress(Cursor::new(stream), &mut sink, &DecompressOptions::default());
    match result {
        Err(CrimpError::UnrecognizedFormat { magic }) => assert_eq!(&magic, b"ZZZZ"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn corrupted_payload_is_detected() {
    let engine = builtin_engine();
    let input = sample_input(4096);
    let options = CompressOptions {
        algorithm: Some("store".to_string()),
        ..CompressOptions::default()
    };
    let mut compressed = compress_with(&engine, &input, &options);

    // Flip one data byte past the header and the first segment prefix. The
    // stored framing still parses, so only the checksum can catch it.
    let target = HEADER_SIZE + 8 + 3;
    compressed[target] ^= 0xff;

    let mut sink = Vec::new();
    let result = engine.decompress(
        Cursor::new(compressed),
        &mut sink,
        &DecompressOptions::default(),
    );
    match result {
        Err(CrimpError::Corruption {
            expected,
            actual,
            original_size,
        }) => {
            assert_ne!(expected, actual);
            assert_eq!(original_size, input.len() as u64);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn truncated_stream_is_invalid() {
    let engine = builtin_engine();
    let mut sink = Vec::new();
    let result = engine.decompress(
        Cursor::new(vec![0u8; HEADER_SIZE - 1]),
        &mut sink,
        &DecompressOptions::default(),
    );
    match result {
        Err(CrimpError::InvalidFormat(message)) => {
            assert!(message.contains("shorter"), "message: {message}")
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn files_round_trip_through_disk() -> Result<(), Box<dyn std::error::Error>> {
    let engine = builtin_engine();
    let dir = tempfile::tempdir()?;
    let input_path = dir.path().join("report.txt");
    let compressed_path = dir.path().join("report.txt.crz");
    let restored_path = dir.path().join("restored.txt");

    // Above the mmap threshold, so the mapped path gets exercised too.
    let input = sample_input(256 * 1024);
    fs::write(&input_path, &input)?;

    let stats = engine.compress_file(&input_path, &compressed_path, &CompressOptions::default())?;
    assert_eq!(stats.original_size, input.len() as u64);
    assert_eq!(
        fs::metadata(&compressed_path)?.len(),
        stats.compressed_size
    );

    let restored_stats = engine.decompress_file(
        &compressed_path,
        &restored_path,
        &DecompressOptions::default(),
    )?;
    assert_eq!(restored_stats.output_size, input.len() as u64);
    assert_eq!(fs::read(&restored_path)?, input);
    Ok(())
}

#[test]
fn decompressed_file_inherits_archive_metadata() -> Result<(), Box<dyn std::error::Error>> {
    let engine = builtin_engine();
    let dir = tempfile::tempdir()?;
    let input_path = dir.path().join("notes.txt");
    let compressed_path = dir.path().join("notes.txt.crz");
    let restored_path = dir.path().join("restored.txt");

    fs::write(&input_path, sample_input(8192))?;
    engine.compress_file(&input_path, &compressed_path, &CompressOptions::default())?;

    // Stamp the archive with a distinctive mode and past mtime so the
    // restored file provably inherited them rather than defaulting to now.
    let past = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000);
    #[cfg(unix)]
    fs::set_permissions(&compressed_path, fs::Permissions::from_mode(0o600))?;
    fs::OpenOptions::new()
        .write(true)
        .open(&compressed_path)?
        .set_modified(past)?;

    engine.decompress_file(
        &compressed_path,
        &restored_path,
        &DecompressOptions::default(),
    )?;

    let archive_mtime = fs::metadata(&compressed_path)?.modified()?;
    assert_eq!(archive_mtime, past, "stamp did not take");
    let restored_meta = fs::metadata(&restored_path)?;
    assert_eq!(restored_meta.modified()?, archive_mtime);
    #[cfg(unix)]
    assert_eq!(restored_meta.permissions().mode() & 0o777, 0o600);
    Ok(())
}

#[test]
fn unknown_override_fails_before_any_output() {
    let engine = builtin_engine();
    let options = CompressOptions {
        algorithm: Some("nope".to_string()),
        ..CompressOptions::default()
    };

    let mut compressed = Vec::new();
    let result = engine.compress(Cursor::new(sample_input(64)), &mut compressed, &options);
    match result {
        Err(CrimpError::AlgorithmNotFound { name }) => assert_eq!(name, "nope"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(compressed.is_empty());
}

#[test]
fn empty_registry_rejects_operations() {
    let engine = Engine::with_registry(registry_with(Vec::new()));
    let mut compressed = Vec::new();
    let result = engine.compress(
        Cursor::new(sample_input(64)),
        &mut compressed,
        &CompressOptions::default(),
    );
    assert!(matches!(result, Err(CrimpError::EmptyRegistry)));
}

#[test]
fn timed_out_worker_falls_back_to_store() {
    let engine = Engine::with_registry(registry_with(vec![
        HangingAlgorithm::boxed("slowpoke", *b"SLOW", Duration::from_secs(3)),
        Arc::new(StoreAlgorithm),
    ]));
    let input = sample_input(4096);
    let options = CompressOptions {
        algorithm: Some("slowpoke".to_string()),
        timeout: Duration::from_millis(100),
        ..CompressOptions::default()
    };

    let mut compressed = Vec::new();
    let stats = engine
        .compress(Cursor::new(input.clone()), &mut compressed, &options)
        .expect("fallback should succeed");

    assert!(stats.fell_back);
    assert_eq!(stats.algorithm, "store");
    assert_eq!(decompress_all(&engine, &compressed), input);
}

#[test]
fn hanging_default_algorithm_gets_no_retry() {
    let engine = Engine::with_registry(registry_with(vec![HangingAlgorithm::boxed(
        "store",
        *b"HNGS",
        Duration::from_secs(3),
    )]));
    let options = CompressOptions {
        timeout: Duration::from_millis(100),
        ..CompressOptions::default()
    };

    let started = Instant::now();
    let mut compressed = Vec::new();
    let result = engine.compress(Cursor::new(sample_input(64)), &mut compressed, &options);
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(CrimpError::Timeout { .. })));
    assert!(compressed.is_empty());
    // One deadline, not two: the failing algorithm already is the fallback.
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
}

#[test]
fn decoder_panic_surfaces_as_decompression_error() {
    let engine = Engine::with_registry(registry_with(vec![PanicOnDecompress::boxed(
        "mined", *b"MINE",
    )]));
    let input = sample_input(4096);
    let options = CompressOptions {
        algorithm: Some("mined".to_string()),
        ..CompressOptions::default()
    };
    let compressed = compress_with(&engine, &input, &options);

    let mut sink = Vec::new();
    let result = engine.decompress(
        Cursor::new(compressed),
        &mut sink,
        &DecompressOptions::default(),
    );
    match result {
        Err(CrimpError::DecompressionError(message)) => {
            assert!(message.contains("panicked"), "message: {message}");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(sink.is_empty());
}
