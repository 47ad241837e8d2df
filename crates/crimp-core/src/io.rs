use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use memmap2::{Mmap, MmapOptions};

use crate::Result;

/// Files at or above this size are memory-mapped instead of read into a
/// buffer.
pub const MMAP_THRESHOLD: u64 = 64 * 1024;

/// Input bytes for one operation, either owned or a view into a mapped file.
///
/// Both variants clone cheaply (`Bytes` is reference-counted, mapped views
/// share one `Arc<Mmap>`), so a payload can be handed to a worker thread
/// while the caller keeps its own handle.
#[derive(Debug, Clone)]
pub enum InputPayload {
    Owned(Bytes),
    Mapped {
        map: Arc<Mmap>,
        start: usize,
        end: usize,
    },
}

impl InputPayload {
    /// Drains a reader into an owned payload.
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        Ok(Self::Owned(Bytes::from(buffer)))
    }

    /// Loads a file, memory-mapping it once it crosses [`MMAP_THRESHOLD`].
    /// Empty files yield an empty owned payload since they cannot be mapped.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(Self::Owned(Bytes::new()));
        }
        if len >= MMAP_THRESHOLD {
            let map = unsafe { MmapOptions::new().map(&file)? };
            return Ok(Self::Mapped {
                map: Arc::new(map),
                start: 0,
                end: len as usize,
            });
        }
        let mut buffer = Vec::with_capacity(len as usize);
        file.take(len).read_to_end(&mut buffer)?;
        Ok(Self::Owned(Bytes::from(buffer)))
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Owned(bytes) => bytes.len(),
            Self::Mapped { start, end, .. } => end - start,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Owned(bytes) => bytes,
            Self::Mapped { map, start, end } => &map[*start..*end],
        }
    }

    /// Sub-view of this payload without copying. The range is relative to
    /// this payload and must lie within it.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Self {
        debug_assert!(range.start <= range.end && range.end <= self.len());
        match self {
            Self::Owned(bytes) => Self::Owned(bytes.slice(range)),
            Self::Mapped { map, start, .. } => Self::Mapped {
                map: Arc::clone(map),
                start: start + range.start,
                end: start + range.end,
            },
        }
    }
}
