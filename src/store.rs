//! Segment store: the ordered list of sealed segments plus one open segment.
//!
//! Owns the on-disk layout `segments/segment_<id>/{vectors,tombstones}`:
//! `vectors` is a sequence of `i32`-length-prefixed codec records, and
//! `tombstones` is a newline-delimited id list. Loading a segment replays its
//! vector file (insert) and then its tombstone file (delete), reconstructing
//! the exact live/tombstone state.
//!
//! The store is single-writer: the engine serializes all mutation, and the
//! background saver only ever gets in through a try-lock.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::codec::{self, CodecError};
use crate::data::Vector;
use crate::segment::{Segment, SegmentError};
use crate::wal::{WalError, WriteAheadLogger};

pub const SEGMENTS_DIR: &str = "segments";
pub const SEGMENT_DIR_PREFIX: &str = "segment_";
pub const VECTORS_FILE: &str = "vectors";
pub const TOMBSTONES_FILE: &str = "tombstones";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("segment store is not initialized; call load_from_disk first")]
    NotInitialized,

    #[error("segment {0} does not exist")]
    UnknownSegment(u64),

    #[error(transparent)]
    Segment(#[from] SegmentError),

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub struct SegmentStore {
    wal: Arc<WriteAheadLogger>,
    segments_dir: PathBuf,
    segments: Vec<Segment>,
    current: Segment,
    initialized: bool,
}

impl SegmentStore {
    /// Create a store rooted at `segments_dir`.
    ///
    /// The open segment resumes id allocation from the WAL's highest logged
    /// segment id, so ids are never reused across restarts. The new segment's
    /// marker is logged immediately.
    pub fn new(wal: Arc<WriteAheadLogger>, segments_dir: PathBuf) -> Result<Self, StoreError> {
        let next_id = wal
            .latest_segment_id_including_unclosed()?
            .map(|id| id + 1)
            .unwrap_or(0);
        let current = Segment::new(next_id);
        wal.new_segment(next_id)?;

        Ok(Self {
            wal,
            segments_dir,
            segments: Vec::new(),
            current,
            initialized: false,
        })
    }

    /// Sealed segments in id order, then the open segment.
    pub fn segments(&self) -> Vec<&Segment> {
        self.segments
            .iter()
            .chain(std::iter::once(&self.current))
            .collect()
    }

    pub fn get_total_vector_count(&self) -> Result<usize, StoreError> {
        self.check_initialized()?;
        Ok(self.segments.iter().map(Segment::size).sum::<usize>() + self.current.size())
    }

    /// All live vectors: sealed segments in id order, then the open segment.
    pub fn get_all_vectors(&self) -> Result<Vec<Vector>, StoreError> {
        Ok(self.stream_all_vectors()?.cloned().collect())
    }

    /// Iterate live vectors without materializing the full list.
    pub fn stream_all_vectors(
        &self,
    ) -> Result<impl Iterator<Item = &Vector> + '_, StoreError> {
        self.check_initialized()?;
        Ok(self
            .segments
            .iter()
            .chain(std::iter::once(&self.current))
            .flat_map(|segment| segment.vectors()))
    }

    pub fn insert_vector(&mut self, vector: Vector) -> Result<(), StoreError> {
        self.check_initialized()?;
        if self.current.is_full() {
            let new_id = self.current.id() + 1;
            let sealed = std::mem::replace(&mut self.current, Segment::new(new_id));
            self.segments.push(sealed);
            // The marker must be logged before any vector lands in the new
            // segment.
            self.wal.new_segment(new_id)?;
            tracing::debug!(segment = new_id, "sealed full segment, opened a new one");
        }
        self.current.insert(vector)?;
        Ok(())
    }

    /// Replay path: route a vector into the segment it originally belonged
    /// to.
    pub fn insert_vector_in_segment(
        &mut self,
        vector: Vector,
        segment_id: u64,
    ) -> Result<(), StoreError> {
        self.check_initialized()?;
        if segment_id == self.current.id() {
            return self.insert_vector(vector);
        }
        let segment = self
            .segments
            .iter_mut()
            .find(|segment| segment.id() == segment_id)
            .ok_or(StoreError::UnknownSegment(segment_id))?;
        segment.insert(vector)?;
        Ok(())
    }

    /// Replay path: materialize a logged segment marker. `from_wal` markers
    /// are not re-logged.
    pub fn create_segment_if_not_exists(
        &mut self,
        segment_id: u64,
        from_wal: bool,
    ) -> Result<(), StoreError> {
        self.check_initialized()?;
        let exists = self.current.id() == segment_id
            || self.segments.iter().any(|segment| segment.id() == segment_id);
        if exists {
            return Ok(());
        }
        self.segments.push(Segment::new(segment_id));
        self.segments.sort_by_key(Segment::id);
        if !from_wal {
            self.wal.new_segment(segment_id)?;
        }
        Ok(())
    }

    /// Tombstone `id` in whichever segment holds it. No-op when the id is
    /// unknown or already tombstoned.
    pub fn delete_vector(&mut self, id: &str) -> Result<(), StoreError> {
        self.check_initialized()?;
        for segment in &mut self.segments {
            if segment.contains_id(id) {
                segment.delete(id);
                return Ok(());
            }
        }
        if self.current.contains_id(id) {
            self.current.delete(id);
        }
        Ok(())
    }

    pub fn get_vector_by_id(&self, id: &str) -> Result<Option<Vector>, StoreError> {
        self.check_initialized()?;
        for segment in self.segments.iter().chain(std::iter::once(&self.current)) {
            if segment.contains_id(id) {
                return Ok(segment.get_vector(id).cloned());
            }
        }
        Ok(None)
    }

    /// Persist one segment under `segments/segment_<id>/`.
    pub fn save_segment_to_disk(&self, segment: &Segment) -> Result<(), StoreError> {
        save_segment_files(&self.segments_dir, segment)
    }

    /// Persist every dirty segment, mark it clean, and advance the WAL
    /// checkpoint past it. Returns the number of segments saved.
    pub fn save_dirty_segments(&mut self) -> Result<usize, StoreError> {
        let segments_dir = self.segments_dir.clone();
        let wal = Arc::clone(&self.wal);
        let mut saved = 0;
        for segment in self
            .segments
            .iter_mut()
            .chain(std::iter::once(&mut self.current))
        {
            if !segment.is_dirty() {
                continue;
            }
            save_segment_files(&segments_dir, segment)?;
            segment.set_dirty(false);
            wal.mark_last_checkpoint(segment.id())?;
            saved += 1;
        }
        if saved > 0 {
            tracing::debug!(saved, "persisted dirty segments");
        }
        Ok(saved)
    }

    /// Reconstruct every on-disk segment and mark the store initialized.
    /// Directories with unparsable names are skipped.
    pub fn load_from_disk(&mut self) -> Result<(), StoreError> {
        if self.segments_dir.is_dir() {
            for entry in fs::read_dir(&self.segments_dir)? {
                let path = entry?.path();
                if !path.is_dir() {
                    continue;
                }
                let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                    continue;
                };
                let Some(segment_id) = name
                    .strip_prefix(SEGMENT_DIR_PREFIX)
                    .and_then(|suffix| suffix.parse::<u64>().ok())
                else {
                    tracing::warn!(directory = %name, "skipping unrecognized segment directory");
                    continue;
                };
                tracing::debug!(segment = segment_id, "loading segment from disk");
                self.segments.push(load_segment(segment_id, &path)?);
            }
            self.segments.sort_by_key(Segment::id);
        }
        self.initialized = true;
        tracing::info!(
            segments = self.segments.len(),
            current = self.current.id(),
            "segment store initialized"
        );
        Ok(())
    }

    /// Full reset: drop all in-memory state and delete the on-disk segment
    /// tree. The store is uninitialized afterwards.
    pub fn close(&mut self) -> Result<(), StoreError> {
        self.segments.clear();
        self.current = Segment::new(0);
        self.initialized = false;
        if self.segments_dir.exists() {
            fs::remove_dir_all(&self.segments_dir)?;
        }
        Ok(())
    }

    fn check_initialized(&self) -> Result<(), StoreError> {
        if !self.initialized {
            return Err(StoreError::NotInitialized);
        }
        Ok(())
    }
}

fn save_segment_files(segments_dir: &Path, segment: &Segment) -> Result<(), StoreError> {
    let dir = segments_dir.join(format!("{SEGMENT_DIR_PREFIX}{}", segment.id()));
    fs::create_dir_all(&dir)?;

    let mut vectors = BufWriter::new(File::create(dir.join(VECTORS_FILE))?);
    for vector in segment.vectors() {
        let bytes = codec::encode_vector(vector)?;
        vectors.write_i32::<BigEndian>(bytes.len() as i32)?;
        vectors.write_all(&bytes)?;
    }
    vectors.flush()?;

    let mut tombstones = BufWriter::new(File::create(dir.join(TOMBSTONES_FILE))?);
    for id in segment.tombstones() {
        writeln!(tombstones, "{id}")?;
    }
    tombstones.flush()?;
    Ok(())
}

fn load_segment(segment_id: u64, dir: &Path) -> Result<Segment, StoreError> {
    let mut segment = Segment::new(segment_id);

    let vectors_path = dir.join(VECTORS_FILE);
    if vectors_path.exists() {
        let mut reader = BufReader::new(File::open(&vectors_path)?);
        loop {
            let len = match reader.read_i32::<BigEndian>() {
                Ok(len) => len,
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            };
            if len < 0 {
                tracing::warn!(segment = segment_id, "negative record length, stopping load");
                break;
            }
            let mut record = vec![0u8; len as usize];
            if reader.read_exact(&mut record).is_err() {
                tracing::warn!(segment = segment_id, "torn trailing vector record, stopping load");
                break;
            }
            match codec::decode_vector(&record) {
                Ok(vector) => segment.insert(vector)?,
                Err(err) => {
                    tracing::warn!(segment = segment_id, error = %err, "skipping undecodable vector record");
                }
            }
        }
    }

    let tombstones_path = dir.join(TOMBSTONES_FILE);
    if tombstones_path.exists() {
        let reader = BufReader::new(File::open(&tombstones_path)?);
        for line in reader.lines() {
            let id = line?;
            if !id.is_empty() {
                segment.delete(&id);
            }
        }
    }

    Ok(segment)
}
