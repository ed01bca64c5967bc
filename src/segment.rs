//! A bounded, append-only container of vectors plus its tombstone set.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::data::Vector;

/// Entries (live + tombstoned) a segment holds before it is sealed.
pub const MAX_SEGMENT_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("segment {id} is full")]
    Full { id: u64 },
}

/// The unit of on-disk persistence. Sealed once full; deletes stay possible
/// on sealed segments via tombstones.
#[derive(Debug)]
pub struct Segment {
    id: u64,
    vectors: HashMap<String, Vector>,
    // Live ids kept separately: deletions tombstone instead of rewriting the
    // vectors map.
    ids: HashSet<String>,
    tombstones: HashSet<String>,
    dirty: bool,
}

impl Segment {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            vectors: HashMap::new(),
            ids: HashSet::new(),
            tombstones: HashSet::new(),
            dirty: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn insert(&mut self, vector: Vector) -> Result<(), SegmentError> {
        if self.is_full() {
            return Err(SegmentError::Full { id: self.id });
        }
        self.dirty = true;
        self.ids.insert(vector.id.clone());
        self.vectors.insert(vector.id.clone(), vector);
        Ok(())
    }

    pub fn delete(&mut self, id: &str) {
        self.tombstones.insert(id.to_owned());
        self.ids.remove(id);
        self.dirty = true;
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// The live vector under `id`, or `None` when absent or tombstoned.
    pub fn get_vector(&self, id: &str) -> Option<&Vector> {
        if !self.contains_id(id) {
            return None;
        }
        self.vectors.get(id)
    }

    /// Live vectors only.
    pub fn vectors(&self) -> impl Iterator<Item = &Vector> {
        self.vectors
            .values()
            .filter(|vector| !self.tombstones.contains(&vector.id))
    }

    pub fn tombstones(&self) -> impl Iterator<Item = &str> {
        self.tombstones.iter().map(String::as_str)
    }

    /// Live entry count.
    pub fn size(&self) -> usize {
        self.ids.len()
    }

    pub fn is_full(&self) -> bool {
        self.vectors.len() >= MAX_SEGMENT_SIZE
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }
}
