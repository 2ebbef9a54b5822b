//! An index: a named collection of frames sharing a column ID space.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use shrike_common::DEFAULT_COLUMN_LABEL;

use crate::attr_store::AttrStore;
use crate::frame::{Frame, FrameOptions};

/// Creation-time options for an index.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub column_label: Option<String>,
}

/// A named collection of frames. Owns the column attribute store shared by
/// every frame's column space.
#[derive(Debug)]
pub struct Index {
    name: String,
    column_label: String,
    column_attr_store: Arc<AttrStore>,
    frames: DashMap<String, Arc<Frame>>,
    // Highest slices reported by peers. Membership keeps these current so a
    // coordinator enumerates slices it holds no fragment for.
    remote_max_slice: AtomicU64,
    remote_max_inverse_slice: AtomicU64,
}

impl Index {
    pub fn new(name: &str, options: IndexOptions) -> Self {
        Index {
            name: name.to_string(),
            column_label: options
                .column_label
                .unwrap_or_else(|| DEFAULT_COLUMN_LABEL.to_string()),
            column_attr_store: Arc::new(AttrStore::new()),
            frames: DashMap::new(),
            remote_max_slice: AtomicU64::new(0),
            remote_max_inverse_slice: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_label(&self) -> &str {
        &self.column_label
    }

    pub fn column_attr_store(&self) -> &Arc<AttrStore> {
        &self.column_attr_store
    }

    pub fn frame(&self, name: &str) -> Option<Arc<Frame>> {
        self.frames.get(name).map(|f| f.clone())
    }

    /// Create a frame, or return the existing one under that name.
    pub fn create_frame(&self, name: &str, options: FrameOptions) -> Arc<Frame> {
        self.frames
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Frame::new(&self.name, name, options)))
            .clone()
    }

    /// Highest standard-orientation slice, local fragments and peer reports
    /// combined.
    pub fn max_slice(&self) -> u64 {
        self.frames
            .iter()
            .map(|entry| entry.value().max_slice())
            .max()
            .unwrap_or(0)
            .max(self.remote_max_slice.load(Ordering::Relaxed))
    }

    /// Highest inverse-orientation slice, local fragments and peer reports
    /// combined.
    pub fn max_inverse_slice(&self) -> u64 {
        self.frames
            .iter()
            .map(|entry| entry.value().max_inverse_slice())
            .max()
            .unwrap_or(0)
            .max(self.remote_max_inverse_slice.load(Ordering::Relaxed))
    }

    /// Record the highest slices a peer reported holding.
    pub fn set_remote_max_slice(&self, standard: u64, inverse: u64) {
        self.remote_max_slice.fetch_max(standard, Ordering::Relaxed);
        self.remote_max_inverse_slice
            .fetch_max(inverse, Ordering::Relaxed);
    }
}
