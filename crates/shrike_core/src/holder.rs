//! The holder: the registry of indexes on one node.

use std::sync::Arc;

use dashmap::DashMap;

use crate::fragment::Fragment;
use crate::frame::Frame;
use crate::index::{Index, IndexOptions};

/// Registry of every index this node holds. The executor resolves indexes,
/// frames, and fragments through here and nowhere else.
#[derive(Debug, Default)]
pub struct Holder {
    indexes: DashMap<String, Arc<Index>>,
}

impl Holder {
    pub fn new() -> Self {
        Holder {
            indexes: DashMap::new(),
        }
    }

    pub fn index(&self, name: &str) -> Option<Arc<Index>> {
        self.indexes.get(name).map(|i| i.clone())
    }

    /// Create an index, or return the existing one under that name.
    pub fn create_index(&self, name: &str, options: IndexOptions) -> Arc<Index> {
        self.indexes
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Index::new(name, options)))
            .clone()
    }

    pub fn frame(&self, index: &str, frame: &str) -> Option<Arc<Frame>> {
        self.index(index)?.frame(frame)
    }

    pub fn fragment(
        &self,
        index: &str,
        frame: &str,
        view: &str,
        slice: u64,
    ) -> Option<Arc<Fragment>> {
        self.frame(index, frame)?.fragment(view, slice)
    }
}
