//! Concurrency-safe attribute storage for rows and columns.

use std::collections::HashMap;

use parking_lot::RwLock;

use shrike_common::{Attrs, ShrikeResult};

/// Attribute sets keyed by row or column ID. Writes merge per key; a write
/// never removes keys it does not mention.
#[derive(Debug, Default)]
pub struct AttrStore {
    attrs: RwLock<HashMap<u64, Attrs>>,
}

impl AttrStore {
    pub fn new() -> Self {
        AttrStore {
            attrs: RwLock::new(HashMap::new()),
        }
    }

    /// Attributes for one ID. Absent IDs read as an empty set.
    pub fn attrs(&self, id: u64) -> ShrikeResult<Attrs> {
        Ok(self.attrs.read().get(&id).cloned().unwrap_or_default())
    }

    /// Merge `attrs` into the set stored for `id`.
    pub fn set_attrs(&self, id: u64, attrs: Attrs) -> ShrikeResult<()> {
        let mut guard = self.attrs.write();
        guard.entry(id).or_default().extend(attrs);
        Ok(())
    }

    /// Merge many attribute sets under one lock acquisition.
    pub fn set_bulk_attrs(
        &self,
        bulk: impl IntoIterator<Item = (u64, Attrs)>,
    ) -> ShrikeResult<()> {
        let mut guard = self.attrs.write();
        for (id, attrs) in bulk {
            guard.entry(id).or_default().extend(attrs);
        }
        Ok(())
    }
}
