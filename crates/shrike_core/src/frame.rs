//! A frame: a named row namespace with optional inverse storage and an
//! optional time quantum.

use std::sync::Arc;

use chrono::NaiveDateTime;
use dashmap::DashMap;

use shrike_common::{ShrikeResult, DEFAULT_ROW_LABEL, SLICE_WIDTH};

use crate::attr_store::AttrStore;
use crate::fragment::Fragment;
use crate::view::{views_by_time, TimeQuantum, VIEW_INVERSE};

/// Creation-time options for a frame.
#[derive(Debug, Clone, Default)]
pub struct FrameOptions {
    pub row_label: Option<String>,
    pub inverse_enabled: bool,
    pub time_quantum: Option<TimeQuantum>,
}

/// A named row namespace within an index. Owns its fragments, keyed by
/// `(view, slice)`, and the row attribute store shared with them.
#[derive(Debug)]
pub struct Frame {
    index: String,
    name: String,
    row_label: String,
    inverse_enabled: bool,
    time_quantum: Option<TimeQuantum>,
    row_attr_store: Arc<AttrStore>,
    fragments: DashMap<(String, u64), Arc<Fragment>>,
}

impl Frame {
    pub fn new(index: &str, name: &str, options: FrameOptions) -> Self {
        Frame {
            index: index.to_string(),
            name: name.to_string(),
            row_label: options
                .row_label
                .unwrap_or_else(|| DEFAULT_ROW_LABEL.to_string()),
            inverse_enabled: options.inverse_enabled,
            time_quantum: options.time_quantum,
            row_attr_store: Arc::new(AttrStore::new()),
            fragments: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_label(&self) -> &str {
        &self.row_label
    }

    pub fn inverse_enabled(&self) -> bool {
        self.inverse_enabled
    }

    pub fn time_quantum(&self) -> Option<&TimeQuantum> {
        self.time_quantum.as_ref()
    }

    pub fn row_attr_store(&self) -> &Arc<AttrStore> {
        &self.row_attr_store
    }

    pub fn fragment(&self, view: &str, slice: u64) -> Option<Arc<Fragment>> {
        self.fragments
            .get(&(view.to_string(), slice))
            .map(|f| f.clone())
    }

    fn fragment_or_create(&self, view: &str, slice: u64) -> Arc<Fragment> {
        self.fragments
            .entry((view.to_string(), slice))
            .or_insert_with(|| {
                Arc::new(Fragment::new(
                    &self.index,
                    &self.name,
                    view,
                    slice,
                    self.row_attr_store.clone(),
                ))
            })
            .clone()
    }

    /// Set a bit in `view`. A timestamped write also lands in one derived
    /// time view per quantum unit. Returns true iff any view changed.
    pub fn set_bit(
        &self,
        view: &str,
        row: u64,
        col: u64,
        timestamp: Option<NaiveDateTime>,
    ) -> ShrikeResult<bool> {
        let slice = col / SLICE_WIDTH;
        let mut changed = self.fragment_or_create(view, slice).set_bit(row, col)?;

        if let (Some(t), Some(q)) = (timestamp, self.time_quantum.as_ref()) {
            for time_view in views_by_time(view, t, q) {
                if self.fragment_or_create(&time_view, slice).set_bit(row, col)? {
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    /// Clear a bit in `view`. Returns true iff the bit was set.
    pub fn clear_bit(&self, view: &str, row: u64, col: u64) -> ShrikeResult<bool> {
        let slice = col / SLICE_WIDTH;
        match self.fragment(view, slice) {
            Some(frag) => frag.clear_bit(row, col),
            None => Ok(false),
        }
    }

    /// Highest slice holding data in the standard orientation (time views
    /// included).
    pub fn max_slice(&self) -> u64 {
        self.max_slice_where(|view| !view.starts_with(VIEW_INVERSE))
    }

    /// Highest slice holding data in the inverse orientation.
    pub fn max_inverse_slice(&self) -> u64 {
        self.max_slice_where(|view| view.starts_with(VIEW_INVERSE))
    }

    fn max_slice_where(&self, pred: impl Fn(&str) -> bool) -> u64 {
        self.fragments
            .iter()
            .filter(|entry| pred(&entry.key().0))
            .map(|entry| entry.key().1)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use shrike_common::TIME_FORMAT;

    use crate::view::VIEW_STANDARD;

    #[test]
    fn test_set_bit_creates_fragment() {
        let frame = Frame::new("i", "f", FrameOptions::default());
        assert!(frame.set_bit(VIEW_STANDARD, 1, 5, None).unwrap());
        assert!(!frame.set_bit(VIEW_STANDARD, 1, 5, None).unwrap());
        assert_eq!(
            frame.fragment(VIEW_STANDARD, 0).unwrap().row(1).bits(),
            vec![5]
        );
        assert!(frame.fragment(VIEW_INVERSE, 0).is_none());
    }

    #[test]
    fn test_timestamped_write_populates_time_views() {
        let frame = Frame::new(
            "i",
            "f",
            FrameOptions {
                time_quantum: TimeQuantum::new("YMD"),
                ..Default::default()
            },
        );
        let t = NaiveDateTime::parse_from_str("2017-01-02T00:00", TIME_FORMAT).unwrap();
        assert!(frame.set_bit(VIEW_STANDARD, 9, 3, Some(t)).unwrap());

        for view in ["standard", "standard_2017", "standard_201701", "standard_20170102"] {
            assert!(
                frame.fragment(view, 0).unwrap().row(9).contains(3),
                "missing bit in view {view}"
            );
        }
    }

    #[test]
    fn test_max_slice_tracks_orientations_separately() {
        let frame = Frame::new("i", "f", FrameOptions::default());
        frame.set_bit(VIEW_STANDARD, 1, 2 * SLICE_WIDTH + 1, None).unwrap();
        frame.set_bit(VIEW_INVERSE, 1, 5, None).unwrap();

        assert_eq!(frame.max_slice(), 2);
        assert_eq!(frame.max_inverse_slice(), 0);
    }

    #[test]
    fn test_clear_bit_missing_fragment_is_noop() {
        let frame = Frame::new("i", "f", FrameOptions::default());
        assert!(!frame.clear_bit(VIEW_STANDARD, 1, 5).unwrap());
    }
}
