//! Per-`(index, frame, view, slice)` storage: row reads, bit mutations,
//! and the per-slice top-N scan.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use shrike_common::{AttrValue, ShrikeError, ShrikeResult, SLICE_WIDTH};

use crate::attr_store::AttrStore;
use crate::bitmap::Bitmap;
use crate::pairs::{self, Pair};

/// Options for a per-slice top-N scan.
#[derive(Debug, Clone, Default)]
pub struct TopOptions {
    /// Number of pairs to keep. 0 keeps every qualifying row.
    pub n: usize,
    /// When set, rows are counted by their intersection with this bitmap.
    pub src: Option<Bitmap>,
    /// Explicit candidate rows. When non-empty the scan returns exact counts
    /// for exactly these rows, untruncated.
    pub row_ids: Vec<u64>,
    /// Restrict candidates to rows whose attribute `filter_field` matches one
    /// of `filter_values` (or is merely present, when no values are given).
    pub filter_field: Option<String>,
    pub filter_values: Vec<AttrValue>,
    /// Rows counting below this are dropped.
    pub min_threshold: u64,
    /// Tanimoto similarity floor in percent (1..=100) against `src`.
    /// 0 disables the filter.
    pub tanimoto_threshold: u64,
}

/// The storage unit for one `(index, frame, view, slice)`. Row bitmaps hold
/// absolute column positions; mutations serialize on the row-map lock.
#[derive(Debug)]
pub struct Fragment {
    index: String,
    frame: String,
    view: String,
    slice: u64,
    rows: RwLock<BTreeMap<u64, Bitmap>>,
    row_attrs: Arc<AttrStore>,
}

impl Fragment {
    pub fn new(
        index: &str,
        frame: &str,
        view: &str,
        slice: u64,
        row_attrs: Arc<AttrStore>,
    ) -> Self {
        Fragment {
            index: index.to_string(),
            frame: frame.to_string(),
            view: view.to_string(),
            slice,
            rows: RwLock::new(BTreeMap::new()),
            row_attrs,
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn frame(&self) -> &str {
        &self.frame
    }

    pub fn view(&self) -> &str {
        &self.view
    }

    pub fn slice(&self) -> u64 {
        self.slice
    }

    /// The row bitmap for `id`. Absent rows read as empty.
    pub fn row(&self, id: u64) -> Bitmap {
        self.rows.read().get(&id).cloned().unwrap_or_default()
    }

    /// Set one bit. Returns true iff the bit was previously unset.
    pub fn set_bit(&self, row: u64, col: u64) -> ShrikeResult<bool> {
        self.check_column(col)?;
        let mut rows = self.rows.write();
        Ok(rows.entry(row).or_default().set_bit(col))
    }

    /// Clear one bit. Returns true iff the bit was previously set.
    pub fn clear_bit(&self, row: u64, col: u64) -> ShrikeResult<bool> {
        self.check_column(col)?;
        let mut rows = self.rows.write();
        let Some(bm) = rows.get_mut(&row) else {
            return Ok(false);
        };
        let changed = bm.clear_bit(col);
        if bm.count() == 0 {
            rows.remove(&row);
        }
        Ok(changed)
    }

    /// Per-slice top-N: rank candidate rows by count, descending, ties broken
    /// by ascending row ID.
    pub fn top(&self, opt: &TopOptions) -> ShrikeResult<Vec<Pair>> {
        if opt.tanimoto_threshold > 0 && opt.src.is_none() {
            return Err(ShrikeError::Internal(
                "tanimoto threshold requires a source bitmap".to_string(),
            ));
        }

        let rows = self.rows.read();
        let mut results = Vec::new();

        let candidates: Vec<u64> = if opt.row_ids.is_empty() {
            rows.keys().copied().collect()
        } else {
            opt.row_ids.clone()
        };

        for id in candidates {
            let Some(bm) = rows.get(&id) else {
                continue;
            };

            if let Some(field) = &opt.filter_field {
                let attrs = self.row_attrs.attrs(id)?;
                let Some(value) = attrs.get(field) else {
                    continue;
                };
                if !opt.filter_values.is_empty() && !opt.filter_values.contains(value) {
                    continue;
                }
            }

            let count = match &opt.src {
                Some(src) => {
                    let shared = src.intersection_count(bm);
                    if opt.tanimoto_threshold > 0 {
                        let total = src.count() + bm.count() - shared;
                        if total == 0 || shared * 100 / total < opt.tanimoto_threshold {
                            continue;
                        }
                    }
                    shared
                }
                None => bm.count(),
            };

            if count == 0 || count < opt.min_threshold {
                continue;
            }
            results.push(Pair { id, count });
        }

        pairs::sort(&mut results);
        // Explicit candidates want exact counts back, not a truncated ranking.
        if opt.n > 0 && opt.row_ids.is_empty() {
            results.truncate(opt.n);
        }
        Ok(results)
    }

    fn check_column(&self, col: u64) -> ShrikeResult<()> {
        if col / SLICE_WIDTH != self.slice {
            return Err(ShrikeError::Internal(format!(
                "column {} outside slice {} of {}/{}/{}",
                col, self.slice, self.index, self.frame, self.view
            )));
        }
        Ok(())
    }
}
