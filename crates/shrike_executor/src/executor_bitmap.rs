//! Per-slice bitmap algebra and the scalar count reduction.

use std::sync::Arc;

use chrono::NaiveDateTime;

use shrike_common::{QueryError, ShrikeError, ShrikeResult, DEFAULT_FRAME, TIME_FORMAT};
use shrike_core::{view, Bitmap, VIEW_INVERSE, VIEW_STANDARD};
use shrike_pql::Call;

use crate::executor::{ExecOptions, Executor};
use crate::map_reduce::{MapFn, SumReducer, UnionReducer};

impl Executor {
    /// Execute a call that reduces to a bitmap: per-slice evaluation, union
    /// across slices, and (for `Bitmap` only) attribute attachment at the
    /// coordinator. Intermediate per-slice results stay attribute-free.
    pub(crate) async fn execute_bitmap_call(
        &self,
        index: &str,
        call: &Call,
        slices: &[u64],
        opt: &ExecOptions,
    ) -> ShrikeResult<Bitmap> {
        let map_fn: MapFn<Bitmap> = {
            let executor = self.clone();
            let index = index.to_string();
            let call = call.clone();
            Arc::new(move |slice| executor.execute_bitmap_call_slice(&index, &call, slice))
        };

        let mut bm = self
            .map_reduce(index, slices, call, opt, map_fn, UnionReducer)
            .await?;

        // Column label given: column attributes. Row label given: row
        // attributes from the named frame. Lookup failures surface.
        if call.name == "Bitmap" {
            if let Some(idx) = self.holder().index(index) {
                let column_label = idx.column_label().to_string();
                match call.uint_arg(&column_label) {
                    Err(reason) => {
                        return Err(QueryError::InvalidField {
                            call: "Bitmap",
                            field: column_label,
                            reason,
                        }
                        .into())
                    }
                    Ok(Some(column_id)) => {
                        bm.set_attrs(idx.column_attr_store().attrs(column_id)?);
                    }
                    Ok(None) => {
                        let frame_name = call.str_arg("frame").unwrap_or(DEFAULT_FRAME);
                        if let Some(frame) = idx.frame(frame_name) {
                            let row_label = frame.row_label().to_string();
                            match call.uint_arg(&row_label) {
                                Err(reason) => {
                                    return Err(QueryError::InvalidField {
                                        call: "Bitmap",
                                        field: row_label,
                                        reason,
                                    }
                                    .into())
                                }
                                Ok(Some(row_id)) => {
                                    bm.set_attrs(frame.row_attr_store().attrs(row_id)?);
                                }
                                Ok(None) => {}
                            }
                        }
                    }
                }
            }
        }

        Ok(bm)
    }

    /// Evaluate a bitmap-producing call for a single slice.
    pub(crate) fn execute_bitmap_call_slice(
        &self,
        index: &str,
        call: &Call,
        slice: u64,
    ) -> ShrikeResult<Bitmap> {
        match call.name.as_str() {
            "Bitmap" => self.execute_bitmap_slice(index, call, slice),
            "Difference" => self.execute_difference_slice(index, call, slice),
            "Intersect" => self.execute_intersect_slice(index, call, slice),
            "Range" => self.execute_range_slice(index, call, slice),
            "Union" => self.execute_union_slice(index, call, slice),
            other => Err(QueryError::UnknownCall(other.to_string()).into()),
        }
    }

    /// `Bitmap(frame, row|col)`: a single row (standard view) or column
    /// (inverse view) lookup. Exactly one of the two labels must be given.
    fn execute_bitmap_slice(&self, index: &str, call: &Call, slice: u64) -> ShrikeResult<Bitmap> {
        let idx = self
            .holder()
            .index(index)
            .ok_or(ShrikeError::IndexNotFound)?;
        let column_label = idx.column_label().to_string();

        let frame_name = call.str_arg("frame").unwrap_or(DEFAULT_FRAME);
        let frame = self
            .holder()
            .frame(index, frame_name)
            .ok_or(ShrikeError::FrameNotFound)?;
        let row_label = frame.row_label().to_string();

        let row = call.uint_arg(&row_label).map_err(|reason| QueryError::InvalidField {
            call: "Bitmap",
            field: row_label.clone(),
            reason,
        })?;
        let column = call
            .uint_arg(&column_label)
            .map_err(|reason| QueryError::InvalidField {
                call: "Bitmap",
                field: column_label.clone(),
                reason,
            })?;

        let (view_name, id) = match (row, column) {
            (Some(_), Some(_)) => {
                return Err(QueryError::BothLabels {
                    row: row_label,
                    column: column_label,
                }
                .into())
            }
            (None, None) => {
                return Err(QueryError::LabelRequired {
                    row: row_label,
                    column: column_label,
                }
                .into())
            }
            (Some(row_id), None) => (VIEW_STANDARD, row_id),
            (None, Some(column_id)) => {
                if !frame.inverse_enabled() {
                    return Err(QueryError::InverseNotEnabled.into());
                }
                (VIEW_INVERSE, column_id)
            }
        };

        match self.holder().fragment(index, frame_name, view_name, slice) {
            Some(frag) => Ok(frag.row(id)),
            None => Ok(Bitmap::new()),
        }
    }

    /// `Intersect(children…)`: pairwise fold under intersection.
    fn execute_intersect_slice(&self, index: &str, call: &Call, slice: u64) -> ShrikeResult<Bitmap> {
        let mut children = call.children.iter();
        let Some(first) = children.next() else {
            return Err(QueryError::EmptyOperandList { call: "Intersect" }.into());
        };
        let mut acc = self.execute_bitmap_call_slice(index, first, slice)?;
        for child in children {
            acc = acc.intersect(&self.execute_bitmap_call_slice(index, child, slice)?);
        }
        acc.invalidate_count();
        Ok(acc)
    }

    /// `Union(children…)`: pairwise fold under union; no children is an
    /// empty bitmap.
    fn execute_union_slice(&self, index: &str, call: &Call, slice: u64) -> ShrikeResult<Bitmap> {
        let mut acc = Bitmap::new();
        for (i, child) in call.children.iter().enumerate() {
            let bm = self.execute_bitmap_call_slice(index, child, slice)?;
            acc = if i == 0 { bm } else { acc.union(&bm) };
        }
        acc.invalidate_count();
        Ok(acc)
    }

    /// `Difference(children…)`: the first child minus the rest, left to
    /// right. Ordered across children; slice aggregation stays union-like.
    fn execute_difference_slice(
        &self,
        index: &str,
        call: &Call,
        slice: u64,
    ) -> ShrikeResult<Bitmap> {
        let mut children = call.children.iter();
        let Some(first) = children.next() else {
            return Err(QueryError::EmptyOperandList { call: "Difference" }.into());
        };
        let mut acc = self.execute_bitmap_call_slice(index, first, slice)?;
        for child in children {
            acc = acc.difference(&self.execute_bitmap_call_slice(index, child, slice)?);
        }
        acc.invalidate_count();
        Ok(acc)
    }

    /// `Range(frame, row, start, end)`: union the row across every time view
    /// covering the interval. A frame without a time quantum reads empty.
    fn execute_range_slice(&self, index: &str, call: &Call, slice: u64) -> ShrikeResult<Bitmap> {
        let frame_name = call.str_arg("frame").unwrap_or(DEFAULT_FRAME);
        let frame = self
            .holder()
            .frame(index, frame_name)
            .ok_or(ShrikeError::FrameNotFound)?;
        let row_label = frame.row_label().to_string();

        let row_id = call
            .uint_arg(&row_label)
            .map_err(|reason| QueryError::InvalidField {
                call: "Range",
                field: row_label.clone(),
                reason,
            })?
            .ok_or_else(|| QueryError::FieldRequired {
                call: "Range",
                field: row_label.clone(),
            })?;

        let start = parse_time_arg(call, "Range", "start")?;
        let end = parse_time_arg(call, "Range", "end")?;

        let Some(quantum) = frame.time_quantum() else {
            return Ok(Bitmap::new());
        };

        let mut bm = Bitmap::new();
        for time_view in view::views_by_time_range(VIEW_STANDARD, start, end, quantum) {
            if let Some(frag) = self.holder().fragment(index, frame_name, &time_view, slice) {
                bm = bm.union(&frag.row(row_id));
            }
        }
        Ok(bm)
    }

    /// `Count(child)`: per-slice popcount of the child bitmap, summed across
    /// slices.
    pub(crate) async fn execute_count(
        &self,
        index: &str,
        call: &Call,
        slices: &[u64],
        opt: &ExecOptions,
    ) -> ShrikeResult<u64> {
        if call.children.is_empty() {
            return Err(QueryError::InputRequired { call: "Count" }.into());
        }
        if call.children.len() > 1 {
            return Err(QueryError::SingleInputOnly { call: "Count" }.into());
        }

        let map_fn: MapFn<u64> = {
            let executor = self.clone();
            let index = index.to_string();
            let child = call.children[0].clone();
            Arc::new(move |slice| {
                Ok(executor
                    .execute_bitmap_call_slice(&index, &child, slice)?
                    .count())
            })
        };

        self.map_reduce(index, slices, call, opt, map_fn, SumReducer)
            .await
    }
}

/// Parse a required timestamp argument in the shared cluster time format.
pub(crate) fn parse_time_arg(
    call: &Call,
    op: &'static str,
    field: &str,
) -> ShrikeResult<NaiveDateTime> {
    let s = call.str_arg(field).ok_or_else(|| QueryError::FieldRequired {
        call: op,
        field: field.to_string(),
    })?;
    NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .map_err(|_| QueryError::InvalidTimestamp(s.to_string()).into())
}
