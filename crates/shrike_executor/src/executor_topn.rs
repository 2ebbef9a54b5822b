//! Two-phase top-N: a distributed top-K approximation followed by an exact
//! re-query over the phase-one candidates.

use std::sync::Arc;

use shrike_common::{AttrValue, QueryError, ShrikeResult, DEFAULT_FRAME, MIN_THRESHOLD};
use shrike_core::{pairs, Pair, TopOptions, VIEW_STANDARD};
use shrike_pql::{Call, Value};

use crate::executor::{ExecOptions, Executor};
use crate::map_reduce::{MapFn, PairsReducer};

impl Executor {
    /// Execute a `TopN` call.
    ///
    /// Phase one ranks per-slice and merges additively, which approximates:
    /// a row can make a slice's top K without making every slice's. Phase
    /// two re-queries with the merged candidate set pinned, degenerating to
    /// exact counts. The re-query is skipped when the caller pinned `ids`
    /// itself, when phase one came back empty, or on a forwarded sub-query
    /// (only the origin coordinator refetches).
    pub(crate) async fn execute_topn(
        &self,
        index: &str,
        call: &Call,
        slices: &[u64],
        opt: &ExecOptions,
    ) -> ShrikeResult<Vec<Pair>> {
        let row_ids = call
            .uint_slice_arg("ids")
            .map_err(|reason| QueryError::InvalidField {
                call: "TopN",
                field: "ids".to_string(),
                reason,
            })?
            .unwrap_or_default();
        let n = call
            .uint_arg("n")
            .map_err(|reason| QueryError::InvalidField {
                call: "TopN",
                field: "n".to_string(),
                reason,
            })?
            .unwrap_or(0);

        let pairs_list = self.execute_topn_slices(index, call, slices, opt).await?;
        if pairs_list.is_empty() || !row_ids.is_empty() || opt.remote {
            return Ok(pairs_list);
        }

        let mut ids = pairs::keys(&pairs_list);
        ids.sort_unstable();
        let mut requery = call.clone();
        requery.args.insert("ids".to_string(), Value::UintList(ids));

        let mut exact = self.execute_topn_slices(index, &requery, slices, opt).await?;
        if n != 0 && exact.len() as u64 > n {
            exact.truncate(n as usize);
        }
        Ok(exact)
    }

    /// One ranking pass: per-slice `top`, additive merge, final sort by
    /// count descending then row ID ascending.
    async fn execute_topn_slices(
        &self,
        index: &str,
        call: &Call,
        slices: &[u64],
        opt: &ExecOptions,
    ) -> ShrikeResult<Vec<Pair>> {
        let map_fn: MapFn<Vec<Pair>> = {
            let executor = self.clone();
            let index = index.to_string();
            let call = call.clone();
            Arc::new(move |slice| executor.execute_topn_slice(&index, &call, slice))
        };

        let mut merged = self
            .map_reduce(index, slices, call, opt, map_fn, PairsReducer)
            .await?;
        pairs::sort(&mut merged);
        Ok(merged)
    }

    /// Evaluate `TopN` for a single slice.
    fn execute_topn_slice(&self, index: &str, call: &Call, slice: u64) -> ShrikeResult<Vec<Pair>> {
        let frame_name = call.str_arg("frame").unwrap_or(DEFAULT_FRAME);

        let n = call
            .uint_arg("n")
            .map_err(|reason| QueryError::InvalidField {
                call: "TopN",
                field: "n".to_string(),
                reason,
            })?
            .unwrap_or(0);
        let row_ids = call
            .uint_slice_arg("ids")
            .map_err(|reason| QueryError::InvalidField {
                call: "TopN",
                field: "ids".to_string(),
                reason,
            })?
            .unwrap_or_default();
        let min_threshold = call
            .uint_arg("threshold")
            .map_err(|reason| QueryError::InvalidField {
                call: "TopN",
                field: "threshold".to_string(),
                reason,
            })?
            .unwrap_or(0);
        let tanimoto_threshold = call
            .uint_arg("tanimotoThreshold")
            .map_err(|reason| QueryError::InvalidField {
                call: "TopN",
                field: "tanimotoThreshold".to_string(),
                reason,
            })?
            .unwrap_or(0);
        if tanimoto_threshold > 100 {
            return Err(QueryError::TanimotoRange.into());
        }

        // Row-attribute equality filter.
        let filter_field = call.str_arg("field").map(String::from);
        let filter_values: Vec<AttrValue> = match call.args.get("filters") {
            Some(Value::List(values)) => values.iter().filter_map(|v| v.to_attr_value()).collect(),
            _ => Vec::new(),
        };

        // At most one child: the bitmap the candidate rows intersect with.
        let src = match call.children.len() {
            0 => None,
            1 => Some(self.execute_bitmap_call_slice(index, &call.children[0], slice)?),
            _ => return Err(QueryError::SingleInputOnly { call: "TopN" }.into()),
        };

        let Some(frag) = self.holder().fragment(index, frame_name, VIEW_STANDARD, slice) else {
            return Ok(Vec::new());
        };

        frag.top(&TopOptions {
            n: n as usize,
            src,
            row_ids,
            filter_field,
            filter_values,
            min_threshold: if min_threshold == 0 {
                MIN_THRESHOLD
            } else {
                min_threshold
            },
            tanimoto_threshold,
        })
    }
}
