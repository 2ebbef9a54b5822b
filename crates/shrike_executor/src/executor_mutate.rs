//! Mutation evaluators: bit writes with per-replica fan-out, attribute
//! writes with cluster-wide fan-out, and the bulk row-attribute fast path.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tokio::sync::mpsc;

use shrike_cluster::filter_host;
use shrike_common::{Attrs, QueryError, ShrikeError, ShrikeResult, SLICE_WIDTH};
use shrike_core::{Frame, QueryResult, VIEW_INVERSE, VIEW_STANDARD};
use shrike_pql::{Call, Query};

use crate::executor::{ExecOptions, Executor};
use crate::executor_bitmap::parse_time_arg;

impl Executor {
    pub(crate) async fn execute_set_bit(
        &self,
        index: &str,
        call: &Call,
        opt: &ExecOptions,
    ) -> ShrikeResult<bool> {
        self.execute_mutate_bit(index, call, opt, true).await
    }

    pub(crate) async fn execute_clear_bit(
        &self,
        index: &str,
        call: &Call,
        opt: &ExecOptions,
    ) -> ShrikeResult<bool> {
        self.execute_mutate_bit(index, call, opt, false).await
    }

    /// Shared SetBit / ClearBit path. An empty `view` writes the standard
    /// orientation and, when the frame stores one, the inverse orientation
    /// with row and column transposed; the reported change is the OR across
    /// both.
    async fn execute_mutate_bit(
        &self,
        index: &str,
        call: &Call,
        opt: &ExecOptions,
        set: bool,
    ) -> ShrikeResult<bool> {
        let op: &'static str = if set { "SetBit" } else { "ClearBit" };

        let view_arg = call.str_arg("view").unwrap_or("");
        let frame_name = call
            .str_arg("frame")
            .ok_or_else(|| QueryError::FieldRequired {
                call: op,
                field: "frame".to_string(),
            })?;

        let idx = self
            .holder()
            .index(index)
            .ok_or(ShrikeError::IndexNotFound)?;
        let frame = idx.frame(frame_name).ok_or(ShrikeError::FrameNotFound)?;

        let column_label = idx.column_label().to_string();
        let row_label = frame.row_label().to_string();

        let row_id = call
            .uint_arg(&row_label)
            .map_err(|reason| QueryError::InvalidField {
                call: op,
                field: row_label.clone(),
                reason,
            })?
            .ok_or_else(|| QueryError::FieldRequired {
                call: op,
                field: row_label.clone(),
            })?;
        let col_id = call
            .uint_arg(&column_label)
            .map_err(|reason| QueryError::InvalidField {
                call: op,
                field: column_label.clone(),
                reason,
            })?
            .ok_or_else(|| QueryError::FieldRequired {
                call: op,
                field: column_label.clone(),
            })?;

        // Only SetBit takes a timestamp.
        let timestamp: Option<NaiveDateTime> = if set && call.args.contains_key("timestamp") {
            Some(parse_time_arg(call, "SetBit", "timestamp")?)
        } else {
            None
        };

        match view_arg {
            VIEW_STANDARD => {
                self.mutate_bit_view(index, call, &frame, VIEW_STANDARD, col_id, row_id, timestamp, opt, set)
                    .await
            }
            VIEW_INVERSE => {
                self.mutate_bit_view(index, call, &frame, VIEW_INVERSE, row_id, col_id, timestamp, opt, set)
                    .await
            }
            "" => {
                let mut ret = self
                    .mutate_bit_view(index, call, &frame, VIEW_STANDARD, col_id, row_id, timestamp, opt, set)
                    .await?;
                if frame.inverse_enabled()
                    && self
                        .mutate_bit_view(index, call, &frame, VIEW_INVERSE, row_id, col_id, timestamp, opt, set)
                        .await?
                {
                    ret = true;
                }
                Ok(ret)
            }
            other => Err(QueryError::InvalidView(other.to_string()).into()),
        }
    }

    /// Apply one bit mutation in one view across the replica set of its
    /// slice. The reported change is the OR of every replica update that
    /// occurred, local and forwarded alike.
    #[allow(clippy::too_many_arguments)]
    async fn mutate_bit_view(
        &self,
        index: &str,
        call: &Call,
        frame: &Arc<Frame>,
        view: &str,
        col_pos: u64,
        row_pos: u64,
        timestamp: Option<NaiveDateTime>,
        opt: &ExecOptions,
        set: bool,
    ) -> ShrikeResult<bool> {
        let slice = col_pos / SLICE_WIDTH;
        let mut ret = false;

        for node in self.cluster().fragment_nodes(index, slice) {
            // Update locally when this node holds a replica.
            if node.host == self.host() {
                let changed = if set {
                    frame.set_bit(view, row_pos, col_pos, timestamp)?
                } else {
                    frame.clear_bit(view, row_pos, col_pos)?
                };
                if changed {
                    ret = true;
                }
                continue;
            }

            // A forwarded invocation never forwards again.
            if opt.remote {
                continue;
            }

            let results = self
                .exec_remote(&node, index, &Query::single(call.clone()), &[])
                .await?;
            let changed = results
                .into_iter()
                .next()
                .ok_or_else(|| ShrikeError::Internal("empty forwarded response".to_string()))?
                .into_changed()?;
            if changed {
                ret = true;
            }
        }
        Ok(ret)
    }

    /// `SetRowAttrs`: write locally, then fan the same call out to every
    /// other cluster member.
    pub(crate) async fn execute_set_row_attrs(
        &self,
        index: &str,
        call: &Call,
        opt: &ExecOptions,
    ) -> ShrikeResult<()> {
        let frame_name = call
            .str_arg("frame")
            .ok_or_else(|| QueryError::FieldRequired {
                call: "SetRowAttrs",
                field: "frame".to_string(),
            })?;
        let frame = self
            .holder()
            .frame(index, frame_name)
            .ok_or(ShrikeError::FrameNotFound)?;
        let row_label = frame.row_label().to_string();

        let row_id = call
            .uint_arg(&row_label)
            .map_err(|reason| QueryError::InvalidField {
                call: "SetRowAttrs",
                field: row_label.clone(),
                reason,
            })?
            .ok_or_else(|| QueryError::FieldRequired {
                call: "SetRowAttrs",
                field: row_label.clone(),
            })?;

        let attrs = attrs_from_args(call, &["frame", &row_label], "SetRowAttrs")?;
        frame.row_attr_store().set_attrs(row_id, attrs)?;

        if opt.remote {
            return Ok(());
        }
        self.fan_out_query(index, Query::single(call.clone())).await
    }

    /// `SetColumnAttrs`: the ID comes from `id` when present, else from the
    /// index's column label.
    pub(crate) async fn execute_set_column_attrs(
        &self,
        index: &str,
        call: &Call,
        opt: &ExecOptions,
    ) -> ShrikeResult<()> {
        let idx = self
            .holder()
            .index(index)
            .ok_or(ShrikeError::IndexNotFound)?;

        let (id, id_key) = match call.uint_arg("id").ok().flatten() {
            Some(id) => (id, "id".to_string()),
            None => {
                let column_label = idx.column_label().to_string();
                let id = call
                    .uint_arg(&column_label)
                    .map_err(|reason| QueryError::InvalidField {
                        call: "SetColumnAttrs",
                        field: column_label.clone(),
                        reason,
                    })?
                    .ok_or_else(|| QueryError::FieldRequired {
                        call: "SetColumnAttrs",
                        field: format!("id/{}", column_label),
                    })?;
                (id, column_label)
            }
        };

        let attrs = attrs_from_args(call, &[&id_key], "SetColumnAttrs")?;
        idx.column_attr_store().set_attrs(id, attrs)?;

        if opt.remote {
            return Ok(());
        }
        self.fan_out_query(index, Query::single(call.clone())).await
    }

    /// Bulk path for a query of nothing but `SetRowAttrs` calls: group
    /// attributes by frame and row (later calls win per key), issue one bulk
    /// write per frame, then fan the original call list out once. Returns
    /// one nil placeholder per call to preserve the result shape.
    pub(crate) async fn execute_bulk_set_row_attrs(
        &self,
        index: &str,
        calls: &[Call],
        opt: &ExecOptions,
    ) -> ShrikeResult<Vec<QueryResult>> {
        let mut by_frame: BTreeMap<String, BTreeMap<u64, Attrs>> = BTreeMap::new();

        for call in calls {
            let frame_name = call
                .str_arg("frame")
                .ok_or_else(|| QueryError::FieldRequired {
                    call: "SetRowAttrs",
                    field: "frame".to_string(),
                })?;
            let frame = self
                .holder()
                .frame(index, frame_name)
                .ok_or(ShrikeError::FrameNotFound)?;
            let row_label = frame.row_label().to_string();

            let row_id = call
                .uint_arg(&row_label)
                .map_err(|reason| QueryError::InvalidField {
                    call: "SetRowAttrs",
                    field: row_label.clone(),
                    reason,
                })?
                .ok_or_else(|| QueryError::FieldRequired {
                    call: "SetRowAttrs",
                    field: row_label.clone(),
                })?;

            let attrs = attrs_from_args(call, &["frame", &row_label], "SetRowAttrs")?;
            by_frame
                .entry(frame_name.to_string())
                .or_default()
                .entry(row_id)
                .or_default()
                .extend(attrs);
        }

        for (frame_name, rows) in by_frame {
            let frame = self
                .holder()
                .frame(index, &frame_name)
                .ok_or(ShrikeError::FrameNotFound)?;
            frame.row_attr_store().set_bulk_attrs(rows)?;
        }

        if !opt.remote {
            self.fan_out_query(index, Query::new(calls.to_vec())).await?;
        }
        Ok(vec![QueryResult::None; calls.len()])
    }

    /// Forward a query to every other cluster member concurrently. The first
    /// error wins; there is no rollback.
    async fn fan_out_query(&self, index: &str, query: Query) -> ShrikeResult<()> {
        let nodes = filter_host(self.cluster().nodes(), self.host());
        let (tx, mut rx) = mpsc::channel::<ShrikeResult<Vec<QueryResult>>>(nodes.len().max(1));

        for node in nodes.iter().cloned() {
            let tx = tx.clone();
            let executor = self.clone();
            let index = index.to_string();
            let query = query.clone();
            tokio::spawn(async move {
                let _ = tx
                    .send(executor.exec_remote(&node, &index, &query, &[]).await)
                    .await;
            });
        }
        drop(tx);

        for _ in 0..nodes.len() {
            match rx.recv().await {
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err),
                None => {
                    return Err(ShrikeError::Internal(
                        "attribute fan-out channel closed".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }
}

/// Copy a call's arguments into an attribute set, dropping the reserved
/// keys that addressed the row or column.
fn attrs_from_args(call: &Call, reserved: &[&str], op: &'static str) -> ShrikeResult<Attrs> {
    let mut attrs = Attrs::new();
    for (key, value) in &call.args {
        if reserved.contains(&key.as_str()) {
            continue;
        }
        let attr = value
            .to_attr_value()
            .ok_or_else(|| QueryError::InvalidField {
                call: op,
                field: key.clone(),
                reason: format!("{} is not an attribute value", value),
            })?;
        attrs.insert(key.clone(), attr);
    }
    Ok(attrs)
}
