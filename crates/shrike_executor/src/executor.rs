//! Top-level execution: orientation selection, slice enumeration, the
//! per-call serial loop, and call dispatch.

use std::sync::Arc;

use shrike_cluster::{Cluster, Node, QueryTransport};
use shrike_common::{QueryError, ShrikeError, ShrikeResult, DEFAULT_COLUMN_LABEL, DEFAULT_FRAME};
use shrike_core::{Holder, QueryResult};
use shrike_pql::{has_only_set_row_attrs, needs_slices, Call, Query, Value};

/// Execution context for a single `execute` invocation.
///
/// `remote` is true iff this invocation is a forwarded sub-query from another
/// coordinator; it suppresses further fan-out to prevent loops.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOptions {
    pub remote: bool,
}

/// Recursively executes the calls of a parsed query across all slices.
///
/// Cheap to clone: per-node and per-slice tasks each carry a clone.
#[derive(Clone)]
pub struct Executor {
    holder: Arc<Holder>,
    cluster: Arc<Cluster>,
    host: String,
    transport: Arc<dyn QueryTransport>,
}

impl Executor {
    pub fn new(
        holder: Arc<Holder>,
        cluster: Arc<Cluster>,
        host: &str,
        transport: Arc<dyn QueryTransport>,
    ) -> Self {
        Executor {
            holder,
            cluster,
            host: host.to_string(),
            transport,
        }
    }

    pub fn holder(&self) -> &Arc<Holder> {
        &self.holder
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Execute a parsed query, returning one result per top-level call, in
    /// input order. The first failing call aborts the batch.
    pub async fn execute(
        &self,
        index: &str,
        query: &Query,
        slices: &[u64],
        opt: &ExecOptions,
    ) -> ShrikeResult<Vec<QueryResult>> {
        if index.is_empty() {
            return Err(ShrikeError::IndexRequired);
        }

        // Slice enumeration is skipped for query types that never touch
        // slices. The standard and inverse orientations can hold different
        // slice ranges, so both are enumerated.
        let needs = needs_slices(&query.calls);

        let mut slices = slices.to_vec();
        let mut inverse_slices: Vec<u64> = Vec::new();
        let mut column_label = DEFAULT_COLUMN_LABEL.to_string();

        if slices.is_empty() && needs {
            let idx = self
                .holder
                .index(index)
                .ok_or(ShrikeError::IndexNotFound)?;
            slices = (0..=idx.max_slice()).collect();
            inverse_slices = (0..=idx.max_inverse_slice()).collect();
            column_label = idx.column_label().to_string();
        }

        // A query of nothing but SetRowAttrs calls takes the bulk path.
        if has_only_set_row_attrs(&query.calls) {
            return self.execute_bulk_set_row_attrs(index, &query.calls, opt).await;
        }

        let mut results = Vec::with_capacity(query.calls.len());
        for call in &query.calls {
            let mut call_slices = &slices;
            if call.supports_inverse() && needs {
                let frame_name = call.str_arg("frame").unwrap_or(DEFAULT_FRAME);
                let frame = self
                    .holder
                    .frame(index, frame_name)
                    .ok_or(ShrikeError::FrameNotFound)?;
                if call.is_inverse(frame.row_label(), &column_label) {
                    call_slices = &inverse_slices;
                }
            }
            results.push(self.execute_call(index, call, call_slices, opt).await?);
        }
        Ok(results)
    }

    /// Route one call to its evaluator by operator name.
    async fn execute_call(
        &self,
        index: &str,
        call: &Call,
        slices: &[u64],
        opt: &ExecOptions,
    ) -> ShrikeResult<QueryResult> {
        let call = self.validate_call_args(call)?;

        match call.name.as_str() {
            "ClearBit" => Ok(QueryResult::Changed(
                self.execute_clear_bit(index, &call, opt).await?,
            )),
            "Count" => Ok(QueryResult::Count(
                self.execute_count(index, &call, slices, opt).await?,
            )),
            "SetBit" => Ok(QueryResult::Changed(
                self.execute_set_bit(index, &call, opt).await?,
            )),
            "SetRowAttrs" => {
                self.execute_set_row_attrs(index, &call, opt).await?;
                Ok(QueryResult::None)
            }
            "SetColumnAttrs" => {
                self.execute_set_column_attrs(index, &call, opt).await?;
                Ok(QueryResult::None)
            }
            "TopN" => Ok(QueryResult::Pairs(
                self.execute_topn(index, &call, slices, opt).await?,
            )),
            "Bitmap" | "Intersect" | "Union" | "Difference" | "Range" => Ok(QueryResult::Bitmap(
                self.execute_bitmap_call(index, &call, slices, opt).await?,
            )),
            other => Err(QueryError::UnknownCall(other.to_string()).into()),
        }
    }

    /// Normalize argument shapes. A heterogeneous `ids` list coerces to a
    /// signed integer list; any other shape is rejected.
    fn validate_call_args(&self, call: &Call) -> ShrikeResult<Call> {
        let mut call = call.clone();
        if let Some(value) = call.args.get("ids") {
            match value {
                Value::UintList(_) | Value::IntList(_) => {}
                Value::List(values) => {
                    let ints = values
                        .iter()
                        .map(|v| match v {
                            Value::Int(i) => Ok(*i),
                            other => Err(QueryError::InvalidIds(other.to_string())),
                        })
                        .collect::<Result<Vec<i64>, QueryError>>()?;
                    call.args.insert("ids".to_string(), Value::IntList(ints));
                }
                other => return Err(QueryError::InvalidIds(other.to_string()).into()),
            }
        }
        Ok(call)
    }

    /// Forward a query to a peer node. Every forwarded query is marked
    /// remote by the transport, regardless of how this invocation was
    /// marked.
    pub(crate) async fn exec_remote(
        &self,
        node: &Node,
        index: &str,
        query: &Query,
        slices: &[u64],
    ) -> ShrikeResult<Vec<QueryResult>> {
        self.transport.execute(node, index, query, slices).await
    }
}
