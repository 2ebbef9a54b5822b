//! The map/reduce engine: slice-to-node planning, fan-out, reduction, and
//! replica failover.
//!
//! One invocation evaluates a single call over a slice set. Slices are
//! grouped by their first live replica; the local group runs one task per
//! slice, remote groups forward the call with their slice list. A failing
//! node is dropped from the candidate set and its slices are re-planned
//! against the remaining replicas; the original node error surfaces only
//! once no replica is left.
//!
//! Cancellation is structural: every task holds a sender onto the engine's
//! result channel, so dropping the engine's future closes the channel and
//! strands no tasks.

use std::sync::Arc;

use tokio::sync::mpsc;

use shrike_cluster::Node;
use shrike_common::{ShrikeError, ShrikeResult};
use shrike_core::{pairs, Bitmap, Pair, QueryResult};
use shrike_pql::{Call, Query};

use crate::executor::{ExecOptions, Executor};

/// Per-slice evaluation function. Runs on the node owning the slice.
pub(crate) type MapFn<T> = Arc<dyn Fn(u64) -> ShrikeResult<T> + Send + Sync>;

/// Cross-slice reduction. `combine` must be associative and commutative:
/// per-slice results arrive in whatever order the cluster produces them.
pub(crate) trait Reducer<T>: Clone + Send + Sync + 'static {
    fn identity(&self) -> T;
    fn combine(&self, acc: T, value: T) -> T;
}

/// Bitmap merge across slices is a union.
#[derive(Clone, Copy)]
pub(crate) struct UnionReducer;

impl Reducer<Bitmap> for UnionReducer {
    fn identity(&self) -> Bitmap {
        Bitmap::new()
    }

    fn combine(&self, mut acc: Bitmap, value: Bitmap) -> Bitmap {
        acc.merge(&value);
        acc
    }
}

/// Count reduction is a sum.
#[derive(Clone, Copy)]
pub(crate) struct SumReducer;

impl Reducer<u64> for SumReducer {
    fn identity(&self) -> u64 {
        0
    }

    fn combine(&self, acc: u64, value: u64) -> u64 {
        acc + value
    }
}

/// Pair lists merge additively, summing counts on equal row IDs.
#[derive(Clone, Copy)]
pub(crate) struct PairsReducer;

impl Reducer<Vec<Pair>> for PairsReducer {
    fn identity(&self) -> Vec<Pair> {
        Vec::new()
    }

    fn combine(&self, acc: Vec<Pair>, value: Vec<Pair>) -> Vec<Pair> {
        pairs::add(&acc, &value)
    }
}

/// One node group's outcome, tagged with the slices it covered so a failure
/// can be re-planned.
struct MapResponse<T> {
    node: Node,
    slices: Vec<u64>,
    result: ShrikeResult<T>,
}

impl Executor {
    /// Map `map_fn` over `slices` across the cluster and reduce the results.
    pub(crate) async fn map_reduce<T, R>(
        &self,
        index: &str,
        slices: &[u64],
        call: &Call,
        opt: &ExecOptions,
        map_fn: MapFn<T>,
        reducer: R,
    ) -> ShrikeResult<T>
    where
        T: TryFrom<QueryResult, Error = ShrikeError> + Send + 'static,
        R: Reducer<T>,
    {
        let (tx, mut rx) = mpsc::channel::<MapResponse<T>>(1);

        // The coordinator starts with every cluster node as a candidate; a
        // forwarded invocation is restricted to the local node so it never
        // fans out again.
        let mut nodes: Vec<Node> = if !opt.remote {
            self.cluster().nodes().to_vec()
        } else {
            let node = self.cluster().node_by_host(self.host()).cloned().ok_or_else(|| {
                ShrikeError::Internal(format!("local host {} is not a cluster member", self.host()))
            })?;
            vec![node]
        };

        self.mapper(&tx, &nodes, index, slices, call, opt, &map_fn, &reducer)?;

        let mut acc = reducer.identity();
        let mut completed = 0usize;
        while completed < slices.len() {
            let Some(resp) = rx.recv().await else {
                return Err(ShrikeError::Internal("map channel closed".to_string()));
            };
            match resp.result {
                Ok(value) => {
                    acc = reducer.combine(acc, value);
                    completed += resp.slices.len();
                }
                Err(err) => {
                    tracing::warn!(
                        node = %resp.node.host,
                        error = %err,
                        "node failed, replanning its slices against remaining replicas"
                    );
                    nodes.retain(|n| n != &resp.node);
                    match self.mapper(&tx, &nodes, index, &resp.slices, call, opt, &map_fn, &reducer)
                    {
                        // No replica left for some slice: the original
                        // failure is the answer.
                        Err(ShrikeError::SliceUnavailable) => return Err(err),
                        Err(e) => return Err(e),
                        Ok(()) => {}
                    }
                }
            }
        }
        Ok(acc)
    }

    /// Plan `slices` onto `nodes` and spawn one task per group.
    #[allow(clippy::too_many_arguments)]
    fn mapper<T, R>(
        &self,
        tx: &mpsc::Sender<MapResponse<T>>,
        nodes: &[Node],
        index: &str,
        slices: &[u64],
        call: &Call,
        opt: &ExecOptions,
        map_fn: &MapFn<T>,
        reducer: &R,
    ) -> ShrikeResult<()>
    where
        T: TryFrom<QueryResult, Error = ShrikeError> + Send + 'static,
        R: Reducer<T>,
    {
        let plan = self.slices_by_node(nodes, index, slices)?;

        for (node, node_slices) in plan {
            let tx = tx.clone();
            let executor = self.clone();
            let map_fn = map_fn.clone();
            let reducer = reducer.clone();
            let index = index.to_string();
            let call = call.clone();
            let remote = opt.remote;

            tokio::spawn(async move {
                let result = if node.host == executor.host() {
                    mapper_local(&node_slices, map_fn, reducer).await
                } else if !remote {
                    executor
                        .exec_remote(&node, &index, &Query::single(call), &node_slices)
                        .await
                        .and_then(|results| {
                            results
                                .into_iter()
                                .next()
                                .ok_or_else(|| {
                                    ShrikeError::Internal("empty forwarded response".to_string())
                                })
                                .and_then(T::try_from)
                        })
                } else {
                    // Unreachable in practice: a forwarded invocation plans
                    // only against the local node. The origin coordinator
                    // owns every other group.
                    Ok(reducer.identity())
                };

                let _ = tx
                    .send(MapResponse {
                        node,
                        slices: node_slices,
                        result,
                    })
                    .await;
            });
        }
        Ok(())
    }

    /// Assign each slice to its first replica among `nodes`. A slice with no
    /// candidate replica fails the plan.
    fn slices_by_node(
        &self,
        nodes: &[Node],
        index: &str,
        slices: &[u64],
    ) -> ShrikeResult<Vec<(Node, Vec<u64>)>> {
        let mut plan: Vec<(Node, Vec<u64>)> = Vec::new();
        'slices: for &slice in slices {
            for replica in self.cluster().fragment_nodes(index, slice) {
                if nodes.contains(&replica) {
                    match plan.iter_mut().find(|(n, _)| *n == replica) {
                        Some((_, group)) => group.push(slice),
                        None => plan.push((replica, vec![slice])),
                    }
                    continue 'slices;
                }
            }
            return Err(ShrikeError::SliceUnavailable);
        }
        Ok(plan)
    }
}

/// Map and reduce a slice group entirely on the local node: one task per
/// slice, reduced as results arrive, first error wins.
async fn mapper_local<T, R>(slices: &[u64], map_fn: MapFn<T>, reducer: R) -> ShrikeResult<T>
where
    T: Send + 'static,
    R: Reducer<T>,
{
    let (tx, mut rx) = mpsc::channel::<ShrikeResult<T>>(slices.len().max(1));
    for &slice in slices {
        let tx = tx.clone();
        let map_fn = map_fn.clone();
        tokio::spawn(async move {
            let _ = tx.send(map_fn(slice)).await;
        });
    }
    drop(tx);

    let mut acc = reducer.identity();
    let mut completed = 0usize;
    while completed < slices.len() {
        match rx.recv().await {
            Some(Ok(value)) => {
                acc = reducer.combine(acc, value);
                completed += 1;
            }
            Some(Err(err)) => return Err(err),
            None => return Err(ShrikeError::Internal("slice channel closed".to_string())),
        }
    }
    Ok(acc)
}
