use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use shrike_cluster::{Cluster, Node, QueryTransport};
use shrike_common::{AttrValue, QueryError, ShrikeError, ShrikeResult, SLICE_WIDTH};
use shrike_core::{
    FrameOptions, Holder, IndexOptions, Pair, QueryResult, TimeQuantum, VIEW_STANDARD,
};
use shrike_pql::{Call, Query, Value};

use crate::{ExecOptions, Executor};

const LOCAL: &str = "local:10101";

/// Transport for single-node tests: any forward is a bug.
struct NoTransport;

#[async_trait]
impl QueryTransport for NoTransport {
    async fn execute(
        &self,
        node: &Node,
        _index: &str,
        _query: &Query,
        _slices: &[u64],
    ) -> ShrikeResult<Vec<QueryResult>> {
        panic!("unexpected forward to {}", node.host);
    }
}

/// Transport that refuses every forward but counts the attempts.
struct RecordingTransport {
    sends: AtomicUsize,
}

impl RecordingTransport {
    fn new() -> Self {
        RecordingTransport {
            sends: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl QueryTransport for RecordingTransport {
    async fn execute(
        &self,
        _node: &Node,
        _index: &str,
        _query: &Query,
        _slices: &[u64],
    ) -> ShrikeResult<Vec<QueryResult>> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        Err(ShrikeError::Remote("refused".to_string()))
    }
}

fn single_node() -> Executor {
    let holder = Arc::new(Holder::new());
    let idx = holder.create_index("i", IndexOptions::default());
    idx.create_frame("f", FrameOptions::default());

    let cluster = Arc::new(Cluster::new(vec![Node::new(LOCAL)], 1));
    Executor::new(holder, cluster, LOCAL, Arc::new(NoTransport))
}

async fn run(e: &Executor, call: Call) -> ShrikeResult<Vec<QueryResult>> {
    e.execute("i", &Query::single(call), &[], &ExecOptions::default())
        .await
}

async fn set_bit(e: &Executor, frame: &str, row: u64, col: u64) -> bool {
    let call = Call::new("SetBit")
        .with_arg("frame", frame)
        .with_arg("id", row)
        .with_arg("col", col);
    run(e, call).await.unwrap()[0].clone().into_changed().unwrap()
}

fn bitmap_call(frame: &str, row: u64) -> Call {
    Call::new("Bitmap").with_arg("frame", frame).with_arg("id", row)
}

// ---------------------------------------------------------------------------
// Top-level execute
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_execute_requires_index() {
    let e = single_node();
    let err = e
        .execute("", &Query::single(Call::new("Count")), &[], &ExecOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ShrikeError::IndexRequired));
}

#[tokio::test]
async fn test_execute_unknown_index() {
    let e = single_node();
    let err = e
        .execute(
            "missing",
            &Query::single(bitmap_call("f", 1)),
            &[],
            &ExecOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ShrikeError::IndexNotFound));
}

#[tokio::test]
async fn test_execute_unknown_call() {
    let e = single_node();
    let err = run(&e, Call::new("Frobnicate")).await.unwrap_err();
    assert!(matches!(
        err,
        ShrikeError::Query(QueryError::UnknownCall(name)) if name == "Frobnicate"
    ));
}

#[tokio::test]
async fn test_results_preserve_call_order() {
    let e = single_node();
    let query = Query::new(vec![
        Call::new("SetBit")
            .with_arg("frame", "f")
            .with_arg("id", 1u64)
            .with_arg("col", 3u64),
        Call::new("Count").with_child(bitmap_call("f", 1)),
    ]);
    let results = e
        .execute("i", &query, &[], &ExecOptions::default())
        .await
        .unwrap();
    assert_eq!(results[0], QueryResult::Changed(true));
    assert_eq!(results[1], QueryResult::Count(1));
}

#[tokio::test]
async fn test_explicit_slices_match_enumeration() {
    let e = single_node();
    set_bit(&e, "f", 1, 5).await;
    set_bit(&e, "f", 1, SLICE_WIDTH + 9).await;

    let count = |slices: Vec<u64>| {
        let e = e.clone();
        async move {
            e.execute(
                "i",
                &Query::single(Call::new("Count").with_child(bitmap_call("f", 1))),
                &slices,
                &ExecOptions::default(),
            )
            .await
            .unwrap()[0]
                .clone()
                .into_count()
                .unwrap()
        }
    };

    assert_eq!(count(vec![]).await, 2);
    assert_eq!(count(vec![0, 1]).await, 2);
}

// ---------------------------------------------------------------------------
// Bit mutations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_set_bit_reports_change_once() {
    let e = single_node();
    assert!(set_bit(&e, "f", 7, 11).await);
    assert!(!set_bit(&e, "f", 7, 11).await);

    let results = run(&e, bitmap_call("f", 7)).await.unwrap();
    assert_eq!(
        results[0].clone().into_bitmap().unwrap().bits(),
        vec![11]
    );
}

#[tokio::test]
async fn test_clear_bit() {
    let e = single_node();
    set_bit(&e, "f", 2, 8).await;

    let clear = Call::new("ClearBit")
        .with_arg("frame", "f")
        .with_arg("id", 2u64)
        .with_arg("col", 8u64);
    let results = run(&e, clear.clone()).await.unwrap();
    assert_eq!(results[0], QueryResult::Changed(true));

    let results = run(&e, clear).await.unwrap();
    assert_eq!(results[0], QueryResult::Changed(false));
}

#[tokio::test]
async fn test_set_bit_validation() {
    let e = single_node();

    let missing_frame = Call::new("SetBit").with_arg("id", 1u64).with_arg("col", 2u64);
    assert!(run(&e, missing_frame).await.is_err());

    let missing_row = Call::new("SetBit").with_arg("frame", "f").with_arg("col", 2u64);
    assert!(run(&e, missing_row).await.is_err());

    let missing_col = Call::new("SetBit").with_arg("frame", "f").with_arg("id", 1u64);
    assert!(run(&e, missing_col).await.is_err());

    let bad_view = Call::new("SetBit")
        .with_arg("frame", "f")
        .with_arg("id", 1u64)
        .with_arg("col", 2u64)
        .with_arg("view", "sideways");
    let err = run(&e, bad_view).await.unwrap_err();
    assert!(matches!(
        err,
        ShrikeError::Query(QueryError::InvalidView(view)) if view == "sideways"
    ));
}

#[tokio::test]
async fn test_set_bit_writes_inverse_view_transposed() {
    let e = single_node();
    e.holder()
        .index("i")
        .unwrap()
        .create_frame("inv", FrameOptions {
            inverse_enabled: true,
            ..Default::default()
        });

    assert!(set_bit(&e, "inv", 3, 7).await);

    // The inverse view stores the transposed bit: row 7, column 3.
    let frag = e.holder().fragment("i", "inv", "inverse", 0).unwrap();
    assert_eq!(frag.row(7).bits(), vec![3]);

    // Reading by column label routes to the inverse view.
    let results = run(
        &e,
        Call::new("Bitmap").with_arg("frame", "inv").with_arg("col", 7u64),
    )
    .await
    .unwrap();
    assert_eq!(results[0].clone().into_bitmap().unwrap().bits(), vec![3]);
}

// ---------------------------------------------------------------------------
// Bitmap algebra
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_union_count_across_slices() {
    let e = single_node();
    // Row 1: {5, 1048580}. Row 2: {5, 2097200}. Union counts 3.
    set_bit(&e, "f", 1, 5).await;
    set_bit(&e, "f", 1, 1048580).await;
    set_bit(&e, "f", 2, 5).await;
    set_bit(&e, "f", 2, 2097200).await;

    let call = Call::new("Count").with_child(
        Call::new("Union")
            .with_child(bitmap_call("f", 1))
            .with_child(bitmap_call("f", 2)),
    );
    let results = run(&e, call).await.unwrap();
    assert_eq!(results[0], QueryResult::Count(3));
}

#[tokio::test]
async fn test_intersect() {
    let e = single_node();
    for col in [1, 2, 3] {
        set_bit(&e, "f", 1, col).await;
    }
    for col in [2, 3, 4] {
        set_bit(&e, "f", 2, col).await;
    }

    let call = Call::new("Intersect")
        .with_child(bitmap_call("f", 1))
        .with_child(bitmap_call("f", 2));
    let results = run(&e, call).await.unwrap();
    assert_eq!(results[0].clone().into_bitmap().unwrap().bits(), vec![2, 3]);
}

#[tokio::test]
async fn test_difference_is_first_minus_rest() {
    let e = single_node();
    for col in [1, 2, 3, 4] {
        set_bit(&e, "f", 1, col).await;
    }
    set_bit(&e, "f", 2, 2).await;
    set_bit(&e, "f", 3, 4).await;

    let call = Call::new("Difference")
        .with_child(bitmap_call("f", 1))
        .with_child(bitmap_call("f", 2))
        .with_child(bitmap_call("f", 3));
    let results = run(&e, call).await.unwrap();
    assert_eq!(results[0].clone().into_bitmap().unwrap().bits(), vec![1, 3]);
}

#[tokio::test]
async fn test_empty_operand_lists_are_errors() {
    let e = single_node();
    set_bit(&e, "f", 1, 1).await;

    assert!(run(&e, Call::new("Intersect")).await.is_err());
    assert!(run(&e, Call::new("Difference")).await.is_err());

    // Union of nothing is an empty bitmap, not an error.
    let results = run(&e, Call::new("Union")).await.unwrap();
    assert_eq!(results[0].clone().into_bitmap().unwrap().count(), 0);
}

#[tokio::test]
async fn test_bitmap_label_validation() {
    let e = single_node();
    set_bit(&e, "f", 1, 1).await;

    let both = Call::new("Bitmap")
        .with_arg("frame", "f")
        .with_arg("id", 1u64)
        .with_arg("col", 2u64);
    assert!(run(&e, both).await.is_err());

    let neither = Call::new("Bitmap").with_arg("frame", "f");
    assert!(run(&e, neither).await.is_err());

    // Column reads require inverse storage.
    let col_no_inverse = Call::new("Bitmap").with_arg("frame", "f").with_arg("col", 2u64);
    let err = run(&e, col_no_inverse).await.unwrap_err();
    assert!(matches!(
        err,
        ShrikeError::Query(QueryError::InverseNotEnabled)
    ));
}

#[tokio::test]
async fn test_missing_fragment_reads_empty() {
    let e = single_node();
    set_bit(&e, "f", 1, 1).await;

    let results = e
        .execute(
            "i",
            &Query::single(bitmap_call("f", 1)),
            &[0, 1, 2, 3],
            &ExecOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(results[0].clone().into_bitmap().unwrap().bits(), vec![1]);
}

// ---------------------------------------------------------------------------
// Range
// ---------------------------------------------------------------------------

async fn timed_set_bit(e: &Executor, frame: &str, row: u64, col: u64, ts: &str) {
    let call = Call::new("SetBit")
        .with_arg("frame", frame)
        .with_arg("id", row)
        .with_arg("col", col)
        .with_arg("timestamp", ts);
    run(e, call).await.unwrap();
}

fn range_call(frame: &str, row: u64, start: &str, end: &str) -> Call {
    Call::new("Range")
        .with_arg("frame", frame)
        .with_arg("id", row)
        .with_arg("start", start)
        .with_arg("end", end)
}

#[tokio::test]
async fn test_range_unions_time_views() {
    let e = single_node();
    e.holder().index("i").unwrap().create_frame("t", FrameOptions {
        time_quantum: TimeQuantum::new("D"),
        ..Default::default()
    });

    timed_set_bit(&e, "t", 9, 3, "2017-01-02T00:00").await;
    timed_set_bit(&e, "t", 9, SLICE_WIDTH + 8, "2017-01-02T12:00").await;
    timed_set_bit(&e, "t", 9, 100, "2017-02-01T00:00").await;

    let results = run(
        &e,
        range_call("t", 9, "2017-01-01T00:00", "2017-01-03T00:00"),
    )
    .await
    .unwrap();
    assert_eq!(
        results[0].clone().into_bitmap().unwrap().bits(),
        vec![3, SLICE_WIDTH + 8]
    );
}

#[tokio::test]
async fn test_range_without_quantum_is_empty() {
    let e = single_node();
    set_bit(&e, "f", 9, 3).await;

    let results = run(
        &e,
        range_call("f", 9, "2017-01-01T00:00", "2017-01-03T00:00"),
    )
    .await
    .unwrap();
    assert_eq!(results[0].clone().into_bitmap().unwrap().count(), 0);
}

#[tokio::test]
async fn test_range_requires_both_bounds() {
    let e = single_node();
    e.holder().index("i").unwrap().create_frame("t", FrameOptions {
        time_quantum: TimeQuantum::new("D"),
        ..Default::default()
    });

    let no_end = Call::new("Range")
        .with_arg("frame", "t")
        .with_arg("id", 9u64)
        .with_arg("start", "2017-01-01T00:00");
    assert!(run(&e, no_end).await.is_err());

    let no_start = Call::new("Range")
        .with_arg("frame", "t")
        .with_arg("id", 9u64)
        .with_arg("end", "2017-01-03T00:00");
    assert!(run(&e, no_start).await.is_err());

    let bad_stamp = range_call("t", 9, "yesterday", "2017-01-03T00:00");
    let err = run(&e, bad_stamp).await.unwrap_err();
    assert!(matches!(
        err,
        ShrikeError::Query(QueryError::InvalidTimestamp(_))
    ));
}

// ---------------------------------------------------------------------------
// Count
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_count_child_arity() {
    let e = single_node();
    set_bit(&e, "f", 1, 1).await;

    assert!(run(&e, Call::new("Count")).await.is_err());

    let two = Call::new("Count")
        .with_child(bitmap_call("f", 1))
        .with_child(bitmap_call("f", 1));
    assert!(run(&e, two).await.is_err());
}

// ---------------------------------------------------------------------------
// TopN
// ---------------------------------------------------------------------------

fn pair(id: u64, count: u64) -> Pair {
    Pair { id, count }
}

async fn seed_topn_rows(e: &Executor) {
    // Row 1: 10 bits split across slices 0 and 1. Row 2: 10 bits split 6/4.
    // Row 3: 3 bits in slice 0.
    for col in 0..5 {
        set_bit(e, "f", 1, col).await;
        set_bit(e, "f", 1, SLICE_WIDTH + col).await;
    }
    for col in 10..16 {
        set_bit(e, "f", 2, col).await;
    }
    for col in 10..14 {
        set_bit(e, "f", 2, SLICE_WIDTH + col).await;
    }
    for col in 20..23 {
        set_bit(e, "f", 3, col).await;
    }
}

#[tokio::test]
async fn test_topn_two_phase_with_tie() {
    let e = single_node();
    seed_topn_rows(&e).await;

    let results = run(&e, Call::new("TopN").with_arg("frame", "f").with_arg("n", 2u64))
        .await
        .unwrap();
    // Equal counts tie-break by ascending row ID.
    assert_eq!(
        results[0].clone().into_pairs().unwrap(),
        vec![pair(1, 10), pair(2, 10)]
    );
}

#[tokio::test]
async fn test_topn_n_zero_returns_all() {
    let e = single_node();
    seed_topn_rows(&e).await;

    let results = run(&e, Call::new("TopN").with_arg("frame", "f")).await.unwrap();
    assert_eq!(
        results[0].clone().into_pairs().unwrap(),
        vec![pair(1, 10), pair(2, 10), pair(3, 3)]
    );
}

#[tokio::test]
async fn test_topn_explicit_ids_skips_refetch_and_truncation() {
    let e = single_node();
    seed_topn_rows(&e).await;

    let call = Call::new("TopN")
        .with_arg("frame", "f")
        .with_arg("n", 1u64)
        .with_arg("ids", vec![2u64, 3]);
    let results = run(&e, call).await.unwrap();
    assert_eq!(
        results[0].clone().into_pairs().unwrap(),
        vec![pair(2, 10), pair(3, 3)]
    );
}

#[tokio::test]
async fn test_topn_threshold() {
    let e = single_node();
    seed_topn_rows(&e).await;

    let call = Call::new("TopN")
        .with_arg("frame", "f")
        .with_arg("threshold", 5u64);
    let results = run(&e, call).await.unwrap();
    // The threshold floors per-slice counts: row 2's 4-bit group in slice 1
    // drops out, so its merged count is 6.
    assert_eq!(
        results[0].clone().into_pairs().unwrap(),
        vec![pair(1, 10), pair(2, 6)]
    );
}

#[tokio::test]
async fn test_topn_tanimoto_range_check() {
    let e = single_node();
    set_bit(&e, "f", 1, 1).await;

    let call = Call::new("TopN")
        .with_arg("frame", "f")
        .with_arg("tanimotoThreshold", 101u64)
        .with_child(bitmap_call("f", 1));
    let err = run(&e, call).await.unwrap_err();
    assert!(matches!(err, ShrikeError::Query(QueryError::TanimotoRange)));
}

#[tokio::test]
async fn test_topn_single_child_only() {
    let e = single_node();
    set_bit(&e, "f", 1, 1).await;

    let call = Call::new("TopN")
        .with_arg("frame", "f")
        .with_child(bitmap_call("f", 1))
        .with_child(bitmap_call("f", 1));
    assert!(run(&e, call).await.is_err());
}

#[tokio::test]
async fn test_topn_attribute_filter() {
    let e = single_node();
    seed_topn_rows(&e).await;
    run(
        &e,
        Call::new("SetRowAttrs")
            .with_arg("frame", "f")
            .with_arg("id", 2u64)
            .with_arg("category", "sports"),
    )
    .await
    .unwrap();

    let call = Call::new("TopN")
        .with_arg("frame", "f")
        .with_arg("field", "category")
        .with_arg("filters", Value::List(vec![Value::Str("sports".to_string())]));
    let results = run(&e, call).await.unwrap();
    assert_eq!(results[0].clone().into_pairs().unwrap(), vec![pair(2, 10)]);
}

#[tokio::test]
async fn test_ids_normalization() {
    let e = single_node();
    set_bit(&e, "f", 6, 1).await;

    let good = Call::new("TopN")
        .with_arg("frame", "f")
        .with_arg("ids", Value::List(vec![Value::Int(6)]));
    let results = run(&e, good).await.unwrap();
    assert_eq!(results[0].clone().into_pairs().unwrap(), vec![pair(6, 1)]);

    let bad = Call::new("TopN")
        .with_arg("frame", "f")
        .with_arg("ids", Value::Str("nope".to_string()));
    let err = run(&e, bad).await.unwrap_err();
    assert!(matches!(err, ShrikeError::Query(QueryError::InvalidIds(_))));
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_set_row_attrs_and_bitmap_attachment() {
    let e = single_node();
    set_bit(&e, "f", 1, 4).await;

    let results = e
        .execute(
            "i",
            &Query::new(vec![
                Call::new("SetRowAttrs")
                    .with_arg("frame", "f")
                    .with_arg("id", 1u64)
                    .with_arg("color", "red"),
                bitmap_call("f", 1),
            ]),
            &[],
            &ExecOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(results[0], QueryResult::None);
    let bm = results[1].clone().into_bitmap().unwrap();
    assert_eq!(bm.bits(), vec![4]);
    assert_eq!(
        bm.attrs().unwrap().get("color"),
        Some(&AttrValue::Str("red".to_string()))
    );
}

#[tokio::test]
async fn test_set_column_attrs_and_attachment() {
    let e = single_node();
    e.holder()
        .index("i")
        .unwrap()
        .create_frame("inv", FrameOptions {
            inverse_enabled: true,
            ..Default::default()
        });
    set_bit(&e, "inv", 3, 7).await;

    // `id` is preferred over the column label.
    run(
        &e,
        Call::new("SetColumnAttrs")
            .with_arg("id", 7u64)
            .with_arg("city", "ankara"),
    )
    .await
    .unwrap();

    let results = run(
        &e,
        Call::new("Bitmap").with_arg("frame", "inv").with_arg("col", 7u64),
    )
    .await
    .unwrap();
    let bm = results[0].clone().into_bitmap().unwrap();
    assert_eq!(
        bm.attrs().unwrap().get("city"),
        Some(&AttrValue::Str("ankara".to_string()))
    );
}

#[tokio::test]
async fn test_bulk_set_row_attrs_merges_last_write_wins() {
    let e = single_node();

    let query = Query::new(vec![
        Call::new("SetRowAttrs")
            .with_arg("frame", "f")
            .with_arg("id", 1u64)
            .with_arg("color", "red"),
        Call::new("SetRowAttrs")
            .with_arg("frame", "f")
            .with_arg("id", 1u64)
            .with_arg("size", 5u64),
        Call::new("SetRowAttrs")
            .with_arg("frame", "f")
            .with_arg("id", 2u64)
            .with_arg("color", "blue"),
    ]);
    let results = e
        .execute("i", &query, &[], &ExecOptions::default())
        .await
        .unwrap();
    assert_eq!(results, vec![QueryResult::None; 3]);

    let store = e.holder().frame("i", "f").unwrap().row_attr_store().clone();
    let row1 = store.attrs(1).unwrap();
    assert_eq!(row1.get("color"), Some(&AttrValue::Str("red".to_string())));
    assert_eq!(row1.get("size"), Some(&AttrValue::Uint(5)));
    assert_eq!(
        store.attrs(2).unwrap().get("color"),
        Some(&AttrValue::Str("blue".to_string()))
    );
}

// ---------------------------------------------------------------------------
// Planning and the anti-loop discipline
// ---------------------------------------------------------------------------

fn two_node(transport: Arc<dyn QueryTransport>) -> Executor {
    let holder = Arc::new(Holder::new());
    let idx = holder.create_index("i", IndexOptions::default());
    idx.create_frame("f", FrameOptions::default());

    let cluster = Arc::new(Cluster::new(
        vec![Node::new("a:10101"), Node::new("b:10101")],
        1,
    ));
    Executor::new(holder, cluster, "a:10101", transport)
}

fn slice_owned_by(e: &Executor, host: &str) -> u64 {
    (0..256)
        .find(|&slice| e.cluster().fragment_nodes("i", slice)[0].host == host)
        .expect("placement never chose the host")
}

#[tokio::test]
async fn test_remote_invocation_cannot_reach_foreign_slices() {
    let e = two_node(Arc::new(RecordingTransport::new()));
    let foreign = slice_owned_by(&e, "b:10101");

    let err = e
        .execute(
            "i",
            &Query::single(Call::new("Count").with_child(bitmap_call("f", 1))),
            &[foreign],
            &ExecOptions { remote: true },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ShrikeError::SliceUnavailable));
}

#[tokio::test]
async fn test_remote_invocation_never_forwards() {
    let transport = Arc::new(RecordingTransport::new());
    let e = two_node(transport.clone());
    let local = slice_owned_by(&e, "a:10101");

    e.holder()
        .frame("i", "f")
        .unwrap()
        .set_bit(VIEW_STANDARD, 1, local * SLICE_WIDTH + 3, None)
        .unwrap();

    let results = e
        .execute(
            "i",
            &Query::single(Call::new("Count").with_child(bitmap_call("f", 1))),
            &[local],
            &ExecOptions { remote: true },
        )
        .await
        .unwrap();
    assert_eq!(results[0], QueryResult::Count(1));
    assert_eq!(transport.sends.load(Ordering::SeqCst), 0);
}
