//! Shared vocabulary for ShrikeDB: error taxonomy, cluster-uniform constants,
//! and the attribute value type used by row/column attribute stores.

pub mod attr;
pub mod error;

pub use attr::{AttrValue, Attrs};
pub use error::{QueryError, ShrikeError, ShrikeResult, TransportError};

/// Width of a column slice. The column ID space of every frame is partitioned
/// into `SLICE_WIDTH`-wide ranges; the slice is the unit of distribution.
/// Must be identical on every node in the cluster.
pub const SLICE_WIDTH: u64 = 1 << 20;

/// Frame used when a call does not name one.
pub const DEFAULT_FRAME: &str = "general";

/// Row label used when a frame does not configure one.
pub const DEFAULT_ROW_LABEL: &str = "id";

/// Column label used when an index does not configure one.
pub const DEFAULT_COLUMN_LABEL: &str = "col";

/// Lowest per-row count considered by a TopN scan when no explicit
/// threshold is given.
pub const MIN_THRESHOLD: u64 = 1;

/// Timestamp format shared by `SetBit(timestamp=..)` and `Range(start/end)`.
/// Chrono naive format, minute granularity, identical on every node.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";
