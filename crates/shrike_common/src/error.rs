//! Error taxonomy.
//!
//! One top-level enum that every crate-specific error converts into, with
//! the classification driving recovery decisions:
//!
//! - `Query*`     — bad user input; returned to the caller unchanged.
//! - `Transport`  — node-level failure; the map/reduce engine retries the
//!   affected slices against the remaining replicas.
//! - `SliceUnavailable` — planning found a slice with no live replica;
//!   recoverable only while other replicas exist.
//! - everything else — fatal for the current call.

use thiserror::Error;

/// Convenience alias for `Result<T, ShrikeError>`.
pub type ShrikeResult<T> = Result<T, ShrikeError>;

/// Top-level error type that all crate-specific errors convert into.
#[derive(Error, Debug)]
pub enum ShrikeError {
    #[error("index required")]
    IndexRequired,

    #[error("index not found")]
    IndexNotFound,

    #[error("frame not found")]
    FrameNotFound,

    /// No candidate node holds a replica of some requested slice.
    #[error("slice unavailable")]
    SliceUnavailable,

    #[error("query error: {0}")]
    Query(#[from] QueryError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Error string carried in a peer's `QueryResponse.err` field.
    #[error("remote error: {0}")]
    Remote(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// User-input errors raised while validating and evaluating a call.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("unknown call: {0}")]
    UnknownCall(String),

    #[error("invalid view: {0}")]
    InvalidView(String),

    #[error("{call}() field '{field}' required")]
    FieldRequired { call: &'static str, field: String },

    #[error("{call}() error reading '{field}': {reason}")]
    InvalidField {
        call: &'static str,
        field: String,
        reason: String,
    },

    #[error("invalid date: {0}")]
    InvalidTimestamp(String),

    #[error("empty {call}() query is not supported")]
    EmptyOperandList { call: &'static str },

    #[error("{call}() requires an input bitmap")]
    InputRequired { call: &'static str },

    #[error("{call}() accepts only a single bitmap input")]
    SingleInputOnly { call: &'static str },

    #[error("tanimoto threshold is from 1 to 100 only")]
    TanimotoRange,

    #[error("Bitmap() cannot specify both '{row}' and '{column}' values")]
    BothLabels { row: String, column: String },

    #[error("Bitmap() must specify either '{row}' or '{column}' values")]
    LabelRequired { row: String, column: String },

    #[error("cannot retrieve columns unless inverse storage is enabled")]
    InverseNotEnabled,

    #[error("invalid ids argument: {0}")]
    InvalidIds(String),
}

/// Node-level failures while forwarding a query to a peer. These are the only
/// errors the map/reduce engine treats as recoverable.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connect: {0}")]
    Connect(String),

    #[error("invalid status: code={code}, err={body}")]
    Status { code: u16, body: String },

    #[error("decode: {0}")]
    Decode(String),
}
