//! Parsed PQL call trees.
//!
//! The executor consumes pre-parsed queries; this crate holds the tree types,
//! the heterogeneous argument values with their typed accessors, and the
//! textual rendering used when a call is forwarded to a peer node. There is
//! deliberately no parser here.

pub mod ast;

pub use ast::{has_only_set_row_attrs, needs_slices, Call, Query, Value};
