//! Cluster membership, slice→replica placement, and the peer query
//! transport for ShrikeDB.
//!
//! The executor consumes three things from here: the node directory, the
//! ordered replica set for a `(index, slice)` pair, and a [`QueryTransport`]
//! for forwarding sub-queries to peers. The production transport speaks the
//! HTTP + protobuf wire protocol; tests substitute in-process transports.

pub mod cluster;
pub mod node;
pub mod proto;
pub mod transport;

pub use cluster::{Cluster, ClusterConfig};
pub use node::{filter_host, Node};
pub use transport::{HttpTransport, QueryTransport};
