//! The distributed query executor.
//!
//! Receives a parsed query and evaluates it across the cluster: read calls
//! run through a two-level map/reduce (call → per-node batch → per-slice
//! local map) with replica failover; mutations fan out to the replica set of
//! the target slice (bit operations) or to every cluster member (attribute
//! writes). A forwarded sub-query carries `remote = true` and restricts its
//! candidate node set to the local node, which bounds distributed call depth
//! at two hops.

mod executor;
mod executor_bitmap;
mod executor_mutate;
mod executor_topn;
mod map_reduce;

#[cfg(test)]
mod tests;

pub use executor::{ExecOptions, Executor};
