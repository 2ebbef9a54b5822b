//! Cluster topology: the node directory and slice→replica placement.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::node::Node;

/// Serializable cluster configuration: the member hosts and the replication
/// factor. Must be identical on every node, or placement disagrees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub hosts: Vec<String>,
    #[serde(default = "default_replica_n")]
    pub replica_n: usize,
}

fn default_replica_n() -> usize {
    1
}

impl From<ClusterConfig> for Cluster {
    fn from(config: ClusterConfig) -> Self {
        Cluster::new(
            config.hosts.iter().map(|h| Node::new(h)).collect(),
            config.replica_n,
        )
    }
}

/// The cluster: an ordered node directory plus deterministic placement of
/// slices onto replica sets.
#[derive(Debug, Clone)]
pub struct Cluster {
    nodes: Vec<Node>,
    replica_n: usize,
}

impl Cluster {
    pub fn new(nodes: Vec<Node>, replica_n: usize) -> Self {
        Cluster {
            nodes,
            replica_n: replica_n.max(1),
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn replica_n(&self) -> usize {
        self.replica_n
    }

    pub fn node_by_host(&self, host: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.host == host)
    }

    /// The ordered replica set holding `(index, slice)`. The first node is
    /// the primary owner; placement walks the directory from the hashed
    /// position, so every node computes the same set.
    pub fn fragment_nodes(&self, index: &str, slice: u64) -> Vec<Node> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        let key = xxh3_64(format!("{}/{}", index, slice).as_bytes());
        let start = jump_hash(key, self.nodes.len() as u32) as usize;
        let n = self.replica_n.min(self.nodes.len());
        (0..n)
            .map(|i| self.nodes[(start + i) % self.nodes.len()].clone())
            .collect()
    }
}

/// Jump consistent hash (Lamping & Veach): maps `key` onto one of
/// `num_buckets` buckets with minimal movement as the bucket count changes.
fn jump_hash(mut key: u64, num_buckets: u32) -> u32 {
    let mut b: i64 = -1;
    let mut j: i64 = 0;
    while j < num_buckets as i64 {
        b = j;
        key = key.wrapping_mul(2862933555777941757).wrapping_add(1);
        j = ((b + 1) as f64 * ((1u64 << 31) as f64 / ((key >> 33) + 1) as f64)) as i64;
    }
    b as u32
}
