//! Cluster node identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A cluster member, identified by its host (`host:port`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub host: String,
}

impl Node {
    pub fn new(host: &str) -> Self {
        Node {
            host: host.to_string(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)
    }
}

/// All nodes except the one with the given host. Used to fan a call out to
/// the rest of the cluster.
pub fn filter_host(nodes: &[Node], host: &str) -> Vec<Node> {
    nodes.iter().filter(|n| n.host != host).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_host() {
        let nodes = vec![Node::new("a:1"), Node::new("b:1"), Node::new("c:1")];
        let rest = filter_host(&nodes, "b:1");
        assert_eq!(rest, vec![Node::new("a:1"), Node::new("c:1")]);
        assert_eq!(filter_host(&nodes, "missing"), nodes);
    }
}
