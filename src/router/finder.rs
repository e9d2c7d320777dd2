use md5::{Digest, Md5};
use std::sync::Arc;

use crate::storage::{RecordId, ServiceAddr};
use crate::REPLICATION_FACTOR;

/// Computes the placement score of a key and node pair.
///
/// Scores must be deterministic and match bit-for-bit across processes,
/// because every service recomputes them independently and the results have
/// to agree.
pub trait Hasher: Send + Sync {
    fn hash(&self, k: RecordId, node: &ServiceAddr) -> u64;
}

/// `Hasher` reading the first eight bytes of an MD5 checksum as a
/// little-endian integer.
///
/// The checksum input is the key as four little-endian bytes followed by the
/// raw address bytes.
pub struct Md5Hasher;

impl Hasher for Md5Hasher {
    fn hash(&self, k: RecordId, node: &ServiceAddr) -> u64 {
        let mut buffer = Vec::with_capacity(4 + node.as_bytes().len());
        buffer.extend_from_slice(&k.to_le_bytes());
        buffer.extend_from_slice(node.as_bytes());

        let mut hasher = Md5::default();
        hasher.input(&buffer);
        let checksum = hasher.result();

        let mut ret = 0;
        for i in (0..8).rev() {
            ret = (ret << 8) | u64::from(checksum[i]);
        }
        ret
    }
}

/// Selects the nodes a record should be placed on.
#[derive(Clone)]
pub struct NodesFinder {
    hasher: Arc<dyn Hasher>,
}

impl NodesFinder {
    pub fn new<H: Hasher + 'static>(hasher: H) -> Self {
        NodesFinder {
            hasher: Arc::new(hasher),
        }
    }

    /// Returns the nodes that should hold the record with key `k`, at most
    /// `REPLICATION_FACTOR` of them, chosen from `nodes`.
    ///
    /// Highest-random-weight selection: every candidate scores the key and
    /// the top scores win, so a roster change only perturbs the keys whose
    /// winner changed. Equal scores break towards the lexicographically
    /// larger address so that independent services agree on the result.
    pub fn nodes_find(&self, k: RecordId, nodes: &[ServiceAddr]) -> Vec<ServiceAddr> {
        let mut scored: Vec<(u64, &ServiceAddr)> = nodes
            .iter()
            .map(|node| (self.hasher.hash(k, node), node))
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        scored.truncate(REPLICATION_FACTOR);
        scored.into_iter().map(|(_, node)| node.clone()).collect()
    }
}

impl Default for NodesFinder {
    fn default() -> Self {
        NodesFinder::new(Md5Hasher)
    }
}

#[cfg(test)]
mod tests {
    use super::{Hasher, Md5Hasher, NodesFinder};
    use crate::storage::{RecordId, ServiceAddr};
    use crate::REPLICATION_FACTOR;
    use std::cmp;

    fn roster(addrs: &[&str]) -> Vec<ServiceAddr> {
        addrs.iter().map(|addr| ServiceAddr::from(*addr)).collect()
    }

    #[test]
    fn test_hash_matches_known_checksums() {
        let hasher = Md5Hasher;
        assert_eq!(
            hasher.hash(7, &ServiceAddr::from("localhost:9001")),
            2_785_364_930_969_736_029,
        );
        assert_eq!(
            hasher.hash(7, &ServiceAddr::from("localhost:9002")),
            2_290_634_463_559_466_765,
        );
        assert_eq!(
            hasher.hash(7, &ServiceAddr::from("localhost:9003")),
            16_794_452_891_209_024_847,
        );
        assert_eq!(hasher.hash(0, &ServiceAddr::from("")), 3_636_420_594_095_870_961);
        assert_eq!(hasher.hash(42, &ServiceAddr::from("a")), 3_723_748_491_752_370_671);
        assert_eq!(
            hasher.hash(0xDEAD_BEEF, &ServiceAddr::from("node-1")),
            6_490_085_562_088_291_239,
        );
    }

    #[test]
    fn test_nodes_find_matches_known_placement() {
        let finder = NodesFinder::default();
        let nodes = roster(&[
            "localhost:9001",
            "localhost:9002",
            "localhost:9003",
            "localhost:9004",
            "localhost:9005",
        ]);

        assert_eq!(
            finder.nodes_find(7, &nodes),
            roster(&["localhost:9003", "localhost:9004", "localhost:9005"]),
        );
        assert_eq!(
            finder.nodes_find(42, &nodes),
            roster(&["localhost:9005", "localhost:9004", "localhost:9003"]),
        );
    }

    #[test]
    fn test_nodes_find_is_deterministic() {
        let finder = NodesFinder::default();
        let nodes = roster(&["a:1", "b:2", "c:3", "d:4", "e:5", "f:6"]);
        for _ in 0..100 {
            let k = rand::random::<RecordId>();
            assert_eq!(finder.nodes_find(k, &nodes), finder.nodes_find(k, &nodes));
        }
    }

    #[test]
    fn test_nodes_find_cardinality() {
        let finder = NodesFinder::default();
        let nodes = roster(&["a:1", "b:2", "c:3", "d:4", "e:5"]);
        for len in 0..nodes.len() {
            let expected = cmp::min(REPLICATION_FACTOR, len);
            assert_eq!(finder.nodes_find(7, &nodes[..len]).len(), expected);
        }
    }

    #[test]
    fn test_nodes_find_orders_by_descending_score() {
        let hasher = Md5Hasher;
        let finder = NodesFinder::default();
        let nodes = roster(&["a:1", "b:2", "c:3", "d:4", "e:5"]);
        for k in 0..50 {
            let replicas = finder.nodes_find(k, &nodes);
            let scores: Vec<u64> = replicas.iter().map(|node| hasher.hash(k, node)).collect();
            for pair in scores.windows(2) {
                assert!(pair[0] >= pair[1]);
            }
        }
    }

    struct ConstHasher;

    impl Hasher for ConstHasher {
        fn hash(&self, _k: RecordId, _node: &ServiceAddr) -> u64 {
            0
        }
    }

    #[test]
    fn test_equal_scores_break_towards_larger_address() {
        let finder = NodesFinder::new(ConstHasher);
        let nodes = roster(&["a:1", "c:3", "b:2", "d:4"]);
        assert_eq!(finder.nodes_find(7, &nodes), roster(&["d:4", "c:3", "b:2"]));
    }

    #[test]
    fn test_stability_under_addition() {
        let finder = NodesFinder::default();
        let nodes = roster(&["a:1", "b:2", "c:3", "d:4", "e:5"]);
        let mut extended = nodes.clone();
        let newcomer = ServiceAddr::from("f:6");
        extended.push(newcomer.clone());

        for _ in 0..200 {
            let k = rand::random::<RecordId>();
            let before = finder.nodes_find(k, &nodes);
            let after = finder.nodes_find(k, &extended);

            // Adding a node may only insert it and evict a single member.
            let displaced = before.iter().filter(|node| !after.contains(*node)).count();
            assert!(displaced <= 1);
            for node in &after {
                assert!(*node == newcomer || before.contains(node));
            }
        }
    }
}
