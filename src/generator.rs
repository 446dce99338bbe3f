use crate::types::{ChainNode, NodeId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use uuid::Builder;

/// Closed range of chain lengths a generator draws from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainShape {
    #[serde(default = "default_min_len")]
    pub min_len: usize,
    #[serde(default = "default_max_len")]
    pub max_len: usize,
}

const fn default_min_len() -> usize {
    2
}

const fn default_max_len() -> usize {
    11
}

impl Default for ChainShape {
    fn default() -> Self {
        Self {
            min_len: default_min_len(),
            max_len: default_max_len(),
        }
    }
}

impl ChainShape {
    pub fn fixed(len: usize) -> Self {
        Self {
            min_len: len,
            max_len: len,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min_len >= 2 && self.min_len <= self.max_len
    }
}

/// Produces linear lineage chains from a private RNG stream.
///
/// Node `i` and node `i + 1` are joined by a freshly allocated link id: it is
/// the `child_id` of the former and the `parent_id` of the latter. Once
/// encoded, a chain of `K` nodes becomes a single directed path of
/// `2 * (K - 1)` edges.
pub struct ChainGenerator {
    shape: ChainShape,
    rng: StdRng,
}

impl ChainGenerator {
    pub fn new(shape: ChainShape) -> Self {
        Self {
            shape,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(shape: ChainShape, seed: u64) -> Self {
        Self {
            shape,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn shape(&self) -> ChainShape {
        self.shape
    }

    pub fn generate(&mut self) -> Vec<ChainNode> {
        let len = self.rng.gen_range(self.shape.min_len..=self.shape.max_len);
        let mut nodes = Vec::with_capacity(len);
        let mut parent: Option<NodeId> = None;
        for index in 0..len {
            let id = self.next_id();
            let child = (index + 1 < len).then(|| self.next_id());
            nodes.push(ChainNode {
                parent_id: parent.take(),
                id,
                child_id: child.clone(),
            });
            parent = child;
        }
        nodes
    }

    fn next_id(&mut self) -> NodeId {
        let bytes: [u8; 16] = self.rng.gen();
        NodeId(Builder::from_random_bytes(bytes).into_uuid().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn chain_endpoints_have_no_outer_links() {
        let mut gen = ChainGenerator::seeded(ChainShape::default(), 7);
        for _ in 0..64 {
            let chain = gen.generate();
            assert!((2..=11).contains(&chain.len()));
            assert!(chain[0].parent_id.is_none());
            assert!(chain[chain.len() - 1].child_id.is_none());
        }
    }

    #[test]
    fn consecutive_nodes_share_link_id() {
        let mut gen = ChainGenerator::seeded(ChainShape::fixed(5), 11);
        let chain = gen.generate();
        for pair in chain.windows(2) {
            assert!(pair[0].child_id.is_some());
            assert_eq!(pair[0].child_id, pair[1].parent_id);
        }
    }

    #[test]
    fn ids_are_not_reused_across_chains() {
        let mut gen = ChainGenerator::seeded(ChainShape::fixed(6), 3);
        let mut seen = HashSet::new();
        for _ in 0..20 {
            for node in gen.generate() {
                assert!(seen.insert(node.id.clone()));
                if let Some(child) = node.child_id {
                    assert!(seen.insert(child));
                }
            }
        }
    }

    #[test]
    fn same_seed_reproduces_chain() {
        let a = ChainGenerator::seeded(ChainShape::default(), 42).generate();
        let b = ChainGenerator::seeded(ChainShape::default(), 42).generate();
        assert_eq!(a, b);
    }

    #[test]
    fn shape_validation() {
        assert!(ChainShape::default().is_valid());
        assert!(ChainShape::fixed(2).is_valid());
        assert!(!ChainShape::fixed(1).is_valid());
        assert!(!ChainShape { min_len: 5, max_len: 4 }.is_valid());
    }
}
