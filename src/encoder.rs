use crate::types::{ChainNode, EdgeStatement};

/// Maps a node to its incoming and outgoing `related_through` edges.
pub fn encode(node: &ChainNode) -> Vec<EdgeStatement> {
    let mut out = Vec::with_capacity(2);
    if let Some(parent) = node.parent_id.as_ref().filter(|p| !p.is_empty()) {
        out.push(EdgeStatement::related_through(parent.clone(), node.id.clone()));
    }
    if let Some(child) = node.child_id.as_ref().filter(|c| !c.is_empty()) {
        out.push(EdgeStatement::related_through(node.id.clone(), child.clone()));
    }
    out
}

pub fn encode_chain(chain: &[ChainNode]) -> Vec<EdgeStatement> {
    chain.iter().flat_map(encode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{ChainGenerator, ChainShape};
    use crate::types::{NodeId, PREDICATE_RELATED_THROUGH};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn id(s: &str) -> NodeId {
        NodeId(s.into())
    }

    #[test]
    fn endpoint_nodes_emit_one_edge() {
        let head = ChainNode {
            parent_id: None,
            id: id("n0"),
            child_id: Some(id("l0")),
        };
        let tail = ChainNode {
            parent_id: Some(id("l0")),
            id: id("n1"),
            child_id: None,
        };
        assert_eq!(encode(&head), vec![EdgeStatement::related_through(id("n0"), id("l0"))]);
        assert_eq!(encode(&tail), vec![EdgeStatement::related_through(id("l0"), id("n1"))]);
    }

    #[test]
    fn empty_sentinel_is_treated_as_absent() {
        let node = ChainNode {
            parent_id: Some(id("")),
            id: id("n"),
            child_id: Some(id("")),
        };
        assert!(encode(&node).is_empty());
    }

    proptest! {
        #[test]
        fn chain_encodes_to_single_directed_path(seed in any::<u64>(), len in 2usize..=11) {
            let chain = ChainGenerator::seeded(ChainShape::fixed(len), seed).generate();
            let edges = encode_chain(&chain);
            prop_assert_eq!(edges.len(), 2 * (len - 1));
            for e in &edges {
                prop_assert_eq!(e.predicate.as_str(), PREDICATE_RELATED_THROUGH);
                prop_assert_ne!(&e.subject, &e.object);
                prop_assert!(e.label.is_none());
            }
            for pair in edges.windows(2) {
                prop_assert_eq!(&pair[0].object, &pair[1].subject);
            }
        }
    }
}
