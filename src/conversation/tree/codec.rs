//! Persisted form of a [`ConversationTree`].
//!
//! The blob is a flat JSON document listing nodes in pre-order, each with the index of
//! its parent:
//!
//! ```json
//! {"version":1,"nodes":[{"message_id":"…","parent":null},{"message_id":"…","parent":0}]}
//! ```
//!
//! Because a parent always precedes its children and siblings appear in creation order,
//! replaying the list with `append_child` rebuilds the exact shape. The flat layout keeps
//! decoding independent of tree depth.

use serde::{Deserialize, Serialize};

use crate::conversation::core::errors::{ChatError, ChatResult};
use crate::conversation::core::ids::MessageId;
use crate::conversation::tree::node::{ConversationTree, NodeId};

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Result of decoding a stored blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodedTree {
    /// No message committed yet.
    Empty,
    /// A tree with at least its root.
    Root(ConversationTree),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EncodedTree {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    nodes: Vec<EncodedNode>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EncodedNode {
    #[serde(default)]
    message_id: Option<MessageId>,
    #[serde(default)]
    parent: Option<usize>,
}

/// Blob stored for a conversation that has no message yet.
#[must_use]
pub fn encode_empty() -> String {
    "{}".to_string()
}

/// Serialize the whole tree.
///
/// # Errors
/// Returns an error if JSON serialization fails.
pub fn encode(tree: &ConversationTree) -> ChatResult<String> {
    let order = tree.preorder();
    let mut position = vec![0_usize; tree.len()];
    for (pos, node) in order.iter().enumerate() {
        position[node.index()] = pos;
    }

    let nodes = order
        .iter()
        .map(|&node| EncodedNode {
            message_id: tree.message_id(node),
            parent: tree.parent_of(node).map(|parent| position[parent.index()]),
        })
        .collect();

    let encoded = EncodedTree {
        version: Some(FORMAT_VERSION),
        nodes,
    };
    Ok(serde_json::to_string(&encoded)?)
}

/// Parse a stored blob.
///
/// Absent or blank input, `{}`, an empty node list and a root without a message id all
/// decode to [`DecodedTree::Empty`].
///
/// # Errors
/// Returns `Decode` if the blob cannot be parsed or violates the node-list invariants.
pub fn decode(blob: Option<&str>) -> ChatResult<DecodedTree> {
    let Some(blob) = blob.map(str::trim).filter(|b| !b.is_empty()) else {
        return Ok(DecodedTree::Empty);
    };

    let encoded: EncodedTree =
        serde_json::from_str(blob).map_err(|err| ChatError::Decode(err.to_string()))?;

    if let Some(version) = encoded.version {
        if version != FORMAT_VERSION {
            return Err(ChatError::Decode(format!(
                "unsupported format version {version}"
            )));
        }
    }

    let mut nodes = encoded.nodes.into_iter().enumerate();
    let Some((_, root)) = nodes.next() else {
        return Ok(DecodedTree::Empty);
    };
    if root.parent.is_some() {
        return Err(ChatError::Decode("root node has a parent".to_string()));
    }
    let Some(root_message) = root.message_id else {
        return Ok(DecodedTree::Empty);
    };

    let mut tree = ConversationTree::with_root(root_message);
    let mut handles: Vec<NodeId> = vec![tree.root()];
    for (pos, node) in nodes {
        let message_id = node
            .message_id
            .ok_or_else(|| ChatError::Decode(format!("node {pos} has no message_id")))?;
        let parent = node
            .parent
            .ok_or_else(|| ChatError::Decode(format!("node {pos} has no parent")))?;
        let parent_handle = handles.get(parent).copied().ok_or_else(|| {
            ChatError::Decode(format!(
                "node {pos} refers to parent {parent} which does not precede it"
            ))
        })?;
        handles.push(tree.append_child(parent_handle, message_id)?);
    }

    Ok(DecodedTree::Root(tree))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branching_tree() -> ConversationTree {
        let mut tree = ConversationTree::with_root(MessageId::new());
        let a = tree.append_child(tree.root(), MessageId::new()).unwrap();
        let b = tree.append_child(tree.root(), MessageId::new()).unwrap();
        tree.append_child(a, MessageId::new()).unwrap();
        tree.append_child(b, MessageId::new()).unwrap();
        tree.append_child(a, MessageId::new()).unwrap();
        tree
    }

    #[test]
    fn test_roundtrip_preserves_shape() {
        let tree = branching_tree();
        let blob = encode(&tree).unwrap();
        assert_eq!(decode(Some(&blob)).unwrap(), DecodedTree::Root(tree));
    }

    #[test]
    fn test_deep_chain_roundtrip() {
        let mut tree = ConversationTree::with_root(MessageId::new());
        let mut tip = tree.root();
        for _ in 0..1_000 {
            tip = tree.append_child(tip, MessageId::new()).unwrap();
        }
        let blob = encode(&tree).unwrap();
        match decode(Some(&blob)).unwrap() {
            DecodedTree::Root(decoded) => {
                assert_eq!(decoded.len(), 1_001);
                assert_eq!(decoded, tree);
            }
            DecodedTree::Empty => panic!("expected a tree"),
        }
    }

    #[test]
    fn test_empty_forms() {
        assert_eq!(decode(None).unwrap(), DecodedTree::Empty);
        assert_eq!(decode(Some("  ")).unwrap(), DecodedTree::Empty);
        assert_eq!(decode(Some(&encode_empty())).unwrap(), DecodedTree::Empty);
        assert_eq!(
            decode(Some(r#"{"version":1,"nodes":[]}"#)).unwrap(),
            DecodedTree::Empty
        );
        assert_eq!(
            decode(Some(r#"{"nodes":[{"parent":null}]}"#)).unwrap(),
            DecodedTree::Empty
        );
    }

    #[test]
    fn test_unparsable_blob_is_an_error() {
        assert!(matches!(
            decode(Some("{not json")),
            Err(ChatError::Decode(_))
        ));
        assert!(matches!(decode(Some("[1,2]")), Err(ChatError::Decode(_))));
    }

    #[test]
    fn test_structural_violations() {
        let id = MessageId::new();
        let cases = [
            format!(r#"{{"nodes":[{{"message_id":"{id}","parent":0}}]}}"#),
            format!(r#"{{"nodes":[{{"message_id":"{id}"}},{{"parent":0}}]}}"#),
            format!(r#"{{"nodes":[{{"message_id":"{id}"}},{{"message_id":"{id}"}}]}}"#),
            format!(
                r#"{{"nodes":[{{"message_id":"{id}"}},{{"message_id":"{}","parent":1}}]}}"#,
                MessageId::new()
            ),
            format!(r#"{{"version":7,"nodes":[{{"message_id":"{id}"}}]}}"#),
        ];
        for case in cases {
            assert!(
                matches!(decode(Some(&case)), Err(ChatError::Decode(_))),
                "accepted {case}"
            );
        }
    }

    #[test]
    fn test_encoding_is_preorder() {
        let tree = branching_tree();
        let blob = encode(&tree).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&blob).unwrap();
        let parents: Vec<Option<u64>> = raw["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["parent"].as_u64())
            .collect();
        assert_eq!(parents, vec![None, Some(0), Some(1), Some(1), Some(0), Some(4)]);
    }
}
