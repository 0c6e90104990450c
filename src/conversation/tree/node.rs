//! Arena-backed conversation tree.
//!
//! Nodes live in a `Vec` and refer to each other by [`NodeId`] index. Node `0` is the
//! root; nodes are only ever appended, so every node in the arena is reachable from it.

use std::fmt;

use crate::conversation::core::errors::{ChatError, ChatResult};
use crate::conversation::core::ids::MessageId;

/// Handle to a node inside one [`ConversationTree`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Arena index of the node.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One exchanged message inside the tree.
#[derive(Clone, Debug)]
pub struct TreeNode {
    message_id: MessageId,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl TreeNode {
    /// Referenced message.
    #[must_use]
    pub const fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Parent node, `None` for the root.
    #[must_use]
    pub const fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in branch creation order.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Whether this node is the tip of a branch.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A non-empty branching conversation.
#[derive(Clone, Debug)]
pub struct ConversationTree {
    nodes: Vec<TreeNode>,
}

impl ConversationTree {
    /// Create a tree holding only its root.
    #[must_use]
    pub fn with_root(message_id: MessageId) -> Self {
        Self {
            nodes: vec![TreeNode {
                message_id,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// The root node.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a tree has at least its root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `node` is a handle into this tree.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        node.0 < self.nodes.len()
    }

    /// Borrow a node.
    #[must_use]
    pub fn node(&self, node: NodeId) -> Option<&TreeNode> {
        self.nodes.get(node.0)
    }

    /// Message referenced by `node`.
    #[must_use]
    pub fn message_id(&self, node: NodeId) -> Option<MessageId> {
        self.node(node).map(TreeNode::message_id)
    }

    /// Parent of `node`.
    #[must_use]
    pub fn parent_of(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).and_then(TreeNode::parent)
    }

    /// Children of `node`, empty for unknown handles.
    #[must_use]
    pub fn children_of(&self, node: NodeId) -> &[NodeId] {
        self.node(node).map_or(&[], TreeNode::children)
    }

    /// Append a new last child under `parent`.
    ///
    /// # Errors
    /// Returns `DetachedNode` if `parent` is not part of this tree.
    pub fn append_child(&mut self, parent: NodeId, message_id: MessageId) -> ChatResult<NodeId> {
        if !self.contains(parent) {
            return Err(ChatError::DetachedNode(parent.0));
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(TreeNode {
            message_id,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// Nodes in pre-order (parent before children, children in creation order).
    #[must_use]
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(node) = stack.pop() {
            order.push(node);
            stack.extend(self.children_of(node).iter().rev().copied());
        }
        order
    }

    /// Pre-order walk paired with each node's depth, computed in the same pass.
    #[must_use]
    pub fn preorder_with_depth(&self) -> Vec<(NodeId, usize)> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root(), 0)];
        while let Some((node, depth)) = stack.pop() {
            order.push((node, depth));
            stack.extend(
                self.children_of(node)
                    .iter()
                    .rev()
                    .map(|&child| (child, depth + 1)),
            );
        }
        order
    }

    /// First node in pre-order referencing `message_id`.
    #[must_use]
    pub fn find(&self, message_id: MessageId) -> Option<NodeId> {
        self.preorder()
            .into_iter()
            .find(|node| self.nodes[node.0].message_id == message_id)
    }

    /// Message ids from the root down to `node`, inclusive.
    ///
    /// # Errors
    /// Returns `DetachedNode` if `node` is not part of this tree.
    pub fn path_to(&self, node: NodeId) -> ChatResult<Vec<MessageId>> {
        if !self.contains(node) {
            return Err(ChatError::DetachedNode(node.0));
        }
        let mut path = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            let entry = &self.nodes[id.0];
            path.push(entry.message_id);
            current = entry.parent;
        }
        path.reverse();
        Ok(path)
    }

    /// Depth of `node` (root is `0`).
    #[must_use]
    pub fn depth(&self, node: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.parent_of(node);
        while let Some(id) = current {
            depth += 1;
            current = self.parent_of(id);
        }
        depth
    }

    /// Branch tips in pre-order.
    #[must_use]
    pub fn leaves(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|node| self.nodes[node.0].is_leaf())
            .collect()
    }
}

/// Structural equality: same shape, child order and message ids, regardless of arena layout.
impl PartialEq for ConversationTree {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let mut pending = vec![(self.root(), other.root())];
        while let Some((mine, theirs)) = pending.pop() {
            let (a, b) = (&self.nodes[mine.0], &other.nodes[theirs.0]);
            if a.message_id != b.message_id || a.children.len() != b.children.len() {
                return false;
            }
            pending.extend(a.children.iter().copied().zip(b.children.iter().copied()));
        }
        true
    }
}

impl Eq for ConversationTree {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_follows_branch() {
        let (m1, m2, m3, m4) = (
            MessageId::new(),
            MessageId::new(),
            MessageId::new(),
            MessageId::new(),
        );
        let mut tree = ConversationTree::with_root(m1);
        let n2 = tree.append_child(tree.root(), m2).unwrap();
        let n3 = tree.append_child(tree.root(), m3).unwrap();
        let n4 = tree.append_child(n2, m4).unwrap();

        assert_eq!(tree.path_to(n4).unwrap(), vec![m1, m2, m4]);
        assert_eq!(tree.path_to(n3).unwrap(), vec![m1, m3]);
        assert_eq!(tree.children_of(tree.root()), &[n2, n3]);
        assert_eq!(tree.depth(n4), 2);
    }

    #[test]
    fn test_preorder_and_leaves() {
        let ids: Vec<MessageId> = (0..5).map(|_| MessageId::new()).collect();
        let mut tree = ConversationTree::with_root(ids[0]);
        let a = tree.append_child(tree.root(), ids[1]).unwrap();
        let b = tree.append_child(tree.root(), ids[2]).unwrap();
        let a1 = tree.append_child(a, ids[3]).unwrap();
        let b1 = tree.append_child(b, ids[4]).unwrap();

        assert_eq!(tree.preorder(), vec![tree.root(), a, a1, b, b1]);
        assert_eq!(tree.leaves(), vec![a1, b1]);
        assert_eq!(tree.find(ids[4]), Some(b1));
        assert_eq!(tree.find(MessageId::new()), None);
    }

    #[test]
    fn test_preorder_with_depth_matches_depth() {
        let ids: Vec<MessageId> = (0..4).map(|_| MessageId::new()).collect();
        let mut tree = ConversationTree::with_root(ids[0]);
        let a = tree.append_child(tree.root(), ids[1]).unwrap();
        let a1 = tree.append_child(a, ids[2]).unwrap();
        let b = tree.append_child(tree.root(), ids[3]).unwrap();

        let walked = tree.preorder_with_depth();
        assert_eq!(walked, vec![(tree.root(), 0), (a, 1), (a1, 2), (b, 1)]);
        let nodes: Vec<NodeId> = walked.iter().map(|&(node, _)| node).collect();
        assert_eq!(nodes, tree.preorder());
        assert!(walked.iter().all(|&(node, depth)| tree.depth(node) == depth));
    }

    #[test]
    fn test_detached_handles_are_rejected() {
        let mut small = ConversationTree::with_root(MessageId::new());
        let mut big = ConversationTree::with_root(MessageId::new());
        let far = big.append_child(big.root(), MessageId::new()).unwrap();

        assert!(matches!(
            small.append_child(far, MessageId::new()),
            Err(ChatError::DetachedNode(1))
        ));
        assert!(small.path_to(far).is_err());
        assert_eq!(small.len(), 1);
    }

    #[test]
    fn test_equality_ignores_arena_layout() {
        let (r, a, b, a1) = (
            MessageId::new(),
            MessageId::new(),
            MessageId::new(),
            MessageId::new(),
        );
        let mut first = ConversationTree::with_root(r);
        let fa = first.append_child(first.root(), a).unwrap();
        first.append_child(first.root(), b).unwrap();
        first.append_child(fa, a1).unwrap();

        let mut second = ConversationTree::with_root(r);
        let sa = second.append_child(second.root(), a).unwrap();
        second.append_child(sa, a1).unwrap();
        second.append_child(second.root(), b).unwrap();

        assert_eq!(first, second);

        let mut swapped = ConversationTree::with_root(r);
        swapped.append_child(swapped.root(), b).unwrap();
        let wa = swapped.append_child(swapped.root(), a).unwrap();
        swapped.append_child(wa, a1).unwrap();
        assert_ne!(first, swapped);
    }
}
