//! In-memory conversation tree and its persisted encoding.

pub mod codec;
pub mod node;

pub use codec::{DecodedTree, decode, encode, encode_empty};
pub use node::{ConversationTree, NodeId, TreeNode};
