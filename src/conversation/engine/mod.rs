//! Tree manager and chat turn orchestration.

pub mod manager;
pub mod turn;

pub use manager::{ConversationTreeManager, TreeBackends};
pub use turn::ChatTurns;
