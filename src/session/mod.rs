//! Conversation persistence shape. Only the serialized schema and the
//! atomic save/load pair are part of the core.

pub mod store;

pub use store::{StoredConversation, StoredMessage, load, save_atomic};
