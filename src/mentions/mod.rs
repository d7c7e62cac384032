//! `@`-mention parsing and expansion for user input.
//!
//! The turn driver runs user text through [`MentionFetcher::expand_message`]
//! before appending it to the conversation; fetched context lands in a
//! `<context>` block ahead of the cleaned message.

pub mod fetchers;
pub mod parser;

pub use fetchers::{LastErrorSlot, MentionFetcher, global_error_slot};
pub use parser::{Mention, MentionKind, estimate_expansion_size, expand, parse_mentions};
