//! The agent layer: the tool-calling loop and the reply parser feeding it.
//!
//! # Key types
//! - [`AgentLoop`] — drives the chat → dispatch → feed-back cycle
//! - [`LoopConfig`] — safety limits (iterations, timeout, failure budget)
//! - [`AgentEvent`] — progress notifications for the event-driven entry point
//! - [`parse_tool_calls`] — multi-dialect tool-call extraction

pub mod loop_;
pub mod tool_parser;

pub use loop_::{AgentEvent, AgentLoop, ApprovalFn, EventSink, LoopConfig, LoopState};
pub use tool_parser::{next_call_id, parse_tool_calls};
