//! The agentic loop: chat → parse tool calls → dispatch → feed back.
//!
//! ```text
//! truncate(conversation) ──► provider.chat()
//!        ▲                        │
//!        │                        ▼ no tool calls? → final text
//!        │               permission check per call
//!        │                        │
//!        └── tool messages ◄── dispatch sequentially, in model order
//! ```
//!
//! The loop terminates only on a tool-free reply or one of the safety
//! limits: iteration budget, wall-clock budget, consecutive all-failed
//! iterations, cancellation, or a provider error. Tool failures never abort
//! the loop by themselves — they are formatted into tool messages and
//! counted.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::ai::context::{MessageMapping, Truncator, to_provider_messages};
use crate::ai::provider::{ChatProvider, ChunkSink};
use crate::ai::types::{ChatRequest, Conversation, Message, ToolCallRef};
use crate::error::LoopError;
use crate::tools::registry::ToolRegistry;
use crate::tools::traits::{ToolCtx, ToolOutcome};
use crate::security::Permission;
use crate::util::format_duration;

use super::tool_parser::{next_call_id, parse_tool_calls};

// ─── Configuration and state ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Iterations that may dispatch tools before the loop aborts.
    pub max_iterations: usize,
    /// Consecutive iterations where every tool call failed.
    pub max_consecutive_errors: usize,
    /// Wall-clock budget, measured from the first iteration entry.
    pub loop_timeout: Duration,
    /// How tool results are shaped for the transport.
    pub mapping: MessageMapping,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            max_consecutive_errors: 3,
            loop_timeout: Duration::from_secs(30 * 60),
            mapping: MessageMapping::default(),
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Per-run counters. Reset when a run starts and cleared on every exit
/// path.
#[derive(Debug, Clone, Default)]
pub struct LoopState {
    pub iteration: usize,
    pub consecutive_errors: usize,
    pub loop_started_at: Option<Instant>,
}

// ─── Events ───────────────────────────────────────────────────────────────────

/// Progress notifications emitted by [`AgentLoop::run_with_events`]. Event
/// order matches iteration and tool order exactly.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    ToolRequested {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolStarted {
        id: String,
        name: String,
    },
    ToolCompleted {
        id: String,
        name: String,
        success: bool,
    },
    IterationComplete {
        iteration: usize,
    },
    LoopComplete {
        iterations: usize,
    },
    Error {
        message: String,
    },
}

pub type EventSink<'a> = &'a (dyn Fn(AgentEvent) + Send + Sync);

/// Callback deciding `Ask`-gated calls: `(tool_name, arguments) → approved`.
/// Without one configured, `Ask` resolves to denial.
pub type ApprovalFn = Arc<dyn Fn(&str, &Value) -> bool + Send + Sync>;

// ─── AgentLoop ────────────────────────────────────────────────────────────────

/// Single-turn driver. The conversation is owned by the caller and shared
/// here for appends; counters live behind a mutex that is never held across
/// an await.
pub struct AgentLoop {
    registry: Arc<ToolRegistry>,
    truncator: Arc<Truncator>,
    base_ctx: ToolCtx,
    conversation: Arc<Mutex<Conversation>>,
    config: LoopConfig,
    state: Mutex<LoopState>,
    approval: Option<ApprovalFn>,
}

impl AgentLoop {
    pub fn new(
        registry: Arc<ToolRegistry>,
        truncator: Arc<Truncator>,
        base_ctx: ToolCtx,
        conversation: Arc<Mutex<Conversation>>,
        config: LoopConfig,
    ) -> Self {
        Self {
            registry,
            truncator,
            base_ctx,
            conversation,
            config,
            state: Mutex::new(LoopState::default()),
            approval: None,
        }
    }

    /// Attach an approval callback for `Ask`-gated tool calls.
    pub fn with_approval(mut self, approval: ApprovalFn) -> Self {
        self.approval = Some(approval);
        self
    }

    /// Snapshot of the per-run counters.
    pub fn state(&self) -> LoopState {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    // ── Entry points ──────────────────────────────────────────────────────────

    /// Run one turn to completion and return the final assistant text.
    #[tracing::instrument(name = "agent.run", skip_all)]
    pub async fn run(
        &self,
        cancel: CancellationToken,
        provider: &dyn ChatProvider,
    ) -> Result<String, LoopError> {
        self.run_inner(cancel, provider, None, None).await
    }

    /// Same contract as [`run`](Self::run), additionally reporting partial
    /// assistant text through `on_chunk`.
    #[tracing::instrument(name = "agent.run_streaming", skip_all)]
    pub async fn run_streaming(
        &self,
        cancel: CancellationToken,
        provider: &dyn ChatProvider,
        on_chunk: ChunkSink<'_>,
    ) -> Result<String, LoopError> {
        self.run_inner(cancel, provider, Some(on_chunk), None).await
    }

    /// Same contract as [`run`](Self::run), additionally emitting
    /// [`AgentEvent`]s in iteration/tool order.
    #[tracing::instrument(name = "agent.run_with_events", skip_all)]
    pub async fn run_with_events(
        &self,
        cancel: CancellationToken,
        provider: &dyn ChatProvider,
        on_event: EventSink<'_>,
    ) -> Result<String, LoopError> {
        self.run_inner(cancel, provider, None, Some(on_event)).await
    }

    // ── Core loop ─────────────────────────────────────────────────────────────

    async fn run_inner(
        &self,
        cancel: CancellationToken,
        provider: &dyn ChatProvider,
        on_chunk: Option<ChunkSink<'_>>,
        on_event: Option<EventSink<'_>>,
    ) -> Result<String, LoopError> {
        if let Ok(mut state) = self.state.lock() {
            *state = LoopState {
                loop_started_at: Some(Instant::now()),
                ..Default::default()
            };
        }

        let result = self.drive(&cancel, provider, on_chunk, on_event).await;

        if let Err(e) = &result {
            emit(on_event, AgentEvent::Error {
                message: e.to_string(),
            });
        }
        // Counters are cleared on every exit path.
        if let Ok(mut state) = self.state.lock() {
            *state = LoopState::default();
        }
        result
    }

    async fn drive(
        &self,
        cancel: &CancellationToken,
        provider: &dyn ChatProvider,
        on_chunk: Option<ChunkSink<'_>>,
        on_event: Option<EventSink<'_>>,
    ) -> Result<String, LoopError> {
        let started = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Err(LoopError::ContextCancelled);
            }
            if started.elapsed() > self.config.loop_timeout {
                return Err(LoopError::LoopTimeout(self.config.loop_timeout));
            }

            let iteration = {
                let mut state = self
                    .state
                    .lock()
                    .map_err(|_| LoopError::Chat("loop state poisoned".into()))?;
                state.iteration += 1;
                state.iteration
            };

            // ── Model call on a snapshot, lock released first ─────────────
            let snapshot = self
                .conversation
                .lock()
                .map_err(|_| LoopError::Chat("conversation lock poisoned".into()))?
                .clone();
            let truncated = self.truncator.truncate(&snapshot).await;
            let messages = to_provider_messages(&truncated, self.config.mapping);

            let mut request =
                ChatRequest::new(messages).with_tools(self.registry.schemas());
            request.temperature = self.config.temperature;
            request.max_tokens = self.config.max_tokens;

            let response = tokio::select! {
                r = async {
                    match on_chunk {
                        Some(sink) => provider.chat_streaming(request, sink).await,
                        None => provider.chat(request).await,
                    }
                } => r.map_err(LoopError::Chat)?,
                _ = cancel.cancelled() => return Err(LoopError::ContextCancelled),
            };

            // Prefer calls the transport extracted; otherwise parse the
            // reply text.
            let mut calls = response.tool_calls.clone();
            if calls.is_empty() {
                calls = parse_tool_calls(&response.content);
            }
            for call in &mut calls {
                if call.id.is_empty() {
                    call.id = next_call_id();
                }
            }

            if calls.is_empty() {
                self.append(Message::assistant(response.content.clone()))?;
                emit(on_event, AgentEvent::LoopComplete { iterations: iteration });
                return Ok(response.content);
            }

            // A tool-bearing reply past the budget aborts; a final tool-free
            // reply above is always allowed through.
            if iteration > self.config.max_iterations {
                return Err(LoopError::MaxIterationsReached {
                    max: self.config.max_iterations,
                });
            }

            self.append(Message::assistant_with_calls(
                response.content.clone(),
                calls.clone(),
            ))?;
            for call in &calls {
                emit(on_event, AgentEvent::ToolRequested {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                });
            }

            // ── Sequential dispatch, in model order ───────────────────────
            let mut any_succeeded = false;
            for call in &calls {
                if cancel.is_cancelled() {
                    // Completed tool messages stay; the rest never run.
                    return Err(LoopError::ContextCancelled);
                }

                emit(on_event, AgentEvent::ToolStarted {
                    id: call.id.clone(),
                    name: call.name.clone(),
                });

                let outcome = self.dispatch(cancel, call).await;
                any_succeeded |= outcome.success;

                emit(on_event, AgentEvent::ToolCompleted {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    success: outcome.success,
                });

                self.append(Message::tool(
                    call.id.clone(),
                    format_tool_message(&call.name, &call.id, &outcome),
                ))?;
            }

            emit(on_event, AgentEvent::IterationComplete { iteration });

            // ── Consecutive-failure accounting ────────────────────────────
            let consecutive = {
                let mut state = self
                    .state
                    .lock()
                    .map_err(|_| LoopError::Chat("loop state poisoned".into()))?;
                if any_succeeded {
                    state.consecutive_errors = 0;
                } else {
                    state.consecutive_errors += 1;
                }
                state.consecutive_errors
            };
            if consecutive >= self.config.max_consecutive_errors {
                return Err(LoopError::ConsecutiveToolFailures { count: consecutive });
            }
        }
    }

    /// Permission-check and execute a single call under a derived context.
    async fn dispatch(&self, cancel: &CancellationToken, call: &ToolCallRef) -> ToolOutcome {
        match self.registry.permission_for(&call.name, &call.arguments) {
            Permission::Never => {
                return ToolOutcome::fail(format!(
                    "tool '{}' is not permitted by the security policy",
                    call.name
                ));
            }
            Permission::Ask => {
                let approved = self
                    .approval
                    .as_ref()
                    .map(|f| f(&call.name, &call.arguments))
                    .unwrap_or(false);
                if !approved {
                    return ToolOutcome::fail(format!(
                        "tool '{}' requires user approval and none was granted",
                        call.name
                    ));
                }
            }
            Permission::Auto => {}
        }

        let Some(tool) = self.registry.get(&call.name) else {
            return ToolOutcome::fail(format!("tool '{}' is not registered", call.name));
        };

        let ctx = self.base_ctx.clone().with_cancel(cancel.child_token());
        tool.execute(&ctx, &call.arguments).await
    }

    fn append(&self, message: Message) -> Result<(), LoopError> {
        self.conversation
            .lock()
            .map_err(|_| LoopError::Chat("conversation lock poisoned".into()))?
            .push(message);
        Ok(())
    }
}

fn emit(sink: Option<EventSink<'_>>, event: AgentEvent) {
    if let Some(sink) = sink {
        sink(event);
    }
}

// ─── Tool message formatting ──────────────────────────────────────────────────

/// Render a tool outcome into the message fed back to the model.
pub fn format_tool_message(name: &str, id: &str, outcome: &ToolOutcome) -> String {
    let mut text = if outcome.success {
        let output = outcome
            .output
            .as_deref()
            .filter(|o| !o.is_empty())
            .unwrap_or("(no output)");
        format!("Tool '{name}' (id: {id}) completed successfully.\n\nOutput:\n{output}")
    } else {
        let error = outcome
            .error
            .as_deref()
            .filter(|e| !e.is_empty())
            .unwrap_or("(unknown error)");
        format!("Tool '{name}' (id: {id}) failed.\n\nError:\n{error}")
    };

    text.push_str(&format!("\n\nDuration: {}", format_duration(outcome.duration)));
    if outcome.truncated {
        text.push_str("\n(output was truncated)");
    }
    text
}

// ─── Tests ────────────────────────────────────────────────────────────────────
