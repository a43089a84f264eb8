//! The tool-calling orchestration loop.
//!
//! One run alternates between invoking the model and executing the tools it
//! asks for, until the model answers with plain text or the iteration cap is
//! reached:
//!
//! ```text
//! Init → Invoking → (DispatchingTools → Invoking)* → Done
//!                 ↘ Error (from any state)
//! ```
//!
//! Every model response is appended to the thread's history as-is, followed
//! by exactly one tool message per tool call. Nothing is rolled back on
//! failure, so a retry continues from where the failed run stopped. Calls a
//! run never got to are answered with a `cancelled` failure so the history
//! stays valid for the next request.

use std::sync::Arc;

use infrapilot_core::error::{Error, Result};
use infrapilot_core::message::{Message, MessageHistory};
use infrapilot_core::tool::{ToolRegistry, ToolResult};
use tracing::{debug, info, warn};

use crate::emitter::RunEmitter;
use crate::invoker::Invoke;

/// Final text used when the model goes quiet right after its tools ran.
pub const TOOLS_INITIATED_FALLBACK: &str = "I have initiated the infrastructure changes as requested.";

/// Final text used when the model answers with nothing at all.
pub const NO_RESPONSE_FALLBACK: &str = "No response generated.";

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Invoking,
    DispatchingTools,
    Done,
    Error,
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The text streamed to the client
    pub final_text: String,

    /// Model invocations made
    pub iterations: u32,

    /// Tool calls executed across all iterations
    pub tool_calls_made: usize,

    /// True when the run stopped because the iteration cap was reached
    pub hit_iteration_cap: bool,

    pub state: RunState,
}

/// Answer tool calls left open by an interrupted run with a `cancelled` failure.
pub fn close_interrupted_calls(history: &mut MessageHistory) -> usize {
    let closed = history.close_unanswered_tool_calls(&ToolResult::failure("cancelled").to_content());
    if closed > 0 {
        debug!(thread_id = %history.thread_id, closed, "Closed interrupted tool calls");
    }
    closed
}

/// Seed an empty history with the system prompt and add the user turn.
///
/// A trailing user message nobody answered (the previous run failed) is
/// overwritten instead of followed by a second user message.
pub fn prepare_history(history: &mut MessageHistory, system_prompt: &str, user_message: &str) -> Result<()> {
    close_interrupted_calls(history);
    if history.is_empty() {
        history.append(Message::system(system_prompt))?;
    }
    if history.replace_pending_user(user_message) {
        debug!(thread_id = %history.thread_id, "Overwrote unanswered user message");
        Ok(())
    } else {
        history.append(Message::user(user_message))
    }
}

/// The core agent loop that orchestrates model calls and tool execution.
pub struct AgentLoop {
    /// The model to call
    invoker: Arc<dyn Invoke>,

    /// Tools the model may call
    tools: Arc<ToolRegistry>,

    /// Maximum model invocations per run
    max_iterations: u32,

    /// Seeded into empty histories
    system_prompt: String,
}

impl AgentLoop {
    pub fn new(invoker: Arc<dyn Invoke>, tools: Arc<ToolRegistry>, system_prompt: impl Into<String>) -> Self {
        Self {
            invoker,
            tools,
            max_iterations: 5,
            system_prompt: system_prompt.into(),
        }
    }

    /// Set the maximum number of model invocations per run (at least one).
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    /// Run one user turn from `RunStarted` to its terminal event.
    ///
    /// Errors are reported to the client as `RunError` before being returned.
    /// A closed sink stops the run at the next step with [`Error::Cancelled`].
    pub async fn execute(
        &self,
        history: &mut MessageHistory,
        user_message: &str,
        emitter: &mut RunEmitter,
    ) -> Result<RunOutcome> {
        info!(
            run_id = emitter.run_id(),
            thread_id = emitter.thread_id(),
            messages = history.len(),
            "Run started"
        );

        match self.drive(history, user_message, emitter).await {
            Ok(outcome) => {
                info!(
                    run_id = emitter.run_id(),
                    iterations = outcome.iterations,
                    tool_calls = outcome.tool_calls_made,
                    "Run finished"
                );
                Ok(outcome)
            }
            Err(e) => {
                debug!(run_id = emitter.run_id(), to = ?RunState::Error, "Run state transition");
                close_interrupted_calls(history);
                if matches!(e, Error::Cancelled(_)) {
                    info!(run_id = emitter.run_id(), "Run cancelled by client");
                } else {
                    warn!(run_id = emitter.run_id(), error = %e, "Run failed");
                    if !emitter.is_finished() {
                        // Nobody may be listening anymore; the error is returned regardless.
                        let _ = emitter.run_error(e.to_string()).await;
                    }
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        history: &mut MessageHistory,
        user_message: &str,
        emitter: &mut RunEmitter,
    ) -> Result<RunOutcome> {
        let mut state = RunState::Init;
        emitter.run_started().await?;
        emitter.message_started().await?;
        prepare_history(history, &self.system_prompt, user_message)?;

        let mut iterations = 0;
        let mut tool_calls_made = 0;
        let mut previous_had_tools = false;

        let (final_text, hit_iteration_cap) = loop {
            ensure_open(emitter)?;
            iterations += 1;
            state = transition(state, RunState::Invoking, emitter);
            debug!(run_id = emitter.run_id(), iteration = iterations, "Agent loop iteration");

            let response = self.invoker.invoke(history).await?;
            history.append(response.message.clone())?;

            if !response.has_tool_calls() {
                let text = response.text();
                let final_text = if !text.trim().is_empty() {
                    text.to_string()
                } else if previous_had_tools {
                    TOOLS_INITIATED_FALLBACK.to_string()
                } else {
                    NO_RESPONSE_FALLBACK.to_string()
                };
                break (final_text, false);
            }

            state = transition(state, RunState::DispatchingTools, emitter);
            debug!(
                run_id = emitter.run_id(),
                tool_count = response.tool_calls.len(),
                "Executing tool calls"
            );

            // A batch always runs to the end; a lost client is reported after it.
            let mut send_error = None;
            for call in &response.tool_calls {
                let result = self.tools.execute(call).await;
                if !result.success {
                    warn!(
                        tool = %call.name,
                        call_id = %call.id,
                        error = result.error.as_deref().unwrap_or_default(),
                        "Tool reported failure"
                    );
                }
                history.append(Message::tool_result(&call.id, result.to_content()))?;
                if send_error.is_none() {
                    if let Err(e) = emitter.tool_result(&call.id, &call.name, &result).await {
                        send_error = Some(e);
                    }
                }
                tool_calls_made += 1;
            }
            if let Some(e) = send_error {
                return Err(e);
            }
            previous_had_tools = true;

            if iterations >= self.max_iterations {
                warn!(
                    run_id = emitter.run_id(),
                    iterations,
                    "Iteration cap reached while the model still requested tools"
                );
                break (response.text().to_string(), true);
            }
        };

        emitter.content(&final_text).await?;
        emitter.message_ended().await?;
        emitter.run_finished().await?;
        let state = transition(state, RunState::Done, emitter);

        Ok(RunOutcome {
            final_text,
            iterations,
            tool_calls_made,
            hit_iteration_cap,
            state,
        })
    }
}

fn transition(from: RunState, to: RunState, emitter: &RunEmitter) -> RunState {
    debug!(run_id = emitter.run_id(), ?from, ?to, "Run state transition");
    to
}

fn ensure_open(emitter: &RunEmitter) -> Result<()> {
    if emitter.is_closed() {
        Err(Error::Cancelled("client disconnected".into()))
    } else {
        Ok(())
    }
}
