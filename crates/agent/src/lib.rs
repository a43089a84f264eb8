//! The InfraPilot agent run.
//!
//! A run takes one user message through a bounded **invoke → dispatch** cycle:
//!
//! 1. **Prepare** the thread history (seed the system prompt, append the message)
//! 2. **Invoke** the model with the full history and the tool descriptors
//! 3. **If tool calls**: execute each one, append its result, loop back to step 2
//! 4. **If text**: stream it to the client in chunks and finish the run
//!
//! Every step is reported as a [`RunEvent`] through a [`RunEmitter`].

pub mod emitter;
pub mod events;
pub mod invoker;
pub mod loop_runner;
pub mod service;
pub mod threads;

#[cfg(test)]
mod test_helpers;

pub use emitter::{ChannelSink, CollectingSink, EventSink, RunEmitter, chunk_text};
pub use events::RunEvent;
pub use invoker::{Invoke, InvokerCache, InvokerKey, ModelInvoker, ModelResponse};
pub use loop_runner::{AgentLoop, RunOutcome, RunState, close_interrupted_calls, prepare_history};
pub use service::{AgentService, CatalogResolver, ProviderResolver, RunHandle, RunRequest};
pub use threads::{ThreadGuard, ThreadStore};
