//! `infrapilot chat` - Interactive or single-message chat mode.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use infrapilot_agent::{AgentService, EventSink, RunEvent, RunRequest};
use infrapilot_core::error::{Error as CoreError, Result as CoreResult};
use infrapilot_core::message::ThreadId;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Per-session choices from the command line.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub profile: Option<String>,
    pub thread: Option<String>,
}

impl ChatOptions {
    fn request(&self, message: &str, thread: &ThreadId) -> RunRequest {
        RunRequest {
            message: message.to_string(),
            thread_id: Some(thread.to_string()),
            provider: self.provider.clone().unwrap_or_default(),
            model: self.model.clone(),
            credential_source: None,
            tool_profile: self.profile.clone(),
        }
    }
}

fn is_exit(input: &str) -> bool {
    matches!(input.trim().to_ascii_lowercase().as_str(), "quit" | "exit" | "q" | "x")
}

/// Status line for events that are not part of the answer text.
fn describe(event: &RunEvent) -> Option<String> {
    match event {
        RunEvent::ToolResultEvent { tool_name, result, .. } => Some(if result.success {
            format!("  [{tool_name}] ok")
        } else {
            format!(
                "  [{tool_name}] failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            )
        }),
        RunEvent::RunError { message, .. } => Some(format!("  [Error] {message}")),
        _ => None,
    }
}

/// Prints answer chunks to stdout as they arrive; status goes to stderr.
struct TerminalSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl TerminalSink {
    fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out: Mutex::new(out) }
    }

    fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn write_event(&self, event: &RunEvent) -> std::io::Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| std::io::Error::other("terminal writer poisoned"))?;
        match event {
            RunEvent::MessageStarted { .. } => write!(out, "  Assistant > ")?,
            RunEvent::MessageContentChunk { delta, .. } => write!(out, "{delta}")?,
            RunEvent::MessageEnded { .. } => writeln!(out, "\n")?,
            other => {
                if let Some(line) = describe(other) {
                    eprintln!("{line}");
                }
            }
        }
        out.flush()
    }
}

#[async_trait]
impl EventSink for TerminalSink {
    async fn send(&self, event: RunEvent) -> CoreResult<()> {
        self.write_event(&event)
            .map_err(|e| CoreError::Internal(format!("terminal output failed: {e}")))?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }
}

pub async fn run(
    config_path: Option<&Path>,
    options: ChatOptions,
    message: Option<String>,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let provider = options
        .provider
        .clone()
        .unwrap_or_else(|| config.default_provider.clone());
    let service = AgentService::from_config(config);
    let thread = options
        .thread
        .as_deref()
        .map(ThreadId::from)
        .unwrap_or_default();
    let sink: Arc<dyn EventSink> = Arc::new(TerminalSink::stdout());

    if let Some(msg) = message {
        // Single message mode
        service.run(options.request(&msg, &thread), sink).await?;
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  InfraPilot Interactive Mode");
    println!();
    println!("  Provider:  {provider}");
    println!("  Profile:   {}", options.profile.as_deref().unwrap_or("infra"));
    println!("  Thread:    {thread}");
    println!();
    println!("  Type your request and press Enter.");
    println!("  Type 'quit', 'exit', 'q' or 'x' to leave.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if is_exit(&line) {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        // Run errors were already printed by the sink
        if let Err(e) = service.run(options.request(&line, &thread), sink.clone()).await {
            tracing::debug!(error = %e, "Run ended with an error");
        }
    }

    service.shutdown().await;
    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}
