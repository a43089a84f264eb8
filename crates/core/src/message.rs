//! Message and thread history domain types.
//!
//! A thread is an opaque client-supplied id mapped to one [`MessageHistory`].
//! The history is append-only: the only ways it changes are [`MessageHistory::append`],
//! the pending-user overwrite used for client retries, and a full [`MessageHistory::clear`].

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The language model
    Assistant,
    /// Policy instructions seeded once per thread
    System,
    /// Tool execution result
    Tool,
}

/// A single message in a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content. Empty for pure tool-call assistant turns; for tool
    /// messages this is the serialized tool result.
    #[serde(default)]
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Create an assistant message that requests tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<MessageToolCall>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content.into());
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    /// Create a tool result message answering `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

/// Ordered, append-only message history of one thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHistory {
    /// The thread this history belongs to
    pub thread_id: ThreadId,

    messages: Vec<Message>,

    /// When the thread was first seen
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl MessageHistory {
    /// Create a new empty history for `thread_id`.
    pub fn new(thread_id: ThreadId) -> Self {
        let now = Utc::now();
        Self {
            thread_id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message.
    ///
    /// Tool messages must answer a tool call that is still unanswered in this
    /// history; anything else is rejected with [`Error::HistoryViolation`].
    pub fn append(&mut self, message: Message) -> Result<()> {
        if message.role == Role::Tool {
            let call_id = message.tool_call_id.as_deref().ok_or_else(|| {
                Error::HistoryViolation("tool message without a tool_call_id".into())
            })?;
            if !self.unanswered_tool_calls().iter().any(|c| c.id == call_id) {
                return Err(Error::HistoryViolation(format!(
                    "tool result for unknown or already answered call '{call_id}'"
                )));
            }
        }
        self.updated_at = Utc::now();
        self.messages.push(message);
        Ok(())
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Drop everything and reseed the history with a single system prompt.
    pub fn clear(&mut self, system_prompt: impl Into<String>) {
        self.messages.clear();
        self.messages.push(Message::system(system_prompt));
        self.updated_at = Utc::now();
    }

    /// True when the most recent message is a user turn nobody answered yet.
    pub fn pending_user(&self) -> bool {
        matches!(self.messages.last(), Some(m) if m.role == Role::User)
    }

    /// Overwrite the content of a trailing unanswered user message.
    ///
    /// Returns `false` (and changes nothing) when the last message is not a
    /// pending user turn.
    pub fn replace_pending_user(&mut self, content: impl Into<String>) -> bool {
        match self.messages.last_mut() {
            Some(last) if last.role == Role::User => {
                last.content = content.into();
                last.timestamp = Utc::now();
                self.updated_at = last.timestamp;
                true
            }
            _ => false,
        }
    }

    /// Tool calls requested by the assistant that have no tool message yet.
    pub fn unanswered_tool_calls(&self) -> Vec<&MessageToolCall> {
        let answered: HashSet<&str> = self
            .messages
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(|m| m.tool_calls.iter())
            .filter(|c| !answered.contains(c.id.as_str()))
            .collect()
    }

    /// Answer every unanswered tool call with a tool message carrying
    /// `content`. Returns the number of calls closed this way.
    pub fn close_unanswered_tool_calls(&mut self, content: &str) -> usize {
        let ids: Vec<String> = self
            .unanswered_tool_calls()
            .into_iter()
            .map(|c| c.id.clone())
            .collect();
        for id in &ids {
            self.messages.push(Message::tool_result(id, content));
        }
        if !ids.is_empty() {
            self.updated_at = Utc::now();
        }
        ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str) -> MessageToolCall {
        MessageToolCall {
            id: id.into(),
            name: name.into(),
            arguments: "{}".into(),
        }
    }

    #[test]
    fn create_user_message() {
        let msg = Message::user("Create a bucket");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Create a bucket");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn history_tracks_updates() {
        let mut history = MessageHistory::new(ThreadId::from("t1"));
        let created = history.created_at;

        history.append(Message::user("First message")).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history.updated_at >= created);
        assert_eq!(history.last_message().unwrap().content, "First message");
    }

    #[test]
    fn tool_result_must_match_unanswered_call() {
        let mut history = MessageHistory::new(ThreadId::from("t1"));
        history.append(Message::user("go")).unwrap();

        let err = history.append(Message::tool_result("call_1", "{}")).unwrap_err();
        assert!(matches!(err, Error::HistoryViolation(_)));

        history
            .append(Message::assistant_with_tools("", vec![call("call_1", "create_vpc")]))
            .unwrap();
        assert_eq!(history.unanswered_tool_calls().len(), 1);

        history.append(Message::tool_result("call_1", "{}")).unwrap();
        assert!(history.unanswered_tool_calls().is_empty());

        // Answering the same call twice is also a violation.
        let err = history.append(Message::tool_result("call_1", "{}")).unwrap_err();
        assert!(matches!(err, Error::HistoryViolation(_)));
    }

    #[test]
    fn pending_user_is_overwritten_not_appended() {
        let mut history = MessageHistory::new(ThreadId::from("t1"));
        history.append(Message::system("policy")).unwrap();
        history.append(Message::user("first try")).unwrap();
        assert!(history.pending_user());

        assert!(history.replace_pending_user("second try"));
        assert_eq!(history.len(), 2);
        assert_eq!(history.last_message().unwrap().content, "second try");
    }

    #[test]
    fn replace_pending_user_ignores_answered_turns() {
        let mut history = MessageHistory::new(ThreadId::from("t1"));
        history.append(Message::user("hi")).unwrap();
        history.append(Message::assistant("hello")).unwrap();
        assert!(!history.pending_user());
        assert!(!history.replace_pending_user("again"));
        assert_eq!(history.last_message().unwrap().content, "hello");
    }

    #[test]
    fn close_unanswered_tool_calls_answers_the_rest_of_a_batch() {
        let mut history = MessageHistory::new(ThreadId::from("t1"));
        history.append(Message::user("two buckets")).unwrap();
        history
            .append(Message::assistant_with_tools(
                "",
                vec![call("call_a", "create_s3_bucket"), call("call_b", "create_s3_bucket")],
            ))
            .unwrap();
        history.append(Message::tool_result("call_a", "{}")).unwrap();

        assert_eq!(history.close_unanswered_tool_calls("cancelled"), 1);
        assert!(history.unanswered_tool_calls().is_empty());
        let last = history.last_message().unwrap();
        assert_eq!(last.tool_call_id.as_deref(), Some("call_b"));
        assert_eq!(last.content, "cancelled");

        assert_eq!(history.close_unanswered_tool_calls("cancelled"), 0);
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn clear_keeps_only_system_prompt() {
        let mut history = MessageHistory::new(ThreadId::from("t1"));
        history.append(Message::user("a")).unwrap();
        history.append(Message::assistant("b")).unwrap();
        history.clear("policy");
        assert_eq!(history.len(), 1);
        assert_eq!(history.messages()[0].role, Role::System);
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::assistant_with_tools("", vec![call("c1", "create_s3_bucket")]);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::Assistant);
        assert_eq!(back.tool_calls[0].name, "create_s3_bucket");
    }
}
