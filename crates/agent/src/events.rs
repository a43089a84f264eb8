//! Run events streamed to clients.
//!
//! The wire form is one JSON object per event, tagged by `type` with
//! camelCase fields, so the gateway can forward each one as an SSE frame
//! without reshaping it.

use infrapilot_core::tool::ToolResult;
use serde::{Deserialize, Serialize};

/// Events emitted during one run, in this order:
///
/// `RunStarted → MessageStarted → (MessageContentChunk | ToolResultEvent)* →
/// MessageEnded → RunFinished`, or a single `RunError` replacing whatever
/// would have come next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum RunEvent {
    #[serde(rename = "RUN_STARTED")]
    RunStarted {
        run_id: String,
        thread_id: String,
        timestamp: i64,
    },

    #[serde(rename = "TEXT_MESSAGE_START")]
    MessageStarted {
        message_id: String,
        role: String,
        timestamp: i64,
    },

    #[serde(rename = "TEXT_MESSAGE_CONTENT")]
    MessageContentChunk {
        message_id: String,
        delta: String,
        timestamp: i64,
    },

    #[serde(rename = "TOOL_CALL_RESULT")]
    ToolResultEvent {
        message_id: String,
        tool_call_id: String,
        tool_name: String,
        result: ToolResult,
        timestamp: i64,
    },

    #[serde(rename = "TEXT_MESSAGE_END")]
    MessageEnded { message_id: String, timestamp: i64 },

    #[serde(rename = "RUN_FINISHED")]
    RunFinished {
        run_id: String,
        thread_id: String,
        timestamp: i64,
    },

    #[serde(rename = "RUN_ERROR")]
    RunError {
        run_id: String,
        thread_id: String,
        message: String,
        timestamp: i64,
    },
}

impl RunEvent {
    /// The `type` tag used on the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "RUN_STARTED",
            Self::MessageStarted { .. } => "TEXT_MESSAGE_START",
            Self::MessageContentChunk { .. } => "TEXT_MESSAGE_CONTENT",
            Self::ToolResultEvent { .. } => "TOOL_CALL_RESULT",
            Self::MessageEnded { .. } => "TEXT_MESSAGE_END",
            Self::RunFinished { .. } => "RUN_FINISHED",
            Self::RunError { .. } => "RUN_ERROR",
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::RunStarted { timestamp, .. }
            | Self::MessageStarted { timestamp, .. }
            | Self::MessageContentChunk { timestamp, .. }
            | Self::ToolResultEvent { timestamp, .. }
            | Self::MessageEnded { timestamp, .. }
            | Self::RunFinished { timestamp, .. }
            | Self::RunError { timestamp, .. } => *timestamp,
        }
    }

    /// `RunFinished` and `RunError` close the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunFinished { .. } | Self::RunError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_started_wire_format() {
        let event = RunEvent::RunStarted {
            run_id: "r1".into(),
            thread_id: "t1".into(),
            timestamp: 42,
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "RUN_STARTED", "runId": "r1", "threadId": "t1", "timestamp": 42})
        );
    }

    #[test]
    fn tool_result_wire_format() {
        let event = RunEvent::ToolResultEvent {
            message_id: "m1".into(),
            tool_call_id: "call_1".into(),
            tool_name: "create_s3_bucket".into(),
            result: ToolResult::failure("bucket_name is required"),
            timestamp: 7,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TOOL_CALL_RESULT");
        assert_eq!(json["toolCallId"], "call_1");
        assert_eq!(json["toolName"], "create_s3_bucket");
        assert_eq!(json["result"]["success"], false);
    }

    #[test]
    fn content_chunk_round_trips() {
        let json = r#"{"type":"TEXT_MESSAGE_CONTENT","messageId":"m","delta":"hi","timestamp":1}"#;
        let event: RunEvent = serde_json::from_str(json).unwrap();
        match &event {
            RunEvent::MessageContentChunk { delta, .. } => assert_eq!(delta, "hi"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(event.event_type(), "TEXT_MESSAGE_CONTENT");
    }

    #[test]
    fn event_type_matches_serde_tag() {
        let events = [
            RunEvent::MessageStarted { message_id: "m".into(), role: "assistant".into(), timestamp: 0 },
            RunEvent::MessageEnded { message_id: "m".into(), timestamp: 0 },
            RunEvent::RunFinished { run_id: "r".into(), thread_id: "t".into(), timestamp: 0 },
            RunEvent::RunError {
                run_id: "r".into(),
                thread_id: "t".into(),
                message: "boom".into(),
                timestamp: 0,
            },
        ];
        for event in &events {
            let json = serde_json::to_value(event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
        assert!(events[2].is_terminal());
        assert!(events[3].is_terminal());
        assert!(!events[0].is_terminal());
    }
}
