//! Wire types for the bidirectional session protocol (spec §6).
//!
//! Framed as `{ "type": "...", ...fields }` JSON over WebSocket: an
//! internally-tagged enum is the natural serde representation for a message
//! family where most variants carry kind-specific fields rather than a
//! single uniform payload.

use crate::entities::PermissionTier;
use serde::{Deserialize, Serialize};

/// Messages a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Initiates a new workflow cycle in an `idle` session.
    Chat { content: String },
    /// Answers an outstanding `user_question`.
    #[serde(rename_all = "camelCase")]
    UserResponse {
        question_id: String,
        content: serde_json::Value,
    },
    /// Answers an outstanding `permission_request`.
    #[serde(rename_all = "camelCase")]
    PermissionResponse {
        request_id: String,
        granted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<String>,
    },
    /// Out-of-band feedback absorbed by the Optimizer (§4.8).
    Feedback { content: String },
}

/// Messages the server sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Beginning of a response turn.
    Start {},
    /// Streamed LLM output (Designer or Optimizer phases).
    Chunk { content: String },
    /// Emitted after successful design.
    WorkflowDesign { template: serde_json::Value },
    /// Emitted before each step begins.
    #[serde(rename_all = "camelCase")]
    WorkflowProgress {
        step_index: usize,
        total_steps: usize,
        step_name: String,
        node_name: String,
        description: String,
    },
    /// Emitted after a step completes successfully.
    #[serde(rename_all = "camelCase")]
    NodeComplete {
        step_name: String,
        result: serde_json::Value,
    },
    /// Emitted after a step fails.
    #[serde(rename_all = "camelCase")]
    NodeError {
        step_name: String,
        error_kind: String,
        message: String,
    },
    /// Emitted when a user-interaction node suspends the session.
    #[serde(rename_all = "camelCase")]
    UserQuestion {
        question_id: String,
        question: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        fields: Option<serde_json::Value>,
    },
    /// Emitted when a sensitive/critical node requires sign-off.
    #[serde(rename_all = "camelCase")]
    PermissionRequest {
        request_id: String,
        operation: String,
        description: String,
        reason: String,
        tier: PermissionTier,
        expires_at: chrono::DateTime<chrono::Utc>,
    },
    /// End of a response turn.
    End {
        status: SessionEndStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
}

/// Terminal status reported in an `end` outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndStatus {
    Ok,
    Failed,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_chat_round_trips() {
        let msg = InboundMessage::Chat {
            content: "book me a flight to Tokyo".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"chat\""));
        let back: InboundMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn permission_response_omits_absent_response_field() {
        let msg = InboundMessage::PermissionResponse {
            request_id: "abc".to_string(),
            granted: true,
            response: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("response"));
    }

    #[test]
    fn outbound_end_round_trips() {
        let msg = OutboundMessage::End {
            status: SessionEndStatus::Ok,
            summary: Some("booked".to_string()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: OutboundMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn outbound_tag_uses_snake_case_type_field() {
        let msg = OutboundMessage::WorkflowProgress {
            step_index: 0,
            total_steps: 3,
            step_name: "search".to_string(),
            node_name: "web_search".to_string(),
            description: "searching flights".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "workflow_progress");
        assert_eq!(json["stepIndex"], 0);
    }
}
