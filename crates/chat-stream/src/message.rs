use serde::{Deserialize, Serialize};

/// Unit delivered to `StreamHandler::on_message`.
///
/// `text` is the newly visible portion of the answer. `thinking_process`, when present,
/// is the full thinking trace so far (it replaces any previously delivered trace).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_process: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<StreamMetadata>,
}

impl MessageDelta {
    /// Text-only delta.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// True when the delta carries nothing worth delivering.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.thinking_process.is_none() && self.metadata.is_none()
    }
}

/// Structured side-channel data pulled from one JSON payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retrieved_documents: Vec<RetrievedDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageStats>,
}

impl StreamMetadata {
    pub fn is_empty(&self) -> bool {
        self.tool_calls.is_empty() && self.retrieved_documents.is_empty() && self.usage.is_none()
    }

    /// Returns `None` for empty metadata so it is never attached to a delta.
    pub fn non_empty(self) -> Option<Self> {
        if self.is_empty() { None } else { Some(self) }
    }
}

/// Execution state of a tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Calling,
    Completed,
    Failed,
}

impl ToolCallStatus {
    /// Derives the status from what the record carries.
    ///
    /// Precedence: failed > completed > calling > pending.
    pub fn derive(
        has_error: bool,
        has_result: bool,
        marker: Option<ToolCallStatus>,
    ) -> ToolCallStatus {
        if has_error || marker == Some(ToolCallStatus::Failed) {
            ToolCallStatus::Failed
        } else if has_result || marker == Some(ToolCallStatus::Completed) {
            ToolCallStatus::Completed
        } else if marker == Some(ToolCallStatus::Calling) {
            ToolCallStatus::Calling
        } else {
            ToolCallStatus::Pending
        }
    }

    /// Maps an upstream status marker string onto a status.
    pub fn from_marker(marker: &str) -> Option<ToolCallStatus> {
        match marker.trim().to_ascii_lowercase().as_str() {
            "running" | "calling" | "in_progress" | "executing" => Some(ToolCallStatus::Calling),
            "failed" | "error" => Some(ToolCallStatus::Failed),
            "completed" | "success" | "done" => Some(ToolCallStatus::Completed),
            "pending" => Some(ToolCallStatus::Pending),
            _ => None,
        }
    }
}

/// One invoked tool/function as reported by the upstream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    /// Raw argument text, usually a JSON document.
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A citation returned by a retrieval step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub content: String,
    /// Relevance in `0.0..=1.0` when the upstream reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub source: String,
}

/// Token usage and model info, surfaced as reported.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl UsageStats {
    pub fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none()
            && self.completion_tokens.is_none()
            && self.total_tokens.is_none()
            && self.model.is_none()
            && self.finish_reason.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_precedence_failed_wins() {
        assert_eq!(
            ToolCallStatus::derive(true, true, Some(ToolCallStatus::Calling)),
            ToolCallStatus::Failed
        );
        assert_eq!(
            ToolCallStatus::derive(false, true, Some(ToolCallStatus::Calling)),
            ToolCallStatus::Completed
        );
        assert_eq!(
            ToolCallStatus::derive(false, false, Some(ToolCallStatus::Calling)),
            ToolCallStatus::Calling
        );
        assert_eq!(ToolCallStatus::derive(false, false, None), ToolCallStatus::Pending);
    }

    #[test]
    fn explicit_failed_marker_without_error_text() {
        let marker = ToolCallStatus::from_marker("ERROR");
        assert_eq!(
            ToolCallStatus::derive(false, true, marker),
            ToolCallStatus::Failed
        );
    }

    #[test]
    fn empty_delta_detection() {
        assert!(MessageDelta::default().is_empty());
        let delta = MessageDelta {
            thinking_process: Some("plan".into()),
            ..MessageDelta::default()
        };
        assert!(!delta.is_empty());
    }

    #[test]
    fn empty_metadata_is_dropped() {
        assert_eq!(StreamMetadata::default().non_empty(), None);
    }

    #[test]
    fn delta_serializes_without_absent_fields() {
        let delta = MessageDelta {
            text: "hi".into(),
            ..MessageDelta::default()
        };
        let json = serde_json::to_value(&delta).expect("serialize");
        assert_eq!(json, serde_json::json!({"text": "hi"}));
    }
}
