//! Pulls visible text and side-channel metadata out of the known response envelopes.
//!
//! Every supported envelope is a field path in one of the tables below; supporting a
//! new upstream shape means adding a path, not new lookup code.

use serde_json::Value;

use crate::message::{
    RetrievedDocument, StreamMetadata, ToolCallRecord, ToolCallStatus, UsageStats,
};

#[derive(Clone, Copy, Debug)]
enum Seg {
    Key(&'static str),
    Index(usize),
}

use Seg::{Index, Key};

type FieldPath = &'static [Seg];

/// Visible-text locations, in priority order. The empty path is a bare JSON string.
const TEXT_PATHS: &[FieldPath] = &[
    &[Key("result"), Key("output"), Key("text")],
    &[Key("results"), Index(0), Key("output"), Key("text")],
    &[Key("chatResponse"), Key("result"), Key("output"), Key("text")],
    &[Key("chatResponse"), Key("results"), Index(0), Key("output"), Key("text")],
    &[Key("text")],
    &[],
];

const TOOL_CALL_PATHS: &[FieldPath] = &[
    &[Key("result"), Key("output"), Key("toolCalls")],
    &[Key("results"), Index(0), Key("output"), Key("toolCalls")],
    &[Key("chatResponse"), Key("result"), Key("output"), Key("toolCalls")],
    &[Key("chatResponse"), Key("results"), Index(0), Key("output"), Key("toolCalls")],
];

const DOCUMENT_PATHS: &[FieldPath] = &[
    &[Key("context"), Key("qa_retrieved_documents")],
    &[Key("chatResponse"), Key("context"), Key("qa_retrieved_documents")],
];

/// Response-level metadata objects carrying `model` and `usage`.
const RESPONSE_METADATA_PATHS: &[FieldPath] = &[
    &[Key("chatResponse"), Key("metadata")],
    &[Key("metadata")],
];

/// Generation-level metadata objects carrying the finish reason.
const GENERATION_METADATA_PATHS: &[FieldPath] = &[
    &[Key("chatResponse"), Key("result"), Key("metadata")],
    &[Key("chatResponse"), Key("results"), Index(0), Key("metadata")],
    &[Key("result"), Key("metadata")],
    &[Key("results"), Index(0), Key("metadata")],
];

const PROMPT_TOKEN_KEYS: &[&str] = &["promptTokens", "prompt_tokens", "inputTokens", "input_tokens"];
const COMPLETION_TOKEN_KEYS: &[&str] = &[
    "completionTokens",
    "completion_tokens",
    "generationTokens",
    "outputTokens",
    "output_tokens",
];
const TOTAL_TOKEN_KEYS: &[&str] = &["totalTokens", "total_tokens"];
const FINISH_REASON_KEYS: &[&str] = &["finishReason", "finish_reason"];

/// Everything one JSON payload contributed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtractedPayload {
    /// `None` when no known text path matched; the payload may carry only metadata.
    pub text: Option<String>,
    pub metadata: StreamMetadata,
}

/// Runs every extractor over one parsed payload. Absence of one part never blocks the others.
pub fn extract(value: &Value) -> ExtractedPayload {
    ExtractedPayload {
        text: extract_text(value),
        metadata: StreamMetadata {
            tool_calls: extract_tool_calls(value),
            retrieved_documents: extract_documents(value),
            usage: extract_usage(value),
        },
    }
}

/// First text path that resolves to a string (empty strings included) wins.
pub fn extract_text(value: &Value) -> Option<String> {
    TEXT_PATHS
        .iter()
        .find_map(|path| lookup(value, path)?.as_str().map(str::to_owned))
}

pub fn extract_tool_calls(value: &Value) -> Vec<ToolCallRecord> {
    first_array(value, TOOL_CALL_PATHS)
        .map(|items| {
            items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| parse_tool_call(i, item))
                .collect()
        })
        .unwrap_or_default()
}

pub fn extract_documents(value: &Value) -> Vec<RetrievedDocument> {
    first_array(value, DOCUMENT_PATHS)
        .map(|items| {
            items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| parse_document(i, item))
                .collect()
        })
        .unwrap_or_default()
}

pub fn extract_usage(value: &Value) -> Option<UsageStats> {
    let mut usage = UsageStats::default();

    if let Some(meta) = first_object(value, RESPONSE_METADATA_PATHS) {
        usage.model = meta.get("model").and_then(Value::as_str).map(str::to_owned);
        if let Some(counts) = meta.get("usage") {
            usage.prompt_tokens = first_u64(counts, PROMPT_TOKEN_KEYS);
            usage.completion_tokens = first_u64(counts, COMPLETION_TOKEN_KEYS);
            usage.total_tokens = first_u64(counts, TOTAL_TOKEN_KEYS);
        }
    }
    if usage.total_tokens.is_none()
        && let (Some(prompt), Some(completion)) = (usage.prompt_tokens, usage.completion_tokens)
    {
        usage.total_tokens = Some(prompt.saturating_add(completion));
    }

    usage.finish_reason = GENERATION_METADATA_PATHS.iter().find_map(|path| {
        let meta = lookup(value, path)?;
        FINISH_REASON_KEYS
            .iter()
            .find_map(|key| meta.get(*key)?.as_str())
            .filter(|reason| !reason.is_empty())
            .map(str::to_owned)
    });

    if usage.is_empty() { None } else { Some(usage) }
}

fn lookup<'a>(value: &'a Value, path: &[Seg]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, seg| match seg {
        Key(key) => current.get(*key),
        Index(idx) => current.get(*idx),
    })
}

fn first_array<'a>(value: &'a Value, paths: &[FieldPath]) -> Option<&'a Vec<Value>> {
    paths
        .iter()
        .find_map(|path| lookup(value, path)?.as_array())
}

fn first_object<'a>(value: &'a Value, paths: &[FieldPath]) -> Option<&'a Value> {
    paths
        .iter()
        .find_map(|path| lookup(value, path).filter(|v| v.is_object()))
}

fn first_u64(value: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| value.get(*key)?.as_u64())
}

fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| value.get(*key)?.as_str())
}

/// Strings as-is, numbers and other JSON rendered as text, null treated as absent.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn parse_tool_call(index: usize, item: &Value) -> Option<ToolCallRecord> {
    if !item.is_object() {
        return None;
    }
    let function = item.get("function");

    let id = item
        .get("id")
        .and_then(value_text)
        .unwrap_or_else(|| format!("call_{index}"));
    let name = item
        .get("name")
        .or_else(|| function?.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let arguments = item
        .get("arguments")
        .or_else(|| function?.get("arguments"))
        .and_then(value_text)
        .unwrap_or_default();
    let result = item
        .get("result")
        .or_else(|| item.get("response"))
        .and_then(value_text);
    let error = item.get("error").and_then(|err| match err {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(_) => err.get("message").and_then(value_text),
        _ => None,
    });

    let marker = first_str(item, &["status", "state"])
        .and_then(ToolCallStatus::from_marker)
        .or_else(|| {
            ["running", "calling"]
                .iter()
                .any(|key| item.get(*key).and_then(Value::as_bool) == Some(true))
                .then_some(ToolCallStatus::Calling)
        });
    let status = ToolCallStatus::derive(error.is_some(), result.is_some(), marker);

    Some(ToolCallRecord {
        id,
        name,
        arguments,
        result,
        status,
        error,
    })
}

fn parse_document(index: usize, item: &Value) -> Option<RetrievedDocument> {
    if !item.is_object() {
        return None;
    }
    let id = ["id", "doc_id", "document_id"]
        .iter()
        .find_map(|key| item.get(*key).and_then(value_text))
        .unwrap_or_else(|| index.to_string());
    let content = first_str(item, &["content", "text", "page_content"])
        .unwrap_or_default()
        .to_string();
    let score = ["score", "relevance_score", "similarity"]
        .iter()
        .find_map(|key| item.get(*key)?.as_f64());
    let source = first_str(item, &["source", "title"])
        .or_else(|| item.get("metadata")?.get("source")?.as_str())
        .unwrap_or_default()
        .to_string();

    Some(RetrievedDocument {
        id,
        content,
        score,
        source,
    })
}
