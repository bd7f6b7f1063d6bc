//! Pulls the data payload out of one normalized event.

/// Data value that terminates the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Standard SSE fields that carry no payload for this decoder.
const IGNORED_FIELDS: [&str; 3] = ["event:", "id:", "retry:"];

/// What one event contributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventData {
    /// Newline-joined data, untrimmed.
    Data(String),
    /// The termination sentinel.
    Done,
    /// Only comments or ignored fields.
    Empty,
}

/// Collects all data fields of an event.
///
/// `data:` loses its prefix and at most one following space. Comment lines (`:`) and
/// the standard `event:`/`id:`/`retry:` fields are skipped. Any other non-empty line is
/// kept verbatim as data, since some upstreams emit raw text without a field prefix.
pub fn extract_data(event: &str) -> EventData {
    let mut fragments: Vec<&str> = Vec::new();
    for line in event.split('\n') {
        if let Some(rest) = line.strip_prefix("data:") {
            fragments.push(rest.strip_prefix(' ').unwrap_or(rest));
            continue;
        }
        if line.is_empty()
            || line.starts_with(':')
            || IGNORED_FIELDS.iter().any(|field| line.starts_with(field))
        {
            continue;
        }
        fragments.push(line);
    }

    if fragments.is_empty() {
        return EventData::Empty;
    }
    let data = fragments.join("\n");
    if data.trim() == DONE_SENTINEL {
        return EventData::Done;
    }
    EventData::Data(data)
}
