//! Splits the raw byte stream into SSE events.

const CRLF_CRLF: &[u8] = b"\r\n\r\n";
const LF_LF: &[u8] = b"\n\n";
const CR_CR: &[u8] = b"\r\r";

/// Append-only byte buffer that yields complete events.
///
/// Works on bytes so a multi-byte UTF-8 character split across chunks is only
/// decoded once its event is complete.
#[derive(Debug, Default)]
pub struct EventFramer {
    buf: Vec<u8>,
}

impl EventFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every event completed by it, in order.
    ///
    /// Returned events are line-ending normalized (`\r\n` and `\r` become `\n`).
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some((idx, delim_len)) = find_event_delimiter(&self.buf) {
            let event_bytes: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            if let Some(event) = normalize_event(&event_bytes) {
                events.push(event);
            }
        }
        events
    }

    /// Takes whatever is left once the source has ended, as a final event.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        normalize_event(&rest)
    }

    /// Number of bytes waiting for a delimiter.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

/// Finds the earliest blank-line delimiter, returning `(start, len)`.
///
/// All three delimiters are checked at every position so the earliest one wins
/// regardless of which kind it is.
pub(crate) fn find_event_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    (0..buf.len()).find_map(|i| {
        let rest = &buf[i..];
        [CRLF_CRLF, LF_LF, CR_CR]
            .into_iter()
            .find(|delim| rest.starts_with(delim))
            .map(|delim| (i, delim.len()))
    })
}

fn normalize_event(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    Some(text.replace("\r\n", "\n").replace('\r', "\n"))
}
