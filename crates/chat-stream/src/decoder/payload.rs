//! Buffers data payloads and splits them into plain text or complete JSON objects.

use crate::observability::DecodeObserver;

/// One unit handed on to shape extraction or the text path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Raw text with no JSON envelope.
    Text(String),
    /// A brace-balanced `{...}` slice. Not yet parsed, so it may still be invalid JSON.
    Object(String),
}

/// Accumulates data text until complete JSON objects can be cut out of it.
#[derive(Debug)]
pub struct PayloadBuffer {
    buf: String,
    max_len: usize,
}

impl PayloadBuffer {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: String::new(),
            max_len,
        }
    }

    /// Appends one data payload and returns everything that became complete.
    pub fn push(&mut self, data: &str, observer: &dyn DecodeObserver) -> Vec<Payload> {
        self.buf.push_str(data);
        let mut out = Vec::new();

        if !looks_like_json(&self.buf) {
            if !self.buf.is_empty() {
                out.push(Payload::Text(std::mem::take(&mut self.buf)));
            }
            return out;
        }

        let mut cut = false;
        while let Some((start, end)) = find_complete_object(&self.buf) {
            let object = self.buf[start..end].to_string();
            self.buf.drain(..end);
            out.push(Payload::Object(object));
            cut = true;
        }
        if cut {
            self.drop_array_glue();
        }

        if self.buf.is_empty() {
            return out;
        }
        if !looks_like_json(&self.buf) {
            out.push(Payload::Text(std::mem::take(&mut self.buf)));
        } else if self.buf.len() > self.max_len {
            observer.payload_overflow(self.buf.len());
            self.buf.clear();
        }
        out
    }

    /// Flushes what is left at end of stream.
    ///
    /// An incomplete object is dropped and reported. Leftover text with no object in it,
    /// such as a lone `[`, is returned as plain text.
    pub fn finish(&mut self, observer: &dyn DecodeObserver) -> Option<Payload> {
        let rest = std::mem::take(&mut self.buf);
        if rest.is_empty() {
            return None;
        }
        if rest.contains('{') {
            observer.incomplete_payload_dropped(rest.len());
            return None;
        }
        Some(Payload::Text(rest))
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Removes array punctuation left between or after objects of a streamed array,
    /// as long as what follows it is another object or nothing.
    fn drop_array_glue(&mut self) {
        let rest = self.buf.trim_start_matches(is_array_punct);
        if rest.is_empty() || rest.starts_with('{') {
            let glue = self.buf.len() - rest.len();
            self.buf.drain(..glue);
        }
    }
}

/// A buffer may hold JSON when it opens an object, or opens an array whose first
/// element is (or may still become) an object.
fn looks_like_json(buf: &str) -> bool {
    let trimmed = buf.trim_start();
    if trimmed.starts_with('{') {
        return true;
    }
    match trimmed.strip_prefix('[') {
        Some(rest) => {
            let rest = rest.trim_start();
            rest.is_empty() || rest.starts_with('{') || rest.starts_with('[')
        }
        None => false,
    }
}

fn is_array_punct(c: char) -> bool {
    c.is_whitespace() || matches!(c, '[' | ']' | ',')
}

/// Returns the byte range of the first complete top-level object.
///
/// Braces inside string literals are ignored, so text values containing `{` or `}`
/// do not throw the depth count off.
pub(crate) fn find_complete_object(buf: &str) -> Option<(usize, usize)> {
    let mut depth = 0_usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, byte) in buf.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => {
                start.get_or_insert(i);
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|s| (s, i + 1));
                }
            }
            _ => {}
        }
    }
    None
}
