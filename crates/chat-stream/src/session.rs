use std::sync::Arc;

use tracing::debug;

use crate::config::DecoderOptions;
use crate::decoder::{
    EventData, EventFramer, Payload, PayloadBuffer, ReconcileFn, TextReconciler, display_delta,
    extract, extract_data, render, settle_display,
};
use crate::message::{MessageDelta, StreamMetadata};
use crate::observability::{DecodeObserver, TracingObserver};

/// Decode state of one logical connection.
///
/// Feed it raw body chunks in arrival order; it returns the deltas to deliver. It has
/// no transport of its own, so it can be driven directly in tests.
pub struct StreamSession {
    id: uuid::Uuid,
    framer: EventFramer,
    payloads: PayloadBuffer,
    reconciler: TextReconciler,
    /// Concatenation of every delivered `text`.
    display: String,
    /// Last settled render; the next delta is whatever extends it.
    last_render: String,
    thinking: String,
    done: bool,
    observer: Arc<dyn DecodeObserver>,
}

impl StreamSession {
    /// Creates a session that reports anomalies through `tracing`.
    pub fn new(options: &DecoderOptions) -> Self {
        Self::with_observer(options, Arc::new(TracingObserver))
    }

    /// Creates a session with a custom observer.
    pub fn with_observer(options: &DecoderOptions, observer: Arc<dyn DecodeObserver>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            framer: EventFramer::new(),
            payloads: PayloadBuffer::new(options.max_payload_buffer),
            reconciler: TextReconciler::new(options.json_blob_min_len),
            display: String::new(),
            last_render: String::new(),
            thinking: String::new(),
            done: false,
            observer,
        }
    }

    /// Replaces the accumulated-vs-incremental strategy.
    pub fn with_reconcile_strategy(mut self, strategy: ReconcileFn) -> Self {
        self.reconciler = self.reconciler.with_strategy(strategy);
        self
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// True once the `[DONE]` sentinel was seen or `finish` ran.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Longest text reconstructed so far, tags included.
    pub fn last_received_text(&self) -> &str {
        self.reconciler.text()
    }

    /// Visible text delivered so far; always the concatenation of the delivered deltas.
    pub fn display_text(&self) -> &str {
        &self.display
    }

    /// Thinking trace delivered so far.
    pub fn thinking_text(&self) -> &str {
        &self.thinking
    }

    /// Processes one body chunk.
    ///
    /// Stops at the `[DONE]` sentinel; anything after it, including the rest of this
    /// chunk, is ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<MessageDelta> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        for event in self.framer.push_chunk(chunk) {
            if self.process_event(&event, &mut out) {
                self.complete(&mut out);
                break;
            }
        }
        out
    }

    /// Flushes state after the source ended without a `[DONE]` sentinel.
    pub fn finish(&mut self) -> Vec<MessageDelta> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        if let Some(event) = self.framer.finish() {
            self.process_event(&event, &mut out);
        }
        self.complete(&mut out);
        out
    }

    /// Returns `true` when the event was the termination sentinel.
    fn process_event(&mut self, event: &str, out: &mut Vec<MessageDelta>) -> bool {
        match extract_data(event) {
            EventData::Done => {
                debug!(session_id = %self.id, "received stream termination sentinel");
                true
            }
            EventData::Empty => false,
            EventData::Data(data) => {
                for payload in self.payloads.push(&data, self.observer.as_ref()) {
                    if let Some(delta) = self.apply(payload) {
                        out.push(delta);
                    }
                }
                false
            }
        }
    }

    fn apply(&mut self, payload: Payload) -> Option<MessageDelta> {
        let mut metadata = None;
        match payload {
            Payload::Text(text) => {
                self.reconciler.accept(&text, self.observer.as_ref());
            }
            Payload::Object(raw) => match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(value) => {
                    let extracted = extract(&value);
                    if let Some(text) = extracted.text {
                        self.reconciler.accept(&text, self.observer.as_ref());
                    }
                    metadata = extracted.metadata.non_empty();
                }
                Err(err) => {
                    self.observer.parse_fallback(&err.to_string(), raw.len());
                    self.reconciler.accept(&raw, self.observer.as_ref());
                }
            },
        }
        self.render_delta(false, metadata)
    }

    fn complete(&mut self, out: &mut Vec<MessageDelta>) {
        if let Some(payload) = self.payloads.finish(self.observer.as_ref())
            && let Some(delta) = self.apply(payload)
        {
            out.push(delta);
        }
        if let Some(delta) = self.render_delta(true, None) {
            out.push(delta);
        }
        self.done = true;
    }

    fn render_delta(
        &mut self,
        final_pass: bool,
        metadata: Option<StreamMetadata>,
    ) -> Option<MessageDelta> {
        let rendered = render(self.reconciler.text(), final_pass);
        let settled =
            settle_display(&rendered.display, rendered.has_think, &self.display, final_pass)
                .to_string();

        let text = match display_delta(&self.last_render, &settled) {
            Some(appended) => appended.to_string(),
            None => {
                // Never take back delivered text; resync on the new render instead.
                self.observer
                    .display_rewritten(self.last_render.len(), settled.len());
                String::new()
            }
        };
        self.display.push_str(&text);
        self.last_render = settled;

        let thinking_process = (!rendered.thinking.is_empty() && rendered.thinking != self.thinking)
            .then(|| rendered.thinking.clone());
        if thinking_process.is_some() {
            self.thinking = rendered.thinking;
        }

        let delta = MessageDelta {
            text,
            thinking_process,
            metadata,
        };
        (!delta.is_empty()).then_some(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{ReconcileMode, Reconciled};
    use crate::message::ToolCallStatus;
    use crate::observability::testing::RecordingObserver;

    fn session() -> StreamSession {
        StreamSession::new(&DecoderOptions::default())
    }

    fn texts(deltas: &[MessageDelta]) -> String {
        deltas.iter().map(|d| d.text.as_str()).collect()
    }

    fn decode_in_chunks(stream: &[u8], splits: &[usize]) -> Vec<MessageDelta> {
        let mut session = session();
        let mut out = Vec::new();
        let mut start = 0;
        for &end in splits.iter().chain(std::iter::once(&stream.len())) {
            out.extend(session.feed(&stream[start..end]));
            start = end;
        }
        out.extend(session.finish());
        out
    }

    const MIXED_STREAM: &str = concat!(
        ": connected\n\n",
        "data: {\"result\":{\"output\":{\"text\":\"Hel\"}}}\r\n\r\n",
        "data: {\"result\":{\"output\":{\"text\":\"Hello\"}}}{\"text\":\" wor\"}\n\n",
        "data: ld, caf\u{e9}\r\r",
        "data: {\"chatResponse\":{\"metadata\":{\"model\":\"m\",\"usage\":{\"totalTokens\":9}}}}\n\n",
        "data: <think>a plan</think>\n\n",
        "data: !\n\n",
    );

    #[test]
    fn chunk_boundaries_do_not_change_output() {
        let stream = MIXED_STREAM.as_bytes();
        let whole = decode_in_chunks(stream, &[]);
        let expected = texts(&whole);
        for split in 1..stream.len() {
            let split_deltas = decode_in_chunks(stream, &[split]);
            assert_eq!(texts(&split_deltas), expected, "split at {split}");
        }
        for size in [1, 2, 3, 7] {
            let splits: Vec<usize> = (size..stream.len()).step_by(size).collect();
            assert_eq!(texts(&decode_in_chunks(stream, &splits)), expected, "size {size}");
        }
    }

    #[test]
    fn accumulated_json_values_become_suffix_deltas() {
        let mut session = session();
        let mut out = Vec::new();
        for text in ["a", "ab", "abc"] {
            let frame = format!("data: {{\"result\":{{\"output\":{{\"text\":\"{text}\"}}}}}}\n\n");
            out.extend(session.feed(frame.as_bytes()));
        }
        let deltas: Vec<&str> = out.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(deltas, vec!["a", "b", "c"]);
        assert_eq!(session.last_received_text(), "abc");
    }

    #[test]
    fn split_think_tag_never_shows_up_as_text() {
        let mut session = session();
        let mut out = Vec::new();
        for text in ["<th", "ink", ">done"] {
            let frame = format!("data: {{\"text\":\"{text}\"}}\n\n");
            out.extend(session.feed(frame.as_bytes()));
        }
        assert_eq!(session.last_received_text(), "<think>done");
        assert_eq!(texts(&out), "");
        assert_eq!(
            out.last().and_then(|d| d.thinking_process.as_deref()),
            Some("done")
        );
    }

    #[test]
    fn thinking_and_visible_text_are_separated() {
        let mut session = session();
        let out = session.feed(b"data: <think>plan</think>visible\n\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "visible");
        assert_eq!(out[0].thinking_process.as_deref(), Some("plan"));
        assert_eq!(session.display_text(), "visible");
        assert_eq!(session.thinking_text(), "plan");
    }

    #[test]
    fn unchanged_thinking_is_not_redelivered() {
        let mut session = session();
        session.feed(b"data: <think>plan</think>\n\n");
        let out = session.feed(b"data: answer\n\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "answer");
        assert_eq!(out[0].thinking_process, None);
    }

    #[test]
    fn duplicate_payload_is_suppressed() {
        let mut session = session();
        let frame = b"data: {\"text\":\"same\"}\n\n";
        assert_eq!(session.feed(frame).len(), 1);
        assert!(session.feed(frame).is_empty());
    }

    #[test]
    fn done_sentinel_stops_processing_same_chunk() {
        let mut session = session();
        let out = session.feed(b"data: one\n\ndata: [DONE]\n\ndata: two\n\n");
        assert_eq!(texts(&out), "one");
        assert!(session.is_done());
        assert!(session.feed(b"data: three\n\n").is_empty());
        assert!(session.finish().is_empty());
    }

    #[test]
    fn metadata_only_payload_is_delivered() {
        let mut session = session();
        let out = session.feed(
            br#"data: {"result":{"output":{"toolCalls":[{"id":"t1","name":"lookup","arguments":"{}"}]}}}

"#,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "");
        let metadata = out[0].metadata.as_ref().expect("metadata");
        assert_eq!(metadata.tool_calls[0].status, ToolCallStatus::Pending);
    }

    #[test]
    fn invalid_json_falls_back_to_text() {
        let observer = Arc::new(RecordingObserver::default());
        let mut session =
            StreamSession::with_observer(&DecoderOptions::default(), observer.clone());
        let out = session.feed(b"data: {oops}\n\n");
        assert_eq!(texts(&out), "{oops}");
        assert_eq!(*observer.fallbacks.lock().unwrap(), vec![6]);
    }

    #[test]
    fn finish_flushes_held_back_text_and_trailing_event() {
        let mut session = session();
        let out = session.feed(b"data: 1 <\n\ndata: 2");
        assert_eq!(texts(&out), "1");
        let out = session.finish();
        assert_eq!(texts(&out), " <2");
        assert_eq!(session.display_text(), "1 <2");
    }

    #[test]
    fn multi_line_data_keeps_newlines() {
        let mut session = session();
        let out = session.feed(b"data: line one\ndata: line two\n\n");
        assert_eq!(texts(&out), "line one\nline two");
    }

    fn text_frame(text: &str) -> Vec<u8> {
        format!("data: {{\"text\":\"{text}\"}}\n\n").into_bytes()
    }

    fn decode_frames(
        session: &mut StreamSession,
        frames: &[&str],
        frame: fn(&str) -> Vec<u8>,
    ) -> Vec<MessageDelta> {
        let mut out = Vec::new();
        for text in frames {
            out.extend(session.feed(&frame(text)));
        }
        out.extend(session.finish());
        out
    }

    #[test]
    fn think_after_leading_space_text_does_not_repeat_it() {
        let observer = Arc::new(RecordingObserver::default());
        let mut session =
            StreamSession::with_observer(&DecoderOptions::default(), observer.clone());
        let out = decode_frames(
            &mut session,
            &[" Hello", "<think>x</think>", " world"],
            text_frame,
        );
        assert_eq!(texts(&out), " Hello world");
        assert_eq!(texts(&out), session.display_text());
        assert_eq!(session.thinking_text(), "x");
        assert!(observer.rewrites.lock().unwrap().is_empty());
    }

    #[test]
    fn think_after_trailing_space_text_does_not_repeat_it() {
        let observer = Arc::new(RecordingObserver::default());
        let mut session =
            StreamSession::with_observer(&DecoderOptions::default(), observer.clone());
        let out = decode_frames(
            &mut session,
            &["Hello ", "<think>x</think>", " world"],
            text_frame,
        );
        assert_eq!(texts(&out), "Hello  world");
        assert_eq!(texts(&out), session.display_text());
        assert!(observer.rewrites.lock().unwrap().is_empty());
    }

    #[test]
    fn leading_whitespace_before_first_think_is_dropped() {
        let mut session = session();
        let out = decode_frames(
            &mut session,
            &["<think>plan</think>", "  answer ", "more"],
            text_frame,
        );
        assert_eq!(texts(&out), "answer more");
        assert_eq!(session.display_text(), "answer more");
    }

    #[test]
    fn display_rewrite_is_reported_and_nothing_is_taken_back() {
        fn latest_wins(last: &str, incoming: &str) -> Reconciled {
            let text = if incoming.len() >= last.len() { incoming } else { last };
            Reconciled {
                delta: incoming.to_string(),
                text: text.to_string(),
                mode: ReconcileMode::Incremental,
            }
        }
        let observer = Arc::new(RecordingObserver::default());
        let mut session =
            StreamSession::with_observer(&DecoderOptions::default(), observer.clone())
                .with_reconcile_strategy(latest_wins);
        let out = decode_frames(&mut session, &["abc", "xyzw", "xyzw!"], |text| {
            format!("data: {text}\n\n").into_bytes()
        });
        let deltas: Vec<&str> = out.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(deltas, vec!["abc", "!"]);
        assert_eq!(*observer.rewrites.lock().unwrap(), vec![(3, 4)]);
        assert_eq!(session.display_text(), "abc!");
    }

    #[test]
    fn bracket_text_token_survives() {
        let mut session = session();
        let mut out = session.feed(b"data: See [\n\n");
        out.extend(session.feed(b"data: [\n\ndata: docs](x)\n\n"));
        out.extend(session.finish());
        assert_eq!(texts(&out), "See [[docs](x)");
    }

    #[test]
    fn lone_bracket_at_end_of_stream_is_flushed() {
        let mut session = session();
        let mut out = session.feed(b"data: A\n\ndata: [\n\n");
        out.extend(session.finish());
        assert_eq!(texts(&out), "A[");
    }

    #[test]
    fn running_text_never_shrinks() {
        let mut session = session();
        let mut last_len = 0;
        for frame in [
            "data: {\"text\":\"abc\"}\n\n",
            "data: {\"text\":\"ab\"}\n\n",
            "data: {\"text\":\"\"}\n\n",
            "data: {\"text\":\"abcab!\"}\n\n",
        ] {
            session.feed(frame.as_bytes());
            assert!(session.last_received_text().len() >= last_len);
            last_len = session.last_received_text().len();
        }
        assert_eq!(session.last_received_text(), "abcab!");
    }
}
