use tokio::sync::{mpsc, oneshot};

use crate::client::{ChatStreamClient, CloseHandle, ConnectionState, StreamHandler};
use crate::errors::StreamError;
use crate::message::MessageDelta;
use crate::transport::StreamRequest;

/// Callback events as values, for consumers that prefer pulling to handlers.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Open,
    Message(MessageDelta),
    /// Terminal failure.
    Error(StreamError),
    /// Terminal success.
    Closed,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Error(_) | StreamEvent::Closed)
    }
}

/// [`StreamHandler`] that forwards every callback into a channel.
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelHandler {
    pub fn new(tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: StreamEvent) {
        // Receiver gone means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

impl StreamHandler for ChannelHandler {
    fn on_open(&mut self) {
        self.send(StreamEvent::Open);
    }

    fn on_message(&mut self, delta: MessageDelta) {
        self.send(StreamEvent::Message(delta));
    }

    fn on_error(&mut self, error: StreamError) {
        self.send(StreamEvent::Error(error));
    }

    fn on_close(&mut self) {
        self.send(StreamEvent::Closed);
    }
}

/// Connection running on a background task, read as a sequence of [`StreamEvent`]s.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    final_rx: oneshot::Receiver<Result<ConnectionState, StreamError>>,
    close_handle: CloseHandle,
}

impl EventStream {
    /// Waits for the next event.
    ///
    /// Returns `None` once the connection has ended and every event was read. A stream
    /// cancelled through [`EventStream::close`] ends without a terminal event.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.close_handle.clone()
    }

    /// Cancels the connection. No further events are produced.
    pub fn close(&self) {
        self.close_handle.close();
    }

    /// Waits for the connection to end and returns its terminal state.
    ///
    /// Unread events are discarded.
    pub async fn finish(self) -> Result<ConnectionState, StreamError> {
        let Self { rx, final_rx, .. } = self;
        drop(rx);
        final_rx.await.map_err(|_| StreamError::Transport {
            message: "stream task ended without a result".into(),
        })?
    }

    /// Drains the stream and returns the concatenated visible text.
    pub async fn collect_text(mut self) -> Result<String, StreamError> {
        let mut text = String::new();
        while let Some(event) = self.next_event().await {
            match event {
                StreamEvent::Message(delta) => text.push_str(&delta.text),
                StreamEvent::Error(err) => return Err(err),
                StreamEvent::Open | StreamEvent::Closed => {}
            }
        }
        self.finish().await?;
        Ok(text)
    }
}

/// Starts `request` on a background task and returns its events as a stream.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_stream(client: &ChatStreamClient, request: StreamRequest) -> EventStream {
    let (tx, rx) = mpsc::unbounded_channel();
    let (final_tx, final_rx) = oneshot::channel();
    let close_handle = client.close_handle();
    let client = client.clone();
    tokio::spawn(async move {
        let mut handler = ChannelHandler::new(tx);
        let result = client.connect(request, &mut handler).await;
        let _ = final_tx.send(result);
    });
    EventStream {
        rx,
        final_rx,
        close_handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{FakeBehavior, FakeTransport, client_with, request};
    use crate::errors::ConnectFailure;

    #[tokio::test]
    async fn events_arrive_in_callback_order() {
        let client = client_with(FakeTransport::new(FakeBehavior::Chunks(vec![
            Ok("data: {\"text\":\"Hi\"}\n\n"),
            Ok("data: {\"text\":\"Hi there\"}\n\ndata: [DONE]\n\n"),
        ])));
        let mut stream = spawn_stream(&client, request());

        let mut events = Vec::new();
        while let Some(event) = stream.next_event().await {
            events.push(event);
        }
        assert_eq!(events.first(), Some(&StreamEvent::Open));
        assert_eq!(events.last(), Some(&StreamEvent::Closed));
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Message(delta) => Some(delta.text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hi there");
        assert_eq!(
            stream.finish().await.expect("finish"),
            ConnectionState::Closed
        );
    }

    #[tokio::test]
    async fn collect_text_returns_connect_failure() {
        let client = client_with(FakeTransport::new(FakeBehavior::Status(404, None)));
        let err = spawn_stream(&client, request())
            .collect_text()
            .await
            .expect_err("404");
        assert_eq!(err, StreamError::Connect(ConnectFailure::NotFound));
    }

    #[tokio::test]
    async fn collect_text_concatenates_deltas() {
        let client = client_with(FakeTransport::new(FakeBehavior::Chunks(vec![
            Ok("data: <think>hmm</think>Hello\n\n"),
            Ok("data: , world\n\n"),
        ])));
        let text = spawn_stream(&client, request())
            .collect_text()
            .await
            .expect("text");
        assert_eq!(text, "Hello, world");
    }

    #[tokio::test]
    async fn close_ends_stream_without_terminal_event() {
        let client = client_with(FakeTransport::new(FakeBehavior::ChunksThenPending(vec![
            "data: first\n\n",
        ])));
        let mut stream = spawn_stream(&client, request());
        assert_eq!(stream.next_event().await, Some(StreamEvent::Open));
        assert_eq!(
            stream.next_event().await,
            Some(StreamEvent::Message(MessageDelta::text("first")))
        );
        stream.close();
        assert_eq!(stream.next_event().await, None);
        assert_eq!(client.state(), ConnectionState::Closed);
    }
}
