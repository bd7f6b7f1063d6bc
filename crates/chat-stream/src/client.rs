use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::{ClientConfig, DecoderOptions};
use crate::errors::{ConnectFailure, StreamError};
use crate::message::MessageDelta;
use crate::observability::{DecodeObserver, TracingObserver};
use crate::session::StreamSession;
use crate::transport::{HttpTransport, StreamRequest, StreamTransport};

/// Lifecycle of a client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Streaming,
    Closed,
    Errored,
}

impl ConnectionState {
    /// True while a connection is in flight.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Streaming
        )
    }
}

/// Consumer callbacks for one connection.
///
/// After `on_error` or `on_close` no further callbacks are made. A connection ended by
/// the consumer's own `close()` makes no callbacks at all.
pub trait StreamHandler: Send {
    /// The endpoint accepted the request; body streaming is about to start.
    fn on_open(&mut self) {}

    /// A non-empty delta was decoded.
    fn on_message(&mut self, delta: MessageDelta);

    /// The connection failed. Called at most once.
    fn on_error(&mut self, error: StreamError) {
        let _ = error;
    }

    /// The stream completed, by sentinel or end of body.
    fn on_close(&mut self) {}
}

/// Connection state tagged with the `connect` call it belongs to, so a pump that
/// outlived its connection can never touch a newer one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Tracked {
    generation: u64,
    state: ConnectionState,
}

impl Tracked {
    fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && self.state.is_active()
    }
}

/// Cloneable handle that cancels the active connection from anywhere.
#[derive(Clone)]
pub struct CloseHandle {
    state: Arc<watch::Sender<Tracked>>,
}

impl CloseHandle {
    /// Cancels the active connection. Safe to call repeatedly and from any state.
    pub fn close(&self) {
        close_tracked(&self.state);
    }
}

fn close_tracked(state: &watch::Sender<Tracked>) {
    let closed = state.send_if_modified(|tracked| {
        if tracked.state.is_active() {
            tracked.state = ConnectionState::Closed;
            true
        } else {
            false
        }
    });
    if closed {
        debug!("connection closed by consumer");
    }
}

/// Receiver of connection state transitions. Intermediate states may be skipped when
/// several transitions happen between polls.
#[derive(Clone)]
pub struct StateReceiver {
    rx: watch::Receiver<Tracked>,
}

impl StateReceiver {
    pub fn current(&self) -> ConnectionState {
        self.rx.borrow().state
    }

    /// Waits for the next transition. Returns `None` once the client is gone.
    pub async fn changed(&mut self) -> Option<ConnectionState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().state)
    }

    /// Waits until the state satisfies `predicate`.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(ConnectionState) -> bool,
    ) -> Option<ConnectionState> {
        loop {
            let state = self.rx.borrow_and_update().state;
            if predicate(state) {
                return Some(state);
            }
            self.rx.changed().await.ok()?;
        }
    }
}

struct ClientInner {
    transport: Arc<dyn StreamTransport>,
    options: DecoderOptions,
    observer: Arc<dyn DecodeObserver>,
    state: Arc<watch::Sender<Tracked>>,
}

/// Streaming chat client: one connection at a time, decoded through a fresh
/// [`StreamSession`] per `connect`.
#[derive(Clone)]
pub struct ChatStreamClient {
    inner: Arc<ClientInner>,
}

impl ChatStreamClient {
    /// Creates an HTTP-backed client.
    pub fn new(config: ClientConfig) -> Result<Self, StreamError> {
        let options = config.decoder.clone();
        Self::builder()
            .transport(Arc::new(HttpTransport::new(config)?))
            .decoder_options(options)
            .build()
    }

    /// Creates an HTTP-backed client configured from the environment.
    pub fn from_env() -> Result<Self, StreamError> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn builder() -> ChatStreamClientBuilder {
        ChatStreamClientBuilder::default()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().state
    }

    /// Watches state transitions.
    pub fn subscribe_state(&self) -> StateReceiver {
        StateReceiver {
            rx: self.inner.state.subscribe(),
        }
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            state: self.inner.state.clone(),
        }
    }

    /// Cancels the active connection, if any. Idempotent; never invokes callbacks.
    pub fn close(&self) {
        close_tracked(&self.inner.state);
    }

    /// Connects and pumps the stream to completion, invoking `handler` along the way.
    ///
    /// Returns the terminal state (`Closed` or `Errored`). Returns
    /// `Err(StreamError::AlreadyActive)` without any callback if another connection on
    /// this client is still in flight.
    pub async fn connect<H>(
        &self,
        request: StreamRequest,
        handler: &mut H,
    ) -> Result<ConnectionState, StreamError>
    where
        H: StreamHandler + ?Sized,
    {
        let generation = self.begin()?;
        let mut state_rx = self.inner.state.subscribe();
        let mut session =
            StreamSession::with_observer(&self.inner.options, self.inner.observer.clone());
        let connection_id = session.id();
        debug!(connection_id = %connection_id, url = %request.url, generation, "connecting");

        let opened = tokio::select! {
            biased;
            _ = cancelled(&mut state_rx, generation) => return Ok(self.state_of(generation)),
            opened = self.inner.transport.open(&request) => opened,
        };
        let response = match opened {
            Ok(response) => response,
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "stream request failed");
                return Ok(self.fail(generation, handler, err.into()));
            }
        };
        if !response.is_success() {
            let failure =
                ConnectFailure::from_status(response.status, response.error_body.as_deref());
            warn!(connection_id = %connection_id, status = response.status, "stream request rejected");
            return Ok(self.fail(generation, handler, failure.into()));
        }

        if !self.transition(generation, ConnectionState::Open) {
            return Ok(self.state_of(generation));
        }
        handler.on_open();
        if !self.transition(generation, ConnectionState::Streaming) {
            return Ok(self.state_of(generation));
        }

        let mut body = response.body;
        let mut chunks = 0_u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled(&mut state_rx, generation) => return Ok(self.state_of(generation)),
                next = body.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    chunks = chunks.saturating_add(1);
                    let deltas = session.feed(&chunk);
                    if !self.deliver(generation, handler, deltas) {
                        return Ok(self.state_of(generation));
                    }
                    if session.is_done() {
                        debug!(connection_id = %connection_id, chunks, "stream finished by sentinel");
                        return Ok(self.complete(generation, handler));
                    }
                }
                Some(Err(err)) => {
                    if !self.is_live(generation) {
                        // Read error caused by our own cancellation.
                        return Ok(self.state_of(generation));
                    }
                    warn!(connection_id = %connection_id, error = %err, chunks, "stream read failed");
                    return Ok(self.fail(generation, handler, err.into()));
                }
                None => {
                    let deltas = session.finish();
                    if !self.deliver(generation, handler, deltas) {
                        return Ok(self.state_of(generation));
                    }
                    debug!(connection_id = %connection_id, chunks, "stream body ended");
                    return Ok(self.complete(generation, handler));
                }
            }
        }
    }

    /// Claims the client for a new connection and returns its generation.
    fn begin(&self) -> Result<u64, StreamError> {
        let mut generation = 0;
        let claimed = self.inner.state.send_if_modified(|tracked| {
            if tracked.state.is_active() {
                return false;
            }
            tracked.generation = tracked.generation.wrapping_add(1);
            tracked.state = ConnectionState::Connecting;
            generation = tracked.generation;
            true
        });
        if claimed {
            Ok(generation)
        } else {
            Err(StreamError::AlreadyActive)
        }
    }

    fn is_live(&self, generation: u64) -> bool {
        self.inner.state.borrow().is_live(generation)
    }

    /// State as seen by the connection `generation`; a superseded one reads as closed.
    fn state_of(&self, generation: u64) -> ConnectionState {
        let tracked = *self.inner.state.borrow();
        if tracked.generation == generation {
            tracked.state
        } else {
            ConnectionState::Closed
        }
    }

    fn transition(&self, generation: u64, to: ConnectionState) -> bool {
        self.inner.state.send_if_modified(|tracked| {
            if tracked.is_live(generation) {
                tracked.state = to;
                true
            } else {
                false
            }
        })
    }

    fn deliver<H>(&self, generation: u64, handler: &mut H, deltas: Vec<MessageDelta>) -> bool
    where
        H: StreamHandler + ?Sized,
    {
        for delta in deltas {
            if !self.is_live(generation) {
                return false;
            }
            handler.on_message(delta);
        }
        self.is_live(generation)
    }

    fn fail<H>(&self, generation: u64, handler: &mut H, error: StreamError) -> ConnectionState
    where
        H: StreamHandler + ?Sized,
    {
        if self.transition(generation, ConnectionState::Errored) {
            handler.on_error(error);
        }
        self.state_of(generation)
    }

    fn complete<H>(&self, generation: u64, handler: &mut H) -> ConnectionState
    where
        H: StreamHandler + ?Sized,
    {
        if self.transition(generation, ConnectionState::Closed) {
            handler.on_close();
        }
        self.state_of(generation)
    }
}

/// Resolves once connection `generation` is no longer live.
async fn cancelled(state_rx: &mut watch::Receiver<Tracked>, generation: u64) {
    loop {
        if !state_rx.borrow_and_update().is_live(generation) {
            return;
        }
        if state_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Builder for a client with a custom transport or observer.
#[derive(Default)]
pub struct ChatStreamClientBuilder {
    transport: Option<Arc<dyn StreamTransport>>,
    options: DecoderOptions,
    observer: Option<Arc<dyn DecodeObserver>>,
}

impl ChatStreamClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn decoder_options(mut self, options: DecoderOptions) -> Self {
        self.options = options;
        self
    }

    /// Observer for decoder anomalies. Defaults to [`TracingObserver`].
    pub fn observer(mut self, observer: Arc<dyn DecodeObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Result<ChatStreamClient, StreamError> {
        let transport = self
            .transport
            .ok_or_else(|| StreamError::config("a transport is required"))?;
        if self.options.max_payload_buffer == 0 {
            return Err(StreamError::config(
                "max_payload_buffer must be greater than 0",
            ));
        }
        let (state, _) = watch::channel(Tracked {
            generation: 0,
            state: ConnectionState::Idle,
        });
        Ok(ChatStreamClient {
            inner: Arc::new(ClientInner {
                transport,
                options: self.options,
                observer: self.observer.unwrap_or_else(|| Arc::new(TracingObserver)),
                state: Arc::new(state),
            }),
        })
    }
}
