//! Client-side decoder for streamed conversational-AI responses.
//!
//! A chat backend answers a POST with a Server-Sent-Events body whose `data` payloads
//! may be plain text, JSON objects in one of several shapes, several JSON objects glued
//! together, or fragments of one object split across events. The text inside may be
//! cumulative or incremental, and may embed `<think>` and `<tool_call>` pseudo-tags.
//! This crate turns that into a clean sequence of [`MessageDelta`]s: newly visible
//! text, the thinking trace, and structured tool-call, document, and usage metadata.
//!
//! # Handler usage
//!
//! ```no_run
//! use chat_stream::prelude::*;
//!
//! struct Printer;
//!
//! impl StreamHandler for Printer {
//!     fn on_message(&mut self, delta: MessageDelta) {
//!         print!("{}", delta.text);
//!     }
//!
//!     fn on_error(&mut self, error: StreamError) {
//!         eprintln!("stream failed: {error}");
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! let client = ChatStreamClient::new(ClientConfig::new().base_url("http://localhost:8080"))?;
//! let request = StreamRequest::new("/api/chat/stream", serde_json::json!({"message": "Hello"}));
//! let state = client.connect(request, &mut Printer).await?;
//! println!("\n{state:?}");
//! # Ok(())
//! # }
//! ```
//!
//! [`spawn_stream`] runs the same connection on a background task and exposes the
//! callbacks as [`StreamEvent`]s instead.

/// Connection lifecycle and the handler contract.
pub mod client;
/// Client and decoder settings.
pub mod config;
/// Decode pipeline stages.
pub mod decoder;
pub mod errors;
/// Delta and metadata types delivered to consumers.
pub mod message;
/// Decoder anomaly reporting and subscriber setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Per-connection decode state.
pub mod session;
/// Event-stream facade over the handler API.
pub mod stream;
/// Byte sources: the HTTP transport and its trait.
pub mod transport;

pub use client::{
    ChatStreamClient, ChatStreamClientBuilder, CloseHandle, ConnectionState, StateReceiver,
    StreamHandler,
};
pub use config::{ClientConfig, DecoderOptions};
pub use errors::{ConnectFailure, StreamError, TransportError};
pub use message::{
    MessageDelta, RetrievedDocument, StreamMetadata, ToolCallRecord, ToolCallStatus, UsageStats,
};
pub use observability::{DecodeObserver, TracingObserver, init_observability};
pub use session::StreamSession;
pub use stream::{ChannelHandler, EventStream, StreamEvent, spawn_stream};
pub use transport::{HttpTransport, StreamRequest, StreamTransport, TransportResponse};
