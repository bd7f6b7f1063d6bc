//! Common imports for typical client usage.
pub use crate::{
    ChatStreamClient, ClientConfig, CloseHandle, ConnectionState, EventStream, MessageDelta,
    StreamError, StreamEvent, StreamHandler, StreamMetadata, StreamRequest, spawn_stream,
};
