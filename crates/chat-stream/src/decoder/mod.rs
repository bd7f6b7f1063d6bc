//! Decode pipeline stages, leaf-first:
//!
//! bytes → [`framer`] → events → [`fields`] → data → [`payload`] → text or JSON objects →
//! [`shapes`] + [`reconcile`] → running text → [`tags`] → visible delta and thinking trace.
//!
//! Each stage is usable on its own; [`crate::session::StreamSession`] wires them together.

pub mod fields;
pub mod framer;
pub mod payload;
pub mod reconcile;
pub mod shapes;
pub mod tags;

pub use fields::{DONE_SENTINEL, EventData, extract_data};
pub use framer::EventFramer;
pub use payload::{Payload, PayloadBuffer};
pub use reconcile::{ReconcileFn, ReconcileMode, Reconciled, TextReconciler, reconcile};
pub use shapes::{ExtractedPayload, extract};
pub use tags::{Rendered, display_delta, render, settle_display};
