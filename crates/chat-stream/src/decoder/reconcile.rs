//! Decides whether a text value is the full transcript so far or a new fragment.
//!
//! Upstreams mix both styles without announcing which one a frame uses, so the
//! classification is a heuristic: an incremental fragment that happens to extend the
//! running text by prefix is indistinguishable from accumulation.

use crate::observability::DecodeObserver;

/// How an incoming text value was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Nothing had been received yet.
    Initial,
    /// The value repeats the running text and extends it.
    Accumulated,
    /// The value is a fragment to append.
    Incremental,
    /// The value equals the running text.
    Duplicate,
}

/// Result of reconciling one text value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub delta: String,
    /// The new running text.
    pub text: String,
    pub mode: ReconcileMode,
}

/// Signature of a reconciliation strategy: `(running text, incoming) -> outcome`.
pub type ReconcileFn = fn(&str, &str) -> Reconciled;

/// Default strategy: prefix-extension means accumulated, anything else different is
/// incremental, an exact repeat is a duplicate.
pub fn reconcile(last: &str, incoming: &str) -> Reconciled {
    if last.is_empty() {
        return Reconciled {
            delta: incoming.to_string(),
            text: incoming.to_string(),
            mode: ReconcileMode::Initial,
        };
    }
    if incoming.len() > last.len()
        && let Some(suffix) = incoming.strip_prefix(last)
    {
        return Reconciled {
            delta: suffix.to_string(),
            text: incoming.to_string(),
            mode: ReconcileMode::Accumulated,
        };
    }
    if incoming != last {
        return Reconciled {
            delta: incoming.to_string(),
            text: format!("{last}{incoming}"),
            mode: ReconcileMode::Incremental,
        };
    }
    Reconciled {
        delta: String::new(),
        text: last.to_string(),
        mode: ReconcileMode::Duplicate,
    }
}

/// True for a value that is a standalone JSON object rather than answer text.
pub fn is_json_blob(text: &str, min_len: usize) -> bool {
    let trimmed = text.trim();
    trimmed.len() > min_len && trimmed.starts_with('{') && trimmed.ends_with('}')
}

/// Owns the running text of one session. Nothing else mutates it.
#[derive(Debug)]
pub struct TextReconciler {
    last: String,
    json_blob_min_len: usize,
    strategy: ReconcileFn,
}

impl TextReconciler {
    pub fn new(json_blob_min_len: usize) -> Self {
        Self {
            last: String::new(),
            json_blob_min_len,
            strategy: reconcile,
        }
    }

    /// Swaps the classification strategy.
    pub fn with_strategy(mut self, strategy: ReconcileFn) -> Self {
        self.strategy = strategy;
        self
    }

    /// Reconciles one text value and returns the visible delta (possibly empty).
    pub fn accept(&mut self, incoming: &str, observer: &dyn DecodeObserver) -> String {
        if is_json_blob(incoming, self.json_blob_min_len) {
            observer.json_blob_suppressed(incoming.len());
            return String::new();
        }
        let outcome = (self.strategy)(&self.last, incoming);
        // The running text only ever grows.
        if outcome.text.len() >= self.last.len() {
            self.last = outcome.text;
        }
        outcome.delta
    }

    pub fn text(&self) -> &str {
        &self.last
    }
}
