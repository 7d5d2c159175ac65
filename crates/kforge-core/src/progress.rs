//! Progress events emitted by the pipeline.
//!
//! The pipeline calls its sink synchronously from the worker thread. Sinks
//! that feed a UI hand events over to it, usually through an `mpsc::Sender`.

use serde::{Deserialize, Serialize};
use std::sync::mpsc::Sender;

/// Wire value for an error or an indeterminate phase.
pub const ERROR_PERCENT: i32 = -1;
/// Wire value acknowledging cancellation.
pub const CANCELLED_PERCENT: i32 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "percent")]
pub enum ProgressValue {
    Percent(u8),
    /// Work is happening but its extent is unknown.
    Indeterminate,
    Error,
    Cancelled,
}

impl ProgressValue {
    /// Clamped to 100.
    pub fn percent(value: u8) -> Self {
        Self::Percent(value.min(100))
    }

    /// The integer form used by observers that only understand
    /// `(message, percent)` pairs.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Percent(p) => i32::from(p),
            Self::Indeterminate | Self::Error => ERROR_PERCENT,
            Self::Cancelled => CANCELLED_PERCENT,
        }
    }

    pub fn definite(self) -> Option<u8> {
        match self {
            Self::Percent(p) => Some(p),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub message: String,
    pub value: ProgressValue,
}

impl ProgressEvent {
    pub fn new(message: impl Into<String>, value: ProgressValue) -> Self {
        Self {
            message: message.into(),
            value,
        }
    }

    pub fn is_error(&self) -> bool {
        self.value == ProgressValue::Error
    }
}

pub trait ProgressSink: Send {
    fn report(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _event: ProgressEvent) {}
}

impl ProgressSink for Sender<ProgressEvent> {
    fn report(&self, event: ProgressEvent) {
        // A dropped receiver means nobody is watching; the job carries on.
        let _ = self.send(event);
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(ProgressEvent) + Send,
{
    fn report(&self, event: ProgressEvent) {
        (self.0)(event);
    }
}
