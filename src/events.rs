//! Progress events emitted by a pipeline run.
//!
//! A run produces an ordered sequence of [`PipelineEvent`]s, one per
//! milestone, ending in exactly one `complete` or `error` event. Observers
//! either implement [`EventHandler`] (synchronous callback) or consume an
//! [`EventStream`] fed through a channel.

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// A named phase of a pipeline run.
///
/// Variants are declared in run order, so `Ord` follows the pipeline:
/// a successful run's events never go backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ExtractingQuery,
    SearchingImages,
    VerifyingImages,
    GeneratingImage,
    Complete,
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ExtractingQuery => "extracting_query",
            Stage::SearchingImages => "searching_images",
            Stage::VerifyingImages => "verifying_images",
            Stage::GeneratingImage => "generating_image",
            Stage::Complete => "complete",
            Stage::Error => "error",
        }
    }

    /// `complete` and `error` end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Error)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub stage: Stage,
    /// Human-readable description of the milestone.
    pub message: String,
    /// Stage-specific structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(stage: Stage, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            stage,
            message: message.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Render as a server-sent-events frame: `data: {json}\n\n`.
    pub fn to_sse_frame(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("data: {}\n\n", json)
    }
}

/// Handler for pipeline progress events.
///
/// # Example
///
/// ```
/// use grounded_imagegen::events::{EventHandler, PipelineEvent};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: PipelineEvent) {
///         println!("[{}] {}", event.stage, event.message);
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called once per emitted event, in order.
    fn on_event(&self, event: PipelineEvent);
}

/// An [`EventHandler`] backed by a closure.
///
/// ```
/// use grounded_imagegen::events::{FnEventHandler, PipelineEvent};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: PipelineEvent| {
///     println!("{}", event.message);
/// }));
/// ```
pub struct FnEventHandler<F: Fn(PipelineEvent) + Send + Sync>(pub F);

impl<F: Fn(PipelineEvent) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: PipelineEvent) {
        (self.0)(event);
    }
}

/// Forwards events into an unbounded channel.
///
/// A dropped receiver is not an error; events are discarded.
pub struct ChannelEventHandler {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelEventHandler {
    pub fn new(tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self { tx }
    }

    /// Create a handler and the [`EventStream`] that receives its events.
    pub fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), EventStream::new(rx))
    }
}

impl EventHandler for ChannelEventHandler {
    fn on_event(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

/// The events of one run as a [`futures::Stream`].
///
/// Ends once the run has finished and every event has been yielded.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<PipelineEvent>,
}

impl EventStream {
    pub fn new(rx: mpsc::UnboundedReceiver<PipelineEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event, or `None` once the run is over.
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = PipelineEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Per-run event sink. Drops everything after the first terminal event.
pub(crate) struct Emitter {
    handler: Option<Arc<dyn EventHandler>>,
    closed: AtomicBool,
}

impl Emitter {
    pub(crate) fn new(handler: Option<Arc<dyn EventHandler>>) -> Self {
        Self {
            handler,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn emit(&self, stage: Stage, message: impl Into<String>, data: Option<Value>) {
        if stage.is_terminal() {
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
        } else if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Some(ref h) = self.handler {
            h.on_event(PipelineEvent::new(stage, message, data));
        }
    }
}
