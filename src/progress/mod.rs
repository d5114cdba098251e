//! Progress notification to an external observer.
//!
//! Sinks receive [`ProgressEvent`]s through a [`Notifier`], which isolates
//! the pipeline from sink behaviour: a sink error (or panic) is logged and
//! dropped, never propagated into the run.
//!
//! ## Ordering
//!
//! Top-level stage transitions are emitted from the driving task in plan
//! order. Events for members of a parallel group are emitted from the member
//! tasks as they finish, so they arrive in completion order. Every event
//! carries a per-run `sequence` number reflecting emission order.

use crate::errors::SinkError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub run_id: Uuid,
    /// Emission order within the run, starting at 0.
    pub sequence: u64,
    /// Transition name, e.g. `"transcribe.done"`.
    pub stage: String,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Receives progress events.
///
/// Implementations must return promptly: `notify` is called inline from the
/// pipeline and from parallel member tasks.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, event: &ProgressEvent) -> Result<(), SinkError>;
}

/// Best-effort event emitter shared by the driver and its member tasks.
#[derive(Clone)]
pub struct Notifier {
    run_id: Uuid,
    sink: Option<Arc<dyn ProgressSink>>,
    sequence: Arc<AtomicU64>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("run_id", &self.run_id)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl Notifier {
    pub fn new(run_id: Uuid, sink: Option<Arc<dyn ProgressSink>>) -> Self {
        Self {
            run_id,
            sink,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A notifier with no sink attached.
    pub fn silent() -> Self {
        Self::new(Uuid::nil(), None)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Emit a transition with an empty payload.
    pub fn emit(&self, stage: &str) {
        self.emit_with(stage, Value::Null);
    }

    /// Emit a transition. Never fails and never panics.
    pub fn emit_with(&self, stage: &str, payload: Value) {
        let Some(sink) = &self.sink else {
            return;
        };

        let event = ProgressEvent {
            run_id: self.run_id,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            stage: stage.to_string(),
            payload,
            timestamp: Utc::now(),
        };

        match catch_unwind(AssertUnwindSafe(|| sink.notify(&event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(stage, error = %e, "progress sink rejected event"),
            Err(_) => warn!(stage, "progress sink panicked"),
        }
    }
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn notify(&self, event: &ProgressEvent) -> Result<(), SinkError> {
        info!(
            run_id = %event.run_id,
            sequence = event.sequence,
            stage = %event.stage,
            "progress"
        );
        Ok(())
    }
}

/// Forwards events into a bounded channel without waiting.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn notify(&self, event: &ProgressEvent) -> Result<(), SinkError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(&ProgressEvent) -> Result<(), SinkError> + Send + Sync,
{
    fn notify(&self, event: &ProgressEvent) -> Result<(), SinkError> {
        (self.0)(event)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Sink that keeps every event for later assertions.
    #[derive(Default)]
    pub struct CollectingSink {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl CollectingSink {
        pub fn stages(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.stage.clone())
                .collect()
        }

        pub fn events(&self) -> Vec<ProgressEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ProgressSink for CollectingSink {
        fn notify(&self, event: &ProgressEvent) -> Result<(), SinkError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::CollectingSink;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notifier_assigns_increasing_sequence() {
        let sink = Arc::new(CollectingSink::default());
        let notifier = Notifier::new(Uuid::new_v4(), Some(sink.clone()));

        notifier.emit("start");
        notifier.emit_with("tone.done", json!({"confidence": 80}));
        notifier.emit("complete");

        let events = sink.events();
        assert_eq!(sink.stages(), vec!["start", "tone.done", "complete"]);
        assert_eq!(
            events.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(events[1].payload, json!({"confidence": 80}));
        assert!(events.iter().all(|e| e.run_id == notifier.run_id()));
    }

    #[test]
    fn test_sink_errors_are_isolated() {
        let notifier = Notifier::new(
            Uuid::new_v4(),
            Some(Arc::new(FnSink(|_: &ProgressEvent| {
                Err(SinkError::Other("observer went away".into()))
            }))),
        );
        // Must not panic or propagate
        notifier.emit("start");
    }

    #[test]
    fn test_sink_panics_are_isolated() {
        let notifier = Notifier::new(
            Uuid::new_v4(),
            Some(Arc::new(FnSink(|_: &ProgressEvent| -> Result<(), SinkError> {
                panic!("observer bug")
            }))),
        );
        notifier.emit("start");
    }

    #[test]
    fn test_silent_notifier_is_a_no_op() {
        Notifier::silent().emit("start");
    }

    #[tokio::test]
    async fn test_channel_sink_reports_full_and_closed() {
        let (sink, mut rx) = ChannelSink::channel(1);
        let notifier = Notifier::new(Uuid::new_v4(), Some(Arc::new(sink.clone())));

        notifier.emit("first");
        // Channel is full now; the event is dropped, the call still returns
        notifier.emit("second");

        let received = rx.recv().await.unwrap();
        assert_eq!(received.stage, "first");

        let event = ProgressEvent {
            run_id: Uuid::nil(),
            sequence: 0,
            stage: "x".into(),
            payload: Value::Null,
            timestamp: Utc::now(),
        };
        sink.notify(&event).unwrap();
        assert!(matches!(sink.notify(&event), Err(SinkError::Full)));

        drop(rx);
        let (closed_sink, closed_rx) = ChannelSink::channel(4);
        drop(closed_rx);
        assert!(matches!(closed_sink.notify(&event), Err(SinkError::Closed)));
    }

    #[test]
    fn test_event_serialization() {
        let event = ProgressEvent {
            run_id: Uuid::nil(),
            sequence: 3,
            stage: "persona.skeptic.done".into(),
            payload: json!({"label": "Favorable"}),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("persona.skeptic.done"));
        let back: ProgressEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
