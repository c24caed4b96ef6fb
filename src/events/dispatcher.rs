use crate::events::model::{EventMeta, LogEvent, LogLevel};
use crate::events::sink::LogSink;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use uuid::Uuid;

static DISPATCHER: OnceCell<EventDispatcher> = OnceCell::new();

/// Process-wide event fan-out. Events are queued on a channel and
/// delivered to every registered sink by a background task, so emitting
/// never blocks the node's worker loops.
pub struct EventDispatcher {
    tx: mpsc::Sender<LogEvent>,
    pub session_id: String,
    sinks: RwLock<Vec<Arc<dyn LogSink>>>,
}

impl EventDispatcher {
    pub fn global() -> Option<&'static EventDispatcher> {
        DISPATCHER.get()
    }

    pub fn register_sink(&self, sink: Arc<dyn LogSink>) {
        self.sinks.write().push(sink);
    }
}

/// Install the global dispatcher and start its delivery task. Calling
/// this twice is harmless; the first installation wins.
pub async fn init_events(sinks: Vec<Arc<dyn LogSink>>, capacity: usize) {
    let (tx, mut rx) = mpsc::channel::<LogEvent>(capacity);
    let dispatcher = EventDispatcher {
        tx,
        session_id: Uuid::new_v4().to_string(),
        sinks: RwLock::new(sinks),
    };
    if DISPATCHER.set(dispatcher).is_err() {
        return;
    }
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Some(dispatcher) = EventDispatcher::global() {
                let sinks = dispatcher.sinks.read().clone();
                for sink in sinks {
                    sink.handle(&event).await;
                }
            }
        }
    });
}

/// Short correlation id for tying together the events of one activity.
pub fn correlation_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

pub fn meta(component: &'static str, level: LogLevel) -> EventMeta {
    EventMeta {
        ts: SystemTime::now(),
        level,
        corr_id: None,
        session_id: EventDispatcher::global()
            .map(|d| d.session_id.clone())
            .unwrap_or_else(|| "unknown".into()),
        component,
    }
}

/// Queue an event for delivery. A full queue or a missing dispatcher
/// drops the event; logging is a side effect, never a failure path.
pub fn emit(event: LogEvent) {
    if let Some(dispatcher) = EventDispatcher::global() {
        let _ = dispatcher.tx.try_send(event);
    }
}
