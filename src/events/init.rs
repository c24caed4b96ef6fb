use crate::events::dispatcher::init_events;
use crate::events::model::LogLevel;
use crate::events::sink::{ConsoleSink, JsonFileSink, LogSink};
use std::sync::Arc;

/// Initialize events with defaults: console output plus a rotating
/// JSON-line file under `logs/`.
pub async fn init_default_events() {
    init_events_with_options(None, None).await
}

/// Initialize events with an optional JSON log path override and an
/// optional console minimum level filter.
pub async fn init_events_with_options(
    json_path: Option<String>,
    console_min_level: Option<LogLevel>,
) {
    let mut sinks: Vec<Arc<dyn LogSink>> = Vec::new();
    sinks.push(Arc::new(ConsoleSink::new(console_min_level)));

    let json_path = json_path.unwrap_or_else(|| "logs/pipenode.jsonl".into());
    if let Ok(json_sink) = JsonFileSink::new(&json_path, true, 5 * 1024 * 1024, 3).await {
        sinks.push(Arc::new(json_sink));
    }
    init_events(sinks, 1024).await;
}
