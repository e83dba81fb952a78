//! Captures tracing messages so tests can assert on log-and-drop paths.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

/// Messages recorded by [`capture_logs`], in emission order.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    lines: Arc<Mutex<Vec<(Level, String)>>>,
}

impl CapturedLogs {
    /// Whether any message contains `needle`.
    pub fn has_message(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|(_, line)| line.contains(needle))
    }

    /// Whether a message at `level` contains `needle`.
    pub fn has_event(&self, level: Level, needle: &str) -> bool {
        self.lines
            .lock()
            .iter()
            .any(|(at, line)| *at == level && line.contains(needle))
    }
}

#[derive(Default)]
struct MessageOnly(String);

impl Visit for MessageOnly {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = MessageOnly::default();
        event.record(&mut message);
        self.lines.lock().push((*event.metadata().level(), message.0));
    }
}

/// Capture every event on the current thread until the guard drops.
///
/// `#[tokio::test]` runs on one thread, so spawned tasks are captured too.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let guard = tracing_subscriber::registry().with(logs.clone()).set_default();
    (logs, guard)
}
