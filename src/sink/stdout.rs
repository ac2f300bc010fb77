use super::{EventSink, MetricEvent};
use std::io::Write;
use tracing::warn;

/// Writes one JSON object per event to stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Self {
        Self
    }

    fn write_to(writer: &mut impl Write, event: &MetricEvent) -> std::io::Result<()> {
        serde_json::to_writer(&mut *writer, event)?;
        writer.write_all(b"\n")
    }
}

impl EventSink for StdoutSink {
    fn send(&self, event: MetricEvent) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        if let Err(e) = Self::write_to(&mut lock, &event) {
            warn!(error = %e, metric = %event.metric.name, "Failed to write event");
        }
    }
}
