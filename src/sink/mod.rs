mod http;
mod stdout;

pub use http::{HttpSink, HttpSinkSettings};
pub use stdout::StdoutSink;

use crate::metrics::MetricRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One metric plus the properties of the container it came from.
///
/// All events of a container within a cycle share the same properties map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEvent {
    pub metric: MetricRecord,
    pub properties: Arc<BTreeMap<String, String>>,
}

/// Receives events from the collector; fire-and-forget.
pub trait EventSink: Send + Sync {
    fn send(&self, event: MetricEvent);
}

impl<F> EventSink for F
where
    F: Fn(MetricEvent) + Send + Sync,
{
    fn send(&self, event: MetricEvent) {
        self(event)
    }
}
