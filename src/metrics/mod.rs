mod convert;

pub use convert::DockerStatConverter;

use crate::runtime::{ContainerDescriptor, RawStats};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub name: String,
    pub value: f64,
}

impl MetricRecord {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Pure conversion from runtime payloads into telemetry shape.
pub trait StatConverter: Send + Sync {
    /// Flat description of a container. Missing fields are left out.
    fn container_properties(
        &self,
        container: &ContainerDescriptor,
        host_name: &str,
    ) -> BTreeMap<String, String>;

    /// Zero or more metrics for one sample; never partial values.
    fn convert_to_metrics(&self, stats: &RawStats) -> Vec<MetricRecord>;
}
