//! The polling cycle: list containers, skip our own container when it
//! already reports telemetry, fetch and convert stats, emit events.

mod registry;
mod sdk;

pub use registry::ContainerRegistry;
pub use sdk::SdkProbe;

use crate::config::CollectorConfig;
use crate::error::{PulseError, Result};
use crate::identity::SelfIdentityProvider;
use crate::metrics::{DockerStatConverter, StatConverter};
use crate::runtime::{ContainerDescriptor, RuntimeClient};
use crate::sink::{EventSink, MetricEvent};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub eviction_threshold: Duration,
    pub max_concurrent_fetches: usize,
    /// `None` disables the self check
    pub sdk_probe: Option<SdkProbe>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            eviction_threshold: Duration::from_secs(60),
            max_concurrent_fetches: 4,
            sdk_probe: Some(SdkProbe::default()),
        }
    }
}

impl CollectorSettings {
    pub fn from_config(config: &CollectorConfig) -> Result<Self> {
        Ok(Self {
            eviction_threshold: config.eviction_threshold()?,
            max_concurrent_fetches: config.max_concurrent_fetches,
            sdk_probe: SdkProbe::from_config(&config.sdk_check),
        })
    }
}

/// Outcome of one collection cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub containers_listed: usize,
    pub containers_processed: usize,
    pub containers_failed: usize,
    pub self_excluded: bool,
    pub events_emitted: usize,
    pub known_containers: usize,
    /// Known containers missing from this cycle's list, not yet evicted
    pub unregistered_containers: usize,
}

pub struct Collector {
    runtime: Arc<dyn RuntimeClient>,
    identity: Arc<dyn SelfIdentityProvider>,
    converter: Arc<dyn StatConverter>,
    sink: Arc<dyn EventSink>,
    settings: CollectorSettings,
    registry: Mutex<ContainerRegistry>,
}

impl Collector {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        identity: Arc<dyn SelfIdentityProvider>,
        sink: Arc<dyn EventSink>,
        settings: CollectorSettings,
    ) -> Self {
        let registry = Mutex::new(ContainerRegistry::new(settings.eviction_threshold));

        Self {
            runtime,
            identity,
            converter: Arc::new(DockerStatConverter),
            sink,
            settings,
            registry,
        }
    }

    pub fn with_converter(mut self, converter: Arc<dyn StatConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Run one complete cycle.
    ///
    /// Fails with [`PulseError::CycleInProgress`] if another cycle holds the
    /// registry; the call is dropped rather than interleaved.
    pub async fn collect_stats_and_send(&self) -> Result<CycleReport> {
        let mut registry = self
            .registry
            .try_lock()
            .map_err(|_| PulseError::CycleInProgress)?;

        let span = info_span!("cycle", cycle_id = %Uuid::new_v4());
        self.run_cycle(&mut registry).instrument(span).await
    }

    async fn run_cycle(&self, registry: &mut ContainerRegistry) -> Result<CycleReport> {
        let host_name = self.runtime.host_name().await?;
        let containers = self.runtime.containers().await?;

        registry.update(&containers, Utc::now());

        let mut report = CycleReport {
            containers_listed: containers.len(),
            known_containers: registry.len(),
            unregistered_containers: registry.unregistered_count(),
            ..Default::default()
        };

        if containers.is_empty() {
            debug!("No running containers");
            return Ok(report);
        }

        let excluded = self.self_reporting_container(&containers).await;
        report.self_excluded = excluded.is_some();

        let eligible = containers
            .iter()
            .filter(|c| excluded.map_or(true, |me| me.id != c.id));

        // Fetches run concurrently; `buffered` keeps the results in list order
        let samples: Vec<_> = stream::iter(eligible)
            .map(|container| async move { (container, self.runtime.stats(container).await) })
            .buffered(self.settings.max_concurrent_fetches.max(1))
            .collect()
            .await;

        for (container, sample) in samples {
            let stats = match sample {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(
                        container = %container.short_id(),
                        error = %e,
                        "Failed to fetch container stats, skipping"
                    );
                    report.containers_failed += 1;
                    continue;
                }
            };

            let properties = Arc::new(self.converter.container_properties(container, &host_name));
            let metrics = self.converter.convert_to_metrics(&stats);
            report.containers_processed += 1;

            for metric in metrics {
                self.sink.send(MetricEvent {
                    metric,
                    properties: Arc::clone(&properties),
                });
                report.events_emitted += 1;
            }
        }

        Ok(report)
    }

    /// Our own container, if it is listed and already runs an SDK that
    /// reports its telemetry.
    async fn self_reporting_container<'a>(
        &self,
        containers: &'a [ContainerDescriptor],
    ) -> Option<&'a ContainerDescriptor> {
        let probe = self.settings.sdk_probe.as_ref()?;
        let my_id = self.identity.my_container_id()?;
        let me = containers.iter().find(|c| c.matches_id(&my_id))?;

        match self.runtime.run_command(me, &probe.command).await {
            Ok(output) => {
                if probe.instrumentation_key(&output).is_some() {
                    info!(
                        container = %me.short_id(),
                        "Own container already reports telemetry, excluding it"
                    );
                    Some(me)
                } else {
                    None
                }
            }
            Err(e) => {
                debug!(
                    container = %me.short_id(),
                    error = %e,
                    "SDK check failed, assuming no SDK"
                );
                None
            }
        }
    }
}

/// Trigger a cycle every `every`. Ticks that fire while a cycle is still
/// running are skipped.
pub async fn run_loop(collector: Arc<Collector>, every: Duration) {
    info!(interval = ?every, "Starting collection loop");

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        match collector.collect_stats_and_send().await {
            Ok(report) => {
                info!(
                    listed = report.containers_listed,
                    processed = report.containers_processed,
                    failed = report.containers_failed,
                    self_excluded = report.self_excluded,
                    events = report.events_emitted,
                    known = report.known_containers,
                    unregistered = report.unregistered_containers,
                    "Collection cycle complete"
                );
            }
            Err(PulseError::CycleInProgress) => {
                debug!("Previous cycle still running, skipping tick");
            }
            Err(e) => {
                error!(error = %e, "Collection cycle failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeWrapperError;
    use crate::identity::StaticIdentity;
    use crate::metrics::MetricRecord;
    use crate::runtime::RawStats;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    type RtResult<T> = std::result::Result<T, RuntimeWrapperError>;

    struct FakeRuntime {
        containers: std::sync::Mutex<RtResult<Vec<ContainerDescriptor>>>,
        command_result: RtResult<String>,
        failing_stats: HashSet<String>,
        stats_calls: std::sync::Mutex<Vec<String>>,
        command_calls: AtomicUsize,
    }

    impl FakeRuntime {
        fn new(ids: &[&str], command_result: RtResult<String>) -> Self {
            Self {
                containers: std::sync::Mutex::new(Ok(containers(ids))),
                command_result,
                failing_stats: HashSet::new(),
                stats_calls: std::sync::Mutex::new(Vec::new()),
                command_calls: AtomicUsize::new(0),
            }
        }

        fn set_containers(&self, ids: &[&str]) {
            *self.containers.lock().unwrap() = Ok(containers(ids));
        }

        fn stats_calls(&self) -> Vec<String> {
            self.stats_calls.lock().unwrap().clone()
        }
    }

    fn containers(ids: &[&str]) -> Vec<ContainerDescriptor> {
        ids.iter().map(|id| ContainerDescriptor::new(*id)).collect()
    }

    #[async_trait]
    impl RuntimeClient for FakeRuntime {
        async fn host_name(&self) -> RtResult<String> {
            Ok("host".to_string())
        }

        async fn containers(&self) -> RtResult<Vec<ContainerDescriptor>> {
            self.containers.lock().unwrap().clone()
        }

        async fn stats(&self, container: &ContainerDescriptor) -> RtResult<RawStats> {
            self.stats_calls.lock().unwrap().push(container.id.clone());
            if self.failing_stats.contains(&container.id) {
                return Err(RuntimeWrapperError::NotFound(container.id.clone()));
            }
            Ok(RawStats::default())
        }

        async fn run_command(
            &self,
            _container: &ContainerDescriptor,
            _command: &[String],
        ) -> RtResult<String> {
            self.command_calls.fetch_add(1, Ordering::SeqCst);
            self.command_result.clone()
        }
    }

    struct FakeConverter {
        metrics: Vec<MetricRecord>,
    }

    impl FakeConverter {
        fn with_metrics(names: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                metrics: names.iter().map(|n| MetricRecord::new(*n, 1.0)).collect(),
            })
        }
    }

    impl StatConverter for FakeConverter {
        fn container_properties(
            &self,
            container: &ContainerDescriptor,
            host_name: &str,
        ) -> BTreeMap<String, String> {
            let mut properties = BTreeMap::new();
            properties.insert("p1".to_string(), "v1".to_string());
            properties.insert("p2".to_string(), "v2".to_string());
            properties.insert("host".to_string(), host_name.to_string());
            properties.insert("id".to_string(), container.id.clone());
            properties
        }

        fn convert_to_metrics(&self, _stats: &RawStats) -> Vec<MetricRecord> {
            self.metrics.clone()
        }
    }

    type Events = Arc<std::sync::Mutex<Vec<MetricEvent>>>;

    fn collector_with(
        runtime: Arc<FakeRuntime>,
        my_id: Option<&str>,
        metrics: &[&str],
        settings: CollectorSettings,
    ) -> (Collector, Events) {
        let events: Events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let sink: Arc<dyn EventSink> =
            Arc::new(move |event: MetricEvent| sink_events.lock().unwrap().push(event));

        let collector = Collector::new(
            runtime,
            Arc::new(StaticIdentity(my_id.map(str::to_string))),
            sink,
            settings,
        )
        .with_converter(FakeConverter::with_metrics(metrics));

        (collector, events)
    }

    fn collector(
        runtime: Arc<FakeRuntime>,
        my_id: Option<&str>,
        metrics: &[&str],
    ) -> (Collector, Events) {
        collector_with(runtime, my_id, metrics, CollectorSettings::default())
    }

    fn ids_of(events: &Events) -> Vec<String> {
        events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.properties["id"].clone())
            .collect()
    }

    const METRICS: [&str; 3] = ["m1", "m2", "m3"];

    #[tokio::test]
    async fn test_collect_and_send() {
        let runtime = Arc::new(FakeRuntime::new(&["c1", "c2", "c3"], Ok(String::new())));
        let (collector, events) = collector(runtime.clone(), Some("c1"), &METRICS);

        let report = collector.collect_stats_and_send().await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 9);
        assert_eq!(report.events_emitted, 9);
        assert_eq!(report.containers_processed, 3);
        assert!(!report.self_excluded);
        for event in events.iter() {
            assert!(METRICS.contains(&event.metric.name.as_str()));
            assert_eq!(event.properties["p1"], "v1");
            assert_eq!(event.properties["p2"], "v2");
            assert_eq!(event.properties["host"], "host");
        }
        assert_eq!(runtime.command_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_events_when_no_containers() {
        let runtime = Arc::new(FakeRuntime::new(
            &[],
            Ok("InstrumentationKey=ikey".to_string()),
        ));
        let (collector, events) = collector(runtime.clone(), Some("c1"), &METRICS);

        let report = collector.collect_stats_and_send().await.unwrap();

        assert!(events.lock().unwrap().is_empty());
        assert_eq!(report, CycleReport::default());
        assert!(runtime.stats_calls().is_empty());
        assert_eq!(runtime.command_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_events_when_no_metrics() {
        let runtime = Arc::new(FakeRuntime::new(&["c1", "c2"], Ok(String::new())));
        let (collector, events) = collector(runtime, Some("c1"), &[]);

        let report = collector.collect_stats_and_send().await.unwrap();

        assert!(events.lock().unwrap().is_empty());
        assert_eq!(report.containers_processed, 2);
        assert_eq!(report.events_emitted, 0);
    }

    #[tokio::test]
    async fn test_own_container_excluded_when_sdk_running() {
        let runtime = Arc::new(FakeRuntime::new(
            &["c1", "c2", "c3"],
            Ok("InstrumentationKey=ikey".to_string()),
        ));
        let (collector, events) = collector(runtime.clone(), Some("c1"), &METRICS);

        let report = collector.collect_stats_and_send().await.unwrap();

        assert!(report.self_excluded);
        assert_eq!(events.lock().unwrap().len(), 6);
        assert!(!ids_of(&events).contains(&"c1".to_string()));
        assert_eq!(runtime.stats_calls(), vec!["c2", "c3"]);
    }

    #[tokio::test]
    async fn test_only_own_container_with_sdk_sends_nothing() {
        let runtime = Arc::new(FakeRuntime::new(
            &["c1"],
            Ok("InstrumentationKey=ikey".to_string()),
        ));
        let (collector, events) = collector(runtime.clone(), Some("c1"), &METRICS);

        collector.collect_stats_and_send().await.unwrap();

        assert!(events.lock().unwrap().is_empty());
        assert!(runtime.stats_calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_sdk_check_means_no_sdk() {
        let runtime = Arc::new(FakeRuntime::new(
            &["c1"],
            Err(RuntimeWrapperError::NotRunning("c1".to_string())),
        ));
        let (collector, events) = collector(runtime, Some("c1"), &METRICS);

        let report = collector.collect_stats_and_send().await.unwrap();

        assert_eq!(events.lock().unwrap().len(), 3);
        assert!(!report.self_excluded);
    }

    #[tokio::test]
    async fn test_sdk_check_only_runs_for_own_container() {
        let runtime = Arc::new(FakeRuntime::new(
            &["c1", "c2"],
            Ok("InstrumentationKey=ikey".to_string()),
        ));
        let (collector, events) = collector(runtime.clone(), Some("c9"), &METRICS);

        collector.collect_stats_and_send().await.unwrap();

        assert_eq!(runtime.command_calls.load(Ordering::SeqCst), 0);
        assert_eq!(events.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_not_in_a_container() {
        let runtime = Arc::new(FakeRuntime::new(
            &["c1"],
            Ok("InstrumentationKey=ikey".to_string()),
        ));
        let (collector, events) = collector(runtime.clone(), None, &METRICS);

        collector.collect_stats_and_send().await.unwrap();

        assert_eq!(runtime.command_calls.load(Ordering::SeqCst), 0);
        assert_eq!(events.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_short_own_id_matches() {
        let full = "9a8b7c6d5e4f".to_string() + &"0".repeat(52);
        let runtime = Arc::new(FakeRuntime::new(
            &[full.as_str(), "c2"],
            Ok("InstrumentationKey=ikey".to_string()),
        ));
        let (collector, events) = collector(runtime, Some("9a8b7c6d5e4f"), &METRICS);

        let report = collector.collect_stats_and_send().await.unwrap();

        assert!(report.self_excluded);
        assert_eq!(ids_of(&events), vec!["c2", "c2", "c2"]);
    }

    #[tokio::test]
    async fn test_disabled_sdk_check() {
        let runtime = Arc::new(FakeRuntime::new(
            &["c1"],
            Ok("InstrumentationKey=ikey".to_string()),
        ));
        let settings = CollectorSettings {
            sdk_probe: None,
            ..Default::default()
        };
        let (collector, events) =
            collector_with(runtime.clone(), Some("c1"), &METRICS, settings);

        collector.collect_stats_and_send().await.unwrap();

        assert_eq!(runtime.command_calls.load(Ordering::SeqCst), 0);
        assert_eq!(events.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failing_container_is_skipped() {
        let mut runtime = FakeRuntime::new(&["c1", "c2", "c3"], Ok(String::new()));
        runtime.failing_stats.insert("c2".to_string());
        let runtime = Arc::new(runtime);
        let (collector, events) = collector(runtime, None, &METRICS);

        let report = collector.collect_stats_and_send().await.unwrap();

        assert_eq!(report.containers_failed, 1);
        assert_eq!(report.containers_processed, 2);
        assert_eq!(events.lock().unwrap().len(), 6);
        assert!(!ids_of(&events).contains(&"c2".to_string()));
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_cycle() {
        let runtime = Arc::new(FakeRuntime::new(&[], Ok(String::new())));
        *runtime.containers.lock().unwrap() =
            Err(RuntimeWrapperError::Unavailable("socket closed".to_string()));
        let (collector, events) = collector(runtime, None, &METRICS);

        let err = collector.collect_stats_and_send().await.unwrap_err();

        assert!(matches!(err, PulseError::Runtime(RuntimeWrapperError::Unavailable(_))));
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_events_in_container_then_metric_order() {
        let runtime = Arc::new(FakeRuntime::new(&["c1", "c2", "c3"], Ok(String::new())));
        let settings = CollectorSettings {
            max_concurrent_fetches: 3,
            ..Default::default()
        };
        let (collector, events) = collector_with(runtime, None, &["a", "b"], settings);

        collector.collect_stats_and_send().await.unwrap();

        let order: Vec<(String, String)> = events
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.properties["id"].clone(), e.metric.name.clone()))
            .collect();
        let expected: Vec<(String, String)> = ["c1", "c2", "c3"]
            .iter()
            .flat_map(|id| ["a", "b"].iter().map(move |m| (id.to_string(), m.to_string())))
            .collect();
        assert_eq!(order, expected);
    }

    #[tokio::test]
    async fn test_properties_shared_within_container() {
        let runtime = Arc::new(FakeRuntime::new(&["c1"], Ok(String::new())));
        let (collector, events) = collector(runtime, None, &METRICS);

        collector.collect_stats_and_send().await.unwrap();

        let events = events.lock().unwrap();
        assert!(Arc::ptr_eq(&events[0].properties, &events[2].properties));
    }

    #[tokio::test]
    async fn test_registry_remembers_departed_containers() {
        let runtime = Arc::new(FakeRuntime::new(&["c1", "c2"], Ok(String::new())));
        let (collector, events) = collector(runtime.clone(), None, &METRICS);

        let report = collector.collect_stats_and_send().await.unwrap();
        assert_eq!(report.known_containers, 2);

        runtime.set_containers(&["c1"]);
        let report = collector.collect_stats_and_send().await.unwrap();
        assert_eq!(report.known_containers, 2);
        assert_eq!(report.unregistered_containers, 1);
        assert_eq!(report.containers_processed, 1);
        assert_eq!(events.lock().unwrap().len(), 9);

        let registry = collector.registry.lock().await;
        assert!(registry.get("c2").unwrap().unregistered_at.is_some());
        assert!(registry.get("c1").unwrap().is_registered());
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_dropped() {
        let runtime = Arc::new(FakeRuntime::new(&["c1"], Ok(String::new())));
        let (collector, events) = collector(runtime.clone(), None, &METRICS);

        let held = collector.registry.lock().await;
        let err = collector.collect_stats_and_send().await.unwrap_err();
        drop(held);

        assert!(matches!(err, PulseError::CycleInProgress));
        assert!(events.lock().unwrap().is_empty());
        assert!(runtime.stats_calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_loop_triggers_cycles() {
        let runtime = Arc::new(FakeRuntime::new(&["c1"], Ok(String::new())));
        let (collector, events) = collector(runtime, None, &METRICS);

        let _ = tokio::time::timeout(
            Duration::from_millis(200),
            run_loop(Arc::new(collector), Duration::from_millis(20)),
        )
        .await;

        let emitted = events.lock().unwrap().len();
        assert!(emitted >= 6, "expected at least two cycles, got {} events", emitted);
        assert_eq!(emitted % 3, 0);
    }
}
