use crate::collector::{self, Collector, CollectorSettings, CycleReport};
use crate::config::{Config, IdentityConfig, SinkConfig, SinkType};
use crate::identity::{ProcIdentity, SelfIdentityProvider, StaticIdentity};
use crate::runtime::RuntimeClient;
use crate::shutdown;
use crate::sink::{EventSink, HttpSink, HttpSinkSettings, StdoutSink};
use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Run the collector until a shutdown signal arrives
pub async fn run(config: Config) -> Result<()> {
    let interval = config.collector.interval()?;
    let (collector, worker) = build(&config).await?;

    info!(interval = ?interval, sink = ?config.sink.sink_type, "Collector started");

    tokio::select! {
        _ = collector::run_loop(collector.clone(), interval) => {}
        _ = shutdown::signal() => {}
    }

    drain(collector, worker).await;

    info!("Collector shutdown complete");
    Ok(())
}

/// Run exactly one cycle and flush the sink
pub async fn run_once(config: Config) -> Result<CycleReport> {
    let (collector, worker) = build(&config).await?;

    let report = collector.collect_stats_and_send().await;
    drain(collector, worker).await;

    Ok(report?)
}

async fn build(config: &Config) -> Result<(Arc<Collector>, Option<JoinHandle<()>>)> {
    let runtime = connect_runtime(config).await?;
    let identity = build_identity(&config.identity);
    let (sink, worker) = build_sink(&config.sink)?;
    let settings = CollectorSettings::from_config(&config.collector)?;

    let collector = Arc::new(Collector::new(runtime, identity, sink, settings));
    Ok((collector, worker))
}

/// Dropping the last collector handle closes the sink queue
async fn drain(collector: Arc<Collector>, worker: Option<JoinHandle<()>>) {
    drop(collector);

    if let Some(worker) = worker {
        if let Err(e) = worker.await {
            warn!(error = %e, "Telemetry sink worker failed");
        }
    }
}

#[cfg(feature = "docker")]
async fn connect_runtime(config: &Config) -> Result<Arc<dyn RuntimeClient>> {
    let timeout = config.docker.timeout()?;
    let runtime =
        crate::runtime::DockerRuntime::connect(config.docker.socket.as_deref(), timeout.as_secs())
            .await?;

    info!(socket = ?config.docker.socket, "Connected to Docker");
    let runtime: Arc<dyn RuntimeClient> = Arc::new(runtime);
    Ok(runtime)
}

#[cfg(not(feature = "docker"))]
async fn connect_runtime(_config: &Config) -> Result<Arc<dyn RuntimeClient>> {
    anyhow::bail!("built without a container runtime; enable the `docker` feature")
}

fn build_identity(config: &IdentityConfig) -> Arc<dyn SelfIdentityProvider> {
    match &config.container_id {
        Some(id) => Arc::new(StaticIdentity(Some(id.clone()))),
        None => Arc::new(ProcIdentity::new(
            config.id_file.as_deref(),
            &config.cgroup_path,
            &config.mountinfo_path,
        )),
    }
}

fn build_sink(config: &SinkConfig) -> Result<(Arc<dyn EventSink>, Option<JoinHandle<()>>)> {
    match config.sink_type {
        SinkType::Stdout => {
            let sink: Arc<dyn EventSink> = Arc::new(StdoutSink::new());
            Ok((sink, None))
        }
        SinkType::Http => {
            let settings = HttpSinkSettings {
                endpoint: config.endpoint.clone(),
                instrumentation_key: config.instrumentation_key.clone(),
                batch_size: config.batch_size,
                flush_interval: config.flush_interval()?,
                queue_capacity: config.queue_capacity,
                timeout: config.timeout()?,
            };
            let (sink, worker) = HttpSink::spawn(settings)?;
            let sink: Arc<dyn EventSink> = Arc::new(sink);
            Ok((sink, Some(worker)))
        }
    }
}
