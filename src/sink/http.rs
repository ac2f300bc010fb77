use super::{EventSink, MetricEvent};
use crate::error::{PulseError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct HttpSinkSettings {
    pub endpoint: String,
    pub instrumentation_key: String,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub queue_capacity: usize,
    pub timeout: Duration,
}

struct Queued {
    time: DateTime<Utc>,
    event: MetricEvent,
}

/// Batches events and posts them as Application Insights metric envelopes.
///
/// Delivery happens on a background task. Failed batches are logged and
/// dropped. Once every handle is dropped the task flushes and exits.
pub struct HttpSink {
    tx: mpsc::Sender<Queued>,
}

impl HttpSink {
    pub fn spawn(settings: HttpSinkSettings) -> Result<(Self, JoinHandle<()>)> {
        let client = Client::builder()
            .user_agent(format!("dockpulse/{}", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()
            .map_err(|e| PulseError::Sink(format!("Failed to build HTTP client: {}", e)))?;

        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let worker = tokio::spawn(run_worker(client, settings, rx));

        Ok((Self { tx }, worker))
    }
}

impl EventSink for HttpSink {
    fn send(&self, event: MetricEvent) {
        let queued = Queued {
            time: Utc::now(),
            event,
        };

        if let Err(e) = self.tx.try_send(queued) {
            warn!(error = %e, "Telemetry queue rejected event");
        }
    }
}

async fn run_worker(client: Client, settings: HttpSinkSettings, mut rx: mpsc::Receiver<Queued>) {
    let batch_size = settings.batch_size.max(1);
    let mut batch: Vec<Queued> = Vec::with_capacity(batch_size);

    let mut ticker = tokio::time::interval(settings.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(queued) => {
                    batch.push(queued);
                    if batch.len() >= batch_size {
                        post_batch(&client, &settings, std::mem::take(&mut batch)).await;
                    }
                }
                None => {
                    if !batch.is_empty() {
                        post_batch(&client, &settings, std::mem::take(&mut batch)).await;
                    }
                    break;
                }
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    post_batch(&client, &settings, std::mem::take(&mut batch)).await;
                }
            }
        }
    }

    debug!("Telemetry sink drained");
}

#[derive(Serialize)]
struct Envelope<'a> {
    name: &'a str,
    time: String,
    #[serde(rename = "iKey")]
    ikey: &'a str,
    data: EnvelopeData<'a>,
}

#[derive(Serialize)]
struct EnvelopeData<'a> {
    #[serde(rename = "baseType")]
    base_type: &'static str,
    #[serde(rename = "baseData")]
    base_data: MetricData<'a>,
}

#[derive(Serialize)]
struct MetricData<'a> {
    ver: u8,
    metrics: [DataPoint<'a>; 1],
    properties: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct DataPoint<'a> {
    name: &'a str,
    value: f64,
    count: u32,
}

fn envelope_name(instrumentation_key: &str) -> String {
    format!(
        "Microsoft.ApplicationInsights.{}.Metric",
        instrumentation_key.replace('-', "")
    )
}

fn envelopes<'a>(name: &'a str, ikey: &'a str, batch: &'a [Queued]) -> Vec<Envelope<'a>> {
    batch
        .iter()
        .map(|queued| Envelope {
            name,
            time: queued.time.to_rfc3339_opts(SecondsFormat::Millis, true),
            ikey,
            data: EnvelopeData {
                base_type: "MetricData",
                base_data: MetricData {
                    ver: 2,
                    metrics: [DataPoint {
                        name: &queued.event.metric.name,
                        value: queued.event.metric.value,
                        count: 1,
                    }],
                    properties: &queued.event.properties,
                },
            },
        })
        .collect()
}

async fn post_batch(client: &Client, settings: &HttpSinkSettings, batch: Vec<Queued>) {
    let name = envelope_name(&settings.instrumentation_key);
    let body = envelopes(&name, &settings.instrumentation_key, &batch);

    match client.post(&settings.endpoint).json(&body).send().await {
        Ok(response) if response.status().is_success() => {
            debug!(events = batch.len(), "Telemetry batch sent");
        }
        Ok(response) => {
            warn!(
                status = %response.status(),
                events = batch.len(),
                "Telemetry endpoint rejected batch"
            );
        }
        Err(e) => {
            warn!(error = %e, events = batch.len(), "Failed to send telemetry batch");
        }
    }
}
