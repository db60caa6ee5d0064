use crate::extract::LABEL_DEVICE_ID;
use crate::{Measurement, MetricSink, Result};
use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use time::OffsetDateTime;
use tracing::{debug, warn};

const DEVICE_METRIC_HELP: &str = "Device attribute reported by the SmartThings API";

/// Health of the polling loop itself.
#[derive(Clone)]
pub struct PollMetrics {
    pub polls: IntCounter,
    pub poll_failures: IntCounter,
    pub devices: IntGauge,
    pub last_success: Gauge,
}

#[derive(Default)]
struct DeviceGauges {
    vecs: HashMap<String, GaugeVec>,
    /// Label set last written for each (metric, device) pair.
    current: HashMap<(String, String), BTreeMap<String, String>>,
}

/// Owns the registry scraped by `/metrics` and every series written to it.
///
/// Each device has at most one series per metric. When a device's labels
/// change (a rename, a new unit) the old series is dropped.
pub struct MetricsHub {
    pub registry: Registry,
    pub poll: PollMetrics,
    gauges: Mutex<DeviceGauges>,
}

impl MetricsHub {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let poll = PollMetrics {
            polls: IntCounter::new("smartthings_polls_total", "Total status polls attempted")?,
            poll_failures: IntCounter::new(
                "smartthings_poll_failures_total",
                "Total status polls that failed",
            )?,
            devices: IntGauge::new("smartthings_devices", "Devices returned by the last poll")?,
            last_success: Gauge::new(
                "smartthings_last_success_timestamp_seconds",
                "Unix time of the last successful poll",
            )?,
        };
        registry.register(Box::new(poll.polls.clone()))?;
        registry.register(Box::new(poll.poll_failures.clone()))?;
        registry.register(Box::new(poll.devices.clone()))?;
        registry.register(Box::new(poll.last_success.clone()))?;
        Ok(Self {
            registry,
            poll,
            gauges: Mutex::new(DeviceGauges::default()),
        })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }

    /// Current value of `metric_name` for `device_id`, as a scrape would see it.
    pub fn gauge(&self, metric_name: &str, device_id: &str) -> Option<f64> {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == metric_name)
            .flat_map(|family| family.get_metric())
            .find(|metric| {
                metric
                    .get_label()
                    .iter()
                    .any(|l| l.get_name() == LABEL_DEVICE_ID && l.get_value() == device_id)
            })
            .map(|metric| metric.get_gauge().get_value())
    }

    /// Number of series currently registered under `metric_name`.
    pub fn series_count(&self, metric_name: &str) -> usize {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == metric_name)
            .map(|family| family.get_metric().len())
            .sum()
    }

    fn lock_gauges(&self) -> MutexGuard<'_, DeviceGauges> {
        // GaugeVec updates are atomic, so a poisoned map is still consistent.
        match self.gauges.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set(&self, gauges: &mut DeviceGauges, m: &Measurement) -> Result<()> {
        let vec = match gauges.vecs.get(&m.metric_name) {
            Some(vec) => vec.clone(),
            None => {
                let names: Vec<&str> = m.labels.keys().map(String::as_str).collect();
                let vec = GaugeVec::new(Opts::new(&m.metric_name, DEVICE_METRIC_HELP), &names)?;
                self.registry.register(Box::new(vec.clone()))?;
                gauges.vecs.insert(m.metric_name.clone(), vec.clone());
                vec
            }
        };

        vec.get_metric_with(&label_refs(&m.labels))?.set(m.value);

        let key = (m.metric_name.clone(), m.device_id.clone());
        if let Some(previous) = gauges.current.insert(key, m.labels.clone()) {
            if previous != m.labels {
                debug!(
                    metric = %m.metric_name,
                    device = %m.device_id,
                    "labels changed, dropping old series"
                );
                if let Err(e) = vec.remove(&label_refs(&previous)) {
                    debug!(metric = %m.metric_name, error = %e, "old series already gone");
                }
            }
        }
        Ok(())
    }
}

fn label_refs(labels: &BTreeMap<String, String>) -> HashMap<&str, &str> {
    labels
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

impl MetricSink for MetricsHub {
    fn record(&self, measurements: &[Measurement]) {
        let mut gauges = self.lock_gauges();
        for m in measurements {
            if let Err(e) = self.set(&mut gauges, m) {
                warn!(
                    metric = %m.metric_name,
                    device = %m.device_id,
                    error = %e,
                    "failed to record measurement"
                );
            }
        }
    }

    fn poll_succeeded(&self, devices: usize) {
        self.poll.polls.inc();
        self.poll.devices.set(devices as i64);
        self.poll
            .last_success
            .set(OffsetDateTime::now_utc().unix_timestamp() as f64);
    }

    fn poll_failed(&self) {
        self.poll.polls.inc();
        self.poll.poll_failures.inc();
    }
}
