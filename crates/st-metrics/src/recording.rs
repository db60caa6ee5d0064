//! The polling loop: read, extract, record, sleep.

use crate::{MeasurementExtractor, MetricSink, Result, StatusReader};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct PollLoop {
    reader: Arc<dyn StatusReader>,
    extractor: Arc<dyn MeasurementExtractor>,
    sink: Arc<dyn MetricSink>,
    interval: Duration,
}

impl PollLoop {
    pub fn new(
        reader: Arc<dyn StatusReader>,
        extractor: Arc<dyn MeasurementExtractor>,
        sink: Arc<dyn MetricSink>,
        interval: Duration,
    ) -> Self {
        Self {
            reader,
            extractor,
            sink,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one read-extract-record pass. Returns the number of devices read.
    pub async fn record(&self) -> Result<usize> {
        let statuses = self.reader.read_statuses().await?;
        let measurements = self.extractor.get_measurements(&statuses);
        debug!(
            devices = statuses.len(),
            measurements = measurements.len(),
            "recording measurements"
        );
        self.sink.record(&measurements);
        Ok(statuses.len())
    }

    async fn tick(&self) {
        match self.record().await {
            Ok(devices) => self.sink.poll_succeeded(devices),
            Err(e) => {
                warn!(error = %e, "poll failed");
                self.sink.poll_failed();
            }
        }
    }

    /// Spawn the loop on the current runtime and return immediately.
    ///
    /// The loop sleeps `interval` after every tick, failed or not, and only
    /// stops when the task is aborted or the runtime shuts down.
    pub fn start(self) -> JoinHandle<()> {
        info!(interval_secs = self.interval.as_secs(), "starting poll loop");
        tokio::spawn(async move {
            loop {
                self.tick().await;
                tokio::time::sleep(self.interval).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AttributeValue, Credentials, DeviceStatus, Error, HttpStatusReader, MetricsHub,
        OAuthClient, OAuthConfig, Reading, ReaderConfig, StatusProcessor,
    };
    use async_trait::async_trait;
    use mockito::Server;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays queued poll results, then keeps returning the last one.
    struct ScriptedReader {
        script: Mutex<VecDeque<Option<Vec<DeviceStatus>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedReader {
        fn new(script: Vec<Option<Vec<DeviceStatus>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl StatusReader for ScriptedReader {
        async fn read_statuses(&self) -> Result<Vec<DeviceStatus>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            match next.flatten() {
                Some(statuses) => Ok(statuses),
                None => Err(Error::FetchStatus {
                    url: "scripted".into(),
                    status: 500,
                }),
            }
        }
    }

    fn switch(device: &str, state: &str) -> DeviceStatus {
        DeviceStatus::new(device)
            .with_attribute("switch", AttributeValue::new(Reading::Text(state.into())))
    }

    fn pipeline(reader: Arc<dyn StatusReader>, hub: Arc<MetricsHub>) -> PollLoop {
        PollLoop::new(
            reader,
            Arc::new(StatusProcessor::default()),
            hub,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_switch_on_then_off_updates_same_series() {
        let hub = Arc::new(MetricsHub::new().unwrap());
        let reader = Arc::new(ScriptedReader::new(vec![
            Some(vec![switch("d1", "on")]),
            Some(vec![switch("d1", "off")]),
        ]));
        let poll = pipeline(reader, hub.clone());

        assert_eq!(poll.record().await.unwrap(), 1);
        assert_eq!(hub.gauge("smartthings_switch", "d1"), Some(1.0));

        poll.record().await.unwrap();
        assert_eq!(hub.gauge("smartthings_switch", "d1"), Some(0.0));
        assert_eq!(hub.series_count("smartthings_switch"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_failed_ticks() {
        let hub = Arc::new(MetricsHub::new().unwrap());
        let reader = Arc::new(ScriptedReader::new(vec![
            None,
            Some(vec![switch("d1", "on")]),
        ]));
        let poll = pipeline(reader.clone(), hub.clone());

        let handle = poll.start();
        // ticks at t=0, 60 and 120
        tokio::time::sleep(Duration::from_secs(125)).await;

        assert_eq!(reader.calls.load(Ordering::SeqCst), 3);
        assert_eq!(hub.poll.polls.get(), 3);
        assert_eq!(hub.poll.poll_failures.get(), 1);
        assert_eq!(hub.poll.devices.get(), 1);
        assert_eq!(hub.gauge("smartthings_switch", "d1"), Some(1.0));
        handle.abort();
    }

    #[tokio::test]
    async fn test_token_outage_recovers_on_next_tick() {
        let mut server = Server::new_async().await;
        let tokens = Arc::new(
            OAuthClient::new(
                Credentials::new("id", "secret"),
                OAuthConfig {
                    token_url: format!("{}/oauth/token", server.url()),
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        let reader = Arc::new(
            HttpStatusReader::new(
                tokens,
                ReaderConfig {
                    api_url: server.url(),
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        let hub = Arc::new(MetricsHub::new().unwrap());
        let poll = pipeline(reader, hub.clone());

        server
            .mock("GET", "/devices")
            .with_status(200)
            .with_body(json!({ "items": [{ "deviceId": "d1", "label": "Lamp" }] }).to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/devices/d1/status")
            .with_status(200)
            .with_body(
                json!({ "components": { "main": { "switch": { "switch": { "value": "on" } } } } })
                    .to_string(),
            )
            .create_async()
            .await;

        let outage = server
            .mock("POST", "/oauth/token")
            .with_status(500)
            .create_async()
            .await;
        let err = poll.record().await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(hub.gauge("smartthings_switch", "d1"), None);
        outage.remove_async().await;

        server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(
                json!({
                    "access_token": "tok",
                    "token_type": "bearer",
                    "expires_in": 3600,
                    "refresh_token": "r",
                    "scope": "devices:read"
                })
                .to_string(),
            )
            .create_async()
            .await;
        assert_eq!(poll.record().await.unwrap(), 1);
        assert_eq!(hub.gauge("smartthings_switch", "d1"), Some(1.0));
    }
}
