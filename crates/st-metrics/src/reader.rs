//! Device status reader for the SmartThings REST API.

use crate::{AttributeValue, DeviceStatus, Error, Result, StatusReader, TokenSource};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://api.smartthings.com/v1";

/// Component whose attributes are exported.
const MAIN_COMPONENT: &str = "main";

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub api_url: String,
    pub timeout: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Deserialize)]
struct DevicePage {
    #[serde(default)]
    items: Vec<DeviceSummary>,
    #[serde(default, rename = "_links")]
    links: Option<PageLinks>,
}

#[derive(Deserialize)]
struct PageLinks {
    #[serde(default)]
    next: Option<Link>,
}

#[derive(Deserialize)]
struct Link {
    href: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceSummary {
    device_id: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

// component -> capability -> attribute -> value
type Components = BTreeMap<String, BTreeMap<String, BTreeMap<String, AttributeValue>>>;

#[derive(Deserialize)]
struct StatusBody {
    #[serde(default)]
    components: Components,
}

pub struct HttpStatusReader {
    tokens: Arc<dyn TokenSource>,
    api_url: String,
    client: reqwest::Client,
}

impl HttpStatusReader {
    pub fn new(tokens: Arc<dyn TokenSource>, config: ReaderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(Error::Client)?;
        Ok(Self {
            tokens,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, token: &str) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| Error::Fetch {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::FetchStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        resp.json().await.map_err(|source| Error::Decode {
            url: url.to_string(),
            source,
        })
    }

    async fn list_devices(&self, token: &str) -> Result<Vec<DeviceSummary>> {
        let mut devices = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(format!("{}/devices", self.api_url));
        while let Some(url) = next.take() {
            if !visited.insert(url.clone()) {
                return Err(Error::PaginationLoop { url });
            }
            let page: DevicePage = self.get_json(&url, token).await?;
            debug!(url = %url, count = page.items.len(), "read device page");
            devices.extend(page.items);
            next = page.links.and_then(|l| l.next).map(|l| l.href);
        }
        Ok(devices)
    }

    async fn device_status(&self, token: &str, device: DeviceSummary) -> Result<DeviceStatus> {
        let url = format!("{}/devices/{}/status", self.api_url, device.device_id);
        let mut body: StatusBody = self.get_json(&url, token).await?;

        let mut attributes = BTreeMap::new();
        if let Some(main) = body.components.remove(MAIN_COMPONENT) {
            for (_capability, attrs) in main {
                for (name, value) in attrs {
                    attributes.entry(name).or_insert(value);
                }
            }
        }

        Ok(DeviceStatus {
            device_id: device.device_id,
            name: device.label.or(device.name).unwrap_or_default(),
            attributes,
        })
    }
}

#[async_trait]
impl StatusReader for HttpStatusReader {
    async fn read_statuses(&self) -> Result<Vec<DeviceStatus>> {
        let token = self
            .tokens
            .get_token()
            .await
            .map_err(|e| Error::Auth(Box::new(e)))?;

        let devices = self.list_devices(&token).await?;
        let mut statuses = Vec::with_capacity(devices.len());
        for device in devices {
            statuses.push(self.device_status(&token, device).await?);
        }
        Ok(statuses)
    }
}
