//! st-metrics: SmartThings device status to Prometheus recording pipeline
//!
//! The pipeline is split into four collaborators wired together by
//! [`PollLoop`]: a [`TokenSource`] that caches OAuth tokens, a
//! [`StatusReader`] that fetches device statuses, a [`MeasurementExtractor`]
//! that turns attributes into numbers and a [`MetricSink`] that publishes them.

mod error;
pub use error::{Error, Result};

mod types;
pub use types::{AttributeValue, Credentials, DeviceStatus, Measurement, Reading, Token};

mod traits;
pub use traits::{MeasurementExtractor, MetricSink, StatusReader, TokenSource};

pub mod auth;
pub use auth::{OAuthClient, OAuthConfig};

pub mod reader;
pub use reader::{HttpStatusReader, ReaderConfig};

pub mod extract;
pub use extract::{AttributeRule, ExtractionTable, StatusProcessor};

mod loader;
pub use loader::{load_table_file, parse_table};

mod metrics;
pub use metrics::{MetricsHub, PollMetrics};

pub mod recording;
pub use recording::PollLoop;
