//! Attribute to measurement extraction.

use crate::{
    AttributeValue, DeviceStatus, Error, Measurement, MeasurementExtractor, Reading, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace};

pub const DEFAULT_PREFIX: &str = "smartthings";

pub const LABEL_DEVICE_ID: &str = "device_id";
/// Display name at poll time. A rename replaces the device's series rather
/// than adding one next to it.
pub const LABEL_DEVICE_NAME: &str = "device_name";
pub const LABEL_UNIT: &str = "unit";

/// How one attribute becomes a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRule {
    /// Metric name without the table prefix.
    pub metric: String,
    /// Enumerated text states and the numbers they map to.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub states: BTreeMap<String, f64>,
}

impl AttributeRule {
    pub fn numeric(metric: &str) -> Self {
        Self {
            metric: metric.to_string(),
            states: BTreeMap::new(),
        }
    }

    pub fn states(metric: &str, states: &[(&str, f64)]) -> Self {
        Self {
            metric: metric.to_string(),
            states: states.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    /// Convert a reported value to a number, if this rule can.
    pub fn coerce(&self, value: &Reading) -> Option<f64> {
        let out = match value {
            Reading::Number(n) => Some(*n),
            Reading::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Reading::Text(s) => self
                .states
                .get(s.as_str())
                .copied()
                .or_else(|| s.trim().parse::<f64>().ok()),
            Reading::Other(_) => None,
        };
        out.filter(|v| v.is_finite())
    }
}

/// Supported attributes, keyed by attribute name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionTable {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeRule>,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

impl Default for ExtractionTable {
    fn default() -> Self {
        let on_off = [("on", 1.0), ("off", 0.0)];
        let open_closed = [("open", 1.0), ("closed", 0.0)];
        let active = [("active", 1.0), ("inactive", 0.0)];
        let detected = [("detected", 1.0), ("clear", 0.0), ("tested", 2.0)];

        let rules = [
            ("switch", AttributeRule::states("switch", &on_off)),
            ("contact", AttributeRule::states("contact", &open_closed)),
            ("motion", AttributeRule::states("motion", &active)),
            ("acceleration", AttributeRule::states("acceleration", &active)),
            (
                "presence",
                AttributeRule::states("presence", &[("present", 1.0), ("not present", 0.0)]),
            ),
            ("water", AttributeRule::states("water", &[("wet", 1.0), ("dry", 0.0)])),
            (
                "lock",
                AttributeRule::states("lock", &[("locked", 1.0), ("unlocked", 0.0)]),
            ),
            (
                "tamper",
                AttributeRule::states("tamper", &[("detected", 1.0), ("clear", 0.0)]),
            ),
            ("smoke", AttributeRule::states("smoke", &detected)),
            ("carbonMonoxide", AttributeRule::states("carbon_monoxide", &detected)),
            (
                "door",
                AttributeRule::states(
                    "door",
                    &[("closed", 0.0), ("open", 1.0), ("opening", 2.0), ("closing", 3.0)],
                ),
            ),
            ("temperature", AttributeRule::numeric("temperature")),
            ("humidity", AttributeRule::numeric("humidity")),
            ("battery", AttributeRule::numeric("battery")),
            ("illuminance", AttributeRule::numeric("illuminance")),
            ("power", AttributeRule::numeric("power")),
            ("energy", AttributeRule::numeric("energy")),
            ("voltage", AttributeRule::numeric("voltage")),
            ("level", AttributeRule::numeric("level")),
            ("ultravioletIndex", AttributeRule::numeric("ultraviolet_index")),
            ("carbonDioxide", AttributeRule::numeric("carbon_dioxide")),
            ("heatingSetpoint", AttributeRule::numeric("heating_setpoint")),
            ("coolingSetpoint", AttributeRule::numeric("cooling_setpoint")),
            ("thermostatSetpoint", AttributeRule::numeric("thermostat_setpoint")),
        ];

        Self {
            prefix: default_prefix(),
            attributes: rules
                .into_iter()
                .map(|(name, rule)| (name.to_string(), rule))
                .collect(),
        }
    }
}

impl ExtractionTable {
    pub fn rule(&self, attribute: &str) -> Option<&AttributeRule> {
        self.attributes.get(attribute)
    }

    pub fn metric_name(&self, rule: &AttributeRule) -> String {
        if self.prefix.is_empty() {
            rule.metric.clone()
        } else {
            format!("{}_{}", self.prefix, rule.metric)
        }
    }

    /// Reject tables that would produce invalid Prometheus metric names.
    pub fn validate(&self) -> Result<()> {
        for (attribute, rule) in &self.attributes {
            let name = self.metric_name(rule);
            if !is_valid_metric_name(&name) {
                return Err(Error::InvalidTable(format!(
                    "attribute {attribute}: invalid metric name {name:?}"
                )));
            }
        }
        Ok(())
    }
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Table driven [`MeasurementExtractor`].
#[derive(Debug, Clone, Default)]
pub struct StatusProcessor {
    table: ExtractionTable,
}

impl StatusProcessor {
    pub fn new(table: ExtractionTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &ExtractionTable {
        &self.table
    }

    fn measurement(
        &self,
        status: &DeviceStatus,
        attribute: &str,
        value: &AttributeValue,
    ) -> Option<Measurement> {
        let Some(rule) = self.table.rule(attribute) else {
            trace!(device = %status.device_id, attribute, "attribute not supported");
            return None;
        };
        let Some(number) = rule.coerce(&value.value) else {
            debug!(
                device = %status.device_id,
                attribute,
                value = ?value.value,
                "skipping attribute that has no numeric form"
            );
            return None;
        };

        let mut labels = BTreeMap::new();
        labels.insert(LABEL_DEVICE_ID.to_string(), status.device_id.clone());
        labels.insert(LABEL_DEVICE_NAME.to_string(), status.name.clone());
        labels.insert(
            LABEL_UNIT.to_string(),
            value.unit.clone().unwrap_or_default(),
        );

        Some(Measurement {
            device_id: status.device_id.clone(),
            metric_name: self.table.metric_name(rule),
            value: number,
            labels,
        })
    }
}

impl MeasurementExtractor for StatusProcessor {
    fn get_measurements(&self, statuses: &[DeviceStatus]) -> Vec<Measurement> {
        let mut out = Vec::new();
        for status in statuses {
            for (attribute, value) in &status.attributes {
                if let Some(m) = self.measurement(status, attribute, value) {
                    out.push(m);
                }
            }
        }
        out
    }
}
