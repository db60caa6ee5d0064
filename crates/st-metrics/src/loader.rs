use crate::extract::ExtractionTable;
use anyhow::Context;
use serde_yaml::Value;
use std::fs;
use std::path::Path;

/// Parse an extraction table from YAML text.
///
/// ```yaml
/// prefix: smartthings
/// attributes:
///   switch:
///     metric: switch
///     states: { "on": 1, "off": 0 }
///   temperature:
///     metric: temperature
/// ```
pub fn parse_table(raw: &str) -> anyhow::Result<ExtractionTable> {
    let val: Value = serde_yaml::from_str(raw).context("parsing yaml")?;
    let table: ExtractionTable =
        serde_yaml::from_value(val).context("decoding extraction table")?;
    table.validate()?;
    Ok(table)
}

pub fn load_table_file(path: impl AsRef<Path>) -> anyhow::Result<ExtractionTable> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading extraction table: {}", path.display()))?;
    parse_table(&raw).with_context(|| format!("loading extraction table: {}", path.display()))
}
