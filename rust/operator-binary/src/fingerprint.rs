//! A stable hash of everything the compiled StatefulSet is derived from.
//!
//! The input is serialized to JSON and fed into the hasher in a canonical form (object keys
//! sorted, numbers normalized), so neither field order nor map iteration order can change it.
use std::{collections::BTreeMap, hash::Hasher};

use fnv::FnvHasher;
use serde::Serialize;
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use stackable_prometheus_crd::PrometheusClusterSpec;

use crate::config::OperatorConfig;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to serialize the compiler input"))]
    SerializeInput { source: serde_json::Error },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompilerInput<'a> {
    labels: &'a BTreeMap<String, String>,
    annotations: &'a BTreeMap<String, String>,
    spec: &'a PrometheusClusterSpec,
    config: &'a OperatorConfig,
    rule_config_maps: &'a [String],
}

pub fn input_hash(
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
    spec: &PrometheusClusterSpec,
    config: &OperatorConfig,
    rule_config_maps: &[String],
) -> Result<String, Error> {
    let input = serde_json::to_value(CompilerInput {
        labels,
        annotations,
        spec,
        config,
        rule_config_maps,
    })
    .context(SerializeInputSnafu)?;

    let mut hasher = FnvHasher::with_key(0);
    write_canonical(&input, &mut hasher);
    Ok(hasher.finish().to_string())
}

fn write_canonical(value: &Value, hasher: &mut impl Hasher) {
    match value {
        Value::Null => hasher.write_u8(0),
        Value::Bool(value) => {
            hasher.write_u8(1);
            hasher.write_u8(u8::from(*value));
        }
        Value::Number(number) => {
            hasher.write_u8(2);
            write_str(&normalize_number(number), hasher);
        }
        Value::String(value) => {
            hasher.write_u8(3);
            write_str(value, hasher);
        }
        Value::Array(items) => {
            hasher.write_u8(4);
            write_len(items.len(), hasher);
            for item in items {
                write_canonical(item, hasher);
            }
        }
        Value::Object(map) => {
            hasher.write_u8(5);
            write_len(map.len(), hasher);
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
            for (key, value) in entries {
                write_str(key, hasher);
                write_canonical(value, hasher);
            }
        }
    }
}

/// Fixed width little endian lengths, `write_usize` would depend on the platform
fn write_len(len: usize, hasher: &mut impl Hasher) {
    hasher.write(&(len as u64).to_le_bytes());
}

fn write_str(value: &str, hasher: &mut impl Hasher) {
    write_len(value.len(), hasher);
    hasher.write(value.as_bytes());
}

/// `1`, `1.0` and `1e0` hash identically
fn normalize_number(number: &serde_json::Number) -> String {
    if let Some(value) = number.as_i64() {
        return value.to_string();
    }
    if let Some(value) = number.as_u64() {
        return value.to_string();
    }
    match number.as_f64() {
        Some(value) if value.fract() == 0.0 && value.abs() < i64::MAX as f64 => {
            (value as i64).to_string()
        }
        Some(value) => value.to_string(),
        None => number.to_string(),
    }
}
