use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

pub const DEFAULT_PROMETHEUS_BASE_IMAGE: &str = "quay.io/prometheus/prometheus";
pub const DEFAULT_PROMETHEUS_VERSION: &str = "v2.13.1";
pub const DEFAULT_THANOS_BASE_IMAGE: &str = "quay.io/thanos/thanos";
pub const DEFAULT_THANOS_VERSION: &str = "v0.8.1";
pub const DEFAULT_CONFIG_RELOADER_IMAGE: &str = "jimmidyson/configmap-reload:v0.3.0";
pub const DEFAULT_PROMETHEUS_CONFIG_RELOADER_IMAGE: &str =
    "quay.io/prometheus-operator/prometheus-config-reloader:v0.34.0";
pub const DEFAULT_CONFIG_RELOADER_CPU: &str = "100m";
pub const DEFAULT_CONFIG_RELOADER_MEMORY: &str = "25Mi";
pub const DEFAULT_RELOADER_LOG_FORMAT: &str = "logfmt";
pub const DEFAULT_LOCAL_HOST: &str = "localhost";

/// Operator wide settings that apply to every compiled StatefulSet.
///
/// Loaded once on startup (flags or environment variables) and passed explicitly into
/// [`crate::statefulset::build_prometheus_statefulset`].
#[derive(clap::Args, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    /// Prometheus image used when a PrometheusCluster does not name one.
    #[arg(long, env, default_value = DEFAULT_PROMETHEUS_BASE_IMAGE)]
    pub prometheus_default_base_image: String,

    /// Prometheus version used when a PrometheusCluster does not specify a valid one.
    #[arg(long, env, default_value = DEFAULT_PROMETHEUS_VERSION)]
    pub prometheus_default_version: String,

    /// Thanos image used when the sidecar does not name one.
    #[arg(long, env, default_value = DEFAULT_THANOS_BASE_IMAGE)]
    pub thanos_default_base_image: String,

    #[arg(long, env, default_value = DEFAULT_THANOS_VERSION)]
    pub thanos_default_version: String,

    /// Image of the sidecar reloading Prometheus when rule ConfigMaps change.
    #[arg(long, env, default_value = DEFAULT_CONFIG_RELOADER_IMAGE)]
    pub config_reloader_image: String,

    /// Image of the sidecar rendering the Prometheus configuration.
    #[arg(long, env, default_value = DEFAULT_PROMETHEUS_CONFIG_RELOADER_IMAGE)]
    pub prometheus_config_reloader_image: String,

    /// CPU request and limit of the reloader sidecars, `0` disables both.
    #[arg(long, env, default_value = DEFAULT_CONFIG_RELOADER_CPU)]
    pub config_reloader_cpu: String,

    /// Memory request and limit of the reloader sidecars, `0` disables both.
    #[arg(long, env, default_value = DEFAULT_CONFIG_RELOADER_MEMORY)]
    pub config_reloader_memory: String,

    #[arg(long, env, default_value = DEFAULT_RELOADER_LOG_FORMAT)]
    pub reloader_log_format: String,

    /// Host name the sidecars use to reach Prometheus inside the Pod.
    #[arg(long, env, default_value = DEFAULT_LOCAL_HOST)]
    pub local_host: String,

    /// Label added to every generated object, given as `key=value`. May be repeated.
    #[arg(long = "label", env = "LABELS", value_delimiter = ',', value_parser = parse_label)]
    #[serde(serialize_with = "serialize_labels")]
    pub labels: Vec<(String, String)>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            prometheus_default_base_image: DEFAULT_PROMETHEUS_BASE_IMAGE.to_string(),
            prometheus_default_version: DEFAULT_PROMETHEUS_VERSION.to_string(),
            thanos_default_base_image: DEFAULT_THANOS_BASE_IMAGE.to_string(),
            thanos_default_version: DEFAULT_THANOS_VERSION.to_string(),
            config_reloader_image: DEFAULT_CONFIG_RELOADER_IMAGE.to_string(),
            prometheus_config_reloader_image: DEFAULT_PROMETHEUS_CONFIG_RELOADER_IMAGE
                .to_string(),
            config_reloader_cpu: DEFAULT_CONFIG_RELOADER_CPU.to_string(),
            config_reloader_memory: DEFAULT_CONFIG_RELOADER_MEMORY.to_string(),
            reloader_log_format: DEFAULT_RELOADER_LOG_FORMAT.to_string(),
            local_host: DEFAULT_LOCAL_HOST.to_string(),
            labels: Vec::new(),
        }
    }
}

impl OperatorConfig {
    /// Labels managed by the operator, later entries win on duplicate keys
    pub fn operator_labels(&self) -> BTreeMap<String, String> {
        self.labels.iter().cloned().collect()
    }
}

/// Serializes the effective labels, so neither flag order nor overridden duplicates show up
fn serialize_labels<S: Serializer>(
    labels: &[(String, String)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let effective: BTreeMap<&str, &str> = labels
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    serializer.collect_map(effective)
}

fn parse_label(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected a label in the form key=value, got {input:?}")),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestOpts {
        #[command(flatten)]
        config: OperatorConfig,
    }

    #[test]
    fn test_flag_defaults_match_default_impl() {
        let opts = TestOpts::try_parse_from(["test"]).unwrap();
        assert_eq!(opts.config, OperatorConfig::default());
    }

    #[test]
    fn test_labels() {
        let opts = TestOpts::try_parse_from([
            "test",
            "--label",
            "team=observability",
            "--label",
            "tier=monitoring,team=platform",
        ])
        .unwrap();
        assert_eq!(
            opts.config.operator_labels(),
            BTreeMap::from([
                ("team".to_string(), "platform".to_string()),
                ("tier".to_string(), "monitoring".to_string()),
            ])
        );
    }

    #[test]
    fn test_invalid_label() {
        assert!(TestOpts::try_parse_from(["test", "--label", "novalue"]).is_err());
        assert!(TestOpts::try_parse_from(["test", "--label", "=value"]).is_err());
    }
}
