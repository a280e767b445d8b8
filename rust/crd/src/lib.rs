use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use snafu::{OptionExt, Snafu};
use stackable_operator::{
    k8s_openapi::api::core::v1::{
        Affinity, Container, LocalObjectReference, PodSecurityContext, ResourceRequirements,
        Toleration, Volume,
    },
    kube::CustomResource,
    schemars::{self, JsonSchema},
};

use crate::{storage::StorageSpec, thanos::ThanosSpec};

pub mod storage;
pub mod thanos;

pub const APP_NAME: &str = "prometheus";

pub const PROMETHEUS_CONTAINER_NAME: &str = "prometheus";
pub const CONFIG_RELOADER_CONTAINER_NAME: &str = "prometheus-config-reloader";
pub const RULES_RELOADER_CONTAINER_NAME: &str = "rules-configmap-reloader";
pub const THANOS_CONTAINER_NAME: &str = "thanos-sidecar";

pub const GOVERNING_SERVICE_NAME: &str = "prometheus-operated";
pub const DEFAULT_PORT_NAME: &str = "web";
pub const DEFAULT_RETENTION: &str = "24h";

pub const PROMETHEUS_HTTP_PORT: u16 = 9090;
pub const THANOS_GRPC_PORT_NAME: &str = "grpc";
pub const THANOS_GRPC_PORT: u16 = 10901;
pub const THANOS_HTTP_PORT_NAME: &str = "http";
pub const THANOS_HTTP_PORT: u16 = 10902;

pub const STORAGE_DIR: &str = "/prometheus";
pub const CONFIG_DIR: &str = "/etc/prometheus/config";
pub const CONFIG_OUT_DIR: &str = "/etc/prometheus/config_out";
pub const TLS_ASSETS_DIR: &str = "/etc/prometheus/certs";
pub const RULES_DIR: &str = "/etc/prometheus/rules";
pub const SECRETS_DIR: &str = "/etc/prometheus/secrets";
pub const CONFIGMAPS_DIR: &str = "/etc/prometheus/configmaps";

pub const CONFIG_FILENAME: &str = "prometheus.yaml.gz";
pub const CONFIG_ENVSUBST_FILENAME: &str = "prometheus.env.yaml";

/// Sub path used inside persistent volumes, so that the filesystem root (and any `lost+found`)
/// is not mistaken for TSDB data.
pub const STORAGE_SUB_PATH: &str = "prometheus-db";

const NAME_PREFIX: &str = "prometheus";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("object has no name"))]
    ObjectHasNoName,
}

/// A Prometheus server, optionally accompanied by a Thanos sidecar.
///
/// The operator renders a single StatefulSet from this resource. The Prometheus configuration
/// itself is expected in the Secret `prometheus-<name>`, TLS material in
/// `prometheus-<name>-tls-assets`.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "prometheus.stackable.tech",
    version = "v1alpha1",
    kind = "PrometheusCluster",
    plural = "prometheusclusters",
    shortname = "prom",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(default, rename_all = "camelCase")]
pub struct PrometheusClusterSpec {
    /// Prometheus version to deploy, e.g. `v2.13.1`.
    /// Selects the command line flags understood by the binary, and is used as the image tag
    /// unless `tag` or `sha` are set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Full image reference. An image that already carries a tag or digest is used verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image digest (without the `sha256:` prefix). Takes precedence over `tag` and `version`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,

    /// Image tag. Takes precedence over `version`. Deprecated in favour of `image`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Number of Prometheus replicas, defaults to 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// How long to keep data, e.g. `15d`. Defaults to `24h`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<String>,

    /// Maximum number of bytes used by blocks, e.g. `10GB`. Only honoured from Prometheus 2.7 on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_size: Option<String>,

    /// Enables compression of the write-ahead log. Only honoured from Prometheus 2.11 on,
    /// leaving it unset keeps the default of the Prometheus binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wal_compression: Option<bool>,

    /// Bind the web listener to the loopback interface only, e.g. when a proxy sidecar is used.
    pub listen_local: bool,

    /// Name of the container port serving the web UI, defaults to `web`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_prefix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,

    pub enable_admin_api: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<QuerySpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<RulesSpec>,

    /// Where to keep the TSDB. Without this an `emptyDir` is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,

    /// ConfigMaps in the same namespace, mounted to `/etc/prometheus/configmaps/<name>`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub config_maps: Vec<String>,

    /// Secrets in the same namespace, mounted to `/etc/prometheus/secrets/<name>`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,

    /// Additional Pod volumes, appended after the ones managed by the operator.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Additional containers. A container named like one of the operator managed containers
    /// (`prometheus`, `prometheus-config-reloader`, `rules-configmap-reloader`, `thanos-sidecar`)
    /// is merged into it instead of being added.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,

    /// Labels and annotations added to the Pods. They are never part of the StatefulSet selector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_metadata: Option<EmbeddedObjectMetadata>,

    /// Resources of the Prometheus container. If only a memory limit is given, the memory
    /// request defaults to the smaller of the limit and 2Gi.
    pub resources: ResourceRequirements,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,

    /// Runs a Thanos sidecar next to Prometheus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thanos: Option<ThanosSpec>,
}

/// The subset of `ObjectMeta` that users may set on generated objects.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmbeddedObjectMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QuerySpec {
    /// The delta difference allowed for retrieving metrics during expression evaluations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookback_delta: Option<String>,
    /// Number of concurrent queries, values below 1 are replaced by 20.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<i32>,
    /// Maximum number of samples a single query can load into memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_samples: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RulesSpec {
    pub alert: RulesAlertSpec,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RulesAlertSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub for_outage_tolerance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub for_grace_period: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resend_delay: Option<String>,
}

impl PrometheusCluster {
    fn object_name(&self) -> Result<&str, Error> {
        self.metadata.name.as_deref().context(ObjectHasNoNameSnafu)
    }

    /// Name of the generated StatefulSet
    pub fn statefulset_name(&self) -> Result<String, Error> {
        Ok(format!("{NAME_PREFIX}-{}", self.object_name()?))
    }

    /// The Secret holding the rendered (gzipped) Prometheus configuration
    pub fn config_secret_name(&self) -> Result<String, Error> {
        self.statefulset_name()
    }

    pub fn tls_assets_secret_name(&self) -> Result<String, Error> {
        Ok(format!("{NAME_PREFIX}-{}-tls-assets", self.object_name()?))
    }

    /// Name of the data volume, unless the volume claim template brings its own
    pub fn default_storage_volume_name(&self) -> Result<String, Error> {
        Ok(format!("{NAME_PREFIX}-{}-db", self.object_name()?))
    }

    /// Labels that identify the Pods of this Prometheus. These must never change during the
    /// lifetime of the StatefulSet.
    pub fn pod_selector_labels(&self) -> Result<BTreeMap<String, String>, Error> {
        Ok([
            ("app".to_string(), APP_NAME.to_string()),
            (APP_NAME.to_string(), self.object_name()?.to_string()),
        ]
        .into())
    }

    pub fn port_name(&self) -> &str {
        self.spec
            .port_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_PORT_NAME)
    }

    pub fn retention(&self) -> &str {
        self.spec
            .retention
            .as_deref()
            .filter(|retention| !retention.is_empty())
            .unwrap_or(DEFAULT_RETENTION)
    }

    pub fn route_prefix(&self) -> &str {
        self.spec
            .route_prefix
            .as_deref()
            .filter(|prefix| !prefix.is_empty())
            .unwrap_or("/")
    }

    /// Negative replica counts are treated as zero
    pub fn replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(1).max(0)
    }

    /// Whether the Thanos sidecar ships blocks to object storage
    pub fn uploads_to_object_storage(&self) -> bool {
        self.spec
            .thanos
            .as_ref()
            .is_some_and(|thanos| thanos.object_storage_config.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let input = r#"
        apiVersion: prometheus.stackable.tech/v1alpha1
        kind: PrometheusCluster
        metadata:
          name: simple-prometheus
        spec: {}
        "#;
        let prometheus: PrometheusCluster =
            serde_yaml::from_str(input).expect("illegal test input");

        assert_eq!(prometheus.retention(), "24h");
        assert_eq!(prometheus.port_name(), "web");
        assert_eq!(prometheus.route_prefix(), "/");
        assert_eq!(prometheus.replicas(), 1);
        assert!(!prometheus.spec.listen_local);
        assert_eq!(prometheus.spec.wal_compression, None);
        assert!(!prometheus.uploads_to_object_storage());
        assert_eq!(
            prometheus.statefulset_name().unwrap(),
            "prometheus-simple-prometheus"
        );
        assert_eq!(
            prometheus.tls_assets_secret_name().unwrap(),
            "prometheus-simple-prometheus-tls-assets"
        );
        assert_eq!(
            prometheus.default_storage_volume_name().unwrap(),
            "prometheus-simple-prometheus-db"
        );
    }

    #[test]
    fn test_spec_fields() {
        let input = r#"
        apiVersion: prometheus.stackable.tech/v1alpha1
        kind: PrometheusCluster
        metadata:
          name: simple-prometheus
        spec:
          version: v2.11.0
          replicas: -3
          retention: 15d
          retentionSize: 10GB
          walCompression: false
          listenLocal: true
          portName: http-web
          configMaps:
            - extra
          podMetadata:
            labels:
              team: observability
          thanos:
            listenLocal: true
            objectStorageConfig:
              name: thanos-objstore
              key: objstore.yaml
        "#;
        let prometheus: PrometheusCluster =
            serde_yaml::from_str(input).expect("illegal test input");

        assert_eq!(prometheus.spec.version.as_deref(), Some("v2.11.0"));
        assert_eq!(prometheus.replicas(), 0);
        assert_eq!(prometheus.retention(), "15d");
        assert_eq!(prometheus.spec.retention_size.as_deref(), Some("10GB"));
        assert_eq!(prometheus.spec.wal_compression, Some(false));
        assert!(prometheus.spec.listen_local);
        assert_eq!(prometheus.port_name(), "http-web");
        assert_eq!(prometheus.spec.config_maps, vec!["extra".to_string()]);
        assert_eq!(
            prometheus
                .spec
                .pod_metadata
                .as_ref()
                .and_then(|meta| meta.labels.get("team"))
                .map(String::as_str),
            Some("observability")
        );
        assert!(prometheus.uploads_to_object_storage());
    }

    #[test]
    fn test_missing_name() {
        let input = r#"
        apiVersion: prometheus.stackable.tech/v1alpha1
        kind: PrometheusCluster
        metadata: {}
        spec: {}
        "#;
        let prometheus: PrometheusCluster =
            serde_yaml::from_str(input).expect("illegal test input");

        assert!(matches!(
            prometheus.statefulset_name(),
            Err(Error::ObjectHasNoName)
        ));
    }
}
