use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::api::core::v1::{ResourceRequirements, SecretKeySelector},
    schemars::{self, JsonSchema},
};

/// Settings of the Thanos sidecar.
///
/// Image resolution follows the same rules as for Prometheus itself.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThanosSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Resources of the sidecar container. Nothing is set by default.
    pub resources: ResourceRequirements,

    /// Bind the gRPC and HTTP listeners to the loopback interface only.
    pub listen_local: bool,

    /// Secret key holding the Thanos object storage configuration.
    /// Setting this makes the sidecar upload blocks and disables local compaction of Prometheus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_storage_config: Option<SecretKeySelector>,

    /// Secret key holding the Thanos tracing configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracing_config: Option<SecretKeySelector>,

    /// Log level of the sidecar, defaults to the log level of Prometheus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,
}
