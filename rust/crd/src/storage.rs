use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::api::core::v1::{EmptyDirVolumeSource, PersistentVolumeClaimSpec},
    schemars::{self, JsonSchema},
};

use crate::EmbeddedObjectMetadata;

/// Storage of the Prometheus TSDB.
///
/// At most one of `emptyDir` and `volumeClaimTemplate` may be set. If neither is, the data lives
/// in an `emptyDir` with default settings.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageSpec {
    /// Mount the volume root instead of the `prometheus-db` sub path.
    /// Only relevant for `volumeClaimTemplate`.
    pub disable_mount_sub_path: bool,

    /// Ephemeral storage, see the Kubernetes `emptyDir` documentation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirVolumeSource>,

    /// Persistent storage, becomes a volume claim template of the StatefulSet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_claim_template: Option<EmbeddedPersistentVolumeClaim>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmbeddedPersistentVolumeClaim {
    pub metadata: EmbeddedObjectMetadata,
    pub spec: PersistentVolumeClaimSpec,
}

impl StorageSpec {
    /// The sub path of the data volume to mount, if any
    pub fn mount_sub_path(&self) -> Option<&'static str> {
        (self.volume_claim_template.is_some() && !self.disable_mount_sub_path)
            .then_some(crate::STORAGE_SUB_PATH)
    }
}
