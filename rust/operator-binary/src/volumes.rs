//! Pod volumes, volume claim templates and the mounts of each container.
use std::{collections::BTreeMap, hash::Hasher};

use fnv::FnvHasher;
use snafu::{ensure, ResultExt, Snafu};
use stackable_operator::k8s_openapi::{
    api::core::v1::{
        ConfigMapVolumeSource, EmptyDirVolumeSource, PersistentVolumeClaim,
        PersistentVolumeClaimSpec, SecretVolumeSource, Volume, VolumeMount,
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use stackable_prometheus_crd::{
    PrometheusCluster, CONFIGMAPS_DIR, CONFIG_DIR, CONFIG_OUT_DIR, RULES_DIR, SECRETS_DIR,
    STORAGE_DIR, TLS_ASSETS_DIR,
};

pub const CONFIG_VOLUME_NAME: &str = "config";
pub const CONFIG_OUT_VOLUME_NAME: &str = "config-out";
pub const TLS_ASSETS_VOLUME_NAME: &str = "tls-assets";

const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";
const MAX_VOLUME_NAME_LENGTH: usize = 63;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("object defines no name"))]
    ObjectHasNoName {
        source: stackable_prometheus_crd::Error,
    },

    #[snafu(display("storage must not set both emptyDir and volumeClaimTemplate"))]
    ConflictingStorage,
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything storage related that ends up in the StatefulSet
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PrometheusVolumes {
    pub volumes: Vec<Volume>,
    pub volume_claim_templates: Vec<PersistentVolumeClaim>,
    pub prometheus_mounts: Vec<VolumeMount>,
    pub config_reloader_mounts: Vec<VolumeMount>,
    pub rules_reloader_mounts: Vec<VolumeMount>,
    /// The TSDB mount, shared with the Thanos sidecar
    pub storage_mount: VolumeMount,
}

pub fn build_volumes(
    prometheus: &PrometheusCluster,
    rule_config_map_names: &[String],
) -> Result<PrometheusVolumes> {
    let storage = prometheus.spec.storage.clone().unwrap_or_default();
    ensure!(
        storage.empty_dir.is_none() || storage.volume_claim_template.is_none(),
        ConflictingStorageSnafu
    );

    let mut volumes = vec![
        secret_volume(
            CONFIG_VOLUME_NAME,
            prometheus.config_secret_name().context(ObjectHasNoNameSnafu)?,
        ),
        secret_volume(
            TLS_ASSETS_VOLUME_NAME,
            prometheus
                .tls_assets_secret_name()
                .context(ObjectHasNoNameSnafu)?,
        ),
        Volume {
            name: CONFIG_OUT_VOLUME_NAME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Volume::default()
        },
    ];
    let mut prometheus_mounts = vec![
        mount(CONFIG_OUT_VOLUME_NAME, CONFIG_OUT_DIR, true),
        mount(TLS_ASSETS_VOLUME_NAME, TLS_ASSETS_DIR, true),
    ];

    let rule_mounts: Vec<VolumeMount> = rule_config_map_names
        .iter()
        .map(|name| mount(name, format!("{RULES_DIR}/{name}"), false))
        .collect();
    volumes.extend(
        rule_config_map_names
            .iter()
            .map(|name| config_map_volume(name.clone(), name.clone())),
    );

    let mut volume_claim_templates = Vec::new();
    let mut storage_volume = None;
    let storage_volume_name = match &storage.volume_claim_template {
        Some(template) => {
            let name = match template.metadata.name.clone().filter(|name| !name.is_empty()) {
                Some(name) => name,
                None => prometheus
                    .default_storage_volume_name()
                    .context(ObjectHasNoNameSnafu)?,
            };
            volume_claim_templates.push(build_volume_claim_template(
                &name,
                &template.metadata.labels,
                &template.metadata.annotations,
                &template.spec,
            ));
            name
        }
        None => {
            let name = prometheus
                .default_storage_volume_name()
                .context(ObjectHasNoNameSnafu)?;
            storage_volume = Some(Volume {
                name: name.clone(),
                empty_dir: Some(storage.empty_dir.clone().unwrap_or_default()),
                ..Volume::default()
            });
            name
        }
    };
    let storage_mount = VolumeMount {
        sub_path: storage.mount_sub_path().map(str::to_string),
        ..mount(&storage_volume_name, STORAGE_DIR, false)
    };
    prometheus_mounts.push(storage_mount.clone());
    prometheus_mounts.extend(rule_mounts.iter().cloned());

    for secret in &prometheus.spec.secrets {
        let volume_name = sanitize_volume_name(&format!("secret-{secret}"));
        prometheus_mounts.push(mount(
            &volume_name,
            format!("{SECRETS_DIR}/{secret}"),
            true,
        ));
        volumes.push(secret_volume(&volume_name, secret.clone()));
    }
    for config_map in &prometheus.spec.config_maps {
        let volume_name = sanitize_volume_name(&format!("configmap-{config_map}"));
        prometheus_mounts.push(mount(
            &volume_name,
            format!("{CONFIGMAPS_DIR}/{config_map}"),
            true,
        ));
        volumes.push(config_map_volume(volume_name, config_map.clone()));
    }

    volumes.extend(storage_volume);
    volumes.extend(prometheus.spec.volumes.iter().cloned());

    Ok(PrometheusVolumes {
        volumes,
        volume_claim_templates,
        prometheus_mounts,
        config_reloader_mounts: vec![
            mount(CONFIG_VOLUME_NAME, CONFIG_DIR, false),
            mount(CONFIG_OUT_VOLUME_NAME, CONFIG_OUT_DIR, false),
        ],
        rules_reloader_mounts: rule_mounts,
        storage_mount,
    })
}

fn build_volume_claim_template(
    name: &str,
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
    spec: &PersistentVolumeClaimSpec,
) -> PersistentVolumeClaim {
    let mut spec = spec.clone();
    if spec.access_modes.as_ref().map_or(true, Vec::is_empty) {
        spec.access_modes = Some(vec![DEFAULT_ACCESS_MODE.to_string()]);
    }

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels.clone()).filter(|labels| !labels.is_empty()),
            annotations: Some(annotations.clone()).filter(|annotations| !annotations.is_empty()),
            ..ObjectMeta::default()
        },
        spec: Some(spec),
        ..PersistentVolumeClaim::default()
    }
}

fn mount(name: &str, mount_path: impl Into<String>, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: mount_path.into(),
        read_only: read_only.then_some(true),
        ..VolumeMount::default()
    }
}

fn secret_volume(name: &str, secret_name: String) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name),
            ..SecretVolumeSource::default()
        }),
        ..Volume::default()
    }
}

fn config_map_volume(name: String, config_map_name: String) -> Volume {
    Volume {
        name,
        config_map: Some(ConfigMapVolumeSource {
            name: config_map_name.into(),
            ..ConfigMapVolumeSource::default()
        }),
        ..Volume::default()
    }
}

/// Turns an arbitrary string into a valid DNS-1123 label: lowercase, runs of invalid characters
/// replaced by a single `-`, at most 63 characters and no leading or trailing `-`.
///
/// Valid names are returned unchanged. Any other name gets a hash of the original appended, so
/// that `a.b` and `a_b` stay distinct volumes.
pub fn sanitize_volume_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    let mut in_invalid_run = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
            sanitized.push(c);
            in_invalid_run = false;
        } else if !in_invalid_run {
            sanitized.push('-');
            in_invalid_run = true;
        }
    }
    if sanitized == name
        && name.len() <= MAX_VOLUME_NAME_LENGTH
        && !name.starts_with('-')
        && !name.ends_with('-')
    {
        return sanitized;
    }

    let mut hasher = FnvHasher::with_key(0);
    hasher.write(name.as_bytes());
    let suffix = format!("{:08x}", hasher.finish() as u32);

    sanitized.truncate(MAX_VOLUME_NAME_LENGTH - suffix.len() - 1);
    match sanitized.trim_matches('-') {
        "" => suffix,
        prefix => format!("{prefix}-{suffix}"),
    }
}
