//! Compiles a [`PrometheusCluster`] into the [`StatefulSet`] running it.
//!
//! [`build_prometheus_statefulset`] is pure: the same inputs always produce the same object,
//! including the input hash annotation, so the caller can skip updates when nothing changed.
use std::collections::BTreeMap;

use snafu::{ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::{
        api::{
            apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy},
            core::v1::{Container, PodSpec, PodTemplateSpec},
        },
        apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta},
    },
    kube::{Resource, ResourceExt},
    logging::controller::ReconcilerError,
};
use stackable_prometheus_crd::{
    PrometheusCluster, CONFIG_RELOADER_CONTAINER_NAME, GOVERNING_SERVICE_NAME,
    PROMETHEUS_CONTAINER_NAME, RULES_RELOADER_CONTAINER_NAME, THANOS_CONTAINER_NAME,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    command,
    config::OperatorConfig,
    containers::merge_containers,
    fingerprint,
    image::{self, ImageReference},
    resources,
    version::{self, FlagDialect, ResolvedVersion},
    volumes::{self, PrometheusVolumes},
};

/// Hash of all inputs, changes whenever the compiled object may change
pub const INPUT_HASH_ANNOTATION: &str = "prometheus-operator-input-hash";

/// Bookkeeping of client tools such as `kubectl apply`, never copied onto generated objects
const CLIENT_TOOL_ANNOTATION_PREFIX: &str = "kubectl.kubernetes.io/";

const CONFIG_RELOADER_COMMAND: &str = "/bin/prometheus-config-reloader";
const TERMINATION_MESSAGE_POLICY: &str = "FallbackToLogsOnError";
const TERMINATION_GRACE_PERIOD_SECONDS: i64 = 600;
const POD_MANAGEMENT_POLICY: &str = "Parallel";
const UPDATE_STRATEGY: &str = "RollingUpdate";

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("object defines no name"))]
    ObjectHasNoName {
        source: stackable_prometheus_crd::Error,
    },

    #[snafu(display("failed to resolve the Prometheus version"))]
    ResolvePrometheusVersion { source: version::Error },

    #[snafu(display("failed to resolve the Thanos version"))]
    ResolveThanosVersion { source: version::Error },

    #[snafu(display("failed to resolve the Prometheus image"))]
    ResolvePrometheusImage { source: image::Error },

    #[snafu(display("failed to resolve the Thanos image"))]
    ResolveThanosImage { source: image::Error },

    #[snafu(display("failed to build volumes"))]
    BuildVolumes { source: volumes::Error },

    #[snafu(display("failed to build the Prometheus resources"))]
    BuildResources { source: resources::Error },

    #[snafu(display("failed to build the Prometheus arguments"))]
    BuildArguments { source: command::Error },

    #[snafu(display("failed to calculate the input hash"))]
    CalculateInputHash { source: fingerprint::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

/// Builds the StatefulSet of `prometheus`.
///
/// `rule_config_map_names` are the ConfigMaps holding the selected rule files, in the order they
/// should be mounted.
pub fn build_prometheus_statefulset(
    prometheus: &PrometheusCluster,
    config: &OperatorConfig,
    rule_config_map_names: &[String],
) -> Result<StatefulSet> {
    let name = prometheus.statefulset_name().context(ObjectHasNoNameSnafu)?;
    tracing::info!(statefulset.name = %name, "Compiling Prometheus StatefulSet");

    let version = ResolvedVersion::resolve(
        prometheus.spec.version.as_deref(),
        &config.prometheus_default_version,
    )
    .context(ResolvePrometheusVersionSnafu)?;
    let dialect = version
        .flag_dialect()
        .context(ResolvePrometheusVersionSnafu)?;
    let prometheus_image = image::resolve_image(
        ImageReference::new(
            prometheus.spec.image.as_deref(),
            prometheus.spec.sha.as_deref(),
            prometheus.spec.tag.as_deref(),
        ),
        &config.prometheus_default_base_image,
        &version,
        PROMETHEUS_CONTAINER_NAME,
    )
    .context(ResolvePrometheusImageSnafu)?;
    tracing::debug!(
        version = %version.version,
        %dialect,
        image = %prometheus_image,
        "Resolved Prometheus version"
    );

    let volumes = volumes::build_volumes(prometheus, rule_config_map_names)
        .context(BuildVolumesSnafu)?;

    let mut containers = vec![
        build_prometheus_container(prometheus, &version, dialect, prometheus_image, &volumes)?,
        build_config_reloader_container(prometheus, config, &volumes),
    ];
    if !rule_config_map_names.is_empty() {
        containers.push(build_rules_reloader_container(prometheus, config, &volumes));
    }
    if let Some(thanos) = build_thanos_container(prometheus, config, &volumes)? {
        containers.push(thanos);
    }

    let mut containers = merge_containers(containers, &prometheus.spec.containers);
    for container in &mut containers {
        container.termination_message_policy = Some(TERMINATION_MESSAGE_POLICY.to_string());
    }

    let operator_labels = config.operator_labels();

    let mut labels = operator_labels.clone();
    labels.extend(prometheus.labels().clone());

    let mut annotations: BTreeMap<String, String> = prometheus
        .annotations()
        .iter()
        .filter(|(key, _)| !key.starts_with(CLIENT_TOOL_ANNOTATION_PREFIX))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let input_hash = fingerprint::input_hash(
        prometheus.labels(),
        &annotations,
        &prometheus.spec,
        config,
        rule_config_map_names,
    )
    .context(CalculateInputHashSnafu)?;
    annotations.insert(INPUT_HASH_ANNOTATION.to_string(), input_hash);

    let mut selector_labels = operator_labels.clone();
    selector_labels.extend(
        prometheus
            .pod_selector_labels()
            .context(ObjectHasNoNameSnafu)?,
    );

    let pod_metadata = prometheus.spec.pod_metadata.clone().unwrap_or_default();
    let mut pod_labels = operator_labels;
    pod_labels.extend(pod_metadata.labels);
    pod_labels.extend(selector_labels.clone());

    let spec = &prometheus.spec;
    let pod_spec = PodSpec {
        containers,
        init_containers: non_empty(&spec.init_containers),
        volumes: non_empty(&volumes.volumes),
        image_pull_secrets: non_empty(&spec.image_pull_secrets),
        service_account_name: spec.service_account_name.clone(),
        node_selector: Some(spec.node_selector.clone()).filter(|map| !map.is_empty()),
        tolerations: non_empty(&spec.tolerations),
        affinity: spec.affinity.clone(),
        security_context: spec.security_context.clone(),
        priority_class_name: spec.priority_class_name.clone(),
        termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD_SECONDS),
        ..PodSpec::default()
    };

    let statefulset = StatefulSet {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: prometheus.namespace(),
            labels: Some(labels).filter(|labels| !labels.is_empty()),
            annotations: Some(annotations),
            owner_references: prometheus.controller_owner_ref(&()).map(|owner| vec![owner]),
            ..ObjectMeta::default()
        },
        spec: Some(StatefulSetSpec {
            pod_management_policy: Some(POD_MANAGEMENT_POLICY.to_string()),
            replicas: Some(prometheus.replicas()),
            selector: LabelSelector {
                match_labels: Some(selector_labels),
                ..LabelSelector::default()
            },
            service_name: GOVERNING_SERVICE_NAME.to_string().into(),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: Some(pod_metadata.annotations)
                        .filter(|annotations| !annotations.is_empty()),
                    ..ObjectMeta::default()
                }),
                spec: Some(pod_spec),
            },
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some(UPDATE_STRATEGY.to_string()),
                ..StatefulSetUpdateStrategy::default()
            }),
            volume_claim_templates: non_empty(&volumes.volume_claim_templates),
            ..StatefulSetSpec::default()
        }),
        status: None,
    };

    tracing::info!(
        statefulset.name = ?statefulset.metadata.name,
        "Compiled Prometheus StatefulSet"
    );
    Ok(statefulset)
}

fn build_prometheus_container(
    prometheus: &PrometheusCluster,
    version: &ResolvedVersion,
    dialect: FlagDialect,
    image: String,
    volumes: &PrometheusVolumes,
) -> Result<Container> {
    let resources =
        resources::prometheus_resources(&prometheus.spec.resources).context(BuildResourcesSnafu)?;
    let args = command::prometheus_args(prometheus, version, dialect, &resources)
        .context(BuildArgumentsSnafu)?;
    let (liveness_probe, readiness_probe) = command::prometheus_probes(prometheus, version);

    Ok(Container {
        name: PROMETHEUS_CONTAINER_NAME.to_string(),
        image: Some(image),
        args: Some(args),
        ports: command::prometheus_ports(prometheus),
        volume_mounts: Some(volumes.prometheus_mounts.clone()),
        liveness_probe: Some(liveness_probe),
        readiness_probe: Some(readiness_probe),
        resources: Some(resources),
        ..Container::default()
    })
}

fn build_config_reloader_container(
    prometheus: &PrometheusCluster,
    config: &OperatorConfig,
    volumes: &PrometheusVolumes,
) -> Container {
    Container {
        name: CONFIG_RELOADER_CONTAINER_NAME.to_string(),
        image: Some(config.prometheus_config_reloader_image.clone()),
        command: Some(vec![CONFIG_RELOADER_COMMAND.to_string()]),
        args: Some(command::config_reloader_args(prometheus, config)),
        env: Some(command::config_reloader_env()),
        volume_mounts: Some(volumes.config_reloader_mounts.clone()),
        resources: Some(resources::reloader_resources(
            &config.config_reloader_cpu,
            &config.config_reloader_memory,
        )),
        ..Container::default()
    }
}

fn build_rules_reloader_container(
    prometheus: &PrometheusCluster,
    config: &OperatorConfig,
    volumes: &PrometheusVolumes,
) -> Container {
    let watched_dirs = volumes
        .rules_reloader_mounts
        .iter()
        .map(|mount| mount.mount_path.as_str());

    Container {
        name: RULES_RELOADER_CONTAINER_NAME.to_string(),
        image: Some(config.config_reloader_image.clone()),
        args: Some(command::rules_reloader_args(prometheus, config, watched_dirs)),
        volume_mounts: Some(volumes.rules_reloader_mounts.clone()),
        resources: Some(resources::reloader_resources(
            &config.config_reloader_cpu,
            &config.config_reloader_memory,
        )),
        ..Container::default()
    }
}

/// The Thanos sidecar, if one is requested
fn build_thanos_container(
    prometheus: &PrometheusCluster,
    config: &OperatorConfig,
    volumes: &PrometheusVolumes,
) -> Result<Option<Container>> {
    let Some(thanos) = &prometheus.spec.thanos else {
        return Ok(None);
    };

    let version =
        ResolvedVersion::resolve(thanos.version.as_deref(), &config.thanos_default_version)
            .context(ResolveThanosVersionSnafu)?;
    let image = image::resolve_image(
        ImageReference::new(
            thanos.image.as_deref(),
            thanos.sha.as_deref(),
            thanos.tag.as_deref(),
        ),
        &config.thanos_default_base_image,
        &version,
        THANOS_CONTAINER_NAME,
    )
    .context(ResolveThanosImageSnafu)?;
    tracing::debug!(version = %version.version, image = %image, "Resolved Thanos sidecar");

    // Only an uploading sidecar reads the TSDB
    let volume_mounts = thanos
        .object_storage_config
        .is_some()
        .then(|| vec![volumes.storage_mount.clone()]);

    Ok(Some(Container {
        name: THANOS_CONTAINER_NAME.to_string(),
        image: Some(image),
        args: Some(command::thanos_args(prometheus, thanos, config)),
        env: Some(command::thanos_env(thanos)),
        ports: Some(command::thanos_ports()),
        volume_mounts,
        resources: Some(thanos.resources.clone()),
        ..Container::default()
    }))
}

fn non_empty<T: Clone>(items: &[T]) -> Option<Vec<T>> {
    (!items.is_empty()).then(|| items.to_vec())
}
