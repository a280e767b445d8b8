//! Arguments, environment variables, ports and probes of the generated containers.
//!
//! Prometheus changed its flag vocabulary several times. Everything version dependent is derived
//! from the [`FlagDialect`] and the [`Capability`] set of the resolved version.
use snafu::{ResultExt, Snafu};
use stackable_operator::k8s_openapi::{
    api::core::v1::{
        ContainerPort, EnvVar, EnvVarSource, ExecAction, HTTPGetAction, ObjectFieldSelector,
        Probe, ResourceRequirements, SecretKeySelector,
    },
    apimachinery::pkg::util::intstr::IntOrString,
};
use stackable_prometheus_crd::{
    thanos::ThanosSpec, PrometheusCluster, CONFIG_DIR, CONFIG_ENVSUBST_FILENAME, CONFIG_FILENAME,
    CONFIG_OUT_DIR, PROMETHEUS_HTTP_PORT, STORAGE_DIR, THANOS_GRPC_PORT, THANOS_GRPC_PORT_NAME,
    THANOS_HTTP_PORT, THANOS_HTTP_PORT_NAME,
};

use crate::{
    config::OperatorConfig,
    resources,
    version::{Capability, FlagDialect, ResolvedVersion},
};

const CONSOLE_TEMPLATES_DIR: &str = "/etc/prometheus/consoles";
const CONSOLE_LIBRARIES_DIR: &str = "/etc/prometheus/console_libraries";

const LOOPBACK_ADDRESS: &str = "127.0.0.1";
const THANOS_DEFAULT_BIND_ADDRESS: &str = "[$(POD_IP)]";
const PROBE_HOST: &str = "localhost";

const DEFAULT_QUERY_MAX_CONCURRENCY: i32 = 20;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_FORMAT: &str = "logfmt";
const MAX_BLOCK_DURATION_WITH_UPLOADS: &str = "2h";

const PROBE_TIMEOUT_SECONDS: i32 = 3;
const PROBE_PERIOD_SECONDS: i32 = 5;
const READINESS_FAILURE_THRESHOLD: i32 = 120;
const LIVENESS_FAILURE_THRESHOLD: i32 = 6;
/// Prometheus 1.x before 1.8 replays its storage before `/status` answers
const LEGACY_LIVENESS_FAILURE_THRESHOLD: i32 = 60;

pub const POD_NAME_ENV: &str = "POD_NAME";
pub const POD_IP_ENV: &str = "POD_IP";
pub const OBJSTORE_CONFIG_ENV: &str = "OBJSTORE_CONFIG";
pub const TRACING_CONFIG_ENV: &str = "TRACING_CONFIG";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to determine the memory request of Prometheus"))]
    MemoryRequest { source: resources::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Collects flags in the spelling of one [`FlagDialect`]
struct Args {
    prefix: &'static str,
    args: Vec<String>,
}

impl Args {
    fn new(dialect: FlagDialect) -> Self {
        let prefix = match dialect {
            FlagDialect::Legacy => "-",
            FlagDialect::TsdbV1 | FlagDialect::TsdbV2 => "--",
        };
        Self {
            prefix,
            args: Vec::new(),
        }
    }

    fn flag(&mut self, name: &str, value: impl std::fmt::Display) -> &mut Self {
        self.args.push(format!("{}{name}={value}", self.prefix));
        self
    }

    fn switch(&mut self, name: &str) -> &mut Self {
        self.args.push(format!("{}{name}", self.prefix));
        self
    }

    fn raw(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }
}

/// Arguments of the Prometheus container.
///
/// `resources` are the final resources of the container, legacy versions derive their storage
/// tuning from the memory request.
pub fn prometheus_args(
    prometheus: &PrometheusCluster,
    version: &ResolvedVersion,
    dialect: FlagDialect,
    resources: &ResourceRequirements,
) -> Result<Vec<String>> {
    let spec = &prometheus.spec;
    let mut args = Args::new(dialect);
    let config_file = format!("{CONFIG_OUT_DIR}/{CONFIG_ENVSUBST_FILENAME}");

    args.flag("web.console.templates", CONSOLE_TEMPLATES_DIR)
        .flag("web.console.libraries", CONSOLE_LIBRARIES_DIR);

    match dialect {
        FlagDialect::Legacy => {
            args.flag("storage.local.retention", prometheus.retention())
                .flag("storage.local.num-fingerprint-mutexes", 4096)
                .flag("storage.local.path", STORAGE_DIR)
                .flag("storage.local.chunk-encoding-version", 2)
                .flag("config.file", &config_file);

            let memory_request =
                resources::memory_request_bytes(resources).context(MemoryRequestSnafu)?;
            if let Some(bytes) = memory_request {
                if version.version.minor < 6 {
                    // 1KiB per chunk with 80% management overhead
                    let memory_chunks = bytes / 1024 / 5;
                    args.flag("storage.local.memory-chunks", memory_chunks)
                        .flag("storage.local.max-chunks-to-persist", memory_chunks / 2);
                } else {
                    args.flag("storage.local.target-heap-size", bytes / 3 * 2);
                }
            }
        }
        FlagDialect::TsdbV1 | FlagDialect::TsdbV2 => {
            if dialect == FlagDialect::TsdbV2 {
                if let Some(size) = spec.retention_size.as_deref().filter(|s| !s.is_empty()) {
                    args.flag("storage.tsdb.retention.size", size);
                }
            }
            args.flag("config.file", &config_file)
                .flag("storage.tsdb.path", STORAGE_DIR);
            let retention_flag = match dialect {
                FlagDialect::TsdbV2 => "storage.tsdb.retention.time",
                _ => "storage.tsdb.retention",
            };
            args.flag(retention_flag, prometheus.retention())
                .switch("web.enable-lifecycle")
                .switch("storage.tsdb.no-lockfile");

            if let Some(lookback_delta) = spec
                .query
                .as_ref()
                .and_then(|query| query.lookback_delta.as_deref())
            {
                args.flag("query.lookback-delta", lookback_delta);
            }

            if version.supports(Capability::AlertTuning) {
                let alert = spec.rules.as_ref().map(|rules| &rules.alert);
                if let Some(alert) = alert {
                    if let Some(value) = &alert.for_outage_tolerance {
                        args.flag("rules.alert.for-outage-tolerance", value);
                    }
                    if let Some(value) = &alert.for_grace_period {
                        args.flag("rules.alert.for-grace-period", value);
                    }
                    if let Some(value) = &alert.resend_delay {
                        args.flag("rules.alert.resend-delay", value);
                    }
                }
            }

            if version.supports(Capability::QueryMaxSamples) {
                if let Some(max_samples) = spec
                    .query
                    .as_ref()
                    .and_then(|query| query.max_samples)
                {
                    args.flag("query.max-samples", max_samples);
                }
            }

            if version.supports(Capability::WalCompression) {
                match spec.wal_compression {
                    Some(true) => {
                        args.switch("storage.tsdb.wal-compression");
                    }
                    Some(false) => {
                        args.switch("no-storage.tsdb.wal-compression");
                    }
                    None => {}
                }
            }
        }
    }

    if let Some(query) = &spec.query {
        if let Some(max_concurrency) = query.max_concurrency {
            let max_concurrency = if max_concurrency < 1 {
                DEFAULT_QUERY_MAX_CONCURRENCY
            } else {
                max_concurrency
            };
            args.flag("query.max-concurrency", max_concurrency);
        }
        if let Some(timeout) = &query.timeout {
            args.flag("query.timeout", timeout);
        }
    }

    if spec.enable_admin_api {
        args.switch("web.enable-admin-api");
    }
    if let Some(external_url) = spec.external_url.as_deref().filter(|url| !url.is_empty()) {
        args.flag("web.external-url", external_url);
    }
    args.flag("web.route-prefix", prometheus.route_prefix());

    if let Some(log_level) = spec
        .log_level
        .as_deref()
        .filter(|level| !level.is_empty() && *level != DEFAULT_LOG_LEVEL)
    {
        args.flag("log.level", log_level);
    }
    if version.supports(Capability::LogFormat) {
        if let Some(log_format) = spec
            .log_format
            .as_deref()
            .filter(|format| !format.is_empty() && *format != DEFAULT_LOG_FORMAT)
        {
            args.flag("log.format", log_format);
        }
    }

    if spec.listen_local {
        args.flag(
            "web.listen-address",
            format!("{LOOPBACK_ADDRESS}:{PROMETHEUS_HTTP_PORT}"),
        );
    }

    if prometheus.uploads_to_object_storage() {
        args.raw(format!(
            "--storage.tsdb.max-block-duration={MAX_BLOCK_DURATION_WITH_UPLOADS}"
        ));
    }

    Ok(args.args)
}

/// The web port, unless Prometheus only listens on the loopback interface
pub fn prometheus_ports(prometheus: &PrometheusCluster) -> Option<Vec<ContainerPort>> {
    (!prometheus.spec.listen_local)
        .then(|| vec![container_port(prometheus.port_name(), PROMETHEUS_HTTP_PORT)])
}

/// Liveness and readiness probe of the Prometheus container
pub fn prometheus_probes(
    prometheus: &PrometheusCluster,
    version: &ResolvedVersion,
) -> (Probe, Probe) {
    let route_prefix = prometheus.route_prefix();
    let readiness_endpoints = version.supports(Capability::ReadinessEndpoints);

    if prometheus.spec.listen_local {
        let probe = |endpoint: &str, failure_threshold: i32| Probe {
            exec: Some(ExecAction {
                command: Some(local_probe_command(&format!(
                    "http://{PROBE_HOST}:{PROMETHEUS_HTTP_PORT}{}",
                    clean_path(&format!("{route_prefix}/{endpoint}"))
                ))),
            }),
            ..probe_timing(failure_threshold)
        };
        return (
            probe("-/healthy", LIVENESS_FAILURE_THRESHOLD),
            probe("-/ready", READINESS_FAILURE_THRESHOLD),
        );
    }

    let probe = |endpoint: &str, failure_threshold: i32| Probe {
        http_get: Some(HTTPGetAction {
            path: Some(clean_path(&format!("{route_prefix}/{endpoint}"))),
            port: IntOrString::String(prometheus.port_name().to_string()),
            ..HTTPGetAction::default()
        }),
        ..probe_timing(failure_threshold)
    };
    if readiness_endpoints {
        (
            probe("-/healthy", LIVENESS_FAILURE_THRESHOLD),
            probe("-/ready", READINESS_FAILURE_THRESHOLD),
        )
    } else {
        (
            probe("status", LEGACY_LIVENESS_FAILURE_THRESHOLD),
            probe("status", READINESS_FAILURE_THRESHOLD),
        )
    }
}

fn probe_timing(failure_threshold: i32) -> Probe {
    Probe {
        timeout_seconds: Some(PROBE_TIMEOUT_SECONDS),
        period_seconds: Some(PROBE_PERIOD_SECONDS),
        failure_threshold: Some(failure_threshold),
        ..Probe::default()
    }
}

/// Probes the loopback listener with whichever HTTP client the image ships
fn local_probe_command(url: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            r#"if [ -x "$(command -v curl)" ]; then curl {url}; elif [ -x "$(command -v wget)" ]; then wget -q -O /dev/null {url}; else exit 1; fi"#
        ),
    ]
}

/// The endpoint both reloaders call after a change
pub fn reload_url(prometheus: &PrometheusCluster, config: &OperatorConfig) -> String {
    format!(
        "http://{}:{PROMETHEUS_HTTP_PORT}{}",
        config.local_host,
        clean_path(&format!("{}/-/reload", prometheus.route_prefix()))
    )
}

pub fn config_reloader_args(
    prometheus: &PrometheusCluster,
    config: &OperatorConfig,
) -> Vec<String> {
    vec![
        format!("--log-format={}", config.reloader_log_format),
        format!("--reload-url={}", reload_url(prometheus, config)),
        format!("--config-file={CONFIG_DIR}/{CONFIG_FILENAME}"),
        format!("--config-envsubst-file={CONFIG_OUT_DIR}/{CONFIG_ENVSUBST_FILENAME}"),
    ]
}

pub fn config_reloader_env() -> Vec<EnvVar> {
    vec![field_ref_env(POD_NAME_ENV, "metadata.name")]
}

/// `rule_mount_paths` are watched for changes
pub fn rules_reloader_args<'a>(
    prometheus: &PrometheusCluster,
    config: &OperatorConfig,
    rule_mount_paths: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let mut args = vec![format!("--webhook-url={}", reload_url(prometheus, config))];
    args.extend(
        rule_mount_paths
            .into_iter()
            .map(|path| format!("--volume-dir={path}")),
    );
    args
}

pub fn thanos_args(
    prometheus: &PrometheusCluster,
    thanos: &ThanosSpec,
    config: &OperatorConfig,
) -> Vec<String> {
    let bind_address = if thanos.listen_local {
        LOOPBACK_ADDRESS
    } else {
        THANOS_DEFAULT_BIND_ADDRESS
    };

    let mut args = vec![
        "sidecar".to_string(),
        format!(
            "--prometheus.url=http://{}:{PROMETHEUS_HTTP_PORT}{}",
            config.local_host,
            clean_path(prometheus.route_prefix())
        ),
        format!("--grpc-address={bind_address}:{THANOS_GRPC_PORT}"),
        format!("--http-address={bind_address}:{THANOS_HTTP_PORT}"),
    ];

    let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());
    if let Some(log_level) =
        non_empty(&thanos.log_level).or_else(|| non_empty(&prometheus.spec.log_level))
    {
        args.push(format!("--log.level={log_level}"));
    }
    if let Some(log_format) =
        non_empty(&thanos.log_format).or_else(|| non_empty(&prometheus.spec.log_format))
    {
        args.push(format!("--log.format={log_format}"));
    }

    if thanos.object_storage_config.is_some() {
        args.push(format!("--objstore.config=$({OBJSTORE_CONFIG_ENV})"));
        args.push(format!("--tsdb.path={STORAGE_DIR}"));
    }
    if thanos.tracing_config.is_some() {
        args.push(format!("--tracing.config=$({TRACING_CONFIG_ENV})"));
    }

    args
}

pub fn thanos_env(thanos: &ThanosSpec) -> Vec<EnvVar> {
    let mut env = vec![field_ref_env(POD_IP_ENV, "status.podIP")];
    if let Some(selector) = &thanos.object_storage_config {
        env.push(secret_key_env(OBJSTORE_CONFIG_ENV, selector));
    }
    if let Some(selector) = &thanos.tracing_config {
        env.push(secret_key_env(TRACING_CONFIG_ENV, selector));
    }
    env
}

pub fn thanos_ports() -> Vec<ContainerPort> {
    vec![
        container_port(THANOS_HTTP_PORT_NAME, THANOS_HTTP_PORT),
        container_port(THANOS_GRPC_PORT_NAME, THANOS_GRPC_PORT),
    ]
}

fn container_port(name: &str, port: u16) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port.into(),
        protocol: Some("TCP".to_string()),
        ..ContainerPort::default()
    }
}

fn field_ref_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..ObjectFieldSelector::default()
            }),
            ..EnvVarSource::default()
        }),
        ..EnvVar::default()
    }
}

fn secret_key_env(name: &str, selector: &SecretKeySelector) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(selector.clone()),
            ..EnvVarSource::default()
        }),
        ..EnvVar::default()
    }
}

/// Lexically normalizes an absolute URL path: duplicate separators, `.` and `..` are resolved
/// and the result always starts with `/`
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    format!("/{}", segments.join("/"))
}
