use std::{fs, io, path::PathBuf};

use anyhow::Context;
use clap::{crate_description, crate_version, Parser};
use stackable_operator::{logging::TracingTarget, CustomResourceExt};
use stackable_prometheus_crd::{PrometheusCluster, APP_NAME};

use crate::config::OperatorConfig;

mod command;
mod config;
mod containers;
mod fingerprint;
mod image;
mod resources;
mod statefulset;
mod version;
mod volumes;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
    pub const TARGET_PLATFORM: Option<&str> = option_env!("TARGET");
    pub const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[derive(clap::Parser)]
#[clap(about, author)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Print CRD objects
    Crd,
    /// Print the StatefulSet compiled from a PrometheusCluster
    Compile(CompileArgs),
}

#[derive(clap::Args)]
struct CompileArgs {
    /// YAML file containing a PrometheusCluster, `-` reads from stdin
    #[arg(long)]
    spec: PathBuf,

    /// ConfigMap holding rule files, may be repeated. Mounted in the given order.
    #[arg(long = "rule-config-map")]
    rule_config_maps: Vec<String>,

    /// Write the StatefulSet to this file instead of stdout, which also receives the log output
    #[arg(long, short)]
    output: Option<PathBuf>,

    #[arg(long, env, default_value_t, value_enum)]
    tracing_target: TracingTarget,

    #[command(flatten)]
    operator_config: OperatorConfig,
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        Command::Crd => {
            PrometheusCluster::print_yaml_schema(built_info::CARGO_PKG_VERSION)?;
        }
        Command::Compile(CompileArgs {
            spec,
            rule_config_maps,
            output,
            tracing_target,
            operator_config,
        }) => {
            stackable_operator::logging::initialize_logging(
                "PROMETHEUS_OPERATOR_LOG",
                APP_NAME,
                tracing_target,
            );
            stackable_operator::utils::print_startup_string(
                crate_description!(),
                crate_version!(),
                built_info::GIT_VERSION,
                built_info::TARGET_PLATFORM.unwrap_or("unknown target"),
                built_info::BUILT_TIME_UTC,
                built_info::RUSTC_VERSION,
            );

            let input = if spec.as_os_str() == "-" {
                io::read_to_string(io::stdin()).context("failed to read stdin")?
            } else {
                fs::read_to_string(&spec)
                    .with_context(|| format!("failed to read {}", spec.display()))?
            };
            let prometheus: PrometheusCluster = serde_yaml::from_str(&input)
                .with_context(|| format!("failed to parse PrometheusCluster {}", spec.display()))?;

            let statefulset = statefulset::build_prometheus_statefulset(
                &prometheus,
                &operator_config,
                &rule_config_maps,
            )?;
            let rendered = serde_yaml::to_string(&statefulset)?;
            match output {
                Some(path) => fs::write(&path, rendered)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => print!("{rendered}"),
            }
        }
    }

    Ok(())
}
