//! Command line and environment configuration
use std::{convert::Infallible, time::Duration};

use clap::{ArgAction, Parser, ValueEnum};

use crate::{
    labels::{DEFAULT_TARGET_LABEL_KEY, DEFAULT_TARGET_LABEL_VALUE},
    lifecycle::Lifecycle,
    reconciler::{Settings, DEFAULT_NAME_PREFIX},
    template::{TemplateLocation, DEFAULT_TEMPLATE_KEY, DEFAULT_TEMPLATE_NAME, DEFAULT_TEMPLATE_NAMESPACE},
};

/// Keeps one External Secrets ClusterSecretStore per opted-in namespace
#[derive(Parser, Debug, Clone)]
#[command(name = "eso-store-per-ns", version, about, long_about = None)]
pub struct Config {
    /// Label key that opts a namespace in
    #[arg(long, env = "TARGET_LABEL_KEY", default_value = DEFAULT_TARGET_LABEL_KEY)]
    pub target_label_key: String,

    /// Label value that opts a namespace in
    #[arg(long, env = "TARGET_LABEL_VALUE", default_value = DEFAULT_TARGET_LABEL_VALUE)]
    pub target_label_value: String,

    /// Reconcile every existing namespace before handling events
    #[arg(
        long,
        env = "PROCESS_EXISTING",
        default_value = "true",
        value_parser = parse_flag,
        action = ArgAction::Set
    )]
    pub process_existing: bool,

    /// Delete every owned store when the operator shuts down
    #[arg(
        long,
        env = "CLEANUP_ON_DELETE",
        default_value = "true",
        value_parser = parse_flag,
        action = ArgAction::Set
    )]
    pub cleanup_on_exit: bool,

    /// Prefix of derived store names
    #[arg(long, env = "CLUSTER_SECRET_STORE_NAME_PREFIX", default_value = DEFAULT_NAME_PREFIX)]
    pub name_prefix: String,

    /// Name of the ConfigMap holding the store template
    #[arg(long, env = "TEMPLATE_NAME", default_value = DEFAULT_TEMPLATE_NAME)]
    pub template_name: String,

    /// Namespace of the template ConfigMap, normally the operator's own
    #[arg(long, env = "POD_NAMESPACE", default_value = DEFAULT_TEMPLATE_NAMESPACE)]
    pub template_namespace: String,

    /// Key of the template inside the ConfigMap
    #[arg(long, env = "TEMPLATE_KEY", default_value = DEFAULT_TEMPLATE_KEY)]
    pub template_key: String,

    /// Timeout for each cluster call, in seconds
    #[arg(long, env = "CALL_TIMEOUT", default_value_t = 10)]
    pub call_timeout: u64,

    /// Namespaces reconciled in parallel
    #[arg(
        long = "max-concurrent",
        env = "MAX_CONCURRENT_RECONCILES",
        default_value_t = 16,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub max_concurrent: u16,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t)]
    pub log_format: LogFormat,
}

/// How log lines are written
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Anything other than a case-insensitive `true` is false
fn parse_flag(value: &str) -> Result<bool, Infallible> {
    Ok(value.trim().eq_ignore_ascii_case("true"))
}

impl Config {
    /// Reconciler settings derived from this configuration
    pub fn settings(&self) -> Settings {
        Settings {
            target_label_key: self.target_label_key.clone(),
            target_label_value: self.target_label_value.clone(),
            name_prefix: self.name_prefix.clone(),
            call_timeout: Duration::from_secs(self.call_timeout),
            concurrency: usize::from(self.max_concurrent),
        }
    }

    /// Which sweeps run around the event loop
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle {
            process_existing: self.process_existing,
            cleanup_on_exit: self.cleanup_on_exit,
        }
    }

    /// Where the store template is read from
    pub fn template_location(&self) -> TemplateLocation {
        TemplateLocation {
            name: self.template_name.clone(),
            namespace: self.template_namespace.clone(),
            key: self.template_key.clone(),
        }
    }
}
