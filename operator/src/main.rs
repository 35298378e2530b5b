//! Operator entry point: startup sweep, namespace event loop, teardown sweep

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use futures::future;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use eso_store_per_ns::{
    config::{Config, LogFormat},
    ClusterContext,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.log_format);

    let ctx = ClusterContext::infer()
        .await
        .context("failed to create kubernetes client")?;
    let settings = config.settings();
    info!(
        label = %format!("{}={}", settings.target_label_key, settings.target_label_value),
        prefix = %settings.name_prefix,
        template = %format!("{}/{}", config.template_namespace, config.template_name),
        "starting operator"
    );
    let reconciler = Arc::new(ctx.reconciler(settings, config.template_location()));

    let handled = config
        .lifecycle()
        .run(
            reconciler,
            ctx.namespaces().as_ref(),
            ctx.namespace_events(),
            shutdown_signal(),
        )
        .await;
    info!(handled, "operator stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kube=warn"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
