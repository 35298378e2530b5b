//! Opts a scratch namespace in and out against a running operator
use std::time::Duration;

use anyhow::Context;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams},
    Client, ResourceExt,
};
use tracing::info;

use eso_store_per_ns::{api::store_resource, labels, Settings};

const NAMESPACE: &str = "eso-store-e2e";
const WAIT: Duration = Duration::from_secs(30);

/// Poll until the store's presence matches `present`
async fn wait_for_store(
    stores: &Api<DynamicObject>,
    name: &str,
    present: bool,
) -> anyhow::Result<Option<DynamicObject>> {
    let poll = async {
        loop {
            let store = stores.get_opt(name).await?;
            if store.is_some() == present {
                return Ok::<_, kube::Error>(store);
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    };
    Ok(tokio::time::timeout(WAIT, poll)
        .await
        .with_context(|| format!("timed out waiting for {name} (present: {present})"))??)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let client = Client::try_default().await?;
    let settings = Settings::default();
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let stores: Api<DynamicObject> = Api::all_with(client, &store_resource());
    let store_name = settings.store_name(NAMESPACE);

    info!("Creating namespace {NAMESPACE}");
    let ns = serde_json::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": NAMESPACE },
    }))?;
    namespaces.create(&PostParams::default(), &ns).await?;

    info!("Opting {NAMESPACE} in");
    let opt_in = serde_json::json!({
        "metadata": { "labels": { settings.target_label_key.as_str(): settings.target_label_value.as_str() } }
    });
    namespaces
        .patch(NAMESPACE, &PatchParams::default(), &Patch::Merge(&opt_in))
        .await?;

    let store = wait_for_store(&stores, &store_name, true)
        .await?
        .context("store vanished")?;
    anyhow::ensure!(labels::is_owned(store.labels()), "store is missing the identity label");
    anyhow::ensure!(
        store.owner_references().iter().any(|o| o.kind == "Namespace" && o.name == NAMESPACE),
        "store is not owned by its namespace"
    );
    info!("Store {store_name} provisioned");

    info!("Opting {NAMESPACE} out");
    let opt_out = serde_json::json!({
        "metadata": { "labels": { settings.target_label_key.as_str(): null } }
    });
    namespaces
        .patch(NAMESPACE, &PatchParams::default(), &Patch::Merge(&opt_out))
        .await?;
    wait_for_store(&stores, &store_name, false).await?;
    info!("Store {store_name} removed");

    info!("Cleaning up namespace {NAMESPACE}");
    namespaces.delete(NAMESPACE, &DeleteParams::background()).await?;
    Ok(())
}
