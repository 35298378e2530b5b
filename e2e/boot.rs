//! Checks that every opted-in namespace has its store
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{Api, DynamicObject, ListParams},
    Client, ResourceExt,
};
use tracing::{info, warn};

use eso_store_per_ns::{api::store_resource, labels, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let client = Client::try_default().await?;
    let settings = Settings::default();

    let namespaces: Api<Namespace> = Api::all(client.clone());
    let selector = format!("{}={}", settings.target_label_key, settings.target_label_value);
    let opted_in = namespaces.list(&ListParams::default().labels(&selector)).await?;

    let stores: Api<DynamicObject> = Api::all_with(client, &store_resource());
    let owned = stores
        .list(&ListParams::default().labels(&labels::identity_selector()))
        .await?;
    info!(namespaces = opted_in.items.len(), stores = owned.items.len(), "found");

    let mut missing = 0;
    for ns in opted_in.iter() {
        let name = settings.store_name(&ns.name_any());
        if !owned.iter().any(|store| store.name_any() == name) {
            warn!(namespace = %ns.name_any(), store = %name, "missing ClusterSecretStore");
            missing += 1;
        }
    }
    anyhow::ensure!(missing == 0, "{missing} opted-in namespaces have no store");
    Ok(())
}
