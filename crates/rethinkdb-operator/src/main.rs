use futures::StreamExt;
use kube::Client;
use rethinkdb_operator::{
    cluster_controller::{self as clusters, Ctx},
    config::OperatorConfig,
    store::KubeStore,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = OperatorConfig::from_env()?;
    info!(
        namespace = config.namespace.as_deref().unwrap_or("<all>"),
        image = %config.image,
        "rethinkdb-operator starting up"
    );

    let client = Client::try_default().await?;
    let ctx = Arc::new(Ctx {
        store: KubeStore::new(client.clone()),
        config: config.clone(),
    });
    let controller = clusters::controller(client, &config)
        .run(clusters::reconcile, clusters::error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                tracing::warn!(error=?e, "cluster reconcile error");
            }
        });

    tokio::select! {
        _ = controller => {},
        _ = tokio::signal::ctrl_c() => { info!("shutdown signal received"); }
    }
    Ok(())
}
