use std::sync::Arc;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret, Service};
use kube::{
    Api, Client, Resource, ResourceExt,
    runtime::{
        controller::{Action, Controller},
        watcher,
    },
};
use tokio::time::Duration;
use tracing::{debug, error, info};

use crate::{
    config::OperatorConfig,
    crds::cluster::{RethinkDBCluster, RethinkDBClusterStatus},
    error::{ReconcileError, Step, StepContext},
    members::{observe, ordered},
    membership::{MembershipOutcome, live_names, persist_status, reconcile_membership},
    secrets::{
        ensure_admin_credential, ensure_ca_bundle, ensure_leaf_certificates, ensure_root_ca,
    },
    services::{EndpointKind, ensure_endpoint},
    store::{KubeStore, Store},
    upgrade::{UpgradeOutcome, reconcile_upgrade},
};

/// Only objects carrying this label wake the controller up.
const OWNED_SELECTOR: &str = "app=rethinkdb";

#[derive(Clone)]
pub struct Ctx<S = KubeStore> {
    pub store: S,
    pub config: OperatorConfig,
}

/// What a single pass did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// The cluster no longer exists.
    Deleted,
    /// Defaults were written back; the next pass does the real work.
    DefaultsApplied,
    Reconciled {
        membership: MembershipOutcome,
        upgrade: Option<UpgradeOutcome>,
    },
}

fn scoped<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

pub fn controller(client: Client, cfg: &OperatorConfig) -> Controller<RethinkDBCluster> {
    let ns = cfg.namespace.as_deref();
    let owned = || watcher::Config::default().labels(OWNED_SELECTOR);
    Controller::new(
        scoped::<RethinkDBCluster>(client.clone(), ns),
        watcher::Config::default(),
    )
    .owns(scoped::<Pod>(client.clone(), ns), owned())
    .owns(scoped::<Secret>(client.clone(), ns), owned())
    .owns(scoped::<Service>(client.clone(), ns), owned())
    .owns(scoped::<ConfigMap>(client.clone(), ns), owned())
    .owns(scoped::<PersistentVolumeClaim>(client, ns), owned())
    .shutdown_on_signal()
}

pub async fn reconcile(
    cluster: Arc<RethinkDBCluster>,
    ctx: Arc<Ctx>,
) -> Result<Action, ReconcileError> {
    let ns = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    match reconcile_cluster(ctx.as_ref(), &ns, &name).await? {
        PassOutcome::Deleted => Ok(Action::await_change()),
        PassOutcome::DefaultsApplied => Ok(Action::requeue(Duration::ZERO)),
        PassOutcome::Reconciled { .. } => Ok(Action::requeue(ctx.config.resync)),
    }
}

pub fn error_policy(cluster: Arc<RethinkDBCluster>, err: &ReconcileError, ctx: Arc<Ctx>) -> Action {
    error!(
        cluster = %cluster.name_any(),
        namespace = %cluster.namespace().unwrap_or_default(),
        step = %err.step(),
        error = ?err,
        "reconcile failed"
    );
    Action::requeue(ctx.config.error_backoff)
}

/// Runs one reconcile pass for the named cluster. Steps run in a fixed order
/// and the first failure ends the pass.
pub async fn reconcile_cluster<S: Store>(
    ctx: &Ctx<S>,
    ns: &str,
    name: &str,
) -> Result<PassOutcome, ReconcileError> {
    let store = &ctx.store;
    let Some(mut cluster) = store
        .get::<RethinkDBCluster>(ns, name)
        .await
        .step(Step::Defaults)?
    else {
        debug!(cluster = %name, namespace = %ns, "cluster is gone");
        return Ok(PassOutcome::Deleted);
    };

    if cluster.spec.apply_defaults()? {
        info!(
            cluster = %name,
            size = cluster.spec.size(),
            version = cluster.spec.version(),
            "applying defaults"
        );
        store.update(ns, &cluster).await.step(Step::Defaults)?;
        return Ok(PassOutcome::DefaultsApplied);
    }

    let ca = ensure_root_ca(store, &cluster).await.step(Step::RootCa)?;
    ensure_ca_bundle(store, &cluster, &ca)
        .await
        .step(Step::RootCa)?;

    let issued = ensure_leaf_certificates(store, &cluster, &ca, &ctx.config)
        .await
        .step(Step::LeafCertificates)?;
    if issued > 0 {
        info!(cluster = %name, issued, "issued leaf certificates");
    }

    ensure_admin_credential(store, &cluster)
        .await
        .step(Step::AdminCredential)?;

    for kind in EndpointKind::ALL {
        ensure_endpoint(store, &cluster, kind)
            .await
            .step(Step::Endpoints)?;
    }

    let service_name = EndpointKind::ClientDriver.service_name(&cluster);
    let members = observe(store, &cluster).await.step(Step::Membership)?;
    let membership = reconcile_membership(
        store,
        &ctx.config,
        &mut cluster,
        &members,
        &service_name,
    )
    .await
    .step(Step::Membership)?;

    let known = cluster
        .status
        .as_ref()
        .map(|s| s.servers.clone())
        .unwrap_or_default();

    // Scaling already wrote the status it wanted.
    if !membership.mutated() {
        let status = RethinkDBClusterStatus {
            servers: live_names(&known, &members),
            service_name,
        };
        persist_status(store, &mut cluster, status)
            .await
            .step(Step::Status)?;
    }

    let upgrade = if membership == MembershipOutcome::Stable {
        let order = ordered(&known, &members);
        Some(
            reconcile_upgrade(store, &cluster, &order)
                .await
                .step(Step::Upgrade)?,
        )
    } else {
        None
    };

    Ok(PassOutcome::Reconciled {
        membership,
        upgrade,
    })
}
