use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::{
    crds::cluster::RethinkDBCluster,
    error::StepError,
    resources::{
        CLUSTER_PORT, DRIVER_PORT, HTTP_PORT, object_meta, selector_labels, suffixed,
    },
    store::{Store, StoreError},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointKind {
    /// Headless, so members reach each other directly
    ClusterInternal,
    ClientDriver,
    AdminConsole,
}

impl EndpointKind {
    pub const ALL: [EndpointKind; 3] = [
        EndpointKind::ClusterInternal,
        EndpointKind::ClientDriver,
        EndpointKind::AdminConsole,
    ];

    pub fn service_name(self, cluster: &RethinkDBCluster) -> String {
        match self {
            EndpointKind::ClusterInternal => suffixed(cluster, "cluster"),
            EndpointKind::ClientDriver => cluster.name_any(),
            EndpointKind::AdminConsole => suffixed(cluster, "admin"),
        }
    }

    fn port(self) -> (&'static str, i32) {
        match self {
            EndpointKind::ClusterInternal => ("cluster", CLUSTER_PORT),
            EndpointKind::ClientDriver => ("driver", DRIVER_PORT),
            EndpointKind::AdminConsole => ("http", HTTP_PORT),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointOutcome {
    Existing,
    Created,
    Deleted,
    Absent,
}

pub fn build_service(cluster: &RethinkDBCluster, kind: EndpointKind) -> Service {
    let (port_name, port) = kind.port();
    let (cluster_ip, session_affinity) = match kind {
        EndpointKind::ClusterInternal => (Some("None".to_string()), None),
        EndpointKind::ClientDriver | EndpointKind::AdminConsole => {
            (None, Some("ClientIP".to_string()))
        }
    };
    Service {
        metadata: object_meta(cluster, kind.service_name(cluster)),
        spec: Some(ServiceSpec {
            cluster_ip,
            session_affinity,
            selector: Some(selector_labels(&cluster.name_any())),
            ports: Some(vec![ServicePort {
                name: Some(port_name.into()),
                port,
                target_port: Some(IntOrString::Int(port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Creates the endpoint if absent. The admin console endpoint is deleted
/// instead when the console is disabled.
pub async fn ensure_endpoint<S: Store>(
    store: &S,
    cluster: &RethinkDBCluster,
    kind: EndpointKind,
) -> Result<EndpointOutcome, StepError> {
    let ns = cluster.namespace().unwrap_or_default();
    let name = kind.service_name(cluster);
    let existing = store.get::<Service>(&ns, &name).await?;
    let wanted = kind != EndpointKind::AdminConsole || cluster.spec.web_admin_enabled;

    match (existing, wanted) {
        (Some(_), true) => {
            debug!(service = %name, "service exists");
            Ok(EndpointOutcome::Existing)
        }
        (None, false) => Ok(EndpointOutcome::Absent),
        (Some(_), false) => {
            info!(service = %name, "removing disabled service");
            match store.delete::<Service>(&ns, &name).await {
                Ok(()) => Ok(EndpointOutcome::Deleted),
                Err(e) if e.is_not_found() => Ok(EndpointOutcome::Absent),
                Err(e) => Err(e.into()),
            }
        }
        (None, true) => {
            info!(service = %name, "creating service");
            match store.create(&ns, &build_service(cluster, kind)).await {
                Ok(_) => Ok(EndpointOutcome::Created),
                Err(StoreError::AlreadyExists { .. }) => Ok(EndpointOutcome::Existing),
                Err(e) => Err(e.into()),
            }
        }
    }
}
