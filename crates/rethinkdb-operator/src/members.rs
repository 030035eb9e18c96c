use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

use crate::{
    crds::cluster::{DEFAULT_VERSION, RethinkDBCluster},
    resources::{SERVER_CONTAINER, selector_labels, split_image},
    store::{Store, StoreError},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberPhase {
    Pending,
    Running,
    Terminating,
    Failed,
}

#[derive(Clone, Debug)]
pub struct Member {
    pub name: String,
    pub address: Option<String>,
    pub phase: MemberPhase,
    pub ready: bool,
    pub image: String,
    pub created: Option<Time>,
    pub pod: Pod,
}

impl Member {
    pub fn from_pod(pod: Pod) -> Self {
        let status = pod.status.clone().unwrap_or_default();
        let phase = if pod.metadata.deletion_timestamp.is_some() {
            MemberPhase::Terminating
        } else {
            match status.phase.as_deref() {
                Some("Running") => MemberPhase::Running,
                Some("Failed") | Some("Succeeded") => MemberPhase::Failed,
                _ => MemberPhase::Pending,
            }
        };
        let ready = status
            .container_statuses
            .as_ref()
            .is_some_and(|cs| !cs.is_empty() && cs.iter().all(|c| c.ready));
        let image = server_container(&pod)
            .and_then(|c| c.image.clone())
            .unwrap_or_default();
        Self {
            name: pod.name_any(),
            address: status.pod_ip.filter(|ip| !ip.is_empty()),
            phase,
            ready,
            image,
            created: pod.metadata.creation_timestamp.clone(),
            pod,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.phase == MemberPhase::Running && self.ready
    }

    pub fn version(&self) -> &str {
        split_image(&self.image).1.unwrap_or(DEFAULT_VERSION)
    }
}

pub(crate) fn server_container(pod: &Pod) -> Option<&k8s_openapi::api::core::v1::Container> {
    let containers = &pod.spec.as_ref()?.containers;
    containers
        .iter()
        .find(|c| c.name == SERVER_CONTAINER)
        .or_else(|| containers.first())
}

/// Lists the cluster's members, oldest first.
pub async fn observe<S: Store>(
    store: &S,
    cluster: &RethinkDBCluster,
) -> Result<Vec<Member>, StoreError> {
    let ns = cluster.namespace().unwrap_or_default();
    let pods: Vec<Pod> = store.list(&ns, &selector_labels(&cluster.name_any())).await?;
    let mut members: Vec<Member> = pods.into_iter().map(Member::from_pod).collect();
    members.sort_by(|a, b| (&a.created, &a.name).cmp(&(&b.created, &b.name)));
    Ok(members)
}

/// Orders members by their position in `status`, then members the status
/// does not know about in creation order. Names in `status` that no longer
/// exist are dropped.
pub fn ordered<'a>(status: &[String], members: &'a [Member]) -> Vec<&'a Member> {
    let mut out: Vec<&Member> = status
        .iter()
        .filter_map(|name| members.iter().find(|m| &m.name == name))
        .collect();
    for m in members {
        if !status.contains(&m.name) {
            out.push(m);
        }
    }
    out
}
