use std::cmp::Ordering;

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::{
    config::OperatorConfig,
    crds::cluster::{RethinkDBCluster, RethinkDBClusterStatus},
    error::StepError,
    members::{Member, MemberPhase, ordered},
    resources::{build_claim, build_member, claim_name, new_member_name, selector_labels},
    store::{Store, StoreError},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MembershipPlan {
    /// `member` has not settled yet; nothing changes this pass.
    Wait { member: String },
    /// Start one more member joining `peers`. With `bootstrap` set there are no
    /// members yet and the new one starts a fresh cluster.
    Add { peers: Vec<String>, bootstrap: bool },
    /// Delete `member`; `remaining` is the new status list.
    Remove { member: String, remaining: Vec<String> },
    Stable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MembershipOutcome {
    Waiting { member: String },
    Added { member: String },
    Removed { member: String },
    Stable,
}

impl MembershipOutcome {
    pub fn mutated(&self) -> bool {
        matches!(
            self,
            MembershipOutcome::Added { .. } | MembershipOutcome::Removed { .. }
        )
    }
}

pub fn plan(desired: usize, status: &[String], members: &[Member]) -> MembershipPlan {
    // A departure still in flight would otherwise be counted and replaced twice.
    if let Some(m) = members
        .iter()
        .find(|m| m.phase == MemberPhase::Terminating)
    {
        return MembershipPlan::Wait {
            member: m.name.clone(),
        };
    }

    let order = ordered(status, members);
    match members.len().cmp(&desired) {
        Ordering::Less => {
            if let Some(m) = order.iter().find(|m| !m.is_settled()) {
                return MembershipPlan::Wait {
                    member: m.name.clone(),
                };
            }
            MembershipPlan::Add {
                peers: order.iter().filter_map(|m| m.address.clone()).collect(),
                bootstrap: members.is_empty(),
            }
        }
        Ordering::Greater => match order.split_first() {
            Some((first, rest)) => MembershipPlan::Remove {
                member: first.name.clone(),
                remaining: rest.iter().map(|m| m.name.clone()).collect(),
            },
            None => MembershipPlan::Stable,
        },
        Ordering::Equal => MembershipPlan::Stable,
    }
}

/// Writes `status` unless the cluster already carries it. On success the
/// in-memory cluster is updated too.
pub async fn persist_status<S: Store>(
    store: &S,
    cluster: &mut RethinkDBCluster,
    status: RethinkDBClusterStatus,
) -> Result<bool, StoreError> {
    if cluster.status.as_ref() == Some(&status) {
        return Ok(false);
    }
    let ns = cluster.namespace().unwrap_or_default();
    let mut updated = cluster.clone();
    updated.status = Some(status);
    store.update_status(&ns, &updated).await?;
    *cluster = updated;
    Ok(true)
}

pub async fn reconcile_membership<S: Store>(
    store: &S,
    cfg: &OperatorConfig,
    cluster: &mut RethinkDBCluster,
    members: &[Member],
    service_name: &str,
) -> Result<MembershipOutcome, StepError> {
    let ns = cluster.namespace().unwrap_or_default();
    let desired = usize::try_from(cluster.spec.size()).unwrap_or_default();
    let known = cluster
        .status
        .as_ref()
        .map(|s| s.servers.clone())
        .unwrap_or_default();

    if cluster.spec.storage().is_some() {
        remove_orphaned_claims(store, cluster, members).await?;
    }

    match plan(desired, &known, members) {
        MembershipPlan::Wait { member } => {
            info!(member = %member, "waiting for server pod to settle");
            Ok(MembershipOutcome::Waiting { member })
        }
        MembershipPlan::Add { peers, bootstrap } => {
            let name = new_member_name(&cluster.name_any());
            let mut created_claim = None;
            if let Some(claim) = build_claim(cluster, &name) {
                info!(claim = %claim.name_any(), "creating persistent volume claim");
                match store.create(&ns, &claim).await {
                    Ok(_) => created_claim = Some(claim.name_any()),
                    Err(StoreError::AlreadyExists { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            info!(member = %name, peers = peers.len(), bootstrap, "creating server pod");
            let pod = build_member(cluster, cfg, &name, &peers, bootstrap);
            if let Err(e) = store.create(&ns, &pod).await {
                // The next pass picks a new name, so this claim would never be used.
                if let Some(claim) = created_claim
                    && let Err(cleanup) = store.delete::<PersistentVolumeClaim>(&ns, &claim).await
                {
                    warn!(claim = %claim, error = %cleanup, "failed to remove unused claim");
                }
                return Err(e.into());
            }

            let mut servers = live_names(&known, members);
            servers.push(name.clone());
            persist_status(
                store,
                cluster,
                RethinkDBClusterStatus {
                    servers,
                    service_name: service_name.to_string(),
                },
            )
            .await?;
            Ok(MembershipOutcome::Added { member: name })
        }
        MembershipPlan::Remove { member, remaining } => {
            info!(member = %member, "removing server pod");
            store.delete::<Pod>(&ns, &member).await?;
            if cluster.spec.storage().is_some() {
                remove_unbound_claim(store, &ns, &member).await?;
            }
            persist_status(
                store,
                cluster,
                RethinkDBClusterStatus {
                    servers: remaining,
                    service_name: service_name.to_string(),
                },
            )
            .await?;
            Ok(MembershipOutcome::Removed { member })
        }
        MembershipPlan::Stable => {
            debug!(size = members.len(), "cluster size reached");
            Ok(MembershipOutcome::Stable)
        }
    }
}

/// Status order of the members that are not on their way out.
pub fn live_names(status: &[String], members: &[Member]) -> Vec<String> {
    ordered(status, members)
        .iter()
        .filter(|m| m.phase != MemberPhase::Terminating)
        .map(|m| m.name.clone())
        .collect()
}

fn is_unbound(claim: &PersistentVolumeClaim) -> bool {
    matches!(
        claim.status.as_ref().and_then(|s| s.phase.as_deref()),
        None | Some("Pending")
    )
}

/// Deletes the removed member's claim while it is still unbound. Bound claims
/// hold data and are kept.
async fn remove_unbound_claim<S: Store>(
    store: &S,
    ns: &str,
    member: &str,
) -> Result<(), StoreError> {
    let name = claim_name(member);
    let Some(claim) = store.get::<PersistentVolumeClaim>(ns, &name).await? else {
        return Ok(());
    };
    if is_unbound(&claim) {
        info!(claim = %name, "removing unbound persistent volume claim");
        store.delete::<PersistentVolumeClaim>(ns, &name).await?;
    } else {
        debug!(claim = %name, "keeping bound persistent volume claim");
    }
    Ok(())
}

/// Claims left behind by an earlier pass that failed halfway: no member
/// mounts them. Unbound ones are deleted, bound ones are kept.
async fn remove_orphaned_claims<S: Store>(
    store: &S,
    cluster: &RethinkDBCluster,
    members: &[Member],
) -> Result<(), StoreError> {
    let ns = cluster.namespace().unwrap_or_default();
    let claims: Vec<PersistentVolumeClaim> = store
        .list(&ns, &selector_labels(&cluster.name_any()))
        .await?;
    for claim in claims {
        let name = claim.name_any();
        if members.iter().any(|m| claim_name(&m.name) == name) {
            continue;
        }
        if !is_unbound(&claim) {
            debug!(claim = %name, "keeping bound claim without a server pod");
            continue;
        }
        info!(claim = %name, "removing orphaned persistent volume claim");
        match store.delete::<PersistentVolumeClaim>(&ns, &name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
