use kube::ResourceExt;
use semver::Version;
use tracing::{debug, info};

use crate::{
    crds::cluster::RethinkDBCluster,
    error::StepError,
    members::Member,
    resources::{SERVER_CONTAINER, split_image},
    store::Store,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpgradePlan {
    Wait { member: String },
    Upgrade { member: String, from: String, to: String },
    UpToDate,
}

fn parse_version(v: &str) -> Result<Version, semver::Error> {
    Version::parse(v.strip_prefix('v').unwrap_or(v))
}

/// Picks the first member, in the given order, running an older version than
/// `desired`. Members already on exactly `desired` are never parsed, so a
/// cluster pinned to a non-semver tag such as `latest` stays quiet.
pub fn plan_upgrade(desired: &str, members: &[&Member]) -> Result<UpgradePlan, StepError> {
    if let Some(m) = members.iter().find(|m| !m.is_settled()) {
        return Ok(UpgradePlan::Wait {
            member: m.name.clone(),
        });
    }

    let mut target: Option<Version> = None;
    for m in members {
        let running = m.version();
        if running == desired {
            continue;
        }
        let want = match &target {
            Some(v) => v.clone(),
            None => {
                let v = parse_version(desired).map_err(|source| {
                    StepError::DesiredVersionParse {
                        version: desired.to_string(),
                        source,
                    }
                })?;
                target = Some(v.clone());
                v
            }
        };
        let have = parse_version(running).map_err(|source| StepError::VersionParse {
            member: m.name.clone(),
            version: running.to_string(),
            source,
        })?;
        if have < want {
            return Ok(UpgradePlan::Upgrade {
                member: m.name.clone(),
                from: running.to_string(),
                to: desired.to_string(),
            });
        }
    }
    Ok(UpgradePlan::UpToDate)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpgradeOutcome {
    Waiting { member: String },
    Upgraded { member: String },
    UpToDate,
}

/// Patches the image of at most one member to the desired version.
pub async fn reconcile_upgrade<S: Store>(
    store: &S,
    cluster: &RethinkDBCluster,
    members: &[&Member],
) -> Result<UpgradeOutcome, StepError> {
    let ns = cluster.namespace().unwrap_or_default();
    match plan_upgrade(cluster.spec.version(), members)? {
        UpgradePlan::Wait { member } => {
            info!(member = %member, "waiting for server pods to become ready before upgrade");
            Ok(UpgradeOutcome::Waiting { member })
        }
        UpgradePlan::Upgrade { member, from, to } => {
            let Some(m) = members.iter().find(|m| m.name == member) else {
                return Ok(UpgradeOutcome::UpToDate);
            };
            let mut pod = m.pod.clone();
            if let Some(spec) = pod.spec.as_mut() {
                let idx = spec
                    .containers
                    .iter()
                    .position(|c| c.name == SERVER_CONTAINER)
                    .unwrap_or(0);
                if let Some(container) = spec.containers.get_mut(idx) {
                    let (repo, _) = split_image(&m.image);
                    container.image = Some(format!("{repo}:{to}"));
                }
            }
            info!(member = %member, from = %from, to = %to, "upgrading server pod");
            store.update(&ns, &pod).await?;
            Ok(UpgradeOutcome::Upgraded { member })
        }
        UpgradePlan::UpToDate => {
            debug!("all server pods run the desired version");
            Ok(UpgradeOutcome::UpToDate)
        }
    }
}
