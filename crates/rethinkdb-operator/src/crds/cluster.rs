use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, ResourceRequirements};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SIZE: i32 = 1;
pub const DEFAULT_VERSION: &str = "latest";

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[kube(
    group = "rethinkdb.com",
    version = "v1alpha1",
    kind = "RethinkDBCluster",
    plural = "rethinkdbclusters",
    namespaced,
    status = "RethinkDBClusterStatus",
    shortname = "rdb"
)]
#[serde(rename_all = "camelCase")]
pub struct RethinkDBClusterSpec {
    /// Number of servers in the cluster. Default: 1
    pub size: Option<i32>,
    /// RethinkDB version, used as the image tag. Default: "latest"
    pub version: Option<String>,
    /// Expose the web admin console through its own Service
    #[serde(default)]
    pub web_admin_enabled: bool,
    /// Policy applied to every server pod
    pub pod: Option<PodPolicy>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodPolicy {
    /// Resource requirements for the rethinkdb container
    pub resources: Option<ResourceRequirements>,
    /// When set, each server gets its own claim built from this spec instead of an emptyDir
    pub persistent_volume_claim_spec: Option<PersistentVolumeClaimSpec>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RethinkDBClusterStatus {
    /// Server pod names, oldest first
    #[serde(default)]
    pub servers: Vec<String>,
    /// Name of the driver Service clients connect to
    #[serde(default)]
    pub service_name: String,
}

#[derive(Debug, Error)]
#[error("malformed cluster spec: {0}")]
pub struct MalformedSpec(pub String);

impl RethinkDBClusterSpec {
    pub fn size(&self) -> i32 {
        self.size.unwrap_or(DEFAULT_SIZE)
    }

    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or(DEFAULT_VERSION)
    }

    pub fn storage(&self) -> Option<&PersistentVolumeClaimSpec> {
        self.pod
            .as_ref()
            .and_then(|p| p.persistent_volume_claim_spec.as_ref())
    }

    pub fn resources(&self) -> Option<&ResourceRequirements> {
        self.pod.as_ref().and_then(|p| p.resources.as_ref())
    }

    /// Fills in unset fields. Returns true when the spec changed and has to be
    /// written back before anything is built from it.
    pub fn apply_defaults(&mut self) -> Result<bool, MalformedSpec> {
        let mut changed = false;
        match self.size {
            None => {
                self.size = Some(DEFAULT_SIZE);
                changed = true;
            }
            Some(n) if n < 0 => {
                return Err(MalformedSpec(format!("size must not be negative, got {n}")));
            }
            Some(_) => {}
        }
        match self.version.as_deref().map(str::trim) {
            None | Some("") => {
                self.version = Some(DEFAULT_VERSION.to_string());
                changed = true;
            }
            Some(v) if v.contains(|c: char| c.is_whitespace() || matches!(c, ':' | '/' | '@')) => {
                return Err(MalformedSpec(format!(
                    "version {v:?} is not usable as an image tag"
                )));
            }
            Some(_) => {}
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_unset_fields_once() {
        let mut spec = RethinkDBClusterSpec::default();
        assert!(spec.apply_defaults().unwrap());
        assert_eq!(spec.size, Some(1));
        assert_eq!(spec.version.as_deref(), Some("latest"));
        assert!(!spec.apply_defaults().unwrap());
    }

    #[test]
    fn blank_version_is_defaulted() {
        let mut spec = RethinkDBClusterSpec {
            size: Some(3),
            version: Some("  ".into()),
            ..Default::default()
        };
        assert!(spec.apply_defaults().unwrap());
        assert_eq!(spec.version(), "latest");
        assert_eq!(spec.size(), 3);
    }

    #[test]
    fn zero_size_is_kept() {
        let mut spec = RethinkDBClusterSpec {
            size: Some(0),
            version: Some("2.4.1".into()),
            ..Default::default()
        };
        assert!(!spec.apply_defaults().unwrap());
        assert_eq!(spec.size(), 0);
    }

    #[test]
    fn negative_size_and_bad_tags_are_rejected() {
        let mut spec = RethinkDBClusterSpec {
            size: Some(-1),
            ..Default::default()
        };
        assert!(spec.apply_defaults().is_err());

        let mut spec = RethinkDBClusterSpec {
            size: Some(1),
            version: Some("2.4:evil".into()),
            ..Default::default()
        };
        assert!(spec.apply_defaults().is_err());
    }

    #[test]
    fn status_uses_original_field_names() {
        let status = RethinkDBClusterStatus {
            servers: vec!["rdb-abcde".into()],
            service_name: "rdb".into(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["servers"][0], "rdb-abcde");
        assert_eq!(json["serviceName"], "rdb");
    }
}
