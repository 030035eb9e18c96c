use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    Api, Client, Resource,
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

pub const FIELD_MANAGER: &str = "rethinkdb-operator";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },
    #[error("failed to encode {kind}: {source}")]
    Encode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Objects the store can hold.
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[async_trait]
pub trait Store: Send + Sync {
    /// `Ok(None)` when the object does not exist.
    async fn get<K: StoreObject>(&self, ns: &str, name: &str) -> Result<Option<K>, StoreError>;

    /// Objects whose labels contain every pair in `selector`.
    async fn list<K: StoreObject>(
        &self,
        ns: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<K>, StoreError>;

    async fn create<K: StoreObject>(&self, ns: &str, obj: &K) -> Result<K, StoreError>;

    async fn update<K: StoreObject>(&self, ns: &str, obj: &K) -> Result<K, StoreError>;

    /// Writes only the status of `obj`.
    async fn update_status<K: StoreObject>(&self, ns: &str, obj: &K) -> Result<K, StoreError>;

    async fn delete<K: StoreObject>(&self, ns: &str, name: &str) -> Result<(), StoreError>;
}

pub fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// `Store` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: StoreObject>(&self, ns: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), ns)
    }
}

fn object_name<K: StoreObject>(obj: &K) -> String {
    obj.meta().name.clone().unwrap_or_default()
}

fn map_api_error<K: StoreObject>(err: kube::Error, name: &str) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound {
            kind: K::kind(&()).into_owned(),
            name: name.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 => StoreError::AlreadyExists {
            kind: K::kind(&()).into_owned(),
            name: name.to_string(),
        },
        e => StoreError::Kube(e),
    }
}

#[async_trait]
impl Store for KubeStore {
    async fn get<K: StoreObject>(&self, ns: &str, name: &str) -> Result<Option<K>, StoreError> {
        Ok(self.api::<K>(ns).get_opt(name).await?)
    }

    async fn list<K: StoreObject>(
        &self,
        ns: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<K>, StoreError> {
        let lp = ListParams::default().labels(&selector_string(selector));
        Ok(self.api::<K>(ns).list(&lp).await?.items)
    }

    async fn create<K: StoreObject>(&self, ns: &str, obj: &K) -> Result<K, StoreError> {
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.into()),
            ..Default::default()
        };
        self.api::<K>(ns)
            .create(&pp, obj)
            .await
            .map_err(|e| map_api_error::<K>(e, &object_name(obj)))
    }

    async fn update<K: StoreObject>(&self, ns: &str, obj: &K) -> Result<K, StoreError> {
        let name = object_name(obj);
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.into()),
            ..Default::default()
        };
        self.api::<K>(ns)
            .replace(&name, &pp, obj)
            .await
            .map_err(|e| map_api_error::<K>(e, &name))
    }

    async fn update_status<K: StoreObject>(&self, ns: &str, obj: &K) -> Result<K, StoreError> {
        let name = object_name(obj);
        let value = serde_json::to_value(obj).map_err(|source| StoreError::Encode {
            kind: K::kind(&()).into_owned(),
            source,
        })?;
        let status = value
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let pp = PatchParams::apply(FIELD_MANAGER);
        self.api::<K>(ns)
            .patch_status(
                &name,
                &pp,
                &Patch::Merge(serde_json::json!({ "status": status })),
            )
            .await
            .map_err(|e| map_api_error::<K>(e, &name))
    }

    async fn delete<K: StoreObject>(&self, ns: &str, name: &str) -> Result<(), StoreError> {
        self.api::<K>(ns)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_api_error::<K>(e, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_is_comma_joined_in_key_order() {
        let selector = BTreeMap::from([
            ("cluster".to_string(), "rdb".to_string()),
            ("app".to_string(), "rethinkdb".to_string()),
        ]);
        assert_eq!(selector_string(&selector), "app=rethinkdb,cluster=rdb");
    }
}
