use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{Resource, ResourceExt};
use serde_json::{Value, json};

use crate::{
    crds::cluster::{RethinkDBCluster, RethinkDBClusterSpec, RethinkDBClusterStatus},
    members::{self, Member},
    store::{Store, StoreError, StoreObject},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Create,
    Update,
    UpdateStatus,
    Delete,
}

type Key = (String, String, String);

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<Key, Value>>,
    calls: Mutex<Vec<(Verb, String, String)>>,
    failures: Mutex<Vec<(Verb, String)>>,
    seq: Mutex<u32>,
}

fn kind_of<K: StoreObject>() -> String {
    K::kind(&()).into_owned()
}

fn injected() -> StoreError {
    StoreError::Kube(kube::Error::Service(Box::new(std::io::Error::other(
        "injected failure",
    ))))
}

pub fn test_cluster(name: &str, ns: &str, size: i32, version: &str) -> RethinkDBCluster {
    let mut cluster = RethinkDBCluster::new(
        name,
        RethinkDBClusterSpec {
            size: Some(size),
            version: Some(version.into()),
            ..Default::default()
        },
    );
    cluster.metadata.namespace = Some(ns.into());
    cluster
}

impl MemoryStore {
    fn next_seq(&self) -> u32 {
        let mut seq = self.seq.lock().unwrap();
        *seq += 1;
        *seq
    }

    fn key<K: StoreObject>(ns: &str, name: &str) -> Key {
        (kind_of::<K>(), ns.to_string(), name.to_string())
    }

    fn check(&self, verb: Verb, kind: &str) -> Result<(), StoreError> {
        let mut failures = self.failures.lock().unwrap();
        if let Some(i) = failures.iter().position(|(v, k)| *v == verb && k == kind) {
            failures.remove(i);
            return Err(injected());
        }
        Ok(())
    }

    fn record(&self, verb: Verb, kind: String, name: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((verb, kind, name.to_string()));
    }

    /// Makes the next `verb` call on `kind` fail with a transport error.
    pub fn fail_on(&self, verb: Verb, kind: &str) {
        self.failures.lock().unwrap().push((verb, kind.to_string()));
    }

    pub fn mutation_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn count(&self, verb: Verb, kind: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(v, k, _)| *v == verb && k == kind)
            .count()
    }

    pub fn calls(&self) -> Vec<(Verb, String, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Stores `obj` as-is without recording a call.
    pub fn insert<K: StoreObject>(&self, obj: &K) {
        let ns = obj.namespace().unwrap_or_default();
        let value = serde_json::to_value(obj).unwrap();
        self.objects
            .lock()
            .unwrap()
            .insert(Self::key::<K>(&ns, &obj.name_any()), value);
    }

    /// Stores the cluster with a uid and returns it as stored.
    pub fn seed_cluster(&self, mut cluster: RethinkDBCluster) -> RethinkDBCluster {
        cluster.metadata.uid = Some(format!("uid-{}", cluster.name_any()));
        self.insert(&cluster);
        cluster
    }

    pub fn raw<K: StoreObject>(&self, ns: &str, name: &str) -> Option<Value> {
        self.objects
            .lock()
            .unwrap()
            .get(&Self::key::<K>(ns, name))
            .cloned()
    }

    fn modify<K: StoreObject>(&self, ns: &str, name: &str, f: impl FnOnce(&mut Value)) {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get_mut(&Self::key::<K>(ns, name))
            .unwrap_or_else(|| panic!("{} {name} not stored", kind_of::<K>()));
        f(obj);
    }

    pub fn cluster(&self, ns: &str, name: &str) -> RethinkDBCluster {
        serde_json::from_value(self.raw::<RethinkDBCluster>(ns, name).unwrap()).unwrap()
    }

    pub fn cluster_status(&self, ns: &str, name: &str) -> RethinkDBClusterStatus {
        self.cluster(ns, name).status.unwrap_or_default()
    }

    pub fn pods(&self, ns: &str) -> Vec<Pod> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((kind, n, _), _)| kind == "Pod" && n == ns)
            .map(|(_, v)| serde_json::from_value(v.clone()).unwrap())
            .collect()
    }

    pub fn names<K: StoreObject>(&self, ns: &str) -> Vec<String> {
        let kind = kind_of::<K>();
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, n, _)| *k == kind && n == ns)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    pub async fn members(&self, cluster: &RethinkDBCluster) -> Vec<Member> {
        members::observe(self, cluster).await.unwrap()
    }

    /// Sets a pod's phase and readiness the way the kubelet would report it.
    pub fn set_pod_state(&self, ns: &str, name: &str, phase: &str, ready: bool) {
        let ip = format!("10.0.0.{}", self.next_seq());
        self.modify::<Pod>(ns, name, |pod| {
            pod["status"] = json!({
                "phase": phase,
                "podIP": ip,
                "containerStatuses": [{
                    "name": "rethinkdb",
                    "image": "",
                    "imageID": "",
                    "ready": ready,
                    "restartCount": 0,
                }],
            });
        });
    }

    pub fn set_terminating(&self, ns: &str, name: &str) {
        self.modify::<Pod>(ns, name, |pod| {
            pod["metadata"]["deletionTimestamp"] = json!("2024-01-01T01:00:00Z");
        });
    }

    pub fn set_claim_phase(&self, ns: &str, name: &str, phase: &str) {
        self.modify::<k8s_openapi::api::core::v1::PersistentVolumeClaim>(ns, name, |pvc| {
            pvc["status"] = json!({ "phase": phase });
        });
    }
}

fn labels_match(value: &Value, selector: &BTreeMap<String, String>) -> bool {
    let labels = &value["metadata"]["labels"];
    selector
        .iter()
        .all(|(k, v)| labels.get(k).and_then(Value::as_str) == Some(v.as_str()))
}

#[async_trait]
impl Store for MemoryStore {
    async fn get<K: StoreObject>(&self, ns: &str, name: &str) -> Result<Option<K>, StoreError> {
        Ok(self
            .raw::<K>(ns, name)
            .map(|v| serde_json::from_value(v).unwrap()))
    }

    async fn list<K: StoreObject>(
        &self,
        ns: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<K>, StoreError> {
        let kind = kind_of::<K>();
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, n, _), v)| *k == kind && n == ns && labels_match(v, selector))
            .map(|(_, v)| serde_json::from_value(v.clone()).unwrap())
            .collect())
    }

    async fn create<K: StoreObject>(&self, ns: &str, obj: &K) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        let name = obj.name_any();
        self.check(Verb::Create, &kind)?;
        let key = Self::key::<K>(ns, &name);
        if self.objects.lock().unwrap().contains_key(&key) {
            return Err(StoreError::AlreadyExists { kind, name });
        }
        let seq = self.next_seq();
        let mut value = serde_json::to_value(obj).unwrap();
        value["metadata"]["namespace"] = json!(ns);
        value["metadata"]["uid"] = json!(format!("uid-{name}"));
        value["metadata"]["creationTimestamp"] =
            json!(format!("2024-01-01T00:{:02}:{:02}Z", seq / 60, seq % 60));
        value["metadata"]["resourceVersion"] = json!(seq.to_string());
        self.objects.lock().unwrap().insert(key, value.clone());
        self.record(Verb::Create, kind, &name);
        Ok(serde_json::from_value(value).unwrap())
    }

    async fn update<K: StoreObject>(&self, ns: &str, obj: &K) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        let name = obj.name_any();
        self.check(Verb::Update, &kind)?;
        let key = Self::key::<K>(ns, &name);
        let mut objects = self.objects.lock().unwrap();
        let Some(current) = objects.get(&key) else {
            return Err(StoreError::NotFound { kind, name });
        };
        let mut value = serde_json::to_value(obj).unwrap();
        // Status is a subresource; a plain update never changes it.
        match current.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Some(map) = value.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        objects.insert(key, value.clone());
        drop(objects);
        self.record(Verb::Update, kind, &name);
        Ok(serde_json::from_value(value).unwrap())
    }

    async fn update_status<K: StoreObject>(&self, ns: &str, obj: &K) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        let name = obj.name_any();
        self.check(Verb::UpdateStatus, &kind)?;
        let key = Self::key::<K>(ns, &name);
        let mut objects = self.objects.lock().unwrap();
        let Some(current) = objects.get_mut(&key) else {
            return Err(StoreError::NotFound { kind, name });
        };
        let status = serde_json::to_value(obj).unwrap()["status"].clone();
        current["status"] = status;
        let value = current.clone();
        drop(objects);
        self.record(Verb::UpdateStatus, kind, &name);
        Ok(serde_json::from_value(value).unwrap())
    }

    async fn delete<K: StoreObject>(&self, ns: &str, name: &str) -> Result<(), StoreError> {
        let kind = kind_of::<K>();
        self.check(Verb::Delete, &kind)?;
        if self
            .objects
            .lock()
            .unwrap()
            .remove(&Self::key::<K>(ns, name))
            .is_none()
        {
            return Err(StoreError::NotFound {
                kind,
                name: name.to_string(),
            });
        }
        self.record(Verb::Delete, kind, name);
        Ok(())
    }
}
