use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource, KeyToPath,
    PersistentVolumeClaim, PersistentVolumeClaimVolumeSource, Pod, PodSpec, Probe,
    ProjectedVolumeSource, SecretKeySelector, SecretProjection, TCPSocketAction, Volume,
    VolumeMount, VolumeProjection,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use rand::Rng;

use crate::{config::OperatorConfig, crds::cluster::RethinkDBCluster};

pub const HTTP_PORT: i32 = 8080;
pub const DRIVER_PORT: i32 = 28015;
pub const CLUSTER_PORT: i32 = 29015;

pub const ADMIN_USERNAME: &str = "admin";
pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";
pub const CA_CERT_KEY: &str = "ca.crt";

pub const SERVER_CONTAINER: &str = "rethinkdb";
const CONFIG_DIR: &str = "/etc/rethinkdb";
const CONFIG_FILE: &str = "/etc/rethinkdb/rethinkdb.conf";
const TLS_DIR: &str = "/etc/rethinkdb/tls";
const DATA_DIR: &str = "/var/lib/rethinkdb/default";
const ETC_VOLUME: &str = "rethinkdb-etc";
const TLS_VOLUME: &str = "rethinkdb-tls";
const DATA_VOLUME: &str = "rethinkdb-data";
const PASSWORD_ENV: &str = "RETHINKDB_PASSWORD";

// Same alphabet the API server uses for generateName suffixes.
const NAME_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

pub fn selector_labels(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "rethinkdb".to_string()),
        ("cluster".to_string(), cluster_name.to_string()),
    ])
}

/// The cluster's own labels plus the selector labels, which always win.
pub fn labels_for_cluster(cluster: &RethinkDBCluster) -> BTreeMap<String, String> {
    let mut labels = cluster.labels().clone();
    labels.extend(selector_labels(&cluster.name_any()));
    labels
}

pub fn owner_ref(cluster: &RethinkDBCluster) -> OwnerReference {
    OwnerReference {
        api_version: RethinkDBCluster::api_version(&()).into_owned(),
        kind: RethinkDBCluster::kind(&()).into_owned(),
        name: cluster.name_any(),
        uid: cluster.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn object_meta(cluster: &RethinkDBCluster, name: String) -> kube::core::ObjectMeta {
    kube::core::ObjectMeta {
        name: Some(name),
        namespace: cluster.namespace(),
        labels: Some(labels_for_cluster(cluster)),
        owner_references: Some(vec![owner_ref(cluster)]),
        ..Default::default()
    }
}

pub fn suffixed(cluster: &RethinkDBCluster, suffix: &str) -> String {
    format!("{}-{}", cluster.name_any(), suffix)
}

pub fn new_member_name(cluster_name: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..5)
        .map(|_| char::from(NAME_ALPHABET[rng.random_range(0..NAME_ALPHABET.len())]))
        .collect();
    format!("{cluster_name}-{suffix}")
}

pub fn claim_name(member: &str) -> String {
    format!("{member}-data")
}

/// Splits an image reference into repository and tag. A digest is ignored.
pub fn split_image(image: &str) -> (&str, Option<&str>) {
    let image = image.split('@').next().unwrap_or(image);
    match image.rfind(':') {
        Some(i) if !image[i..].contains('/') => (&image[..i], Some(&image[i + 1..])),
        _ => (image, None),
    }
}

pub fn server_config(web_admin_enabled: bool, peers: &[String]) -> String {
    let mut lines = vec![
        "no-update-check".to_string(),
        "bind=all".to_string(),
        format!("directory={DATA_DIR}"),
        format!("cluster-tls-ca={TLS_DIR}/ca.crt"),
    ];
    for role in ["cluster", "driver", "http"] {
        lines.push(format!("{role}-tls-cert={TLS_DIR}/{role}.crt"));
        lines.push(format!("{role}-tls-key={TLS_DIR}/{role}.key"));
    }
    if !web_admin_enabled {
        lines.push("no-http-admin".to_string());
    }
    for peer in peers {
        lines.push(format!("join={peer}:{CLUSTER_PORT}"));
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// A new server pod. `peers` are the addresses it joins; with `bootstrap` set
/// it instead starts a fresh cluster using the admin password.
pub fn build_member(
    cluster: &RethinkDBCluster,
    cfg: &OperatorConfig,
    name: &str,
    peers: &[String],
    bootstrap: bool,
) -> Pod {
    let mut args = vec!["--config-file".to_string(), CONFIG_FILE.to_string()];
    let env = if bootstrap {
        args.push("--initial-password".into());
        args.push(format!("$({PASSWORD_ENV})"));
        Some(vec![EnvVar {
            name: PASSWORD_ENV.into(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: suffixed(cluster, ADMIN_USERNAME),
                    key: PASSWORD_KEY.into(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }])
    } else {
        None
    };

    let etc_mount = VolumeMount {
        name: ETC_VOLUME.into(),
        mount_path: CONFIG_DIR.into(),
        ..Default::default()
    };
    let config = server_config(cluster.spec.web_admin_enabled, peers);

    Pod {
        metadata: object_meta(cluster, name.to_string()),
        spec: Some(PodSpec {
            init_containers: Some(vec![Container {
                name: "cluster-init".into(),
                image: Some(cfg.init_image.clone()),
                command: Some(vec![
                    "/bin/sh".into(),
                    "-c".into(),
                    format!("echo '{config}' > {CONFIG_FILE}"),
                ]),
                volume_mounts: Some(vec![etc_mount.clone()]),
                ..Default::default()
            }]),
            containers: vec![Container {
                name: SERVER_CONTAINER.into(),
                image: Some(format!("{}:{}", cfg.image, cluster.spec.version())),
                command: Some(vec!["rethinkdb".into()]),
                args: Some(args),
                env,
                ports: Some(vec![
                    container_port("http", HTTP_PORT),
                    container_port("driver", DRIVER_PORT),
                    container_port("cluster", CLUSTER_PORT),
                ]),
                resources: cluster.spec.resources().cloned(),
                readiness_probe: Some(Probe {
                    tcp_socket: Some(TCPSocketAction {
                        port: IntOrString::Int(DRIVER_PORT),
                        ..Default::default()
                    }),
                    initial_delay_seconds: Some(5),
                    period_seconds: Some(5),
                    timeout_seconds: Some(2),
                    ..Default::default()
                }),
                volume_mounts: Some(vec![
                    etc_mount,
                    VolumeMount {
                        name: TLS_VOLUME.into(),
                        mount_path: TLS_DIR.into(),
                        read_only: Some(true),
                        ..Default::default()
                    },
                    VolumeMount {
                        name: DATA_VOLUME.into(),
                        mount_path: DATA_DIR.into(),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }],
            volumes: Some(build_volumes(cluster, name)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.into()),
        container_port: port,
        ..Default::default()
    }
}

fn build_volumes(cluster: &RethinkDBCluster, member: &str) -> Vec<Volume> {
    let data = if cluster.spec.storage().is_some() {
        Volume {
            name: DATA_VOLUME.into(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim_name(member),
                read_only: None,
            }),
            ..Default::default()
        }
    } else {
        Volume {
            name: DATA_VOLUME.into(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        }
    };

    let mut sources = vec![VolumeProjection {
        secret: Some(SecretProjection {
            name: suffixed(cluster, "ca"),
            items: Some(vec![KeyToPath {
                key: TLS_CERT_KEY.into(),
                path: CA_CERT_KEY.into(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }];
    for role in ["cluster", "driver", "http"] {
        sources.push(VolumeProjection {
            secret: Some(SecretProjection {
                name: suffixed(cluster, role),
                items: Some(vec![
                    KeyToPath {
                        key: TLS_CERT_KEY.into(),
                        path: format!("{role}.crt"),
                        ..Default::default()
                    },
                    KeyToPath {
                        key: TLS_KEY_KEY.into(),
                        path: format!("{role}.key"),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    vec![
        Volume {
            name: ETC_VOLUME.into(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        Volume {
            name: TLS_VOLUME.into(),
            projected: Some(ProjectedVolumeSource {
                sources: Some(sources),
                ..Default::default()
            }),
            ..Default::default()
        },
        data,
    ]
}

/// Data claim for `member`, or `None` when the cluster has no storage policy.
pub fn build_claim(cluster: &RethinkDBCluster, member: &str) -> Option<PersistentVolumeClaim> {
    let spec = cluster.spec.storage()?;
    Some(PersistentVolumeClaim {
        metadata: object_meta(cluster, claim_name(member)),
        spec: Some(spec.clone()),
        ..Default::default()
    })
}
