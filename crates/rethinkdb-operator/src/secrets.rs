use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use rand::{
    Rng,
    seq::{IndexedRandom, SliceRandom},
};
use tracing::{debug, info};

use crate::{
    config::OperatorConfig,
    crds::cluster::RethinkDBCluster,
    error::StepError,
    pki::{CertificateAuthority, CertificateMaterial},
    resources::{
        ADMIN_USERNAME, CA_CERT_KEY, PASSWORD_KEY, TLS_CERT_KEY, TLS_KEY_KEY, USERNAME_KEY,
        object_meta, suffixed,
    },
    services::EndpointKind,
    store::{Store, StoreError},
};

pub const PASSWORD_LENGTH: usize = 16;
const PASSWORD_DIGITS: usize = 4;
const PASSWORD_SYMBOLS: usize = 4;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
// No quote characters: the password may end up in shell or config text.
const SYMBOLS: &[u8] = b"~!@#$%^&*()_+-={}|[]:<>?,./";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    Tls,
    Opaque,
}

impl ArtifactKind {
    fn secret_type(self) -> &'static str {
        match self {
            ArtifactKind::Tls => "kubernetes.io/tls",
            ArtifactKind::Opaque => "Opaque",
        }
    }
}

#[derive(Debug)]
pub enum Ensured<T> {
    Existing(T),
    Created(T),
}

impl<T> Ensured<T> {
    pub fn existed(&self) -> bool {
        matches!(self, Ensured::Existing(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Ensured::Existing(t) | Ensured::Created(t) => t,
        }
    }
}

/// Communication roles that get their own leaf certificate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsRole {
    Cluster,
    Driver,
    Http,
    Client,
}

impl TlsRole {
    pub const ALL: [TlsRole; 4] = [
        TlsRole::Cluster,
        TlsRole::Driver,
        TlsRole::Http,
        TlsRole::Client,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TlsRole::Cluster => "cluster",
            TlsRole::Driver => "driver",
            TlsRole::Http => "http",
            TlsRole::Client => "client",
        }
    }

    /// The Service this role is reached through.
    pub fn endpoint(self) -> EndpointKind {
        match self {
            TlsRole::Cluster => EndpointKind::ClusterInternal,
            TlsRole::Driver | TlsRole::Client => EndpointKind::ClientDriver,
            TlsRole::Http => EndpointKind::AdminConsole,
        }
    }

    pub fn dns_names(self, cluster: &RethinkDBCluster, cluster_domain: &str) -> Vec<String> {
        let svc = self.endpoint().service_name(cluster);
        let ns = cluster.namespace().unwrap_or_default();
        vec![
            format!("{svc}.{ns}.svc"),
            format!("{svc}.{ns}.svc.{cluster_domain}"),
        ]
    }
}

/// Looks `name` up and only when it is absent builds it with `generate` and
/// creates it. Losing a create race to another writer counts as existing.
pub async fn ensure_secret<S, F>(
    store: &S,
    cluster: &RethinkDBCluster,
    name: &str,
    kind: ArtifactKind,
    generate: F,
) -> Result<Ensured<Secret>, StepError>
where
    S: Store,
    F: FnOnce() -> Result<BTreeMap<String, Vec<u8>>, StepError>,
{
    let ns = cluster.namespace().unwrap_or_default();
    if let Some(existing) = store.get::<Secret>(&ns, name).await? {
        debug!(secret = name, "secret exists");
        return Ok(Ensured::Existing(existing));
    }

    info!(secret = name, "creating secret");
    let data = generate()?
        .into_iter()
        .map(|(k, v)| (k, ByteString(v)))
        .collect();
    let secret = Secret {
        metadata: object_meta(cluster, name.to_string()),
        type_: Some(kind.secret_type().into()),
        data: Some(data),
        ..Default::default()
    };
    match store.create(&ns, &secret).await {
        Ok(created) => Ok(Ensured::Created(created)),
        Err(StoreError::AlreadyExists { .. }) => match store.get::<Secret>(&ns, name).await? {
            Some(existing) => Ok(Ensured::Existing(existing)),
            None => Err(StoreError::NotFound {
                kind: "Secret".into(),
                name: name.to_string(),
            }
            .into()),
        },
        Err(e) => Err(e.into()),
    }
}

fn tls_data(material: &CertificateMaterial) -> BTreeMap<String, Vec<u8>> {
    BTreeMap::from([
        (TLS_CERT_KEY.to_string(), material.cert_pem.clone().into_bytes()),
        (TLS_KEY_KEY.to_string(), material.key_pem.clone().into_bytes()),
    ])
}

fn secret_field(secret: &Secret, field: &str) -> Result<String, StepError> {
    let missing = || StepError::MissingField {
        secret: secret.name_any(),
        field: field.to_string(),
    };
    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(field))
        .ok_or_else(missing)?;
    let text = String::from_utf8(bytes.0.clone())?;
    if text.trim().is_empty() {
        return Err(missing());
    }
    Ok(text)
}

pub async fn ensure_root_ca<S: Store>(
    store: &S,
    cluster: &RethinkDBCluster,
) -> Result<CertificateAuthority, StepError> {
    let name = suffixed(cluster, "ca");
    let ns = cluster.namespace().unwrap_or_default();
    let secret = ensure_secret(store, cluster, &name, ArtifactKind::Tls, || {
        let ca = CertificateAuthority::generate_root(&name, &ns)?;
        Ok(tls_data(ca.root()))
    })
    .await?
    .into_inner();

    let cert = secret_field(&secret, TLS_CERT_KEY)?;
    let key = secret_field(&secret, TLS_KEY_KEY)?;
    Ok(CertificateAuthority::from_pem(&cert, &key)?)
}

pub async fn ensure_ca_bundle<S: Store>(
    store: &S,
    cluster: &RethinkDBCluster,
    ca: &CertificateAuthority,
) -> Result<Ensured<ConfigMap>, StepError> {
    let name = suffixed(cluster, "ca");
    let ns = cluster.namespace().unwrap_or_default();
    if let Some(existing) = store.get::<ConfigMap>(&ns, &name).await? {
        debug!(configmap = %name, "configmap exists");
        return Ok(Ensured::Existing(existing));
    }
    info!(configmap = %name, "creating ca configmap");
    let cm = ConfigMap {
        metadata: object_meta(cluster, name),
        data: Some(BTreeMap::from([(
            CA_CERT_KEY.to_string(),
            ca.root().cert_pem.clone(),
        )])),
        ..Default::default()
    };
    match store.create(&ns, &cm).await {
        Ok(created) => Ok(Ensured::Created(created)),
        Err(StoreError::AlreadyExists { .. }) => Ok(Ensured::Existing(cm)),
        Err(e) => Err(e.into()),
    }
}

/// Ensures one leaf secret per role. Returns how many were created.
pub async fn ensure_leaf_certificates<S: Store>(
    store: &S,
    cluster: &RethinkDBCluster,
    ca: &CertificateAuthority,
    cfg: &OperatorConfig,
) -> Result<usize, StepError> {
    let ns = cluster.namespace().unwrap_or_default();
    let mut created = 0;
    for role in TlsRole::ALL {
        let name = suffixed(cluster, role.as_str());
        let ensured = ensure_secret(store, cluster, &name, ArtifactKind::Tls, || {
            let leaf = ca.issue_leaf(
                role.as_str(),
                &role.dns_names(cluster, &cfg.cluster_domain),
                &ns,
            )?;
            Ok(tls_data(&leaf))
        })
        .await?;
        if !ensured.existed() {
            created += 1;
        }
    }
    Ok(created)
}

pub async fn ensure_admin_credential<S: Store>(
    store: &S,
    cluster: &RethinkDBCluster,
) -> Result<Ensured<Secret>, StepError> {
    let name = suffixed(cluster, ADMIN_USERNAME);
    ensure_secret(store, cluster, &name, ArtifactKind::Opaque, || {
        Ok(BTreeMap::from([
            (USERNAME_KEY.to_string(), ADMIN_USERNAME.as_bytes().to_vec()),
            (
                PASSWORD_KEY.to_string(),
                generate_password(&mut rand::rng()).into_bytes(),
            ),
        ]))
    })
    .await
}

/// A 16 character password with 4 digits, 4 symbols and upper and lower case
/// letters. No character repeats.
pub fn generate_password<R: Rng + ?Sized>(rng: &mut R) -> String {
    let letters = PASSWORD_LENGTH - PASSWORD_DIGITS - PASSWORD_SYMBOLS;
    let mut chars: Vec<u8> = Vec::with_capacity(PASSWORD_LENGTH);
    chars.extend(LOWER.choose_multiple(rng, letters / 2));
    chars.extend(UPPER.choose_multiple(rng, letters - letters / 2));
    chars.extend(DIGITS.choose_multiple(rng, PASSWORD_DIGITS));
    chars.extend(SYMBOLS.choose_multiple(rng, PASSWORD_SYMBOLS));
    chars.shuffle(rng);
    chars.into_iter().map(char::from).collect()
}
