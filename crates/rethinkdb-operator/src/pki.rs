use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

const ROOT_VALIDITY_DAYS: i64 = 3650;
const LEAF_VALIDITY_DAYS: i64 = 1825;

#[derive(Debug, Error)]
pub enum PkiError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("certificate encoding failed: {0}")]
    CertEncoding(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateMaterial {
    pub key_pem: String,
    pub cert_pem: String,
}

#[derive(Debug)]
pub struct CertificateAuthority {
    root: CertificateMaterial,
}

impl CertificateAuthority {
    pub fn generate_root(common_name: &str, organization: &str) -> Result<Self, PkiError> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(common_name, organization);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::days(ROOT_VALIDITY_DAYS);

        let key = KeyPair::generate().map_err(|e| PkiError::KeyGeneration(e.to_string()))?;
        let cert = params
            .self_signed(&key)
            .map_err(|e| PkiError::CertEncoding(e.to_string()))?;

        Ok(Self {
            root: CertificateMaterial {
                key_pem: key.serialize_pem(),
                cert_pem: cert.pem(),
            },
        })
    }

    /// Load a root previously produced by [`generate_root`](Self::generate_root).
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, PkiError> {
        let key = KeyPair::from_pem(key_pem)
            .map_err(|e| PkiError::Signing(format!("invalid root key: {e}")))?;
        Issuer::from_ca_cert_pem(cert_pem, &key)
            .map_err(|e| PkiError::Signing(format!("invalid root certificate: {e}")))?;
        Ok(Self {
            root: CertificateMaterial {
                key_pem: key_pem.to_string(),
                cert_pem: cert_pem.to_string(),
            },
        })
    }

    pub fn root(&self) -> &CertificateMaterial {
        &self.root
    }

    /// Issue a leaf for `role` with a fresh key. The common name is the role and
    /// the subject alternative names are `dns_names`.
    pub fn issue_leaf(
        &self,
        role: &str,
        dns_names: &[String],
        organization: &str,
    ) -> Result<CertificateMaterial, PkiError> {
        let root_key = KeyPair::from_pem(&self.root.key_pem)
            .map_err(|e| PkiError::Signing(format!("invalid root key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(&self.root.cert_pem, &root_key)
            .map_err(|e| PkiError::Signing(format!("invalid root certificate: {e}")))?;

        let mut params = CertificateParams::new(dns_names.to_vec())
            .map_err(|e| PkiError::CertEncoding(e.to_string()))?;
        params.distinguished_name = distinguished_name(role, organization);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::days(LEAF_VALIDITY_DAYS);

        let key = KeyPair::generate().map_err(|e| PkiError::KeyGeneration(e.to_string()))?;
        let cert = params
            .signed_by(&key, &issuer)
            .map_err(|e| PkiError::Signing(e.to_string()))?;

        Ok(CertificateMaterial {
            key_pem: key.serialize_pem(),
            cert_pem: cert.pem(),
        })
    }
}

fn distinguished_name(common_name: &str, organization: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(organization.to_string()),
    );
    dn
}
