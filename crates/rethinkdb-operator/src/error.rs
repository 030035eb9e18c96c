use std::fmt;

use thiserror::Error;

use crate::{crds::cluster::MalformedSpec, pki::PkiError, store::StoreError};

/// Phases of a reconcile pass, in the order they run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Defaults,
    RootCa,
    LeafCertificates,
    AdminCredential,
    Endpoints,
    Membership,
    Status,
    Upgrade,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Defaults => "defaults",
            Step::RootCa => "root-ca",
            Step::LeafCertificates => "leaf-certificates",
            Step::AdminCredential => "admin-credential",
            Step::Endpoints => "endpoints",
            Step::Membership => "membership",
            Step::Status => "status",
            Step::Upgrade => "upgrade",
        })
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pki(#[from] PkiError),
    #[error("member {member} runs unparsable version {version:?}: {source}")]
    VersionParse {
        member: String,
        version: String,
        #[source]
        source: semver::Error,
    },
    #[error("desired version {version:?} is not a semantic version: {source}")]
    DesiredVersionParse {
        version: String,
        #[source]
        source: semver::Error,
    },
    #[error("secret {secret} has no usable {field:?} field")]
    MissingField { secret: String, field: String },
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    MalformedSpec(#[from] MalformedSpec),
    #[error("{step} step failed: {source}")]
    Step {
        step: Step,
        #[source]
        source: StepError,
    },
}

impl ReconcileError {
    pub fn step(&self) -> Step {
        match self {
            ReconcileError::MalformedSpec(_) => Step::Defaults,
            ReconcileError::Step { step, .. } => *step,
        }
    }
}

/// Tags a failure with the step that produced it.
pub trait StepContext<T> {
    fn step(self, step: Step) -> Result<T, ReconcileError>;
}

impl<T, E: Into<StepError>> StepContext<T> for Result<T, E> {
    fn step(self, step: Step) -> Result<T, ReconcileError> {
        self.map_err(|e| ReconcileError::Step {
            step,
            source: e.into(),
        })
    }
}
