use thiserror::Error as ThisError;

use crate::device::login::AttemptRecord;

/// Failure taxonomy for the steward engines.
///
/// Errors scoped to a single asset are logged and counted by the
/// dispatcher without aborting the fleet run.
#[derive(Debug, ThisError)]
pub enum Error {
    /// No probe in the catalog produced a handle for the endpoint.
    #[error("no vendor probe matched {host}")]
    VendorUnknown { host: String },

    /// The full credential x IP x retry matrix was exhausted without
    /// an authenticated session. Carries the audit trail of attempts.
    #[error("all {} login attempts failed", record.attempts)]
    LoginFailed { record: AttemptRecord },

    /// The rendered resource configuration contained nothing to apply.
    #[error("no configuration applies to this asset")]
    NoConfiguration,

    /// A probe driver produced an endpoint that fits neither the
    /// server nor the chassis capability set.
    #[error("unrecognized device type at {host}")]
    UnknownDeviceType { host: String },

    /// A requested resource name is not in the apply catalog.
    #[error("unknown resource {name:?}")]
    UnknownResource { name: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Login attempt record, when this error carries one.
    #[must_use]
    pub fn attempt_record(&self) -> Option<&AttemptRecord> {
        match self {
            Self::LoginFailed { record } => Some(record),
            _ => None,
        }
    }
}
