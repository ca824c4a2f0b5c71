//! Credential and address search for an authenticated session.

use std::sync::Arc;

use bon::Builder;
use tracing::debug;

use crate::device::probe::ProbeOptions;
use crate::device::Credential;
use crate::device::Handle;
use crate::device::Prober;
use crate::device::Vendor;
use crate::error::Error;

/// Outcome of one probe of one credential against one address.
#[derive(Debug)]
enum Probed {
    /// Authenticated session on a configurable controller.
    Success(Handle),
    /// Authenticated session on a standby enclosure member.
    Inactive(Handle),
    /// The endpoint rejected the credential.
    BadCredential,
    /// The endpoint did not produce a session at all.
    Failed,
}

/// Audit trail of one login call. Returned on success and carried
/// inside [`Error::LoginFailed`] otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptRecord {
    /// Total probes made.
    pub attempts: u32,
    /// Credentials rejected by an answering endpoint, in rejection
    /// order. Retries append again, so a credential may repeat.
    pub failed_credentials: Vec<Credential>,
    /// The credential that produced the session.
    pub working_credential: Option<Credential>,
    /// The address that answered and proved configurable. Stays unset
    /// for a last-resort standby session.
    pub active_ip: Option<String>,
}

/// Walks credentials against candidate addresses until a session is
/// won or the whole matrix is exhausted.
///
/// The search is credential-major: a credential is tried against every
/// address, with per-pair retries, before the next credential is
/// considered.
#[derive(Builder)]
pub struct Login {
    prober: Arc<Prober>,
    /// Candidate controller addresses, tried in order.
    ip_addresses: Vec<String>,
    /// Credentials, tried in order.
    credentials: Vec<Credential>,
    /// Vendor hint fed to the prober.
    hint: Option<Vendor>,
    /// Whether each session's credential is verified with the device
    /// before being accepted.
    #[builder(default = true)]
    check_credential: bool,
    /// Retries per credential and address pair. Zero falls back to
    /// one.
    #[builder(default)]
    retries: u32,
}

impl Login {
    /// Runs the search.
    ///
    /// # Errors
    ///
    /// [`Error::LoginFailed`] carrying the full attempt record when no
    /// pair yields a session.
    pub async fn login(&self) -> Result<(Handle, AttemptRecord), Error> {
        let retries = if self.retries == 0 { 1 } else { self.retries };
        let mut record = AttemptRecord::default();

        for credential in &self.credentials {
            for ip in &self.ip_addresses {
                if ip.is_empty() {
                    continue;
                }

                'attempts: for _ in 0..=retries {
                    record.attempts += 1;

                    match self.probe_pair(ip, credential).await {
                        Probed::Success(handle) => {
                            record.active_ip = Some(ip.clone());
                            record.working_credential = Some(credential.clone());
                            return Ok((handle, record));
                        }
                        Probed::Inactive(handle) => {
                            if self.ip_addresses.len() == 1 {
                                // The only address there is. A standby
                                // session beats none at all.
                                debug!(%ip, "sole address is a standby member, accepting");
                                record.working_credential = Some(credential.clone());
                                return Ok((handle, record));
                            }
                            let mut handle = handle;
                            if let Err(error) = handle.close().await {
                                debug!(%ip, %error, "failed to close standby session");
                            }
                            break 'attempts;
                        }
                        Probed::BadCredential => {
                            record.failed_credentials.push(credential.clone());
                        }
                        Probed::Failed => {}
                    }
                }
            }
        }

        Err(Error::LoginFailed { record })
    }

    async fn probe_pair(&self, ip: &str, credential: &Credential) -> Probed {
        let opts = ProbeOptions {
            hint: self.hint,
            hint_callback: None,
        };
        let mut handle = match self.prober.probe(ip, credential, &opts).await {
            Ok(handle) => handle,
            Err(error) => {
                debug!(%ip, username = %credential.username, %error, "probe attempt unsuccessful");
                return Probed::Failed;
            }
        };

        if !self.check_credential {
            return Probed::Success(handle);
        }

        if let Err(error) = handle.device().check_credentials().await {
            debug!(%ip, username = %credential.username, %error, "credential rejected");
            if let Err(error) = handle.close().await {
                debug!(%ip, %error, "failed to close rejected session");
            }
            return Probed::BadCredential;
        }

        match handle.is_active().await {
            Ok(true) => Probed::Success(handle),
            Ok(false) => Probed::Inactive(handle),
            Err(error) => {
                debug!(%ip, %error, "active member query failed");
                if let Err(error) = handle.close().await {
                    debug!(%ip, %error, "failed to close session");
                }
                Probed::Failed
            }
        }
    }
}
