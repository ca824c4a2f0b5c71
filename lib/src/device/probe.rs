//! Vendor discovery by ordered probing.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::device::Credential;
use crate::device::Handle;
use crate::device::ProbeDriver;
use crate::device::Vendor;
use crate::error::Error;

/// Callback handed the winning vendor after a successful probe, so
/// callers can persist it for the next run.
pub type HintCallback = Box<dyn Fn(Vendor) -> Result<()> + Send + Sync>;

/// Per-call probe options.
#[derive(Default)]
pub struct ProbeOptions {
    /// Vendor to try ahead of catalog order.
    pub hint: Option<Vendor>,
    pub hint_callback: Option<HintCallback>,
}

/// Identifies the vendor behind an address by trying every registered
/// probe in order until one produces an authenticated handle.
pub struct Prober {
    drivers: Vec<Arc<dyn ProbeDriver>>,
}

impl Prober {
    #[must_use]
    pub fn new(drivers: Vec<Arc<dyn ProbeDriver>>) -> Self {
        Self { drivers }
    }

    /// Probes `host` in try order and returns the first handle
    /// produced. Individual probe failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// [`Error::VendorUnknown`] when every probe fails. When the hint
    /// callback fails, its error is returned and the fresh handle is
    /// closed first.
    pub async fn probe(
        &self,
        host: &str,
        credential: &Credential,
        opts: &ProbeOptions,
    ) -> Result<Handle, Error> {
        for driver in self.try_order(opts.hint) {
            let vendor = driver.vendor();
            debug!(%host, %vendor, "probing to identify device");

            let mut handle = match driver.probe(host, credential).await {
                Ok(handle) => handle,
                Err(error) => {
                    debug!(%host, %vendor, %error, "probe attempt did not match");
                    continue;
                }
            };

            if let Some(callback) = &opts.hint_callback {
                if let Err(error) = callback(vendor) {
                    if let Err(close_error) = handle.close().await {
                        debug!(%host, %close_error, "failed to close session");
                    }
                    return Err(error.into());
                }
            }

            return Ok(handle);
        }

        Err(Error::VendorUnknown {
            host: host.to_owned(),
        })
    }

    /// Registration order with the hinted vendor, when registered,
    /// moved to the front. All other probes keep their relative order.
    fn try_order(&self, hint: Option<Vendor>) -> Vec<Arc<dyn ProbeDriver>> {
        let mut order = self.drivers.clone();
        if let Some(hint) = hint {
            if let Some(index) = order.iter().position(|driver| driver.vendor() == hint) {
                order[..=index].rotate_right(1);
            }
        }
        order
    }
}
