//! Applies rendered configuration resources to an authenticated
//! device.

use bon::Builder;
use strum::IntoEnumIterator;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::asset::Asset;
use crate::device::Device;
use crate::error::Error;
use crate::resource::Resource;
use crate::resource::ResourceConfig;
use crate::resource::Section;

/// Per-resource results of one apply walk.
///
/// A resource appears in neither list when its section was absent or
/// the walk was cancelled before reaching it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub succeeded: Vec<Resource>,
    pub failed: Vec<Resource>,
}

impl ApplyOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Walks configuration resources in catalog order and applies each
/// declared section, never stopping on an individual failure.
#[derive(Builder)]
pub struct Applier {
    /// Restricts the walk to these resource names. Empty means the
    /// device's own capability list.
    #[builder(default)]
    restrict: Vec<String>,
    cancel: CancellationToken,
}

impl Applier {
    pub async fn apply(
        &self,
        device: &mut dyn Device,
        config: &ResourceConfig,
        asset: &Asset,
    ) -> ApplyOutcome {
        let requested = self.requested(device);
        let mut outcome = ApplyOutcome::default();

        for resource in Resource::iter() {
            if !requested.contains(&resource) {
                continue;
            }

            if self.cancel.is_cancelled() {
                debug!(serial = %asset.serial, "cancellation received, apply stopped");
                break;
            }

            let applied = match resource {
                Resource::LdapGroup => self.apply_ldap_group(device, config, asset).await,
                _ => match config.section(resource) {
                    Some(section) => Some(device.apply(resource, section).await),
                    None => None,
                },
            };

            let Some(result) = applied else {
                continue;
            };
            match result {
                Ok(()) => {
                    debug!(serial = %asset.serial, resource = %resource, "resource applied");
                    outcome.succeeded.push(resource);
                }
                Err(error) => {
                    warn!(
                        serial = %asset.serial,
                        resource = %resource,
                        %error,
                        "resource configuration returned errors"
                    );
                    outcome.failed.push(resource);
                }
            }
        }

        if outcome.is_success() {
            info!(
                serial = %asset.serial,
                applied = ?outcome.succeeded,
                "configuration resources applied"
            );
        } else {
            warn!(
                serial = %asset.serial,
                applied = ?outcome.succeeded,
                failed = ?outcome.failed,
                "one or more configuration resources failed"
            );
        }

        outcome
    }

    /// The resources this walk should visit. Unknown names in the
    /// restriction list are logged and dropped.
    fn requested(&self, device: &dyn Device) -> Vec<Resource> {
        if self.restrict.is_empty() {
            return device.resources();
        }

        let mut known = Vec::new();
        for name in &self.restrict {
            match name.parse::<Resource>() {
                Ok(resource) => known.push(resource),
                Err(_) => {
                    let error = Error::UnknownResource { name: name.clone() };
                    warn!(%error, "requested resource skipped");
                }
            }
        }
        known
    }

    /// Directory groups are applied as the union of the statically
    /// declared groups and whatever the external lookup reports for
    /// this host. A lookup failure only costs the extra groups.
    async fn apply_ldap_group(
        &self,
        device: &mut dyn Device,
        config: &ResourceConfig,
        asset: &Asset,
    ) -> Option<anyhow::Result<()>> {
        let (Some(declared), Some(ldap)) = (&config.ldap_group, &config.ldap) else {
            return None;
        };

        let mut groups = declared.groups.clone();
        match declared.extra_groups(&asset.serial, &asset.vendor).await {
            Ok(extra) => groups.extend(extra),
            Err(error) => {
                warn!(serial = %asset.serial, %error, "extra group lookup failed");
            }
        }

        let section = Section::LdapGroups {
            groups: &groups,
            ldap,
        };
        Some(device.apply(Resource::LdapGroup, section).await)
    }
}
