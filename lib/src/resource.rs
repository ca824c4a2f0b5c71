//! Configuration resource catalog and rendered section types.

pub mod render;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumIter;
use strum::EnumString;

pub use self::render::Render;
pub use self::render::TemplateRenderer;

/// Named configuration resources, declared in apply order.
///
/// Iteration order via [`strum::IntoEnumIterator`] is the order the
/// apply engine walks resources in, regardless of how callers spell
/// their restriction lists.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    User,
    Syslog,
    Ntp,
    Ldap,
    LdapGroup,
    License,
    Network,
}

/// Rendered, asset-specific configuration. Sections absent from the
/// source document stay `None` and are skipped at apply time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub user: Option<Vec<UserAccount>>,
    pub syslog: Option<Syslog>,
    pub ntp: Option<Ntp>,
    pub ldap: Option<Ldap>,
    pub ldap_group: Option<LdapGroups>,
    pub license: Option<License>,
    pub network: Option<Network>,
    pub setup_chassis: Option<SetupChassis>,
}

impl ResourceConfig {
    /// True when no section at all was declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.user.is_none()
            && self.syslog.is_none()
            && self.ntp.is_none()
            && self.ldap.is_none()
            && self.ldap_group.is_none()
            && self.license.is_none()
            && self.network.is_none()
            && self.setup_chassis.is_none()
    }

    /// Borrowed view of the section backing `resource`, or `None` when
    /// the document does not declare it.
    ///
    /// Directory group sections depend on the directory section being
    /// present as well, since group roles are meaningless without a
    /// directory to resolve them against.
    #[must_use]
    pub fn section(&self, resource: Resource) -> Option<Section<'_>> {
        match resource {
            Resource::User => self.user.as_deref().map(Section::User),
            Resource::Syslog => self.syslog.as_ref().map(Section::Syslog),
            Resource::Ntp => self.ntp.as_ref().map(Section::Ntp),
            Resource::Ldap => self.ldap.as_ref().map(Section::Ldap),
            Resource::LdapGroup => match (&self.ldap_group, &self.ldap) {
                (Some(groups), Some(ldap)) => Some(Section::LdapGroups {
                    groups: &groups.groups,
                    ldap,
                }),
                _ => None,
            },
            Resource::License => self.license.as_ref().map(Section::License),
            Resource::Network => self.network.as_ref().map(Section::Network),
        }
    }
}

/// Borrowed view of one configuration section, handed to a device
/// adapter for application.
#[derive(Debug, Clone, Copy)]
pub enum Section<'a> {
    User(&'a [UserAccount]),
    Syslog(&'a Syslog),
    Ntp(&'a Ntp),
    Ldap(&'a Ldap),
    LdapGroups {
        groups: &'a [LdapGroup],
        ldap: &'a Ldap,
    },
    License(&'a License),
    Network(&'a Network),
}

impl Section<'_> {
    /// The catalog entry this section belongs to.
    #[must_use]
    pub fn resource(&self) -> Resource {
        match self {
            Self::User(_) => Resource::User,
            Self::Syslog(_) => Resource::Syslog,
            Self::Ntp(_) => Resource::Ntp,
            Self::Ldap(_) => Resource::Ldap,
            Self::LdapGroups { .. } => Resource::LdapGroup,
            Self::License(_) => Resource::License,
            Self::Network(_) => Resource::Network,
        }
    }
}

/// A local account to ensure on the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UserAccount {
    pub name: String,
    pub password: String,
    pub role: String,
    pub enable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Syslog {
    pub server: String,
    pub port: Option<u16>,
    pub enable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Ntp {
    pub enable: bool,
    pub server1: String,
    pub server2: String,
    pub server3: String,
    pub timezone: String,
}

/// Directory service settings shared by every group role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Ldap {
    pub server: String,
    pub port: Option<u16>,
    pub enable: bool,
    pub role: String,
    pub base_dn: String,
    pub group_base_dn: String,
    pub user_attribute: String,
    pub group_attribute: String,
    pub search_filter: String,
}

/// One directory group granted a role on the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LdapGroup {
    pub role: String,
    pub group: String,
    pub group_base_dn: String,
    pub enable: bool,
}

/// Statically declared directory groups plus an optional external
/// lookup for host-specific extras.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LdapGroups {
    pub groups: Vec<LdapGroup>,
    /// Helper executable invoked with the device serial and vendor,
    /// expected to print additional groups as YAML on stdout.
    pub extra_groups_exec: Option<String>,
}

impl LdapGroups {
    /// Runs the external lookup for host-specific groups. Without a
    /// configured helper this resolves to no extra groups.
    ///
    /// # Errors
    ///
    /// If the helper cannot be spawned, exits nonzero, or prints
    /// output that does not decode as a group list.
    pub async fn extra_groups(&self, serial: &str, vendor: &str) -> Result<Vec<LdapGroup>> {
        let Some(exec) = &self.extra_groups_exec else {
            return Ok(Vec::new());
        };

        let output = tokio::process::Command::new(exec)
            .arg("--serial")
            .arg(serial)
            .arg("--vendor")
            .arg(vendor)
            .output()
            .await
            .with_context(|| format!("failed to run group lookup helper {exec}"))?;
        if !output.status.success() {
            bail!("group lookup helper {exec} exited with {}", output.status);
        }

        let groups: Vec<LdapGroup> = serde_yaml::from_slice(&output.stdout)
            .with_context(|| format!("failed to decode groups from {exec}"))?;
        Ok(groups)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct License {
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Network {
    pub hostname: String,
    pub dns_from_dhcp: bool,
    pub sshd_enable: bool,
    pub sshd_port: Option<u16>,
    pub ipmi_enable: bool,
    pub ipmi_port: Option<u16>,
}

/// One-time enclosure setup switches. Unset switches are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SetupChassis {
    pub flex_address: Option<bool>,
    pub ipmi_over_lan: Option<bool>,
    pub dynamic_power: Option<bool>,
    pub blades_power: Option<bool>,
}

#[cfg(test)]
#[rustfmt::skip::attributes(case)]
mod tests {
    use rstest::rstest;
    use strum::IntoEnumIterator;

    use super::*;

    #[rstest]
    #[case("user", Resource::User)]
    #[case("syslog", Resource::Syslog)]
    #[case("ntp", Resource::Ntp)]
    #[case("ldap", Resource::Ldap)]
    #[case("ldap_group", Resource::LdapGroup)]
    #[case("license", Resource::License)]
    #[case("network", Resource::Network)]
    fn resource_name_roundtrips(#[case] name: &str, #[case] resource: Resource) {
        assert_eq!(name.parse::<Resource>().unwrap(), resource);
        assert_eq!(resource.to_string(), name);
    }

    #[test]
    fn apply_order_is_stable() {
        let order: Vec<Resource> = Resource::iter().collect();
        assert_eq!(
            order,
            vec![
                Resource::User,
                Resource::Syslog,
                Resource::Ntp,
                Resource::Ldap,
                Resource::LdapGroup,
                Resource::License,
                Resource::Network,
            ]
        );
    }

    #[test]
    fn partial_document_only_declares_its_sections() {
        let yaml = r"
ntp:
  enable: true
  server1: ntp0.example.com
  timezone: UTC
";
        let config: ResourceConfig = serde_yaml::from_str(yaml).unwrap();

        assert!(!config.is_empty());
        assert!(config.section(Resource::Ntp).is_some());
        assert!(config.section(Resource::User).is_none());
        assert!(config.section(Resource::Network).is_none());

        let Some(Section::Ntp(ntp)) = config.section(Resource::Ntp) else {
            panic!("expected an ntp section");
        };
        assert!(ntp.enable);
        assert_eq!(ntp.server1, "ntp0.example.com");
        assert_eq!(ntp.timezone, "UTC");
    }

    #[test]
    fn ldap_group_section_requires_ldap() {
        let yaml = r"
ldap_group:
  groups:
    - role: admin
      group: bmc-admins
      enable: true
";
        let config: ResourceConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.section(Resource::LdapGroup).is_none());

        let yaml = r"
ldap:
  server: ldap.example.com
  enable: true
ldap_group:
  groups:
    - role: admin
      group: bmc-admins
      enable: true
";
        let config: ResourceConfig = serde_yaml::from_str(yaml).unwrap();
        let Some(Section::LdapGroups { groups, ldap }) = config.section(Resource::LdapGroup)
        else {
            panic!("expected an ldap_group section");
        };
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group, "bmc-admins");
        assert_eq!(ldap.server, "ldap.example.com");
    }

    #[test]
    fn empty_document_is_empty() {
        let config = ResourceConfig::default();
        assert!(config.is_empty());
        for resource in Resource::iter() {
            assert!(config.section(resource).is_none());
        }
    }

    #[tokio::test]
    async fn extra_groups_without_helper_is_empty() {
        let groups = LdapGroups::default();
        let extra = groups.extra_groups("XYZ123", "idrac9").await.unwrap();
        assert!(extra.is_empty());
    }

    #[tokio::test]
    async fn extra_groups_missing_helper_fails() {
        let groups = LdapGroups {
            extra_groups_exec: Some("/nonexistent/steward-test-helper".to_string()),
            ..LdapGroups::default()
        };
        let result = groups.extra_groups("XYZ123", "idrac9").await;
        assert!(result.is_err());
    }
}
