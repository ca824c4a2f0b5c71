#[cfg(test)]
pub(crate) mod fake;
pub mod login;
pub mod probe;
pub mod redfish;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use bstr::ByteSlice;
use redact::Secret;
use serde::de;
use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumIter;
use strum::EnumString;

pub use self::login::Login;
pub use self::probe::Prober;

use crate::asset::DeviceClass;
use crate::resource::Resource;
use crate::resource::Section;
use crate::resource::SetupChassis;

/// Vendor probe IDs known to the prober, in default try order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, EnumIter, Display,
    Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Vendor {
    HpIlo,
    Idrac8,
    Idrac9,
    Supermicrox11,
    Supermicrox,
    HpC7000,
    M1000e,
    Quanta,
    HpCl100,
}

/// One username and password pair tried during login.
///
/// In YAML form a credential is a single-entry map:
///
/// ```yaml
/// - Administrator: hunter2
/// ```
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub password: Secret<String>,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Secret::new(password.into()),
        }
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username
            && self.password.expose_secret() == other.password.expose_secret()
    }
}

impl Eq for Credential {}

impl<'de> Deserialize<'de> for Credential {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct CredentialVisitor;

        impl<'de> de::Visitor<'de> for CredentialVisitor {
            type Value = Credential;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a single-entry map of username to password")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Credential, A::Error>
            where
                A: de::MapAccess<'de>,
            {
                let (username, password) = map
                    .next_entry::<String, String>()?
                    .ok_or_else(|| de::Error::custom("credential entry is empty"))?;
                if map.next_key::<String>()?.is_some() {
                    return Err(de::Error::custom(
                        "credential entry must hold a single username/password pair",
                    ));
                }
                Ok(Credential::new(username, password))
            }
        }

        deserializer.deserialize_map(CredentialVisitor)
    }
}

/// Output of a command run against a device.
#[derive(Clone)]
pub struct ExecOutput {
    pub exit_status: u32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl fmt::Debug for ExecOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecOutput")
            .field("exit_status", &self.exit_status)
            .field("stdout", &self.stdout.as_bstr())
            .field("stderr", &self.stderr.as_bstr())
            .finish()
    }
}

/// Operations shared by every authenticated controller session.
///
/// Implementations own the vendor wire protocol; the engines treat
/// them as black boxes.
#[async_trait]
pub trait Device: Send {
    /// Probe ID of the vendor family this session belongs to.
    fn vendor(&self) -> Vendor;

    /// Device model as reported by the controller.
    fn model(&self) -> String;

    /// Serial number as reported by the controller.
    async fn serial(&mut self) -> Result<String>;

    /// Verifies that the session credentials are accepted.
    async fn check_credentials(&mut self) -> Result<()>;

    /// Configuration resources this vendor family supports, in apply
    /// order.
    fn resources(&self) -> Vec<Resource>;

    /// Applies one rendered configuration section.
    async fn apply(&mut self, resource: Resource, section: Section<'_>) -> Result<()>;

    /// Runs a one-off command.
    async fn execute(&mut self, command: &str) -> Result<ExecOutput>;

    /// Releases the session. Must be called on every exit path.
    async fn close(&mut self) -> Result<()>;
}

/// Additional operations for enclosure controllers.
#[async_trait]
pub trait ChassisDevice: Device {
    /// Whether this controller is the active member of its enclosure.
    /// Standby members answer logins but refuse configuration.
    async fn is_active(&mut self) -> Result<bool>;

    /// One-time enclosure setup, run before recurring resources.
    async fn setup(&mut self, section: &SetupChassis) -> Result<()>;
}

/// An authenticated, vendor-typed controller session.
///
/// Owned exclusively by the worker that logged in and released on
/// every exit path of that worker.
pub enum Handle {
    Server(Box<dyn Device>),
    Chassis(Box<dyn ChassisDevice>),
}

impl Handle {
    #[must_use]
    pub fn class(&self) -> DeviceClass {
        match self {
            Self::Server(_) => DeviceClass::Server,
            Self::Chassis(_) => DeviceClass::Chassis,
        }
    }

    #[must_use]
    pub fn vendor(&self) -> Vendor {
        match self {
            Self::Server(device) => device.vendor(),
            Self::Chassis(device) => device.vendor(),
        }
    }

    /// Common capability view over either class.
    pub fn device(&mut self) -> &mut dyn Device {
        match self {
            Self::Server(device) => device.as_mut(),
            Self::Chassis(device) => {
                let device: &mut dyn Device = device.as_mut();
                device
            }
        }
    }

    /// Whether this session landed on the member that can actually be
    /// configured. Server sessions always can.
    ///
    /// # Errors
    ///
    /// If the enclosure's active-member query fails.
    pub async fn is_active(&mut self) -> Result<bool> {
        match self {
            Self::Server(_) => Ok(true),
            Self::Chassis(device) => device.is_active().await,
        }
    }

    /// Releases the underlying session.
    ///
    /// # Errors
    ///
    /// If the vendor session teardown fails.
    pub async fn close(&mut self) -> Result<()> {
        self.device().close().await
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("class", &self.class())
            .field("vendor", &self.vendor())
            .finish()
    }
}

/// Vendor probe contract. One implementation per vendor family.
#[async_trait]
pub trait ProbeDriver: Send + Sync {
    /// Vendor family this probe identifies.
    fn vendor(&self) -> Vendor;

    /// Attempts to identify the endpoint as this vendor family and
    /// open an authenticated session.
    ///
    /// An endpoint that answers but is not this vendor family must be
    /// reported as an error so probing falls through to the next
    /// driver in the try order.
    async fn probe(&self, host: &str, credential: &Credential) -> Result<Handle>;
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use strum::IntoEnumIterator;

    use super::*;

    #[rstest]
    #[case("hpilo", Vendor::HpIlo)]
    #[case("idrac8", Vendor::Idrac8)]
    #[case("idrac9", Vendor::Idrac9)]
    #[case("supermicrox11", Vendor::Supermicrox11)]
    #[case("supermicrox", Vendor::Supermicrox)]
    #[case("hpc7000", Vendor::HpC7000)]
    #[case("m1000e", Vendor::M1000e)]
    #[case("quanta", Vendor::Quanta)]
    #[case("hpcl100", Vendor::HpCl100)]
    fn vendor_roundtrips(#[case] name: &str, #[case] vendor_should: Vendor) {
        let vendor: Vendor = name.parse().unwrap();
        assert_eq!(vendor, vendor_should);
        assert_eq!(vendor.to_string(), name);
    }

    #[test]
    fn vendor_try_order_is_stable() {
        let order: Vec<Vendor> = Vendor::iter().collect();
        assert_eq!(order.first(), Some(&Vendor::HpIlo));
        assert_eq!(order.last(), Some(&Vendor::HpCl100));
        assert_eq!(order.len(), 9);
    }

    #[test]
    fn credential_parses_single_entry_map() {
        let creds: Vec<Credential> = serde_yaml::from_str("- admin: pass\n- root: calvin\n").unwrap();
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[0].username, "admin");
        assert_eq!(creds[0].password.expose_secret(), "pass");
        assert_eq!(creds[1].username, "root");
    }

    #[test]
    fn credential_rejects_multiple_entries() {
        let parsed: Result<Credential, _> = serde_yaml::from_str("admin: pass\nroot: calvin\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn credential_debug_is_redacted() {
        let credential = Credential::new("admin", "hunter2");
        let debug = format!("{credential:?}");
        assert!(!debug.contains("hunter2"));
    }
}
