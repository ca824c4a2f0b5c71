use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumString;

use crate::device::Vendor;

/// Capability class of a managed controller.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, Display, Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// Single-host baseboard management controller.
    Server,
    /// Enclosure controller, possibly with redundant standby peers.
    Chassis,
}

/// One managed out-of-band controller.
///
/// Constructed by an inventory source, enriched with the resolved
/// address and device-reported identity during login, consumed once
/// per work message, then discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Asset {
    /// Candidate controller addresses. A chassis may expose several,
    /// only one of which is the active controller.
    pub ip_addresses: Vec<String>,
    /// The address that answered and proved active. Set during login;
    /// stays unset when login fails.
    pub ip_address: Option<String>,
    pub serial: String,
    /// Vendor, as reported by the inventory source until login
    /// overwrites it with the device's self-reported identity. Once a
    /// probe has succeeded this holds a probe ID usable as a hint on
    /// the next run.
    pub vendor: String,
    /// Device model, filled in from the live handle during login.
    pub model: String,
    /// Source-reported hardware type, for example `blade` or `discrete`.
    pub hardware_type: String,
    pub class: Option<DeviceClass>,
    pub location: String,
    /// Advisory action flags. The dispatcher resolves them in priority
    /// order: execute, then configure, then setup.
    pub setup: bool,
    pub configure: bool,
    pub execute: bool,
    /// Open-ended attributes carried through from the source.
    pub extra: HashMap<String, String>,
}

impl Asset {
    /// Whether this asset has at least one usable address.
    ///
    /// An empty candidate list and the single placeholder `0.0.0.0`
    /// both count as unusable.
    #[must_use]
    pub fn has_usable_ip(&self) -> bool {
        !(self.ip_addresses.is_empty()
            || self.ip_addresses.len() == 1 && self.ip_addresses[0] == "0.0.0.0")
    }

    /// Identifier for log records. Some assets lack a serial and some
    /// lack an address, so both are listed.
    #[must_use]
    pub fn identifier(&self) -> String {
        format!(
            "Serial: {}, IP(s): {}",
            self.serial,
            self.ip_addresses.join(",")
        )
    }

    /// Probe hint derived from the vendor field, when it names a known
    /// probe ID. Inventory sources usually report free-form vendor
    /// names, which yield no hint.
    #[must_use]
    pub fn probe_hint(&self) -> Option<Vendor> {
        self.vendor.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rustfmt::skip::attributes(case)]
    #[rstest]
    #[case(&[],                       false)]
    #[case(&["0.0.0.0"],              false)]
    #[case(&["10.0.0.1"],             true)]
    #[case(&["0.0.0.0", "10.0.0.1"],  true)]
    fn usable_ip_works(#[case] ips: &[&str], #[case] usable_should: bool) {
        let asset = Asset {
            ip_addresses: ips.iter().map(ToString::to_string).collect(),
            ..Asset::default()
        };
        assert_eq!(asset.has_usable_ip(), usable_should);
    }

    #[rstest]
    #[case("server", DeviceClass::Server)]
    #[case("chassis", DeviceClass::Chassis)]
    #[case("Chassis", DeviceClass::Chassis)]
    fn device_class_parses(#[case] input: &str, #[case] class_should: DeviceClass) {
        let class: DeviceClass = input.parse().unwrap();
        assert_eq!(class, class_should);
    }

    #[test]
    fn identifier_lists_all_addresses() {
        let asset = Asset {
            serial: "ABC123".into(),
            ip_addresses: vec!["10.0.0.1".into(), "10.0.0.2".into()],
            ..Asset::default()
        };
        assert_eq!(asset.identifier(), "Serial: ABC123, IP(s): 10.0.0.1,10.0.0.2");
    }

    #[rstest]
    #[case("idrac9", Some(Vendor::Idrac9))]
    #[case("Dell", None)]
    #[case("", None)]
    fn probe_hint_parses_probe_ids(#[case] vendor: &str, #[case] hint_should: Option<Vendor>) {
        let asset = Asset {
            vendor: vendor.into(),
            ..Asset::default()
        };
        assert_eq!(asset.probe_hint(), hint_should);
    }
}
