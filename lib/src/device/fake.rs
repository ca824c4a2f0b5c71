//! Scripted devices and probe drivers backing the engine tests.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;
use strum::IntoEnumIterator;

use crate::asset::DeviceClass;
use crate::device::ChassisDevice;
use crate::device::Credential;
use crate::device::Device;
use crate::device::ExecOutput;
use crate::device::Handle;
use crate::device::ProbeDriver;
use crate::device::Vendor;
use crate::error::Error;
use crate::resource::Resource;
use crate::resource::Section;
use crate::resource::SetupChassis;

/// Observation log shared by every session a scripted driver hands
/// out.
#[derive(Debug, Default)]
pub struct FakeState {
    pub applied: Mutex<Vec<Resource>>,
    pub executed: Mutex<Vec<String>>,
    /// Group names seen by directory group applies, in order.
    pub groups_seen: Mutex<Vec<String>>,
    pub setup_runs: AtomicU32,
    pub credential_checks: AtomicU32,
    pub closed: AtomicU32,
}

impl FakeState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn applied(&self) -> Vec<Resource> {
        self.applied.lock().unwrap().clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn groups_seen(&self) -> Vec<String> {
        self.groups_seen.lock().unwrap().clone()
    }

    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn setup_runs(&self) -> u32 {
        self.setup_runs.load(Ordering::SeqCst)
    }
}

/// Scripted device. Cloning shares the observation state.
#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub vendor: Vendor,
    pub model: String,
    pub serial: String,
    pub class: DeviceClass,
    pub active: bool,
    pub reject_credentials: bool,
    pub capabilities: Vec<Resource>,
    pub fail_resources: Vec<Resource>,
    pub state: Arc<FakeState>,
}

impl FakeDevice {
    pub fn new(vendor: Vendor, state: Arc<FakeState>) -> Self {
        Self {
            vendor,
            model: "fake-9000".to_string(),
            serial: "FAKE123".to_string(),
            class: DeviceClass::Server,
            active: true,
            reject_credentials: false,
            capabilities: Resource::iter().collect(),
            fail_resources: Vec::new(),
            state,
        }
    }

    pub fn handle(self) -> Handle {
        match self.class {
            DeviceClass::Server => Handle::Server(Box::new(self)),
            DeviceClass::Chassis => Handle::Chassis(Box::new(self)),
        }
    }
}

#[async_trait]
impl Device for FakeDevice {
    fn vendor(&self) -> Vendor {
        self.vendor
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    async fn serial(&mut self) -> Result<String> {
        Ok(self.serial.clone())
    }

    async fn check_credentials(&mut self) -> Result<()> {
        self.state.credential_checks.fetch_add(1, Ordering::SeqCst);
        if self.reject_credentials {
            bail!("authentication rejected");
        }
        Ok(())
    }

    fn resources(&self) -> Vec<Resource> {
        self.capabilities.clone()
    }

    async fn apply(&mut self, resource: Resource, section: Section<'_>) -> Result<()> {
        self.state.applied.lock().unwrap().push(resource);
        if let Section::LdapGroups { groups, .. } = section {
            let mut seen = self.state.groups_seen.lock().unwrap();
            seen.extend(groups.iter().map(|group| group.group.clone()));
        }
        if self.fail_resources.contains(&resource) {
            bail!("{resource} configuration returned errors");
        }
        Ok(())
    }

    async fn execute(&mut self, command: &str) -> Result<ExecOutput> {
        self.state.executed.lock().unwrap().push(command.to_string());
        Ok(ExecOutput {
            exit_status: 0,
            stdout: b"ok".to_vec(),
            stderr: Vec::new(),
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ChassisDevice for FakeDevice {
    async fn is_active(&mut self) -> Result<bool> {
        Ok(self.active)
    }

    async fn setup(&mut self, _section: &SetupChassis) -> Result<()> {
        self.state.setup_runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted probe driver. Every probe it serves lands on the shared
/// log so tests can assert try order and network silence.
pub struct FakeDriver {
    pub vendor: Vendor,
    /// Hosts that answer this vendor's probe. Empty answers none.
    pub hosts: Vec<String>,
    /// Username and password pairs the session accepts. Empty accepts
    /// everything.
    pub accepts: Vec<(String, String)>,
    /// Hosts that answer as standby enclosure members.
    pub standby_hosts: Vec<String>,
    /// Hosts that answer but fit neither capability set.
    pub unknown_hosts: Vec<String>,
    pub device: FakeDevice,
    pub log: Arc<Mutex<Vec<(Vendor, String)>>>,
}

impl FakeDriver {
    pub fn new(
        vendor: Vendor,
        state: Arc<FakeState>,
        log: Arc<Mutex<Vec<(Vendor, String)>>>,
    ) -> Self {
        Self {
            vendor,
            hosts: Vec::new(),
            accepts: Vec::new(),
            standby_hosts: Vec::new(),
            unknown_hosts: Vec::new(),
            device: FakeDevice::new(vendor, state),
            log,
        }
    }

    pub fn answering(mut self, host: &str) -> Self {
        self.hosts.push(host.to_string());
        self
    }

    pub fn accepting(mut self, username: &str, password: &str) -> Self {
        self.accepts.push((username.to_string(), password.to_string()));
        self
    }

    pub fn standby_at(mut self, host: &str) -> Self {
        self.standby_hosts.push(host.to_string());
        self
    }

    pub fn unknown_at(mut self, host: &str) -> Self {
        self.unknown_hosts.push(host.to_string());
        self
    }

    pub fn chassis(mut self) -> Self {
        self.device.class = DeviceClass::Chassis;
        self
    }

    pub fn probes(log: &Arc<Mutex<Vec<(Vendor, String)>>>) -> Vec<Vendor> {
        log.lock().unwrap().iter().map(|(vendor, _)| *vendor).collect()
    }
}

#[async_trait]
impl ProbeDriver for FakeDriver {
    fn vendor(&self) -> Vendor {
        self.vendor
    }

    async fn probe(&self, host: &str, credential: &Credential) -> Result<Handle> {
        self.log.lock().unwrap().push((self.vendor, host.to_string()));

        if self.unknown_hosts.iter().any(|h| h == host) {
            return Err(Error::UnknownDeviceType {
                host: host.to_string(),
            }
            .into());
        }
        if !self.hosts.iter().any(|h| h == host) {
            bail!("no {} endpoint at {host}", self.vendor);
        }

        let mut device = self.device.clone();
        device.vendor = self.vendor;
        if !self.accepts.is_empty() {
            let pair = (
                credential.username.clone(),
                credential.password.expose_secret().clone(),
            );
            device.reject_credentials = !self.accepts.contains(&pair);
        }
        device.active = self.device.active && !self.standby_hosts.iter().any(|h| h == host);
        Ok(device.handle())
    }
}
