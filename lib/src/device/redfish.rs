//! Generic driver for vendor families that expose the DMTF Redfish
//! API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use redact::Secret;
use reqwest::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use strum::IntoEnumIterator;
use tracing::debug;

use crate::device::Credential;
use crate::device::Device;
use crate::device::ExecOutput;
use crate::device::Handle;
use crate::device::ProbeDriver;
use crate::device::Vendor;
use crate::resource::Network;
use crate::resource::Ntp;
use crate::resource::Resource;
use crate::resource::Section;
use crate::resource::UserAccount;

/// Probe drivers for every family served over Redfish, in default try
/// order. Legacy enclosure families are not served here and need
/// their own drivers registered alongside these.
#[must_use]
pub fn drivers() -> Vec<Arc<dyn ProbeDriver>> {
    Vendor::iter()
        .filter(|vendor| !markers(*vendor).is_empty())
        .map(|vendor| Arc::new(RedfishDriver::new(vendor)) as Arc<dyn ProbeDriver>)
        .collect()
}

/// Manufacturer markers the service root reports for each family.
fn markers(vendor: Vendor) -> &'static [&'static str] {
    match vendor {
        Vendor::HpIlo => &["iLO", "HPE", "HP"],
        Vendor::Idrac8 => &["iDRAC 8", "iDRAC8"],
        Vendor::Idrac9 => &["iDRAC 9", "iDRAC9", "Dell"],
        Vendor::Supermicrox11 => &["Supermicro"],
        Vendor::Quanta => &["Quanta", "QCT"],
        _ => &[],
    }
}

fn base_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{host}")
    }
}

fn http_client() -> Result<Client> {
    // Controllers ship self-signed certificates.
    Client::builder()
        .danger_accept_invalid_certs(true)
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .build()
        .context("failed to build http client")
}

/// Identifies one vendor family by its Redfish service root.
pub struct RedfishDriver {
    vendor: Vendor,
}

impl RedfishDriver {
    #[must_use]
    pub fn new(vendor: Vendor) -> Self {
        Self { vendor }
    }
}

#[async_trait]
impl ProbeDriver for RedfishDriver {
    fn vendor(&self) -> Vendor {
        self.vendor
    }

    async fn probe(&self, host: &str, credential: &Credential) -> Result<Handle> {
        let client = http_client()?;
        let base = base_url(host);

        // Redfish service roots answer unauthenticated requests.
        let response = client
            .get(format!("{base}/redfish/v1/"))
            .send()
            .await
            .with_context(|| format!("no redfish service at {host}"))?;
        if !response.status().is_success() {
            bail!("service root at {host} answered {}", response.status());
        }
        let root: ServiceRoot = response
            .json()
            .await
            .context("service root is not valid json")?;

        let identity = format!("{} {}", root.vendor, root.product);
        if !markers(self.vendor)
            .iter()
            .any(|marker| identity.contains(marker))
        {
            bail!("{host} identifies as {identity:?}, not {}", self.vendor);
        }
        debug!(%host, vendor = %self.vendor, product = %root.product, "redfish service identified");

        Ok(Handle::Server(Box::new(RedfishDevice {
            client,
            base,
            vendor: self.vendor,
            model: root.product,
            username: credential.username.clone(),
            password: credential.password.clone(),
        })))
    }
}

/// Authenticated Redfish session. Requests carry basic auth, so there
/// is no server-side session to tear down on close.
struct RedfishDevice {
    client: Client,
    base: String,
    vendor: Vendor,
    model: String,
    username: String,
    password: Secret<String>,
}

impl RedfishDevice {
    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base))
            .basic_auth(&self.username, Some(self.password.expose_secret()))
    }

    fn patch(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .patch(format!("{}{path}", self.base))
            .basic_auth(&self.username, Some(self.password.expose_secret()))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base))
            .basic_auth(&self.username, Some(self.password.expose_secret()))
    }

    /// Resource path of the first member of a collection.
    async fn first_member(&self, path: &str) -> Result<String> {
        let response = self
            .get(path)
            .send()
            .await
            .with_context(|| format!("request for {path} failed"))?
            .error_for_status()
            .with_context(|| format!("request for {path} rejected"))?;
        let collection: Collection = response
            .json()
            .await
            .with_context(|| format!("collection {path} is not valid json"))?;
        let member = collection
            .members
            .into_iter()
            .next()
            .with_context(|| format!("collection {path} is empty"))?;
        Ok(member.odata_id)
    }

    async fn apply_users(&self, accounts: &[UserAccount]) -> Result<()> {
        let response = self
            .get("/redfish/v1/AccountService/Accounts")
            .send()
            .await
            .context("account collection request failed")?
            .error_for_status()
            .context("account collection request rejected")?;
        let collection: Collection = response
            .json()
            .await
            .context("account collection is not valid json")?;

        let mut existing = HashMap::new();
        for member in collection.members {
            let response = self
                .get(&member.odata_id)
                .send()
                .await
                .context("account read failed")?
                .error_for_status()
                .context("account read rejected")?;
            let account: AccountInfo =
                response.json().await.context("account is not valid json")?;
            existing.insert(account.user_name, member.odata_id);
        }

        for account in accounts {
            let body = json!({
                "UserName": account.name,
                "Password": account.password,
                "RoleId": role_id(&account.role),
                "Enabled": account.enable,
            });
            match existing.get(&account.name) {
                Some(path) => {
                    self.patch(path)
                        .json(&body)
                        .send()
                        .await
                        .with_context(|| format!("update of account {} failed", account.name))?
                        .error_for_status()
                        .with_context(|| format!("update of account {} rejected", account.name))?;
                }
                None => {
                    self.post("/redfish/v1/AccountService/Accounts")
                        .json(&body)
                        .send()
                        .await
                        .with_context(|| format!("creation of account {} failed", account.name))?
                        .error_for_status()
                        .with_context(|| {
                            format!("creation of account {} rejected", account.name)
                        })?;
                }
            }
        }
        Ok(())
    }

    async fn apply_ntp(&self, ntp: &Ntp) -> Result<()> {
        let manager = self.first_member("/redfish/v1/Managers").await?;
        let servers: Vec<&str> = [&ntp.server1, &ntp.server2, &ntp.server3]
            .into_iter()
            .filter(|server| !server.is_empty())
            .map(String::as_str)
            .collect();
        let body = json!({
            "NTP": {
                "ProtocolEnabled": ntp.enable,
                "NTPServers": servers,
            }
        });
        self.patch(&format!("{manager}/NetworkProtocol"))
            .json(&body)
            .send()
            .await
            .context("ntp update request failed")?
            .error_for_status()
            .context("ntp update rejected")?;
        Ok(())
    }

    async fn apply_network(&self, network: &Network) -> Result<()> {
        let manager = self.first_member("/redfish/v1/Managers").await?;

        let mut ssh = serde_json::Map::new();
        ssh.insert("ProtocolEnabled".to_string(), json!(network.sshd_enable));
        if let Some(port) = network.sshd_port {
            ssh.insert("Port".to_string(), json!(port));
        }
        let mut ipmi = serde_json::Map::new();
        ipmi.insert("ProtocolEnabled".to_string(), json!(network.ipmi_enable));
        if let Some(port) = network.ipmi_port {
            ipmi.insert("Port".to_string(), json!(port));
        }
        let mut protocol = serde_json::Map::new();
        if !network.hostname.is_empty() {
            protocol.insert("HostName".to_string(), json!(network.hostname));
        }
        protocol.insert("SSH".to_string(), ssh.into());
        protocol.insert("IPMI".to_string(), ipmi.into());

        self.patch(&format!("{manager}/NetworkProtocol"))
            .json(&serde_json::Value::Object(protocol))
            .send()
            .await
            .context("network update request failed")?
            .error_for_status()
            .context("network update rejected")?;
        Ok(())
    }
}

fn role_id(role: &str) -> &str {
    match role {
        "admin" => "Administrator",
        "operator" => "Operator",
        "user" => "ReadOnly",
        other => other,
    }
}

#[async_trait]
impl Device for RedfishDevice {
    fn vendor(&self) -> Vendor {
        self.vendor
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    async fn serial(&mut self) -> Result<String> {
        let system = self.first_member("/redfish/v1/Systems").await?;
        let response = self
            .get(&system)
            .send()
            .await
            .context("system read failed")?
            .error_for_status()
            .context("system read rejected")?;
        let info: SystemInfo = response.json().await.context("system is not valid json")?;
        if info.serial_number.is_empty() {
            bail!("system reports no serial number");
        }
        Ok(info.serial_number)
    }

    async fn check_credentials(&mut self) -> Result<()> {
        let response = self
            .get("/redfish/v1/Systems")
            .send()
            .await
            .context("credential check request failed")?;
        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            bail!("credentials rejected");
        }
        response
            .error_for_status()
            .context("credential check failed")?;
        Ok(())
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::User, Resource::Ntp, Resource::Network]
    }

    async fn apply(&mut self, _resource: Resource, section: Section<'_>) -> Result<()> {
        match section {
            Section::User(accounts) => self.apply_users(accounts).await,
            Section::Ntp(ntp) => self.apply_ntp(ntp).await,
            Section::Network(network) => self.apply_network(network).await,
            other => bail!("{} is not supported over redfish", other.resource()),
        }
    }

    async fn execute(&mut self, command: &str) -> Result<ExecOutput> {
        let (collection, action, reset_type) = match command {
            "power-on" => ("/redfish/v1/Systems", "ComputerSystem.Reset", "On"),
            "power-off" => ("/redfish/v1/Systems", "ComputerSystem.Reset", "ForceOff"),
            "power-cycle" => ("/redfish/v1/Systems", "ComputerSystem.Reset", "ForceRestart"),
            "bmc-reset" => ("/redfish/v1/Managers", "Manager.Reset", "GracefulRestart"),
            other => bail!("unrecognized command {other:?}"),
        };

        let member = self.first_member(collection).await?;
        let response = self
            .post(&format!("{member}/Actions/{action}"))
            .json(&json!({ "ResetType": reset_type }))
            .send()
            .await
            .with_context(|| format!("{command} request failed"))?;
        let status = response.status();
        let stdout = response.bytes().await.unwrap_or_default().to_vec();
        if !status.is_success() {
            bail!("{command} rejected with {status}");
        }

        Ok(ExecOutput {
            exit_status: 0,
            stdout,
            stderr: Vec::new(),
        })
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServiceRoot {
    #[serde(rename = "Vendor")]
    vendor: String,
    #[serde(rename = "Product")]
    product: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Collection {
    #[serde(rename = "Members")]
    members: Vec<MemberRef>,
}

#[derive(Debug, Deserialize)]
struct MemberRef {
    #[serde(rename = "@odata.id")]
    odata_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SystemInfo {
    #[serde(rename = "SerialNumber")]
    serial_number: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AccountInfo {
    #[serde(rename = "UserName")]
    user_name: String,
}
