//! Ad hoc address list inventory.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::asset::Asset;
use crate::inventory::Source;

/// Turns a list of addresses given on the command line into assets.
/// Everything else about each asset is learned from the device after
/// login.
pub struct IpListSource {
    ips: Vec<String>,
}

impl IpListSource {
    #[must_use]
    pub fn new(ips: Vec<String>) -> Self {
        Self { ips }
    }
}

#[async_trait]
impl Source for IpListSource {
    async fn retrieve(&self, batches: mpsc::Sender<Vec<Asset>>) {
        for ip in &self.ips {
            let asset = Asset {
                ip_addresses: vec![ip.clone()],
                ..Asset::default()
            };
            if batches.send(vec![asset]).await.is_err() {
                return;
            }
        }
    }
}
