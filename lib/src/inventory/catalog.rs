//! Asset catalog service inventory.

use std::collections::HashMap;

use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use bon::Builder;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;
use url::Url;

use crate::asset::Asset;
use crate::asset::DeviceClass;
use crate::config::FilterParams;
use crate::inventory::Source;
use crate::metrics::Metrics;

struct AssetKind {
    /// Collection path under `/v1/`.
    path: &'static str,
    /// Hardware kind recorded on the asset.
    kind: &'static str,
    class: DeviceClass,
}

const ASSET_KINDS: &[AssetKind] = &[
    AssetKind {
        path: "chassis",
        kind: "chassis",
        class: DeviceClass::Chassis,
    },
    AssetKind {
        path: "blades",
        kind: "blade",
        class: DeviceClass::Server,
    },
    AssetKind {
        path: "discretes",
        kind: "discrete",
        class: DeviceClass::Server,
    },
];

/// Pages assets out of the catalog service, one typed collection at a
/// time, enriching each batch with locations from the port scanner's
/// records.
#[derive(Builder)]
pub struct CatalogSource {
    url: Url,
    #[builder(default = 10)]
    batch_size: usize,
    #[builder(default)]
    filter: FilterParams,
    metrics: Metrics,
    cancel: CancellationToken,
}

#[async_trait]
impl Source for CatalogSource {
    async fn retrieve(&self, batches: mpsc::Sender<Vec<Asset>>) {
        let client = Client::new();
        let serials = self.filter.serial_list();

        for asset_kind in self.kinds() {
            if serials.is_empty() {
                self.retrieve_all(&client, asset_kind, &batches).await;
            } else {
                self.retrieve_by_serial(&client, asset_kind, &serials, &batches)
                    .await;
            }
        }
    }
}

impl CatalogSource {
    /// Collections to walk, narrowed by the class filters.
    fn kinds(&self) -> Vec<&'static AssetKind> {
        ASSET_KINDS
            .iter()
            .filter(|kind| {
                if self.filter.all || self.filter.chassis == self.filter.servers {
                    return true;
                }
                if self.filter.chassis {
                    kind.class == DeviceClass::Chassis
                } else {
                    kind.class == DeviceClass::Server
                }
            })
            .collect()
    }

    async fn retrieve_all(
        &self,
        client: &Client,
        asset_kind: &AssetKind,
        batches: &mpsc::Sender<Vec<Asset>>,
    ) {
        let first = format!(
            "v1/{}?page[offset]=0&page[limit]={}",
            asset_kind.path, self.batch_size
        );
        let mut next = match self.url.join(&first) {
            Ok(url) => url,
            Err(error) => {
                warn!(%error, "failed to build catalog url");
                return;
            }
        };

        loop {
            if self.cancel.is_cancelled() {
                debug!("cancellation received, catalog iteration stopped");
                return;
            }

            let page = match fetch_page(client, next).await {
                Ok(page) => page,
                Err(error) => {
                    warn!(kind = asset_kind.kind, %error, "catalog query failed");
                    return;
                }
            };
            self.metrics
                .count("inventory.assets_fetched", page.data.len() as u64);

            if !self.push_batch(client, page.data, asset_kind, batches).await {
                return;
            }

            // An empty next link means the collection is exhausted.
            if page.links.next.is_empty() {
                return;
            }
            next = match self.url.join(&page.links.next) {
                Ok(url) => url,
                Err(error) => {
                    warn!(%error, next = %page.links.next, "catalog next link is invalid");
                    return;
                }
            };
        }
    }

    async fn retrieve_by_serial(
        &self,
        client: &Client,
        asset_kind: &AssetKind,
        serials: &[String],
        batches: &mpsc::Sender<Vec<Asset>>,
    ) {
        let query = format!("v1/{}?filter[serial]={}", asset_kind.path, serials.join(","));
        let url = match self.url.join(&query) {
            Ok(url) => url,
            Err(error) => {
                warn!(%error, "failed to build catalog url");
                return;
            }
        };

        let page = match fetch_page(client, url).await {
            Ok(page) => page,
            Err(error) => {
                warn!(kind = asset_kind.kind, %error, "catalog query failed");
                return;
            }
        };
        if page.data.is_empty() {
            debug!(kind = asset_kind.kind, "no assets matched the serial filter");
            return;
        }
        self.metrics
            .count("inventory.assets_fetched", page.data.len() as u64);

        self.push_batch(client, page.data, asset_kind, batches).await;
    }

    /// Converts one page of records, enriches locations, and pushes
    /// the batch. Returns false when the consumer is gone.
    async fn push_batch(
        &self,
        client: &Client,
        records: Vec<CatalogRecord>,
        asset_kind: &AssetKind,
        batches: &mpsc::Sender<Vec<Asset>>,
    ) -> bool {
        let mut assets = Vec::new();
        for record in records {
            let asset = record.attributes.into_asset(asset_kind);
            if !asset.has_usable_ip() {
                warn!(serial = %asset.serial, "catalog asset has no usable address, skipped");
                self.metrics.count("inventory.assets_noip", 1);
                continue;
            }
            assets.push(asset);
        }
        if assets.is_empty() {
            return true;
        }

        if let Err(error) = self.set_locations(client, &mut assets).await {
            // The batch is dropped but iteration moves on to the next
            // page rather than retrying this one forever.
            warn!(%error, "location lookup failed, batch dropped");
            self.metrics
                .count("inventory.assets_nolocation", assets.len() as u64);
            return true;
        }

        self.metrics
            .count("inventory.assets_returned", assets.len() as u64);
        batches.send(assets).await.is_ok()
    }

    /// Fills in locations from the port scanner's records.
    async fn set_locations(&self, client: &Client, assets: &mut [Asset]) -> Result<()> {
        let ips: Vec<&str> = assets
            .iter()
            .flat_map(|asset| asset.ip_addresses.iter().map(String::as_str))
            .collect();
        let url = self
            .url
            .join(&format!("v1/scanned_ports?filter[ip]={}", ips.join(",")))
            .context("failed to build scanned ports url")?;
        let page = fetch_page(client, url).await?;

        let mut sites: HashMap<String, String> = HashMap::new();
        for record in page.data {
            sites.insert(record.attributes.ip, record.attributes.site);
        }

        for asset in assets {
            for ip in &asset.ip_addresses {
                if let Some(site) = sites.get(ip) {
                    asset.location = site.clone();
                    break;
                }
            }
        }
        Ok(())
    }
}

async fn fetch_page(client: &Client, url: Url) -> Result<CatalogPage> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("request for {url} failed"))?
        .error_for_status()
        .with_context(|| format!("request for {url} rejected"))?;
    response
        .json()
        .await
        .with_context(|| format!("response from {url} is not valid json"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogPage {
    data: Vec<CatalogRecord>,
    links: CatalogLinks,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogLinks {
    next: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogRecord {
    attributes: CatalogAttributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogAttributes {
    serial: String,
    bmc_address: String,
    vendor: String,
    // Port scanner records.
    ip: String,
    site: String,
}

impl CatalogAttributes {
    fn into_asset(self, asset_kind: &AssetKind) -> Asset {
        let ip_addresses = if self.bmc_address.is_empty() {
            Vec::new()
        } else {
            vec![self.bmc_address]
        };
        Asset {
            ip_addresses,
            serial: self.serial,
            vendor: self.vendor,
            hardware_type: asset_kind.kind.to_string(),
            class: Some(asset_kind.class),
            ..Asset::default()
        }
    }
}
