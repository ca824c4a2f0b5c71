//! External node classifier inventory.

use std::collections::HashMap;

use async_trait::async_trait;
use bon::Builder;
use camino::Utf8PathBuf;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::asset::Asset;
use crate::asset::DeviceClass;
use crate::config::FilterParams;
use crate::inventory::Source;

/// Shells out to a site-local classifier binary and parses the JSON
/// asset list it prints. The binary is queried once, with `--serials`
/// or `--ips` when a filter narrows the run and `--all` otherwise.
#[derive(Builder)]
pub struct EncSource {
    bin: Utf8PathBuf,
    #[builder(default = 10)]
    batch_size: usize,
    #[builder(default)]
    filter: FilterParams,
    cancel: CancellationToken,
}

#[async_trait]
impl Source for EncSource {
    async fn retrieve(&self, batches: mpsc::Sender<Vec<Asset>>) {
        if self.cancel.is_cancelled() {
            return;
        }

        let mut command = Command::new(self.bin.as_std_path());
        let serials = self.filter.serial_list();
        let ips = self.filter.ip_list();
        if !serials.is_empty() {
            command.arg("--serials").arg(serials.join(","));
        } else if !ips.is_empty() {
            command.arg("--ips").arg(ips.join(","));
        } else {
            command.arg("--all");
        }

        let output = match command.output().await {
            Ok(output) => output,
            Err(error) => {
                warn!(bin = %self.bin, %error, "failed to run the classifier");
                return;
            }
        };
        if !output.status.success() {
            warn!(
                bin = %self.bin,
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "classifier exited with an error"
            );
            return;
        }

        let records: Vec<EncRecord> = match serde_json::from_slice(&output.stdout) {
            Ok(records) => records,
            Err(error) => {
                warn!(bin = %self.bin, %error, "classifier output is not valid json");
                return;
            }
        };
        debug!(assets = records.len(), "classifier returned assets");

        let mut batch = Vec::with_capacity(self.batch_size);
        for record in records {
            if self.cancel.is_cancelled() {
                return;
            }
            batch.push(record.into_asset());
            if batch.len() >= self.batch_size {
                if batches.send(std::mem::take(&mut batch)).await.is_err() {
                    return;
                }
                batch.reserve(self.batch_size);
            }
        }
        if !batch.is_empty() {
            let _ = batches.send(batch).await;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EncRecord {
    serial: String,
    ip_addresses: Vec<String>,
    vendor: String,
    #[serde(rename = "type")]
    class: Option<DeviceClass>,
    location: String,
    extra: HashMap<String, String>,
}

impl EncRecord {
    fn into_asset(self) -> Asset {
        Asset {
            ip_addresses: self.ip_addresses,
            serial: self.serial,
            vendor: self.vendor,
            class: self.class,
            location: self.location,
            extra: self.extra,
            ..Asset::default()
        }
    }
}
