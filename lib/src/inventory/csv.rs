//! Flat file inventory.

use async_trait::async_trait;
use bon::Builder;
use camino::Utf8PathBuf;
use tokio::fs::File;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;

use crate::asset::Asset;
use crate::inventory::Source;

/// Reads assets from a comma separated file with one asset per line:
///
/// ```text
/// serial,ips[,vendor[,class[,location]]]
/// ```
///
/// `ips` holds one or more addresses separated by spaces. Blank lines
/// and lines starting with `#` are skipped.
#[derive(Builder)]
pub struct CsvSource {
    file: Utf8PathBuf,
    #[builder(default = 10)]
    batch_size: usize,
}

#[async_trait]
impl Source for CsvSource {
    async fn retrieve(&self, batches: mpsc::Sender<Vec<Asset>>) {
        let file = match File::open(&self.file).await {
            Ok(file) => file,
            Err(error) => {
                warn!(file = %self.file, %error, "failed to open inventory file");
                return;
            }
        };

        let mut lines = BufReader::new(file).lines();
        let mut batch = Vec::with_capacity(self.batch_size);
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(error) => {
                    warn!(file = %self.file, %error, "failed to read inventory file");
                    return;
                }
            };
            let Some(asset) = parse_line(&line) else {
                continue;
            };
            batch.push(asset);
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

fn parse_line(line: &str) -> Option<Asset> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut fields = line.split(',').map(str::trim);
    let serial = fields.next().unwrap_or_default();
    let ip_addresses: Vec<String> = fields
        .next()
        .unwrap_or_default()
        .split_whitespace()
        .map(ToString::to_string)
        .collect();
    if serial.is_empty() || ip_addresses.is_empty() {
        debug!(%line, "inventory line is missing a serial or address, skipped");
        return None;
    }

    let vendor = fields.next().unwrap_or_default();
    let class = fields.next().and_then(|class| {
        class
            .parse()
            .map_err(|error| debug!(%line, %error, "inventory line has an unknown class"))
            .ok()
    });
    let location = fields.next().unwrap_or_default();

    Some(Asset {
        ip_addresses,
        serial: serial.to_string(),
        vendor: vendor.to_string(),
        class,
        location: location.to_string(),
        ..Asset::default()
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rstest::rstest;

    use super::*;
    use crate::asset::DeviceClass;

    #[rustfmt::skip::attributes(case)]
    #[rstest]
    #[case("", None)]
    #[case("   ", None)]
    #[case("# comment", None)]
    #[case("SER123", None)]
    #[case("SER123,", None)]
    #[case(",10.0.0.1", None)]
    #[case("SER123,10.0.0.1", Some(("SER123", "", None)))]
    #[case("SER123, 10.0.0.1 , dell", Some(("SER123", "dell", None)))]
    #[case("SER123,10.0.0.1,dell,server", Some(("SER123", "dell", Some(DeviceClass::Server))))]
    #[case("SER123,10.0.0.1,hp,chassis", Some(("SER123", "hp", Some(DeviceClass::Chassis))))]
    #[case("SER123,10.0.0.1,hp,warp-drive", Some(("SER123", "hp", None)))]
    fn parses_lines(#[case] line: &str, #[case] want: Option<(&str, &str, Option<DeviceClass>)>) {
        let asset = parse_line(line);
        match want {
            None => assert!(asset.is_none()),
            Some((serial, vendor, class)) => {
                let asset = asset.unwrap();
                assert_eq!(asset.serial, serial);
                assert_eq!(asset.vendor, vendor);
                assert_eq!(asset.class, class);
            }
        }
    }

    #[test]
    fn parses_every_field_of_a_full_line() {
        let asset = parse_line("CH9,10.0.1.1 10.0.1.2,hp,chassis,lab1").unwrap();

        assert_eq!(asset.serial, "CH9");
        assert_eq!(
            asset.ip_addresses,
            vec!["10.0.1.1".to_string(), "10.0.1.2".to_string()]
        );
        assert_eq!(asset.vendor, "hp");
        assert_eq!(asset.class, Some(DeviceClass::Chassis));
        assert_eq!(asset.location, "lab1");
    }

    #[tokio::test]
    async fn batches_assets_by_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "# fleet inventory").unwrap();
        for index in 0..5 {
            writeln!(file, "SER{index},10.0.0.{index}").unwrap();
        }
        drop(file);

        let source = CsvSource::builder()
            .file(Utf8PathBuf::from_path_buf(path).unwrap())
            .batch_size(2)
            .build();
        let (tx, mut rx) = mpsc::channel(8);
        source.retrieve(tx).await;

        let mut batches = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            batches.push(batch);
        }
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[2].len(), 1);
        assert_eq!(batches[2][0].serial, "SER4");
        assert_eq!(batches[2][0].ip_addresses, vec!["10.0.0.4".to_string()]);
    }

    #[tokio::test]
    async fn missing_file_yields_nothing() {
        let source = CsvSource::builder()
            .file(Utf8PathBuf::from("/nonexistent/inventory.csv"))
            .build();
        let (tx, mut rx) = mpsc::channel(8);
        source.retrieve(tx).await;

        assert!(rx.try_recv().is_err());
    }
}
