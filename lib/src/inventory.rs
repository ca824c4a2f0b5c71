//! Asset inventory sources.

mod catalog;
mod csv;
mod enc;
mod ip_list;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use enum_dispatch::enum_dispatch;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use self::catalog::CatalogSource;
pub use self::csv::CsvSource;
pub use self::enc::EncSource;
pub use self::ip_list::IpListSource;

use crate::asset::Asset;
use crate::config::Params;
use crate::metrics::Metrics;

/// Inventory source contract.
///
/// `retrieve` pushes asset batches to `batches` until iteration
/// finishes or the receiving side goes away, then returns. Producers
/// log their own failures; a source that cannot continue stops
/// producing rather than taking the process down.
#[async_trait]
#[enum_dispatch]
pub trait Source {
    async fn retrieve(&self, batches: mpsc::Sender<Vec<Asset>>);
}

/// All inventory source adapters.
#[enum_dispatch(Source)]
pub enum SourceImpl {
    Catalog(CatalogSource),
    Csv(CsvSource),
    Enc(EncSource),
    IpList(IpListSource),
}

impl SourceImpl {
    /// Builds the adapter selected by `inventory.source`.
    ///
    /// # Errors
    ///
    /// If the source kind is unknown or its settings are missing.
    pub fn from_config(
        params: &Params,
        metrics: Metrics,
        cancel: CancellationToken,
    ) -> Result<Self> {
        match params.inventory.source.as_str() {
            "catalog" => {
                let config = params
                    .inventory
                    .catalog
                    .as_ref()
                    .context("inventory source is catalog but no catalog settings are present")?;
                Ok(CatalogSource::builder()
                    .url(config.url.clone())
                    .batch_size(config.batch_size)
                    .filter(params.filter.clone())
                    .metrics(metrics)
                    .cancel(cancel)
                    .build()
                    .into())
            }
            "csv" => {
                let config = params
                    .inventory
                    .csv
                    .as_ref()
                    .context("inventory source is csv but no csv settings are present")?;
                Ok(CsvSource::builder().file(config.file.clone()).build().into())
            }
            "enc" => {
                let config = params
                    .inventory
                    .enc
                    .as_ref()
                    .context("inventory source is enc but no enc settings are present")?;
                Ok(EncSource::builder()
                    .bin(config.bin.clone())
                    .batch_size(config.batch_size)
                    .filter(params.filter.clone())
                    .cancel(cancel)
                    .build()
                    .into())
            }
            "ip_list" => {
                let ips = params.filter.ip_list();
                if ips.is_empty() {
                    bail!("inventory source is ip_list but no addresses were given");
                }
                Ok(IpListSource::new(ips).into())
            }
            other => bail!("unknown inventory source {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;

    #[test]
    fn unknown_source_kind_is_refused() {
        let mut params = Params::default();
        params.inventory.source = "ouija".to_string();

        let result = SourceImpl::from_config(
            &params,
            Metrics::disabled(),
            CancellationToken::new(),
        );

        assert!(result.is_err());
    }

    #[test]
    fn sources_need_their_settings() {
        let mut params = Params::default();
        params.inventory.source = "catalog".to_string();

        let result = SourceImpl::from_config(
            &params,
            Metrics::disabled(),
            CancellationToken::new(),
        );

        assert!(result.is_err());
    }

    #[test]
    fn ip_list_needs_addresses() {
        let mut params = Params::default();
        params.inventory.source = "ip_list".to_string();

        let result = SourceImpl::from_config(
            &params,
            Metrics::disabled(),
            CancellationToken::new(),
        );
        assert!(result.is_err());

        params.filter.ips = Some("10.0.0.1".to_string());
        let result = SourceImpl::from_config(
            &params,
            Metrics::disabled(),
            CancellationToken::new(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn catalog_settings_build_a_source() {
        let mut params = Params::default();
        params.inventory.source = "catalog".to_string();
        params.inventory.catalog = Some(CatalogConfig {
            url: "http://catalog.example.com".parse().unwrap(),
            batch_size: 20,
        });

        let source = SourceImpl::from_config(
            &params,
            Metrics::disabled(),
            CancellationToken::new(),
        )
        .unwrap();

        assert!(matches!(source, SourceImpl::Catalog(_)));
    }
}
