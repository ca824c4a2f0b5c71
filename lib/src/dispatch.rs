//! Fans work messages out across a bounded pool of per-asset workers.

use std::sync::Arc;
use std::time::Instant;

use bon::Builder;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::asset::Asset;
use crate::configure::Applier;
use crate::configure::ApplyOutcome;
use crate::device::login::AttemptRecord;
use crate::device::Credential;
use crate::device::ExecOutput;
use crate::device::Handle;
use crate::device::Login;
use crate::device::Prober;
use crate::error::Error;
use crate::metrics::Metrics;
use crate::resource::Render;
use crate::resource::ResourceConfig;
use crate::resource::SetupChassis;

/// One asset's worth of work, paired with the raw configuration
/// documents it may need.
#[derive(Clone)]
pub struct Work {
    pub asset: Asset,
    /// Raw templated resource configuration.
    pub config: Option<Vec<u8>>,
    /// Raw templated one-time chassis setup document, consulted when
    /// the main document declares no setup section.
    pub setup: Option<Vec<u8>>,
    /// Command line for execute work.
    pub command: Option<String>,
}

/// Serves work messages until the channel closes or cancellation
/// fires. Each message is handled by its own worker task, with
/// admission held whenever as many workers are in flight as
/// configured.
///
/// Cancellation discards queued work but lets in-flight workers run
/// to completion before [`Dispatcher::run`] returns.
#[derive(Builder)]
pub struct Dispatcher {
    /// Upper bound on concurrently served assets.
    workers: usize,
    /// Credentials tried in order by every login.
    credentials: Vec<Credential>,
    prober: Arc<Prober>,
    renderer: Arc<dyn Render>,
    metrics: Metrics,
    cancel: CancellationToken,
    /// Locations this process manages. Empty manages everything.
    #[builder(default)]
    locations: Vec<String>,
    /// Act on assets regardless of their location.
    #[builder(default)]
    ignore_location: bool,
    /// Log what would happen without touching any device.
    #[builder(default)]
    dry_run: bool,
    /// Resource names applied instead of each device's full set.
    #[builder(default)]
    resources: Vec<String>,
}

impl Dispatcher {
    pub async fn run(self: Arc<Self>, mut work: mpsc::Receiver<Work>) {
        let limit = self.workers.max(1);
        let mut workers: JoinSet<()> = JoinSet::new();

        'serve: loop {
            // Admission holds until a worker slot frees up.
            while workers.len() >= limit {
                tokio::select! {
                    () = self.cancel.cancelled() => break 'serve,
                    _ = workers.join_next() => {}
                }
            }

            tokio::select! {
                () = self.cancel.cancelled() => break 'serve,
                message = work.recv() => match message {
                    Some(message) => {
                        let dispatcher = Arc::clone(&self);
                        workers.spawn(async move { dispatcher.handle(message).await });
                    }
                    None => break 'serve,
                },
            }
        }

        while workers.join_next().await.is_some() {}
        debug!("dispatch workers drained");
    }

    #[instrument(skip_all, fields(serial = %work.asset.serial))]
    async fn handle(&self, work: Work) {
        // A message may have been admitted just before drain started.
        if self.cancel.is_cancelled() {
            debug!("cancellation received, asset skipped");
            return;
        }
        self.metrics.count("dispatch.asset_recvd", 1);

        let asset = &work.asset;
        if !asset.has_usable_ip() {
            warn!(asset = %asset.identifier(), "asset has no usable address, skipped");
            self.metrics.count("dispatch.asset_recvd_noip", 1);
            return;
        }
        if !self.location_managed(asset) {
            warn!(
                asset = %asset.identifier(),
                location = %asset.location,
                "asset location is not managed here, skipped"
            );
            self.metrics.count("dispatch.asset_recvd_location_unmanaged", 1);
            return;
        }

        if asset.execute {
            self.execute(work).await;
        } else if asset.configure {
            self.configure(work).await;
        } else {
            warn!(asset = %asset.identifier(), "asset carries no recognized action, skipped");
        }
    }

    /// Whether the asset's location is covered by the allow list. An
    /// empty list and assets without a location are always covered.
    fn location_managed(&self, asset: &Asset) -> bool {
        if self.ignore_location || self.locations.is_empty() || asset.location.is_empty() {
            return true;
        }
        self.locations.contains(&asset.location)
    }

    async fn configure(&self, work: Work) {
        let Work {
            mut asset,
            config,
            setup,
            ..
        } = work;
        let start = Instant::now();

        let result = self
            .configure_asset(&mut asset, config.as_deref(), setup.as_deref())
            .await;
        let elapsed = start.elapsed();
        match result {
            Ok(outcome) if outcome.is_success() => {
                info!(
                    serial = %asset.serial,
                    ips = ?asset.ip_addresses,
                    active_ip = ?asset.ip_address,
                    vendor = %asset.vendor,
                    location = %asset.location,
                    hardware_type = %asset.hardware_type,
                    applied = ?outcome.succeeded,
                    ?elapsed,
                    "configuration complete"
                );
                self.metrics.count("dispatch.configure_success", 1);
            }
            Ok(outcome) => {
                warn!(
                    serial = %asset.serial,
                    ips = ?asset.ip_addresses,
                    active_ip = ?asset.ip_address,
                    vendor = %asset.vendor,
                    location = %asset.location,
                    hardware_type = %asset.hardware_type,
                    applied = ?outcome.succeeded,
                    failed = ?outcome.failed,
                    ?elapsed,
                    "configuration completed with failures"
                );
                self.metrics.count("dispatch.configure_fail", 1);
            }
            Err(error) => {
                warn!(
                    serial = %asset.serial,
                    ips = ?asset.ip_addresses,
                    active_ip = ?asset.ip_address,
                    vendor = %asset.vendor,
                    location = %asset.location,
                    hardware_type = %asset.hardware_type,
                    ?elapsed,
                    %error,
                    "configuration failed"
                );
                self.metrics.count("dispatch.configure_fail", 1);
            }
        }
        self.metrics.runtime("dispatch.configure_runtime", start);
    }

    /// Login, identity backfill, render, optional chassis setup, then
    /// the resource apply walk. The session is released on every exit
    /// path.
    async fn configure_asset(
        &self,
        asset: &mut Asset,
        config: Option<&[u8]>,
        setup: Option<&[u8]>,
    ) -> Result<ApplyOutcome, Error> {
        if self.dry_run {
            info!(asset = %asset.identifier(), "dry run, configuration skipped");
            return Ok(ApplyOutcome::default());
        }

        let (mut handle, record) = self.login(asset).await?;
        self.backfill(asset, &mut handle, &record).await;

        let result = self.apply_config(&mut handle, asset, config, setup).await;
        if let Err(error) = handle.close().await {
            debug!(serial = %asset.serial, %error, "failed to close session");
        }
        result
    }

    async fn execute(&self, work: Work) {
        let Work {
            mut asset, command, ..
        } = work;
        let Some(command) = command else {
            warn!(asset = %asset.identifier(), "execute work carries no command, skipped");
            self.metrics.count("dispatch.execute_fail", 1);
            return;
        };
        let start = Instant::now();

        let result = self.execute_command(&mut asset, &command).await;
        let elapsed = start.elapsed();
        match result {
            Ok(output) => {
                info!(
                    serial = %asset.serial,
                    ips = ?asset.ip_addresses,
                    active_ip = ?asset.ip_address,
                    vendor = %asset.vendor,
                    location = %asset.location,
                    hardware_type = %asset.hardware_type,
                    ?output,
                    ?elapsed,
                    "command complete"
                );
                self.metrics.count("dispatch.execute_success", 1);
            }
            Err(error) => {
                warn!(
                    serial = %asset.serial,
                    ips = ?asset.ip_addresses,
                    active_ip = ?asset.ip_address,
                    vendor = %asset.vendor,
                    location = %asset.location,
                    hardware_type = %asset.hardware_type,
                    ?elapsed,
                    %error,
                    "command failed"
                );
                self.metrics.count("dispatch.execute_fail", 1);
            }
        }
    }

    async fn execute_command(&self, asset: &mut Asset, command: &str) -> Result<ExecOutput, Error> {
        if self.dry_run {
            info!(asset = %asset.identifier(), %command, "dry run, command not sent");
            return Ok(ExecOutput {
                exit_status: 0,
                stdout: Vec::new(),
                stderr: Vec::new(),
            });
        }

        let (mut handle, record) = self.login(asset).await?;
        self.backfill(asset, &mut handle, &record).await;

        let result = handle.device().execute(command).await;
        if let Err(error) = handle.close().await {
            debug!(serial = %asset.serial, %error, "failed to close session");
        }
        result.map_err(Error::from)
    }

    async fn login(&self, asset: &Asset) -> Result<(Handle, AttemptRecord), Error> {
        let login = Login::builder()
            .prober(Arc::clone(&self.prober))
            .ip_addresses(asset.ip_addresses.clone())
            .credentials(self.credentials.clone())
            .maybe_hint(asset.probe_hint())
            .check_credential(true)
            .retries(1)
            .build();
        match login.login().await {
            Ok((handle, record)) => {
                if !record.failed_credentials.is_empty() {
                    debug!(
                        asset = %asset.identifier(),
                        attempts = record.attempts,
                        rejected = record.failed_credentials.len(),
                        "login succeeded after rejected credentials"
                    );
                }
                Ok((handle, record))
            }
            Err(error) => {
                if let Some(record) = error.attempt_record() {
                    debug!(
                        asset = %asset.identifier(),
                        attempts = record.attempts,
                        rejected = record.failed_credentials.len(),
                        "login attempts exhausted"
                    );
                }
                Err(error)
            }
        }
    }

    /// Refreshes the asset with what the live session reports. The
    /// device's self-reported identity outranks the inventory record;
    /// a failed serial read keeps the inventory serial.
    async fn backfill(&self, asset: &mut Asset, handle: &mut Handle, record: &AttemptRecord) {
        asset.ip_address = record.active_ip.clone();
        asset.class = Some(handle.class());
        asset.vendor = handle.vendor().to_string();
        asset.model = handle.device().model();
        match handle.device().serial().await {
            Ok(serial) if !serial.is_empty() => asset.serial = serial,
            Ok(_) => {}
            Err(error) => {
                debug!(serial = %asset.serial, %error, "device serial query failed");
            }
        }
    }

    async fn apply_config(
        &self,
        handle: &mut Handle,
        asset: &Asset,
        config: Option<&[u8]>,
        setup: Option<&[u8]>,
    ) -> Result<ApplyOutcome, Error> {
        let raw = config.ok_or(Error::NoConfiguration)?;
        let rendered = self
            .renderer
            .render(raw, asset)?
            .ok_or(Error::NoConfiguration)?;

        self.setup_chassis(handle, asset, &rendered, setup).await;

        let applier = Applier::builder()
            .restrict(self.resources.clone())
            .cancel(self.cancel.clone())
            .build();
        Ok(applier.apply(handle.device(), &rendered, asset).await)
    }

    /// One-time enclosure setup, run before the recurring resources.
    /// A setup failure costs only the setup stage.
    async fn setup_chassis(
        &self,
        handle: &mut Handle,
        asset: &Asset,
        rendered: &ResourceConfig,
        setup: Option<&[u8]>,
    ) {
        let Handle::Chassis(device) = handle else {
            return;
        };

        let section = match &rendered.setup_chassis {
            Some(section) => Some(section.clone()),
            None => self.rendered_setup(asset, setup),
        };
        let Some(section) = section else {
            return;
        };

        match device.setup(&section).await {
            Ok(()) => info!(serial = %asset.serial, "chassis setup applied"),
            Err(error) => {
                warn!(serial = %asset.serial, %error, "chassis setup returned errors");
            }
        }
    }

    /// Falls back to the dedicated setup document when the main
    /// configuration declares no setup section.
    fn rendered_setup(&self, asset: &Asset, setup: Option<&[u8]>) -> Option<SetupChassis> {
        let raw = setup?;
        match self.renderer.render(raw, asset) {
            Ok(Some(config)) => config.setup_chassis,
            Ok(None) => None,
            Err(error) => {
                warn!(serial = %asset.serial, %error, "setup document failed to render");
                None
            }
        }
    }
}
