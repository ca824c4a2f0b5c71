mod configure;
mod execute;

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use enum_dispatch::enum_dispatch;
use steward::asset::Asset;
use steward::config::Params;
use steward::device::redfish;
use steward::device::Credential;
use steward::device::Prober;
use steward::dispatch::Dispatcher;
use steward::dispatch::Work;
use steward::inventory::Source;
use steward::inventory::SourceImpl;
use steward::metrics::Metrics;
use steward::resource::TemplateRenderer;
use steward::secrets::SecretStore;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::args::FilterArgs;
use crate::args::GlobalArgs;

/// Keeps fleets of BMCs configured
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    #[clap(flatten)]
    global_args: GlobalArgs,

    #[clap(flatten)]
    filter_args: FilterArgs,
}

/// Subcommands must implement [`Run`] to be executed at runtime.
#[enum_dispatch]
pub trait Run {
    async fn run(&self, params: Params) -> Result<()>;
}

#[enum_dispatch(Run)]
#[derive(Debug, Subcommand)]
enum Command {
    Configure(configure::ConfigureArgs),
    Execute(execute::ExecuteArgs),
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let _tracing = cli.global_args.init_tracing()?;

    let mut params = Params::load(&cli.global_args.config)?;
    cli.global_args.apply(&mut params);
    params.filter = cli.filter_args.clone().into();

    cli.command.run(params).await
}

/// Constants stamped onto every work message of a run.
#[derive(Debug, Default)]
struct Plan {
    configure: bool,
    execute: bool,
    config: Option<Vec<u8>>,
    setup: Option<Vec<u8>>,
    command: Option<String>,
}

/// Drives one full pass over inventory.
///
/// Failures before assets start flowing surface as errors. Once the
/// pass is underway, per-asset failures are logged and counted but
/// never abort the fleet.
async fn pipeline(mut params: Params, plan: Plan) -> Result<()> {
    let (metrics, forwarder) = match &params.metrics {
        Some(config) => {
            let (metrics, forwarder) = Metrics::graphite(config)
                .await
                .context("failed to set up metrics")?;
            (metrics, Some(forwarder))
        }
        None => (Metrics::disabled(), None),
    };

    let credentials = resolve_secrets(&mut params).await?;

    let cancel = CancellationToken::new();
    drain_on_signal(cancel.clone())?;

    let (batches_tx, batches_rx) = mpsc::channel(5);
    let source = SourceImpl::from_config(&params, metrics.clone(), cancel.clone())?;
    let producer = tokio::spawn(async move { source.retrieve(batches_tx).await });

    let (work_tx, work_rx) = mpsc::channel(2);
    let dispatcher = Arc::new(
        Dispatcher::builder()
            .workers(params.workers)
            .credentials(credentials)
            .prober(Arc::new(Prober::new(redfish::drivers())))
            .renderer(Arc::new(TemplateRenderer::new()))
            .metrics(metrics.clone())
            .cancel(cancel.clone())
            .locations(params.locations.clone())
            .ignore_location(params.ignore_location)
            .dry_run(params.dry_run)
            .resources(params.resources.clone())
            .build(),
    );
    let serving = tokio::spawn(dispatcher.run(work_rx));

    feed(batches_rx, work_tx, &plan).await;

    producer.await.context("inventory producer panicked")?;
    serving.await.context("dispatcher panicked")?;

    // The forwarder flushes what is left once every metrics handle is
    // gone.
    drop(metrics);
    if let Some(forwarder) = forwarder {
        forwarder.await.context("metrics forwarder panicked")?;
    }

    info!("fleet pass complete");
    Ok(())
}

/// Flattens asset batches into work messages until the source is
/// exhausted or the dispatcher is gone. Consumes both channel ends, so
/// returning releases a producer still blocked on a full batch channel
/// and signals the dispatcher that no more work is coming.
async fn feed(mut batches: mpsc::Receiver<Vec<Asset>>, work: mpsc::Sender<Work>, plan: &Plan) {
    'feed: while let Some(batch) = batches.recv().await {
        for mut asset in batch {
            asset.configure = plan.configure;
            asset.execute = plan.execute;
            let message = Work {
                asset,
                config: plan.config.clone(),
                setup: plan.setup.clone(),
                command: plan.command.clone(),
            };
            if work.send(message).await.is_err() {
                break 'feed;
            }
        }
    }
}

/// Swaps placeholder secrets for real ones when the settings call for
/// it.
async fn resolve_secrets(params: &mut Params) -> Result<Vec<Credential>> {
    if !params.secrets_from_vault {
        return Ok(params.credentials.clone());
    }

    let config = params
        .vault
        .as_ref()
        .context("secrets_from_vault is set but no vault settings are present")?;
    let store = SecretStore::new(config)?;

    let credentials = store
        .resolve_credentials(params.credentials.clone())
        .await
        .context("failed to resolve credentials")?;
    if let Some(key) = &params.signer_key {
        params.signer_key = Some(store.signer_token(key).await?);
    }

    Ok(credentials)
}

/// Cancels the token on SIGINT or SIGTERM.
fn drain_on_signal(cancel: CancellationToken) -> Result<()> {
    let mut interrupt =
        signal(SignalKind::interrupt()).context("failed to install the SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install the SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        warn!("interrupt received, draining in-flight work");
        cancel.cancel();
    });

    Ok(())
}
