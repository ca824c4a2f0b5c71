use anyhow::Context;
use anyhow::Result;
use clap::Args;
use steward::config::Params;
use tracing::debug;

use crate::cmd::Plan;
use crate::cmd::Run;

/// Apply configuration resources to assets from inventory
#[derive(Debug, Args)]
pub struct ConfigureArgs {
    /// Comma separated resource names to apply instead of the full set
    #[clap(long, short = 'r')]
    resources: Option<String>,
}

impl Run for ConfigureArgs {
    async fn run(&self, mut params: Params) -> Result<()> {
        if let Some(resources) = &self.resources {
            params.resources = resources
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }

        let path = params
            .configuration_file
            .clone()
            .context("no configuration document is configured")?;
        let config = std::fs::read(&path)
            .with_context(|| format!("failed to read configuration document {path}"))?;

        let setup = match &params.setup_file {
            Some(path) => match std::fs::read(path) {
                Ok(raw) => Some(raw),
                Err(error) => {
                    debug!(%path, %error, "no chassis setup document");
                    None
                }
            },
            None => None,
        };

        let plan = Plan {
            configure: true,
            config: Some(config),
            setup,
            ..Plan::default()
        };
        crate::cmd::pipeline(params, plan).await
    }
}
