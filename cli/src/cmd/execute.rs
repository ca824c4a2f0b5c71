use anyhow::Result;
use clap::Args;
use steward::config::Params;

use crate::cmd::Plan;
use crate::cmd::Run;

/// Run a vendor command on assets from inventory
#[derive(Debug, Args)]
pub struct ExecuteArgs {
    /// Command line passed to each device
    #[clap(long)]
    command: String,
}

impl Run for ExecuteArgs {
    async fn run(&self, params: Params) -> Result<()> {
        let plan = Plan {
            execute: true,
            command: Some(self.command.clone()),
            ..Plan::default()
        };
        crate::cmd::pipeline(params, plan).await
    }
}
