use clap::Args;
use steward::config::FilterParams;

const HEADING: Option<&str> = Some("Inventory Filters");

/// Narrows which inventory records a run acts on.
#[derive(Debug, Args, Clone, Default)]
pub struct FilterArgs {
    /// Act on every asset the source returns
    #[clap(long, help_heading = HEADING, global = true)]
    pub all: bool,

    /// Act on chassis assets only
    #[clap(long, help_heading = HEADING, global = true)]
    pub chassis: bool,

    /// Act on server assets only
    #[clap(long, help_heading = HEADING, global = true)]
    pub servers: bool,

    /// Comma separated serials to act on
    #[clap(long, help_heading = HEADING, global = true)]
    pub serials: Option<String>,

    /// Comma separated BMC addresses to act on
    #[clap(long, help_heading = HEADING, global = true)]
    pub ips: Option<String>,
}

impl From<FilterArgs> for FilterParams {
    fn from(args: FilterArgs) -> Self {
        Self {
            all: args.all,
            chassis: args.chassis,
            servers: args.servers,
            serials: args.serials,
            ips: args.ips,
        }
    }
}
