use std::any::Any;
use std::fs::OpenOptions;
use std::io::IsTerminal;

use anyhow::Context;
use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Args;
use steward::config::Params;
use tracing::debug;
use tracing_appender::non_blocking;
use tracing_glog::Glog;
use tracing_glog::GlogFields;
use tracing_glog::LocalTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;

const HEADING: Option<&str> = Some("Global Options");

/// Global arguments that apply to every subcommand.
#[derive(Debug, Args, Clone)]
pub struct GlobalArgs {
    /// Path to the settings file
    #[clap(long, short = 'c', env = "STEWARD_CONFIG", default_value = "/etc/steward/steward.yml", help_heading = HEADING, global = true)]
    pub config: Utf8PathBuf,

    /// Filter directive for stderr logs
    #[clap(long, env = "RUST_LOG", default_value = "info", help_heading = HEADING, global = true)]
    pub log_level: String,

    /// Shorthand for --log-level debug
    #[clap(long, short = 'd', help_heading = HEADING, global = true)]
    pub debug: bool,

    /// Shorthand for --log-level trace
    #[clap(long, short = 't', help_heading = HEADING, global = true)]
    pub trace: bool,

    /// Mirror logs into this file
    #[clap(long, help_heading = HEADING, global = true)]
    pub log_file: Option<Utf8PathBuf>,

    /// Filter directive for the log file
    #[clap(long, default_value = "steward=debug,steward_cli=debug", help_heading = HEADING, global = true)]
    pub file_level: String,

    /// Number of assets handled at once, overriding the settings file
    #[clap(long, help_heading = HEADING, global = true)]
    pub workers: Option<usize>,

    /// Comma separated locations to manage, overriding the settings file
    #[clap(long, short = 'l', help_heading = HEADING, global = true)]
    pub locations: Option<String>,

    /// Act on assets regardless of their location
    #[clap(long, help_heading = HEADING, global = true)]
    pub ignore_location: bool,

    /// Log what would happen without touching any device
    #[clap(long, help_heading = HEADING, global = true)]
    pub dry_run: bool,
}

/// Guard holder for [`tracing`] things that need to live until the end of the
/// program.
#[derive(Debug, Default)]
pub struct TracingGuard {
    guards: Vec<Box<dyn Any>>,
}

impl GlobalArgs {
    /// Initializes all [`tracing`] config.
    pub fn init_tracing(&self) -> Result<TracingGuard> {
        let mut guard = TracingGuard::default();

        let stderr_filter = EnvFilter::builder().parse_lossy(self.stderr_directive());
        let stderr_layer = tracing_subscriber::fmt::layer()
            .event_format(Glog::default().with_timer(LocalTime::default()))
            .fmt_fields(GlogFields::default())
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr)
            .with_filter(stderr_filter);

        let file_layer = match &self.log_file {
            Some(path) => {
                let log_file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("unable to open log file {path}"))?;
                let (file_writer, file_writer_guard) = non_blocking(log_file);
                let file_filter = EnvFilter::builder().parse_lossy(&self.file_level);
                let layer = tracing_subscriber::fmt::layer()
                    .event_format(Glog::default().with_timer(LocalTime::default()))
                    .fmt_fields(GlogFields::default())
                    .with_ansi(false)
                    .with_writer(file_writer)
                    .with_filter(file_filter);
                guard.guards.push(Box::new(file_writer_guard));
                Some(layer)
            }
            None => None,
        };

        let subscriber = Registry::default().with(stderr_layer).with(file_layer);
        tracing::subscriber::set_global_default(subscriber)?;

        debug!("Initialized tracing");

        Ok(guard)
    }

    /// Applies command line overrides on top of the loaded settings.
    /// Flags left at their defaults leave the settings alone.
    pub fn apply(&self, params: &mut Params) {
        if let Some(workers) = self.workers {
            params.workers = workers;
        }
        if let Some(locations) = &self.locations {
            params.locations = locations
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect();
        }
        if self.ignore_location {
            params.ignore_location = true;
        }
        if self.dry_run {
            params.dry_run = true;
        }
    }

    fn stderr_directive(&self) -> &str {
        if self.trace {
            "trace"
        } else if self.debug {
            "debug"
        } else {
            &self.log_level
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn args() -> GlobalArgs {
        GlobalArgs {
            config: Utf8PathBuf::from("/etc/steward/steward.yml"),
            log_level: "info".to_string(),
            debug: false,
            trace: false,
            log_file: None,
            file_level: String::new(),
            workers: None,
            locations: None,
            ignore_location: false,
            dry_run: false,
        }
    }

    #[test]
    fn unset_flags_leave_the_settings_alone() {
        let mut params = Params::default();
        params.workers = 25;
        params.locations = vec!["lab1".to_string()];

        args().apply(&mut params);

        assert_eq!(params.workers, 25);
        assert_eq!(params.locations, ["lab1"]);
        assert!(!params.ignore_location);
        assert!(!params.dry_run);
    }

    #[test]
    fn set_flags_win_over_the_settings_file() {
        let mut args = args();
        args.workers = Some(4);
        args.locations = Some("lab2, lab3,".to_string());
        args.ignore_location = true;
        args.dry_run = true;

        let mut params = Params::default();
        params.locations = vec!["lab1".to_string()];

        args.apply(&mut params);

        assert_eq!(params.workers, 4);
        assert_eq!(params.locations, ["lab2", "lab3"]);
        assert!(params.ignore_location);
        assert!(params.dry_run);
    }

    #[rstest]
    #[case(false, false, "info")]
    #[case(true, false, "debug")]
    #[case(false, true, "trace")]
    #[case(true, true, "trace")]
    fn convenience_flags_pick_the_stderr_directive(
        #[case] debug: bool,
        #[case] trace: bool,
        #[case] expected: &str,
    ) {
        let mut args = args();
        args.debug = debug;
        args.trace = trace;

        assert_eq!(args.stderr_directive(), expected);
    }
}
