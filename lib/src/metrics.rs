//! Fire-and-forget operational counters.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Instant;
use std::time::SystemTime;

use anyhow::Context;
use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::MetricsConfig;

#[derive(Debug, Clone)]
pub(crate) enum Sample {
    Count { key: &'static str, value: u64 },
    Runtime { key: &'static str, seconds: f64 },
}

/// Cloneable metrics handle. All clones feed one forwarder task, and
/// a disabled handle drops every sample.
///
/// Emission never blocks and never fails the caller. Once the last
/// clone is dropped the forwarder flushes whatever is pending and
/// exits.
#[derive(Debug, Clone)]
pub struct Metrics {
    tx: Option<mpsc::UnboundedSender<Sample>>,
}

impl Metrics {
    /// Connects to the configured graphite endpoint and spawns the
    /// forwarder. The caller decides whether a connect failure is
    /// fatal.
    ///
    /// # Errors
    ///
    /// If the endpoint cannot be reached.
    pub async fn graphite(config: &MetricsConfig) -> Result<(Self, JoinHandle<()>)> {
        let stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .with_context(|| {
                format!("failed to reach metrics endpoint {}:{}", config.host, config.port)
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(forward(
            rx,
            stream,
            config.prefix.clone(),
            config.flush_interval_secs,
        ));

        Ok((Self { tx: Some(tx) }, task))
    }

    /// A handle that drops every sample.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// A handle whose samples land on a channel, for assertions.
    #[cfg(test)]
    pub(crate) fn capture() -> (Self, mpsc::UnboundedReceiver<Sample>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn count(&self, key: &'static str, value: u64) {
        self.send(Sample::Count { key, value });
    }

    /// Records elapsed seconds since `start` as a gauge.
    pub fn runtime(&self, key: &'static str, start: Instant) {
        self.send(Sample::Runtime {
            key,
            seconds: start.elapsed().as_secs_f64(),
        });
    }

    fn send(&self, sample: Sample) {
        if let Some(tx) = &self.tx {
            // A gone forwarder must never fail the engines.
            let _ = tx.send(sample);
        }
    }
}

async fn forward(
    mut rx: mpsc::UnboundedReceiver<Sample>,
    mut stream: TcpStream,
    prefix: String,
    flush_interval_secs: u64,
) {
    let mut counts: HashMap<&'static str, u64> = HashMap::new();
    let mut gauges: HashMap<&'static str, f64> = HashMap::new();
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
        flush_interval_secs.max(1),
    ));

    loop {
        tokio::select! {
            sample = rx.recv() => match sample {
                Some(Sample::Count { key, value }) => {
                    *counts.entry(key).or_default() += value;
                }
                Some(Sample::Runtime { key, seconds }) => {
                    gauges.insert(key, seconds);
                }
                None => break,
            },
            _ = ticker.tick() => {
                if let Err(error) = flush(&mut stream, &prefix, &mut counts, &mut gauges).await {
                    debug!(%error, "metrics flush failed");
                }
            }
        }
    }

    if let Err(error) = flush(&mut stream, &prefix, &mut counts, &mut gauges).await {
        debug!(%error, "final metrics flush failed");
    }
}

async fn flush(
    stream: &mut TcpStream,
    prefix: &str,
    counts: &mut HashMap<&'static str, u64>,
    gauges: &mut HashMap<&'static str, f64>,
) -> Result<()> {
    let lines = render_lines(prefix, counts, gauges, unix_now());
    if lines.is_empty() {
        return Ok(());
    }
    stream
        .write_all(lines.as_bytes())
        .await
        .context("failed to write metrics")?;
    Ok(())
}

/// Graphite plaintext protocol, one `path value timestamp` per line.
fn render_lines(
    prefix: &str,
    counts: &mut HashMap<&'static str, u64>,
    gauges: &mut HashMap<&'static str, f64>,
    timestamp: u64,
) -> String {
    let mut lines = String::new();
    for (key, value) in counts.drain() {
        let _ = writeln!(lines, "{prefix}.{key} {value} {timestamp}");
    }
    for (key, value) in gauges.drain() {
        let _ = writeln!(lines, "{prefix}.{key} {value} {timestamp}");
    }
    lines
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn lines_follow_the_plaintext_protocol() {
        let mut counts = HashMap::new();
        counts.insert("dispatch.asset_recvd", 3_u64);
        let mut gauges = HashMap::new();

        let lines = render_lines("steward", &mut counts, &mut gauges, 1_700_000_000);

        assert_eq!(lines, "steward.dispatch.asset_recvd 3 1700000000\n");
        assert!(counts.is_empty());
    }

    #[test]
    fn disabled_handle_swallows_samples() {
        let metrics = Metrics::disabled();
        metrics.count("dispatch.asset_recvd", 1);
        metrics.runtime("dispatch.configure_runtime", Instant::now());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        let config = MetricsConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..MetricsConfig::default()
        };
        assert!(Metrics::graphite(&config).await.is_err());
    }

    #[tokio::test]
    async fn dropping_the_last_handle_flushes_pending_samples() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = MetricsConfig {
            host: "127.0.0.1".to_string(),
            port,
            prefix: "test".to_string(),
            flush_interval_secs: 3600,
        };

        let (metrics, task) = Metrics::graphite(&config).await.unwrap();
        let (mut socket, _) = listener.accept().await.unwrap();

        metrics.count("dispatch.configure_success", 2);
        let clone = metrics.clone();
        clone.count("dispatch.configure_success", 1);
        drop(clone);
        drop(metrics);
        task.await.unwrap();

        let mut received = String::new();
        socket.read_to_string(&mut received).await.unwrap();
        assert!(received.contains("test.dispatch.configure_success 3 "));
    }
}
