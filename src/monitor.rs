//! Process memory monitor
//!
//! Logs resident memory periodically and flags usage that is high for
//! small single-board hosts.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// RSS above which a warning is logged
pub const HIGH_RSS_MB: u64 = 500;
/// RSS above which an error is logged
pub const CRITICAL_RSS_MB: u64 = 800;

/// Memory usage of this process in MiB
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub rss_mb: u64,
    pub peak_rss_mb: u64,
    pub virtual_mb: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLevel {
    Normal,
    High,
    Critical,
}

impl MemorySnapshot {
    /// Read `/proc/self/status`. Zeroes where it is unavailable.
    pub fn current() -> Self {
        match std::fs::read_to_string("/proc/self/status") {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                debug!("Failed to read /proc/self/status: {}", e);
                Self::default()
            }
        }
    }

    fn parse(content: &str) -> Self {
        let mut snapshot = Self::default();
        for line in content.lines() {
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let Some(mb) = value
                .split_whitespace()
                .next()
                .and_then(|kb| kb.parse::<u64>().ok())
                .map(|kb| kb / 1024)
            else {
                continue;
            };
            match field {
                "VmRSS" => snapshot.rss_mb = mb,
                "VmHWM" => snapshot.peak_rss_mb = mb,
                "VmSize" => snapshot.virtual_mb = mb,
                _ => {}
            }
        }
        snapshot
    }

    pub fn level(&self) -> MemoryLevel {
        if self.rss_mb > CRITICAL_RSS_MB {
            MemoryLevel::Critical
        } else if self.rss_mb > HIGH_RSS_MB {
            MemoryLevel::High
        } else {
            MemoryLevel::Normal
        }
    }
}

fn log_usage() {
    let snapshot = MemorySnapshot::current();
    info!(
        rss_mb = snapshot.rss_mb,
        peak_rss_mb = snapshot.peak_rss_mb,
        virtual_mb = snapshot.virtual_mb,
        "Memory usage"
    );
    match snapshot.level() {
        MemoryLevel::Critical => error!(
            rss_mb = snapshot.rss_mb,
            "Critical memory usage, the host may become unstable"
        ),
        MemoryLevel::High => warn!(
            rss_mb = snapshot.rss_mb,
            "High memory usage, check for leaked streams"
        ),
        MemoryLevel::Normal => {}
    }
}

/// Log memory usage now and every `interval` until shutdown
pub fn spawn_memory_monitor(
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    info!("Starting memory monitor ({}s interval)", interval.as_secs());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => log_usage(),
                _ = shutdown.recv() => {
                    debug!("Memory monitor stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\tprotect-live\nVmPeak:\t  900000 kB\nVmSize:\t  819200 kB\nVmHWM:\t  614400 kB\nVmRSS:\t  524288 kB\nThreads:\t8\n";

    #[test]
    fn test_parse_status() {
        let snapshot = MemorySnapshot::parse(STATUS);
        assert_eq!(
            snapshot,
            MemorySnapshot {
                rss_mb: 512,
                peak_rss_mb: 600,
                virtual_mb: 800,
            }
        );
        assert_eq!(snapshot.level(), MemoryLevel::High);
    }

    #[test]
    fn test_levels() {
        let at = |rss_mb| MemorySnapshot {
            rss_mb,
            ..Default::default()
        };
        assert_eq!(at(120).level(), MemoryLevel::Normal);
        assert_eq!(at(500).level(), MemoryLevel::Normal);
        assert_eq!(at(501).level(), MemoryLevel::High);
        assert_eq!(at(801).level(), MemoryLevel::Critical);
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(MemorySnapshot::parse(STATUS)).unwrap();
        assert_eq!(json["rssMb"], 512);
        assert_eq!(json["peakRssMb"], 600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_stops_on_shutdown() {
        let (tx, rx) = broadcast::channel(1);
        let handle = spawn_memory_monitor(Duration::from_secs(300), rx);
        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
