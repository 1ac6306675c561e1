use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::info;

/// Install the Prometheus recorder and serve `/metrics` on `port`
pub fn install_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        // Lookups take tens of milliseconds to tens of seconds
        .set_buckets_for_metric(
            Matcher::Suffix("duration_ms".to_string()),
            &[
                10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 20000.0, 60000.0,
            ],
        )
        .context("failed to set histogram buckets")?
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus exporter")?;

    info!("Serving Prometheus metrics on http://{}/metrics", addr);
    tokio::spawn(process_metrics_task());
    initialize_tracker_metrics();
    Ok(())
}

/// Updates uptime and memory usage every 5 seconds
pub async fn process_metrics_task() {
    let start_time = Instant::now();

    loop {
        metrics::gauge!("process.uptime.seconds").set(start_time.elapsed().as_secs() as f64);
        metrics::gauge!("process.is_up").set(1.0);

        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status")
                && let Some(line) = status.lines().find(|l| l.starts_with("VmRSS:"))
                && let Some(kb) = line
                    .split_whitespace()
                    .nth(1)
                    .and_then(|kb| kb.parse::<f64>().ok())
            {
                metrics::gauge!("process.memory.bytes").set(kb * 1024.0);
            }
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// Initialize tracker metrics to zero so they appear in Prometheus queries
/// before anything has happened
pub fn initialize_tracker_metrics() {
    // Poller
    metrics::counter!("farewatch.tick.completed_total").absolute(0);
    metrics::counter!("farewatch.lookup.success_total").absolute(0);
    for kind in ["not_found", "rate_limited", "timeout", "unknown"] {
        metrics::counter!("farewatch.lookup.failed_total", "kind" => kind).absolute(0);
    }

    // Notifications
    for kind in ["price_drop", "price_rise", "tracking_suspended"] {
        metrics::counter!("farewatch.notify.sent_total", "kind" => kind).absolute(0);
        metrics::counter!("farewatch.notify.failed_total", "kind" => kind).absolute(0);
    }

    // Chat side
    metrics::counter!("farewatch.bot.poll_errors_total").absolute(0);

    metrics::gauge!("farewatch.registry.flights").set(0.0);
}
