//! Metrics recorder installation.

use {std::net::SocketAddr, tracing::info};

use crate::error::Result;

/// Configuration for the metrics exporter.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    /// Whether metrics collection is enabled
    pub enabled: bool,
    /// Address the Prometheus scrape endpoint listens on
    pub listen: Option<SocketAddr>,
    /// Global labels to add to all metrics
    pub global_labels: Vec<(String, String)>,
}

/// Install the global metrics recorder.
///
/// Call once at startup. When collection is disabled no recorder is installed
/// and every `counter!` call is a no-op.
///
/// # Errors
///
/// Fails if the exporter cannot be built or its listener cannot bind, or when
/// collection is requested from a build without the `prometheus` feature.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<()> {
    if !config.enabled {
        info!("Metrics collection is disabled");
        return Ok(());
    }

    #[cfg(feature = "prometheus")]
    {
        use {crate::buckets, metrics_exporter_prometheus::PrometheusBuilder};

        let mut builder = PrometheusBuilder::new().set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(crate::ratelimit::WAIT_SECONDS.to_string()),
            buckets::RATE_LIMIT_WAIT,
        )?;
        if let Some(addr) = config.listen {
            builder = builder.with_http_listener(addr);
        }
        for (key, value) in config.global_labels {
            builder = builder.add_global_label(key, value);
        }
        builder.install()?;
        info!(listen = ?config.listen, "Prometheus metrics exporter initialized");
        Ok(())
    }

    #[cfg(not(feature = "prometheus"))]
    {
        Err(crate::error::Error::ExporterUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_installs_nothing() {
        assert!(init_metrics(MetricsRecorderConfig::default()).is_ok());
    }

    #[cfg(not(feature = "prometheus"))]
    #[test]
    fn enabled_without_exporter_is_an_error() {
        let config = MetricsRecorderConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(init_metrics(config).is_err());
    }
}
