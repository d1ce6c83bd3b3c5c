#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[cfg(feature = "prometheus")]
    #[error(transparent)]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
    #[error("metrics exporter is not compiled in (enable the `prometheus` feature)")]
    ExporterUnavailable,
}

pub type Result<T> = std::result::Result<T, Error>;
