use super::Facet;
use prometheus::{Gauge, Opts, Registry};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportErr {
    #[error("Prometheus registry error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// The primitive operations the metric registry needs from a metrics backend.
///
/// Implementations are shared between workers and must synchronize internally.
pub trait GaugeExporter: Send + Sync {
    type Gauge: Send + Sync;

    fn create(&self, name: &str, help: &str, facet: &Facet) -> Result<Self::Gauge, ExportErr>;
    fn set(&self, gauge: &Self::Gauge, value: f64);
    /// Makes the gauge visible to scrapes.
    fn register(&self, gauge: &Self::Gauge) -> Result<(), ExportErr>;
    fn unregister(&self, gauge: &Self::Gauge) -> Result<(), ExportErr>;
}

/// Exports gauges into a [`prometheus::Registry`], with the facet attached as
/// constant labels.
#[derive(Clone, Default)]
pub struct PrometheusExporter {
    registry: Registry,
}

impl PrometheusExporter {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl GaugeExporter for PrometheusExporter {
    type Gauge = Gauge;

    fn create(&self, name: &str, help: &str, facet: &Facet) -> Result<Gauge, ExportErr> {
        let opts = Opts::new(name, help).const_labels(facet.labels());
        Ok(Gauge::with_opts(opts)?)
    }

    fn set(&self, gauge: &Gauge, value: f64) {
        gauge.set(value);
    }

    fn register(&self, gauge: &Gauge) -> Result<(), ExportErr> {
        self.registry.register(Box::new(gauge.clone()))?;
        Ok(())
    }

    fn unregister(&self, gauge: &Gauge) -> Result<(), ExportErr> {
        self.registry.unregister(Box::new(gauge.clone()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    fn render(registry: &Registry) -> String {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .expect("Encoding should succeed");
        String::from_utf8(buffer).expect("Output should be UTF-8")
    }

    #[test]
    fn test_gauge_lifecycle() {
        let exporter = PrometheusExporter::default();
        let facet: Facet = [("region", "eu")].into_iter().collect();
        let gauge = exporter
            .create("query_result_users", "Result of an SQL query", &facet)
            .expect("Gauge should be created");
        exporter.set(&gauge, 3.0);
        assert!(render(exporter.registry()).is_empty());

        exporter.register(&gauge).expect("Register should succeed");
        assert!(render(exporter.registry()).contains(r#"query_result_users{region="eu"} 3"#));

        assert!(exporter.register(&gauge).is_err());

        exporter.unregister(&gauge).expect("Unregister should succeed");
        assert!(render(exporter.registry()).is_empty());
    }

    #[test]
    fn test_invalid_metric_name() {
        let exporter = PrometheusExporter::default();
        let result = exporter.create("query_result_bad name", "help", &Facet::new());
        assert!(matches!(result, Err(ExportErr::Prometheus(_))));
    }
}
