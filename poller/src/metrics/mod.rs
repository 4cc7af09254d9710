mod export;
mod facet;
mod registry;

pub use export::{ExportErr, GaugeExporter, PrometheusExporter};
pub use facet::{Facet, SeriesKey};
pub use registry::{ApplyErr, ApplyReport, MetricRegistry, MetricStatus};
