use super::{ExportErr, Facet, GaugeExporter, SeriesKey};
use model::query::{METRIC_HELP, Query};
use model::record::{Record, RecordSet, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::num::ParseFloatError;
use std::sync::Arc;
use strum::Display;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MetricStatus {
    Registered,
    Unregistered,
}

#[derive(Error, Debug)]
pub enum ApplyErr {
    #[error("There is more than one row in the query result, with a single column")]
    MultipleRowsSingleColumn,
    #[error("Sub-metrics are not compatible with data-field")]
    ExclusiveValueFields,
    #[error("Value column '{0}' not found in result row")]
    ValueNotFound(String),
    #[error("Value column '{0}' appears more than once in result row")]
    AmbiguousValue(String),
    #[error("Value '{value}' is not a number: {source}")]
    ParseValue {
        value: String,
        #[source]
        source: ParseFloatError,
    },
    #[error("Unsupported value {0}")]
    UnsupportedValue(String),
    #[error(transparent)]
    Export(#[from] ExportErr),
}

/// What one reconciliation round changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: usize,
    pub updated: usize,
    pub retired: usize,
    pub published: usize,
}

struct MetricEntry<G> {
    gauge: G,
    status: MetricStatus,
}

struct Observation {
    base_name: String,
    facet: Facet,
    value: f64,
}

/// The series currently exported for one query.
///
/// Every successful result set is reconciled against the held series: new
/// label combinations are created and published, known ones are updated and
/// the ones missing from the result are retired.
pub struct MetricRegistry<E: GaugeExporter> {
    query: Arc<Query>,
    exporter: Arc<E>,
    entries: HashMap<SeriesKey, MetricEntry<E::Gauge>>,
}

impl<E: GaugeExporter> MetricRegistry<E> {
    pub fn new(query: Arc<Query>, exporter: Arc<E>) -> Self {
        Self {
            query,
            exporter,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn status(&self, key: &SeriesKey) -> Option<MetricStatus> {
        self.entries.get(key).map(|entry| entry.status)
    }

    pub fn keys(&self) -> impl Iterator<Item = &SeriesKey> {
        self.entries.keys()
    }

    /// Reconciles the held series with `records`.
    ///
    /// Either the whole result set is applied or, on error, nothing changes.
    pub fn apply(&mut self, records: &RecordSet) -> Result<ApplyReport, ApplyErr> {
        let observed = self.observe(records)?;

        let mut updates = Vec::new();
        let mut creations = Vec::new();
        for (key, observation) in observed {
            if self.entries.contains_key(&key) {
                updates.push((key, observation.value));
            } else {
                let gauge = self.exporter.create(
                    &Query::metric_name(&observation.base_name),
                    METRIC_HELP,
                    &observation.facet,
                )?;
                creations.push((key, gauge, observation.value));
            }
        }

        Ok(self.commit(updates, creations))
    }

    fn observe(&self, records: &RecordSet) -> Result<BTreeMap<SeriesKey, Observation>, ApplyErr> {
        if records.len() > 1 && records.first().is_some_and(|row| row.len() == 1) {
            return Err(ApplyErr::MultipleRowsSingleColumn);
        }
        if !self.query.data_field.is_empty() && !self.query.sub_metrics.is_empty() {
            return Err(ApplyErr::ExclusiveValueFields);
        }

        let mut observed = BTreeMap::new();
        for record in records {
            for (suffix, value_column) in self.query.effective_sub_metrics() {
                let (facet, value) = self.partition(record, value_column)?;
                let base_name = self.query.base_name(suffix);
                let key = SeriesKey::new(&base_name, &facet);
                let value = coerce(value)?;
                observed.insert(
                    key,
                    Observation {
                        base_name,
                        facet,
                        value,
                    },
                );
            }
        }
        Ok(observed)
    }

    /// Splits a row into the value for `value_column` and the facet formed by
    /// every column that is not a value column of any sub-metric.
    fn partition<'r>(&self, record: &'r Record, value_column: &str) -> Result<(Facet, &'r Value), ApplyErr> {
        let single_column = record.len() == 1;
        let mut facet = Facet::new();
        let mut value = None;
        for (column, cell) in record.iter() {
            let column = column.to_lowercase();
            if single_column || column == value_column {
                if value.replace(cell).is_some() {
                    return Err(ApplyErr::AmbiguousValue(value_column.to_string()));
                }
            } else if !self.query.is_value_column(&column) {
                facet.insert(&column, cell);
            }
        }
        value
            .map(|value| (facet, value))
            .ok_or_else(|| ApplyErr::ValueNotFound(value_column.to_string()))
    }

    fn commit(&mut self, updates: Vec<(SeriesKey, f64)>, creations: Vec<(SeriesKey, E::Gauge, f64)>) -> ApplyReport {
        let mut report = ApplyReport::default();

        let mut seen = HashSet::with_capacity(updates.len() + creations.len());
        for (key, value) in updates {
            if let Some(entry) = self.entries.get(&key) {
                self.exporter.set(&entry.gauge, value);
                report.updated += 1;
            }
            seen.insert(key);
        }
        for (key, gauge, value) in creations {
            self.exporter.set(&gauge, value);
            debug!(series = %key, "Creating metric");
            self.entries.insert(
                key.clone(),
                MetricEntry {
                    gauge,
                    status: MetricStatus::Unregistered,
                },
            );
            report.created += 1;
            seen.insert(key);
        }

        let exporter = &self.exporter;
        self.entries.retain(|key, entry| {
            if seen.contains(key) {
                return true;
            }
            if entry.status == MetricStatus::Registered {
                debug!(series = %key, "Unregistering metric");
                if let Err(e) = exporter.unregister(&entry.gauge) {
                    warn!(series = %key, "Error unregistering metric: {e}");
                }
            }
            report.retired += 1;
            false
        });

        for (key, entry) in self.entries.iter_mut() {
            if entry.status == MetricStatus::Registered {
                continue;
            }
            match exporter.register(&entry.gauge) {
                Ok(()) => {
                    debug!(series = %key, "Registering metric");
                    entry.status = MetricStatus::Registered;
                    report.published += 1;
                }
                Err(e) => warn!(series = %key, "Error registering metric: {e}"),
            }
        }

        report
    }
}

fn coerce(value: &Value) -> Result<f64, ApplyErr> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        Value::Text(s) => s.parse().map_err(|source| ApplyErr::ParseValue {
            value: s.clone(),
            source,
        }),
        Value::Unsupported(other) => Err(ApplyErr::UnsupportedValue(other.to_string())),
    }
}
