use serde_json::Map;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub type QueryName = String;
pub type Properties = Map<String, serde_json::Value>;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub const METRIC_PREFIX: &str = "query_result_";
pub const METRIC_HELP: &str = "Result of an SQL query";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryValidationErr {
    #[error("Query is not named")]
    Unnamed,
    #[error("No data source or driver is specified for query [{0}]")]
    MissingDriver(QueryName),
    #[error("SQL statement required for query [{0}]")]
    MissingSql(QueryName),
    #[error("Timeout must be greater than zero for query [{0}]")]
    ZeroTimeout(QueryName),
    #[error("Interval must be greater than zero for query [{0}]")]
    ZeroInterval(QueryName),
    #[error("Query [{0}] sets both data-field and sub-metrics")]
    ExclusiveValueFields(QueryName),
}

/// A named SQL statement polled on a fixed interval.
///
/// Loaded once at startup and shared read-only between a worker, its fetch
/// client and its metric registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub name: QueryName,
    pub data_source: Option<String>,
    pub driver: String,
    pub connection: Properties,
    pub sql: String,
    pub params: Properties,
    pub interval: Duration,
    pub timeout: Duration,
    /// Lower-cased name of the value column, empty when the row has one column.
    pub data_field: String,
    /// Metric suffix to lower-cased value column.
    pub sub_metrics: BTreeMap<String, String>,
    pub value_on_error: Option<String>,
}

impl Query {
    pub fn new(name: impl Into<QueryName>, driver: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_source: None,
            driver: driver.into(),
            connection: Properties::new(),
            sql: sql.into(),
            params: Properties::new(),
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            data_field: String::new(),
            sub_metrics: BTreeMap::new(),
            value_on_error: None,
        }
    }

    pub fn with_connection(mut self, connection: Properties) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_params(mut self, params: Properties) -> Self {
        self.params = params;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_data_field(mut self, data_field: &str) -> Self {
        self.data_field = data_field.to_lowercase();
        self
    }

    pub fn with_sub_metric(mut self, suffix: impl Into<String>, column: &str) -> Self {
        self.sub_metrics.insert(suffix.into(), column.to_lowercase());
        self
    }

    pub fn with_value_on_error(mut self, value: impl Into<String>) -> Self {
        self.value_on_error = Some(value.into());
        self
    }

    pub fn validate(&self) -> Result<(), QueryValidationErr> {
        if self.name.is_empty() {
            return Err(QueryValidationErr::Unnamed);
        }
        let name = || self.name.clone();
        if self.driver.is_empty() {
            return Err(QueryValidationErr::MissingDriver(name()));
        }
        if self.sql.trim().is_empty() {
            return Err(QueryValidationErr::MissingSql(name()));
        }
        if self.timeout.is_zero() {
            return Err(QueryValidationErr::ZeroTimeout(name()));
        }
        if self.interval.is_zero() {
            return Err(QueryValidationErr::ZeroInterval(name()));
        }
        if !self.data_field.is_empty() && !self.sub_metrics.is_empty() {
            return Err(QueryValidationErr::ExclusiveValueFields(name()));
        }
        Ok(())
    }

    /// Suffix and value column pairs in effect for this query.
    ///
    /// Without sub-metrics the data field is the only value column and the
    /// suffix is empty.
    pub fn effective_sub_metrics(&self) -> Vec<(&str, &str)> {
        if self.sub_metrics.is_empty() {
            return vec![("", self.data_field.as_str())];
        }
        self.sub_metrics
            .iter()
            .map(|(suffix, column)| (suffix.as_str(), column.as_str()))
            .collect()
    }

    pub fn is_value_column(&self, column: &str) -> bool {
        self.effective_sub_metrics()
            .iter()
            .any(|(_, value_column)| *value_column == column)
    }

    pub fn base_name(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            self.name.clone()
        } else {
            format!("{}_{suffix}", self.name)
        }
    }

    pub fn metric_name(base_name: &str) -> String {
        format!("{METRIC_PREFIX}{base_name}")
    }
}
