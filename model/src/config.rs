use crate::query::{DEFAULT_INTERVAL, DEFAULT_TIMEOUT, Properties, Query, QueryName, QueryValidationErr};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigErr {
    #[error("Error reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Error decoding {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Driver is not defined for data source [{0}]")]
    MissingDriver(String),
    #[error("Properties are not defined for data source [{0}]")]
    MissingProperties(String),
    #[error("Query [{query}] references unknown data source [{data_source}]")]
    UnknownDataSource { query: QueryName, data_source: String },
    #[error("Query [{0}] is defined more than once")]
    DuplicateQuery(QueryName),
    #[error(transparent)]
    InvalidQuery(#[from] QueryValidationErr),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub data_sources: BTreeMap<String, DataSource>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Defaults {
    pub data_source: Option<String>,
    #[serde(deserialize_with = "duration::deserialize")]
    pub query_interval: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub query_timeout: Duration,
    pub query_value_on_error: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            data_source: None,
            query_interval: DEFAULT_INTERVAL,
            query_timeout: DEFAULT_TIMEOUT,
            query_value_on_error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataSource {
    pub driver: String,
    pub properties: Properties,
}

/// One query table as written in a query file, before defaults are applied.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
struct QueryDef {
    data_source: Option<String>,
    driver: String,
    connection: Properties,
    sql: String,
    params: Properties,
    #[serde(deserialize_with = "duration::deserialize_opt")]
    interval: Option<Duration>,
    #[serde(deserialize_with = "duration::deserialize_opt")]
    timeout: Option<Duration>,
    data_field: String,
    sub_metrics: BTreeMap<String, String>,
    value_on_error: Option<String>,
}

impl QueryDef {
    fn resolve(self, name: QueryName, config: &Config) -> Result<Query, ConfigErr> {
        let defaults = &config.defaults;
        let data_source = self.data_source.or_else(|| defaults.data_source.clone());

        let (mut driver, mut connection) = (self.driver, self.connection);
        if driver.is_empty() {
            if let Some(source_name) = &data_source {
                let source = config.data_sources.get(source_name).ok_or_else(|| {
                    ConfigErr::UnknownDataSource {
                        query: name.clone(),
                        data_source: source_name.clone(),
                    }
                })?;
                driver = source.driver.clone();
                connection = source.properties.clone();
            }
        }

        let query = Query {
            name,
            data_source,
            driver,
            connection,
            sql: self.sql,
            params: self.params,
            interval: non_zero_or(self.interval, defaults.query_interval),
            timeout: non_zero_or(self.timeout, defaults.query_timeout),
            data_field: self.data_field.to_lowercase(),
            sub_metrics: self
                .sub_metrics
                .into_iter()
                .map(|(suffix, column)| (suffix, column.to_lowercase()))
                .collect(),
            value_on_error: non_empty(self.value_on_error)
                .or_else(|| non_empty(defaults.query_value_on_error.clone())),
        };
        query.validate()?;
        Ok(query)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn non_zero_or(value: Option<Duration>, default: Duration) -> Duration {
    value.filter(|d| !d.is_zero()).unwrap_or(default)
}

impl Config {
    pub fn parse(source: &str, origin: &str) -> Result<Self, ConfigErr> {
        let mut config: Config =
            toml::from_str(&expand_env(source)).map_err(|source| ConfigErr::Parse {
                origin: origin.to_string(),
                source,
            })?;

        let defaults = &mut config.defaults;
        defaults.query_interval = non_zero_or(Some(defaults.query_interval), DEFAULT_INTERVAL);
        defaults.query_timeout = non_zero_or(Some(defaults.query_timeout), DEFAULT_TIMEOUT);

        for (name, source) in &config.data_sources {
            if source.driver.is_empty() {
                return Err(ConfigErr::MissingDriver(name.clone()));
            }
            if source.properties.is_empty() {
                return Err(ConfigErr::MissingProperties(name.clone()));
            }
        }
        Ok(config)
    }
}

pub fn load_config(path: &Path) -> Result<Config, ConfigErr> {
    info!("Loading config from {}", path.display());
    Config::parse(&read(path)?, &path.display().to_string())
}

/// Decodes every top-level table of `source` as one query, applying `config`.
pub fn decode_queries(source: &str, origin: &str, config: &Config) -> Result<Vec<Query>, ConfigErr> {
    let defs: BTreeMap<QueryName, QueryDef> =
        toml::from_str(&expand_env(source)).map_err(|source| ConfigErr::Parse {
            origin: origin.to_string(),
            source,
        })?;

    defs.into_iter()
        .map(|(name, def)| def.resolve(name, config))
        .collect()
}

pub fn load_query_file(path: &Path, config: &Config) -> Result<Vec<Query>, ConfigErr> {
    info!("Loading queries from {}", path.display());
    decode_queries(&read(path)?, &path.display().to_string(), config)
}

/// Loads every `*.toml` file in `dir` in file name order.
///
/// With `lax` set, files that fail to load are logged and skipped.
pub fn load_query_dir(dir: &Path, config: &Config, lax: bool) -> Result<Vec<Query>, ConfigErr> {
    let read_err = |source| ConfigErr::Read {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
            files.push(path);
        }
    }
    files.sort();

    let mut queries = Vec::new();
    for file in files {
        match load_query_file(&file, config) {
            Ok(loaded) => queries.extend(loaded),
            Err(e) if lax => warn!("Skipping {}: {e}", file.display()),
            Err(e) => return Err(e),
        }
    }

    let mut names = HashSet::new();
    for query in &queries {
        if !names.insert(query.name.as_str()) {
            return Err(ConfigErr::DuplicateQuery(query.name.clone()));
        }
    }
    Ok(queries)
}

fn read(path: &Path) -> Result<String, ConfigErr> {
    std::fs::read_to_string(path).map_err(|source| ConfigErr::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Replaces `${VAR}` and `$VAR` with the value of the environment variable,
/// or the empty string when it is unset.
pub fn expand_env(raw: &str) -> String {
    let mut expanded = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            expanded.push(c);
            continue;
        }
        let name = match chars.peek() {
            Some('{') => {
                chars.next();
                let name: String = chars.by_ref().take_while(|c| *c != '}').collect();
                name
            }
            Some(c) if c.is_ascii_alphabetic() || *c == '_' => {
                let mut name = String::new();
                while let Some(c) = chars.next_if(|c| c.is_ascii_alphanumeric() || *c == '_') {
                    name.push(c);
                }
                name
            }
            _ => {
                expanded.push('$');
                continue;
            }
        };
        expanded.push_str(&std::env::var(&name).unwrap_or_default());
    }
    expanded
}

mod duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }

    pub(super) fn deserialize_opt<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
