use crate::supervisor::DEFAULT_SHUTDOWN_GRACE;
use anyhow::{Result, bail};
use clap::Parser;
use poller::fetch::Url;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_QUERIES_FILE: &str = "queries.toml";

#[derive(Parser, Debug)]
#[command(author, version, about = "Exports SQL query results as Prometheus metrics", long_about = None)]
pub struct Args {
    /// Address to listen on, all interfaces when empty
    #[arg(long, env = "SQL_EXPORTER_HOST", default_value = "")]
    pub host: String,

    #[arg(long, env = "SQL_EXPORTER_PORT", default_value_t = 8080)]
    pub port: u16,

    /// URL of the query agent
    #[arg(long, env = "SQL_EXPORTER_SERVICE")]
    pub service: Url,

    /// Query definitions file
    #[arg(long, default_value = DEFAULT_QUERIES_FILE)]
    pub queries: PathBuf,

    /// Directory of query definition files, used instead of --queries
    #[arg(long)]
    pub query_dir: Option<PathBuf>,

    /// Defaults and data sources
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Skip query files that fail to load
    #[arg(long)]
    pub lax: bool,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// How long to wait for open connections and workers on shutdown
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_GRACE.into())]
    pub shutdown_grace: humantime::Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    File(PathBuf),
    Dir(PathBuf),
}

impl Args {
    pub fn query_source(&self) -> Result<QuerySource> {
        match &self.query_dir {
            Some(_) if self.queries != PathBuf::from(DEFAULT_QUERIES_FILE) => {
                bail!("--queries and --query-dir are mutually exclusive")
            }
            Some(dir) => Ok(QuerySource::Dir(dir.clone())),
            None => Ok(QuerySource::File(self.queries.clone())),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace.into()
    }

    pub fn listen_addr(&self) -> String {
        let host = if self.host.is_empty() { "0.0.0.0" } else { &self.host };
        format!("{host}:{}", self.port)
    }
}
