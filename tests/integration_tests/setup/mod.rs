use model::query::Query;
use poller::fetch::{BackoffPolicy, HttpAgent};
use poller::metrics::PrometheusExporter;
use prometheus::Registry;
use sql_exporter::server::render;
use sql_exporter::supervisor::Supervisor;
use std::sync::Arc;
use std::time::Duration;
use test_utils::MockAgent;
use tokio::time::Instant;

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy::new(Duration::from_millis(10), 2.0, Duration::from_millis(50))
}

/// A mock agent, a prometheus registry and a supervisor wired together the
/// way the binary wires them.
pub struct Harness {
    pub agent: MockAgent,
    pub registry: Registry,
    pub supervisor: Supervisor,
    exporter: Arc<PrometheusExporter>,
    http: HttpAgent,
}

impl Harness {
    pub async fn start() -> Self {
        let agent = MockAgent::start().await;
        let registry = Registry::new();
        let http = HttpAgent::new(agent.url()).expect("HTTP agent should be created");
        Harness {
            exporter: Arc::new(PrometheusExporter::new(registry.clone())),
            http,
            agent,
            registry,
            supervisor: Supervisor::new(),
        }
    }

    pub fn spawn(&mut self, query: Query) {
        self.supervisor
            .spawn(Arc::new(query), self.http.clone(), self.exporter.clone(), fast_backoff())
            .expect("Worker should spawn");
    }

    pub fn scrape(&self) -> String {
        render(&self.registry).expect("Render should succeed")
    }

    /// Scrapes until `predicate` holds, panicking after a timeout.
    pub async fn wait_for(&self, what: &str, predicate: impl Fn(&str) -> bool) -> String {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            let body = self.scrape();
            if predicate(&body) {
                return body;
            }
            if Instant::now() > deadline {
                panic!("Timed out waiting for {what}, last scrape:\n{body}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn users_query(interval: Duration) -> Query {
    Query::new("users", "postgres", "SELECT region, count(*) AS count FROM users GROUP BY region")
        .with_data_field("count")
        .with_interval(interval)
        .with_timeout(Duration::from_secs(1))
}
