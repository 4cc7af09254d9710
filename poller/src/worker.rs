use crate::fetch::{BackoffPolicy, FetchClient, FetchErr, QueryAgent};
use crate::metrics::{GaugeExporter, MetricRegistry};
use model::query::Query;
use model::record::RecordSet;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Polls one query on its interval and keeps its series up to date.
pub struct Worker<A, E: GaugeExporter> {
    query: Arc<Query>,
    client: FetchClient<A>,
    registry: MetricRegistry<E>,
    cancel: CancellationToken,
}

impl<A: QueryAgent, E: GaugeExporter> Worker<A, E> {
    pub fn new(
        query: Arc<Query>,
        agent: A,
        exporter: Arc<E>,
        backoff: BackoffPolicy,
        cancel: CancellationToken,
    ) -> Result<Self, FetchErr> {
        Ok(Self {
            client: FetchClient::new(query.clone(), agent, backoff)?,
            registry: MetricRegistry::new(query.clone(), exporter),
            query,
            cancel,
        })
    }

    pub fn registry(&self) -> &MetricRegistry<E> {
        &self.registry
    }

    /// Runs until the cancellation token fires. The first poll happens
    /// immediately, later ones once per interval.
    pub async fn run(mut self) {
        info!("Starting worker");
        self.poll().await;

        let period = self.query.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.poll().await,
            }
        }
        info!("Stopping worker");
    }

    /// One fetch-and-apply cycle. Errors are logged and never end the worker.
    pub async fn poll(&mut self) {
        let Self {
            query,
            client,
            registry,
            cancel,
        } = self;

        let records = client
            .fetch(cancel, |_| {
                if let Some(value) = &query.value_on_error {
                    if let Err(e) = registry.apply(&RecordSet::error(value)) {
                        error!("Error setting error metric: {e}");
                    }
                }
            })
            .await;

        match records {
            Ok(records) => match registry.apply(&records) {
                Ok(report) => debug!(
                    created = report.created,
                    updated = report.updated,
                    retired = report.retired,
                    published = report.published,
                    "Applied {} records",
                    records.len()
                ),
                Err(e) => error!("Error setting metrics: {e}"),
            },
            Err(FetchErr::Cancelled) => debug!("Fetch cancelled"),
            Err(e) => error!("Error fetching records: {e}"),
        }
    }
}
