use model::query::Query;
use poller::fetch::{BackoffPolicy, FetchErr, QueryAgent};
use poller::metrics::GaugeExporter;
use poller::worker::Worker;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How the workers ended on shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub finished: usize,
    pub aborted: usize,
}

/// Owns one worker task per query and stops them together.
pub struct Supervisor {
    cancel: CancellationToken,
    workers: JoinSet<String>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Supervisor {
            cancel: CancellationToken::new(),
            workers: JoinSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// The token every worker stops on. Cancelling it stops polling without
    /// waiting for the workers.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn<A, E>(
        &mut self,
        query: Arc<Query>,
        agent: A,
        exporter: Arc<E>,
        backoff: BackoffPolicy,
    ) -> Result<(), FetchErr>
    where
        A: QueryAgent + 'static,
        E: GaugeExporter + 'static,
    {
        let name = query.name.clone();
        let worker = Worker::new(query, agent, exporter, backoff, self.cancel.clone())?;
        let span = info_span!("worker", query = %name);
        self.workers.spawn(
            async move {
                worker.run().await;
                name
            }
            .instrument(span),
        );
        Ok(())
    }

    /// Cancels every worker and waits up to `grace` for them to return.
    /// Workers still running after that are aborted.
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        info!("Stopping {} workers", self.workers.len());
        self.cancel.cancel();

        let mut report = ShutdownReport::default();
        let workers = &mut self.workers;
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(name) => debug!(query = %name, "Worker finished"),
                    Err(e) => error!("Worker task failed: {e}"),
                }
                report.finished += 1;
            }
        })
        .await;

        if drained.is_err() {
            report.aborted = self.workers.len();
            warn!("{} workers did not stop within {grace:?}, aborting", report.aborted);
            self.workers.shutdown().await;
        } else {
            info!("All workers have finished");
        }
        report
    }
}
