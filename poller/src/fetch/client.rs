use super::{AgentRequest, BackoffPolicy, QueryAgent};
use bytes::Bytes;
use model::query::Query;
use model::record::RecordSet;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_retry2::{RetryError, RetryIf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum FetchErr {
    #[error("Request to query agent failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Query agent replied {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("Error encoding request: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Error decoding response: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("Fetch was cancelled")]
    Cancelled,
}

/// Fetches the rows of one query, retrying failed attempts until one
/// succeeds or the fetch is cancelled.
pub struct FetchClient<A> {
    query: Arc<Query>,
    agent: A,
    request: AgentRequest,
    backoff: BackoffPolicy,
}

impl<A: QueryAgent> FetchClient<A> {
    pub fn new(query: Arc<Query>, agent: A, backoff: BackoffPolicy) -> Result<Self, FetchErr> {
        let request = AgentRequest::for_query(&query)?;
        Ok(Self {
            query,
            agent,
            request,
            backoff,
        })
    }

    /// `on_failure` is called after every failed attempt, before backing off.
    pub async fn fetch<F>(&self, cancel: &CancellationToken, mut on_failure: F) -> Result<RecordSet, FetchErr>
    where
        F: FnMut(&FetchErr),
    {
        let started = Instant::now();
        let retry = RetryIf::spawn(
            self.backoff.strategy(),
            move || async move { self.attempt().await.map_err(RetryError::transient) },
            |_: &FetchErr| true,
            |err: &FetchErr, delay: Duration| {
                warn!("Error fetching records: {err}");
                on_failure(err);
                warn!("Backing off for {delay:?}");
            },
        );

        let body = cancel
            .run_until_cancelled(retry)
            .await
            .ok_or(FetchErr::Cancelled)??;
        debug!("Fetch took {:?}", started.elapsed());

        serde_json::from_slice(&body).map_err(FetchErr::Decode)
    }

    async fn attempt(&self) -> Result<Bytes, FetchErr> {
        tokio::time::timeout(self.query.timeout, self.agent.execute(&self.request))
            .await
            .map_err(|_| FetchErr::Timeout(self.query.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Reply, ScriptedAgent};
    use model::record::{Record, Value};

    fn fast_backoff() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(1), 2.0, Duration::from_millis(4))
    }

    fn client(agent: Arc<ScriptedAgent>) -> FetchClient<Arc<ScriptedAgent>> {
        let query = Query::new("users", "postgres", "SELECT 1").with_timeout(Duration::from_millis(50));
        FetchClient::new(Arc::new(query), agent, fast_backoff()).expect("Client should be created")
    }

    fn rows() -> RecordSet {
        RecordSet::new(vec![Record::new().with("region", "eu").with("count", 3)])
    }

    #[tokio::test]
    async fn test_fetch_decodes_rows() {
        let agent = Arc::new(ScriptedAgent::new(Reply::rows(&rows())));
        let records = client(agent.clone())
            .fetch(&CancellationToken::new(), |_| panic!("No attempt should fail"))
            .await
            .expect("Fetch should succeed");

        assert_eq!(records, rows());
        assert_eq!(agent.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_retries_until_success() {
        let agent = Arc::new(
            ScriptedAgent::new(Reply::rows(&rows()))
                .then(Reply::Status(StatusCode::INTERNAL_SERVER_ERROR))
                .then(Reply::Unavailable)
                .then(Reply::Hang),
        );
        let mut failures = Vec::new();
        let records = client(agent.clone())
            .fetch(&CancellationToken::new(), |err| failures.push(err.to_string()))
            .await
            .expect("Fetch should eventually succeed");

        assert_eq!(records.len(), 1);
        assert_eq!(agent.calls(), 4);
        assert_eq!(failures.len(), 3);
        assert!(failures[0].contains("500"));
        assert!(failures[2].contains("timed out"));
    }

    #[tokio::test]
    async fn test_decode_errors_are_not_retried() {
        let agent = Arc::new(ScriptedAgent::new(Reply::Body(Bytes::from_static(b"{\"not\": \"rows\"}"))));
        let err = client(agent.clone())
            .fetch(&CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, FetchErr::Decode(_)));
        assert_eq!(agent.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let agent = Arc::new(ScriptedAgent::new(Reply::Unavailable));
        let query = Query::new("users", "postgres", "SELECT 1");
        let client = FetchClient::new(Arc::new(query), agent.clone(), BackoffPolicy::default())
            .expect("Client should be created");
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), client.fetch(&cancel, |_| {}))
            .await
            .expect("Fetch should return promptly after cancellation");
        assert!(matches!(result, Err(FetchErr::Cancelled)));
        assert!(agent.calls() >= 1);
    }

    #[tokio::test]
    async fn test_text_values_survive_decoding() {
        let body = serde_json::to_vec(&serde_json::json!([{"value": "12.5"}])).unwrap();
        let agent = Arc::new(ScriptedAgent::new(Reply::Body(body.into())));
        let records = client(agent)
            .fetch(&CancellationToken::new(), |_| {})
            .await
            .expect("Fetch should succeed");

        let row = records.first().expect("One row");
        assert_eq!(row.get("value"), Some(&Value::Text("12.5".to_string())));
    }
}
