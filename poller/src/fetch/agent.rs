use super::FetchErr;
use async_trait::async_trait;
use bytes::Bytes;
use model::query::{Properties, Query};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Url};
use serde::Serialize;
use std::sync::Arc;

/// The encoded request body sent to the query agent for one query.
///
/// Built once per query and reused for every attempt.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    body: Bytes,
}

#[derive(Serialize)]
struct Payload<'a> {
    driver: &'a str,
    connection: &'a Properties,
    sql: &'a str,
    params: &'a Properties,
}

impl AgentRequest {
    pub fn for_query(query: &Query) -> Result<Self, FetchErr> {
        let payload = Payload {
            driver: &query.driver,
            connection: &query.connection,
            sql: &query.sql,
            params: &query.params,
        };
        let body = serde_json::to_vec(&payload).map_err(FetchErr::Encode)?;
        Ok(Self { body: body.into() })
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Executes SQL on behalf of the exporter and returns the raw rows.
#[async_trait]
pub trait QueryAgent: Send + Sync {
    async fn execute(&self, request: &AgentRequest) -> Result<Bytes, FetchErr>;
}

#[async_trait]
impl<A: QueryAgent + ?Sized> QueryAgent for Arc<A> {
    async fn execute(&self, request: &AgentRequest) -> Result<Bytes, FetchErr> {
        (**self).execute(request).await
    }
}

/// Talks to the query agent over HTTP. Cloning shares the connection pool.
#[derive(Debug, Clone)]
pub struct HttpAgent {
    url: Url,
    client: Client,
}

impl HttpAgent {
    pub fn new(url: Url) -> Result<Self, FetchErr> {
        let client = Client::builder().build()?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl QueryAgent for HttpAgent {
    async fn execute(&self, request: &AgentRequest) -> Result<Bytes, FetchErr> {
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(request.body().clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchErr::Status { status, body });
        }
        Ok(response.bytes().await?)
    }
}
