mod agent;
mod backoff;
mod client;

pub use agent::{AgentRequest, HttpAgent, QueryAgent};
pub use backoff::BackoffPolicy;
pub use client::{FetchClient, FetchErr};
pub use reqwest::{StatusCode, Url};
