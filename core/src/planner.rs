//! Transport to the LLM planner: a single synchronous request/response pair
//! of JSON documents per turn.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

#[async_trait]
pub trait PlannerTransport: Send + Sync {
    async fn send_prompt(&self, prompt: Value) -> Result<Value>;
}

/// JSON-POST planner transport. The endpoint receives the prompt document and
/// replies with a planner response document.
pub struct HttpPlanner {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPlanner {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl PlannerTransport for HttpPlanner {
    async fn send_prompt(&self, prompt: Value) -> Result<Value> {
        debug!(endpoint = %self.endpoint, "sending planner prompt");
        let response = self
            .client
            .post(&self.endpoint)
            .json(&prompt)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<Value>().await?)
    }
}
