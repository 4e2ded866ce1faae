use crate::config::StoreCredentials;
use crate::entry::{COLUMNS, FeedbackEntry, NewFeedback};
use crate::error::StoreError;
use crate::store::types::FeedbackStore;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// PostgREST endpoint of a hosted Supabase project.
pub struct RestStore {
    client: reqwest::Client,
    table_url: String,
    key: String,
}

impl RestStore {
    pub fn new(
        credentials: &StoreCredentials,
        table: &str,
        timeout_secs: u64,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("ratings-roster/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            table_url: format!("{}/rest/v1/{}", credentials.url, table),
            key: credentials.key.clone(),
        })
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        self.client
            .request(method, &self.table_url)
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::Status { status, body })
    }
}

#[async_trait]
impl FeedbackStore for RestStore {
    async fn recent(&self, limit: usize) -> Result<Vec<FeedbackEntry>, StoreError> {
        let limit = limit.to_string();
        let resp = self
            .request(reqwest::Method::GET)
            .query(&[
                ("select", COLUMNS),
                ("order", "created_at.desc"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;

        let rows: Vec<FeedbackEntry> = Self::check(resp).await?.json().await?;
        debug!("Fetched {} ratings", rows.len());
        Ok(rows)
    }

    async fn insert(&self, feedback: NewFeedback) -> Result<FeedbackEntry, StoreError> {
        let resp = self
            .request(reqwest::Method::POST)
            .query(&[("select", COLUMNS)])
            .header("Prefer", "return=representation")
            .json(&[feedback])
            .send()
            .await?;

        let rows: Vec<FeedbackEntry> = Self::check(resp).await?.json().await?;
        rows.into_iter().next().ok_or(StoreError::EmptyResponse)
    }
}
