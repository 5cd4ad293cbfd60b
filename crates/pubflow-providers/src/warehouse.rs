//! Data-warehouse manuscript lookup.
//!
//! The peer-review deposit needs review dates that only the analytics
//! warehouse holds, keyed by DOI. The query surface is one typed lookup; a
//! missing manuscript is an absence, not an error.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

/// Review-related dates for one manuscript.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ManuscriptDates {
    pub doi: String,
    #[serde(default)]
    pub decision_letter_date: Option<String>,
    #[serde(default)]
    pub author_response_date: Option<String>,
}

/// Review date for a sub-article type, from the manuscript dates.
pub fn review_date(dates: &ManuscriptDates, article_type: &str) -> Option<String> {
    match article_type {
        "decision-letter" | "editor-report" | "referee-report" => {
            dates.decision_letter_date.clone()
        }
        "reply" => dates.author_response_date.clone(),
        _ => None,
    }
}

/// Seam the peer-review deposit reads manuscript data through.
#[async_trait]
pub trait ManuscriptSource: Send + Sync + 'static {
    async fn manuscript_dates(&self, doi: &str) -> Option<ManuscriptDates>;
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    rows: Vec<ManuscriptDates>,
}

/// HTTP implementation posting a parameterized query with a bearer token.
pub struct HttpWarehouse {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl HttpWarehouse {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl ManuscriptSource for HttpWarehouse {
    async fn manuscript_dates(&self, doi: &str) -> Option<ManuscriptDates> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "doi": doi }))
            .send()
            .await;

        let response = match response {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::info!(%doi, status = %response.status(), "no manuscript data");
                return None;
            }
            Err(err) => {
                tracing::error!(%doi, "warehouse query failed: {err}");
                return None;
            }
        };

        match response.json::<QueryResponse>().await {
            Ok(body) => body.rows.into_iter().next(),
            Err(err) => {
                tracing::error!(%doi, "warehouse response did not parse: {err}");
                None
            }
        }
    }
}

/// Fixed map of manuscripts for tests.
#[derive(Default)]
pub struct FixedWarehouse {
    manuscripts: HashMap<String, ManuscriptDates>,
}

impl FixedWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manuscript(mut self, dates: ManuscriptDates) -> Self {
        self.manuscripts.insert(dates.doi.clone(), dates);
        self
    }
}

#[async_trait]
impl ManuscriptSource for FixedWarehouse {
    async fn manuscript_dates(&self, doi: &str) -> Option<ManuscriptDates> {
        self.manuscripts.get(doi).cloned()
    }
}

/// Source with no data, for deployments without a warehouse.
pub struct NullWarehouse;

#[async_trait]
impl ManuscriptSource for NullWarehouse {
    async fn manuscript_dates(&self, _doi: &str) -> Option<ManuscriptDates> {
        None
    }
}
