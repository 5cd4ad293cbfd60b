//! CDN purge API.
//!
//! `POST {base}/service/{service_id}/purge/{surrogate_key}` with the
//! `Fastly-Key` header. An article purge touches the article page key and
//! its videos key across every configured service.

/// Error from a purge request.
#[derive(Debug, thiserror::Error)]
pub enum FastlyError {
    #[error("cdn purge transport error: {0}")]
    Transport(String),

    #[error("cdn purge rejected with status {0}")]
    Rejected(u16),
}

/// Surrogate keys for one article version.
pub fn surrogate_keys(article_id: &str, version: &str) -> Vec<String> {
    let padded = format!("{article_id:0>5}");
    vec![
        format!("articles/{padded}v{version}"),
        format!("articles/{padded}/videos"),
    ]
}

/// HTTP purge client.
pub struct FastlyClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl FastlyClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Purge one surrogate key on one service.
    pub async fn purge(&self, service_id: &str, surrogate_key: &str) -> Result<(), FastlyError> {
        let url = format!(
            "{}/service/{service_id}/purge/{surrogate_key}",
            self.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .header("Fastly-Key", &self.api_key)
            .send()
            .await
            .map_err(|err| FastlyError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FastlyError::Rejected(status.as_u16()));
        }
        Ok(())
    }

    /// Purge both article keys across all configured services.
    pub async fn purge_article(
        &self,
        service_ids: &[String],
        article_id: &str,
        version: &str,
    ) -> Result<(), FastlyError> {
        for service_id in service_ids {
            for key in surrogate_keys(article_id, version) {
                self.purge(service_id, &key).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surrogate_keys_pad_the_article_id() {
        assert_eq!(
            surrogate_keys("353", "1"),
            vec!["articles/00353v1", "articles/00353/videos"]
        );
    }

    #[test]
    fn surrogate_keys_keep_long_ids() {
        assert_eq!(
            surrogate_keys("202850", "2"),
            vec!["articles/202850v2", "articles/202850/videos"]
        );
    }
}
