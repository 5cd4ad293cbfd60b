//! Article-versions service client ("Lax").
//!
//! `GET {base}/{article_id}/version/` returns `{"versions": [...]}`.
//! HTTP 404 is not an error: it means "no versions yet". Any other non-200
//! is logged and callers receive `None` from the derived lookups.

use async_trait::async_trait;
use serde::Deserialize;

/// One version entry of an article.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VersionRecord {
    pub version: u32,
    pub status: String,
    #[serde(default)]
    pub published: Option<String>,
    #[serde(default, rename = "versionDate")]
    pub version_date: Option<String>,
}

/// Result of one versions lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum VersionsResult {
    Found(Vec<VersionRecord>),
    /// HTTP 404: the article has no versions yet.
    NoVersions,
    /// Any other non-200, or a transport failure (status 0).
    Unavailable(u16),
}

#[derive(Deserialize)]
struct VersionsBody {
    #[serde(default)]
    versions: Vec<VersionRecord>,
}

/// The lookups pipelines run against the article-versions service.
///
/// The derived lookups are default methods over [`versions`] so fakes only
/// implement the fetch.
#[async_trait]
pub trait ArticleVersions: Send + Sync + 'static {
    async fn versions(&self, article_id: &str) -> VersionsResult;

    /// Highest known version: `"1"` when there are no versions yet, `None`
    /// when the service was unavailable, otherwise the maximum version.
    async fn highest_version(&self, article_id: &str) -> Option<String> {
        highest_version(&self.versions(article_id).await)
    }

    /// The version after the highest known one; `"-1"` when the highest is
    /// unknown, which callers treat as an input-shape failure.
    async fn next_version(&self, article_id: &str) -> String {
        next_version(&self.versions(article_id).await)
    }

    /// Publication date of version 1 as a `YYYYMMDDHHMMSS` stamp.
    async fn publication_date(&self, article_id: &str) -> Option<String> {
        publication_date(&self.versions(article_id).await)
    }

    /// The lowest version carrying the given status, if any.
    async fn first_version_with_status(&self, article_id: &str, status: &str) -> Option<u32> {
        first_version_with_status(&self.versions(article_id).await, status)
    }
}

/// See [`ArticleVersions::highest_version`].
pub fn highest_version(result: &VersionsResult) -> Option<String> {
    match result {
        VersionsResult::Found(versions) => {
            let high = versions.iter().map(|v| v.version).max().unwrap_or(0);
            Some(high.to_string())
        }
        VersionsResult::NoVersions => Some("1".to_string()),
        VersionsResult::Unavailable(_) => None,
    }
}

/// See [`ArticleVersions::next_version`].
pub fn next_version(result: &VersionsResult) -> String {
    match highest_version(result).and_then(|v| v.parse::<u32>().ok()) {
        Some(high) => (high + 1).to_string(),
        None => "-1".to_string(),
    }
}

/// See [`ArticleVersions::publication_date`].
pub fn publication_date(result: &VersionsResult) -> Option<String> {
    let VersionsResult::Found(versions) = result else {
        return None;
    };
    let first = versions.iter().find(|v| v.version == 1)?;
    let published = first.published.as_deref()?;
    let parsed = chrono::NaiveDateTime::parse_from_str(published, "%Y-%m-%dT%H:%M:%SZ").ok()?;
    Some(parsed.format("%Y%m%d%H%M%S").to_string())
}

/// See [`ArticleVersions::first_version_with_status`].
pub fn first_version_with_status(result: &VersionsResult, status: &str) -> Option<u32> {
    let VersionsResult::Found(versions) = result else {
        return None;
    };
    versions
        .iter()
        .filter(|v| v.status == status)
        .map(|v| v.version)
        .min()
}

/// Whether the article has poa and vor versions at all.
pub fn poa_vor_status(result: &VersionsResult) -> (bool, bool) {
    match result {
        VersionsResult::Found(versions) => (
            versions.iter().any(|v| v.status == "poa"),
            versions.iter().any(|v| v.status == "vor"),
        ),
        _ => (false, false),
    }
}

/// HTTP implementation.
pub struct HttpArticleVersions {
    client: reqwest::Client,
    /// URL template; `{article_id}` is substituted.
    url_template: String,
}

impl HttpArticleVersions {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url_template: url_template.into(),
        }
    }
}

#[async_trait]
impl ArticleVersions for HttpArticleVersions {
    async fn versions(&self, article_id: &str) -> VersionsResult {
        let url = self.url_template.replace("{article_id}", article_id);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(%article_id, "article-versions request failed: {err}");
                return VersionsResult::Unavailable(0);
            }
        };

        match response.status().as_u16() {
            200 => match response.json::<VersionsBody>().await {
                Ok(body) => VersionsResult::Found(body.versions),
                Err(err) => {
                    tracing::error!(%article_id, "article-versions body did not parse: {err}");
                    VersionsResult::Unavailable(200)
                }
            },
            404 => VersionsResult::NoVersions,
            status => {
                tracing::error!(%article_id, status, "error obtaining version information");
                VersionsResult::Unavailable(status)
            }
        }
    }
}

/// Fake returning a fixed result, for tests.
pub struct FixedArticleVersions {
    result: VersionsResult,
}

impl FixedArticleVersions {
    pub fn new(result: VersionsResult) -> Self {
        Self { result }
    }

    /// Shortcut: a single published vor version.
    pub fn single_vor(version: u32, published: &str) -> Self {
        Self::new(VersionsResult::Found(vec![VersionRecord {
            version,
            status: "vor".into(),
            published: Some(published.to_string()),
            version_date: None,
        }]))
    }
}

#[async_trait]
impl ArticleVersions for FixedArticleVersions {
    async fn versions(&self, _article_id: &str) -> VersionsResult {
        self.result.clone()
    }
}
