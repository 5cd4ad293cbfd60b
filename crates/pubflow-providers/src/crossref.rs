//! Crossref deposit endpoint.
//!
//! Deposits are an HTTPS POST of `multipart/form-data` with fields
//! `operation=doMDUpload`, `login_id`, `login_passwd` and the document as a
//! file part named `file`. Success is exactly HTTP 200; the response body
//! is recorded verbatim per file for the admin email detail log.

use async_trait::async_trait;
use parking_lot::Mutex;

/// Error performing a deposit request (transport level only; a non-200
/// response is a result, not an error).
#[derive(Debug, thiserror::Error)]
#[error("crossref transport error: {0}")]
pub struct CrossrefError(String);

/// Outcome of depositing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositResult {
    pub file_name: String,
    pub status: u16,
    pub body: String,
}

impl DepositResult {
    pub fn success(&self) -> bool {
        self.status == 200
    }

    /// Lines recorded in the admin email detail log.
    pub fn detail_lines(&self) -> Vec<String> {
        vec![
            format!("XML file: {}", self.file_name),
            format!("HTTP status: {}", self.status),
            format!("HTTP response: {}", self.body),
        ]
    }
}

/// Seam the deposit pipelines publish through.
#[async_trait]
pub trait DepositEndpoint: Send + Sync + 'static {
    async fn deposit_file(
        &self,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<DepositResult, CrossrefError>;
}

/// HTTP implementation against the configured Crossref URL.
pub struct CrossrefClient {
    client: reqwest::Client,
    url: String,
    login_id: String,
    login_passwd: String,
}

impl CrossrefClient {
    pub fn new(
        url: impl Into<String>,
        login_id: impl Into<String>,
        login_passwd: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            login_id: login_id.into(),
            login_passwd: login_passwd.into(),
        }
    }
}

#[async_trait]
impl DepositEndpoint for CrossrefClient {
    async fn deposit_file(
        &self,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<DepositResult, CrossrefError> {
        let part = reqwest::multipart::Part::bytes(content).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .text("operation", "doMDUpload")
            .text("login_id", self.login_id.clone())
            .text("login_passwd", self.login_passwd.clone())
            .part("file", part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|err| CrossrefError(err.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(DepositResult {
            file_name: file_name.to_string(),
            status,
            body,
        })
    }
}

/// Recording endpoint for tests: returns a configurable status.
pub struct MemoryDepositEndpoint {
    status: u16,
    deposits: Mutex<Vec<String>>,
}

impl MemoryDepositEndpoint {
    pub fn accepting() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            deposits: Mutex::new(Vec::new()),
        }
    }

    /// File names deposited so far.
    pub fn deposited(&self) -> Vec<String> {
        self.deposits.lock().clone()
    }
}

#[async_trait]
impl DepositEndpoint for MemoryDepositEndpoint {
    async fn deposit_file(
        &self,
        file_name: &str,
        _content: Vec<u8>,
    ) -> Result<DepositResult, CrossrefError> {
        self.deposits.lock().push(file_name.to_string());
        Ok(DepositResult {
            file_name: file_name.to_string(),
            status: self.status,
            body: if self.status == 200 {
                "<doi_batch_diagnostic status=\"completed\"/>".into()
            } else {
                "server error".into()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_endpoint_records_and_classifies() {
        let endpoint = MemoryDepositEndpoint::accepting();
        let result = endpoint
            .deposit_file("crossref-29353.xml", b"<doi_batch/>".to_vec())
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(endpoint.deposited(), vec!["crossref-29353.xml"]);
    }

    #[tokio::test]
    async fn non_200_is_a_result_not_an_error() {
        let endpoint = MemoryDepositEndpoint::with_status(503);
        let result = endpoint
            .deposit_file("crossref-29353.xml", vec![])
            .await
            .unwrap();
        assert!(!result.success());
        assert_eq!(result.status, 503);
    }

    #[test]
    fn detail_lines_record_the_response_verbatim() {
        let result = DepositResult {
            file_name: "crossref-29353.xml".into(),
            status: 200,
            body: "ok".into(),
        };
        assert_eq!(
            result.detail_lines(),
            vec![
                "XML file: crossref-29353.xml",
                "HTTP status: 200",
                "HTTP response: ok",
            ]
        );
    }
}
