//! Report submission
//!
//! [`ReportSink`] accepts one converted report at a time and reports
//! success or failure for it. [`HttpReportSink`] posts reports as JSON to the
//! report server.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::SinkConfig;
use crate::error::{ImportError, Result, SubmissionError};

/// Path reports are posted to, relative to the server URL
pub const REPORTS_PATH: &str = "/api/reports";

/// Destination for converted reports
#[async_trait]
pub trait ReportSink<R: Send + 'static>: Send + Sync {
    async fn submit(&self, report: R) -> std::result::Result<(), SubmissionError>;
}

/// Posts JSON reports to `<server_url>/api/reports`
#[derive(Debug, Clone)]
pub struct HttpReportSink {
    client: Client,
    endpoint: String,
    api_token: Option<String>,
}

impl HttpReportSink {
    pub fn new(config: &SinkConfig) -> Result<Self> {
        let base = config.server_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(ImportError::config("sink.server_url must not be empty"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ImportError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", base, REPORTS_PATH),
            api_token: Some(config.api_token.clone()).filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl<R> ReportSink<R> for HttpReportSink
where
    R: Serialize + Send + Sync + 'static,
{
    async fn submit(&self, report: R) -> std::result::Result<(), SubmissionError> {
        let mut request = self.client.post(&self.endpoint).json(&report);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SubmissionError::new(format!("request to {} failed: {}", self.endpoint, e)))?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "Report accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let detail = body.trim();
        let message = if detail.is_empty() {
            format!("server responded {}", status)
        } else {
            format!("server responded {}: {}", status, detail)
        };
        Err(SubmissionError::with_status(message, status.as_u16()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str, token: &str) -> SinkConfig {
        SinkConfig {
            server_url: url.to_string(),
            api_token: token.to_string(),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_submit_posts_json_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/reports"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({ "serial": "SN-1" })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpReportSink::new(&config(&format!("{}/", server.uri()), "secret")).unwrap();
        sink.submit(json!({ "serial": "SN-1" })).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejection_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/reports"))
            .respond_with(ResponseTemplate::new(422).set_body_string("unknown part number"))
            .mount(&server)
            .await;

        let sink = HttpReportSink::new(&config(&server.uri(), "")).unwrap();
        let err = sink.submit(json!({ "serial": "SN-2" })).await.unwrap_err();

        assert_eq!(err.status, Some(422));
        assert!(err.message.contains("unknown part number"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_submission_error() {
        let sink = HttpReportSink::new(&config("http://127.0.0.1:1", "")).unwrap();
        let err = sink.submit(json!({})).await.unwrap_err();
        assert_eq!(err.status, None);
    }

    #[test]
    fn test_empty_url_is_rejected() {
        assert!(HttpReportSink::new(&config("  ", "")).is_err());
    }
}
