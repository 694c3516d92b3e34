use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex_lite::Regex;
use reqwest::Url;

use super::ExtractionError;
use super::Extraction;
use super::ReceiptDocument;
use super::structured::FieldPatterns;
use super::structured::pdf_text;

/// Independent source for the "online" rendering of a receipt.
///
/// The structured extractor only trusts an identifier when this source
/// reports the same value as the document's embedded text.
#[async_trait]
pub trait OnlineReceiptSource: Send + Sync {
    async fn lookup(&self, document: &ReceiptDocument) -> Result<Extraction, ExtractionError>;
}

/// Follows the verification link printed on the receipt and reads the
/// identifier from the page the bank serves for it.
///
/// Only links whose host is in `allowed_hosts` (or a subdomain of one) are
/// fetched. The link comes from the uploaded document, so anything else is
/// treated as a foreign receipt.
#[derive(Debug, Clone)]
pub struct HttpReceiptLookup {
    client: reqwest::Client,
    url_pattern: Regex,
    allowed_hosts: Vec<String>,
    patterns: Arc<FieldPatterns>,
}

impl HttpReceiptLookup {
    pub fn new(
        url_pattern: Regex,
        allowed_hosts: Vec<String>,
        patterns: Arc<FieldPatterns>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self::with_client(client, url_pattern, allowed_hosts, patterns))
    }

    pub fn with_client(
        client: reqwest::Client,
        url_pattern: Regex,
        allowed_hosts: Vec<String>,
        patterns: Arc<FieldPatterns>,
    ) -> Self {
        let allowed_hosts = allowed_hosts
            .into_iter()
            .map(|host| host.trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|host| !host.is_empty())
            .collect();
        Self {
            client,
            url_pattern,
            allowed_hosts,
            patterns,
        }
    }

    /// First link in `text` that points at an allowed host.
    fn receipt_url(&self, text: &str) -> Result<Url, ExtractionError> {
        let raw = self
            .url_pattern
            .find(text)
            .ok_or_else(|| ExtractionError::mismatch("receipt has no verification link"))?
            .as_str();
        let url = Url::parse(raw)
            .map_err(|err| ExtractionError::mismatch(format!("verification link is malformed: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ExtractionError::mismatch(format!(
                "verification link uses unsupported scheme {}",
                url.scheme()
            )));
        }
        let host = url.host_str().unwrap_or_default();
        if !self.is_allowed(host) {
            tracing::warn!(%host, "refusing verification link to a host outside the allowlist");
            return Err(ExtractionError::mismatch(format!(
                "verification link host {host:?} is not an accepted bank"
            )));
        }
        Ok(url)
    }

    fn is_allowed(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        !host.is_empty()
            && self.allowed_hosts.iter().any(|allowed| {
                host == *allowed
                    || host
                        .strip_suffix(allowed.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            })
    }
}

#[async_trait]
impl OnlineReceiptSource for HttpReceiptLookup {
    async fn lookup(&self, document: &ReceiptDocument) -> Result<Extraction, ExtractionError> {
        let bytes = document.bytes.clone();
        let text = tokio::task::spawn_blocking(move || pdf_text(&bytes))
            .await
            .map_err(ExtractionError::parse)??;
        let url = self.receipt_url(&text)?;

        tracing::debug!(%url, "fetching online receipt");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| ExtractionError::parse(format!("online receipt unavailable: {err}")))?;
        let body = response
            .text()
            .await
            .map_err(|err| ExtractionError::parse(format!("online receipt unreadable: {err}")))?;
        self.patterns.extract(&strip_markup(&body))
    }
}

fn strip_markup(body: &str) -> String {
    let mut text = String::with_capacity(body.len());
    let mut in_tag = false;
    for c in body.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    text
}
