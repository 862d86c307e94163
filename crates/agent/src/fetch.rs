use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;
use tracing::debug;

use perch_core::text::truncate_chars;

const MIN_TEXT_CHARS: usize = 50;

/// Longest document text handed to the model.
pub const MAX_DOCUMENT_CHARS: usize = 4096;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("unsafe url: {0}")]
    Unsafe(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP error: {0}")]
    Status(u16),
    #[error("failed to extract meaningful content")]
    Extract,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    pub title: String,
    pub text: String,
}

#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Document, FetchError>;
}

/// Fetches pages over HTTPS after checking that the host is a public,
/// fully qualified domain name.
pub struct HttpDocumentFetcher {
    client: reqwest::Client,
    max_chars: usize,
}

impl HttpDocumentFetcher {
    pub fn new(timeout: Duration, max_chars: usize) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(Self { client, max_chars })
    }
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch(&self, url: &str) -> Result<Document, FetchError> {
        let url = check_url_safety(url).await?;
        debug!(event_name = "fetch.document.started", url = %url, "fetching document");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let body = response.text().await.map_err(|e| FetchError::Request(e.to_string()))?;
        let document = extract_document(&body).ok_or(FetchError::Extract)?;
        Ok(Document {
            title: document.title,
            text: truncate_chars(&document.text, self.max_chars).to_string(),
        })
    }
}

/// Accepts only `https` URLs whose host is a domain name (not an IP
/// literal) with at least two labels and no private DNS answers.
pub async fn check_url_safety(input: &str) -> Result<Url, FetchError> {
    let url = check_url_shape(input)?;
    let host = url.host_str().unwrap_or_default().to_string();
    let port = url.port_or_known_default().unwrap_or(443);

    let addresses: Vec<_> = tokio::net::lookup_host(format!("{host}:{port}"))
        .await
        .map_err(|e| FetchError::Unsafe(format!("DNS resolution failed for {host}: {e}")))?
        .collect();
    if addresses.is_empty() {
        return Err(FetchError::Unsafe(format!("DNS resolution failed for {host}")));
    }
    if let Some(address) = addresses.iter().find(|address| is_private_ip(&address.ip())) {
        return Err(FetchError::Unsafe(format!("{host} resolves to private address {}", address.ip())));
    }
    Ok(url)
}

fn check_url_shape(input: &str) -> Result<Url, FetchError> {
    let url = Url::parse(input.trim()).map_err(|e| FetchError::Unsafe(e.to_string()))?;
    if url.scheme() != "https" {
        return Err(FetchError::Unsafe(format!("unsupported scheme `{}`", url.scheme())));
    }

    let host = url.host_str().ok_or_else(|| FetchError::Unsafe("url has no host".to_string()))?;
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() {
        return Err(FetchError::Unsafe(format!("{host} is not a hostname")));
    }
    if !is_fqdn(host) {
        return Err(FetchError::Unsafe(format!("{host} is not a fully qualified domain name")));
    }
    Ok(url)
}

fn is_fqdn(host: &str) -> bool {
    let host = host.trim_end_matches('.');
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    let valid_label = |label: &&str| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    };
    let tld_ok = labels
        .last()
        .is_some_and(|tld| tld.len() >= 2 && !tld.chars().all(|c| c.is_ascii_digit()));
    labels.iter().all(valid_label) && tld_ok
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || (octets[0] == 100 && (octets[1] & 0xC0) == 64)
                || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xFE00) == 0xFC00
                || (v6.segments()[0] & 0xFFC0) == 0xFE80
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(&IpAddr::V4(v4)))
        }
    }
}

/// Pulls the `<title>` and the readable body text out of an HTML page.
/// Returns `None` when either is missing or the text is too short to be
/// worth commenting on.
pub fn extract_document(html: &str) -> Option<Document> {
    let lower = html.to_ascii_lowercase();
    let title = {
        let start = lower.find("<title")?;
        let open_end = start + lower[start..].find('>')? + 1;
        let close = open_end + lower[open_end..].find("</title>")?;
        collapse_whitespace(&decode_entities(&html[open_end..close]))
    };
    if title.is_empty() {
        return None;
    }

    let body_start = lower.find("<body").unwrap_or(0);
    let text = html_to_text(&html[body_start..]);
    (text.chars().count() >= MIN_TEXT_CHARS).then_some(Document { title, text })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Strips tags, skipping `script`, `style` and `noscript` content.
fn html_to_text(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let mut text = String::with_capacity(html.len() / 2);
    let mut cursor = 0;

    while let Some(offset) = html[cursor..].find('<') {
        let tag_start = cursor + offset;
        text.push_str(&html[cursor..tag_start]);
        text.push(' ');

        let skipped_until = ["script", "style", "noscript"].iter().find_map(|name| {
            let opener = format!("<{name}");
            lower[tag_start..].starts_with(&opener).then(|| {
                let closer = format!("</{name}>");
                lower[tag_start..].find(&closer).map(|end| tag_start + end + closer.len())
            })
        });

        cursor = match skipped_until {
            Some(Some(end)) => end,
            Some(None) => html.len(),
            None => match html[tag_start..].find('>') {
                Some(end) => tag_start + end + 1,
                None => html.len(),
            },
        };
    }
    text.push_str(&html[cursor..]);

    collapse_whitespace(&decode_entities(&text))
}
