//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients that route through the Tor proxy
//! - Presenting the same headers as the Tor Browser
//! - Sending per-domain cookies
//! - Classifying failures

use crate::config::CrawlerConfig;
use crate::crawler::parser::parse_html;
use crate::state::CookieJar;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE, COOKIE,
    UPGRADE_INSECURE_REQUESTS,
};
use reqwest::{Client, Proxy};
use std::time::Duration;

/// Content types the crawler parses
const HTML_CONTENT_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

/// A successfully fetched and parsed page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    /// URL that was requested
    pub url: String,

    /// Page title, if it had one
    pub title: Option<String>,

    /// Body text, truncated to the configured maximum length
    pub text: String,

    /// Normalized, distinct outbound links
    pub links: Vec<String>,
}

/// Result of a fetch operation
#[derive(Debug)]
pub enum FetchResult {
    /// Successfully fetched the page
    Success(PageContent),

    /// Server answered with a non-success status
    HttpError {
        /// The HTTP status code
        status_code: u16,
    },

    /// Page is not HTML (Content-Type mismatch)
    ContentMismatch {
        /// The actual Content-Type received
        content_type: String,
    },

    /// Network error (proxy refused, timeout, onion service offline, ...)
    NetworkError {
        /// Error description
        error: String,
    },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Short description of a failure, suitable for the error archive
    pub fn describe_failure(&self) -> Option<String> {
        match self {
            Self::Success(_) => None,
            Self::HttpError { status_code } => Some(format!("HTTP {}", status_code)),
            Self::ContentMismatch { content_type } => {
                Some(format!("unsupported content type '{}'", content_type))
            }
            Self::NetworkError { error } => Some(error.clone()),
        }
    }
}

/// Builds an HTTP client configured like the Tor Browser
///
/// # Arguments
///
/// * `config` - Proxy, user agent and timeout settings
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Invalid proxy URL or TLS backend failure
///
/// # Example
///
/// ```no_run
/// use onion_crawler::config::CrawlerConfig;
/// use onion_crawler::crawler::build_http_client;
///
/// let client = build_http_client(&CrawlerConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &CrawlerConfig) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

    let mut builder = Client::builder()
        .user_agent(config.user_agent.as_str())
        .default_headers(headers)
        .timeout(config.request_timeout())
        .connect_timeout(config.request_timeout().min(Duration::from_secs(60)))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = config.proxy() {
        builder = builder.proxy(Proxy::all(proxy)?);
    } else {
        builder = builder.no_proxy();
    }

    builder.build()
}

/// Fetches and parses a single page
///
/// Only 2xx responses carrying HTML are parsed; every other outcome is a
/// failure variant so the caller can record it and move on.
///
/// # Arguments
///
/// * `client` - The HTTP client to use
/// * `url` - The URL to fetch
/// * `cookies` - Cookie table consulted for the URL's domain
/// * `max_content_length` - Maximum number of characters of body text kept
pub async fn fetch_page(
    client: &Client,
    url: &str,
    cookies: &CookieJar,
    max_content_length: usize,
) -> FetchResult {
    let mut request = client.get(url);
    if let Some(cookie) = cookies.header_for(url) {
        request = request.header(COOKIE, cookie);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => return classify_error(&e),
    };

    let status = response.status();
    if !status.is_success() {
        return FetchResult::HttpError {
            status_code: status.as_u16(),
        };
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    // A missing Content-Type is given the benefit of the doubt
    if !content_type.is_empty() && !is_html(&content_type) {
        return FetchResult::ContentMismatch { content_type };
    }

    let final_url = response.url().clone();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => return classify_error(&e),
    };

    let parsed = parse_html(&body, &final_url);

    FetchResult::Success(PageContent {
        url: url.to_string(),
        title: parsed.title,
        text: truncate_chars(parsed.text, max_content_length),
        links: parsed.links,
    })
}

fn is_html(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    HTML_CONTENT_TYPES.contains(&mime.as_str())
}

fn classify_error(e: &reqwest::Error) -> FetchResult {
    let error = if e.is_timeout() {
        "Request timeout".to_string()
    } else if e.is_connect() {
        format!("Connection failed: {}", e)
    } else if e.is_redirect() {
        format!("Redirect error: {}", e)
    } else {
        e.to_string()
    };
    FetchResult::NetworkError { error }
}

fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((byte_index, _)) = text.char_indices().nth(max_chars) {
        text.truncate(byte_index);
    }
    text
}
