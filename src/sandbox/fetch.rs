//! Blocking HTTP transport behind [`ExternalCallMediator::fetch`].
//!
//! Only reached after the mediator has approved and recorded the call.
//! The client never follows redirects itself: a redirect comes back as
//! [`Response::Redirect`] and the mediator approves the next hop like any
//! other call.
//!
//! [`ExternalCallMediator::fetch`]: super::external::ExternalCallMediator::fetch

use std::io::Read;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::redirect;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Text wrapping width for html2text conversion.
const TEXT_WIDTH: usize = 100;

/// Redirect hops followed before giving up.
pub(crate) const MAX_REDIRECTS: usize = 5;

const DEFAULT_USER_AGENT: &str = concat!("SkillHarness/", env!("CARGO_PKG_VERSION"));

/// Transport limits for mediated fetches.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FetchSettings {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Maximum raw response body size.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
    /// Maximum extracted text handed back to the skill (in characters).
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_response_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_max_text_chars() -> usize {
    20_000
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_response_bytes: default_max_response_bytes(),
            max_text_chars: default_max_text_chars(),
        }
    }
}

/// Text extracted from a fetched URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub content_type: String,
    pub text: String,
    pub truncated: bool,
}

impl FetchedPage {
    /// Renders the page for inclusion in a model prompt.
    pub fn to_prompt_text(&self) -> String {
        let mut output = format!("Content from: {}\n\n", self.url);
        if self.text.is_empty() {
            output.push_str("[No text content extracted]");
            return output;
        }
        output.push_str(&self.text);
        if self.truncated {
            output.push_str(&format!("\n\n[Content truncated at {} characters]", self.text.chars().count()));
        }
        output
    }
}

/// Outcome of a single request.
#[derive(Debug)]
pub(crate) enum Response {
    Page(FetchedPage),
    /// 3xx with a `Location`, resolved against the request URL.
    Redirect(Url),
}

pub(crate) struct HttpFetcher {
    settings: FetchSettings,
    client: OnceLock<Client>,
}

impl HttpFetcher {
    pub(crate) fn new(settings: FetchSettings) -> Self {
        Self {
            settings,
            client: OnceLock::new(),
        }
    }

    /// The client is built on first use, so runs that never fetch never
    /// construct one.
    fn client(&self) -> Result<&Client, String> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(self.settings.timeout_secs))
            .connect_timeout(Duration::from_secs(self.settings.connect_timeout_secs))
            .user_agent(self.settings.user_agent.clone())
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(self.client.get_or_init(|| client))
    }

    /// Sends exactly one GET to `url`.
    pub(crate) fn get(&self, url: &str) -> Result<Response, String> {
        debug!("Fetching URL: {url}");
        let response = self.client()?.get(url).send().map_err(|e| e.to_string())?;

        if response.status().is_redirection() {
            if let Some(location) = response.headers().get(reqwest::header::LOCATION) {
                let location = location
                    .to_str()
                    .map_err(|_| "redirect with non-ASCII location".to_string())?;
                let next = response
                    .url()
                    .join(location)
                    .map_err(|e| format!("invalid redirect location '{location}': {e}"))?;
                debug!("Redirected: {url} -> {next}");
                return Ok(Response::Redirect(next));
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }

        let limit = self.settings.max_response_bytes;
        if let Some(len) = response.content_length() {
            if len > limit as u64 {
                return Err(format!("response too large ({len} bytes, limit is {limit} bytes)"));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        // Content-Length can be absent or wrong, so cap the read itself
        let mut body = Vec::new();
        response
            .take(limit as u64 + 1)
            .read_to_end(&mut body)
            .map_err(|e| format!("error reading response: {e}"))?;
        if body.len() > limit {
            return Err(format!("response too large (over {limit} bytes)"));
        }

        let extracted = extract_text(&content_type, &body);
        let (text, truncated) = truncate_chars(extracted.trim(), self.settings.max_text_chars);

        Ok(Response::Page(FetchedPage {
            url: url.to_string(),
            status: status.as_u16(),
            content_type,
            text,
            truncated,
        }))
    }
}

fn is_html(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("text/html") || ct.contains("application/xhtml")
}

fn is_text(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("text/") || ct.contains("json") || ct.contains("xml")
}

/// Extracts readable text from a response body.
fn extract_text(content_type: &str, body: &[u8]) -> String {
    if is_html(content_type) {
        return html2text::from_read(body, TEXT_WIDTH)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
    }
    let text = String::from_utf8_lossy(body);
    if !is_text(content_type) && text.chars().take(200).any(|c| c == '\0') {
        return format!("Cannot extract text from binary content ({content_type})");
    }
    text.into_owned()
}

/// Cuts `text` to at most `max` characters on a char boundary.
fn truncate_chars(text: &str, max: usize) -> (String, bool) {
    match text.char_indices().nth(max) {
        Some((idx, _)) => (text[..idx].to_string(), true),
        None => (text.to_string(), false),
    }
}
