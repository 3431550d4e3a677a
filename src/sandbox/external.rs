//! Outbound network access confined to an allowlist and a per-domain
//! call budget.
//!
//! Matching is done on DNS label boundaries: an allowlisted
//! `wikipedia.org` admits `wikipedia.org` and `en.wikipedia.org`, but
//! not `notwikipedia.org` or `wikipedia.org.evil.com`.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use url::{Host, Url};

use super::audit::{AuditEntry, AuditRecorder, Operation};
use super::context::ExecutionContext;
use super::error::{HarnessError, Result};
use super::fetch::{FetchSettings, FetchedPage, HttpFetcher, Response, MAX_REDIRECTS};

/// Audit model name for outbound calls.
const EXTERNAL_MODEL: &str = "url";

/// Outcome of the pure allowlist check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlCheck {
    /// Permitted; `domain` is the allowlist entry that matched.
    Allowed { domain: String },
    Denied { reason: &'static str },
}

impl UrlCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, UrlCheck::Allowed { .. })
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            UrlCheck::Allowed { .. } => None,
            UrlCheck::Denied { reason } => Some(reason),
        }
    }
}

/// Canonical form of an allowlist entry: lowercase, no surrounding dots,
/// no `*.` wildcard prefix. Returns `None` for entries that are not bare
/// host names.
pub(crate) fn normalize_domain(raw: &str) -> Option<String> {
    let mut domain = raw.trim().to_ascii_lowercase();
    if let Some(rest) = domain.strip_prefix("*.") {
        domain = rest.to_string();
    }
    let domain = domain.trim_matches('.');
    let valid = !domain.is_empty()
        && !domain.contains("..")
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    valid.then(|| domain.to_string())
}

/// Most specific allowlist entry covering `url`'s host.
fn match_allowlist(allowed: &BTreeSet<String>, url: &Url) -> Option<String> {
    match url.host()? {
        Host::Domain(host) => {
            let host = host.trim_end_matches('.').to_ascii_lowercase();
            allowed
                .iter()
                .filter(|entry| {
                    host == **entry
                        || host
                            .strip_suffix(entry.as_str())
                            .is_some_and(|prefix| prefix.ends_with('.'))
                })
                .max_by_key(|entry| entry.len())
                .cloned()
        }
        // IP literals never inherit from a parent domain
        Host::Ipv4(ip) => {
            let ip = ip.to_string();
            allowed.contains(&ip).then_some(ip)
        }
        Host::Ipv6(_) => None,
    }
}

fn check_url(allowed: &BTreeSet<String>, raw: &str) -> UrlCheck {
    let Ok(url) = Url::parse(raw) else {
        return UrlCheck::Denied { reason: "invalid url" };
    };
    if !matches!(url.scheme(), "http" | "https") {
        return UrlCheck::Denied {
            reason: "unsupported scheme",
        };
    }
    if url.host().is_none() {
        return UrlCheck::Denied { reason: "invalid url" };
    }
    match match_allowlist(allowed, &url) {
        Some(domain) => UrlCheck::Allowed { domain },
        None => UrlCheck::Denied {
            reason: "domain not in allowlist",
        },
    }
}

pub struct ExternalCallMediator {
    context: Arc<ExecutionContext>,
    audit: AuditRecorder,
    counters: Mutex<HashMap<String, u32>>,
    fetcher: HttpFetcher,
}

impl ExternalCallMediator {
    pub(crate) fn new(context: Arc<ExecutionContext>, audit: AuditRecorder, settings: FetchSettings) -> Self {
        Self {
            context,
            audit,
            counters: Mutex::new(HashMap::new()),
            fetcher: HttpFetcher::new(settings),
        }
    }

    /// Pure allowlist check. Records nothing and consumes no budget.
    pub fn is_allowed(&self, url: &str) -> UrlCheck {
        check_url(self.context.allowed_external_domains(), url)
    }

    /// Approves one outbound call to `url`, charging it to the matched
    /// domain's budget. Returns the matched allowlist entry.
    ///
    /// The call that pushes a domain past `rate_limit_per_domain` is itself
    /// rejected, so exactly that many calls succeed per domain.
    pub fn check_and_record(&self, url: &str) -> Result<String> {
        self.approve(url, None)
    }

    /// Approves, records, then performs a blocking GET and extracts text.
    ///
    /// Every redirect hop is a separate call: it is checked against the
    /// allowlist, charged to its own domain and recorded with
    /// `redirected_from`. At most `MAX_REDIRECTS` hops are followed.
    /// Transport failures surface as [`HarnessError::Network`]; the hop
    /// has already been recorded as allowed by then.
    pub fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let mut current = url.to_string();
        let mut previous: Option<String> = None;
        for _ in 0..=MAX_REDIRECTS {
            self.approve(&current, previous.as_deref())?;
            match self.fetcher.get(&current).map_err(HarnessError::Network)? {
                Response::Page(page) => return Ok(page),
                Response::Redirect(next) => {
                    previous = Some(std::mem::replace(&mut current, next.to_string()));
                }
            }
        }
        Err(HarnessError::Network(format!(
            "too many redirects (more than {MAX_REDIRECTS})"
        )))
    }

    fn approve(&self, url: &str, redirected_from: Option<&str>) -> Result<String> {
        let annotate = |entry: AuditEntry| match redirected_from {
            Some(from) => entry.with_detail("redirected_from", from),
            None => entry,
        };

        let domain = match self.is_allowed(url) {
            UrlCheck::Allowed { domain } => domain,
            UrlCheck::Denied { reason } => {
                self.audit.record(annotate(
                    AuditEntry::blocked(Operation::ExternalCall, EXTERNAL_MODEL, reason).with_object(url),
                ));
                return Err(HarnessError::Policy(reason.to_string()));
            }
        };

        let count = {
            let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
            let count = counters.entry(domain.clone()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };

        let limit = self.context.rate_limit_per_domain();
        if count > limit {
            self.audit.record(annotate(
                AuditEntry::blocked(Operation::ExternalCall, EXTERNAL_MODEL, "rate limit exceeded")
                    .with_object(url)
                    .with_detail("domain", domain.as_str())
                    .with_detail("limit", limit),
            ));
            return Err(HarnessError::Quota("rate limit exceeded".to_string()));
        }

        self.audit.record(annotate(
            AuditEntry::allowed(Operation::ExternalCall, EXTERNAL_MODEL)
                .with_object(url)
                .with_detail("domain", domain.as_str())
                .with_detail("call", count),
        ));
        Ok(domain)
    }

    /// Calls charged so far to the allowlist entry `domain`, including a
    /// rejected call that tipped it over the limit.
    pub fn calls_to(&self, domain: &str) -> u32 {
        let Some(domain) = normalize_domain(domain) else {
            return 0;
        };
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&domain)
            .copied()
            .unwrap_or(0)
    }
}
