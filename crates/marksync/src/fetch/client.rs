//! Rate-limited HTTP fetcher shared by the feed and the enricher.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, COOKIE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use url::Url;

use super::limiter::RateLimiter;
use super::retry::RetryPolicy;
use crate::auth::Credential;
use crate::config::Config;
use crate::error::{AuthErrorKind, Error, NetworkErrorKind};

/// Browser-like user agent; several sites refuse obvious bots.
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Largest enrichment body read, in bytes. Longer pages are truncated.
pub const MAX_ENRICHMENT_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Which request budget a call draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Bookmark feed pages. Strictly sequential, carries session cookies.
    Feed,
    /// Third-party pages linked from bookmarks.
    Enrichment,
}

/// Transport-level failure.
#[derive(Debug, Error)]
pub enum FetchError {
    /// 401/403 or a redirect to the login flow.
    #[error("authentication rejected by {url} (HTTP {status})")]
    Unauthorized { status: u16, url: String },

    /// HTTP 429.
    #[error("rate limited by {url}")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },

    /// Any other non-success status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// The request exceeded the configured timeout.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// DNS, TLS or connection failure.
    #[error("request to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The target is not a fetchable http(s) URL.
    #[error("unsupported URL: {0}")]
    Unsupported(String),

    /// An enrichment target answered with something other than HTML.
    #[error("non-HTML content from {url}: {content_type}")]
    NotHtml { url: String, content_type: String },

    /// Request could not be built.
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl FetchError {
    /// Retry classification: 429, 5xx, timeouts and connection failures.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Connect { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Unauthorized { .. }
            | Self::Unsupported(_)
            | Self::NotHtml { .. }
            | Self::Invalid(_) => false,
        }
    }

    /// Server-supplied minimum wait, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<FetchError> for Error {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Unauthorized { .. } => Error::auth(
                AuthErrorKind::Rejected,
                format!("{e}; session expired or revoked, re-import cookies"),
            ),
            e if e.is_transient() => Error::network(NetworkErrorKind::Transient, e.to_string()),
            e => Error::network(NetworkErrorKind::Permanent, e.to_string()),
        }
    }
}

/// Successful response with its body already read.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status.
    pub status: u16,
    /// URL after redirects.
    pub url: String,
    /// Response content type, if sent.
    pub content_type: Option<String>,
    /// Response body.
    pub body: String,
}

struct Lane {
    limiter: RateLimiter,
    permits: Semaphore,
    retry: RetryPolicy,
}

/// Single entry point for every outbound request.
///
/// Each [`RequestKind`] has its own limiter, concurrency cap and retry policy.
/// Session cookies are attached to feed requests only.
pub struct Fetcher {
    client: Client,
    feed_headers: HeaderMap,
    feed: Lane,
    enrichment: Lane,
}

impl Fetcher {
    /// Build a fetcher from runtime configuration.
    pub fn new(config: &Config) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| Error::network(NetworkErrorKind::Permanent, e.to_string()))?;

        let mut feed_headers = HeaderMap::new();
        if let Some(token) = &config.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| Error::InvalidInput("bearer token contains invalid characters".into()))?;
            feed_headers.insert(AUTHORIZATION, value);
        }

        Ok(Self {
            client,
            feed_headers,
            feed: Lane {
                limiter: RateLimiter::new(config.feed_interval),
                permits: Semaphore::new(1),
                retry: RetryPolicy::default(),
            },
            enrichment: Lane {
                limiter: RateLimiter::new(config.enrich_interval),
                permits: Semaphore::new(config.enrich_concurrency.max(1)),
                retry: RetryPolicy::enrichment(),
            },
        })
    }

    /// Attach session cookies and CSRF headers to feed requests.
    pub fn with_credential(mut self, credential: &Credential) -> crate::Result<Self> {
        let invalid =
            || Error::auth(AuthErrorKind::NotFound, "session contains invalid cookie characters");

        let cookie = HeaderValue::from_str(&credential.cookie_header()).map_err(|_| invalid())?;
        self.feed_headers.insert(COOKIE, cookie);

        if let Some(csrf) = &credential.csrf_token {
            let value = HeaderValue::from_str(csrf).map_err(|_| invalid())?;
            self.feed_headers.insert("x-csrf-token", value);
        }
        self.feed_headers.insert(
            "x-twitter-auth-type",
            HeaderValue::from_static("OAuth2Session"),
        );
        self.feed_headers
            .insert("x-twitter-active-user", HeaderValue::from_static("yes"));
        Ok(self)
    }

    /// Replace the retry policy for one request kind.
    #[must_use]
    pub fn with_retry_policy(mut self, kind: RequestKind, policy: RetryPolicy) -> Self {
        match kind {
            RequestKind::Feed => self.feed.retry = policy,
            RequestKind::Enrichment => self.enrichment.retry = policy,
        }
        self
    }

    /// Wrap in an `Arc` for sharing between the paginator and enricher.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Fetch `target`, retrying transient failures per the kind's policy.
    pub async fn request(&self, target: &str, kind: RequestKind) -> Result<FetchResponse, FetchError> {
        let url = &parse_target(target)?;
        let lane = self.lane(kind);

        lane.retry
            .run(target, move || async move {
                let _permit = lane
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| FetchError::Invalid("fetcher is shutting down".to_string()))?;
                lane.limiter.acquire().await;
                self.send_once(url.clone(), kind).await
            })
            .await
    }

    fn lane(&self, kind: RequestKind) -> &Lane {
        match kind {
            RequestKind::Feed => &self.feed,
            RequestKind::Enrichment => &self.enrichment,
        }
    }

    async fn send_once(&self, url: Url, kind: RequestKind) -> Result<FetchResponse, FetchError> {
        let target = url.to_string();
        let mut request = self.client.get(url);
        if kind == RequestKind::Feed {
            request = request.headers(self.feed_headers.clone());
        }

        tracing::debug!(url = %target, ?kind, "Sending request");
        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(&target, e))?;

        let status = response.status();
        let final_url = response.url().to_string();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Unauthorized {
                status: status.as_u16(),
                url: final_url,
            });
        }
        if kind == RequestKind::Feed && is_login_redirect(&final_url) {
            tracing::error!(
                url = %final_url,
                "Redirected to login - session cookies are invalid or expired"
            );
            return Err(FetchError::Unauthorized {
                status: status.as_u16(),
                url: final_url,
            });
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FetchError::RateLimited {
                url: final_url,
                retry_after,
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match kind {
            RequestKind::Feed => response
                .text()
                .await
                .map_err(|e| classify_transport(&final_url, e))?,
            RequestKind::Enrichment => {
                if let Some(ct) = content_type.as_deref().filter(|ct| !is_html(ct)) {
                    return Err(FetchError::NotHtml {
                        url: final_url,
                        content_type: ct.to_string(),
                    });
                }
                read_capped(response, &final_url, MAX_ENRICHMENT_BODY_BYTES).await?
            }
        };

        Ok(FetchResponse {
            status: status.as_u16(),
            url: final_url,
            content_type,
            body,
        })
    }
}

/// Read at most `limit` bytes of the body, decoding lossily as UTF-8.
async fn read_capped(
    mut response: reqwest::Response,
    url: &str,
    limit: usize,
) -> Result<String, FetchError> {
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| classify_transport(url, e))?
    {
        let take = chunk.len().min(limit - body.len());
        body.extend_from_slice(&chunk[..take]);
        if body.len() >= limit {
            tracing::debug!(url, limit, "Truncated oversized response body");
            break;
        }
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Whether a content type denotes an HTML document.
fn is_html(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("text/html") || ct.contains("application/xhtml")
}

fn parse_target(target: &str) -> Result<Url, FetchError> {
    let url = Url::parse(target).map_err(|_| FetchError::Unsupported(target.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(FetchError::Unsupported(target.to_string())),
    }
}

fn classify_transport(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if e.is_builder() {
        FetchError::Invalid(e.to_string())
    } else {
        FetchError::Connect {
            url: url.to_string(),
            source: e,
        }
    }
}

fn is_login_redirect(url: &str) -> bool {
    Url::parse(url).is_ok_and(|u| {
        let path = u.path();
        path.contains("/login") || path.contains("/i/flow")
    })
}
