//! # sitekit Net
//!
//! Request/response model and HTTP fetching for the sitekit cache router.
//!
//! ## Design Goals
//!
//! 1. **Browser-shaped requests**: destination, mode and credentials travel
//!    with every request so routing can classify it
//! 2. **Cloneable responses**: bodies are `Bytes`, so a response can be
//!    returned to the caller and stored at the same time
//! 3. **Fetcher seam**: the router only sees the [`Fetcher`] trait; the
//!    `reqwest`-backed [`ResourceLoader`] is one implementation

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use thiserror::Error;
use url::Url;

pub mod loader;

pub use loader::{LoaderConfig, ResourceLoader};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// What the request is for, as declared by the page (`Request.destination`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Destination {
    /// No declared destination (e.g. `fetch()` from script).
    #[default]
    Empty,
    Document,
    Image,
    Script,
    Style,
    Font,
    Manifest,
    Worker,
    Audio,
    Video,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "",
            Self::Document => "document",
            Self::Image => "image",
            Self::Script => "script",
            Self::Style => "style",
            Self::Font => "font",
            Self::Manifest => "manifest",
            Self::Worker => "worker",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Destination {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "" | "empty" => Self::Empty,
            "document" => Self::Document,
            "image" => Self::Image,
            "script" => Self::Script,
            "style" => Self::Style,
            "font" => Self::Font,
            "manifest" => Self::Manifest,
            "worker" => Self::Worker,
            "audio" => Self::Audio,
            "video" => Self::Video,
            other => {
                return Err(NetError::RequestFailed(format!(
                    "unknown destination: {other}"
                )))
            }
        })
    }
}

/// Request mode (`Request.mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level or frame navigation.
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

/// Credentials mode for requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialsMode {
    /// Never send cookies.
    Omit,
    /// Send cookies only for same-origin requests.
    #[default]
    SameOrigin,
    /// Always send cookies.
    Include,
}

impl FromStr for CredentialsMode {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "omit" => Ok(Self::Omit),
            "same-origin" => Ok(Self::SameOrigin),
            "include" => Ok(Self::Include),
            other => Err(NetError::RequestFailed(format!(
                "unknown credentials mode: {other}"
            ))),
        }
    }
}

/// An outgoing request as seen by the router.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
    pub destination: Destination,
    pub mode: RequestMode,
    pub credentials: CredentialsMode,
}

impl Request {
    /// Create a GET request with no declared destination.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            destination: Destination::Empty,
            mode: RequestMode::Cors,
            credentials: CredentialsMode::SameOrigin,
        }
    }

    /// Create a top-level navigation request.
    pub fn navigate(url: Url) -> Self {
        Self {
            destination: Destination::Document,
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Create a subresource request for the given destination.
    pub fn for_destination(url: Url, destination: Destination) -> Self {
        let mode = match destination {
            Destination::Image | Destination::Script | Destination::Style => RequestMode::NoCors,
            _ => RequestMode::Cors,
        };
        Self {
            destination,
            mode,
            ..Self::get(url)
        }
    }

    /// Set the HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the credentials mode.
    pub fn credentials(mut self, credentials: CredentialsMode) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Whether this request is a page navigation.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// ASCII serialization of the target origin, e.g. `https://modern-jan.com`.
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }
}

/// Response type (`Response.type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Basic,
    Cors,
    Opaque,
    /// A network error surfaced as a response object.
    Error,
}

/// HTTP response with a fully buffered body.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    pub body: Bytes,
}

impl Response {
    /// Create an empty basic response.
    pub fn new(url: Url, status: StatusCode) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            response_type: ResponseType::Basic,
            body: Bytes::new(),
        }
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Append a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether the response tries to set a cookie.
    pub fn has_set_cookie(&self) -> bool {
        self.headers.contains_key(header::SET_COOKIE)
    }

    /// Parsed Content-Type, if present and valid.
    pub fn content_type(&self) -> Option<Mime> {
        self.header(header::CONTENT_TYPE.as_str())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// Anything that can perform a network fetch for the router.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the request from the network.
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        (**self).fetch(request).await
    }
}
