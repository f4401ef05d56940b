//! `reqwest`-backed [`Fetcher`] implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, trace};

use crate::{CredentialsMode, Fetcher, NetError, Request, Response, ResponseType};

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Default timeout, applied when the request carries none.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
    /// Keep a cookie jar for requests that allow credentials.
    pub cookies_enabled: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("sitekit/{}", env!("CARGO_PKG_VERSION")),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
            cookies_enabled: true,
        }
    }
}

/// Resource loader for fetching URLs over HTTP(S).
///
/// Requests with `credentials: omit` go through a second client that has no
/// cookie jar, so they never send or record cookies.
pub struct ResourceLoader {
    client: Client,
    anonymous: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let builder = || {
            Client::builder()
                .user_agent(&config.user_agent)
                .timeout(config.default_timeout)
                .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
        };

        let client = builder()
            .cookie_store(config.cookies_enabled)
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;
        let anonymous = builder()
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, "ResourceLoader initialized");

        Ok(Self {
            client,
            anonymous,
            config,
        })
    }

    /// Loader configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    fn map_error(&self, request: &Request, error: reqwest::Error) -> NetError {
        if error.is_timeout() {
            NetError::Timeout(request.timeout.unwrap_or(self.config.default_timeout))
        } else if error.is_connect() {
            NetError::Offline(error.to_string())
        } else {
            NetError::HttpError(error)
        }
    }
}

#[async_trait]
impl Fetcher for ResourceLoader {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let client = match request.credentials {
            CredentialsMode::Omit => &self.anonymous,
            CredentialsMode::SameOrigin | CredentialsMode::Include => &self.client,
        };

        let mut req_builder = client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        let response = req_builder
            .send()
            .await
            .map_err(|e| self.map_error(request, e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();

        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_error(request, e))?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url,
            status,
            headers,
            response_type: ResponseType::Basic,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn loader() -> ResourceLoader {
        ResourceLoader::new(LoaderConfig::default()).unwrap()
    }

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("sitekit/"));
        assert!(config.cookies_enabled);
        assert_eq!(config.max_redirects, 10);
    }

    #[tokio::test]
    async fn test_fetch_returns_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blog/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html>blog</html>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/blog/", server.uri())).unwrap();
        let response = loader().fetch(&Request::navigate(url)).await.unwrap();

        assert!(response.ok());
        assert_eq!(response.response_type, ResponseType::Basic);
        assert_eq!(response.header("content-type"), Some("text/html"));
        assert_eq!(response.text().unwrap(), "<html>blog</html>");
    }

    #[tokio::test]
    async fn test_fetch_error_status_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        let response = loader().fetch(&Request::get(url)).await.unwrap();

        assert_eq!(response.status.as_u16(), 404);
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_fetch_surfaces_set_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "sid=1; Path=/"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/login", server.uri())).unwrap();
        let response = loader()
            .fetch(&Request::get(url).credentials(CredentialsMode::Omit))
            .await
            .unwrap();

        assert!(response.has_set_cookie());
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host_fails() {
        // Port 9 (discard) is closed on test machines.
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let result = loader().fetch(&Request::get(url)).await;

        assert!(result.is_err());
    }
}
