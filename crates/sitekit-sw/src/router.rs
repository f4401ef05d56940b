//! The cache router: lifecycle events and per-request strategies.

use std::sync::{Arc, Mutex};

use futures::future::try_join_all;
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use sitekit_net::{CredentialsMode, Fetcher, Request, Response, ResponseType};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::cache::{CacheEntry, CacheStorage, RequestKey};
use crate::clients::Clients;
use crate::config::{PartitionKind, RouterConfig};
use crate::rules::{RouteOutcome, RuleTable, Strategy};
use crate::RouterError;

/// Router lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Constructed, no lifecycle event yet.
    #[default]
    Parsed,
    Installing,
    /// Installed; the router skips waiting, so it is immediately activatable.
    Installed,
    Activating,
    /// Active and controlling pages.
    Activated,
}

/// Events published by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// State changed.
    StateChange { version: String, state: WorkerState },
    /// A partition of another version was deleted during activation.
    PartitionDeleted { name: String },
    /// A client is now controlled by this router.
    ControllerChange { client_id: String, version: String },
}

/// Where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseSource {
    Network,
    Cache,
    /// The offline document, served for a failed navigation.
    OfflineFallback,
}

/// A response produced by the router.
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub response: Response,
    pub source: ResponseSource,
    pub strategy: Strategy,
}

/// Result of handling a fetch event.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Not intercepted; the browser performs the request itself.
    PassThrough,
    /// Intercepted and answered.
    Respond(RoutedResponse),
}

impl FetchOutcome {
    /// The routed response, if the request was intercepted.
    pub fn routed(&self) -> Option<&RoutedResponse> {
        match self {
            Self::PassThrough => None,
            Self::Respond(routed) => Some(routed),
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, Self::PassThrough)
    }
}

/// Detached cache writes.
///
/// A write is spawned and forgotten by the response path: it lands at most
/// once, possibly after the caller has already dropped the response. Handles
/// are only kept so shutdown paths can [`flush`](CacheRouter::flush) them.
#[derive(Debug, Default)]
struct BackgroundWrites {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundWrites {
    fn track(&self, handle: JoinHandle<()>) {
        let mut handles = match self.handles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    fn take(&self) -> Vec<JoinHandle<()>> {
        let mut handles = match self.handles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *handles)
    }
}

/// Versioned cache router.
///
/// Methods take `&self`; one router serves any number of concurrent fetch
/// events. [`handle_fetch`](Self::handle_fetch) must run inside a Tokio
/// runtime because network-first writes are spawned onto it.
pub struct CacheRouter {
    config: RouterConfig,
    rules: RuleTable,
    fetcher: Arc<dyn Fetcher>,

    /// Cache storage, shared with other routers on the same origin.
    pub caches: Arc<RwLock<CacheStorage>>,

    /// Pages this router may control.
    pub clients: Arc<RwLock<Clients>>,

    state: RwLock<WorkerState>,
    writes: BackgroundWrites,
    event_tx: mpsc::UnboundedSender<RouterEvent>,
}

impl CacheRouter {
    /// Create a router with its own empty cache storage.
    pub fn new(
        config: RouterConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<RouterEvent>) {
        Self::with_storage(config, fetcher, Arc::new(RwLock::new(CacheStorage::new())))
    }

    /// Create a router over existing cache storage, e.g. to replace an older version.
    pub fn with_storage(
        config: RouterConfig,
        fetcher: Arc<dyn Fetcher>,
        caches: Arc<RwLock<CacheStorage>>,
    ) -> (Self, mpsc::UnboundedReceiver<RouterEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let rules = RuleTable::standard(&config);

        (
            Self {
                config,
                rules,
                fetcher,
                caches,
                clients: Arc::new(RwLock::new(Clients::new())),
                state: RwLock::new(WorkerState::Parsed),
                writes: BackgroundWrites::default(),
                event_tx,
            },
            event_rx,
        )
    }

    /// Router configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Routing table.
    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: WorkerState) {
        *self.state.write().await = state;
        let _ = self.event_tx.send(RouterEvent::StateChange {
            version: self.config.version.clone(),
            state,
        });
    }

    // ==================== Lifecycle ====================

    /// Handle the install event.
    ///
    /// Warms the static partition with the seed routes. The batch is
    /// all-or-nothing; a failure is logged and install still completes.
    /// Returns the number of routes stored.
    pub async fn install(&self) -> usize {
        info!(version = %self.config.version, "Installing service worker");
        self.set_state(WorkerState::Installing).await;

        let seeded = match self.fetch_seed_routes().await {
            Ok(entries) => {
                let count = entries.len();
                let name = self.config.partition_name(PartitionKind::Static);
                let mut caches = self.caches.write().await;
                let cache = caches.open(&name);
                for (key, entry) in entries {
                    cache.put(key, entry);
                }
                info!(partition = %name, count, "Cached static assets");
                count
            }
            Err(error) => {
                warn!(%error, "Failed to cache static assets");
                0
            }
        };

        self.set_state(WorkerState::Installed).await;
        debug!(version = %self.config.version, "Skipping waiting");
        seeded
    }

    async fn fetch_seed_routes(&self) -> Result<Vec<(RequestKey, CacheEntry)>, RouterError> {
        let requests = self
            .config
            .install_paths()
            .map(|path| {
                self.config
                    .site_url(path)
                    .map(Request::get)
                    .map_err(|e| RouterError::Seed(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        try_join_all(requests.iter().map(|request| self.fetch_seed_route(request))).await
    }

    async fn fetch_seed_route(
        &self,
        request: &Request,
    ) -> Result<(RequestKey, CacheEntry), RouterError> {
        let response = self.fetcher.fetch(request).await?;
        if !response.ok() {
            return Err(RouterError::Seed(format!(
                "{} answered {}",
                request.url, response.status
            )));
        }
        Ok((
            RequestKey::for_request(request),
            CacheEntry::from_response(&response),
        ))
    }

    /// Handle the activate event.
    ///
    /// Deletes every partition this router family owns that is not one of
    /// the current version's, makes sure the current three exist, and claims
    /// open pages. Returns the deleted partition names.
    pub async fn activate(&self) -> Vec<String> {
        info!(version = %self.config.version, "Activating service worker");
        self.set_state(WorkerState::Activating).await;

        let deleted = {
            let mut caches = self.caches.write().await;
            let stale: Vec<String> = caches
                .keys()
                .into_iter()
                .filter(|name| {
                    self.config.owns_partition(name) && !self.config.is_current_partition(name)
                })
                .collect();

            for name in &stale {
                info!(partition = %name, "Deleting old cache");
                caches.delete(name);
                let _ = self
                    .event_tx
                    .send(RouterEvent::PartitionDeleted { name: name.clone() });
            }

            for name in self.config.partition_names() {
                caches.open(&name);
            }
            stale
        };

        let claimed = self
            .clients
            .write()
            .await
            .claim(&self.config.site_origin, &self.config.version);
        for client_id in claimed {
            let _ = self.event_tx.send(RouterEvent::ControllerChange {
                client_id,
                version: self.config.version.clone(),
            });
        }

        self.set_state(WorkerState::Activated).await;
        deleted
    }

    /// Wait for outstanding background cache writes.
    ///
    /// Never called on the response path.
    pub async fn flush(&self) {
        loop {
            let pending = self.writes.take();
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(error) = handle.await {
                    warn!(%error, "Background cache write did not complete");
                }
            }
        }
    }

    // ==================== Fetch ====================

    /// Handle a fetch event.
    pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome, RouterError> {
        let decision = self.rules.classify(request);

        let routed = match decision.outcome {
            RouteOutcome::PassThrough => {
                trace!(url = %request.url, rule = ?decision.rule, "Passing through");
                return Ok(FetchOutcome::PassThrough);
            }
            RouteOutcome::Handle(strategy @ Strategy::CacheFirst(kind)) => {
                self.cache_first(request, kind, strategy).await?
            }
            RouteOutcome::Handle(Strategy::NetworkFirst) => self.network_first(request).await?,
        };

        Ok(FetchOutcome::Respond(routed))
    }

    async fn cache_first(
        &self,
        request: &Request,
        kind: PartitionKind,
        strategy: Strategy,
    ) -> Result<RoutedResponse, RouterError> {
        let name = self.config.partition_name(kind);
        let key = RequestKey::for_request(request);

        if let Some(entry) = self.lookup(&[name.clone()], &key).await {
            debug!(partition = %name, key = %key, "Cache hit");
            return Ok(RoutedResponse {
                response: entry.to_response(),
                source: ResponseSource::Cache,
                strategy,
            });
        }

        debug!(partition = %name, key = %key, "Cache miss");
        let network_request = request.clone().credentials(CredentialsMode::Omit);
        // A failed fetch on a miss is returned as-is; unlike navigations there
        // is no stale copy to fall back to.
        let response = self.fetcher.fetch(&network_request).await?;

        if is_storable_asset(request, &response) {
            self.caches
                .write()
                .await
                .open(&name)
                .put(key, CacheEntry::from_response(&response));
        } else {
            debug!(url = %request.url, status = %response.status, "Response not cacheable");
        }

        Ok(RoutedResponse {
            response,
            source: ResponseSource::Network,
            strategy,
        })
    }

    async fn network_first(&self, request: &Request) -> Result<RoutedResponse, RouterError> {
        let strategy = Strategy::NetworkFirst;
        let name = self.config.partition_name(PartitionKind::Dynamic);
        let key = RequestKey::for_request(request);

        let error = match self.fetcher.fetch(request).await {
            Ok(response) => {
                if is_storable_page(request, &response) {
                    self.caches.write().await.open(&name);
                    self.store_in_background(name, key, CacheEntry::from_response(&response));
                }
                return Ok(RoutedResponse {
                    response,
                    source: ResponseSource::Network,
                    strategy,
                });
            }
            Err(error) => error,
        };

        debug!(url = %request.url, %error, "Network failed, trying cache");

        // Dynamic first, then the rest of this version (install seeds pages
        // into the static partition).
        let names: Vec<String> = std::iter::once(name.clone())
            .chain(
                self.config
                    .partition_names()
                    .into_iter()
                    .filter(|other| *other != name),
            )
            .collect();
        if let Some(entry) = self.lookup(&names, &key).await {
            return Ok(RoutedResponse {
                response: entry.to_response(),
                source: ResponseSource::Cache,
                strategy,
            });
        }

        if let Ok(offline_url) = self.config.site_url(&self.config.offline_path) {
            let offline_key = RequestKey::get(&offline_url);
            if let Some(entry) = self.lookup(&self.config.partition_names(), &offline_key).await {
                debug!(url = %request.url, "Serving offline document");
                return Ok(RoutedResponse {
                    response: entry.to_response(),
                    source: ResponseSource::OfflineFallback,
                    strategy,
                });
            }
        }

        Err(RouterError::Offline {
            url: request.url.to_string(),
            source: error,
        })
    }

    async fn lookup(&self, names: &[String], key: &RequestKey) -> Option<CacheEntry> {
        self.caches.read().await.match_in(names, key).cloned()
    }

    fn store_in_background(&self, name: String, key: RequestKey, entry: CacheEntry) {
        let caches = Arc::clone(&self.caches);
        let handle = tokio::spawn(async move {
            // The partition was opened before spawning. If it is gone now, a
            // newer version deleted it and the write must not recreate it.
            match caches.write().await.get_mut(&name) {
                Some(cache) => {
                    trace!(partition = %name, key = %key, "Storing page");
                    cache.put(key, entry);
                }
                None => debug!(partition = %name, key = %key, "Partition gone, dropping write"),
            }
        });
        self.writes.track(handle);
    }
}

/// Cache-first responses are stored only when complete, successful and cookie-free.
fn is_storable_asset(request: &Request, response: &Response) -> bool {
    request.method == Method::GET
        && response.status == StatusCode::OK
        && response.response_type != ResponseType::Error
        && !response.has_set_cookie()
}

fn is_storable_page(request: &Request, response: &Response) -> bool {
    request.method == Method::GET && response.status == StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use http::{header, HeaderValue};
    use sitekit_net::{Destination, NetError};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use url::Url;

    /// Serves `<path>` bodies for every URL, or fails while offline.
    #[derive(Default)]
    struct EchoFetcher {
        calls: AtomicUsize,
        offline: AtomicBool,
    }

    #[async_trait]
    impl Fetcher for EchoFetcher {
        async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(NetError::Offline(request.url.to_string()));
            }
            Ok(Response::new(request.url.clone(), StatusCode::OK)
                .with_body(request.url.path().to_string()))
        }
    }

    fn router() -> (CacheRouter, Arc<EchoFetcher>) {
        let fetcher = Arc::new(EchoFetcher::default());
        let (router, _rx) = CacheRouter::new(RouterConfig::default(), fetcher.clone());
        (router, fetcher)
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_storable_asset_rules() {
        let request =
            Request::for_destination(url("https://modern-jan.com/a.png"), Destination::Image);
        let ok = Response::new(request.url.clone(), StatusCode::OK);

        assert!(is_storable_asset(&request, &ok));
        assert!(!is_storable_asset(
            &request,
            &Response::new(request.url.clone(), StatusCode::PARTIAL_CONTENT)
        ));
        assert!(!is_storable_asset(&request, &ok.clone().with_type(ResponseType::Error)));
        assert!(!is_storable_asset(
            &request,
            &ok.clone()
                .with_header(header::SET_COOKIE, HeaderValue::from_static("a=b"))
        ));
        assert!(!is_storable_asset(&request.clone().method(Method::POST), &ok));
    }

    #[test]
    fn test_storable_page_ignores_cookies() {
        let request = Request::navigate(url("https://modern-jan.com/blog/"));
        let response = Response::new(request.url.clone(), StatusCode::OK)
            .with_header(header::SET_COOKIE, HeaderValue::from_static("a=b"));
        assert!(is_storable_page(&request, &response));
        assert!(!is_storable_page(
            &request,
            &Response::new(request.url.clone(), StatusCode::NOT_FOUND)
        ));
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (router, _) = router();
        assert_eq!(router.state().await, WorkerState::Parsed);
        assert_eq!(router.rules().rules().len(), 5);
    }

    #[tokio::test]
    async fn test_install_seeds_static_partition() {
        let (router, fetcher) = router();
        assert_eq!(router.install().await, 5);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 5);
        assert_eq!(router.state().await, WorkerState::Installed);

        let caches = router.caches.read().await;
        let cache = caches.get("modern-jan-v1-static").unwrap();
        assert!(cache
            .match_request(&RequestKey::get(&url("https://modern-jan.com/blog/")))
            .is_some());
        assert!(cache
            .match_request(&RequestKey::get(&url("https://modern-jan.com/offline.html")))
            .is_none());
    }

    #[tokio::test]
    async fn test_install_failure_is_swallowed() {
        let (router, fetcher) = router();
        fetcher.offline.store(true, Ordering::SeqCst);

        assert_eq!(router.install().await, 0);
        assert_eq!(router.state().await, WorkerState::Installed);
        assert!(!router.caches.read().await.has("modern-jan-v1-static"));
    }

    #[tokio::test]
    async fn test_activate_emits_events() {
        let fetcher = Arc::new(EchoFetcher::default());
        let (router, mut rx) = CacheRouter::new(RouterConfig::default(), fetcher);
        router
            .clients
            .write()
            .await
            .add(crate::Client::window(url("https://modern-jan.com/")));

        assert!(router.activate().await.is_empty());
        assert_eq!(router.state().await, WorkerState::Activated);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(events.contains(&RouterEvent::StateChange {
            version: "modern-jan-v1".to_string(),
            state: WorkerState::Activated,
        }));
        assert!(events.iter().any(|e| matches!(
            e,
            RouterEvent::ControllerChange { version, .. } if version == "modern-jan-v1"
        )));
    }

    #[tokio::test]
    async fn test_flush_with_nothing_pending() {
        let (router, _) = router();
        router.flush().await;
    }
}
