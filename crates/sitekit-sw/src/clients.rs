//! Open pages the router can control.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
}

/// A client (open page or worker).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Cache version of the router controlling this client, if any.
    pub controller: Option<String>,
}

impl Client {
    /// A new, uncontrolled window client.
    pub fn window(url: Url) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed)),
            url,
            client_type: ClientType::Window,
            controller: None,
        }
    }

    pub fn is_controlled(&self) -> bool {
        self.controller.is_some()
    }
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Number of clients currently controlled by `version`.
    pub fn controlled_by(&self, version: &str) -> usize {
        self.clients
            .values()
            .filter(|c| c.controller.as_deref() == Some(version))
            .count()
    }

    /// Take control of every window client on `origin`.
    ///
    /// Returns the ids of clients whose controller changed, sorted.
    pub fn claim(&mut self, origin: &str, version: &str) -> Vec<String> {
        let mut changed: Vec<String> = self
            .clients
            .values_mut()
            .filter(|c| c.client_type == ClientType::Window)
            .filter(|c| c.url.origin().ascii_serialization() == origin)
            .filter(|c| c.controller.as_deref() != Some(version))
            .map(|c| {
                c.controller = Some(version.to_string());
                c.id.clone()
            })
            .collect();
        changed.sort();
        changed
    }
}
