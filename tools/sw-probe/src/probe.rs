//! Probe commands.

use std::sync::Arc;

use clap::Args;
use serde_json::{json, Value};
use sitekit_common::{Result, SiteKitError};
use sitekit_net::{CredentialsMode, Destination, LoaderConfig, Request, ResourceLoader};
use sitekit_sw::{CacheRouter, FetchOutcome, RouteOutcome, RouterConfig, RuleTable, Strategy};
use tracing::info;
use url::Url;

/// Request shape shared by the probe commands.
#[derive(Args, Debug, Clone, Default)]
pub struct RequestSpec {
    /// Declared destination (document, image, script, style, font, ...)
    #[arg(short, long)]
    pub destination: Option<Destination>,

    /// Send as a page navigation
    #[arg(short, long)]
    pub navigate: bool,

    /// Credentials mode (omit, same-origin, include)
    #[arg(long, default_value = "same-origin")]
    pub credentials: CredentialsMode,
}

impl RequestSpec {
    /// Build the request for `url`.
    pub fn build(&self, url: &str) -> Result<Request> {
        let url = Url::parse(url)
            .map_err(|e| SiteKitError::InvalidArgument(format!("{url}: {e}")))?;

        let request = if self.navigate {
            Request::navigate(url)
        } else {
            match self.destination {
                Some(destination) => Request::for_destination(url, destination),
                None => Request::get(url),
            }
        };

        Ok(request.credentials(self.credentials))
    }
}

fn outcome_json(outcome: &RouteOutcome) -> Value {
    match outcome {
        RouteOutcome::PassThrough => json!({ "strategy": "pass-through" }),
        RouteOutcome::Handle(Strategy::CacheFirst(kind)) => {
            json!({ "strategy": "cache-first", "partition": kind })
        }
        RouteOutcome::Handle(Strategy::NetworkFirst) => {
            json!({ "strategy": "network-first", "partition": "dynamic" })
        }
    }
}

/// Classify a request without touching the network.
pub fn classify(config: &RouterConfig, url: &str, spec: &RequestSpec) -> Result<Value> {
    let request = spec.build(url)?;
    let decision = RuleTable::standard(config).classify(&request);

    Ok(json!({
        "url": request.url.as_str(),
        "origin": request.origin(),
        "destination": request.destination.to_string(),
        "rule": decision.rule,
        "outcome": outcome_json(&decision.outcome),
    }))
}

/// Run the lifecycle and fetch every URL `repeat` times.
pub async fn fetch(
    config: RouterConfig,
    urls: &[String],
    spec: &RequestSpec,
    repeat: u32,
    install: bool,
) -> Result<Value> {
    let loader = ResourceLoader::new(LoaderConfig::default())
        .map_err(|e| SiteKitError::network_with_source("creating loader", e))?;
    let (router, _events) = CacheRouter::new(config, Arc::new(loader));

    let seeded = if install { router.install().await } else { 0 };
    let deleted = router.activate().await;

    let mut results = Vec::new();
    for url in urls {
        let request = spec.build(url)?;
        for attempt in 1..=repeat {
            let entry = match router.handle_fetch(&request).await {
                Ok(FetchOutcome::PassThrough) => json!({
                    "url": url,
                    "attempt": attempt,
                    "outcome": "pass-through",
                }),
                Ok(FetchOutcome::Respond(routed)) => json!({
                    "url": url,
                    "attempt": attempt,
                    "source": routed.source,
                    "status": routed.response.status.as_u16(),
                    "bytes": routed.response.body.len(),
                    "content_type": routed.response.content_type().map(|m| m.to_string()),
                }),
                Err(error) => json!({
                    "url": url,
                    "attempt": attempt,
                    "error": error.to_string(),
                }),
            };
            info!(%url, attempt, "Probed");
            results.push(entry);
        }
    }

    router.flush().await;

    let partitions: Vec<Value> = {
        let caches = router.caches.read().await;
        caches
            .keys()
            .into_iter()
            .map(|name| {
                let entries = caches.get(&name).map(|c| c.len()).unwrap_or(0);
                json!({ "name": name, "entries": entries })
            })
            .collect()
    };

    Ok(json!({
        "version": router.config().version,
        "seeded": seeded,
        "deleted": deleted,
        "results": results,
        "partitions": partitions,
    }))
}
