//! Request classification.
//!
//! Routing is an ordered list of [`RouteRule`]s: each pairs a
//! [`RouteCondition`] with a [`RouteOutcome`], and the first rule whose
//! condition matches decides. Requests no rule matches pass through.

use sitekit_net::{CredentialsMode, Destination, Request};
use tracing::trace;

use crate::config::{PartitionKind, RouterConfig};

/// How an intercepted request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Serve from the partition when present, otherwise fetch and store.
    CacheFirst(PartitionKind),
    /// Fetch first, fall back to the dynamic partition and then the offline page.
    NetworkFirst,
}

impl Strategy {
    /// Partition this strategy reads and writes.
    pub fn partition(&self) -> PartitionKind {
        match self {
            Self::CacheFirst(kind) => *kind,
            Self::NetworkFirst => PartitionKind::Dynamic,
        }
    }
}

/// What the router does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Leave the request to the browser; no cache read or write.
    PassThrough,
    /// Intercept and serve with the given strategy.
    Handle(Strategy),
}

/// Condition over a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteCondition {
    /// Origin is not one of the listed origins.
    OriginNotIn(Vec<String>),
    /// Origin equals the given origin.
    Origin(String),
    /// Credentials mode matches.
    Credentials(CredentialsMode),
    /// Declared destination matches.
    Destination(Destination),
    /// URL path starts with the prefix.
    PathPrefix(String),
    /// Request is a page navigation.
    Navigation,
    /// Any of the nested conditions matches.
    AnyOf(Vec<RouteCondition>),
}

impl RouteCondition {
    /// Check the condition against a request.
    pub fn matches(&self, request: &Request) -> bool {
        match self {
            Self::OriginNotIn(origins) => {
                let origin = request.origin();
                !origins.iter().any(|allowed| *allowed == origin)
            }
            Self::Origin(origin) => request.origin() == *origin,
            Self::Credentials(mode) => request.credentials == *mode,
            Self::Destination(destination) => request.destination == *destination,
            Self::PathPrefix(prefix) => request.url.path().starts_with(prefix.as_str()),
            Self::Navigation => request.is_navigation(),
            Self::AnyOf(conditions) => conditions.iter().any(|c| c.matches(request)),
        }
    }
}

/// A named (condition, outcome) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub name: &'static str,
    pub condition: RouteCondition,
    pub outcome: RouteOutcome,
}

/// Result of classifying a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDecision {
    /// Name of the rule that matched; `None` when nothing matched.
    pub rule: Option<&'static str>,
    pub outcome: RouteOutcome,
}

/// Ordered rule table, first match wins.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<RouteRule>,
}

impl RuleTable {
    /// Empty table; everything passes through.
    pub fn new() -> Self {
        Self::default()
    }

    /// The site's routing table:
    ///
    /// 1. foreign origin → pass through
    /// 2. `credentials: include` → pass through
    /// 3. image destination or asset origin → cache-first, image partition
    /// 4. style/script destination or build asset path → cache-first, static partition
    /// 5. navigation or document destination → network-first
    pub fn standard(config: &RouterConfig) -> Self {
        let mut table = Self::new();
        table.push(RouteRule {
            name: "foreign-origin",
            condition: RouteCondition::OriginNotIn(config.allowed_origins()),
            outcome: RouteOutcome::PassThrough,
        });
        table.push(RouteRule {
            name: "credentialed",
            condition: RouteCondition::Credentials(CredentialsMode::Include),
            outcome: RouteOutcome::PassThrough,
        });
        table.push(RouteRule {
            name: "image",
            condition: RouteCondition::AnyOf(vec![
                RouteCondition::Destination(Destination::Image),
                RouteCondition::Origin(config.asset_origin.clone()),
            ]),
            outcome: RouteOutcome::Handle(Strategy::CacheFirst(PartitionKind::Image)),
        });
        table.push(RouteRule {
            name: "static-asset",
            condition: RouteCondition::AnyOf(vec![
                RouteCondition::Destination(Destination::Style),
                RouteCondition::Destination(Destination::Script),
                RouteCondition::PathPrefix(config.asset_path_prefix.clone()),
            ]),
            outcome: RouteOutcome::Handle(Strategy::CacheFirst(PartitionKind::Static)),
        });
        table.push(RouteRule {
            name: "document",
            condition: RouteCondition::AnyOf(vec![
                RouteCondition::Navigation,
                RouteCondition::Destination(Destination::Document),
            ]),
            outcome: RouteOutcome::Handle(Strategy::NetworkFirst),
        });
        table
    }

    /// Append a rule after all existing ones.
    pub fn push(&mut self, rule: RouteRule) {
        self.rules.push(rule);
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Classify a request.
    pub fn classify(&self, request: &Request) -> RouteDecision {
        for rule in &self.rules {
            if rule.condition.matches(request) {
                trace!(
                    url = %request.url,
                    rule = rule.name,
                    outcome = ?rule.outcome,
                    "Rule matched"
                );
                return RouteDecision {
                    rule: Some(rule.name),
                    outcome: rule.outcome,
                };
            }
        }

        RouteDecision {
            rule: None,
            outcome: RouteOutcome::PassThrough,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn table() -> RuleTable {
        RuleTable::standard(&RouterConfig::default())
    }

    fn request(url: &str, destination: Destination) -> Request {
        Request::for_destination(Url::parse(url).unwrap(), destination)
    }

    fn outcome(request: &Request) -> RouteOutcome {
        table().classify(request).outcome
    }

    const IMAGE: RouteOutcome = RouteOutcome::Handle(Strategy::CacheFirst(PartitionKind::Image));
    const STATIC: RouteOutcome = RouteOutcome::Handle(Strategy::CacheFirst(PartitionKind::Static));
    const PAGE: RouteOutcome = RouteOutcome::Handle(Strategy::NetworkFirst);

    #[test]
    fn test_standard_rule_order() {
        let names: Vec<&str> = table().rules().iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec!["foreign-origin", "credentialed", "image", "static-asset", "document"]
        );
    }

    #[test]
    fn test_foreign_origin_passes_through() {
        let req = request("https://cdn.example.com/logo.png", Destination::Image);
        let decision = table().classify(&req);
        assert_eq!(decision.outcome, RouteOutcome::PassThrough);
        assert_eq!(decision.rule, Some("foreign-origin"));
    }

    #[test]
    fn test_lookalike_origin_is_foreign() {
        let req = request("https://r2.modern-jan.com.evil.test/x.png", Destination::Image);
        assert_eq!(outcome(&req), RouteOutcome::PassThrough);
    }

    #[test]
    fn test_credentialed_passes_through_for_every_destination() {
        for destination in [
            Destination::Image,
            Destination::Style,
            Destination::Script,
            Destination::Document,
        ] {
            let req = request("https://modern-jan.com/_astro/a.js", destination)
                .credentials(CredentialsMode::Include);
            let decision = table().classify(&req);
            assert_eq!(decision.outcome, RouteOutcome::PassThrough);
            assert_eq!(decision.rule, Some("credentialed"));
        }
    }

    #[test]
    fn test_image_destination() {
        let req = request("https://modern-jan.com/photo.jpg", Destination::Image);
        assert_eq!(outcome(&req), IMAGE);
    }

    #[test]
    fn test_asset_origin_is_image_regardless_of_destination() {
        let req = request("https://r2.modern-jan.com/thumbs/a.webp", Destination::Empty);
        assert_eq!(outcome(&req), IMAGE);

        let script = request("https://r2.modern-jan.com/widget.js", Destination::Script);
        assert_eq!(outcome(&script), IMAGE);
    }

    #[test]
    fn test_image_under_asset_path_is_image() {
        // Rule 3 precedes rule 4.
        let req = request("https://modern-jan.com/_astro/hero.webp", Destination::Image);
        assert_eq!(outcome(&req), IMAGE);
    }

    #[test]
    fn test_style_script_and_asset_path_are_static() {
        assert_eq!(
            outcome(&request("https://modern-jan.com/global.css", Destination::Style)),
            STATIC
        );
        assert_eq!(
            outcome(&request("https://modern-jan.com/app.js", Destination::Script)),
            STATIC
        );
        assert_eq!(
            outcome(&request("https://modern-jan.com/_astro/font.woff2", Destination::Font)),
            STATIC
        );
    }

    #[test]
    fn test_asset_path_prefix_is_anchored() {
        let req = request("https://modern-jan.com/blog/_astro/x", Destination::Empty);
        assert_eq!(outcome(&req), RouteOutcome::PassThrough);
    }

    #[test]
    fn test_navigation_and_document_are_network_first() {
        let nav = Request::navigate(Url::parse("https://modern-jan.com/blog/").unwrap());
        assert_eq!(outcome(&nav), PAGE);

        let doc = request("https://modern-jan.com/about/", Destination::Document);
        assert_eq!(outcome(&doc), PAGE);
    }

    #[test]
    fn test_unmatched_passes_through() {
        let req = request("https://modern-jan.com/api/search.json", Destination::Empty);
        let decision = table().classify(&req);
        assert_eq!(decision.outcome, RouteOutcome::PassThrough);
        assert_eq!(decision.rule, None);
    }

    #[test]
    fn test_empty_table_passes_everything() {
        let req = request("https://modern-jan.com/photo.jpg", Destination::Image);
        assert_eq!(RuleTable::new().classify(&req).outcome, RouteOutcome::PassThrough);
    }

    #[test]
    fn test_custom_rule_appended() {
        let mut table = RuleTable::new();
        table.push(RouteRule {
            name: "fonts",
            condition: RouteCondition::Destination(Destination::Font),
            outcome: STATIC,
        });
        let req = request("https://fonts.example.com/a.woff2", Destination::Font);
        assert_eq!(table.classify(&req).rule, Some("fonts"));
    }

    #[test]
    fn test_strategy_partition() {
        assert_eq!(Strategy::NetworkFirst.partition(), PartitionKind::Dynamic);
        assert_eq!(
            Strategy::CacheFirst(PartitionKind::Image).partition(),
            PartitionKind::Image
        );
    }
}
