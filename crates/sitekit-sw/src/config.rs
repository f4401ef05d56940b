//! Versioned router configuration.
//!
//! Everything that used to be a module-level constant in the deployed worker
//! (cache version, partition names, origins, seed routes) lives in a
//! [`RouterConfig`] value injected into the router at construction.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sitekit_common::{Result, SiteKitError};
use url::Url;

/// The three cache partitions a router version owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
    /// Build-tool assets, stylesheets, scripts and the install-time seed routes.
    Static,
    /// Pages stored by the network-first strategy.
    Dynamic,
    /// Images, including everything served from the asset origin.
    Image,
}

impl PartitionKind {
    pub const ALL: [PartitionKind; 3] = [Self::Static, Self::Dynamic, Self::Image];
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::Image => "image",
        })
    }
}

/// Router configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Cache version; bumping it retires every partition of the old version.
    pub version: String,

    /// Prefix shared by every partition this router family owns.
    pub cache_prefix: String,

    /// Partition name suffixes.
    pub static_suffix: String,
    pub dynamic_suffix: String,
    pub image_suffix: String,

    /// The site's own origin.
    pub site_origin: String,

    /// Trusted remote asset origin.
    pub asset_origin: String,

    /// URL path prefix of fingerprinted build-tool assets.
    pub asset_path_prefix: String,

    /// Routes cached at install time.
    pub seed_paths: Vec<String>,

    /// Document served when a navigation fails with nothing cached.
    pub offline_path: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            version: "modern-jan-v1".to_string(),
            cache_prefix: "modern-jan-".to_string(),
            static_suffix: "static".to_string(),
            dynamic_suffix: "dynamic".to_string(),
            image_suffix: "images".to_string(),
            site_origin: "https://modern-jan.com".to_string(),
            asset_origin: "https://r2.modern-jan.com".to_string(),
            asset_path_prefix: "/_astro/".to_string(),
            seed_paths: ["/", "/blog/", "/about/", "/member/", "/tutorial/", "/offline.html"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            offline_path: "/offline.html".to_string(),
        }
    }
}

impl RouterConfig {
    /// Same configuration at another cache version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Same configuration for another site origin.
    pub fn with_site_origin(mut self, origin: impl Into<String>) -> Self {
        self.site_origin = origin.into();
        self
    }

    /// Partition name for `kind` at the current version, e.g. `modern-jan-v1-images`.
    pub fn partition_name(&self, kind: PartitionKind) -> String {
        let suffix = match kind {
            PartitionKind::Static => &self.static_suffix,
            PartitionKind::Dynamic => &self.dynamic_suffix,
            PartitionKind::Image => &self.image_suffix,
        };
        format!("{}-{}", self.version, suffix)
    }

    /// All three current partition names, in [`PartitionKind::ALL`] order.
    pub fn partition_names(&self) -> Vec<String> {
        PartitionKind::ALL
            .iter()
            .map(|kind| self.partition_name(*kind))
            .collect()
    }

    /// Whether `name` is one of the current version's partitions.
    pub fn is_current_partition(&self, name: &str) -> bool {
        PartitionKind::ALL
            .iter()
            .any(|kind| self.partition_name(*kind) == name)
    }

    /// Whether `name` belongs to this router family (any version).
    /// An empty prefix owns nothing.
    pub fn owns_partition(&self, name: &str) -> bool {
        !self.cache_prefix.is_empty() && name.starts_with(&self.cache_prefix)
    }

    /// Origins whose requests may be intercepted.
    pub fn allowed_origins(&self) -> Vec<String> {
        vec![self.site_origin.clone(), self.asset_origin.clone()]
    }

    /// Absolute URL for a site path.
    pub fn site_url(&self, path: &str) -> Result<Url> {
        Url::parse(&self.site_origin)
            .and_then(|origin| origin.join(path))
            .map_err(|e| SiteKitError::config_with_source(format!("bad site path {path}"), e))
    }

    /// Seed routes for install, without the offline document.
    pub fn install_paths(&self) -> impl Iterator<Item = &str> {
        self.seed_paths
            .iter()
            .map(String::as_str)
            .filter(move |path| *path != self.offline_path)
    }

    /// Check the configuration for values the router cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.cache_prefix.is_empty() {
            return Err(SiteKitError::config("cache_prefix must not be empty"));
        }
        if !self.version.starts_with(&self.cache_prefix) {
            return Err(SiteKitError::config(format!(
                "version {:?} must start with cache_prefix {:?}",
                self.version, self.cache_prefix
            )));
        }

        let suffixes = [&self.static_suffix, &self.dynamic_suffix, &self.image_suffix];
        if suffixes.iter().any(|s| s.is_empty()) {
            return Err(SiteKitError::config("partition suffixes must not be empty"));
        }
        if suffixes[0] == suffixes[1] || suffixes[1] == suffixes[2] || suffixes[0] == suffixes[2] {
            return Err(SiteKitError::config("partition suffixes must be distinct"));
        }

        for (field, origin) in [
            ("site_origin", &self.site_origin),
            ("asset_origin", &self.asset_origin),
        ] {
            let parsed = Url::parse(origin)
                .map_err(|e| SiteKitError::config_with_source(format!("{field} is not a URL"), e))?;
            if parsed.origin().ascii_serialization() != *origin {
                return Err(SiteKitError::config(format!(
                    "{field} must be a bare origin such as https://example.com, got {origin:?}"
                )));
            }
        }

        let paths = std::iter::once(&self.asset_path_prefix)
            .chain(std::iter::once(&self.offline_path))
            .chain(self.seed_paths.iter());
        for path in paths {
            if !path.starts_with('/') {
                return Err(SiteKitError::config(format!(
                    "path {path:?} must start with '/'"
                )));
            }
        }

        Ok(())
    }

    /// Parse and validate a JSON configuration. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RouterConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
