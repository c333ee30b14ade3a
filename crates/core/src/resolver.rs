use std::{collections::HashMap, future::Future};

use serde::Serialize;
use thiserror::Error;

use crate::hostname::HostName;
use crate::store::StoreRecord;

/// Hostnames reserved for preview and CI deployments. They always render a fixed theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewRule {
    pub root: String,
    pub prefix: String,
    pub suffix: String,
    pub project_suffix: String,
    pub theme_id: String,
}

impl PreviewRule {
    /// Blank parts of the rule never match.
    pub fn matches(&self, host: &str) -> bool {
        if !self.root.is_empty() && host == self.root {
            return true;
        }
        if !self.prefix.is_empty()
            && !self.suffix.is_empty()
            && host.starts_with(&self.prefix)
            && host.ends_with(&self.suffix)
        {
            return true;
        }
        !self.project_suffix.is_empty() && host.ends_with(&self.project_suffix)
    }
}

/// Static hostname to theme table with its default entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainMapping {
    entries: HashMap<String, String>,
    default_theme: String,
}

impl DomainMapping {
    pub fn new<I, K, V>(entries: I, default_theme: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(host, theme)| (host.as_ref().trim().to_ascii_lowercase(), theme.into()))
            .collect();
        Self {
            entries,
            default_theme: default_theme.into(),
        }
    }

    /// Exact match on the normalized form, then on the `www.`-stripped form.
    pub fn lookup(&self, host: &HostName) -> Option<&str> {
        self.entries
            .get(host.normalized())
            .or_else(|| self.entries.get(host.bare()))
            .map(String::as_str)
    }

    pub fn default_theme(&self) -> &str {
        &self.default_theme
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolver configuration, built once at startup and injected.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub preview: Option<PreviewRule>,
    pub mapping: DomainMapping,
    /// Shared hosting suffix such as `.vercel.app`. Hosts under it that reach this step
    /// render the mapping's default theme.
    pub platform_suffix: Option<String>,
    /// Theme used for database rows that carry no theme at all.
    pub fallback_theme: String,
}

impl ResolverConfig {
    /// Synchronous strategies in priority order. The database lookup always runs last.
    pub fn strategies(&self) -> Vec<Strategy> {
        let mut strategies = Vec::with_capacity(3);
        if let Some(rule) = &self.preview {
            strategies.push(Strategy::Preview(rule.clone()));
        }
        strategies.push(Strategy::StaticMapping(self.mapping.clone()));
        if let Some(suffix) = self.platform_suffix.as_deref().filter(|s| !s.is_empty()) {
            strategies.push(Strategy::PlatformFallback {
                suffix: suffix.to_ascii_lowercase(),
                theme_id: self.mapping.default_theme().to_string(),
            });
        }
        strategies
    }
}

/// A resolution step that needs no I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Preview(PreviewRule),
    StaticMapping(DomainMapping),
    PlatformFallback { suffix: String, theme_id: String },
}

impl Strategy {
    pub fn source(&self) -> ResolutionSource {
        match self {
            Self::Preview(_) => ResolutionSource::Preview,
            Self::StaticMapping(_) => ResolutionSource::StaticMapping,
            Self::PlatformFallback { .. } => ResolutionSource::Platform,
        }
    }

    pub fn try_resolve(&self, host: &HostName) -> Option<Resolution> {
        let theme_id = match self {
            Self::Preview(rule) => rule
                .matches(host.normalized())
                .then(|| rule.theme_id.as_str())?,
            Self::StaticMapping(mapping) => mapping.lookup(host)?,
            Self::PlatformFallback { suffix, theme_id } => host
                .normalized()
                .ends_with(suffix.as_str())
                .then_some(theme_id.as_str())?,
        };

        let source = self.source();
        Some(Resolution {
            store: StoreRecord::synthesized(
                format!("{}:{}", source.as_str(), host.normalized()),
                host.normalized(),
                theme_id,
            ),
            theme_id: theme_id.to_string(),
            source,
        })
    }
}

/// Where a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Preview,
    StaticMapping,
    Platform,
    Directory,
}

impl ResolutionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::StaticMapping => "static_mapping",
            Self::Platform => "platform",
            Self::Directory => "directory",
        }
    }
}

/// Store and theme chosen for a hostname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub store: StoreRecord,
    pub theme_id: String,
    pub source: ResolutionSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no store is bound to '{host}'")]
    NotFound { host: String },
    #[error("store lookup for '{host}' failed: {message}")]
    Lookup { host: String, message: String },
}

impl ResolveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Lookup { .. } => "lookup_error",
        }
    }
}

/// Store table lookup consulted when no static strategy matches.
pub trait StoreDirectory: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the store whose domain equals `domain` exactly.
    fn find_by_domain(
        &self,
        domain: &str,
    ) -> impl Future<Output = Result<Option<StoreRecord>, Self::Error>> + Send;
}

/// Maps a request hostname to the store and theme to render.
///
/// Static strategies are tried in order; the first hit wins and performs no lookup. Otherwise
/// exactly one directory lookup is issued, without retries or a timeout.
#[derive(Debug, Clone)]
pub struct StoreResolver<D> {
    strategies: Vec<Strategy>,
    directory: D,
    fallback_theme: String,
}

impl<D: StoreDirectory> StoreResolver<D> {
    pub fn new(config: &ResolverConfig, directory: D) -> Self {
        Self {
            strategies: config.strategies(),
            directory,
            fallback_theme: config.fallback_theme.clone(),
        }
    }

    pub fn fallback_theme(&self) -> &str {
        &self.fallback_theme
    }

    pub async fn resolve(&self, raw_host: &str) -> Result<Resolution, ResolveError> {
        let host = HostName::parse(raw_host);
        if host.is_empty() {
            return Err(ResolveError::NotFound {
                host: String::new(),
            });
        }

        if let Some(resolution) = self
            .strategies
            .iter()
            .find_map(|strategy| strategy.try_resolve(&host))
        {
            return Ok(resolution);
        }

        match self.directory.find_by_domain(host.normalized()).await {
            Ok(Some(store)) => {
                let theme_id = store.theme_id(&self.fallback_theme).to_string();
                Ok(Resolution {
                    store,
                    theme_id,
                    source: ResolutionSource::Directory,
                })
            }
            Ok(None) => Err(ResolveError::NotFound {
                host: host.normalized().to_string(),
            }),
            Err(err) => Err(ResolveError::Lookup {
                host: host.normalized().to_string(),
                message: err.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme::ThemeSettings;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    #[derive(Debug, Error)]
    #[error("connection reset")]
    struct FakeError;

    #[derive(Clone, Default)]
    struct FakeDirectory {
        rows: Arc<Mutex<HashMap<String, StoreRecord>>>,
        queried: Arc<Mutex<Vec<String>>>,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl FakeDirectory {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn with_row(self, row: StoreRecord) -> Self {
            self.rows
                .lock()
                .expect("rows lock")
                .insert(row.domain.clone(), row);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl StoreDirectory for FakeDirectory {
        type Error = FakeError;

        async fn find_by_domain(&self, domain: &str) -> Result<Option<StoreRecord>, FakeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.queried
                .lock()
                .expect("queried lock")
                .push(domain.to_string());
            if self.fail {
                return Err(FakeError);
            }
            Ok(self.rows.lock().expect("rows lock").get(domain).cloned())
        }
    }

    fn config() -> ResolverConfig {
        ResolverConfig {
            preview: Some(PreviewRule {
                root: "storefront-builder.vercel.app".to_string(),
                prefix: "storefront-builder-git-".to_string(),
                suffix: ".vercel.app".to_string(),
                project_suffix: "-storefront-builder.vercel.app".to_string(),
                theme_id: "modern".to_string(),
            }),
            mapping: DomainMapping::new(
                [("demo.example.com", "bold"), ("localhost", "classic")],
                "minimal",
            ),
            platform_suffix: Some(".vercel.app".to_string()),
            fallback_theme: "elegant".to_string(),
        }
    }

    fn row(domain: &str, selected: Option<&str>, nested: Option<&str>) -> StoreRecord {
        StoreRecord {
            id: format!("store-{domain}"),
            user_id: Some("u-1".to_string()),
            domain: domain.to_string(),
            selected_theme: selected.map(str::to_string),
            theme_settings: nested.map(|id| ThemeSettings::default().with_id(id)),
        }
    }

    #[tokio::test]
    async fn preview_hosts_resolve_without_lookup() {
        let directory = FakeDirectory::default();
        let resolver = StoreResolver::new(&config(), directory.clone());

        for host in [
            "storefront-builder.vercel.app",
            "storefront-builder-git-feature-x.vercel.app",
            "pr-42-storefront-builder.vercel.app",
            "STOREFRONT-BUILDER.vercel.app:443",
        ] {
            let resolution = resolver.resolve(host).await.expect("preview resolves");
            assert_eq!(resolution.theme_id, "modern", "{host}");
            assert_eq!(resolution.source, ResolutionSource::Preview);
        }
        assert_eq!(directory.calls(), 0);
    }

    #[tokio::test]
    async fn static_mapping_matches_exact_and_www_forms() {
        let directory = FakeDirectory::default();
        let resolver = StoreResolver::new(&config(), directory.clone());

        let exact = resolver.resolve("demo.example.com").await.expect("exact");
        assert_eq!(exact.theme_id, "bold");
        assert_eq!(exact.source, ResolutionSource::StaticMapping);

        let www = resolver.resolve("www.Demo.example.com").await.expect("www");
        assert_eq!(www.theme_id, "bold");

        let local = resolver.resolve("localhost:8080").await.expect("localhost");
        assert_eq!(local.theme_id, "classic");

        assert_eq!(directory.calls(), 0);
    }

    #[tokio::test]
    async fn static_mapping_does_not_match_subdomains() {
        let directory = FakeDirectory::default();
        let resolver = StoreResolver::new(&config(), directory.clone());

        let err = resolver
            .resolve("shop.demo.example.com")
            .await
            .expect_err("no wildcard matching");
        assert!(err.is_not_found());
        assert_eq!(directory.calls(), 1);
    }

    #[tokio::test]
    async fn platform_suffix_uses_default_theme() {
        let directory = FakeDirectory::default();
        let resolver = StoreResolver::new(&config(), directory.clone());

        let resolution = resolver
            .resolve("someone-else.vercel.app")
            .await
            .expect("platform fallback");
        assert_eq!(resolution.theme_id, "minimal");
        assert_eq!(resolution.source, ResolutionSource::Platform);
        assert_eq!(directory.calls(), 0);
    }

    #[tokio::test]
    async fn directory_lookup_prefers_nested_theme_id() {
        let directory =
            FakeDirectory::default().with_row(row("shop.example.com", Some("classic"), Some("X")));
        let resolver = StoreResolver::new(&config(), directory.clone());

        let resolution = resolver
            .resolve("Shop.Example.com")
            .await
            .expect("directory hit");
        assert_eq!(resolution.theme_id, "X");
        assert_eq!(resolution.source, ResolutionSource::Directory);
        assert_eq!(resolution.store.id, "store-shop.example.com");
        assert_eq!(directory.calls(), 1);
        assert_eq!(
            directory.queried.lock().expect("queried").as_slice(),
            ["shop.example.com"]
        );
    }

    #[tokio::test]
    async fn directory_lookup_keeps_www_prefix() {
        let directory =
            FakeDirectory::default().with_row(row("www.shop.example.com", Some("classic"), None));
        let resolver = StoreResolver::new(&config(), directory.clone());

        let resolution = resolver
            .resolve("www.shop.example.com")
            .await
            .expect("www row");
        assert_eq!(resolution.theme_id, "classic");
    }

    #[tokio::test]
    async fn directory_row_without_theme_uses_fallback() {
        let directory = FakeDirectory::default().with_row(row("bare.example.com", None, None));
        let resolver = StoreResolver::new(&config(), directory);

        let resolution = resolver.resolve("bare.example.com").await.expect("row");
        assert_eq!(resolution.theme_id, "elegant");
    }

    #[tokio::test]
    async fn missing_row_and_lookup_failure_are_both_unresolved_but_distinct() {
        let missing = StoreResolver::new(&config(), FakeDirectory::default());
        let not_found = missing
            .resolve("nobody.example.com")
            .await
            .expect_err("missing row");

        let failing_directory = FakeDirectory::failing();
        let failing = StoreResolver::new(&config(), failing_directory.clone());
        let lookup = failing
            .resolve("nobody.example.com")
            .await
            .expect_err("lookup failure");

        assert!(not_found.is_not_found());
        assert!(!lookup.is_not_found());
        assert_eq!(lookup.label(), "lookup_error");
        assert_eq!(failing_directory.calls(), 1);
    }

    #[tokio::test]
    async fn empty_host_is_not_found_without_lookup() {
        let directory = FakeDirectory::default();
        let resolver = StoreResolver::new(&config(), directory.clone());
        assert!(resolver.resolve("  ").await.expect_err("empty").is_not_found());
        assert_eq!(directory.calls(), 0);
    }

    #[test]
    fn strategies_follow_priority_order() {
        let sources: Vec<_> = config()
            .strategies()
            .iter()
            .map(Strategy::source)
            .collect();
        assert_eq!(
            sources,
            vec![
                ResolutionSource::Preview,
                ResolutionSource::StaticMapping,
                ResolutionSource::Platform
            ]
        );
    }

    #[test]
    fn blank_preview_parts_never_match() {
        let rule = PreviewRule {
            root: String::new(),
            prefix: String::new(),
            suffix: String::new(),
            project_suffix: String::new(),
            theme_id: "modern".to_string(),
        };
        assert!(!rule.matches("anything.example.com"));
    }

    #[test]
    fn each_strategy_resolves_in_isolation() {
        let host = HostName::parse("www.demo.example.com");
        let strategies = config().strategies();
        let hits: Vec<_> = strategies
            .iter()
            .map(|strategy| strategy.try_resolve(&host).map(|r| r.theme_id))
            .collect();
        assert_eq!(hits, vec![None, Some("bold".to_string()), None]);
    }
}
