use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use storefront_core::{
    domain::generate_subdomain, validate_domain, DomainKind, DomainStatus,
    DomainValidationError, ThemeCatalog, ThemeSettings,
};
use storefront_storage::{Database, DomainError, NewDomain, NewStore, StoreError};

use crate::auth::require_merchant;
use crate::mirror::LocalMirror;
use crate::problem::ProblemResponse;
use crate::router::{AppState, Clock};
use crate::tap::{StageEvent, StageKind, StageMetadata, TapHub};

#[derive(Debug, Clone, Deserialize)]
pub struct PublishRequest {
    pub theme_id: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub settings: Option<ThemeSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Publication {
    pub store_id: String,
    pub domain: String,
    pub theme_id: String,
    pub domain_status: DomainStatus,
}

/// Writes a merchant's store and its domain binding.
///
/// Both rows are written in one transaction. The merchant cache is refreshed after commit.
#[derive(Clone)]
pub struct PublicationService {
    database: Database,
    catalog: ThemeCatalog,
    tap: TapHub,
    clock: Clock,
    mirror: LocalMirror,
    subdomain_root: Arc<str>,
}

impl PublicationService {
    pub fn new(
        database: Database,
        catalog: ThemeCatalog,
        tap: TapHub,
        clock: Clock,
        subdomain_root: impl Into<Arc<str>>,
    ) -> Self {
        let mirror = LocalMirror::new(database.merchant_cache(), clock.clone());
        Self {
            database,
            catalog,
            tap,
            clock,
            mirror,
            subdomain_root: subdomain_root.into(),
        }
    }

    /// Replaces the clock, keeping the mirror in step.
    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.mirror = LocalMirror::new(self.database.merchant_cache(), clock.clone());
        self.clock = clock;
        self
    }

    pub async fn publish(
        &self,
        user_id: &str,
        request: PublishRequest,
    ) -> Result<Publication, PublishError> {
        let result = self.publish_inner(user_id, request).await;
        let label = match &result {
            Ok(_) => "ok",
            Err(err) => err.label(),
        };
        counter!("storefront_publications_total", "result" => label).increment(1);
        result
    }

    async fn publish_inner(
        &self,
        user_id: &str,
        request: PublishRequest,
    ) -> Result<Publication, PublishError> {
        let theme_id = request.theme_id.trim().to_string();
        if !self.catalog.contains(&theme_id) {
            return Err(PublishError::UnknownTheme(theme_id));
        }

        let domain = match request.domain.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(raw) => validate_domain(raw)?,
            None => generate_subdomain(&theme_id, rand::random(), &self.subdomain_root),
        };
        let kind = DomainKind::classify(&domain, &self.subdomain_root);
        let settings =
            self.catalog
                .effective_settings(&theme_id, request.settings.as_ref(), &theme_id);
        let now = (self.clock)();
        let (status, verified_at) = match kind {
            DomainKind::Subdomain => (DomainStatus::Verified, Some(now)),
            DomainKind::Custom => (DomainStatus::Pending, None),
        };

        let stores = self.database.stores();
        let domains = self.database.domains();
        let mut tx = self.database.begin().await?;

        if let Some(existing) = stores.fetch_by_domain_in(&mut tx, &domain).await? {
            if existing.user_id.as_deref().is_some_and(|owner| owner != user_id) {
                return Err(PublishError::DomainTaken(domain));
            }
        }
        if let Some(existing) = domains.fetch_by_domain_in(&mut tx, &domain).await? {
            if existing.user_id != user_id {
                return Err(PublishError::DomainTaken(domain));
            }
        }

        let store_id = stores
            .upsert(
                &mut tx,
                &NewStore {
                    user_id,
                    domain: &domain,
                    selected_theme: &theme_id,
                    theme_settings: &settings,
                    updated_at: now,
                },
            )
            .await?;
        let domain_row = domains
            .upsert_for_store(
                &mut tx,
                &NewDomain {
                    user_id,
                    domain: &domain,
                    store_id: Some(store_id.as_str()),
                    kind,
                    status,
                    verified_at,
                    created_at: now,
                },
            )
            .await?;
        tx.commit().await?;

        let publication = Publication {
            store_id,
            domain,
            theme_id,
            domain_status: domain_row.status,
        };

        info!(
            stage = "publish",
            user_id,
            store_id = %publication.store_id,
            domain = %publication.domain,
            theme = %publication.theme_id,
            "store published"
        );
        self.tap.publish(StageEvent::new(
            now,
            StageKind::Publish,
            StageMetadata {
                host: Some(publication.domain.clone()),
                user_id: Some(user_id.to_string()),
                message: Some("store.published".to_string()),
                ..StageMetadata::default()
            },
            json!(publication),
        ));

        self.mirror
            .record_store(
                user_id,
                &publication.store_id,
                &publication.domain,
                &publication.theme_id,
                now,
            )
            .await;
        self.mirror
            .record_themes(user_id, &publication.theme_id, &settings)
            .await;
        match domains.list_for_user(user_id).await {
            Ok(all) => self.mirror.record_domains(user_id, &all).await,
            Err(err) => {
                warn!(stage = "storage", user_id, error = %err, "failed to load domains for mirror")
            }
        }

        Ok(publication)
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("theme '{0}' is not in the catalog")]
    UnknownTheme(String),
    #[error(transparent)]
    InvalidDomain(#[from] DomainValidationError),
    #[error("domain '{0}' belongs to another merchant")]
    DomainTaken(String),
    #[error("store write failed: {0}")]
    Store(#[from] StoreError),
    #[error("domain write failed: {0}")]
    Domain(#[from] DomainError),
    #[error("transaction failed: {0}")]
    Database(#[from] sqlx::Error),
}

impl PublishError {
    pub fn label(&self) -> &'static str {
        match self {
            Self::UnknownTheme(_) => "unknown_theme",
            Self::InvalidDomain(_) => "invalid_domain",
            Self::DomainTaken(_) => "domain_taken",
            Self::Store(_) | Self::Domain(_) | Self::Database(_) => "storage_error",
        }
    }
}

impl From<PublishError> for ProblemResponse {
    fn from(err: PublishError) -> Self {
        let status = match &err {
            PublishError::UnknownTheme(_) | PublishError::InvalidDomain(_) => {
                StatusCode::BAD_REQUEST
            }
            PublishError::DomainTaken(_) => StatusCode::CONFLICT,
            PublishError::Store(_) | PublishError::Domain(_) | PublishError::Database(_) => {
                warn!(stage = "publish", error = %err, "publication failed");
                return ProblemResponse::internal("publish_failed", "failed to publish store");
            }
        };
        ProblemResponse::new(status, err.label(), err.to_string())
    }
}

pub async fn publish_store(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PublishRequest>,
) -> Result<Json<Publication>, ProblemResponse> {
    let user_id = require_merchant(&state, &headers)?;
    Ok(Json(state.publication().publish(&user_id, request).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use storefront_core::{DomainRecord, StoreDirectory};

    use crate::telemetry;

    async fn setup() -> (Database, PublicationService) {
        telemetry::init_metrics().expect("metrics");
        let db = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        db.run_migrations().await.expect("migrations");
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let service = PublicationService::new(
            db.clone(),
            ThemeCatalog::builtin(),
            TapHub::new(),
            Arc::new(move || now),
            "mystorefront.shop",
        );
        (db, service)
    }

    fn request(theme_id: &str, domain: Option<&str>) -> PublishRequest {
        PublishRequest {
            theme_id: theme_id.to_string(),
            domain: domain.map(str::to_string),
            settings: None,
        }
    }

    async fn domains_of(db: &Database, user_id: &str) -> Vec<DomainRecord> {
        db.domains().list_for_user(user_id).await.expect("list")
    }

    #[tokio::test]
    async fn custom_domain_is_stored_pending_with_consistent_theme() {
        let (db, service) = setup().await;
        let mut settings = ThemeSettings::default().with_id("classic");
        settings.colors.primary = "#112233".to_string();

        let publication = service
            .publish(
                "u-1",
                PublishRequest {
                    settings: Some(settings),
                    ..request("bold", Some("Shop.Example.com"))
                },
            )
            .await
            .expect("publish");
        assert_eq!(publication.domain, "shop.example.com");
        assert_eq!(publication.domain_status, DomainStatus::Pending);

        let store = db
            .stores()
            .find_by_domain("shop.example.com")
            .await
            .expect("lookup")
            .expect("store row");
        assert_eq!(store.selected_theme.as_deref(), Some("bold"));
        let stored = store.theme_settings.expect("settings stored");
        assert_eq!(stored.id.as_deref(), Some("bold"));
        assert_eq!(stored.colors.primary, "#112233");
        assert!(!stored.fonts.heading.is_empty());

        let domains = domains_of(&db, "u-1").await;
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0].store_id.as_deref(), Some(publication.store_id.as_str()));
        assert!(domains[0].is_primary);
    }

    #[tokio::test]
    async fn missing_domain_generates_verified_subdomain() {
        let (db, service) = setup().await;
        let publication = service
            .publish("u-1", request("modern", None))
            .await
            .expect("publish");

        assert!(publication.domain.starts_with("modern-"));
        assert!(publication.domain.ends_with(".mystorefront.shop"));
        assert_eq!(publication.domain_status, DomainStatus::Verified);

        let domains = domains_of(&db, "u-1").await;
        assert_eq!(domains[0].kind, DomainKind::Subdomain);
        assert!(domains[0].verified_at.is_some());
    }

    #[tokio::test]
    async fn republishing_keeps_store_id() {
        let (db, service) = setup().await;
        let first = service
            .publish("u-1", request("modern", Some("again.example.com")))
            .await
            .expect("first");
        let second = service
            .publish("u-1", request("elegant", Some("again.example.com")))
            .await
            .expect("second");

        assert_eq!(first.store_id, second.store_id);
        assert_eq!(domains_of(&db, "u-1").await.len(), 1);
        let store = db
            .stores()
            .find_by_domain("again.example.com")
            .await
            .expect("lookup")
            .expect("row");
        assert_eq!(store.theme_id("minimal"), "elegant");
    }

    #[tokio::test]
    async fn rejects_unknown_theme_invalid_domain_and_foreign_domain() {
        let (db, service) = setup().await;

        let err = service
            .publish("u-1", request("neon", Some("shop.example.com")))
            .await
            .expect_err("unknown theme");
        assert!(matches!(err, PublishError::UnknownTheme(_)));

        let err = service
            .publish("u-1", request("modern", Some("-bad-.com")))
            .await
            .expect_err("invalid domain");
        assert!(matches!(err, PublishError::InvalidDomain(_)));

        service
            .publish("u-1", request("modern", Some("mine.example.com")))
            .await
            .expect("owner publishes");
        let err = service
            .publish("u-2", request("bold", Some("mine.example.com")))
            .await
            .expect_err("taken");
        assert!(matches!(err, PublishError::DomainTaken(_)));

        let store = db
            .stores()
            .find_by_domain("mine.example.com")
            .await
            .expect("lookup")
            .expect("row");
        assert_eq!(store.user_id.as_deref(), Some("u-1"));
        assert!(domains_of(&db, "u-2").await.is_empty());
    }

    #[tokio::test]
    async fn publication_mirrors_store_and_themes() {
        let (db, service) = setup().await;
        service
            .publish("u-1", request("classic", Some("mirror.example.com")))
            .await
            .expect("publish");

        let cache = db.merchant_cache();
        let store = cache.get("store_u-1").await.expect("get").expect("store");
        assert_eq!(store.value["domain"], "mirror.example.com");
        let themes = cache.get("themes_u-1").await.expect("get").expect("themes");
        assert_eq!(themes.value["selected"], "classic");
        assert!(cache.get("domains_u-1").await.expect("get").is_some());
    }
}
