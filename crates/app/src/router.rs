use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{sse::Sse, IntoResponse},
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use storefront_core::{ResolverConfig, StoreResolver, ThemeCatalog};
use storefront_storage::{Database, StoreRepository};

use crate::auth::MerchantTokenValidator;
use crate::domains::{self, DomainService};
use crate::publish::{self, PublicationService};
use crate::tap::{tap_keep_alive, tap_stream, TapFilter, TapHub};
use crate::verification::DomainVerifier;
use crate::{mirror, storefront, telemetry};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    tap: TapHub,
    storage: Database,
    clock: Clock,
    resolver: Arc<StoreResolver<StoreRepository>>,
    catalog: ThemeCatalog,
    token_validator: MerchantTokenValidator,
    publication: PublicationService,
    domains: DomainService,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        metrics: PrometheusHandle,
        tap: TapHub,
        storage: Database,
        resolver_config: &ResolverConfig,
        token_secret: &[u8],
        verifier: Arc<dyn DomainVerifier>,
        subdomain_root: &str,
    ) -> Self {
        let clock: Clock = Arc::new(Utc::now);
        let resolver = Arc::new(StoreResolver::new(resolver_config, storage.stores()));
        let catalog = ThemeCatalog::builtin();
        let subdomain_root: Arc<str> = Arc::from(subdomain_root);
        let publication = PublicationService::new(
            storage.clone(),
            catalog,
            tap.clone(),
            clock.clone(),
            subdomain_root.clone(),
        );
        let domains = DomainService::new(
            storage.clone(),
            tap.clone(),
            verifier,
            clock.clone(),
            subdomain_root,
        );
        Self {
            metrics,
            tap,
            storage,
            clock,
            resolver,
            catalog,
            token_validator: MerchantTokenValidator::new(token_secret),
            publication,
            domains,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock.clone();
        self.publication = self.publication.with_clock(clock.clone());
        self.domains = self.domains.with_clock(clock);
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn tap(&self) -> &TapHub {
        &self.tap
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn resolver(&self) -> &StoreResolver<StoreRepository> {
        &self.resolver
    }

    pub fn catalog(&self) -> &ThemeCatalog {
        &self.catalog
    }

    pub fn token_validator(&self) -> &MerchantTokenValidator {
        &self.token_validator
    }

    pub fn publication(&self) -> &PublicationService {
        &self.publication
    }

    pub fn domains(&self) -> &DomainService {
        &self.domains
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/_debug/tap", get(debug_tap))
        .route(storefront::NOT_FOUND_PATH, get(storefront::store_not_found))
        .route("/api/resolve", get(storefront::resolve_api))
        .route("/api/themes", get(storefront::list_themes))
        .route("/api/publish", post(publish::publish_store))
        .route(
            "/api/domains",
            get(domains::list_domains).post(domains::add_domain),
        )
        .route(
            "/api/domains/:id/primary",
            post(domains::set_primary_domain),
        )
        .route("/api/domains/:id/verify", post(domains::verify_domain))
        .route("/api/domains/:id", delete(domains::delete_domain))
        .route("/api/merchant/cache/:kind", get(mirror::get_cache_entry))
        .fallback(storefront::storefront_page)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct TapQuery {
    #[serde(default)]
    s: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    user: Option<String>,
}

async fn debug_tap(
    State(state): State<AppState>,
    Query(query): Query<TapQuery>,
) -> Result<
    Sse<impl tokio_stream::Stream<Item = Result<axum::response::sse::Event, serde_json::Error>>>,
    (StatusCode, String),
> {
    let filter = TapFilter::from_query(query.s.as_deref(), query.host, query.user)
        .map_err(|err| (StatusCode::BAD_REQUEST, err))?;
    let stream = tap_stream(state.tap().clone(), filter);

    Ok(Sse::new(stream).keep_alive(tap_keep_alive()))
}
