use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use storefront_core::{DomainRecord, ThemeSettings};
use storefront_storage::MerchantCacheRepository;

use crate::auth::require_merchant;
use crate::problem::ProblemResponse;
use crate::router::{AppState, Clock};

/// Merchant state mirrored for the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorKind {
    Store,
    Themes,
    Domains,
}

impl MirrorKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "store" => Some(Self::Store),
            "themes" => Some(Self::Themes),
            "domains" => Some(Self::Domains),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Themes => "themes",
            Self::Domains => "domains",
        }
    }

    pub fn key(self, user_id: &str) -> String {
        format!("{}_{user_id}", self.as_str())
    }
}

/// Writes merchant snapshots into the cache table. Failures are logged and swallowed.
#[derive(Clone)]
pub struct LocalMirror {
    cache: MerchantCacheRepository,
    clock: Clock,
}

impl LocalMirror {
    pub fn new(cache: MerchantCacheRepository, clock: Clock) -> Self {
        Self { cache, clock }
    }

    pub async fn record_store(
        &self,
        user_id: &str,
        store_id: &str,
        domain: &str,
        theme_id: &str,
        published_at: DateTime<Utc>,
    ) {
        let value = json!({
            "store_id": store_id,
            "domain": domain,
            "theme_id": theme_id,
            "published_at": published_at.to_rfc3339(),
        });
        self.write(MirrorKind::Store, user_id, &value).await;
    }

    pub async fn record_themes(&self, user_id: &str, theme_id: &str, settings: &ThemeSettings) {
        let value = json!({
            "selected": theme_id,
            "settings": settings,
        });
        self.write(MirrorKind::Themes, user_id, &value).await;
    }

    pub async fn record_domains(&self, user_id: &str, domains: &[DomainRecord]) {
        let value = json!({ "domains": domains });
        self.write(MirrorKind::Domains, user_id, &value).await;
    }

    async fn write(&self, kind: MirrorKind, user_id: &str, value: &Value) {
        let key = kind.key(user_id);
        match self.cache.put(&key, value, (self.clock)()).await {
            Ok(()) => {
                counter!("merchant_cache_writes_total", "result" => "ok").increment(1);
                debug!(stage = "storage", key = %key, "merchant cache updated");
            }
            Err(err) => {
                counter!("merchant_cache_writes_total", "result" => "error").increment(1);
                warn!(stage = "storage", key = %key, error = %err, "failed to mirror merchant state");
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CacheEntryView {
    key: String,
    value: Value,
    updated_at: DateTime<Utc>,
}

pub async fn get_cache_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(kind): Path<String>,
) -> Result<Json<CacheEntryView>, ProblemResponse> {
    let user_id = require_merchant(&state, &headers)?;
    let kind = MirrorKind::parse(&kind).ok_or_else(|| {
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "unknown_cache_kind",
            format!("'{kind}' is not one of store, themes, domains"),
        )
    })?;

    let entry = state
        .storage()
        .merchant_cache()
        .get(&kind.key(&user_id))
        .await
        .map_err(|err| {
            warn!(stage = "storage", error = %err, "failed to read merchant cache");
            ProblemResponse::internal("cache_read_failed", "failed to read merchant cache")
        })?
        .ok_or_else(|| {
            ProblemResponse::new(
                StatusCode::NOT_FOUND,
                "cache_entry_not_found",
                format!("nothing mirrored for {}", kind.as_str()),
            )
        })?;

    Ok(Json(CacheEntryView {
        key: entry.key,
        value: entry.value,
        updated_at: entry.updated_at,
    }))
}
