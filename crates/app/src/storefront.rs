use std::{fmt::Write as _, time::Instant};

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info};

use storefront_core::{
    theme::DesignStyle, DomainMapping, HostName, PreviewRule, Resolution, ResolutionSource,
    ResolveError, ResolverConfig, ThemeSettings,
};
use storefront_util::StorefrontConfig;

use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::tap::{StageEvent, StageKind, StageMetadata};

pub const NOT_FOUND_PATH: &str = "/store-not-found";
const THEME_HEADER: &str = "x-storefront-theme";

/// Builds the resolver configuration from the environment-derived settings.
pub fn resolver_config(config: &StorefrontConfig) -> ResolverConfig {
    ResolverConfig {
        preview: Some(PreviewRule {
            root: config.preview_root.to_ascii_lowercase(),
            prefix: config.preview_prefix.to_ascii_lowercase(),
            suffix: config.preview_suffix.to_ascii_lowercase(),
            project_suffix: config.project_suffix.to_ascii_lowercase(),
            theme_id: config.preview_theme.clone(),
        }),
        mapping: DomainMapping::new(
            config
                .static_domains
                .iter()
                .map(|(host, theme)| (host.as_str(), theme.as_str())),
            config.default_theme.as_str(),
        ),
        platform_suffix: Some(config.platform_suffix.clone()).filter(|s| !s.is_empty()),
        fallback_theme: config.fallback_theme.clone(),
    }
}

/// Resolves a hostname and records the outcome in logs, metrics and the tap.
///
/// Logs and tap events carry the normalized host so they line up with stored domains.
pub async fn resolve_host(state: &AppState, raw_host: &str) -> Result<Resolution, ResolveError> {
    let host = HostName::parse(raw_host);
    let started = Instant::now();
    let result = state.resolver().resolve(raw_host).await;
    let elapsed = started.elapsed().as_secs_f64();

    // An empty host is rejected before any strategy or lookup runs.
    let source = match &result {
        Ok(resolution) => resolution.source.as_str(),
        Err(_) if host.is_empty() => "none",
        Err(_) => ResolutionSource::Directory.as_str(),
    };
    let outcome = match &result {
        Ok(_) => "resolved",
        Err(err) => err.label(),
    };
    if source == ResolutionSource::Directory.as_str() {
        histogram!("storefront_lookup_seconds").record(elapsed);
    }
    counter!("storefront_resolutions_total", "source" => source, "outcome" => outcome)
        .increment(1);

    let host_name = host.normalized();
    match &result {
        Ok(resolution) => debug!(
            stage = "resolver",
            host = host_name,
            source,
            store_id = %resolution.store.id,
            theme = %resolution.theme_id,
            "host resolved"
        ),
        Err(err @ ResolveError::NotFound { .. }) => {
            info!(stage = "resolver", host = host_name, error = %err, "no store for host")
        }
        Err(err @ ResolveError::Lookup { .. }) => {
            error!(stage = "resolver", host = host_name, error = %err, "store lookup failed")
        }
    }

    let out = match &result {
        Ok(resolution) => json!({
            "store_id": resolution.store.id,
            "theme_id": resolution.theme_id,
            "source": resolution.source,
        }),
        Err(err) => json!({ "error": err.label() }),
    };
    state.tap().publish(StageEvent::new(
        state.now(),
        StageKind::Resolver,
        StageMetadata {
            host: Some(host_name.to_string()).filter(|value| !value.is_empty()),
            latency_ms: Some(elapsed * 1000.0),
            message: Some(format!("resolve.{outcome}")),
            ..StageMetadata::default()
        },
        out,
    ));

    result
}

fn effective_settings(state: &AppState, resolution: &Resolution) -> ThemeSettings {
    state.catalog().effective_settings(
        &resolution.theme_id,
        resolution.store.theme_settings.as_ref(),
        state.resolver().fallback_theme(),
    )
}

fn request_host<'a>(headers: &'a HeaderMap, uri: &'a Uri) -> &'a str {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
        .unwrap_or_default()
}

/// Serves the storefront shell for whatever host the request was addressed to.
pub async fn storefront_page(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return ProblemResponse::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            format!("{method} is not supported here"),
        )
        .into_response();
    }
    if uri.path().starts_with("/api/") {
        return ProblemResponse::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no API route at {}", uri.path()),
        )
        .into_response();
    }

    let host = request_host(&headers, &uri);
    let resolution = match resolve_host(&state, host).await {
        Ok(resolution) => resolution,
        Err(_) => return Redirect::to(NOT_FOUND_PATH).into_response(),
    };

    let settings = effective_settings(&state, &resolution);
    let body = render_storefront(&resolution, &settings, uri.path());
    let mut response = Html(body).into_response();
    if let Ok(value) = HeaderValue::from_str(&resolution.theme_id) {
        response.headers_mut().insert(THEME_HEADER, value);
    }
    response
}

pub async fn store_not_found() -> (StatusCode, Html<&'static str>) {
    (
        StatusCode::NOT_FOUND,
        Html(
            "<!doctype html>\n<html lang=\"en\"><head><meta charset=\"utf-8\">\
             <title>Store not found</title></head>\
             <body><main><h1>Store not found</h1>\
             <p>No store is published at this address.</p></main></body></html>\n",
        ),
    )
}

#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    #[serde(default)]
    host: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    host: String,
    store_id: String,
    domain: String,
    theme_id: String,
    source: ResolutionSource,
    settings: ThemeSettings,
}

/// JSON variant of the storefront lookup. Falls back to the request host without `?host=`.
pub async fn resolve_api(
    State(state): State<AppState>,
    Query(query): Query<ResolveQuery>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Json<ResolveResponse>, ProblemResponse> {
    let host = query
        .host
        .unwrap_or_else(|| request_host(&headers, &uri).to_string());

    let resolution = resolve_host(&state, &host).await.map_err(|err| match err {
        ResolveError::NotFound { .. } => {
            ProblemResponse::new(StatusCode::NOT_FOUND, "store_not_found", err.to_string())
        }
        ResolveError::Lookup { .. } => ProblemResponse::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_lookup_failed",
            err.to_string(),
        ),
    })?;

    let settings = effective_settings(&state, &resolution);
    Ok(Json(ResolveResponse {
        host,
        store_id: resolution.store.id,
        domain: resolution.store.domain,
        theme_id: resolution.theme_id,
        source: resolution.source,
        settings,
    }))
}

#[derive(Debug, Serialize)]
pub struct ThemeSummary {
    id: &'static str,
    name: &'static str,
    style: DesignStyle,
    defaults: ThemeSettings,
}

pub async fn list_themes(State(state): State<AppState>) -> Json<Vec<ThemeSummary>> {
    Json(
        state
            .catalog()
            .iter()
            .map(|theme| ThemeSummary {
                id: theme.id,
                name: theme.name,
                style: theme.style,
                defaults: theme.defaults(),
            })
            .collect(),
    )
}

pub fn render_storefront(resolution: &Resolution, settings: &ThemeSettings, path: &str) -> String {
    let mut css = String::from(":root {\n");
    for (name, value) in settings.css_variables() {
        if value.is_empty() {
            continue;
        }
        let _ = writeln!(css, "  {name}: {};", escape_css(value));
    }
    css.push('}');

    format!(
        "<!doctype html>\n\
         <html lang=\"en\" data-theme=\"{theme}\">\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n\
         <style>\n{css}\n</style>\n\
         </head>\n\
         <body data-store-id=\"{store_id}\" data-source=\"{source}\" data-path=\"{path}\">\n\
         <div id=\"storefront\"></div>\n\
         </body>\n\
         </html>\n",
        theme = escape_html(&resolution.theme_id),
        title = escape_html(&resolution.store.domain),
        store_id = escape_html(&resolution.store.id),
        source = resolution.source.as_str(),
        path = escape_html(path),
    )
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Merchant values end up inside a `<style>` block; strip anything that could close it.
fn escape_css(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !matches!(ch, '<' | '>' | '{' | '}' | ';'))
        .collect()
}
