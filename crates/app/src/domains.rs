use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use metrics::counter;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use storefront_core::{
    domain::generate_subdomain, validate_domain, DomainKind, DomainRecord, DomainStatus,
    DomainValidationError,
};
use storefront_storage::{Database, DomainCheck, DomainError, DomainRepository, NewDomain};

use crate::auth::require_merchant;
use crate::mirror::LocalMirror;
use crate::problem::ProblemResponse;
use crate::router::{AppState, Clock};
use crate::tap::{StageEvent, StageKind, StageMetadata, TapHub};
use crate::verification::{DomainVerifier, VerificationOutcome};

const GENERATED_LABEL: &str = "store";

/// Merchant domain management on top of the domain repository.
#[derive(Clone)]
pub struct DomainService {
    database: Database,
    tap: TapHub,
    verifier: Arc<dyn DomainVerifier>,
    clock: Clock,
    mirror: LocalMirror,
    subdomain_root: Arc<str>,
}

impl DomainService {
    pub fn new(
        database: Database,
        tap: TapHub,
        verifier: Arc<dyn DomainVerifier>,
        clock: Clock,
        subdomain_root: impl Into<Arc<str>>,
    ) -> Self {
        let mirror = LocalMirror::new(database.merchant_cache(), clock.clone());
        Self {
            database,
            tap,
            verifier,
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

    pub fn repository(&self) -> DomainRepository {
        self.database.domains()
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<DomainRecord>, DomainServiceError> {
        Ok(self.repository().list_for_user(user_id).await?)
    }

    /// Registers a domain for the merchant, or a generated subdomain when none is given.
    ///
    /// Platform subdomains need no DNS work and are stored verified.
    pub async fn add(
        &self,
        user_id: &str,
        requested: Option<&str>,
    ) -> Result<DomainRecord, DomainServiceError> {
        let domain = match requested {
            Some(raw) => validate_domain(raw)?,
            None => generate_subdomain(GENERATED_LABEL, rand::random(), &self.subdomain_root),
        };
        let kind = DomainKind::classify(&domain, &self.subdomain_root);
        let now = (self.clock)();
        let (status, verified_at) = match kind {
            DomainKind::Subdomain => (DomainStatus::Verified, Some(now)),
            DomainKind::Custom => (DomainStatus::Pending, None),
        };

        let record = self
            .repository()
            .insert(&NewDomain {
                user_id,
                domain: &domain,
                store_id: None,
                kind,
                status,
                verified_at,
                created_at: now,
            })
            .await
            .map_err(|err| match err {
                DomainError::Duplicate => DomainServiceError::Duplicate(domain.clone()),
                other => other.into(),
            })?;

        self.after_mutation("add", &record).await;
        Ok(record)
    }

    pub async fn set_primary(
        &self,
        user_id: &str,
        domain_id: &str,
    ) -> Result<DomainRecord, DomainServiceError> {
        let record = self
            .repository()
            .set_primary(user_id, domain_id, (self.clock)())
            .await?;
        self.after_mutation("set_primary", &record).await;
        Ok(record)
    }

    /// Runs a DNS check right away for one of the merchant's domains.
    pub async fn verify(
        &self,
        user_id: &str,
        domain_id: &str,
    ) -> Result<DomainRecord, DomainServiceError> {
        let record = self
            .repository()
            .find_for_user(user_id, domain_id)
            .await?
            .ok_or(DomainServiceError::NotFound)?;
        Ok(self.check(&record).await?)
    }

    pub async fn delete(&self, user_id: &str, domain_id: &str) -> Result<(), DomainServiceError> {
        let record = self
            .repository()
            .find_for_user(user_id, domain_id)
            .await?
            .ok_or(DomainServiceError::NotFound)?;
        if !self.repository().delete_for_user(user_id, domain_id).await? {
            return Err(DomainServiceError::NotFound);
        }
        self.after_mutation("delete", &record).await;
        Ok(())
    }

    /// Asks the verifier about `record` and stores the outcome.
    pub async fn check(&self, record: &DomainRecord) -> Result<DomainRecord, DomainError> {
        let outcome = self.verifier.verify(&record.domain);
        let (status, error_message) = match &outcome {
            VerificationOutcome::Verified => (DomainStatus::Verified, None),
            VerificationOutcome::Failed(reason) => (DomainStatus::Error, Some(reason.as_str())),
        };

        let updated = self
            .repository()
            .record_check(
                &record.id,
                &DomainCheck {
                    status,
                    error_message,
                    checked_at: (self.clock)(),
                },
            )
            .await?;

        counter!("domain_checks_total", "result" => status.as_str()).increment(1);
        info!(
            stage = "verify",
            domain = %updated.domain,
            status = %updated.status,
            "domain check recorded"
        );
        self.publish_event(
            StageKind::Verify,
            "domain.check",
            &updated,
            json!({ "status": updated.status, "error_message": updated.error_message }),
        );
        self.refresh_mirror(&updated.user_id).await;
        Ok(updated)
    }

    async fn after_mutation(&self, op: &'static str, record: &DomainRecord) {
        counter!("domain_mutations_total", "op" => op).increment(1);
        info!(
            stage = "domain",
            op,
            user_id = %record.user_id,
            domain = %record.domain,
            "domain updated"
        );
        self.publish_event(
            StageKind::Domain,
            &format!("domain.{op}"),
            record,
            json!({ "id": record.id, "is_primary": record.is_primary, "status": record.status }),
        );
        self.refresh_mirror(&record.user_id).await;
    }

    async fn refresh_mirror(&self, user_id: &str) {
        match self.repository().list_for_user(user_id).await {
            Ok(domains) => self.mirror.record_domains(user_id, &domains).await,
            Err(err) => {
                warn!(stage = "storage", user_id, error = %err, "failed to load domains for mirror")
            }
        }
    }

    fn publish_event(
        &self,
        stage: StageKind,
        message: &str,
        record: &DomainRecord,
        out: serde_json::Value,
    ) {
        self.tap.publish(StageEvent::new(
            (self.clock)(),
            stage,
            StageMetadata {
                host: Some(record.domain.clone()),
                user_id: Some(record.user_id.clone()),
                message: Some(message.to_string()),
                ..StageMetadata::default()
            },
            out,
        ));
    }
}

#[derive(Debug, Error)]
pub enum DomainServiceError {
    #[error(transparent)]
    Invalid(#[from] DomainValidationError),
    #[error("domain '{0}' is already registered")]
    Duplicate(String),
    #[error("domain not found")]
    NotFound,
    #[error("domain storage failed: {0}")]
    Storage(DomainError),
}

impl From<DomainError> for DomainServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound => Self::NotFound,
            other => Self::Storage(other),
        }
    }
}

impl From<DomainServiceError> for ProblemResponse {
    fn from(err: DomainServiceError) -> Self {
        match &err {
            DomainServiceError::Invalid(_) => {
                ProblemResponse::new(StatusCode::BAD_REQUEST, "invalid_domain", err.to_string())
            }
            DomainServiceError::Duplicate(_) => {
                ProblemResponse::new(StatusCode::CONFLICT, "domain_taken", err.to_string())
            }
            DomainServiceError::NotFound => {
                ProblemResponse::new(StatusCode::NOT_FOUND, "domain_not_found", err.to_string())
            }
            DomainServiceError::Storage(inner) => {
                warn!(stage = "domain", error = %inner, "domain storage failure");
                ProblemResponse::internal("domain_storage_failed", "failed to update domains")
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddDomainRequest {
    #[serde(default)]
    domain: Option<String>,
}

pub async fn list_domains(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<DomainRecord>>, ProblemResponse> {
    let user_id = require_merchant(&state, &headers)?;
    Ok(Json(state.domains().list(&user_id).await?))
}

pub async fn add_domain(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AddDomainRequest>,
) -> Result<(StatusCode, Json<DomainRecord>), ProblemResponse> {
    let user_id = require_merchant(&state, &headers)?;
    let record = state
        .domains()
        .add(&user_id, request.domain.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn set_primary_domain(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(domain_id): Path<String>,
) -> Result<Json<DomainRecord>, ProblemResponse> {
    let user_id = require_merchant(&state, &headers)?;
    Ok(Json(state.domains().set_primary(&user_id, &domain_id).await?))
}

pub async fn verify_domain(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(domain_id): Path<String>,
) -> Result<Json<DomainRecord>, ProblemResponse> {
    let user_id = require_merchant(&state, &headers)?;
    Ok(Json(state.domains().verify(&user_id, &domain_id).await?))
}

pub async fn delete_domain(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(domain_id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    let user_id = require_merchant(&state, &headers)?;
    state.domains().delete(&user_id, &domain_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
