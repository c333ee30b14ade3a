use std::{fmt, str::FromStr, sync::LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_DOMAIN_LEN: usize = 253;

/// Labels are 1-63 characters and may not start or end with a hyphen. The TLD is alphabetic
/// or an `xn--` punycode label.
static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+(?:[a-z]{2,63}|xn--[a-z0-9-]{0,58}[a-z0-9])$",
    )
    .expect("invalid domain regex")
});

/// Validates and normalizes a domain entered by a merchant.
///
/// This is the only domain format check; the publication flow and domain management share it.
pub fn validate_domain(input: &str) -> Result<String, DomainValidationError> {
    let candidate = input.trim().trim_end_matches('.').to_ascii_lowercase();
    if candidate.is_empty() {
        return Err(DomainValidationError::Empty);
    }
    if candidate.len() > MAX_DOMAIN_LEN {
        return Err(DomainValidationError::TooLong(candidate.len()));
    }
    if !DOMAIN_RE.is_match(&candidate) {
        return Err(DomainValidationError::Invalid(candidate));
    }
    Ok(candidate)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainValidationError {
    #[error("domain must not be empty")]
    Empty,
    #[error("domain is {0} characters long, the maximum is 253")]
    TooLong(usize),
    #[error("'{0}' is not a valid domain name")]
    Invalid(String),
}

/// Builds a platform subdomain such as `modern-3fa9c1.mystorefront.shop`.
pub fn generate_subdomain(label: &str, entropy: [u8; 3], root: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    let slug = if slug.is_empty() { "store" } else { slug };

    format!(
        "{slug}-{}.{}",
        hex::encode(entropy),
        root.trim_start_matches('.')
    )
}

/// Verification status of a domain row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    Pending,
    Verified,
    Error,
}

impl DomainStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Error => "error",
        }
    }
}

impl FromStr for DomainStatus {
    type Err = UnknownDomainStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "error" => Ok(Self::Error),
            other => Err(UnknownDomainStatus(other.to_string())),
        }
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown domain status '{0}'")]
pub struct UnknownDomainStatus(pub String);

/// Whether a domain is merchant-owned or a platform subdomain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainKind {
    Custom,
    Subdomain,
}

impl DomainKind {
    /// Platform subdomains are the ones living under the configured subdomain root.
    pub fn classify(domain: &str, subdomain_root: &str) -> Self {
        let root = subdomain_root.trim_start_matches('.');
        if !root.is_empty() && domain.len() > root.len() && domain.ends_with(root) {
            let boundary = domain.len() - root.len() - 1;
            if domain.as_bytes().get(boundary) == Some(&b'.') {
                return Self::Subdomain;
            }
        }
        Self::Custom
    }

    pub fn is_custom(self) -> bool {
        matches!(self, Self::Custom)
    }
}

/// Domain row bound to a merchant and, once published, to a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainRecord {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_id: Option<String>,
    pub domain: String,
    pub status: DomainStatus,
    pub is_primary: bool,
    pub kind: DomainKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
