// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! DNS ownership verification.
//!
//! A tenant proves it controls a domain name by publishing a TXT record:
//!
//! - Each `CustomDomain` holds a random verification key.
//! - Each registration gets a token derived from that key and its own UID
//!   with HMAC-SHA256, so two tenants never share a token.
//! - The record name is the verification label prefixed to the registrable
//!   root of the domain (`_skygear.example.com` for both `example.com` and
//!   `shop.example.com`). Several tenants may publish values under the same
//!   name; verification succeeds when the expected token is one of them.
//!
//! Attempts are rate limited: [`plan_verification`] decides whether a pass
//! should look up DNS now, wait for the cooldown to elapse, or do nothing.

use crate::constants::{
    DEFAULT_VERIFICATION_RECORD_LABEL, VERIFICATION_COOLDOWN_SECS, VERIFICATION_KEY_BYTES,
    VERIFICATION_TIMEOUT_SECS,
};
use crate::errors::VerificationError;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Generate a new hex-encoded domain verification key.
#[must_use]
pub fn generate_key() -> String {
    hex::encode(rand::random::<[u8; VERIFICATION_KEY_BYTES]>())
}

/// Derive the verification token of one registration.
///
/// `nonce` is the registration UID. The token is the hex-encoded
/// HMAC-SHA256 of the nonce keyed with the domain verification key.
///
/// # Errors
///
/// Returns [`VerificationError::InvalidKey`] if HMAC rejects the key. HMAC
/// takes keys of any length, so this does not happen in practice.
pub fn derive_token(key: &str, nonce: &str) -> Result<String, VerificationError> {
    let mut mac = <HmacSha256 as KeyInit>::new_from_slice(key.as_bytes())
        .map_err(|e| VerificationError::InvalidKey(e.to_string()))?;
    mac.update(nonce.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Registrable root (eTLD+1) of `domain`.
///
/// Unknown suffixes are treated as single-label public suffixes, so
/// `sub.my-app.test` has root `my-app.test`.
#[must_use]
pub fn root_domain(domain: &str) -> Option<&str> {
    psl::domain_str(domain.trim_end_matches('.'))
}

/// Name of the TXT record proving ownership of `domain`.
///
/// # Errors
///
/// Returns [`VerificationError::InvalidDomain`] if `domain` is itself a public suffix.
pub fn record_name(label: &str, domain: &str) -> Result<String, VerificationError> {
    let root = root_domain(domain).ok_or_else(|| VerificationError::InvalidDomain {
        domain: domain.to_string(),
    })?;
    Ok(format!("{label}.{root}"))
}

/// Rate limiting and timeout policy for verification attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationPolicy {
    /// Minimum spacing between two attempts.
    pub cooldown: ChronoDuration,
    /// Upper bound on one DNS lookup.
    pub timeout: Duration,
    /// When set, a verified registration is re-checked this long after its last attempt.
    pub reverify_interval: Option<ChronoDuration>,
    /// Label prefixed to the registrable root to form the record name.
    pub record_label: String,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            cooldown: ChronoDuration::seconds(VERIFICATION_COOLDOWN_SECS as i64),
            timeout: Duration::from_secs(VERIFICATION_TIMEOUT_SECS),
            reverify_interval: None,
            record_label: DEFAULT_VERIFICATION_RECORD_LABEL.to_string(),
        }
    }
}

/// What a reconciliation pass should do about verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationPlan {
    /// No attempt is requested.
    Idle,
    /// An attempt is requested but not allowed before the given instant.
    Wait(DateTime<Utc>),
    /// Look up DNS now.
    Attempt,
}

/// Decide whether to attempt verification at `now`.
///
/// A request exists when `verify_at` is set and was not satisfied by a later
/// attempt, or when periodic re-verification is enabled and due. The attempt
/// happens strictly after both the request time and the end of the cooldown
/// that follows `last_attempt`. Instants past the representable range are
/// never reached.
#[must_use]
pub fn plan_verification(
    verify_at: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    policy: &VerificationPolicy,
) -> VerificationPlan {
    let explicit = verify_at.filter(|at| last_attempt.is_none_or(|last| last <= *at));
    let periodic = policy
        .reverify_interval
        .zip(last_attempt)
        .and_then(|(interval, last)| last.checked_add_signed(interval));

    let requested = match (explicit, periodic) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => return VerificationPlan::Idle,
    };

    let attempt_at = match last_attempt {
        Some(last) => match last.checked_add_signed(policy.cooldown) {
            Some(cooled_down) => requested.max(cooled_down),
            None => return VerificationPlan::Idle,
        },
        None => requested,
    };

    if now <= attempt_at {
        VerificationPlan::Wait(attempt_at)
    } else {
        VerificationPlan::Attempt
    }
}

/// TXT lookups used by verification.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// All TXT values published under `name`, one string per record.
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, VerificationError>;
}

/// [`DnsResolver`] backed by hickory.
pub struct HickoryResolver {
    resolver: TokioResolver,
}

impl HickoryResolver {
    /// Build a resolver from the system configuration, falling back to the
    /// library defaults when it cannot be read.
    #[must_use]
    pub fn from_system_conf() -> Self {
        let builder = match TokioResolver::builder(TokioConnectionProvider::default()) {
            Ok(builder) => builder,
            Err(e) => {
                warn!("Cannot read system DNS configuration, using defaults: {e}");
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
            }
        };
        Self {
            resolver: builder.with_options(ResolverOpts::default()).build(),
        }
    }
}

#[async_trait]
impl DnsResolver for HickoryResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, VerificationError> {
        let response =
            self.resolver
                .txt_lookup(name)
                .await
                .map_err(|e| VerificationError::Lookup {
                    reason: e.to_string(),
                })?;

        Ok(response
            .iter()
            .map(|txt| {
                txt.iter()
                    .map(|data| String::from_utf8_lossy(data).to_string())
                    .collect::<String>()
            })
            .collect())
    }
}

/// Check that `token` is published under `record_name`, bounded by `timeout`.
///
/// # Errors
///
/// - [`VerificationError::Timeout`] if the lookup exceeds `timeout`
/// - [`VerificationError::Lookup`] if the lookup fails
/// - [`VerificationError::RecordNotFound`] if the token is not among the values
pub async fn verify_domain(
    resolver: &dyn DnsResolver,
    record_name: &str,
    token: &str,
    timeout: Duration,
) -> Result<(), VerificationError> {
    let values = tokio::time::timeout(timeout, resolver.lookup_txt(record_name))
        .await
        .map_err(|_| VerificationError::Timeout {
            seconds: timeout.as_secs(),
        })??;

    debug!(record = %record_name, count = values.len(), "Looked up verification TXT record");

    if values.iter().any(|value| value == token) {
        Ok(())
    } else {
        Err(VerificationError::RecordNotFound)
    }
}

#[cfg(test)]
#[path = "verification_tests.rs"]
mod verification_tests;
