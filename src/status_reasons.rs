// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Standard Kubernetes status condition types and reasons for custom domain resources.
//!
//! Reasons are programmatic identifiers in CamelCase that explain why a condition has
//! a particular status.
//!
//! # Condition Types
//!
//! A `CustomDomain` reports a single condition:
//!
//! - `LoadBalancerProvisioned` - the shared routing endpoint exists and its DNS
//!   records are published in `status.routingEndpoint`
//!
//! A `CustomDomainRegistration` reports four conditions, each evaluated on
//! every reconciliation pass:
//!
//! - `Verified` - the tenant proved ownership of the name through a TXT record
//! - `Accepted` - the tenant won arbitration for the name
//! - `CertReady` - a TLS certificate is available for the name
//! - `IngressReady` - traffic for the name is routed to the tenant's backend
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   conditions:
//!     - type: Verified
//!       status: "True"
//!       reason: DomainVerified
//!       lastTransitionTime: "2025-01-01T00:00:00Z"
//!     - type: Accepted
//!       status: "False"
//!       reason: NotOwner
//!       lastTransitionTime: "2025-01-01T00:00:00Z"
//! ```

// ============================================================================
// Condition Status Values
// ============================================================================

/// Condition holds.
pub const STATUS_TRUE: &str = "True";

/// Condition does not hold.
pub const STATUS_FALSE: &str = "False";

/// Condition could not be evaluated (transient collaborator failure).
pub const STATUS_UNKNOWN: &str = "Unknown";

// ============================================================================
// Condition Types
// ============================================================================

/// The shared load balancer for a `CustomDomain` is provisioned.
pub const CONDITION_TYPE_LOAD_BALANCER_PROVISIONED: &str = "LoadBalancerProvisioned";

/// Ownership of the domain name has been proven via DNS.
pub const CONDITION_TYPE_VERIFIED: &str = "Verified";

/// The registration's tenant owns the domain name.
pub const CONDITION_TYPE_ACCEPTED: &str = "Accepted";

/// A certificate for the domain name is available.
pub const CONDITION_TYPE_CERT_READY: &str = "CertReady";

/// The Ingress routing the domain name is in place.
pub const CONDITION_TYPE_INGRESS_READY: &str = "IngressReady";

// ============================================================================
// CustomDomain Reasons
// ============================================================================

/// Load balancer provisioning succeeded.
pub const REASON_PROVISIONED: &str = "Provisioned";

/// Load balancer provisioning or release failed transiently.
pub const REASON_PROVIDER_ERROR: &str = "ProviderError";

/// Load balancer is being released while the domain terminates.
pub const REASON_RELEASING: &str = "Releasing";

// ============================================================================
// CustomDomainRegistration Reasons
// ============================================================================

/// The verification TXT record contained the registration's token.
pub const REASON_DOMAIN_VERIFIED: &str = "DomainVerified";

/// No verification attempt has succeeded yet.
pub const REASON_NOT_VERIFIED: &str = "NotVerified";

/// The last verification attempt failed.
pub const REASON_VERIFICATION_FAILED: &str = "VerificationFailed";

/// The tenant is the owner of the domain name.
pub const REASON_DOMAIN_OWNER: &str = "DomainOwner";

/// Another tenant (or nobody yet) owns the domain name.
pub const REASON_NOT_OWNER: &str = "NotOwner";

/// The registration is still listed on its `CustomDomain` while terminating.
pub const REASON_UNREGISTERING: &str = "Unregistering";

/// The registration is no longer listed on its `CustomDomain`.
pub const REASON_UNREGISTERED: &str = "Unregistered";

/// A certificate has been issued and its secret is available.
pub const REASON_CERTIFICATE_ISSUED: &str = "CertificateIssued";

/// Certificate issuance has been requested but has not completed.
pub const REASON_CERTIFICATE_PENDING: &str = "CertificatePending";

/// Certificate issuance is not requested because the registration is not accepted.
pub const REASON_CERTIFICATE_RELEASED: &str = "CertificateReleased";

/// A previously issued certificate is still being torn down.
pub const REASON_CERTIFICATE_RELEASING: &str = "CertificateReleasing";

/// The Ingress for the domain name is up to date.
pub const REASON_INGRESS_CONFIGURED: &str = "IngressConfigured";

/// No Ingress exists because the registration is not accepted.
pub const REASON_INGRESS_REMOVED: &str = "IngressRemoved";

/// An Ingress with the domain's name exists but is managed by someone else.
pub const REASON_INGRESS_CONFLICT: &str = "IngressConflict";

/// A store or provider call failed; the message carries the error.
pub const REASON_RECONCILE_ERROR: &str = "ReconcileError";
