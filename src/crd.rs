// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for custom domain management.
//!
//! # Resource Types
//!
//! - [`CustomDomain`] - Cluster-scoped aggregate, one per distinct domain name.
//!   Its name *is* the domain name. It owns the shared load balancer, the
//!   verification key, and the result of ownership arbitration.
//! - [`CustomDomainRegistration`] - One tenant's claim on a domain name. The
//!   registration lives in the tenant's namespace and is named after the
//!   domain it claims.
//!
//! Admission-time validation (immutable `loadBalancerProvider`, name equal to
//! `domainName`) is enforced outside this crate.
//!
//! # Example: Claiming a Domain
//!
//! ```rust,no_run
//! use skydomain::crd::{BackendTarget, CustomDomainRegistrationSpec};
//!
//! let spec = CustomDomainRegistrationSpec {
//!     domain_name: "my-app.example.com".to_string(),
//!     backend_target: BackendTarget {
//!         service_name: "my-app".to_string(),
//!         service_port: 8080,
//!     },
//!     certificate_secret_override: None,
//!     verify_at: None,
//! };
//! ```

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition represents an observation of a resource's current state.
///
/// Conditions are used in status subresources to communicate the state of
/// a resource to users and controllers.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, e.g. `Verified` or `LoadBalancerProvisioned`.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// A DNS record the domain owner has to publish.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct DnsRecord {
    /// Fully qualified record name, e.g. `_skygear.example.com`.
    pub name: String,

    /// Record type: `A`, `AAAA`, `CNAME` or `TXT`.
    pub r#type: String,

    /// Record value.
    pub value: String,
}

impl DnsRecord {
    #[must_use]
    pub fn new(name: impl Into<String>, record_type: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            r#type: record_type.to_string(),
            value: value.into(),
        }
    }
}

// ============================================================================
// CustomDomain
// ============================================================================

/// `CustomDomain` aggregates every tenant claim on one domain name.
///
/// The controller creates it the first time a registration claims a name and
/// deletes it once no registration references it anymore.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "domain.skygear.io",
    version = "v1beta1",
    kind = "CustomDomain",
    shortname = "cd",
    doc = "CustomDomain aggregates all tenant registrations of one domain name. It owns the shared load balancer, the verification key, and the result of ownership arbitration.",
    printcolumn = r#"{"name":"Owner","type":"string","jsonPath":".spec.ownerTenant"}"#,
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".spec.loadBalancerProvider"}"#
)]
#[kube(status = "CustomDomainStatus")]
#[serde(rename_all = "camelCase")]
pub struct CustomDomainSpec {
    /// Load balancer provider class serving this domain.
    ///
    /// Recorded on the first successful provisioning and immutable afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_provider: Option<String>,

    /// Secret key from which per-registration verification tokens are derived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_key: Option<String>,

    /// Tenant (namespace) that won arbitration for this domain name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_tenant: Option<String>,

    /// Registrations claiming this domain name, in claim order.
    #[serde(default)]
    pub registrations: Vec<ObjectReference>,
}

/// Shared routing endpoint provisioned for a domain.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutingEndpoint {
    /// Provider class that provisioned the endpoint.
    pub provider_id: String,

    /// DNS records that route the domain to the endpoint.
    #[serde(default)]
    pub dns_records: Vec<DnsRecord>,
}

/// `CustomDomain` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomDomainStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_endpoint: Option<RoutingEndpoint>,
}

// ============================================================================
// CustomDomainRegistration
// ============================================================================

/// Service receiving traffic for an accepted domain.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackendTarget {
    /// Name of the Service in the registration's namespace.
    pub service_name: String,

    /// Port of the Service.
    #[schemars(range(min = 1, max = 65535))]
    pub service_port: i32,
}

/// `CustomDomainRegistration` is one tenant's claim on a domain name.
///
/// The resource name must equal `spec.domainName`.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "domain.skygear.io",
    version = "v1beta1",
    kind = "CustomDomainRegistration",
    namespaced,
    shortname = "cdr",
    doc = "CustomDomainRegistration claims a domain name for the tenant owning the namespace. Once ownership is verified through DNS and the claim is accepted, traffic for the name is routed to the backend target.",
    printcolumn = r#"{"name":"Domain","type":"string","jsonPath":".spec.domainName"}"#,
    printcolumn = r#"{"name":"Verified","type":"string","jsonPath":".status.conditions[?(@.type==\"Verified\")].status"}"#,
    printcolumn = r#"{"name":"Accepted","type":"string","jsonPath":".status.conditions[?(@.type==\"Accepted\")].status"}"#
)]
#[kube(status = "CustomDomainRegistrationStatus")]
#[serde(rename_all = "camelCase")]
pub struct CustomDomainRegistrationSpec {
    /// Domain name being claimed.
    #[schemars(regex(
        pattern = r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$"
    ))]
    pub domain_name: String,

    /// Service that receives the domain's traffic once accepted.
    pub backend_target: BackendTarget,

    /// Name of a tenant-supplied TLS secret used instead of automated issuance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_secret_override: Option<String>,

    /// Requested time of the next verification attempt.
    ///
    /// Setting or advancing this timestamp requests a fresh attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_at: Option<DateTime<Utc>>,
}

/// `CustomDomainRegistration` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomDomainRegistrationStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// DNS records the tenant must publish to route and verify the domain.
    #[serde(default)]
    pub dns_records: Vec<DnsRecord>,

    /// Time of the last completed verification attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verification_time: Option<DateTime<Utc>>,

    /// TLS secret serving the domain, once a certificate is ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_secret_name: Option<String>,
}
