// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Collaborators the reconcilers orchestrate.
//!
//! The reconcilers depend only on the three traits in this module. The
//! production implementations are closed sets of provider classes, resolved
//! per call from the resource being reconciled and the configuration passed in
//! at construction:
//!
//! - [`LoadBalancerSet`]: `static-ip` and `cname` classes
//! - [`CertificateSet`]: `cert-manager` and `user-secret` classes
//! - [`NginxIngressProvider`]: Ingress objects for an ingress class

use crate::crd::{CustomDomain, CustomDomainRegistration, RoutingEndpoint};
use crate::errors::ProviderError;
use async_trait::async_trait;
use k8s_openapi::api::networking::v1::Ingress;

pub mod certificate;
pub mod ingress;
pub mod loadbalancer;

pub use certificate::CertificateSet;
pub use ingress::NginxIngressProvider;
pub use loadbalancer::LoadBalancerSet;

/// Shared routing endpoint of a domain.
#[async_trait]
pub trait LoadBalancerProvider: Send + Sync {
    /// Provision (or look up) the endpoint serving `domain`.
    ///
    /// Returns the provider class identifier and the DNS records to publish.
    async fn provision(&self, domain: &CustomDomain) -> Result<RoutingEndpoint, ProviderError>;

    /// Release the endpoint. Returns `true` once nothing remains allocated.
    async fn release(&self, domain: &CustomDomain) -> Result<bool, ProviderError>;
}

/// Certificate issued for an accepted registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedCertificate {
    /// Secret holding the TLS key pair.
    pub secret_name: String,
}

/// TLS certificates for registrations.
#[async_trait]
pub trait CertificateProvider: Send + Sync {
    /// Request a certificate. `Ok(None)` means issuance is pending.
    async fn provision(
        &self,
        reg: &CustomDomainRegistration,
    ) -> Result<Option<ProvisionedCertificate>, ProviderError>;

    /// Tear down any certificate issued for `reg`. Returns `true` once nothing remains.
    async fn release(&self, reg: &CustomDomainRegistration) -> Result<bool, ProviderError>;
}

/// Desired Ingress of an accepted registration.
pub trait IngressProvider: Send + Sync {
    /// Build the Ingress routing `reg`'s domain to its backend target,
    /// terminating TLS with `tls_secret` when known.
    ///
    /// # Errors
    ///
    /// Returns an error if the registration lacks the metadata the Ingress needs.
    fn make_ingress(
        &self,
        reg: &CustomDomainRegistration,
        tls_secret: Option<&str>,
    ) -> Result<Ingress, ProviderError>;
}
