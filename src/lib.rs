// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! # Skydomain - custom domain controller for Kubernetes
//!
//! Skydomain lets tenants of a multi-tenant hosting platform attach their own
//! domain names to backend services. Tenants declare a claim with a
//! namespaced `CustomDomainRegistration`; the controller aggregates all claims
//! on a name into one cluster-scoped `CustomDomain`, proves ownership through a
//! DNS TXT challenge, picks a single owner and then issues a certificate and an
//! Ingress for that owner only.
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`reconcilers`] - The two reconciliation state machines
//! - [`verification`] - Verification tokens, scheduling and TXT lookups
//! - [`providers`] - Load balancer, certificate and Ingress providers
//! - [`store`] - Object store abstraction over the Kubernetes API
//! - [`context`] - Shared collaborators handed to every reconciler
//! - [`config`] - Command line and configuration file
//!
//! ## Example
//!
//! ```rust,no_run
//! use skydomain::crd::{BackendTarget, CustomDomainRegistration, CustomDomainRegistrationSpec};
//!
//! let mut reg = CustomDomainRegistration::new(
//!     "my-app.test",
//!     CustomDomainRegistrationSpec {
//!         domain_name: "my-app.test".to_string(),
//!         backend_target: BackendTarget {
//!             service_name: "web".to_string(),
//!             service_port: 8080,
//!         },
//!         certificate_secret_override: None,
//!         verify_at: None,
//!     },
//! );
//! reg.metadata.namespace = Some("app1".to_string());
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod errors;
pub mod labels;
pub mod metrics;
pub mod providers;
pub mod reconcilers;
pub mod status_reasons;
pub mod store;
pub mod verification;

#[cfg(test)]
pub mod testing;
