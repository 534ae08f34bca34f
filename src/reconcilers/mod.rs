// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Kubernetes reconciliation controllers for custom domain resources.
//!
//! # Reconciliation Architecture
//!
//! The two reconcilers trigger each other through watches rather than by
//! calling one another:
//!
//! 1. A `CustomDomainRegistration` change re-queues the `CustomDomain` named
//!    by its `spec.domainName` ([`domain_for_registration`]).
//! 2. A `CustomDomain` change re-queues every registration listed in its
//!    `spec.registrations` ([`registrations_for_domain`]).
//!
//! Every pass starts by matching the object's [`LifecyclePhase`].
//!
//! # Available Reconcilers
//!
//! - [`reconcile_customdomain`] - Validates the registration list, provisions
//!   the shared load balancer and arbitrates ownership
//! - [`reconcile_registration`] - Registers with the domain, verifies DNS
//!   ownership, provisions certificate and Ingress once accepted

pub mod customdomain;
pub mod deadline;
pub mod finalizers;
pub mod references;
pub mod registration;
pub mod status;

pub use customdomain::{arbitrate, reconcile_customdomain};
pub use registration::reconcile_registration;

use crate::crd::{CustomDomain, CustomDomainRegistration};
use kube::runtime::reflector::ObjectRef;
use kube::{Resource, ResourceExt};

/// Phase of an object, derived from its deletion timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Converging toward the desired state.
    Active,
    /// Deletion requested; releasing external resources before the finalizer is removed.
    Terminating,
}

impl LifecyclePhase {
    #[must_use]
    pub fn of<K: Resource>(obj: &K) -> Self {
        if obj.meta().deletion_timestamp.is_some() {
            LifecyclePhase::Terminating
        } else {
            LifecyclePhase::Active
        }
    }
}

/// Registrations to re-queue when `domain` changes.
#[must_use]
pub fn registrations_for_domain(domain: &CustomDomain) -> Vec<ObjectRef<CustomDomainRegistration>> {
    domain
        .spec
        .registrations
        .iter()
        .filter_map(|r| {
            let name = r.name.as_deref()?;
            let namespace = r.namespace.as_deref()?;
            Some(ObjectRef::new(name).within(namespace))
        })
        .collect()
}

/// The `CustomDomain` to re-queue when `reg` changes.
#[must_use]
pub fn domain_for_registration(reg: &CustomDomainRegistration) -> Option<ObjectRef<CustomDomain>> {
    if reg.spec.domain_name.is_empty() {
        return None;
    }
    Some(ObjectRef::new(&reg.spec.domain_name))
}

/// Tenant owning `reg`: the namespace it lives in.
#[must_use]
pub fn tenant_of(reg: &CustomDomainRegistration) -> Option<String> {
    reg.namespace()
}
