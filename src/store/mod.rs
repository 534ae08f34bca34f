// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Object store seam between the reconcilers and the Kubernetes API.
//!
//! Reconcilers never talk to `kube::Api` directly. They go through
//! [`DomainStore`], which exposes the small set of reads and conditional
//! writes the two state machines need:
//!
//! - Every write of an existing object is conditional on the
//!   `metadata.resourceVersion` of the object passed in. A stale version
//!   surfaces as [`StoreError::Conflict`] and the pass is retried.
//! - Writes return the object as persisted, so a pass continues with the new
//!   resource version.
//! - Reads of missing objects return `Ok(None)` rather than an error.
//!
//! [`KubeDomainStore`] is the production implementation. Tests use an
//! in-memory implementation with the same deferred-deletion semantics.

use crate::crd::{CustomDomain, CustomDomainRegistration};
use crate::errors::StoreError;
use async_trait::async_trait;
use k8s_openapi::api::networking::v1::Ingress;
use kube::Resource;

mod api;
#[cfg(test)]
pub mod memory;

pub use api::KubeDomainStore;

/// Conditional replacement of an object's finalizer list.
#[async_trait]
pub trait FinalizerStore<K>: Send + Sync {
    /// Replace the finalizers of `obj`, conditional on its resource version.
    ///
    /// An object marked for deletion is physically removed by the store once
    /// its finalizer list becomes empty.
    async fn set_finalizers(&self, obj: &K, finalizers: Vec<String>) -> Result<K, StoreError>;
}

/// Reads and conditional writes used by the custom domain reconcilers.
#[async_trait]
pub trait DomainStore:
    FinalizerStore<CustomDomain> + FinalizerStore<CustomDomainRegistration>
{
    async fn get_domain(&self, name: &str) -> Result<Option<CustomDomain>, StoreError>;

    /// Create a new `CustomDomain`.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if another writer created it first.
    async fn create_domain(&self, domain: &CustomDomain) -> Result<CustomDomain, StoreError>;

    /// Persist `spec` of `domain`, conditional on its resource version.
    async fn update_domain_spec(&self, domain: &CustomDomain) -> Result<CustomDomain, StoreError>;

    /// Persist `status` of `domain`, conditional on its resource version.
    async fn update_domain_status(&self, domain: &CustomDomain)
        -> Result<CustomDomain, StoreError>;

    /// Request deletion of `domain`, conditional on its resource version.
    /// Deletion is deferred while finalizers remain.
    async fn delete_domain(&self, domain: &CustomDomain) -> Result<(), StoreError>;

    async fn get_registration(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CustomDomainRegistration>, StoreError>;

    /// Set a single annotation on a registration. Idempotent.
    async fn annotate_registration(
        &self,
        reg: &CustomDomainRegistration,
        key: &str,
        value: &str,
    ) -> Result<CustomDomainRegistration, StoreError>;

    /// Persist `status` of `reg`, conditional on its resource version.
    async fn update_registration_status(
        &self,
        reg: &CustomDomainRegistration,
    ) -> Result<CustomDomainRegistration, StoreError>;

    async fn get_ingress(&self, namespace: &str, name: &str)
        -> Result<Option<Ingress>, StoreError>;

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress, StoreError>;

    /// Replace an existing Ingress, conditional on its resource version.
    async fn replace_ingress(&self, ingress: &Ingress) -> Result<Ingress, StoreError>;

    /// Delete an Ingress. Returns `false` if it did not exist.
    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<bool, StoreError>;
}

/// Resource version of `obj`, required for conditional writes.
///
/// # Errors
///
/// Returns [`StoreError::MissingMetadata`] if the object was never persisted.
pub fn resource_version<K>(obj: &K) -> Result<String, StoreError>
where
    K: Resource<DynamicType = ()>,
{
    obj.meta()
        .resource_version
        .clone()
        .ok_or_else(|| StoreError::MissingMetadata {
            kind: K::kind(&()).into_owned(),
            field: "resourceVersion",
        })
}
