// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Generic finalizer management for both custom domain resource kinds.
//!
//! Both functions are idempotent and write through a [`FinalizerStore`], so the
//! write carries the object's resource version and loses cleanly to a
//! concurrent update.
//!
//! # Example
//!
//! ```rust,ignore
//! use skydomain::labels::FINALIZER_DOMAIN;
//! use skydomain::reconcilers::finalizers::ensure_finalizer;
//!
//! if let Some(updated) = ensure_finalizer(store, &domain, FINALIZER_DOMAIN).await? {
//!     // the write triggers a new pass; stop here
//!     return Ok(Action::requeue(REQUEUE_IMMEDIATELY));
//! }
//! ```

use super::references::{contains, insert, remove};
use crate::errors::StoreError;
use crate::metrics;
use crate::store::FinalizerStore;
use kube::{Resource, ResourceExt};
use tracing::info;

/// Returns true if `resource` carries `finalizer`.
pub fn has_finalizer<K: Resource>(resource: &K, finalizer: &str) -> bool {
    contains(resource.finalizers(), finalizer)
}

/// Add a finalizer to a resource if not already present.
///
/// Returns the updated resource when a write happened, `None` if the
/// finalizer was already present.
///
/// # Errors
///
/// Returns an error if the write fails, including [`StoreError::Conflict`].
pub async fn ensure_finalizer<K, S>(
    store: &S,
    resource: &K,
    finalizer: &str,
) -> Result<Option<K>, StoreError>
where
    K: Resource<DynamicType = ()> + ResourceExt,
    S: FinalizerStore<K> + ?Sized,
{
    if has_finalizer(resource, finalizer) {
        return Ok(None);
    }

    let kind = K::kind(&());
    info!(
        "Adding finalizer {} to {} {}",
        finalizer,
        kind,
        resource.name_any()
    );

    let mut finalizers = resource.finalizers().to_vec();
    insert(&mut finalizers, finalizer.to_string());
    let updated = store.set_finalizers(resource, finalizers).await?;

    metrics::record_finalizer(&kind, "added");
    Ok(Some(updated))
}

/// Remove a finalizer from a resource if present.
///
/// Returns `true` when a write happened.
///
/// # Errors
///
/// Returns an error if the write fails, including [`StoreError::Conflict`].
pub async fn remove_finalizer<K, S>(
    store: &S,
    resource: &K,
    finalizer: &str,
) -> Result<bool, StoreError>
where
    K: Resource<DynamicType = ()> + ResourceExt,
    S: FinalizerStore<K> + ?Sized,
{
    if !has_finalizer(resource, finalizer) {
        return Ok(false);
    }

    let kind = K::kind(&());
    info!(
        "Removing finalizer {} from {} {}",
        finalizer,
        kind,
        resource.name_any()
    );

    let mut finalizers = resource.finalizers().to_vec();
    remove(&mut finalizers, finalizer);
    store.set_finalizers(resource, finalizers).await?;

    metrics::record_finalizer(&kind, "removed");
    Ok(true)
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
