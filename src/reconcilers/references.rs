// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Identity-based membership over lists of references.
//!
//! Registration lists and finalizer lists are ordered `Vec`s in the API, but
//! they behave as sets keyed by identity: an object reference is identified by
//! its UID (never by name, since a deleted and recreated registration is a
//! different claim) and a finalizer by its string value.

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

/// Something that can be a member of a reference set.
pub trait Identity {
    /// Unique identity of the item, `None` if it carries none.
    fn identity(&self) -> Option<&str>;
}

impl Identity for ObjectReference {
    fn identity(&self) -> Option<&str> {
        self.uid.as_deref()
    }
}

impl Identity for String {
    fn identity(&self) -> Option<&str> {
        Some(self)
    }
}

/// Returns true if an item with identity `id` is in `items`.
#[must_use]
pub fn contains<T: Identity>(items: &[T], id: &str) -> bool {
    items.iter().any(|item| item.identity() == Some(id))
}

/// Appends `item` unless an item with the same identity is already present.
///
/// Returns true if `items` changed. Items without identity are never inserted.
pub fn insert<T: Identity>(items: &mut Vec<T>, item: T) -> bool {
    match item.identity() {
        Some(id) if !contains(items, id) => {
            items.push(item);
            true
        }
        _ => false,
    }
}

/// Removes every item with identity `id`, preserving the order of the rest.
///
/// Returns true if `items` changed.
pub fn remove<T: Identity>(items: &mut Vec<T>, id: &str) -> bool {
    let before = items.len();
    items.retain(|item| item.identity() != Some(id));
    items.len() != before
}

/// Build an `ObjectReference` pointing at `obj`.
#[must_use]
pub fn object_reference<K>(obj: &K) -> ObjectReference
where
    K: Resource<DynamicType = ()>,
{
    ObjectReference {
        api_version: Some(K::api_version(&()).into_owned()),
        kind: Some(K::kind(&()).into_owned()),
        name: Some(obj.name_any()),
        namespace: obj.namespace(),
        uid: obj.uid(),
        ..ObjectReference::default()
    }
}

/// Build a controller `OwnerReference` pointing at `obj`.
///
/// Returns `None` if `obj` has not been persisted yet (no UID).
#[must_use]
pub fn controller_owner_reference<K>(obj: &K) -> Option<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    Some(OwnerReference {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
        name: obj.name_any(),
        uid: obj.uid()?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Returns true if `owners` contains a controller reference to the object with `uid`.
#[must_use]
pub fn is_controlled_by(owners: &[OwnerReference], uid: &str) -> bool {
    owners
        .iter()
        .any(|owner| owner.uid == uid && owner.controller == Some(true))
}

#[cfg(test)]
#[path = "references_tests.rs"]
mod references_tests;
