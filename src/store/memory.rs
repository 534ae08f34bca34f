// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! In-memory [`DomainStore`] used by reconciler tests.
//!
//! Mirrors the API server behaviour the reconcilers rely on:
//! - resource versions bump on every write and stale writes conflict
//! - deletion is deferred while finalizers remain
//! - Ingresses controlled by a removed registration are garbage collected

use super::{resource_version, DomainStore, FinalizerStore};
use crate::constants::{KIND_CUSTOM_DOMAIN, KIND_CUSTOM_DOMAIN_REGISTRATION};
use crate::crd::{CustomDomain, CustomDomainRegistration};
use crate::errors::StoreError;
use async_trait::async_trait;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::jiff::Timestamp;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Mutex;

type Key = (String, String);

#[derive(Default)]
struct State {
    next_version: u64,
    domains: BTreeMap<String, CustomDomain>,
    registrations: BTreeMap<Key, CustomDomainRegistration>,
    ingresses: BTreeMap<Key, Ingress>,
    writes: usize,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.writes += 1;
        self.next_version.to_string()
    }

    fn check<K: Resource<DynamicType = ()>>(
        current: &K,
        incoming: &K,
    ) -> Result<(), StoreError> {
        if current.meta().resource_version == Some(resource_version(incoming)?) {
            Ok(())
        } else {
            Err(StoreError::Conflict {
                kind: K::kind(&()).into_owned(),
                name: incoming.name_any(),
            })
        }
    }

    fn collect_registration(&mut self, key: &Key) {
        if let Some(reg) = self.registrations.remove(key) {
            if let Some(uid) = reg.uid() {
                self.ingresses.retain(|_, ingress| {
                    !ingress
                        .owner_references()
                        .iter()
                        .any(|owner| owner.uid == uid)
                });
            }
        }
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn reg_key(reg: &CustomDomainRegistration) -> Key {
    key(&reg.namespace().unwrap_or_default(), &reg.name_any())
}

fn has_finalizers<K: Resource>(obj: &K) -> bool {
    obj.meta().finalizers.as_ref().is_some_and(|f| !f.is_empty())
}

fn mark_deleted<K: Resource>(obj: &mut K) {
    if obj.meta().deletion_timestamp.is_none() {
        obj.meta_mut().deletion_timestamp = Some(Time(Timestamp::now()));
    }
}

/// Thread-safe in-memory object store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory store poisoned")
    }

    /// Create a registration as a tenant would, assigning UID and version.
    pub fn insert_registration(&self, mut reg: CustomDomainRegistration) -> CustomDomainRegistration {
        let mut state = self.lock();
        let version = state.bump();
        let ns = reg.namespace().unwrap_or_default();
        reg.metadata.uid = Some(format!("uid-{ns}-{}-{version}", reg.name_any()));
        reg.metadata.resource_version = Some(version);
        state.registrations.insert(reg_key(&reg), reg.clone());
        reg
    }

    /// Overwrite a registration's spec as a tenant would.
    pub fn edit_registration(
        &self,
        namespace: &str,
        name: &str,
        edit: impl FnOnce(&mut CustomDomainRegistration),
    ) {
        let mut state = self.lock();
        let version = state.bump();
        if let Some(reg) = state.registrations.get_mut(&key(namespace, name)) {
            edit(reg);
            reg.metadata.resource_version = Some(version);
        }
    }

    /// Request deletion of a registration as a tenant would.
    pub fn delete_registration(&self, namespace: &str, name: &str) {
        let mut state = self.lock();
        let version = state.bump();
        let k = key(namespace, name);
        let Some(reg) = state.registrations.get_mut(&k) else {
            return;
        };
        if has_finalizers(reg) {
            mark_deleted(reg);
            reg.metadata.resource_version = Some(version);
        } else {
            state.collect_registration(&k);
        }
    }

    /// Overwrite a domain as an operator would.
    pub fn edit_domain(&self, name: &str, edit: impl FnOnce(&mut CustomDomain)) {
        let mut state = self.lock();
        let version = state.bump();
        if let Some(domain) = state.domains.get_mut(name) {
            edit(domain);
            domain.metadata.resource_version = Some(version);
        }
    }

    #[must_use]
    pub fn domain(&self, name: &str) -> Option<CustomDomain> {
        self.lock().domains.get(name).cloned()
    }

    #[must_use]
    pub fn registration(&self, namespace: &str, name: &str) -> Option<CustomDomainRegistration> {
        self.lock().registrations.get(&key(namespace, name)).cloned()
    }

    #[must_use]
    pub fn ingress(&self, namespace: &str, name: &str) -> Option<Ingress> {
        self.lock().ingresses.get(&key(namespace, name)).cloned()
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.lock().writes
    }
}

#[async_trait]
impl FinalizerStore<CustomDomain> for MemoryStore {
    async fn set_finalizers(
        &self,
        obj: &CustomDomain,
        finalizers: Vec<String>,
    ) -> Result<CustomDomain, StoreError> {
        let mut state = self.lock();
        let name = obj.name_any();
        let current = state.domains.get(&name).ok_or_else(|| StoreError::Conflict {
            kind: KIND_CUSTOM_DOMAIN.to_string(),
            name: name.clone(),
        })?;
        State::check(current, obj)?;

        let mut updated = current.clone();
        updated.metadata.finalizers = Some(finalizers);
        updated.metadata.resource_version = Some(state.bump());
        if updated.metadata.deletion_timestamp.is_some() && !has_finalizers(&updated) {
            state.domains.remove(&name);
        } else {
            state.domains.insert(name, updated.clone());
        }
        Ok(updated)
    }
}

#[async_trait]
impl FinalizerStore<CustomDomainRegistration> for MemoryStore {
    async fn set_finalizers(
        &self,
        obj: &CustomDomainRegistration,
        finalizers: Vec<String>,
    ) -> Result<CustomDomainRegistration, StoreError> {
        let mut state = self.lock();
        let k = reg_key(obj);
        let current = state
            .registrations
            .get(&k)
            .ok_or_else(|| StoreError::Conflict {
                kind: KIND_CUSTOM_DOMAIN_REGISTRATION.to_string(),
                name: obj.name_any(),
            })?;
        State::check(current, obj)?;

        let mut updated = current.clone();
        updated.metadata.finalizers = Some(finalizers);
        updated.metadata.resource_version = Some(state.bump());
        state.registrations.insert(k.clone(), updated.clone());
        if updated.metadata.deletion_timestamp.is_some() && !has_finalizers(&updated) {
            state.collect_registration(&k);
        }
        Ok(updated)
    }
}

#[async_trait]
impl DomainStore for MemoryStore {
    async fn get_domain(&self, name: &str) -> Result<Option<CustomDomain>, StoreError> {
        Ok(self.domain(name))
    }

    async fn create_domain(&self, domain: &CustomDomain) -> Result<CustomDomain, StoreError> {
        let mut state = self.lock();
        let name = domain.name_any();
        if state.domains.contains_key(&name) {
            return Err(StoreError::AlreadyExists {
                kind: KIND_CUSTOM_DOMAIN.to_string(),
                name,
            });
        }
        let version = state.bump();
        let mut created = domain.clone();
        created.metadata.uid = Some(format!("uid-domain-{name}-{version}"));
        created.metadata.resource_version = Some(version);
        state.domains.insert(name, created.clone());
        Ok(created)
    }

    async fn update_domain_spec(&self, domain: &CustomDomain) -> Result<CustomDomain, StoreError> {
        let mut state = self.lock();
        let name = domain.name_any();
        let current = state.domains.get(&name).ok_or_else(|| StoreError::Conflict {
            kind: KIND_CUSTOM_DOMAIN.to_string(),
            name: name.clone(),
        })?;
        State::check(current, domain)?;

        let mut updated = current.clone();
        updated.spec = domain.spec.clone();
        updated.metadata.resource_version = Some(state.bump());
        state.domains.insert(name, updated.clone());
        Ok(updated)
    }

    async fn update_domain_status(
        &self,
        domain: &CustomDomain,
    ) -> Result<CustomDomain, StoreError> {
        let mut state = self.lock();
        let name = domain.name_any();
        let current = state.domains.get(&name).ok_or_else(|| StoreError::Conflict {
            kind: KIND_CUSTOM_DOMAIN.to_string(),
            name: name.clone(),
        })?;
        State::check(current, domain)?;

        let mut updated = current.clone();
        updated.status = domain.status.clone();
        updated.metadata.resource_version = Some(state.bump());
        state.domains.insert(name, updated.clone());
        Ok(updated)
    }

    async fn delete_domain(&self, domain: &CustomDomain) -> Result<(), StoreError> {
        let mut state = self.lock();
        let name = domain.name_any();
        let Some(current) = state.domains.get(&name) else {
            return Ok(());
        };
        State::check(current, domain)?;
        let version = state.bump();
        let Some(current) = state.domains.get_mut(&name) else {
            return Ok(());
        };
        if has_finalizers(current) {
            mark_deleted(current);
            current.metadata.resource_version = Some(version);
        } else {
            state.domains.remove(&name);
        }
        Ok(())
    }

    async fn get_registration(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CustomDomainRegistration>, StoreError> {
        Ok(self.registration(namespace, name))
    }

    async fn annotate_registration(
        &self,
        reg: &CustomDomainRegistration,
        key: &str,
        value: &str,
    ) -> Result<CustomDomainRegistration, StoreError> {
        let mut state = self.lock();
        let version = state.bump();
        let current = state
            .registrations
            .get_mut(&reg_key(reg))
            .ok_or_else(|| StoreError::Conflict {
                kind: KIND_CUSTOM_DOMAIN_REGISTRATION.to_string(),
                name: reg.name_any(),
            })?;
        current
            .annotations_mut()
            .insert(key.to_string(), value.to_string());
        current.metadata.resource_version = Some(version);
        Ok(current.clone())
    }

    async fn update_registration_status(
        &self,
        reg: &CustomDomainRegistration,
    ) -> Result<CustomDomainRegistration, StoreError> {
        let mut state = self.lock();
        let k = reg_key(reg);
        let current = state
            .registrations
            .get(&k)
            .ok_or_else(|| StoreError::Conflict {
                kind: KIND_CUSTOM_DOMAIN_REGISTRATION.to_string(),
                name: reg.name_any(),
            })?;
        State::check(current, reg)?;

        let mut updated = current.clone();
        updated.status = reg.status.clone();
        updated.metadata.resource_version = Some(state.bump());
        state.registrations.insert(k, updated.clone());
        Ok(updated)
    }

    async fn get_ingress(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Ingress>, StoreError> {
        Ok(self.ingress(namespace, name))
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress, StoreError> {
        let mut state = self.lock();
        let k = key(&ingress.namespace().unwrap_or_default(), &ingress.name_any());
        if state.ingresses.contains_key(&k) {
            return Err(StoreError::AlreadyExists {
                kind: "Ingress".to_string(),
                name: ingress.name_any(),
            });
        }
        let mut created = ingress.clone();
        created.metadata.resource_version = Some(state.bump());
        state.ingresses.insert(k, created.clone());
        Ok(created)
    }

    async fn replace_ingress(&self, ingress: &Ingress) -> Result<Ingress, StoreError> {
        let mut state = self.lock();
        let k = key(&ingress.namespace().unwrap_or_default(), &ingress.name_any());
        let current = state.ingresses.get(&k).ok_or_else(|| StoreError::Conflict {
            kind: "Ingress".to_string(),
            name: ingress.name_any(),
        })?;
        State::check(current, ingress)?;

        let mut updated = ingress.clone();
        updated.metadata.resource_version = Some(state.bump());
        state.ingresses.insert(k, updated.clone());
        Ok(updated)
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let removed = state.ingresses.remove(&key(namespace, name)).is_some();
        if removed {
            state.writes += 1;
        }
        Ok(removed)
    }
}
