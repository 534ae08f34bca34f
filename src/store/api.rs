// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! [`DomainStore`] backed by the Kubernetes API server.
//!
//! Conditional writes are JSON merge patches carrying
//! `metadata.resourceVersion`; the API server rejects them with 409 when the
//! object changed since it was read. Optional fields are written explicitly
//! (`null` when unset) so that clearing a field is persisted.

use super::{resource_version, DomainStore, FinalizerStore};
use crate::constants::{FIELD_MANAGER, KIND_CUSTOM_DOMAIN, KIND_CUSTOM_DOMAIN_REGISTRATION};
use crate::crd::{CustomDomain, CustomDomainRegistration};
use crate::errors::{is_not_found, StoreError};
use async_trait::async_trait;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams, Preconditions};
use kube::{Api, Client, ResourceExt};
use serde_json::{json, Value};
use tracing::debug;

/// Production store talking to the Kubernetes API.
#[derive(Clone)]
pub struct KubeDomainStore {
    client: Client,
}

impl KubeDomainStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn domains(&self) -> Api<CustomDomain> {
        Api::all(self.client.clone())
    }

    fn registrations(&self, namespace: &str) -> Api<CustomDomainRegistration> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn ingresses(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..PatchParams::default()
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..PostParams::default()
    }
}

fn namespace_of(reg: &CustomDomainRegistration) -> Result<String, StoreError> {
    reg.namespace().ok_or_else(|| StoreError::MissingMetadata {
        kind: KIND_CUSTOM_DOMAIN_REGISTRATION.to_string(),
        field: "namespace",
    })
}

async fn patch_domain(
    api: &Api<CustomDomain>,
    name: &str,
    patch: &Value,
    status: bool,
) -> Result<CustomDomain, StoreError> {
    let result = if status {
        api.patch_status(name, &patch_params(), &Patch::Merge(patch))
            .await
    } else {
        api.patch(name, &patch_params(), &Patch::Merge(patch)).await
    };
    result.map_err(|e| StoreError::from_write(e, KIND_CUSTOM_DOMAIN, name))
}

async fn patch_registration(
    api: &Api<CustomDomainRegistration>,
    name: &str,
    patch: &Value,
    status: bool,
) -> Result<CustomDomainRegistration, StoreError> {
    let result = if status {
        api.patch_status(name, &patch_params(), &Patch::Merge(patch))
            .await
    } else {
        api.patch(name, &patch_params(), &Patch::Merge(patch)).await
    };
    result.map_err(|e| StoreError::from_write(e, KIND_CUSTOM_DOMAIN_REGISTRATION, name))
}

#[async_trait]
impl FinalizerStore<CustomDomain> for KubeDomainStore {
    async fn set_finalizers(
        &self,
        obj: &CustomDomain,
        finalizers: Vec<String>,
    ) -> Result<CustomDomain, StoreError> {
        let patch = json!({
            "metadata": {
                "resourceVersion": resource_version(obj)?,
                "finalizers": finalizers,
            }
        });
        patch_domain(&self.domains(), &obj.name_any(), &patch, false).await
    }
}

#[async_trait]
impl FinalizerStore<CustomDomainRegistration> for KubeDomainStore {
    async fn set_finalizers(
        &self,
        obj: &CustomDomainRegistration,
        finalizers: Vec<String>,
    ) -> Result<CustomDomainRegistration, StoreError> {
        let patch = json!({
            "metadata": {
                "resourceVersion": resource_version(obj)?,
                "finalizers": finalizers,
            }
        });
        let api = self.registrations(&namespace_of(obj)?);
        patch_registration(&api, &obj.name_any(), &patch, false).await
    }
}

#[async_trait]
impl DomainStore for KubeDomainStore {
    async fn get_domain(&self, name: &str) -> Result<Option<CustomDomain>, StoreError> {
        Ok(self.domains().get_opt(name).await?)
    }

    async fn create_domain(&self, domain: &CustomDomain) -> Result<CustomDomain, StoreError> {
        let name = domain.name_any();
        debug!(domain = %name, "Creating CustomDomain");
        self.domains()
            .create(&post_params(), domain)
            .await
            .map_err(|e| StoreError::from_write(e, KIND_CUSTOM_DOMAIN, &name))
    }

    async fn update_domain_spec(&self, domain: &CustomDomain) -> Result<CustomDomain, StoreError> {
        let spec = &domain.spec;
        let patch = json!({
            "metadata": { "resourceVersion": resource_version(domain)? },
            "spec": {
                "loadBalancerProvider": spec.load_balancer_provider,
                "verificationKey": spec.verification_key,
                "ownerTenant": spec.owner_tenant,
                "registrations": spec.registrations,
            }
        });
        patch_domain(&self.domains(), &domain.name_any(), &patch, false).await
    }

    async fn update_domain_status(
        &self,
        domain: &CustomDomain,
    ) -> Result<CustomDomain, StoreError> {
        let status = domain.status.clone().unwrap_or_default();
        let patch = json!({
            "metadata": { "resourceVersion": resource_version(domain)? },
            "status": {
                "conditions": status.conditions,
                "routingEndpoint": status.routing_endpoint,
            }
        });
        patch_domain(&self.domains(), &domain.name_any(), &patch, true).await
    }

    async fn delete_domain(&self, domain: &CustomDomain) -> Result<(), StoreError> {
        let name = domain.name_any();
        let params = DeleteParams {
            preconditions: Some(Preconditions {
                resource_version: Some(resource_version(domain)?),
                uid: domain.uid(),
            }),
            ..DeleteParams::default()
        };
        match self.domains().delete(&name, &params).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(StoreError::from_write(e, KIND_CUSTOM_DOMAIN, &name)),
        }
    }

    async fn get_registration(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CustomDomainRegistration>, StoreError> {
        Ok(self.registrations(namespace).get_opt(name).await?)
    }

    async fn annotate_registration(
        &self,
        reg: &CustomDomainRegistration,
        key: &str,
        value: &str,
    ) -> Result<CustomDomainRegistration, StoreError> {
        let patch = json!({ "metadata": { "annotations": { key: value } } });
        let api = self.registrations(&namespace_of(reg)?);
        patch_registration(&api, &reg.name_any(), &patch, false).await
    }

    async fn update_registration_status(
        &self,
        reg: &CustomDomainRegistration,
    ) -> Result<CustomDomainRegistration, StoreError> {
        let status = reg.status.clone().unwrap_or_default();
        let patch = json!({
            "metadata": { "resourceVersion": resource_version(reg)? },
            "status": {
                "conditions": status.conditions,
                "dnsRecords": status.dns_records,
                "lastVerificationTime": status.last_verification_time,
                "certificateSecretName": status.certificate_secret_name,
            }
        });
        let api = self.registrations(&namespace_of(reg)?);
        patch_registration(&api, &reg.name_any(), &patch, true).await
    }

    async fn get_ingress(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Ingress>, StoreError> {
        Ok(self.ingresses(namespace).get_opt(name).await?)
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress, StoreError> {
        let name = ingress.name_any();
        let namespace = ingress.namespace().unwrap_or_default();
        self.ingresses(&namespace)
            .create(&post_params(), ingress)
            .await
            .map_err(|e| StoreError::from_write(e, "Ingress", &name))
    }

    async fn replace_ingress(&self, ingress: &Ingress) -> Result<Ingress, StoreError> {
        let name = ingress.name_any();
        let namespace = ingress.namespace().unwrap_or_default();
        self.ingresses(&namespace)
            .replace(&name, &post_params(), ingress)
            .await
            .map_err(|e| StoreError::from_write(e, "Ingress", &name))
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<bool, StoreError> {
        match self
            .ingresses(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(StoreError::from_write(e, "Ingress", name)),
        }
    }
}
