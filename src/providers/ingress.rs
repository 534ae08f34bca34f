// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Ingress objects routing accepted domains to tenant services.

use super::IngressProvider;
use crate::crd::CustomDomainRegistration;
use crate::errors::ProviderError;
use crate::labels::{
    DOMAIN_NAME_ANNOTATION, K8S_MANAGED_BY, K8S_PART_OF, MANAGED_BY_REGISTRATION,
    PART_OF_SKYDOMAIN,
};
use crate::reconcilers::references::controller_owner_reference;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Builds one Ingress per accepted registration for an ingress class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NginxIngressProvider {
    ingress_class_name: String,
}

impl NginxIngressProvider {
    #[must_use]
    pub fn new(ingress_class_name: impl Into<String>) -> Self {
        Self {
            ingress_class_name: ingress_class_name.into(),
        }
    }
}

impl IngressProvider for NginxIngressProvider {
    fn make_ingress(
        &self,
        reg: &CustomDomainRegistration,
        tls_secret: Option<&str>,
    ) -> Result<Ingress, ProviderError> {
        let domain = reg.spec.domain_name.clone();
        let namespace = reg.namespace().ok_or_else(|| {
            ProviderError::MissingInput(format!("registration '{}' has no namespace", reg.name_any()))
        })?;
        let owner = controller_owner_reference(reg).ok_or_else(|| {
            ProviderError::MissingInput(format!("registration '{}' has no UID", reg.name_any()))
        })?;

        let labels = BTreeMap::from([
            (K8S_MANAGED_BY.to_string(), MANAGED_BY_REGISTRATION.to_string()),
            (K8S_PART_OF.to_string(), PART_OF_SKYDOMAIN.to_string()),
        ]);
        let annotations = BTreeMap::from([(DOMAIN_NAME_ANNOTATION.to_string(), domain.clone())]);

        let backend = IngressBackend {
            service: Some(IngressServiceBackend {
                name: reg.spec.backend_target.service_name.clone(),
                port: Some(ServiceBackendPort {
                    number: Some(reg.spec.backend_target.service_port),
                    name: None,
                }),
            }),
            resource: None,
        };

        Ok(Ingress {
            metadata: ObjectMeta {
                name: Some(domain.clone()),
                namespace: Some(namespace),
                labels: Some(labels),
                annotations: Some(annotations),
                owner_references: Some(vec![owner]),
                ..ObjectMeta::default()
            },
            spec: Some(IngressSpec {
                ingress_class_name: Some(self.ingress_class_name.clone()),
                rules: Some(vec![IngressRule {
                    host: Some(domain.clone()),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some("/".to_string()),
                            path_type: "Prefix".to_string(),
                            backend,
                        }],
                    }),
                }]),
                tls: Some(vec![IngressTLS {
                    hosts: Some(vec![domain]),
                    secret_name: tls_secret.map(str::to_string),
                }]),
                ..IngressSpec::default()
            }),
            status: None,
        })
    }
}

/// Returns true if `existing` differs from `desired` in any managed field.
#[must_use]
pub fn ingress_differs(existing: &Ingress, desired: &Ingress) -> bool {
    existing.metadata.labels != desired.metadata.labels
        || existing.metadata.annotations != desired.metadata.annotations
        || existing.metadata.owner_references != desired.metadata.owner_references
        || existing.spec != desired.spec
}

/// Copy the managed fields of `desired` onto `existing`, keeping its identity and version.
#[must_use]
pub fn apply_desired(existing: &Ingress, desired: &Ingress) -> Ingress {
    let mut updated = existing.clone();
    updated.metadata.labels.clone_from(&desired.metadata.labels);
    updated
        .metadata
        .annotations
        .clone_from(&desired.metadata.annotations);
    updated
        .metadata
        .owner_references
        .clone_from(&desired.metadata.owner_references);
    updated.spec.clone_from(&desired.spec);
    updated
}

#[cfg(test)]
#[path = "ingress_tests.rs"]
mod ingress_tests;
