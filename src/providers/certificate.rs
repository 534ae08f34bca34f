// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Certificate provider classes.
//!
//! - `cert-manager`: a `cert-manager.io/v1` `Certificate` named after the
//!   registration, issued by the configured `ClusterIssuer` into the secret
//!   `<name>-tls`. The Certificate is controlled by the registration, so a
//!   forced deletion of the registration garbage-collects it.
//! - `user-secret`: the tenant supplied `spec.certificateSecretOverride`;
//!   nothing is issued and nothing has to be released.
//!
//! Provisioning with one class first releases every other class, so a
//! registration never holds certificates from two classes at once.

use super::{CertificateProvider, ProvisionedCertificate};
use crate::crd::CustomDomainRegistration;
use crate::errors::{is_already_exists, ProviderError};
use crate::reconcilers::references::{controller_owner_reference, is_controlled_by};
use async_trait::async_trait;
use kube::api::{ApiResource, DeleteParams, DynamicObject, GroupVersionKind, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Identifier of the automated issuance class.
pub const CERTIFICATE_CLASS_CERT_MANAGER: &str = "cert-manager";

/// Identifier of the tenant-supplied secret class.
pub const CERTIFICATE_CLASS_USER_SECRET: &str = "user-secret";

const PROVIDER: &str = "cert-manager";

/// `cert-manager.io/v1` `Certificate`.
#[must_use]
pub fn certificate_api_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("cert-manager.io", "v1", "Certificate"))
}

/// Name of the secret a `Certificate` for `reg` is issued into.
#[must_use]
pub fn certificate_secret_name(reg: &CustomDomainRegistration) -> String {
    format!("{}-tls", reg.name_any())
}

/// Build the `Certificate` requested for `reg`.
///
/// # Errors
///
/// Returns [`ProviderError::MissingInput`] if `reg` has no namespace or UID.
pub fn build_certificate(
    reg: &CustomDomainRegistration,
    cluster_issuer_name: &str,
) -> Result<DynamicObject, ProviderError> {
    let namespace = reg.namespace().ok_or_else(|| {
        ProviderError::MissingInput(format!("registration '{}' has no namespace", reg.name_any()))
    })?;
    let owner = controller_owner_reference(reg).ok_or_else(|| {
        ProviderError::MissingInput(format!("registration '{}' has no UID", reg.name_any()))
    })?;

    let mut cert = DynamicObject::new(&reg.name_any(), &certificate_api_resource())
        .within(&namespace)
        .data(json!({
            "spec": {
                "secretName": certificate_secret_name(reg),
                "dnsNames": [reg.spec.domain_name],
                "issuerRef": {
                    "kind": "ClusterIssuer",
                    "name": cluster_issuer_name,
                },
            }
        }));
    cert.metadata.owner_references = Some(vec![owner]);
    Ok(cert)
}

/// Returns true if the `Certificate` reports `Ready=True`.
#[must_use]
pub fn certificate_ready(cert: &DynamicObject) -> bool {
    cert.data
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .is_some_and(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some("Ready")
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        })
}

async fn bounded<T, F>(timeout: Duration, operation: &'static str, f: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, kube::Error>>,
{
    tokio::time::timeout(timeout, f)
        .await
        .map_err(|_| ProviderError::Timeout {
            operation,
            seconds: timeout.as_secs(),
        })?
        .map_err(|source| ProviderError::Backend {
            provider: PROVIDER,
            source,
        })
}

/// Issues certificates through cert-manager.
pub struct CertManagerCertificates {
    client: Client,
    cluster_issuer_name: String,
    timeout: Duration,
}

impl CertManagerCertificates {
    #[must_use]
    pub fn new(client: Client, cluster_issuer_name: String, timeout: Duration) -> Self {
        Self {
            client,
            cluster_issuer_name,
            timeout,
        }
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &certificate_api_resource())
    }
}

#[async_trait]
impl CertificateProvider for CertManagerCertificates {
    async fn provision(
        &self,
        reg: &CustomDomainRegistration,
    ) -> Result<Option<ProvisionedCertificate>, ProviderError> {
        let desired = build_certificate(reg, &self.cluster_issuer_name)?;
        let namespace = desired.namespace().unwrap_or_default();
        let name = desired.name_any();
        let api = self.api(&namespace);

        let cert = match bounded(self.timeout, "get certificate", api.get_opt(&name)).await? {
            Some(cert) => cert,
            None => {
                info!("Creating Certificate {}/{}", namespace, name);
                match bounded(
                    self.timeout,
                    "create certificate",
                    api.create(&PostParams::default(), &desired),
                )
                .await
                {
                    Ok(cert) => cert,
                    Err(ProviderError::Backend { source, .. }) if is_already_exists(&source) => {
                        return Ok(None)
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        if !certificate_ready(&cert) {
            debug!(certificate = %name, namespace = %namespace, "Certificate not ready yet");
            return Ok(None);
        }

        let secret_name = cert
            .data
            .pointer("/spec/secretName")
            .and_then(Value::as_str)
            .map_or_else(|| certificate_secret_name(reg), str::to_string);
        Ok(Some(ProvisionedCertificate { secret_name }))
    }

    async fn release(&self, reg: &CustomDomainRegistration) -> Result<bool, ProviderError> {
        let (Some(namespace), Some(uid)) = (reg.namespace(), reg.uid()) else {
            return Ok(true);
        };
        let name = reg.name_any();
        let api = self.api(&namespace);

        let Some(cert) = bounded(self.timeout, "get certificate", api.get_opt(&name)).await? else {
            return Ok(true);
        };
        if !is_controlled_by(cert.owner_references(), &uid) {
            return Ok(true);
        }

        info!("Deleting Certificate {}/{}", namespace, name);
        let deleted = bounded(
            self.timeout,
            "delete certificate",
            api.delete(&name, &DeleteParams::default()),
        )
        .await?;
        // Left: still present with a deletion timestamp
        Ok(deleted.is_right())
    }
}

/// Uses a TLS secret supplied by the tenant.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserSecretCertificates;

#[async_trait]
impl CertificateProvider for UserSecretCertificates {
    async fn provision(
        &self,
        reg: &CustomDomainRegistration,
    ) -> Result<Option<ProvisionedCertificate>, ProviderError> {
        let secret_name = reg.spec.certificate_secret_override.clone().ok_or_else(|| {
            ProviderError::MissingInput("certificate secret override is not set".to_string())
        })?;
        Ok(Some(ProvisionedCertificate { secret_name }))
    }

    async fn release(&self, _reg: &CustomDomainRegistration) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

/// A certificate class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateClass {
    CertManager,
    UserSecret,
}

impl CertificateClass {
    pub const ALL: [CertificateClass; 2] = [CertificateClass::CertManager, CertificateClass::UserSecret];

    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            CertificateClass::CertManager => CERTIFICATE_CLASS_CERT_MANAGER,
            CertificateClass::UserSecret => CERTIFICATE_CLASS_USER_SECRET,
        }
    }

    /// Class serving `reg`: the tenant's secret when supplied, automated issuance otherwise.
    #[must_use]
    pub fn select(reg: &CustomDomainRegistration) -> Self {
        if reg.spec.certificate_secret_override.is_some() {
            CertificateClass::UserSecret
        } else {
            CertificateClass::CertManager
        }
    }
}

/// The configured certificate classes.
#[derive(Clone)]
pub struct CertificateSet {
    cert_manager: Arc<dyn CertificateProvider>,
    user_secret: UserSecretCertificates,
}

impl CertificateSet {
    #[must_use]
    pub fn new(cert_manager: Arc<dyn CertificateProvider>) -> Self {
        Self {
            cert_manager,
            user_secret: UserSecretCertificates,
        }
    }

    fn backend(&self, class: CertificateClass) -> &dyn CertificateProvider {
        match class {
            CertificateClass::CertManager => self.cert_manager.as_ref(),
            CertificateClass::UserSecret => &self.user_secret,
        }
    }
}

#[async_trait]
impl CertificateProvider for CertificateSet {
    async fn provision(
        &self,
        reg: &CustomDomainRegistration,
    ) -> Result<Option<ProvisionedCertificate>, ProviderError> {
        let selected = CertificateClass::select(reg);

        for class in CertificateClass::ALL {
            if class == selected {
                continue;
            }
            if !self.backend(class).release(reg).await? {
                debug!(
                    registration = %reg.name_any(),
                    class = class.id(),
                    "Waiting for certificate of previous class to be released"
                );
                return Ok(None);
            }
        }

        self.backend(selected).provision(reg).await
    }

    async fn release(&self, reg: &CustomDomainRegistration) -> Result<bool, ProviderError> {
        for class in CertificateClass::ALL {
            if !self.backend(class).release(reg).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
#[path = "certificate_tests.rs"]
mod certificate_tests;
