// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Shared context for both controllers.
//!
//! Every reconciler receives an `Arc<Context>` holding its collaborators:
//! - the object store (Kubernetes API in production)
//! - load balancer, certificate and ingress providers
//! - the DNS resolver used for ownership verification
//! - a clock, so deadlines can be tested deterministically
//!
//! Reconcilers never reach for a global; everything they touch is here.

use crate::config::ControllerConfig;
use crate::constants::{POLL_INTERVAL_SECS, PROVIDER_TIMEOUT_SECS};
use crate::errors::{ConfigError, ProviderError};
use crate::providers::certificate::CertManagerCertificates;
use crate::providers::{
    CertificateProvider, CertificateSet, IngressProvider, LoadBalancerProvider, LoadBalancerSet,
    NginxIngressProvider,
};
use crate::store::{DomainStore, KubeDomainStore};
use crate::verification::{DnsResolver, HickoryResolver, VerificationPolicy};
use chrono::{DateTime, Utc};
use kube::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Timing knobs applied by the reconcilers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    pub verification: VerificationPolicy,
    /// Retry spacing for pending provider work.
    pub poll_interval: chrono::Duration,
    /// Upper bound on a single provider call.
    pub provider_timeout: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            verification: VerificationPolicy::default(),
            poll_interval: chrono::Duration::seconds(POLL_INTERVAL_SECS as i64),
            provider_timeout: Duration::from_secs(PROVIDER_TIMEOUT_SECS),
        }
    }
}

impl From<&ControllerConfig> for ReconcileSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            verification: config.verification_policy(),
            poll_interval: config.poll_interval(),
            provider_timeout: config.provider_timeout(),
        }
    }
}

/// Shared context passed to all controllers.
#[derive(Clone)]
pub struct Context {
    /// Persistence of both resource kinds and generated Ingresses
    pub store: Arc<dyn DomainStore>,

    pub load_balancer: Arc<dyn LoadBalancerProvider>,

    pub certificates: Arc<dyn CertificateProvider>,

    pub ingress: Arc<dyn IngressProvider>,

    /// TXT lookups for ownership verification
    pub resolver: Arc<dyn DnsResolver>,

    pub clock: Arc<dyn Clock>,

    pub settings: ReconcileSettings,
}

impl Context {
    /// Wire the production collaborators from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot produce a provider.
    pub fn from_config(client: Client, config: &ControllerConfig) -> Result<Self, ConfigError> {
        let cert_manager = config
            .cert_manager
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("cert-manager config is missing".to_string()))?;

        let load_balancer = LoadBalancerSet::from_config(&config.load_balancer)?;
        let certificates = CertificateSet::new(Arc::new(CertManagerCertificates::new(
            client.clone(),
            cert_manager.cluster_issuer_name.clone(),
            config.provider_timeout(),
        )));

        Ok(Self {
            store: Arc::new(KubeDomainStore::new(client)),
            load_balancer: Arc::new(load_balancer),
            certificates: Arc::new(certificates),
            ingress: Arc::new(NginxIngressProvider::new(
                config.ingress.ingress_class_name.clone(),
            )),
            resolver: Arc::new(HickoryResolver::from_system_conf()),
            clock: Arc::new(SystemClock),
            settings: ReconcileSettings::from(config),
        })
    }

    /// Run a provider call within `settings.provider_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Timeout`] if the budget is exceeded, otherwise the call's own result.
    pub async fn bounded<T, F>(&self, operation: &'static str, f: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let budget = self.settings.provider_timeout;
        tokio::time::timeout(budget, f)
            .await
            .map_err(|_| ProviderError::Timeout {
                operation,
                seconds: budget.as_secs(),
            })?
    }
}
