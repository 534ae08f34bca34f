// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Test doubles for reconciler and provider tests.

use crate::config::{CnameConfig, LoadBalancerConfig, StaticIpConfig};
use crate::context::{Clock, Context, ReconcileSettings};
use crate::crd::{
    BackendTarget, CustomDomain, CustomDomainRegistration, CustomDomainRegistrationSpec,
    RoutingEndpoint,
};
use crate::errors::{ProviderError, VerificationError};
use crate::providers::{
    CertificateProvider, LoadBalancerProvider, LoadBalancerSet, NginxIngressProvider,
    ProvisionedCertificate,
};
use crate::reconcilers::{reconcile_customdomain, reconcile_registration};
use crate::store::memory::MemoryStore;
use crate::verification::{derive_token, record_name, DnsResolver};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SETTLE_ROUNDS: usize = 6;

/// Start of every test timeline.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

/// Manually advanced clock.
pub struct TestClock {
    now: Mutex<DateTime<Utc>>,
}

impl TestClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Resolver answering from a published record table.
#[derive(Default)]
pub struct FakeResolver {
    records: Mutex<BTreeMap<String, Vec<String>>>,
    latency: Mutex<Duration>,
    lookups: AtomicUsize,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, name: &str, value: &str) {
        self.records
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
    }

    pub fn unpublish(&self, name: &str) {
        self.records.lock().unwrap().remove(name);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsResolver for FakeResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, VerificationError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.records
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| VerificationError::Lookup {
                reason: format!("no record found for {name}"),
            })
    }
}

/// Load balancer delegating to the real classes, with injectable failures.
pub struct FakeLoadBalancer {
    inner: LoadBalancerSet,
    fail: AtomicBool,
    pending_release: AtomicBool,
    provisions: AtomicUsize,
    releases: AtomicUsize,
}

impl FakeLoadBalancer {
    /// Static address 203.0.113.10 and CNAME target `edge.example.net`.
    pub fn new() -> Self {
        let inner = LoadBalancerSet::from_config(&LoadBalancerConfig {
            static_ip: Some(StaticIpConfig {
                ip_addresses: vec!["203.0.113.10".to_string()],
            }),
            cname: Some(CnameConfig {
                target: "edge.example.net".to_string(),
            }),
        })
        .unwrap();
        Self {
            inner,
            fail: AtomicBool::new(false),
            pending_release: AtomicBool::new(false),
            provisions: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_pending_release(&self, pending: bool) {
        self.pending_release.store(pending, Ordering::SeqCst);
    }

    pub fn provisions(&self) -> usize {
        self.provisions.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LoadBalancerProvider for FakeLoadBalancer {
    async fn provision(&self, domain: &CustomDomain) -> Result<RoutingEndpoint, ProviderError> {
        self.provisions.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::ProviderUnavailable {
                kind: "load-balancer",
                provider: "fake".to_string(),
            });
        }
        self.inner.provision(domain).await
    }

    async fn release(&self, domain: &CustomDomain) -> Result<bool, ProviderError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::ProviderUnavailable {
                kind: "load-balancer",
                provider: "fake".to_string(),
            });
        }
        if self.pending_release.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.release(domain).await
    }
}

/// Certificate backend tracking which registrations hold a certificate.
pub struct FakeCertificates {
    ready: AtomicBool,
    fail: AtomicBool,
    pending_release: AtomicBool,
    held: Mutex<BTreeSet<(String, String)>>,
}

impl FakeCertificates {
    /// Certificates are issued immediately unless [`Self::set_ready`] says otherwise.
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            pending_release: AtomicBool::new(false),
            held: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_pending_release(&self, pending: bool) {
        self.pending_release.store(pending, Ordering::SeqCst);
    }

    pub fn holds(&self, namespace: &str, name: &str) -> bool {
        self.held
            .lock()
            .unwrap()
            .contains(&(namespace.to_string(), name.to_string()))
    }

    fn key(reg: &CustomDomainRegistration) -> (String, String) {
        (reg.namespace().unwrap_or_default(), reg.name_any())
    }

    fn check_fail(&self) -> Result<(), ProviderError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::ProviderUnavailable {
                kind: "certificate",
                provider: "fake".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CertificateProvider for FakeCertificates {
    async fn provision(
        &self,
        reg: &CustomDomainRegistration,
    ) -> Result<Option<ProvisionedCertificate>, ProviderError> {
        self.check_fail()?;
        self.held.lock().unwrap().insert(Self::key(reg));
        if !self.ready.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(ProvisionedCertificate {
            secret_name: format!("{}-tls", reg.name_any()),
        }))
    }

    async fn release(&self, reg: &CustomDomainRegistration) -> Result<bool, ProviderError> {
        self.check_fail()?;
        let key = Self::key(reg);
        if !self.held.lock().unwrap().contains(&key) {
            return Ok(true);
        }
        if self.pending_release.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.held.lock().unwrap().remove(&key);
        Ok(true)
    }
}

/// A registration for `domain` in `namespace`, routed to service `app:8080`.
pub fn registration(namespace: &str, domain: &str) -> CustomDomainRegistration {
    let mut reg = CustomDomainRegistration::new(
        domain,
        CustomDomainRegistrationSpec {
            domain_name: domain.to_string(),
            backend_target: BackendTarget {
                service_name: "app".to_string(),
                service_port: 8080,
            },
            certificate_secret_override: None,
            verify_at: None,
        },
    );
    reg.metadata.namespace = Some(namespace.to_string());
    reg
}

/// Collaborators of a [`Context`] built for tests, kept for inspection.
pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub load_balancer: Arc<FakeLoadBalancer>,
    pub certificates: Arc<FakeCertificates>,
    pub resolver: Arc<FakeResolver>,
    pub clock: Arc<TestClock>,
    pub ctx: Arc<Context>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_settings(ReconcileSettings::default())
    }

    pub fn with_settings(settings: ReconcileSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let load_balancer = Arc::new(FakeLoadBalancer::new());
        let certificates = Arc::new(FakeCertificates::new());
        let resolver = Arc::new(FakeResolver::new());
        let clock = Arc::new(TestClock::new(epoch()));
        let ctx = Arc::new(Context {
            store: store.clone(),
            load_balancer: load_balancer.clone(),
            certificates: certificates.clone(),
            ingress: Arc::new(NginxIngressProvider::new("nginx")),
            resolver: resolver.clone(),
            clock: clock.clone(),
            settings,
        });
        Self {
            store,
            load_balancer,
            certificates,
            resolver,
            clock,
            ctx,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run one registration pass against the stored object.
    pub async fn reconcile_registration(&self, namespace: &str, name: &str) -> Result<Action> {
        match self.store.registration(namespace, name) {
            Some(reg) => reconcile_registration(self.ctx.clone(), reg).await,
            None => Ok(Action::await_change()),
        }
    }

    /// Run one domain pass against the stored object.
    pub async fn reconcile_domain(&self, name: &str) -> Result<Action> {
        match self.store.domain(name) {
            Some(domain) => reconcile_customdomain(self.ctx.clone(), domain).await,
            None => Ok(Action::await_change()),
        }
    }

    /// Alternate registration and domain passes until watches would have gone quiet.
    ///
    /// `registrations` are `(namespace, name)` keys; their domains are reconciled too.
    pub async fn settle(&self, registrations: &[(&str, &str)]) {
        let mut domains = BTreeSet::new();
        for (namespace, name) in registrations {
            if let Some(reg) = self.store.registration(namespace, name) {
                domains.insert(reg.spec.domain_name);
            }
        }

        for _ in 0..SETTLE_ROUNDS {
            for (namespace, name) in registrations {
                self.reconcile_registration(namespace, name).await.unwrap();
            }
            for domain in &domains {
                self.reconcile_domain(domain).await.unwrap();
            }
        }
    }

    /// Publish the verification token of a registration, as its tenant would.
    pub fn publish_token(&self, namespace: &str, name: &str) {
        let reg = self.store.registration(namespace, name).unwrap();
        let domain = self.store.domain(&reg.spec.domain_name).unwrap();
        let key = domain.spec.verification_key.unwrap();
        let record = record_name(
            &self.ctx.settings.verification.record_label,
            &reg.spec.domain_name,
        )
        .unwrap();
        self.resolver
            .publish(&record, &derive_token(&key, &reg.uid().unwrap()).unwrap());
    }

    /// Ask for a verification attempt now, then step past the request time.
    pub fn request_verification(&self, namespace: &str, name: &str) {
        let at = self.now();
        self.store.edit_registration(namespace, name, |reg| {
            reg.spec.verify_at = Some(at);
        });
        self.clock.advance(chrono::Duration::seconds(1));
    }
}
