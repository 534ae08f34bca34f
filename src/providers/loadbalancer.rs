// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Load balancer provider classes.
//!
//! # Selection
//!
//! 1. A domain that already recorded `spec.loadBalancerProvider` always uses
//!    that class; if it is no longer configured, provisioning fails.
//! 2. Otherwise a registrable root (`example.com`) uses `static-ip`, since a
//!    CNAME cannot live at the zone apex.
//! 3. A sub-domain (`shop.example.com`) prefers `cname` and falls back to
//!    `static-ip`.
//!
//! Neither class allocates anything outside the cluster, so release always
//! completes immediately.

use super::LoadBalancerProvider;
use crate::config::{CnameConfig, LoadBalancerConfig, StaticIpConfig};
use crate::constants::{DNS_RECORD_TYPE_A, DNS_RECORD_TYPE_AAAA, DNS_RECORD_TYPE_CNAME};
use crate::crd::{CustomDomain, DnsRecord, RoutingEndpoint};
use crate::errors::{ConfigError, ProviderError};
use crate::verification::root_domain;
use async_trait::async_trait;
use kube::ResourceExt;
use std::net::IpAddr;
use tracing::debug;

/// Identifier of the static address class.
pub const PROVIDER_STATIC_IP: &str = "static-ip";

/// Identifier of the CNAME class.
pub const PROVIDER_CNAME: &str = "cname";

/// Publishes a fixed set of addresses for every domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIpLoadBalancer {
    addresses: Vec<IpAddr>,
}

impl StaticIpLoadBalancer {
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if an address does not parse.
    pub fn new(config: &StaticIpConfig) -> Result<Self, ConfigError> {
        let addresses = config
            .ip_addresses
            .iter()
            .map(|s| {
                s.parse::<IpAddr>()
                    .map_err(|_| ConfigError::Invalid(format!("IP address '{s}' is not valid")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { addresses })
    }

    fn records(&self, domain_name: &str) -> Vec<DnsRecord> {
        self.addresses
            .iter()
            .map(|ip| {
                let record_type = match ip {
                    IpAddr::V4(_) => DNS_RECORD_TYPE_A,
                    IpAddr::V6(_) => DNS_RECORD_TYPE_AAAA,
                };
                DnsRecord::new(domain_name, record_type, ip.to_string())
            })
            .collect()
    }
}

/// Points sub-domains at a shared edge host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CnameLoadBalancer {
    target: String,
}

impl CnameLoadBalancer {
    #[must_use]
    pub fn new(config: &CnameConfig) -> Self {
        Self {
            target: config.target.trim_end_matches('.').to_string(),
        }
    }

    fn records(&self, domain_name: &str) -> Vec<DnsRecord> {
        vec![DnsRecord::new(
            domain_name,
            DNS_RECORD_TYPE_CNAME,
            self.target.clone(),
        )]
    }
}

/// One configured load balancer class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancerClass<'a> {
    StaticIp(&'a StaticIpLoadBalancer),
    Cname(&'a CnameLoadBalancer),
}

impl LoadBalancerClass<'_> {
    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            LoadBalancerClass::StaticIp(_) => PROVIDER_STATIC_IP,
            LoadBalancerClass::Cname(_) => PROVIDER_CNAME,
        }
    }

    #[must_use]
    pub fn records(&self, domain_name: &str) -> Vec<DnsRecord> {
        match self {
            LoadBalancerClass::StaticIp(lb) => lb.records(domain_name),
            LoadBalancerClass::Cname(lb) => lb.records(domain_name),
        }
    }
}

/// The configured load balancer classes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadBalancerSet {
    static_ip: Option<StaticIpLoadBalancer>,
    cname: Option<CnameLoadBalancer>,
}

impl LoadBalancerSet {
    /// # Errors
    ///
    /// Returns an error if a configured class is invalid.
    pub fn from_config(config: &LoadBalancerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            static_ip: config
                .static_ip
                .as_ref()
                .map(StaticIpLoadBalancer::new)
                .transpose()?,
            cname: config.cname.as_ref().map(CnameLoadBalancer::new),
        })
    }

    /// Look up a class by identifier.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<LoadBalancerClass<'_>> {
        match id {
            PROVIDER_STATIC_IP => self.static_ip.as_ref().map(LoadBalancerClass::StaticIp),
            PROVIDER_CNAME => self.cname.as_ref().map(LoadBalancerClass::Cname),
            _ => None,
        }
    }

    /// Select the class serving `domain`.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::ProviderUnavailable`] if the recorded class is not configured
    /// - [`ProviderError::InvalidDomain`] if the name has no registrable root
    /// - [`ProviderError::NoProviderAvailable`] if no configured class fits
    pub fn select(&self, domain: &CustomDomain) -> Result<LoadBalancerClass<'_>, ProviderError> {
        if let Some(id) = &domain.spec.load_balancer_provider {
            return self
                .lookup(id)
                .ok_or_else(|| ProviderError::ProviderUnavailable {
                    kind: "load-balancer",
                    provider: id.clone(),
                });
        }

        let name = domain.name_any();
        let root = root_domain(&name).ok_or_else(|| ProviderError::InvalidDomain {
            domain: name.clone(),
        })?;

        let candidates: &[&str] = if root == name {
            &[PROVIDER_STATIC_IP]
        } else {
            &[PROVIDER_CNAME, PROVIDER_STATIC_IP]
        };

        candidates
            .iter()
            .find_map(|id| self.lookup(id))
            .ok_or(ProviderError::NoProviderAvailable { domain: name })
    }
}

#[async_trait]
impl LoadBalancerProvider for LoadBalancerSet {
    async fn provision(&self, domain: &CustomDomain) -> Result<RoutingEndpoint, ProviderError> {
        let class = self.select(domain)?;
        let name = domain.name_any();
        debug!(domain = %name, provider = class.id(), "Provisioning load balancer");

        Ok(RoutingEndpoint {
            provider_id: class.id().to_string(),
            dns_records: class.records(&name),
        })
    }

    async fn release(&self, domain: &CustomDomain) -> Result<bool, ProviderError> {
        // nothing was provisioned before a provider is recorded
        if domain.spec.load_balancer_provider.is_none() {
            return Ok(true);
        }
        let class = self.select(domain)?;
        debug!(domain = %domain.name_any(), provider = class.id(), "Releasing load balancer");
        Ok(true)
    }
}

#[cfg(test)]
#[path = "loadbalancer_tests.rs"]
mod loadbalancer_tests;
