// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Controller configuration.
//!
//! Process settings come from the command line (or the matching environment
//! variables); provider settings come from a YAML file named by
//! `--config-file`. JSON files are accepted too, since JSON is valid YAML.
//!
//! # Example Configuration File
//!
//! ```yaml
//! loadBalancer:
//!   staticIp:
//!     ipAddresses: ["203.0.113.10", "2001:db8::10"]
//!   cname:
//!     target: edge.example.net
//! certManager:
//!   clusterIssuerName: letsencrypt-prod
//! ingress:
//!   ingressClassName: nginx
//! verification:
//!   cooldownSeconds: 60
//!   timeoutSeconds: 5
//!   reverifyIntervalSeconds: 86400
//! pollIntervalSeconds: 10
//! providerTimeoutSeconds: 10
//! ```

use crate::constants::{
    DEFAULT_INGRESS_CLASS, DEFAULT_METRICS_ADDR, DEFAULT_VERIFICATION_RECORD_LABEL,
    DEFAULT_WORKER_THREADS, MAX_CONFIG_DURATION_SECS, POLL_INTERVAL_SECS, PROVIDER_TIMEOUT_SECS,
    VERIFICATION_COOLDOWN_SECS, VERIFICATION_TIMEOUT_SECS,
};
use crate::errors::ConfigError;
use crate::verification::VerificationPolicy;
use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command line arguments of the controller.
#[derive(Parser, Debug, Clone)]
#[command(name = "skydomain", version, about = "Custom domain controller")]
pub struct Args {
    /// Path to the provider configuration file (YAML or JSON).
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: PathBuf,

    /// Address the metrics and health endpoints bind to.
    #[arg(long, env = "METRICS_ADDR", default_value = DEFAULT_METRICS_ADDR)]
    pub metrics_addr: SocketAddr,

    /// Number of tokio worker threads.
    #[arg(long, env = "WORKER_THREADS", default_value_t = DEFAULT_WORKER_THREADS)]
    pub worker_threads: usize,
}

/// Contents of the provider configuration file.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,

    /// Automated certificate issuance. Required.
    pub cert_manager: Option<CertManagerConfig>,

    #[serde(default)]
    pub ingress: IngressConfig,

    #[serde(default)]
    pub verification: VerificationConfig,

    /// Requeue delay while a provider reports "pending".
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Upper bound on one provider call.
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_seconds: u64,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerConfig {
    pub static_ip: Option<StaticIpConfig>,
    pub cname: Option<CnameConfig>,
}

/// Static addresses published as `A`/`AAAA` records.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StaticIpConfig {
    pub ip_addresses: Vec<String>,
}

/// Host published as a `CNAME` target for sub-domains.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CnameConfig {
    pub target: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertManagerConfig {
    pub cluster_issuer_name: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    #[serde(default = "default_ingress_class")]
    pub ingress_class_name: String,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            ingress_class_name: default_ingress_class(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationConfig {
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,

    #[serde(default = "default_verification_timeout")]
    pub timeout_seconds: u64,

    /// Periodic re-verification interval. Disabled when unset.
    #[serde(default)]
    pub reverify_interval_seconds: Option<u64>,

    #[serde(default = "default_record_label")]
    pub record_label: String,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: default_cooldown(),
            timeout_seconds: default_verification_timeout(),
            reverify_interval_seconds: None,
            record_label: default_record_label(),
        }
    }
}

fn default_poll_interval() -> u64 {
    POLL_INTERVAL_SECS
}

fn default_provider_timeout() -> u64 {
    PROVIDER_TIMEOUT_SECS
}

fn default_ingress_class() -> String {
    DEFAULT_INGRESS_CLASS.to_string()
}

fn default_cooldown() -> u64 {
    VERIFICATION_COOLDOWN_SECS
}

fn default_verification_timeout() -> u64 {
    VERIFICATION_TIMEOUT_SECS
}

fn default_record_label() -> String {
    DEFAULT_VERIFICATION_RECORD_LABEL.to_string()
}

fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

impl ControllerConfig {
    /// Read and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or fails [`Self::validate`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that cannot be expressed in the schema.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(static_ip) = &self.load_balancer.static_ip {
            for address in &static_ip.ip_addresses {
                if address.parse::<IpAddr>().is_err() {
                    return Err(ConfigError::Invalid(format!(
                        "IP address '{address}' is not valid"
                    )));
                }
            }
        }

        if self
            .load_balancer
            .cname
            .as_ref()
            .is_some_and(|cname| cname.target.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "loadBalancer.cname.target must not be empty".to_string(),
            ));
        }

        match &self.cert_manager {
            None => {
                return Err(ConfigError::Invalid(
                    "cert-manager config is missing".to_string(),
                ))
            }
            Some(cm) if cm.cluster_issuer_name.is_empty() => {
                return Err(ConfigError::Invalid(
                    "certManager.clusterIssuerName must not be empty".to_string(),
                ))
            }
            Some(_) => {}
        }

        if self.load_balancer.static_ip.is_none() && self.load_balancer.cname.is_none() {
            return Err(ConfigError::Invalid(
                "at least one load balancer class must be configured".to_string(),
            ));
        }

        let durations = [
            ("pollIntervalSeconds", Some(self.poll_interval_seconds)),
            ("providerTimeoutSeconds", Some(self.provider_timeout_seconds)),
            ("verification.cooldownSeconds", Some(self.verification.cooldown_seconds)),
            ("verification.timeoutSeconds", Some(self.verification.timeout_seconds)),
            (
                "verification.reverifyIntervalSeconds",
                self.verification.reverify_interval_seconds,
            ),
        ];
        for (field, value) in durations {
            if value.is_some_and(|secs| secs > MAX_CONFIG_DURATION_SECS) {
                return Err(ConfigError::Invalid(format!(
                    "{field} must not exceed {MAX_CONFIG_DURATION_SECS} seconds"
                )));
            }
        }

        if self.verification.record_label.is_empty() {
            return Err(ConfigError::Invalid(
                "verification.recordLabel must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    #[must_use]
    pub fn verification_policy(&self) -> VerificationPolicy {
        VerificationPolicy {
            cooldown: seconds(self.verification.cooldown_seconds),
            timeout: Duration::from_secs(self.verification.timeout_seconds),
            reverify_interval: self.verification.reverify_interval_seconds.map(seconds),
            record_label: self.verification.record_label.clone(),
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> chrono::Duration {
        seconds(self.poll_interval_seconds)
    }

    #[must_use]
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
