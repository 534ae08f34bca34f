// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Error types for the custom domain controller.
//!
//! This module provides specialized error types for:
//! - Object store operations (optimistic patches, create races)
//! - Provider operations (load balancer, certificate, ingress)
//! - DNS ownership verification
//!
//! Provider and verification errors never abort a reconciliation pass on their
//! own; they are rendered into `Unknown`/`False` conditions. Store errors abort
//! the pass and the object is retried on the next trigger.

use thiserror::Error;

/// Errors returned by the object store seam.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The object changed since it was read (HTTP 409 on a conditional write).
    ///
    /// The whole pass is retried on the next trigger; partial state is never merged.
    #[error("{kind} '{name}' was modified concurrently, retrying")]
    Conflict {
        /// Kind of the object that could not be written
        kind: String,
        /// Name of the object that could not be written
        name: String,
    },

    /// An object with the same name was created concurrently.
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// Kind of the object that could not be created
        kind: String,
        /// Name of the object that could not be created
        name: String,
    },

    /// An object required for a write is missing identity metadata.
    #[error("{kind} is missing metadata field '{field}'")]
    MissingMetadata {
        /// Kind of the malformed object
        kind: String,
        /// The absent metadata field
        field: &'static str,
    },

    /// Any other Kubernetes API failure.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

}

impl StoreError {
    /// Returns true if the error represents an optimistic-concurrency conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Classify a `kube::Error` raised while writing `kind/name`.
    #[must_use]
    pub fn from_write(err: kube::Error, kind: &str, name: &str) -> Self {
        if is_already_exists(&err) {
            return StoreError::AlreadyExists {
                kind: kind.to_string(),
                name: name.to_string(),
            };
        }
        match &err {
            kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            _ => StoreError::Kube(err),
        }
    }
}

/// Returns true if the `kube::Error` is an HTTP 404.
#[must_use]
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Returns true if the `kube::Error` reports that the object already exists.
#[must_use]
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists")
}

/// Errors returned by load balancer, certificate and ingress providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// No configured provider class can serve the domain.
    #[error("no available load-balancer provider for the domain '{domain}'")]
    NoProviderAvailable {
        /// The domain that could not be served
        domain: String,
    },

    /// The recorded provider class is not configured in this controller.
    #[error("{kind} provider '{provider}' is unavailable")]
    ProviderUnavailable {
        /// Provider family (e.g. "load-balancer")
        kind: &'static str,
        /// The recorded provider identifier
        provider: String,
    },

    /// The domain name has no registrable root under the public suffix list.
    #[error("domain '{domain}' has no registrable root")]
    InvalidDomain {
        /// The rejected domain name
        domain: String,
    },

    /// Required input is missing on the resource.
    #[error("{0}")]
    MissingInput(String),

    /// A provider call exceeded its time budget.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// The operation that timed out
        operation: &'static str,
        /// The budget in seconds
        seconds: u64,
    },

    /// Backend API failure.
    #[error("{provider} API error: {source}")]
    Backend {
        /// Provider identifier
        provider: &'static str,
        /// Underlying Kubernetes error
        #[source]
        source: kube::Error,
    },
}

/// Errors that can occur during DNS ownership verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// The domain name has no registrable root under the public suffix list.
    #[error("cannot lookup verification DNS record: domain '{domain}' has no registrable root")]
    InvalidDomain {
        /// The rejected domain name
        domain: String,
    },

    /// The TXT lookup itself failed (NXDOMAIN, SERVFAIL, network error).
    #[error("cannot lookup verification DNS record: {reason}")]
    Lookup {
        /// Resolver error description
        reason: String,
    },

    /// The domain verification key cannot key the token MAC.
    #[error("invalid verification key: {0}")]
    InvalidKey(String),

    /// The TXT record set does not contain the expected token.
    #[error("verification DNS record not found")]
    RecordNotFound,

    /// The lookup exceeded its time budget.
    #[error("verification DNS lookup timed out after {seconds}s")]
    Timeout {
        /// The budget in seconds
        seconds: u64,
    },
}

/// Errors raised while loading the controller configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read configuration file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse configuration file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// A configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
