// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Global constants for the custom domain controller.
//!
//! This module contains the numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

use std::time::Duration;

// ============================================================================
// API Constants
// ============================================================================

/// API group for all custom domain CRDs
pub const API_GROUP: &str = "domain.skygear.io";

/// API version for all custom domain CRDs
pub const API_VERSION: &str = "v1beta1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "domain.skygear.io/v1beta1";

/// Kind name for `CustomDomain` resource
pub const KIND_CUSTOM_DOMAIN: &str = "CustomDomain";

/// Kind name for `CustomDomainRegistration` resource
pub const KIND_CUSTOM_DOMAIN_REGISTRATION: &str = "CustomDomainRegistration";

/// Field manager name used for server-side bookkeeping of our patches
pub const FIELD_MANAGER: &str = "skydomain-controller";

// ============================================================================
// Domain Verification Constants
// ============================================================================

/// Minimum spacing between two verification attempts of one registration
pub const VERIFICATION_COOLDOWN_SECS: u64 = 60;

/// Upper bound on a single DNS verification lookup
pub const VERIFICATION_TIMEOUT_SECS: u64 = 5;

/// DNS label prefixed to the registrable root to form the TXT record name
pub const DEFAULT_VERIFICATION_RECORD_LABEL: &str = "_skygear";

/// Length in bytes of a generated domain verification key (before hex encoding)
pub const VERIFICATION_KEY_BYTES: usize = 32;

/// Message recorded when the expected token is absent from the TXT record set
pub const VERIFICATION_RECORD_NOT_FOUND: &str = "verification DNS record not found";

// ============================================================================
// DNS Record Types
// ============================================================================

/// IPv4 address record
pub const DNS_RECORD_TYPE_A: &str = "A";

/// IPv6 address record
pub const DNS_RECORD_TYPE_AAAA: &str = "AAAA";

/// Canonical name record
pub const DNS_RECORD_TYPE_CNAME: &str = "CNAME";

/// Text record
pub const DNS_RECORD_TYPE_TXT: &str = "TXT";

// ============================================================================
// Controller Requeue Constants
// ============================================================================

/// Requeue interval for "pending" provider results (certificate not yet issued,
/// load balancer not yet released)
pub const POLL_INTERVAL_SECS: u64 = 10;

/// Requeue interval after a reconciliation error
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Requeue interval after a write lost an optimistic-concurrency race
pub const CONFLICT_REQUEUE_DURATION_SECS: u64 = 1;

/// Upper bound on a single provider call (load balancer, certificate)
pub const PROVIDER_TIMEOUT_SECS: u64 = 10;

/// Smallest delay used when a requested deadline has already passed
pub const DEADLINE_EPSILON: Duration = Duration::from_millis(1);

/// Delay used to requeue right after a finalizer has been added
pub const REQUEUE_IMMEDIATELY: Duration = Duration::ZERO;

/// Longest timed requeue; later deadlines are re-planned when this one fires
pub const MAX_REQUEUE_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound accepted for any configured duration (one year)
pub const MAX_CONFIG_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Default number of tokio worker threads
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Default bind address of the metrics/health HTTP server
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Default ingress class for generated Ingress objects
pub const DEFAULT_INGRESS_CLASS: &str = "nginx";
