// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Common label, annotation and finalizer constants used across all reconcilers.
//!
//! This module defines standard Kubernetes labels and controller-specific
//! labels/annotations to ensure consistency across all resources created by the controller.

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of a higher-level application this one is part of
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

/// Value for `app.kubernetes.io/part-of` on generated resources
pub const PART_OF_SKYDOMAIN: &str = "skydomain";

/// Value for `app.kubernetes.io/managed-by` on resources generated for a registration
pub const MANAGED_BY_REGISTRATION: &str = "CustomDomainRegistration";

// ============================================================================
// Controller-Specific Annotations
// ============================================================================

/// Annotation marking a registration as tracked by a `CustomDomain`.
///
/// The value is the UID of the owning `CustomDomain`. An annotation is used
/// instead of an owner reference so that deleting the aggregate never
/// garbage-collects a tenant's registration.
pub const CUSTOM_DOMAIN_UID_ANNOTATION: &str = "domain.skygear.io/custom-domain-uid";

/// Annotation on generated Ingress objects naming the domain they route
pub const DOMAIN_NAME_ANNOTATION: &str = "domain.skygear.io/domain-name";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer held by both resource kinds until their external resources are released
pub const FINALIZER_DOMAIN: &str = "domain.skygear.io/finalizer";
