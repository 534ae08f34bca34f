// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! `CustomDomain` reconciliation logic.
//!
//! A `CustomDomain` exists while at least one registration claims its name.
//! Each pass of an active domain:
//!
//! 1. Ensures the finalizer (a pass that adds it does nothing else)
//! 2. Prunes registrations that no longer exist and marks the rest with
//!    [`CUSTOM_DOMAIN_UID_ANNOTATION`]
//! 3. Deletes the domain once no registration is left
//! 4. Provisions the shared load balancer and records its provider class
//! 5. Generates the verification key and arbitrates ownership
//! 6. Persists spec and status
//!
//! A terminating domain releases its load balancer before the finalizer is
//! removed.

use super::deadline::Deadline;
use super::finalizers::{ensure_finalizer, has_finalizer, remove_finalizer};
use super::references::insert;
use super::status::{create_condition, is_condition_true, merge_conditions};
use super::{tenant_of, LifecyclePhase};
use crate::constants::{KIND_CUSTOM_DOMAIN, REQUEUE_IMMEDIATELY};
use crate::context::Context;
use crate::crd::{Condition, CustomDomain, CustomDomainRegistration, CustomDomainStatus};
use crate::errors::StoreError;
use crate::labels::{CUSTOM_DOMAIN_UID_ANNOTATION, FINALIZER_DOMAIN};
use crate::metrics;
use crate::status_reasons::{
    CONDITION_TYPE_LOAD_BALANCER_PROVISIONED, CONDITION_TYPE_VERIFIED, REASON_PROVIDER_ERROR,
    REASON_PROVISIONED, REASON_RELEASING, STATUS_TRUE, STATUS_UNKNOWN,
};
use crate::store::DomainStore;
use crate::verification::generate_key;
use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

const PROVIDER_LOAD_BALANCER: &str = "load-balancer";

/// Reconciles a `CustomDomain` resource.
///
/// # Errors
///
/// Returns an error if a store write fails (including version conflicts) or
/// if the load balancer cannot be provisioned or released. The condition
/// describing a provider failure is persisted before the error is returned.
pub async fn reconcile_customdomain(ctx: Arc<Context>, domain: CustomDomain) -> Result<Action> {
    debug!(domain = %domain.name_any(), "Reconciling CustomDomain");

    match LifecyclePhase::of(&domain) {
        LifecyclePhase::Active => converge(&ctx, domain).await,
        LifecyclePhase::Terminating => finalize(&ctx, domain).await,
    }
}

async fn converge(ctx: &Context, domain: CustomDomain) -> Result<Action> {
    let store = ctx.store.as_ref();
    let name = domain.name_any();

    if ensure_finalizer(store, &domain, FINALIZER_DOMAIN)
        .await?
        .is_some()
    {
        metrics::record_requeue(KIND_CUSTOM_DOMAIN, "finalizer-added");
        return Ok(Action::requeue(REQUEUE_IMMEDIATELY));
    }

    let (mut domain, registrations) = validate_registrations(store, domain).await?;

    if domain.spec.registrations.is_empty() {
        info!("CustomDomain {} has no registrations left, deleting", name);
        store.delete_domain(&domain).await?;
        metrics::record_requeue(KIND_CUSTOM_DOMAIN, "deleted");
        return Ok(Action::requeue(REQUEUE_IMMEDIATELY));
    }

    let now = ctx.clock.now();
    let mut status = domain.status.clone().unwrap_or_default();

    let endpoint = match ctx
        .bounded(
            "provision load balancer",
            ctx.load_balancer.provision(&domain),
        )
        .await
    {
        Ok(endpoint) => endpoint,
        Err(e) => {
            warn!(domain = %name, error = %e, "Failed to provision load balancer");
            metrics::record_provider_error(PROVIDER_LOAD_BALANCER);
            let fresh = vec![create_condition(
                CONDITION_TYPE_LOAD_BALANCER_PROVISIONED,
                STATUS_UNKNOWN,
                REASON_PROVIDER_ERROR,
                &e.to_string(),
            )];
            persist_status(store, &domain, status, fresh, now).await?;
            return Err(e).with_context(|| format!("failed to provision load balancer for {name}"));
        }
    };

    let mut spec_changed = false;
    if domain.spec.load_balancer_provider.is_none() {
        info!(
            "Recording load balancer provider {} for CustomDomain {}",
            endpoint.provider_id, name
        );
        domain.spec.load_balancer_provider = Some(endpoint.provider_id.clone());
        spec_changed = true;
    }
    status.routing_endpoint = Some(endpoint);
    let fresh = vec![create_condition(
        CONDITION_TYPE_LOAD_BALANCER_PROVISIONED,
        STATUS_TRUE,
        REASON_PROVISIONED,
        "",
    )];

    if domain.spec.verification_key.is_none() {
        debug!(domain = %name, "Generating verification key");
        domain.spec.verification_key = Some(generate_key());
        spec_changed = true;
    }

    let owner = arbitrate(domain.spec.owner_tenant.as_deref(), &registrations);
    if owner != domain.spec.owner_tenant {
        info!(
            "CustomDomain {} owner changed from {:?} to {:?}",
            name, domain.spec.owner_tenant, owner
        );
        domain.spec.owner_tenant = owner;
        spec_changed = true;
    }

    if spec_changed {
        domain = store.update_domain_spec(&domain).await?;
    }
    persist_status(store, &domain, status, fresh, now).await?;

    Ok(Action::await_change())
}

async fn finalize(ctx: &Context, domain: CustomDomain) -> Result<Action> {
    let store = ctx.store.as_ref();
    let name = domain.name_any();

    if !has_finalizer(&domain, FINALIZER_DOMAIN) {
        return Ok(Action::await_change());
    }

    info!("CustomDomain {} is being deleted, releasing load balancer", name);
    let now = ctx.clock.now();
    let status = domain.status.clone().unwrap_or_default();

    match ctx
        .bounded("release load balancer", ctx.load_balancer.release(&domain))
        .await
    {
        Ok(true) => {
            remove_finalizer(store, &domain, FINALIZER_DOMAIN).await?;
            info!("Released load balancer of CustomDomain {}", name);
            Ok(Action::await_change())
        }
        Ok(false) => {
            let fresh = vec![create_condition(
                CONDITION_TYPE_LOAD_BALANCER_PROVISIONED,
                STATUS_TRUE,
                REASON_RELEASING,
                "load balancer is being released",
            )];
            persist_status(store, &domain, status, fresh, now).await?;

            let mut deadline = Deadline::new();
            deadline.request_after(now, ctx.settings.poll_interval);
            metrics::record_requeue(KIND_CUSTOM_DOMAIN, "releasing");
            Ok(deadline.into_action(now))
        }
        Err(e) => {
            warn!(domain = %name, error = %e, "Failed to release load balancer");
            metrics::record_provider_error(PROVIDER_LOAD_BALANCER);
            let fresh = vec![create_condition(
                CONDITION_TYPE_LOAD_BALANCER_PROVISIONED,
                STATUS_UNKNOWN,
                REASON_PROVIDER_ERROR,
                &e.to_string(),
            )];
            persist_status(store, &domain, status, fresh, now).await?;
            Err(e).with_context(|| format!("failed to release load balancer for {name}"))
        }
    }
}

/// Drop references to registrations that no longer exist and mark the rest
/// as tracked by `domain`.
///
/// Returns the (possibly updated) domain and the live registrations in list order.
async fn validate_registrations(
    store: &dyn DomainStore,
    domain: CustomDomain,
) -> Result<(CustomDomain, Vec<CustomDomainRegistration>), StoreError> {
    let uid = domain.uid().ok_or_else(|| StoreError::MissingMetadata {
        kind: KIND_CUSTOM_DOMAIN.to_string(),
        field: "uid",
    })?;

    let mut kept = Vec::with_capacity(domain.spec.registrations.len());
    let mut live = Vec::with_capacity(domain.spec.registrations.len());

    for reference in &domain.spec.registrations {
        let (Some(namespace), Some(name)) =
            (reference.namespace.as_deref(), reference.name.as_deref())
        else {
            continue;
        };

        let Some(mut reg) = store.get_registration(namespace, name).await? else {
            debug!(namespace = %namespace, name = %name, "Pruning missing registration");
            continue;
        };
        // same name, different object: the claim it referred to is gone
        if reg.uid() != reference.uid {
            debug!(namespace = %namespace, name = %name, "Pruning replaced registration");
            continue;
        }
        if !insert(&mut kept, reference.clone()) {
            continue;
        }

        if reg.annotations().get(CUSTOM_DOMAIN_UID_ANNOTATION) != Some(&uid) {
            debug!(namespace = %namespace, name = %name, "Marking registration as tracked");
            reg = store
                .annotate_registration(&reg, CUSTOM_DOMAIN_UID_ANNOTATION, &uid)
                .await?;
        }
        live.push(reg);
    }

    if kept == domain.spec.registrations {
        return Ok((domain, live));
    }

    info!(
        "Pruned {} registration(s) from CustomDomain {}",
        domain.spec.registrations.len() - kept.len(),
        domain.name_any()
    );
    let mut updated = domain;
    updated.spec.registrations = kept;
    let updated = store.update_domain_spec(&updated).await?;
    Ok((updated, live))
}

/// Decide the owner of a domain among its registrations.
///
/// - Without an owner, the first active registration (in list order) with
///   `Verified=True` becomes the owner.
/// - An existing owner is kept while its registration is present, active and
///   verified. Otherwise the owner is cleared, and a new owner is chosen by a
///   later pass.
#[must_use]
pub fn arbitrate(current: Option<&str>, registrations: &[CustomDomainRegistration]) -> Option<String> {
    let eligible = |reg: &CustomDomainRegistration| {
        LifecyclePhase::of(reg) == LifecyclePhase::Active
            && reg
                .status
                .as_ref()
                .is_some_and(|s| is_condition_true(&s.conditions, CONDITION_TYPE_VERIFIED))
    };

    match current {
        Some(owner) => registrations
            .iter()
            .find(|reg| tenant_of(reg).as_deref() == Some(owner))
            .filter(|reg| eligible(reg))
            .map(|_| owner.to_string()),
        None => registrations
            .iter()
            .find(|reg| eligible(reg))
            .and_then(tenant_of),
    }
}

/// Merge `fresh` conditions into `status` and write it if anything changed.
async fn persist_status(
    store: &dyn DomainStore,
    domain: &CustomDomain,
    mut status: CustomDomainStatus,
    fresh: Vec<Condition>,
    now: DateTime<Utc>,
) -> Result<CustomDomain, StoreError> {
    let previous = domain
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();
    status.conditions = merge_conditions(fresh, previous, now);

    if domain.status.as_ref() == Some(&status) {
        return Ok(domain.clone());
    }

    let mut updated = domain.clone();
    updated.status = Some(status);
    store.update_domain_status(&updated).await
}

#[cfg(test)]
#[path = "customdomain_tests.rs"]
mod customdomain_tests;
