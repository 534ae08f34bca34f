// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! `CustomDomainRegistration` reconciliation logic.
//!
//! Every pass of an active registration evaluates all four conditions:
//!
//! | Condition      | Evaluated from                                          |
//! |----------------|---------------------------------------------------------|
//! | `Verified`     | TXT lookup of the verification record, rate limited     |
//! | `Accepted`     | `spec.ownerTenant` of the `CustomDomain`                |
//! | `CertReady`    | certificate provisioned (accepted) or released (not)    |
//! | `IngressReady` | Ingress upserted (accepted) or removed (not)            |
//!
//! Each step may ask to be retried no earlier than some instant; the soonest
//! request becomes the requeue delay of the pass.
//!
//! A terminating registration leaves its `CustomDomain`, removes its Ingress
//! and releases its certificate. The finalizer is removed only once all three
//! are done.

use super::deadline::Deadline;
use super::finalizers::{ensure_finalizer, has_finalizer, remove_finalizer};
use super::references::{contains, insert, is_controlled_by, object_reference, remove};
use super::status::{
    bool_status, create_condition, find_condition, is_condition_true, merge_conditions,
};
use super::{tenant_of, LifecyclePhase};
use crate::constants::{
    DNS_RECORD_TYPE_TXT, KIND_CUSTOM_DOMAIN, KIND_CUSTOM_DOMAIN_REGISTRATION, REQUEUE_IMMEDIATELY,
};
use crate::context::Context;
use crate::crd::{
    Condition, CustomDomain, CustomDomainRegistration, CustomDomainRegistrationStatus,
    CustomDomainSpec, DnsRecord,
};
use crate::errors::StoreError;
use crate::labels::FINALIZER_DOMAIN;
use crate::metrics;
use crate::providers::ingress::{apply_desired, ingress_differs};
use crate::status_reasons::{
    CONDITION_TYPE_ACCEPTED, CONDITION_TYPE_CERT_READY, CONDITION_TYPE_INGRESS_READY,
    CONDITION_TYPE_VERIFIED, REASON_CERTIFICATE_ISSUED, REASON_CERTIFICATE_PENDING,
    REASON_CERTIFICATE_RELEASED, REASON_CERTIFICATE_RELEASING, REASON_DOMAIN_OWNER,
    REASON_DOMAIN_VERIFIED, REASON_INGRESS_CONFIGURED, REASON_INGRESS_CONFLICT,
    REASON_INGRESS_REMOVED, REASON_NOT_OWNER, REASON_NOT_VERIFIED, REASON_RECONCILE_ERROR,
    REASON_UNREGISTERED, REASON_UNREGISTERING, REASON_VERIFICATION_FAILED, STATUS_FALSE,
    STATUS_TRUE, STATUS_UNKNOWN,
};
use crate::store::DomainStore;
use crate::verification::{
    derive_token, plan_verification, record_name, verify_domain, VerificationPlan,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

const PROVIDER_CERTIFICATE: &str = "certificate";

/// Reconciles a `CustomDomainRegistration` resource.
///
/// Returns a timed requeue when a step is waiting (verification cooldown,
/// pending certificate, pending release), otherwise waits for the next watch event.
///
/// # Errors
///
/// Returns an error if a store write fails, including version conflicts.
/// Provider and verification failures are recorded as conditions instead.
pub async fn reconcile_registration(
    ctx: Arc<Context>,
    reg: CustomDomainRegistration,
) -> Result<Action> {
    debug!(
        registration = %reg.name_any(),
        namespace = ?reg.namespace(),
        "Reconciling CustomDomainRegistration"
    );

    match LifecyclePhase::of(&reg) {
        LifecyclePhase::Active => converge(&ctx, reg).await,
        LifecyclePhase::Terminating => finalize(&ctx, reg).await,
    }
}

async fn converge(ctx: &Context, reg: CustomDomainRegistration) -> Result<Action> {
    let store = ctx.store.as_ref();

    if ensure_finalizer(store, &reg, FINALIZER_DOMAIN).await?.is_some() {
        metrics::record_requeue(KIND_CUSTOM_DOMAIN_REGISTRATION, "finalizer-added");
        return Ok(Action::requeue(REQUEUE_IMMEDIATELY));
    }

    let uid = registration_uid(&reg)?;
    let now = ctx.clock.now();
    let mut deadline = Deadline::new();
    let mut status = reg.status.clone().unwrap_or_default();

    let domain = register_domain(ctx, &reg, now, &mut deadline).await?;

    let mut conditions = Vec::with_capacity(4);
    conditions.push(
        verify_domain_if_needed(ctx, &reg, &uid, domain.as_ref(), &mut status, now, &mut deadline)
            .await,
    );

    let accepted = is_accepted(&reg, domain.as_ref());
    conditions.push(if accepted {
        create_condition(
            CONDITION_TYPE_ACCEPTED,
            STATUS_TRUE,
            REASON_DOMAIN_OWNER,
            "registration owns the domain",
        )
    } else {
        create_condition(CONDITION_TYPE_ACCEPTED, STATUS_FALSE, REASON_NOT_OWNER, "")
    });

    conditions.push(sync_certificate(ctx, &reg, accepted, &mut status, now, &mut deadline).await);

    let ingress = if accepted {
        match upsert_ingress(ctx, &reg, &uid, status.certificate_secret_name.as_deref()).await {
            Ok(true) => create_condition(
                CONDITION_TYPE_INGRESS_READY,
                STATUS_TRUE,
                REASON_INGRESS_CONFIGURED,
                "Ingress routes to the backend service",
            ),
            Ok(false) => {
                let message = format!(
                    "Ingress {} exists and is not managed by this registration",
                    reg.spec.domain_name
                );
                warn!(registration = %reg.name_any(), "{}", message);
                deadline.request_after(now, ctx.settings.poll_interval);
                create_condition(
                    CONDITION_TYPE_INGRESS_READY,
                    STATUS_UNKNOWN,
                    REASON_INGRESS_CONFLICT,
                    &message,
                )
            }
            Err(e) => {
                warn!(registration = %reg.name_any(), error = %e, "Failed to update Ingress");
                create_condition(
                    CONDITION_TYPE_INGRESS_READY,
                    STATUS_UNKNOWN,
                    REASON_RECONCILE_ERROR,
                    &e.to_string(),
                )
            }
        }
    } else {
        ingress_removed_condition(remove_ingress(store, &reg, &uid).await)
    };
    conditions.push(ingress);

    persist_status(store, &reg, status, conditions, now).await?;

    if deadline.instant().is_some() {
        metrics::record_requeue(KIND_CUSTOM_DOMAIN_REGISTRATION, "deadline");
    }
    Ok(deadline.into_action(now))
}

async fn finalize(ctx: &Context, reg: CustomDomainRegistration) -> Result<Action> {
    let store = ctx.store.as_ref();
    let name = reg.name_any();

    if !has_finalizer(&reg, FINALIZER_DOMAIN) {
        return Ok(Action::await_change());
    }

    info!(
        "CustomDomainRegistration {}/{} is being deleted",
        reg.namespace().unwrap_or_default(),
        name
    );

    let uid = registration_uid(&reg)?;
    let now = ctx.clock.now();
    let mut deadline = Deadline::new();
    let mut status = reg.status.clone().unwrap_or_default();
    let mut conditions = Vec::with_capacity(4);
    if let Some(verified) = find_condition(&status.conditions, CONDITION_TYPE_VERIFIED) {
        conditions.push(verified.clone());
    }

    let (accepted, unregistered) = match unregister_domain(store, &reg, &uid).await {
        Ok(true) => (
            create_condition(
                CONDITION_TYPE_ACCEPTED,
                STATUS_TRUE,
                REASON_UNREGISTERING,
                "waiting for removal from CustomDomain",
            ),
            false,
        ),
        Ok(false) => (
            create_condition(
                CONDITION_TYPE_ACCEPTED,
                STATUS_FALSE,
                REASON_UNREGISTERED,
                "removed from CustomDomain",
            ),
            true,
        ),
        Err(e) => {
            warn!(registration = %name, error = %e, "Failed to unregister from CustomDomain");
            deadline.request_after(now, ctx.settings.poll_interval);
            (
                create_condition(
                    CONDITION_TYPE_ACCEPTED,
                    STATUS_UNKNOWN,
                    REASON_RECONCILE_ERROR,
                    &e.to_string(),
                ),
                false,
            )
        }
    };
    conditions.push(accepted);

    let ingress_result = remove_ingress(store, &reg, &uid).await;
    let ingress_removed = ingress_result.is_ok();
    conditions.push(ingress_removed_condition(ingress_result));

    let cert = sync_certificate(ctx, &reg, false, &mut status, now, &mut deadline).await;
    let released = cert.status == STATUS_FALSE;
    conditions.push(cert);

    let reg = persist_status(store, &reg, status, conditions, now).await?;

    if unregistered && ingress_removed && released {
        remove_finalizer(store, &reg, FINALIZER_DOMAIN).await?;
        info!("Finalized CustomDomainRegistration {}", name);
        return Ok(Action::await_change());
    }

    debug!(
        registration = %name,
        unregistered,
        ingress_removed,
        released,
        "Waiting for teardown to complete"
    );
    if deadline.instant().is_some() {
        metrics::record_requeue(KIND_CUSTOM_DOMAIN_REGISTRATION, "teardown");
    }
    Ok(deadline.into_action(now))
}

fn registration_uid(reg: &CustomDomainRegistration) -> Result<String, StoreError> {
    reg.uid().ok_or_else(|| StoreError::MissingMetadata {
        kind: KIND_CUSTOM_DOMAIN_REGISTRATION.to_string(),
        field: "uid",
    })
}

/// Get or create the `CustomDomain` for `reg` and make sure `reg` is listed on it.
///
/// Returns `None` while a previous `CustomDomain` of the same name is still
/// terminating; a retry is requested after the poll interval.
async fn register_domain(
    ctx: &Context,
    reg: &CustomDomainRegistration,
    now: DateTime<Utc>,
    deadline: &mut Deadline,
) -> Result<Option<CustomDomain>, StoreError> {
    let store = ctx.store.as_ref();
    let name = &reg.spec.domain_name;
    let reference = object_reference(reg);

    let domain = match store.get_domain(name).await? {
        Some(domain) => domain,
        None => {
            let domain = CustomDomain::new(
                name,
                CustomDomainSpec {
                    registrations: vec![reference.clone()],
                    ..CustomDomainSpec::default()
                },
            );
            match store.create_domain(&domain).await {
                Ok(created) => {
                    info!("Created CustomDomain {} for registration", name);
                    return Ok(Some(created));
                }
                // another registration won the race; join it
                Err(StoreError::AlreadyExists { .. }) => {
                    store
                        .get_domain(name)
                        .await?
                        .ok_or_else(|| StoreError::Conflict {
                            kind: KIND_CUSTOM_DOMAIN.to_string(),
                            name: name.clone(),
                        })?
                }
                Err(e) => return Err(e),
            }
        }
    };

    if LifecyclePhase::of(&domain) == LifecyclePhase::Terminating {
        debug!(domain = %name, "CustomDomain is being deleted, waiting before registering");
        deadline.request_after(now, ctx.settings.poll_interval);
        return Ok(None);
    }

    let Some(uid) = reference.uid.as_deref() else {
        return Ok(Some(domain));
    };
    if contains(&domain.spec.registrations, uid) {
        return Ok(Some(domain));
    }

    info!(
        "Registering {}/{} with CustomDomain {}",
        reg.namespace().unwrap_or_default(),
        reg.name_any(),
        name
    );
    let mut updated = domain;
    insert(&mut updated.spec.registrations, reference);
    Ok(Some(store.update_domain_spec(&updated).await?))
}

/// Remove `reg` from its `CustomDomain`. Returns whether it is still listed.
async fn unregister_domain(
    store: &dyn DomainStore,
    reg: &CustomDomainRegistration,
    uid: &str,
) -> Result<bool, StoreError> {
    let Some(domain) = store.get_domain(&reg.spec.domain_name).await? else {
        return Ok(false);
    };
    if !contains(&domain.spec.registrations, uid) {
        return Ok(false);
    }

    let mut updated = domain;
    remove(&mut updated.spec.registrations, uid);
    let updated = store.update_domain_spec(&updated).await?;
    info!(
        "Unregistered {}/{} from CustomDomain {}",
        reg.namespace().unwrap_or_default(),
        reg.name_any(),
        updated.name_any()
    );
    Ok(contains(&updated.spec.registrations, uid))
}

/// Run the ownership check when one is due and return the `Verified` condition.
///
/// Without a verification key or a routing endpoint on the domain, nothing is
/// checked and the last known value is reported again.
async fn verify_domain_if_needed(
    ctx: &Context,
    reg: &CustomDomainRegistration,
    uid: &str,
    domain: Option<&CustomDomain>,
    status: &mut CustomDomainRegistrationStatus,
    now: DateTime<Utc>,
    deadline: &mut Deadline,
) -> Condition {
    let policy = &ctx.settings.verification;
    let unchanged = if is_condition_true(&status.conditions, CONDITION_TYPE_VERIFIED) {
        create_condition(CONDITION_TYPE_VERIFIED, STATUS_TRUE, REASON_DOMAIN_VERIFIED, "")
    } else {
        create_condition(CONDITION_TYPE_VERIFIED, STATUS_FALSE, REASON_NOT_VERIFIED, "")
    };

    let Some(domain) = domain else {
        return unchanged;
    };
    let (Some(key), Some(endpoint)) = (
        domain.spec.verification_key.as_deref(),
        domain
            .status
            .as_ref()
            .and_then(|s| s.routing_endpoint.as_ref()),
    ) else {
        debug!(registration = %reg.name_any(), "CustomDomain not ready for verification");
        return unchanged;
    };

    let challenge = record_name(&policy.record_label, &reg.spec.domain_name)
        .and_then(|record| derive_token(key, uid).map(|token| (record, token)));
    let (record, token) = match challenge {
        Ok(challenge) => challenge,
        Err(e) => {
            return create_condition(
                CONDITION_TYPE_VERIFIED,
                STATUS_FALSE,
                REASON_VERIFICATION_FAILED,
                &e.to_string(),
            )
        }
    };

    let mut records = endpoint.dns_records.clone();
    records.push(DnsRecord::new(record.clone(), DNS_RECORD_TYPE_TXT, token.clone()));
    status.dns_records = records;

    match plan_verification(reg.spec.verify_at, status.last_verification_time, now, policy) {
        VerificationPlan::Idle => unchanged,
        VerificationPlan::Wait(at) => {
            debug!(registration = %reg.name_any(), until = %at, "Verification cooling down");
            deadline.request(at);
            unchanged
        }
        VerificationPlan::Attempt => {
            let result = verify_domain(ctx.resolver.as_ref(), &record, &token, policy.timeout).await;
            status.last_verification_time = Some(now);
            if let VerificationPlan::Wait(next) =
                plan_verification(reg.spec.verify_at, Some(now), now, policy)
            {
                deadline.request(next);
            }

            match result {
                Ok(()) => {
                    info!(
                        "Verified domain {} for {}/{}",
                        reg.spec.domain_name,
                        reg.namespace().unwrap_or_default(),
                        reg.name_any()
                    );
                    metrics::record_verification_attempt("verified");
                    create_condition(
                        CONDITION_TYPE_VERIFIED,
                        STATUS_TRUE,
                        REASON_DOMAIN_VERIFIED,
                        "verification DNS record found",
                    )
                }
                Err(e) => {
                    debug!(registration = %reg.name_any(), error = %e, "Verification failed");
                    metrics::record_verification_attempt("failed");
                    create_condition(
                        CONDITION_TYPE_VERIFIED,
                        STATUS_FALSE,
                        REASON_VERIFICATION_FAILED,
                        &e.to_string(),
                    )
                }
            }
        }
    }
}

fn is_accepted(reg: &CustomDomainRegistration, domain: Option<&CustomDomain>) -> bool {
    let tenant = tenant_of(reg);
    domain
        .and_then(|d| d.spec.owner_tenant.as_deref())
        .is_some_and(|owner| Some(owner) == tenant.as_deref())
}

/// Provision the certificate of an accepted registration, or release it
/// otherwise. Returns the `CertReady` condition.
async fn sync_certificate(
    ctx: &Context,
    reg: &CustomDomainRegistration,
    accepted: bool,
    status: &mut CustomDomainRegistrationStatus,
    now: DateTime<Utc>,
    deadline: &mut Deadline,
) -> Condition {
    if accepted {
        return match ctx
            .bounded("provision certificate", ctx.certificates.provision(reg))
            .await
        {
            Ok(Some(cert)) => {
                if status.certificate_secret_name.as_deref() != Some(cert.secret_name.as_str()) {
                    info!(
                        "Certificate for {} is ready in secret {}",
                        reg.spec.domain_name, cert.secret_name
                    );
                }
                let message = format!("certificate stored in secret {}", cert.secret_name);
                status.certificate_secret_name = Some(cert.secret_name);
                create_condition(
                    CONDITION_TYPE_CERT_READY,
                    STATUS_TRUE,
                    REASON_CERTIFICATE_ISSUED,
                    &message,
                )
            }
            Ok(None) => {
                status.certificate_secret_name = None;
                deadline.request_after(now, ctx.settings.poll_interval);
                create_condition(
                    CONDITION_TYPE_CERT_READY,
                    STATUS_FALSE,
                    REASON_CERTIFICATE_PENDING,
                    "waiting for certificate to be issued",
                )
            }
            Err(e) => {
                warn!(registration = %reg.name_any(), error = %e, "Failed to provision certificate");
                metrics::record_provider_error(PROVIDER_CERTIFICATE);
                deadline.request_after(now, ctx.settings.poll_interval);
                create_condition(
                    CONDITION_TYPE_CERT_READY,
                    STATUS_UNKNOWN,
                    REASON_RECONCILE_ERROR,
                    &e.to_string(),
                )
            }
        };
    }

    match ctx
        .bounded("release certificate", ctx.certificates.release(reg))
        .await
    {
        Ok(true) => {
            status.certificate_secret_name = None;
            create_condition(
                CONDITION_TYPE_CERT_READY,
                STATUS_FALSE,
                REASON_CERTIFICATE_RELEASED,
                "certificate released",
            )
        }
        Ok(false) => {
            deadline.request_after(now, ctx.settings.poll_interval);
            create_condition(
                CONDITION_TYPE_CERT_READY,
                STATUS_TRUE,
                REASON_CERTIFICATE_RELEASING,
                "waiting for certificate to be released",
            )
        }
        Err(e) => {
            warn!(registration = %reg.name_any(), error = %e, "Failed to release certificate");
            metrics::record_provider_error(PROVIDER_CERTIFICATE);
            deadline.request_after(now, ctx.settings.poll_interval);
            create_condition(
                CONDITION_TYPE_CERT_READY,
                STATUS_UNKNOWN,
                REASON_RECONCILE_ERROR,
                &e.to_string(),
            )
        }
    }
}

/// Create the Ingress of `reg`, or update it in place when it drifted.
///
/// Returns `false` without touching anything when an Ingress of the same name
/// exists that `reg` does not control.
async fn upsert_ingress(
    ctx: &Context,
    reg: &CustomDomainRegistration,
    uid: &str,
    tls_secret: Option<&str>,
) -> Result<bool> {
    let store = ctx.store.as_ref();
    let desired = ctx.ingress.make_ingress(reg, tls_secret)?;
    let namespace = desired.namespace().unwrap_or_default();
    let name = desired.name_any();

    match store.get_ingress(&namespace, &name).await? {
        None => {
            info!("Creating Ingress {}/{}", namespace, name);
            store.create_ingress(&desired).await?;
        }
        Some(existing) if !is_controlled_by(existing.owner_references(), uid) => {
            return Ok(false);
        }
        Some(existing) if ingress_differs(&existing, &desired) => {
            info!("Updating Ingress {}/{}", namespace, name);
            store
                .replace_ingress(&apply_desired(&existing, &desired))
                .await?;
        }
        Some(_) => debug!(ingress = %name, namespace = %namespace, "Ingress up to date"),
    }
    Ok(true)
}

/// Delete the Ingress of `reg` if it exists and is controlled by it.
async fn remove_ingress(
    store: &dyn DomainStore,
    reg: &CustomDomainRegistration,
    uid: &str,
) -> Result<(), StoreError> {
    let Some(namespace) = reg.namespace() else {
        return Ok(());
    };
    let name = &reg.spec.domain_name;

    let Some(existing) = store.get_ingress(&namespace, name).await? else {
        return Ok(());
    };
    if !is_controlled_by(existing.owner_references(), uid) {
        debug!(ingress = %name, namespace = %namespace, "Ingress not controlled by registration, leaving it");
        return Ok(());
    }

    if store.delete_ingress(&namespace, name).await? {
        info!("Deleted Ingress {}/{}", namespace, name);
    }
    Ok(())
}

fn ingress_removed_condition(result: Result<(), StoreError>) -> Condition {
    match result {
        Ok(()) => create_condition(
            CONDITION_TYPE_INGRESS_READY,
            bool_status(false),
            REASON_INGRESS_REMOVED,
            "Ingress removed",
        ),
        Err(e) => create_condition(
            CONDITION_TYPE_INGRESS_READY,
            STATUS_UNKNOWN,
            REASON_RECONCILE_ERROR,
            &e.to_string(),
        ),
    }
}

/// Merge `fresh` conditions into `status` and write it if anything changed.
async fn persist_status(
    store: &dyn DomainStore,
    reg: &CustomDomainRegistration,
    mut status: CustomDomainRegistrationStatus,
    fresh: Vec<Condition>,
    now: DateTime<Utc>,
) -> Result<CustomDomainRegistration, StoreError> {
    let previous = reg
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();
    status.conditions = merge_conditions(fresh, previous, now);

    if reg.status.as_ref() == Some(&status) {
        return Ok(reg.clone());
    }

    let mut updated = reg.clone();
    updated.status = Some(status);
    store.update_registration_status(&updated).await
}

#[cfg(test)]
#[path = "registration_tests.rs"]
mod registration_tests;
