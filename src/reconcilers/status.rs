// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Status condition helpers for custom domain resources.
//!
//! This module provides utility functions for creating and merging Kubernetes
//! status conditions following the standard conventions.
//!
//! # Condition Format
//!
//! Kubernetes conditions follow a standard format:
//! - `type`: The aspect of the resource being reported (e.g., "Verified", "Accepted")
//! - `status`: "True", "False", or "Unknown"
//! - `reason`: A programmatic identifier (CamelCase)
//! - `message`: A human-readable explanation
//! - `lastTransitionTime`: RFC3339 timestamp when the status last changed
//!
//! # Merging
//!
//! A reconciliation pass evaluates a fresh set of conditions without timestamps
//! and calls [`merge_conditions`] with the set stored on the resource. The
//! transition time only moves when the status changes; types not evaluated in
//! the pass are dropped.
//!
//! # Example
//!
//! ```rust,no_run
//! use skydomain::reconcilers::status::{create_condition, merge_conditions};
//! use chrono::Utc;
//!
//! let fresh = vec![create_condition("Verified", "False", "NotVerified", "")];
//! let merged = merge_conditions(fresh, &[], Utc::now());
//! assert!(merged[0].last_transition_time.is_some());
//! ```

use crate::crd::Condition;
use crate::status_reasons::{STATUS_FALSE, STATUS_TRUE};
use chrono::{DateTime, SecondsFormat, Utc};

/// Create a new condition without a transition time.
///
/// The transition time is filled in by [`merge_conditions`] when the condition
/// is persisted. An empty `message` is stored as no message.
///
/// # Example
///
/// ```rust,no_run
/// # use skydomain::reconcilers::status::create_condition;
/// let condition = create_condition(
///     "Accepted",
///     "True",
///     "DomainOwner",
///     ""
/// );
/// assert_eq!(condition.r#type, "Accepted");
/// assert!(condition.message.is_none());
/// ```
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: if message.is_empty() {
            None
        } else {
            Some(message.to_string())
        },
        last_transition_time: None,
    }
}

/// Map a boolean observation onto a condition status.
#[must_use]
pub fn bool_status(value: bool) -> &'static str {
    if value {
        STATUS_TRUE
    } else {
        STATUS_FALSE
    }
}

/// Find a condition by type.
#[must_use]
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Returns true if the condition of `condition_type` is present with status `True`.
#[must_use]
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    find_condition(conditions, condition_type).is_some_and(|c| c.status == STATUS_TRUE)
}

/// Merge freshly evaluated conditions with the previously stored set.
///
/// For each fresh condition:
/// - without a prior entry of the same type, the transition time is `now`
/// - with a prior entry of a different status, the transition time is `now`
/// - with a prior entry of the same status, the prior transition time is kept;
///   if the fresh entry has no message, the prior reason and message are kept too
///
/// The result contains exactly the types present in `fresh`, in that order,
/// one entry per type (the first fresh entry of a type wins).
#[must_use]
pub fn merge_conditions(
    fresh: Vec<Condition>,
    previous: &[Condition],
    now: DateTime<Utc>,
) -> Vec<Condition> {
    let now = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut merged: Vec<Condition> = Vec::with_capacity(fresh.len());

    for mut condition in fresh {
        if merged.iter().any(|c| c.r#type == condition.r#type) {
            continue;
        }

        match find_condition(previous, &condition.r#type) {
            Some(prior) if prior.status == condition.status => {
                condition.last_transition_time = prior
                    .last_transition_time
                    .clone()
                    .or_else(|| Some(now.clone()));
                if condition.message.is_none() {
                    condition.message.clone_from(&prior.message);
                    condition.reason.clone_from(&prior.reason);
                }
            }
            _ => condition.last_transition_time = Some(now.clone()),
        }

        merged.push(condition);
    }

    merged
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
