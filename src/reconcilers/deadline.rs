// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Requeue deadline accumulated over one reconciliation pass.
//!
//! Several steps of a pass may each ask to be retried "no earlier than T"
//! (verification cooldown, pending certificate, pending release). The most
//! urgent request governs the requeue delay of the whole pass.

use crate::constants::{DEADLINE_EPSILON, MAX_REQUEUE_DELAY};
use chrono::{DateTime, TimeDelta, Utc};
use kube::runtime::controller::Action;
use std::time::Duration;

/// Earliest instant at which the object should be reconciled again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<DateTime<Utc>>,
}

impl Deadline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a retry at `t`; the soonest request wins.
    pub fn request(&mut self, t: DateTime<Utc>) {
        if self.at.is_none_or(|held| t < held) {
            self.at = Some(t);
        }
    }

    /// Request a retry `delay` after `now`, saturating at the latest
    /// representable instant.
    pub fn request_after(&mut self, now: DateTime<Utc>, delay: TimeDelta) {
        self.request(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC));
    }

    /// The held instant, if any.
    #[must_use]
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        self.at
    }

    /// Delay from `now` until the held instant.
    ///
    /// Returns `None` if nothing was requested. A deadline that already passed
    /// yields [`DEADLINE_EPSILON`] so that a retry is still scheduled; one
    /// further away than [`MAX_REQUEUE_DELAY`] is capped to it.
    #[must_use]
    pub fn effective_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        let at = self.at?;
        let delay = at
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO);
        Some(delay.clamp(DEADLINE_EPSILON, MAX_REQUEUE_DELAY))
    }

    /// Convert into a controller action: timed requeue, or wait for the next watch event.
    #[must_use]
    pub fn into_action(self, now: DateTime<Utc>) -> Action {
        match self.effective_delay(now) {
            Some(delay) => Action::requeue(delay),
            None => Action::await_change(),
        }
    }
}

#[cfg(test)]
#[path = "deadline_tests.rs"]
mod deadline_tests;
