//! DR decision procedure
//!
//! The takeover logic is a pure function of the previous in-memory state,
//! the current health verdict, and the current backend read, so it can be
//! tested against transcripts of inputs; the loop driver in the parent
//! module is trivial.
//!
//! Two guards compose before any takeover write: the health oracle must
//! have failed for `fail_threshold` consecutive iterations, AND the
//! observed lease must be expired (or absent). A failed lease read fails
//! closed: no takeover on missing information.

use crate::health::HealthStatus;
use crate::lease::{Lease, Owner};

/// Role-local DR phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DrPhase {
    #[default]
    Standby,
    /// This site performed a takeover (or found its own live lease) and
    /// now renews like a primary.
    Active,
}

/// In-memory DR coordinator state; owned by the single loop.
#[derive(Clone, Copy, Debug, Default)]
pub struct DrState {
    pub phase: DrPhase,
    pub failure_streak: u32,
}

/// Result of reading the coordinating records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaseView {
    /// The backend read failed; nothing is known about the lease.
    Unreadable,
    /// No TXT record (or one too malformed to trust, which the reader
    /// logs and downgrades to absent).
    Absent,
    Held(Lease),
}

/// What the loop should do this iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Healthy standby; sleep.
    Idle,
    /// Re-assert this site's own lease.
    Renew,
    /// Write A and TXT to claim this site as active.
    TakeOver,
    /// Another site holds a live lease; revert to standby without writes.
    StandDown,
    /// Keep waiting without touching DNS.
    Wait(WaitReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitReason {
    /// Failure streak has not reached the threshold yet.
    BelowThreshold,
    /// The observed lease is still valid; waiting for expiry.
    LeaseValid,
    /// The lease could not be read; holding position.
    LeaseUnreadable,
}

/// Whether this iteration needs a lease read before deciding. Reads happen
/// when the failure streak is about to reach the threshold, and on every
/// iteration while active (both renewal and failback observation depend on
/// the current owner).
pub fn wants_lease_read(state: &DrState, fail_threshold: u32, health: HealthStatus) -> bool {
    if state.phase == DrPhase::Active {
        return true;
    }
    health != HealthStatus::Healthy && state.failure_streak + 1 >= fail_threshold
}

/// One decision step. Mutates `state` (streak bookkeeping, re-discovered
/// ownership) and returns the action; the caller flips the phase to
/// `Active` only after a takeover write actually succeeds.
pub fn evaluate(
    state: &mut DrState,
    fail_threshold: u32,
    self_owner: Owner,
    now: u64,
    health: HealthStatus,
    lease: Option<&LeaseView>,
) -> Action {
    if health == HealthStatus::Healthy {
        state.failure_streak = 0;
        return match state.phase {
            DrPhase::Standby => Action::Idle,
            DrPhase::Active => active_action(state, self_owner, now, lease),
        };
    }

    // Unhealthy and Unknown verdicts both count against the streak.
    state.failure_streak += 1;

    if state.failure_streak < fail_threshold {
        // An active holder still watches for an operator failback on every
        // iteration, threshold or not.
        if state.phase == DrPhase::Active {
            if let Some(LeaseView::Held(held)) = lease {
                if held.owner != self_owner && !held.is_expired(now) {
                    return stand_down(state);
                }
            }
        }
        return Action::Wait(WaitReason::BelowThreshold);
    }

    match lease {
        None | Some(LeaseView::Unreadable) => Action::Wait(WaitReason::LeaseUnreadable),
        Some(LeaseView::Held(held)) if held.owner == self_owner => {
            // Already the owner on record (e.g. after a restart mid-failover).
            state.failure_streak = 0;
            state.phase = DrPhase::Active;
            Action::Idle
        }
        Some(LeaseView::Held(held)) if !held.is_expired(now) => {
            if state.phase == DrPhase::Active {
                stand_down(state)
            } else {
                Action::Wait(WaitReason::LeaseValid)
            }
        }
        // Expired foreign lease, or no lease at all.
        Some(_) => Action::TakeOver,
    }
}

/// Healthy-and-active path: renew while still the owner on record, stand
/// down the moment another site's live lease appears.
fn active_action(
    state: &mut DrState,
    self_owner: Owner,
    now: u64,
    lease: Option<&LeaseView>,
) -> Action {
    match lease {
        None | Some(LeaseView::Unreadable) => Action::Wait(WaitReason::LeaseUnreadable),
        Some(LeaseView::Held(held)) if held.owner == self_owner => Action::Renew,
        Some(LeaseView::Held(held)) if !held.is_expired(now) => stand_down(state),
        // Our own lease evaporated (or a foreign one expired under us);
        // reassert this site while it is still the designated active one.
        Some(_) => Action::Renew,
    }
}

fn stand_down(state: &mut DrState) -> Action {
    state.phase = DrPhase::Standby;
    state.failure_streak = 0;
    Action::StandDown
}
