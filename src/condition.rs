//! Tracks subscription conditions.
//!
//! A condition type appears at most once in the list. Merging a condition
//! that is already satisfied leaves the list untouched, so reconciling an
//! unchanged subscription never produces a status write.

use crate::clock::Clock;
use crate::types::{Condition, ConditionStatus, ConditionType, Subscription};

/// Returns true if `subscription` already has a condition with the type and
/// status of `candidate`. Reason, message and timestamp are ignored.
pub fn has_condition(subscription: &Subscription, candidate: &Condition) -> bool {
    subscription
        .status
        .conditions
        .iter()
        .any(|cond| cond.type_ == candidate.type_ && cond.status == candidate.status)
}

/// Merges `candidate` into the condition list of `subscription`.
///
/// Returns whether the list changed.
pub fn merge_condition(
    subscription: &mut Subscription,
    mut candidate: Condition,
    clock: &dyn Clock,
) -> bool {
    if has_condition(subscription, &candidate) {
        return false;
    }
    candidate.last_transition_time = Some(clock.now());

    let conditions = &mut subscription.status.conditions;
    match conditions
        .iter_mut()
        .find(|cond| cond.type_ == candidate.type_)
    {
        Some(existing) => *existing = candidate,
        None => conditions.push(candidate),
    }
    true
}

pub fn status_of(subscription: &Subscription, type_: ConditionType) -> Option<ConditionStatus> {
    subscription
        .status
        .conditions
        .iter()
        .find(|cond| cond.type_ == type_)
        .map(|cond| cond.status)
}

pub fn is_true(subscription: &Subscription, type_: ConditionType) -> bool {
    status_of(subscription, type_) == Some(ConditionStatus::True)
}

/// Brings `Ready` in line with `EventsActivated` and `BindingReady`.
///
/// Returns whether the list changed.
pub fn sync_ready(subscription: &mut Subscription, clock: &dyn Clock) -> bool {
    let ready = is_true(subscription, ConditionType::EventsActivated)
        && is_true(subscription, ConditionType::BindingReady);
    merge_condition(
        subscription,
        Condition::new(ConditionType::Ready, ready),
        clock,
    )
}
