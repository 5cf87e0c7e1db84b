use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::{ActivityEvent, Period};

/// Distinct UTC calendar days inside `period` on which `user_id` touched `course_id`.
pub fn active_days(
    events: &[ActivityEvent],
    user_id: Uuid,
    course_id: Uuid,
    period: &Period,
) -> BTreeSet<NaiveDate> {
    events
        .iter()
        .filter(|event| event.user_id == user_id && event.course_id == course_id)
        .map(|event| event.occurred_at.date_naive())
        .filter(|day| period.contains(*day))
        .collect()
}

pub fn count_active_days(
    events: &[ActivityEvent],
    user_id: Uuid,
    course_id: Uuid,
    period: &Period,
) -> usize {
    active_days(events, user_id, course_id, period).len()
}

/// Active-day counts for every user seen in `events`. The events are expected
/// to belong to one course.
pub fn active_days_by_user(events: &[ActivityEvent], period: &Period) -> HashMap<Uuid, usize> {
    let mut days: HashMap<Uuid, HashSet<NaiveDate>> = HashMap::new();

    for event in events {
        let day = event.occurred_at.date_naive();
        if !period.contains(day) {
            continue;
        }
        days.entry(event.user_id).or_default().insert(day);
    }

    days.into_iter()
        .map(|(user_id, set)| (user_id, set.len()))
        .collect()
}

pub fn events_by_source(events: &[ActivityEvent]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for event in events {
        *counts.entry(event.source.as_str()).or_insert(0) += 1;
    }
    counts
}

pub fn is_active(active_days: usize, threshold: usize) -> bool {
    active_days >= threshold
}
