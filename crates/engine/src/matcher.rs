//! Timeslot matcher: selects the timeslots a subscriber cares about.
//!
//! For each subscriber:
//! 1. Keep timeslots at stores the subscriber watches
//! 2. Keep timeslots inside the subscriber's criterion window
//! 3. Order the survivors by opening time, earliest first

use chrono::{NaiveDate, NaiveDateTime};

use curbside_common::types::{Criterion, Subscriber, Timeslot};

/// Largest calendar-day distance from today accepted by `SOON`.
pub const SOON_WINDOW_DAYS: i64 = 3;

/// Matches scanned timeslots against subscriber preferences.
pub struct TimeslotMatcher;

impl TimeslotMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Return the timeslots matching `subscriber`, sorted by date then `from`.
    ///
    /// `now` is the local wall-clock time the criterion window is measured
    /// from. An empty result means the subscriber should not be notified.
    pub fn match_timeslots(
        &self,
        subscriber: &Subscriber,
        timeslots: &[Timeslot],
        now: NaiveDateTime,
    ) -> Vec<Timeslot> {
        let today = now.date();

        let mut matched: Vec<Timeslot> = timeslots
            .iter()
            .filter(|slot| subscriber.is_subscribed_to(slot.store_id))
            .filter(|slot| Self::within_criterion(&subscriber.criteria, slot.date, today))
            .cloned()
            .collect();

        matched.sort_by_key(Timeslot::starts_at);
        matched
    }

    /// Whether a slot on `date` satisfies `criterion` when today is `today`.
    ///
    /// Unrecognized criteria never match. `SOON` counts whole calendar days,
    /// not elapsed time, so a slot four days out never matches at any hour.
    pub fn within_criterion(criterion: &Criterion, date: NaiveDate, today: NaiveDate) -> bool {
        match criterion {
            Criterion::Anytime => true,
            Criterion::Soon => (date - today).num_days().abs() <= SOON_WINDOW_DAYS,
            Criterion::Today => date == today,
            Criterion::Unrecognized(_) => false,
        }
    }
}

impl Default for TimeslotMatcher {
    fn default() -> Self {
        Self::new()
    }
}
