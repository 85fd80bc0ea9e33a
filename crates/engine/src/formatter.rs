//! Renders matched timeslots into the SMS sent to a subscriber.

use std::collections::HashMap;

use chrono::NaiveTime;
use uuid::Uuid;

use curbside_common::geo::DistanceCalculator;
use curbside_common::types::{Chain, Store, Subscriber, Timeslot};

/// Most timeslots rendered into a single message.
pub const MAX_TIMESLOTS_PER_MESSAGE: usize = 5;

const PREAMBLE: &str = "Great news! Curbside pickup slots are available.";
const OPT_OUT: &str = "We will stop notifying you now unless you reply with CONTINUE.";

/// Formats notifications for one chain's scan.
pub struct NotificationFormatter<'a> {
    chain: &'a Chain,
    stores: &'a HashMap<Uuid, Store>,
    distance: &'a dyn DistanceCalculator,
    preferences_url: &'a str,
}

impl<'a> NotificationFormatter<'a> {
    pub fn new(
        chain: &'a Chain,
        stores: &'a HashMap<Uuid, Store>,
        distance: &'a dyn DistanceCalculator,
        preferences_url: &'a str,
    ) -> Self {
        Self {
            chain,
            stores,
            distance,
            preferences_url,
        }
    }

    /// Build the message for an already ordered list of matched timeslots.
    ///
    /// Only the first `MAX_TIMESLOTS_PER_MESSAGE` slots are rendered.
    pub fn format(&self, subscriber: &Subscriber, timeslots: &[Timeslot]) -> String {
        let blocks: Vec<String> = timeslots
            .iter()
            .take(MAX_TIMESLOTS_PER_MESSAGE)
            .filter_map(|slot| self.format_slot(subscriber, slot))
            .collect();

        [
            PREAMBLE.to_string(),
            blocks.join("\n"),
            OPT_OUT.to_string(),
            format!(
                "Want to change your search criteria? Just head to {}",
                self.preferences_url
            ),
        ]
        .join("\n")
    }

    fn format_slot(&self, subscriber: &Subscriber, slot: &Timeslot) -> Option<String> {
        let Some(store) = self.stores.get(&slot.store_id) else {
            tracing::warn!(
                store_id = %slot.store_id,
                chain = %self.chain.slug,
                "Timeslot references a store outside this scan, skipping"
            );
            return None;
        };

        let miles = self.distance.miles_between(subscriber, store).round() as i64;

        Some(format!(
            "{} {} (~{} {} away)\n{} {} - {}\n",
            self.chain.name,
            store.name,
            miles,
            if miles == 1 { "mile" } else { "miles" },
            slot.date.format("%A, %b %-d"),
            format_time(slot.from),
            format_time(slot.to),
        ))
    }
}

/// 12-hour clock without a leading zero, e.g. `9:00 am`.
fn format_time(time: NaiveTime) -> String {
    time.format("%-I:%M %P").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, Utc};
    use curbside_common::types::{Criterion, SubscriberStatus};

    /// Reports a fixed distance regardless of coordinates.
    struct FixedDistance(f64);

    impl DistanceCalculator for FixedDistance {
        fn miles_between(&self, _subscriber: &Subscriber, _store: &Store) -> f64 {
            self.0
        }
    }

    fn chain() -> Chain {
        Chain {
            id: Uuid::new_v4(),
            name: "Giant".to_string(),
            slug: "giant".to_string(),
        }
    }

    fn store(chain: &Chain, name: &str) -> Store {
        Store {
            id: Uuid::new_v4(),
            chain_id: chain.id,
            name: name.to_string(),
            external_id: "6001".to_string(),
            latitude: 40.0,
            longitude: -76.0,
        }
    }

    fn subscriber() -> Subscriber {
        Subscriber {
            id: Uuid::new_v4(),
            phone: "+15551234567".to_string(),
            status: SubscriberStatus::Active,
            criteria: Criterion::Anytime,
            latitude: 40.0,
            longitude: -76.0,
            store_ids: vec![],
            created_at: Utc::now(),
        }
    }

    fn slot(store: &Store, date: NaiveDate, from: (u32, u32), to: (u32, u32)) -> Timeslot {
        Timeslot {
            store_id: store.id,
            date,
            from: NaiveTime::from_hms_opt(from.0, from.1, 0).unwrap(),
            to: NaiveTime::from_hms_opt(to.0, to.1, 0).unwrap(),
        }
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    #[test]
    fn test_full_message_layout() {
        let chain = chain();
        let hershey = store(&chain, "Hershey");
        let stores = HashMap::from([(hershey.id, hershey.clone())]);
        let distance = FixedDistance(4.4);
        let formatter = NotificationFormatter::new(&chain, &stores, &distance, "https://curb.run");

        let message = formatter.format(
            &subscriber(),
            &[
                slot(&hershey, monday(), (9, 0), (10, 0)),
                slot(&hershey, monday() + Duration::days(1), (13, 30), (14, 30)),
            ],
        );

        let expected = "Great news! Curbside pickup slots are available.\n\
            Giant Hershey (~4 miles away)\n\
            Monday, Oct 19 9:00 am - 10:00 am\n\
            \n\
            Giant Hershey (~4 miles away)\n\
            Tuesday, Oct 20 1:30 pm - 2:30 pm\n\
            \n\
            We will stop notifying you now unless you reply with CONTINUE.\n\
            Want to change your search criteria? Just head to https://curb.run";
        assert_eq!(message, expected);
    }

    #[test]
    fn test_singular_mile() {
        let chain = chain();
        let store = store(&chain, "Camp Hill");
        let stores = HashMap::from([(store.id, store.clone())]);
        let distance = FixedDistance(1.2);
        let formatter = NotificationFormatter::new(&chain, &stores, &distance, "https://curb.run");

        let message = formatter.format(&subscriber(), &[slot(&store, monday(), (9, 0), (9, 30))]);
        assert!(message.contains("(~1 mile away)"));
    }

    #[test]
    fn test_zero_and_rounded_up_distances_are_plural() {
        let chain = chain();
        let store = store(&chain, "Camp Hill");
        let stores = HashMap::from([(store.id, store.clone())]);
        let slots = [slot(&store, monday(), (9, 0), (9, 30))];

        let near = FixedDistance(0.3);
        let message =
            NotificationFormatter::new(&chain, &stores, &near, "x").format(&subscriber(), &slots);
        assert!(message.contains("(~0 miles away)"));

        let halfway = FixedDistance(1.5);
        let message =
            NotificationFormatter::new(&chain, &stores, &halfway, "x").format(&subscriber(), &slots);
        assert!(message.contains("(~2 miles away)"));
    }

    #[test]
    fn test_noon_and_midnight_times() {
        let chain = chain();
        let store = store(&chain, "Camp Hill");
        let stores = HashMap::from([(store.id, store.clone())]);
        let distance = FixedDistance(2.0);
        let formatter = NotificationFormatter::new(&chain, &stores, &distance, "x");

        let message =
            formatter.format(&subscriber(), &[slot(&store, monday(), (12, 0), (23, 59))]);
        assert!(message.contains("12:00 pm - 11:59 pm"));
    }

    #[test]
    fn test_caps_at_five_blocks() {
        let chain = chain();
        let store = store(&chain, "Hershey");
        let stores = HashMap::from([(store.id, store.clone())]);
        let distance = FixedDistance(3.0);
        let formatter = NotificationFormatter::new(&chain, &stores, &distance, "x");

        let slots: Vec<Timeslot> = (0..20)
            .map(|i| slot(&store, monday() + Duration::days(i), (9, 0), (10, 0)))
            .collect();

        let message = formatter.format(&subscriber(), &slots);
        assert_eq!(message.matches("Giant Hershey").count(), MAX_TIMESLOTS_PER_MESSAGE);
        assert!(message.contains("Friday, Oct 23"));
        assert!(!message.contains("Saturday, Oct 24"));
    }

    #[test]
    fn test_unknown_store_is_skipped() {
        let chain = chain();
        let known = store(&chain, "Hershey");
        let unknown = store(&chain, "Elsewhere");
        let stores = HashMap::from([(known.id, known.clone())]);
        let distance = FixedDistance(3.0);
        let formatter = NotificationFormatter::new(&chain, &stores, &distance, "x");

        let message = formatter.format(
            &subscriber(),
            &[
                slot(&unknown, monday(), (8, 0), (9, 0)),
                slot(&known, monday(), (9, 0), (10, 0)),
            ],
        );
        assert!(message.contains("Giant Hershey"));
        assert!(!message.contains("Elsewhere"));
    }
}
