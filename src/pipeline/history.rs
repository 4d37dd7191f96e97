//! Per-trip last-seen state
//!
//! Holds one `TripState` per trip id. Entries are written only after a record
//! passes validation and are never rolled back.
//!
//! Memory is bounded two ways:
//! - service-day eviction: once at least `SERVICE_DAY_QUORUM` live trips sit on
//!   a newer service date, trips whose last service date is more than
//!   `SERVICE_DAY_SLACK` older than it are dropped
//! - LRU cap: beyond `max_trips`, the least recently updated trip is dropped
//!
//! A lone record with a bogus far-future date never reaches the quorum, so it
//! cannot sweep away the history of every other trip.

use super::types::TripState;
use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, HashMap};

/// Trips can run past midnight, so the previous service day stays live
pub const SERVICE_DAY_SLACK: Duration = Duration::days(1);

/// Distinct live trips a service day needs before it drives eviction
pub const SERVICE_DAY_QUORUM: usize = 3;

pub const DEFAULT_MAX_TRIPS: usize = 200_000;

#[derive(Debug, Clone)]
struct Entry {
    state: TripState,
    /// Position in `recency`
    touched: u64,
}

#[derive(Debug, Clone)]
pub struct TripHistory {
    trips: HashMap<i64, Entry>,
    /// touched counter -> trip id, oldest first
    recency: BTreeMap<u64, i64>,
    /// service date -> live trips whose last state is on that date
    days: BTreeMap<NaiveDate, usize>,
    clock: u64,
    max_trips: usize,
    /// Newest service date that reached the quorum
    current_day: Option<NaiveDate>,
    evicted: u64,
}

impl Default for TripHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRIPS)
    }
}

impl TripHistory {
    pub fn new(max_trips: usize) -> Self {
        Self {
            trips: HashMap::new(),
            recency: BTreeMap::new(),
            days: BTreeMap::new(),
            clock: 0,
            max_trips: max_trips.max(1),
            current_day: None,
            evicted: 0,
        }
    }

    pub fn get(&self, trip_id: i64) -> Option<&TripState> {
        self.trips.get(&trip_id).map(|e| &e.state)
    }

    /// Overwrite the state for `trip_id`
    ///
    /// Call only after the record passed validation.
    pub fn update(&mut self, trip_id: i64, state: TripState) {
        self.clock += 1;
        let touched = self.clock;

        if let Some(old) = self.trips.insert(trip_id, Entry { state, touched }) {
            self.recency.remove(&old.touched);
            self.release_day(old.state.service_date);
        }
        self.recency.insert(touched, trip_id);
        *self.days.entry(state.service_date).or_insert(0) += 1;

        let live_on_day = self.days.get(&state.service_date).copied().unwrap_or(0);
        let is_newer = self.current_day.map_or(true, |d| state.service_date > d);
        if live_on_day >= SERVICE_DAY_QUORUM && is_newer {
            self.current_day = Some(state.service_date);
            self.evict_stale();
        }

        while self.trips.len() > self.max_trips {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            if let Some(entry) = self.trips.remove(&oldest) {
                self.release_day(entry.state.service_date);
            }
            self.evicted += 1;
        }
    }

    /// Drop trips whose service day is older than the current day minus the slack
    ///
    /// The current day is the newest service date held by at least
    /// `SERVICE_DAY_QUORUM` live trips. Returns the number of trips evicted.
    pub fn evict_stale(&mut self) -> usize {
        let Some(current) = self.current_day else {
            return 0;
        };
        let cutoff = current - SERVICE_DAY_SLACK;

        let before = self.trips.len();
        let recency = &mut self.recency;
        self.trips.retain(|_, entry| {
            let keep = entry.state.service_date >= cutoff;
            if !keep {
                recency.remove(&entry.touched);
            }
            keep
        });
        self.days = self.days.split_off(&cutoff);

        let removed = before - self.trips.len();
        if removed > 0 {
            log::debug!("🧹 Evicted {} trips older than {}", removed, cutoff);
        }
        self.evicted += removed as u64;
        removed
    }

    fn release_day(&mut self, date: NaiveDate) {
        if let Some(count) = self.days.get_mut(&date) {
            *count -= 1;
            if *count == 0 {
                self.days.remove(&date);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.trips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }

    /// Total trips dropped by either eviction policy
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 2, d).unwrap()
    }

    fn state(d: u32, act_time: i64) -> TripState {
        TripState {
            service_date: day(d),
            act_time,
            meters: act_time as f64 * 5.0,
        }
    }

    #[test]
    fn test_get_and_overwrite() {
        let mut history = TripHistory::default();
        assert!(history.get(1).is_none());

        history.update(1, state(15, 10));
        history.update(1, state(15, 20));

        assert_eq!(history.len(), 1);
        assert_eq!(history.get(1).unwrap().act_time, 20);
    }

    #[test]
    fn test_lru_bound() {
        let mut history = TripHistory::new(2);
        history.update(1, state(15, 10));
        history.update(2, state(15, 10));
        // touch trip 1 so trip 2 is the oldest
        history.update(1, state(15, 20));
        history.update(3, state(15, 10));

        assert_eq!(history.len(), 2);
        assert!(history.get(1).is_some());
        assert!(history.get(2).is_none());
        assert!(history.get(3).is_some());
        assert_eq!(history.evicted(), 1);
    }

    #[test]
    fn test_service_day_eviction_keeps_previous_day() {
        let mut history = TripHistory::default();
        history.update(1, state(13, 10));
        history.update(2, state(14, 10));
        history.update(3, state(15, 10));
        history.update(4, state(15, 10));
        assert_eq!(history.len(), 4);

        // third trip on day 15 makes it the current day
        history.update(5, state(15, 10));

        // day 13 is two days older than day 15
        assert!(history.get(1).is_none());
        assert!(history.get(2).is_some());
        assert!(history.get(5).is_some());
        assert_eq!(history.evicted(), 1);
    }

    #[test]
    fn test_outlier_date_does_not_evict_other_trips() {
        let mut history = TripHistory::default();
        for trip in 1..=5 {
            history.update(trip, state(15, 10));
        }
        let far_future = TripState {
            service_date: NaiveDate::from_ymd_opt(2099, 2, 15).unwrap(),
            act_time: 10,
            meters: 10.0,
        };
        history.update(99, far_future);

        assert_eq!(history.evict_stale(), 0);
        assert_eq!(history.len(), 6);
        assert_eq!(history.get(1).unwrap().act_time, 10);
    }

    #[test]
    fn test_lru_eviction_releases_day_count() {
        let mut history = TripHistory::new(3);
        history.update(1, state(16, 10));
        history.update(2, state(16, 10));
        history.update(3, state(14, 10));
        history.update(4, state(14, 10));
        history.update(5, state(14, 10));
        // trips 1 and 2 were pushed out by the LRU cap, so this is the only
        // live trip on day 16 and it must not evict day 14
        history.update(6, state(16, 10));

        assert!(history.get(4).is_some());
        assert!(history.get(5).is_some());
        assert!(history.get(6).is_some());
        assert_eq!(history.evict_stale(), 0);
    }

    #[test]
    fn test_late_record_for_old_day_does_not_evict_new_trips() {
        let mut history = TripHistory::default();
        history.update(1, state(15, 10));
        history.update(2, state(14, 10));

        assert_eq!(history.len(), 2);
        assert_eq!(history.evict_stale(), 0);
    }
}
