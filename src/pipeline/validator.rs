//! Breadcrumb validation - ten rules, fail-fast
//!
//! Rules run in a fixed order and stop at the first failure. Each rule returns
//! `Result<(), Rejection>` so the sequence composes with `?`; a rejection is a
//! data-quality outcome, never a program fault.
//!
//! ```text
//! 1 Completeness -> 2 TimeOfDay -> 3 Coordinates -> 4 Satellites
//!   -> 5 HdopPositive -> 6 DistanceTime -> 7 HdopUpperBound
//!   -> 8 ServiceDay* -> 9 MonotonicTime* -> 10 SpeedBound*
//!                                     (* needs the trip's prior state)
//! ```
//!
//! Validation is pure: it never touches `TripHistory`. The caller updates
//! history only after an `Accepted` verdict.

use super::types::{RawBreadcrumb, TripState};
use chrono::NaiveDate;

/// Last valid second of a service day
pub const MAX_ACT_TIME: i64 = 86_399;
pub const MIN_SATELLITES: f64 = 4.0;
pub const MAX_SATELLITES: f64 = 20.0;
pub const MAX_HDOP: f64 = 10.0;
pub const DEFAULT_MAX_SPEED_MPS: f64 = 35.0;

/// Rule identifiers, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rule {
    Completeness,
    TimeOfDay,
    Coordinates,
    Satellites,
    HdopPositive,
    DistanceTime,
    HdopUpperBound,
    ServiceDay,
    MonotonicTime,
    SpeedBound,
}

impl Rule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::Completeness => "completeness",
            Rule::TimeOfDay => "time_of_day",
            Rule::Coordinates => "coordinates",
            Rule::Satellites => "satellites",
            Rule::HdopPositive => "hdop_positive",
            Rule::DistanceTime => "distance_time",
            Rule::HdopUpperBound => "hdop_upper_bound",
            Rule::ServiceDay => "service_day",
            Rule::MonotonicTime => "monotonic_time",
            Rule::SpeedBound => "speed_bound",
        }
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a record was dropped
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub rule: Rule,
    pub reason: String,
}

impl Rejection {
    fn new(rule: Rule, reason: impl Into<String>) -> Self {
        Self {
            rule,
            reason: reason.into(),
        }
    }
}

/// Outcome of validating one record
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted(AcceptedRecord),
    Rejected(Rejection),
}

/// Fields of a record that passed every rule, unwrapped from their options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptedRecord {
    pub vehicle_id: i64,
    pub trip_id: i64,
    pub stop_id: i64,
    pub service_date: NaiveDate,
    pub act_time: i64,
    pub meters: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Derived by rule 10
    pub speed: f64,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }

    /// Human-readable rejection reason, `None` when accepted
    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Accepted(_) => None,
            Verdict::Rejected(r) => Some(&r.reason),
        }
    }

    /// Rule that rejected the record, `None` when accepted
    pub fn rule(&self) -> Option<Rule> {
        match self {
            Verdict::Accepted(_) => None,
            Verdict::Rejected(r) => Some(r.rule),
        }
    }

    /// Derived speed; zero for rejected records
    pub fn speed(&self) -> f64 {
        match self {
            Verdict::Accepted(a) => a.speed,
            Verdict::Rejected(_) => 0.0,
        }
    }
}

/// Service-area bounding box, inclusive on all edges
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            min_lat: 45.0,
            max_lat: 46.0,
            min_lon: -123.5,
            max_lon: -122.0,
        }
    }
}

impl BoundingBox {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

/// Tunable thresholds for the validator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationConfig {
    pub max_speed_mps: f64,
    pub bbox: BoundingBox,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_speed_mps: DEFAULT_MAX_SPEED_MPS,
            bbox: BoundingBox::default(),
        }
    }
}

/// Stateless rule set; per-trip state is passed in by the caller
#[derive(Debug, Clone, Default)]
pub struct RecordValidator {
    config: ValidationConfig,
}

type Check = Result<(), Rejection>;

impl RecordValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Run all ten rules against `raw`, given the trip's last accepted state
    pub fn validate(&self, raw: &RawBreadcrumb, prior: Option<&TripState>) -> Verdict {
        match self.run_rules(raw, prior) {
            Ok(accepted) => Verdict::Accepted(accepted),
            Err(rejection) => Verdict::Rejected(rejection),
        }
    }

    fn run_rules(
        &self,
        raw: &RawBreadcrumb,
        prior: Option<&TripState>,
    ) -> Result<AcceptedRecord, Rejection> {
        let mut record = check_completeness(raw)?;
        check_time_of_day(&record)?;
        self.check_coordinates(&record)?;
        check_satellites(raw.satellites)?;
        check_hdop_positive(raw.hdop)?;
        check_distance_time(&record)?;
        check_hdop_upper_bound(raw.hdop)?;
        check_service_day(&record, prior)?;
        check_monotonic_time(&record, prior)?;
        record.speed = self.check_speed(&record, prior)?;
        Ok(record)
    }

    fn check_coordinates(&self, record: &AcceptedRecord) -> Check {
        if self.config.bbox.contains(record.latitude, record.longitude) {
            Ok(())
        } else {
            Err(Rejection::new(
                Rule::Coordinates,
                format!(
                    "coordinates ({}, {}) outside service area",
                    record.latitude, record.longitude
                ),
            ))
        }
    }

    fn check_speed(
        &self,
        record: &AcceptedRecord,
        prior: Option<&TripState>,
    ) -> Result<f64, Rejection> {
        let speed = derive_speed(record.act_time, record.meters, prior);

        if speed < 0.0 || speed > self.config.max_speed_mps {
            return Err(Rejection::new(
                Rule::SpeedBound,
                format!(
                    "speed {:.2} m/s outside [0, {}]",
                    speed, self.config.max_speed_mps
                ),
            ));
        }
        Ok(speed)
    }
}

/// Speed between the prior sample and this one; zero without a prior or a time delta
pub fn derive_speed(act_time: i64, meters: f64, prior: Option<&TripState>) -> f64 {
    match prior {
        Some(prev) if act_time != prev.act_time => {
            (meters - prev.meters) / (act_time - prev.act_time) as f64
        }
        _ => 0.0,
    }
}

fn check_completeness(raw: &RawBreadcrumb) -> Result<AcceptedRecord, Rejection> {
    let fields = (
        raw.vehicle_id,
        raw.trip_id,
        raw.stop_id,
        raw.service_date,
        raw.act_time,
        raw.meters,
        raw.latitude,
        raw.longitude,
    );

    match fields {
        (
            Some(vehicle_id),
            Some(trip_id),
            Some(stop_id),
            Some(service_date),
            Some(act_time),
            Some(meters),
            Some(latitude),
            Some(longitude),
        ) => Ok(AcceptedRecord {
            vehicle_id,
            trip_id,
            stop_id,
            service_date,
            act_time,
            meters,
            latitude,
            longitude,
            speed: 0.0,
        }),
        _ => Err(Rejection::new(Rule::Completeness, "missing field(s)")),
    }
}

fn check_time_of_day(record: &AcceptedRecord) -> Check {
    if (0..=MAX_ACT_TIME).contains(&record.act_time) {
        Ok(())
    } else {
        Err(Rejection::new(
            Rule::TimeOfDay,
            format!("ACT_TIME {} outside [0, {}]", record.act_time, MAX_ACT_TIME),
        ))
    }
}

fn check_satellites(satellites: Option<f64>) -> Check {
    match satellites {
        Some(sat) if !(MIN_SATELLITES..=MAX_SATELLITES).contains(&sat) => Err(Rejection::new(
            Rule::Satellites,
            format!("GPS_SATELLITES {} outside [{}, {}]", sat, MIN_SATELLITES, MAX_SATELLITES),
        )),
        _ => Ok(()),
    }
}

fn check_hdop_positive(hdop: Option<f64>) -> Check {
    match hdop {
        Some(h) if !(h > 0.0) => Err(Rejection::new(
            Rule::HdopPositive,
            format!("GPS_HDOP {} is not positive", h),
        )),
        _ => Ok(()),
    }
}

fn check_distance_time(record: &AcceptedRecord) -> Check {
    if record.meters == 0.0 && record.act_time > 0 {
        Err(Rejection::new(
            Rule::DistanceTime,
            format!("METERS=0 yet ACT_TIME={}", record.act_time),
        ))
    } else {
        Ok(())
    }
}

fn check_hdop_upper_bound(hdop: Option<f64>) -> Check {
    match hdop {
        Some(h) if h > MAX_HDOP => Err(Rejection::new(
            Rule::HdopUpperBound,
            format!("GPS_HDOP {} above {}", h, MAX_HDOP),
        )),
        _ => Ok(()),
    }
}

fn check_service_day(record: &AcceptedRecord, prior: Option<&TripState>) -> Check {
    match prior {
        Some(prev) if prev.service_date != record.service_date => Err(Rejection::new(
            Rule::ServiceDay,
            format!(
                "service day changed mid-trip ({} -> {})",
                prev.service_date, record.service_date
            ),
        )),
        _ => Ok(()),
    }
}

fn check_monotonic_time(record: &AcceptedRecord, prior: Option<&TripState>) -> Check {
    match prior {
        Some(prev) if record.act_time < prev.act_time => Err(Rejection::new(
            Rule::MonotonicTime,
            format!("time moved back ({} -> {})", prev.act_time, record.act_time),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 2, 15).unwrap()
    }

    fn crumb(trip: i64, act_time: i64, meters: f64) -> RawBreadcrumb {
        RawBreadcrumb {
            vehicle_id: Some(3909),
            trip_id: Some(trip),
            stop_id: Some(1),
            service_date: Some(date()),
            act_time: Some(act_time),
            meters: Some(meters),
            latitude: Some(45.5),
            longitude: Some(-122.6),
            satellites: Some(12.0),
            hdop: Some(0.9),
        }
    }

    fn state(act_time: i64, meters: f64) -> TripState {
        TripState {
            service_date: date(),
            act_time,
            meters,
        }
    }

    #[test]
    fn test_first_record_accepted_with_zero_speed() {
        let validator = RecordValidator::default();
        let verdict = validator.validate(&crumb(1, 0, 0.0), None);

        assert!(verdict.is_accepted());
        assert_eq!(verdict.reason(), None);
        assert_eq!(verdict.speed(), 0.0);
    }

    #[test]
    fn test_missing_field_short_circuits() {
        let validator = RecordValidator::default();

        // Every other field is also invalid; only completeness may fire
        let raw = RawBreadcrumb {
            vehicle_id: Some(1),
            trip_id: Some(1),
            stop_id: None,
            service_date: Some(date()),
            act_time: Some(-5),
            meters: Some(0.0),
            latitude: Some(10.0),
            longitude: Some(10.0),
            satellites: Some(1.0),
            hdop: Some(-1.0),
        };

        let verdict = validator.validate(&raw, None);
        assert_eq!(verdict.rule(), Some(Rule::Completeness));
        assert_eq!(verdict.reason(), Some("missing field(s)"));
    }

    #[test]
    fn test_each_required_field_is_checked() {
        let validator = RecordValidator::default();
        let strip: [fn(&mut RawBreadcrumb); 8] = [
            |r| r.vehicle_id = None,
            |r| r.trip_id = None,
            |r| r.stop_id = None,
            |r| r.service_date = None,
            |r| r.act_time = None,
            |r| r.meters = None,
            |r| r.latitude = None,
            |r| r.longitude = None,
        ];

        for remove in strip {
            let mut raw = crumb(1, 10, 10.0);
            remove(&mut raw);
            assert_eq!(validator.validate(&raw, None).rule(), Some(Rule::Completeness));
        }
    }

    #[test]
    fn test_optional_fields_may_be_absent() {
        let validator = RecordValidator::default();
        let mut raw = crumb(1, 10, 10.0);
        raw.satellites = None;
        raw.hdop = None;

        assert!(validator.validate(&raw, None).is_accepted());
    }

    #[test]
    fn test_act_time_range() {
        let validator = RecordValidator::default();

        for bad in [-1, 86_400, 100_000] {
            let verdict = validator.validate(&crumb(1, bad, 10.0), None);
            assert_eq!(verdict.rule(), Some(Rule::TimeOfDay), "ACT_TIME {}", bad);
        }
        assert!(validator.validate(&crumb(1, 86_399, 10.0), None).is_accepted());
    }

    #[test]
    fn test_coordinates_outside_box_rejected() {
        let validator = RecordValidator::default();

        for (lat, lon) in [(44.99, -122.6), (46.01, -122.6), (45.5, -123.51), (45.5, -121.99)] {
            let mut raw = crumb(1, 10, 10.0);
            raw.latitude = Some(lat);
            raw.longitude = Some(lon);
            assert_eq!(validator.validate(&raw, None).rule(), Some(Rule::Coordinates));
        }

        let mut edge = crumb(1, 10, 10.0);
        edge.latitude = Some(46.0);
        edge.longitude = Some(-123.5);
        assert!(validator.validate(&edge, None).is_accepted());
    }

    #[test]
    fn test_custom_bounding_box() {
        let validator = RecordValidator::new(ValidationConfig {
            max_speed_mps: DEFAULT_MAX_SPEED_MPS,
            bbox: BoundingBox {
                min_lat: -37.0,
                max_lat: -36.0,
                min_lon: 174.0,
                max_lon: 175.0,
            },
        });

        assert_eq!(validator.validate(&crumb(1, 10, 10.0), None).rule(), Some(Rule::Coordinates));
    }

    #[test]
    fn test_satellite_and_hdop_rules_in_order() {
        let validator = RecordValidator::default();

        let mut raw = crumb(1, 10, 10.0);
        raw.satellites = Some(3.0);
        raw.hdop = Some(0.0);
        assert_eq!(validator.validate(&raw, None).rule(), Some(Rule::Satellites));

        raw.satellites = Some(21.0);
        assert_eq!(validator.validate(&raw, None).rule(), Some(Rule::Satellites));

        raw.satellites = Some(4.0);
        assert_eq!(validator.validate(&raw, None).rule(), Some(Rule::HdopPositive));

        raw.hdop = Some(10.5);
        assert_eq!(validator.validate(&raw, None).rule(), Some(Rule::HdopUpperBound));

        raw.hdop = Some(10.0);
        assert!(validator.validate(&raw, None).is_accepted());
    }

    #[test]
    fn test_stationary_at_origin_rejected() {
        let validator = RecordValidator::default();

        let verdict = validator.validate(&crumb(1, 30, 0.0), None);
        assert_eq!(verdict.rule(), Some(Rule::DistanceTime));

        // ACT_TIME=0 with METERS=0 is the trip origin
        assert!(validator.validate(&crumb(1, 0, 0.0), None).is_accepted());
    }

    #[test]
    fn test_service_day_change_rejected() {
        let validator = RecordValidator::default();
        let prior = TripState {
            service_date: NaiveDate::from_ymd_opt(2023, 2, 14).unwrap(),
            act_time: 10,
            meters: 10.0,
        };

        let verdict = validator.validate(&crumb(1, 20, 20.0), Some(&prior));
        assert_eq!(verdict.rule(), Some(Rule::ServiceDay));
    }

    #[test]
    fn test_backward_time_rejected() {
        let validator = RecordValidator::default();
        let prior = state(100, 500.0);

        let verdict = validator.validate(&crumb(1, 99, 600.0), Some(&prior));
        assert_eq!(verdict.rule(), Some(Rule::MonotonicTime));
    }

    #[test]
    fn test_speed_derivation_across_sequence() {
        let validator = RecordValidator::default();
        let samples = [(0, 0.0), (10, 100.0), (30, 400.0), (60, 700.0)];

        let mut prior: Option<TripState> = None;
        for (t, m) in samples {
            let verdict = validator.validate(&crumb(1, t, m), prior.as_ref());
            let expected = prior
                .map(|p| (m - p.meters) / (t - p.act_time) as f64)
                .unwrap_or(0.0);

            assert!(verdict.is_accepted());
            assert!((verdict.speed() - expected).abs() < 1e-9);
            prior = Some(state(t, m));
        }
    }

    #[test]
    fn test_speed_bound() {
        let validator = RecordValidator::default();

        // 100 m in 1 s
        let verdict = validator.validate(&crumb(2, 6, 150.0), Some(&state(5, 50.0)));
        assert_eq!(verdict.rule(), Some(Rule::SpeedBound));

        // odometer going backwards is a negative speed
        let verdict = validator.validate(&crumb(2, 10, 40.0), Some(&state(5, 50.0)));
        assert_eq!(verdict.rule(), Some(Rule::SpeedBound));

        // exactly at the threshold passes
        let verdict = validator.validate(&crumb(2, 6, 85.0), Some(&state(5, 50.0)));
        assert!(verdict.is_accepted());
        assert_eq!(verdict.speed(), 35.0);
    }

    #[test]
    fn test_same_time_gives_zero_speed() {
        let validator = RecordValidator::default();
        let verdict = validator.validate(&crumb(1, 5, 500.0), Some(&state(5, 50.0)));

        assert!(verdict.is_accepted());
        assert_eq!(verdict.speed(), 0.0);
    }

    #[test]
    fn test_validation_is_idempotent() {
        let validator = RecordValidator::default();
        let prior = state(0, 0.0);
        let raw = crumb(1, 10, 100.0);

        let first = validator.validate(&raw, Some(&prior));
        let second = validator.validate(&raw, Some(&prior));
        assert_eq!(first, second);
    }
}
