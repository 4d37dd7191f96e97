//! Speed enrichment
//!
//! Speed is derived while validating (rule 10); this step attaches it, together
//! with the absolute sample timestamp, to the accepted record.

use super::types::{sample_timestamp, EnrichedBreadcrumb, RawBreadcrumb};
use super::validator::AcceptedRecord;

#[derive(Debug, Clone, Copy, Default)]
pub struct SpeedEnricher;

impl SpeedEnricher {
    pub fn new() -> Self {
        Self
    }

    /// Build the enriched record for a breadcrumb that passed validation
    pub fn enrich(&self, raw: &RawBreadcrumb, accepted: &AcceptedRecord) -> EnrichedBreadcrumb {
        EnrichedBreadcrumb {
            vehicle_id: accepted.vehicle_id,
            trip_id: accepted.trip_id,
            stop_id: accepted.stop_id,
            service_date: accepted.service_date,
            act_time: accepted.act_time,
            meters: accepted.meters,
            latitude: accepted.latitude,
            longitude: accepted.longitude,
            satellites: raw.satellites,
            hdop: raw.hdop,
            speed: accepted.speed,
            timestamp: sample_timestamp(accepted.service_date, accepted.act_time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::TripState;
    use crate::pipeline::validator::{RecordValidator, Verdict};
    use chrono::NaiveDate;

    #[test]
    fn test_enrich_attaches_speed_and_timestamp() {
        let date = NaiveDate::from_ymd_opt(2023, 2, 15).unwrap();
        let raw = RawBreadcrumb {
            vehicle_id: Some(3909),
            trip_id: Some(1),
            stop_id: Some(2),
            service_date: Some(date),
            act_time: Some(10),
            meters: Some(100.0),
            latitude: Some(45.5),
            longitude: Some(-122.6),
            satellites: None,
            hdop: Some(1.2),
        };
        let prior = TripState {
            service_date: date,
            act_time: 0,
            meters: 0.0,
        };

        let verdict = RecordValidator::default().validate(&raw, Some(&prior));
        let Verdict::Accepted(accepted) = verdict else {
            panic!("record should be accepted");
        };
        let enriched = SpeedEnricher::new().enrich(&raw, &accepted);

        assert_eq!(enriched.speed, 10.0);
        assert_eq!(enriched.hdop, Some(1.2));
        assert_eq!(enriched.timestamp.to_string(), "2023-02-15 00:00:10");
    }
}
