//! Breadcrumb data model
//!
//! Wire records arrive as one JSON object per breadcrumb with the upstream
//! field names (`VEHICLE_ID`, `EVENT_NO_TRIP`, ...). Decoding turns them into
//! `RawBreadcrumb`, where every field is optional: presence is checked by the
//! validator, not by the decoder.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// One GPS/odometer sample as delivered by the fetch step
///
/// Immutable once received. All fields are optional because the upstream
/// feed routinely sends nulls; the completeness rule decides what is required.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBreadcrumb {
    pub vehicle_id: Option<i64>,
    pub trip_id: Option<i64>,
    pub stop_id: Option<i64>,
    /// Service day, parsed from the date portion of `OPD_DATE`
    pub service_date: Option<NaiveDate>,
    /// Seconds since midnight of the service day (`ACT_TIME`)
    pub act_time: Option<i64>,
    /// Cumulative distance traveled on the trip, meters
    pub meters: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub satellites: Option<f64>,
    pub hdop: Option<f64>,
}

/// A breadcrumb that passed all ten rules, plus its derived speed
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedBreadcrumb {
    pub vehicle_id: i64,
    pub trip_id: i64,
    pub stop_id: i64,
    pub service_date: NaiveDate,
    pub act_time: i64,
    pub meters: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub satellites: Option<f64>,
    pub hdop: Option<f64>,
    /// Instantaneous speed in m/s (zero for the first record of a trip)
    pub speed: f64,
    /// Absolute time of the sample: service date + `act_time`
    pub timestamp: NaiveDateTime,
}

/// Last accepted state for one trip, used by the stateful rules
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripState {
    pub service_date: NaiveDate,
    pub act_time: i64,
    pub meters: f64,
}

impl From<&EnrichedBreadcrumb> for TripState {
    fn from(record: &EnrichedBreadcrumb) -> Self {
        Self {
            service_date: record.service_date,
            act_time: record.act_time,
            meters: record.meters,
        }
    }
}

/// Outbound row in the sink's fixed column order:
/// `tstamp, latitude, longitude, speed, trip_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRow {
    pub tstamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub trip_id: i64,
}

impl From<&EnrichedBreadcrumb> for SinkRow {
    fn from(record: &EnrichedBreadcrumb) -> Self {
        Self {
            tstamp: record.timestamp,
            latitude: record.latitude,
            longitude: record.longitude,
            speed: record.speed,
            trip_id: record.trip_id,
        }
    }
}

/// Column names of the `breadcrumb` table, in row order
pub const SINK_COLUMNS: [&str; 5] = ["tstamp", "latitude", "longitude", "speed", "trip_id"];

/// Build the absolute timestamp of a sample from its service day and offset
pub fn sample_timestamp(service_date: NaiveDate, act_time: i64) -> NaiveDateTime {
    service_date.and_time(chrono::NaiveTime::MIN) + Duration::seconds(act_time)
}

#[derive(Debug)]
pub enum DecodeError {
    Json(serde_json::Error),
    InvalidServiceDate(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Json(err)
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Json(e) => write!(f, "Malformed breadcrumb payload: {}", e),
            DecodeError::InvalidServiceDate(raw) => write!(f, "Unparseable OPD_DATE: {:?}", raw),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Wire shape of a breadcrumb message
#[derive(Debug, Deserialize)]
struct WireBreadcrumb {
    #[serde(rename = "VEHICLE_ID", default)]
    vehicle_id: Option<i64>,
    #[serde(rename = "EVENT_NO_TRIP", default)]
    trip_id: Option<i64>,
    #[serde(rename = "EVENT_NO_STOP", default)]
    stop_id: Option<i64>,
    #[serde(rename = "OPD_DATE", default)]
    opd_date: Option<String>,
    #[serde(rename = "ACT_TIME", default)]
    act_time: Option<i64>,
    #[serde(rename = "METERS", default)]
    meters: Option<f64>,
    #[serde(rename = "GPS_LATITUDE", default)]
    latitude: Option<f64>,
    #[serde(rename = "GPS_LONGITUDE", default)]
    longitude: Option<f64>,
    #[serde(rename = "GPS_SATELLITES", default)]
    satellites: Option<f64>,
    #[serde(rename = "GPS_HDOP", default)]
    hdop: Option<f64>,
}

/// Parse the date portion of an `OPD_DATE` value such as `15FEB2023:00:00:00`
pub fn parse_service_date(opd_date: &str) -> Result<NaiveDate, DecodeError> {
    let date_part = opd_date.split(':').next().unwrap_or_default().trim();
    NaiveDate::parse_from_str(date_part, "%d%b%Y")
        .map_err(|_| DecodeError::InvalidServiceDate(opd_date.to_string()))
}

/// Decode one transport payload into a raw breadcrumb
pub fn decode_breadcrumb(payload: &[u8]) -> Result<RawBreadcrumb, DecodeError> {
    let wire: WireBreadcrumb = serde_json::from_slice(payload)?;

    let service_date = match wire.opd_date.as_deref() {
        Some(raw) => Some(parse_service_date(raw)?),
        None => None,
    };

    Ok(RawBreadcrumb {
        vehicle_id: wire.vehicle_id,
        trip_id: wire.trip_id,
        stop_id: wire.stop_id,
        service_date,
        act_time: wire.act_time,
        meters: wire.meters,
        latitude: wire.latitude,
        longitude: wire.longitude,
        satellites: wire.satellites,
        hdop: wire.hdop,
    })
}
