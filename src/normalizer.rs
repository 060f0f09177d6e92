//! Vessel normalization
//!
//! Turns the mapped records of an update frame into canonical [`Vessel`]s.
//! Each upstream layout has its own normalization function; both produce the
//! same output type. Missing fields get defaults, never errors.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use crate::models::{
    ConnectivityStatus, CurrentRecord, LegacyRecord, Mmsi, NavigationStatus, Position, RawStatus,
    RawVesselRecord, RawVesselType, UpstreamRecord, Vessel, VesselCategory, VesselKey, UNKNOWN,
};

/// Report age after which a vessel without stated connectivity is stale.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);
/// Report age after which it is offline.
pub const DEFAULT_OFFLINE_AFTER: Duration = Duration::from_secs(30 * 60);

/// Result of normalizing one update frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    /// Mapped records, normalized, de-duplicated, in arrival order
    pub vessels: Vec<Vessel>,
    /// Unmapped records as received
    pub trackers: Vec<RawVesselRecord>,
    /// Mapped records dropped because they were not objects or had no identity
    pub rejected: usize,
}

/// Split a batch into `(mapped, unmapped)`, preserving order.
pub fn partition(records: Vec<RawVesselRecord>) -> (Vec<RawVesselRecord>, Vec<RawVesselRecord>) {
    records.into_iter().partition(RawVesselRecord::is_mapped)
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    stale_after: TimeDelta,
    offline_after: TimeDelta,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER, DEFAULT_OFFLINE_AFTER)
    }
}

impl Normalizer {
    /// `stale_after` and `offline_after` are report ages used to derive
    /// connectivity when upstream does not state it.
    pub fn new(stale_after: Duration, offline_after: Duration) -> Self {
        Self {
            stale_after: TimeDelta::from_std(stale_after).unwrap_or(TimeDelta::MAX),
            offline_after: TimeDelta::from_std(offline_after).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Normalize a whole update frame.
    ///
    /// `reference` is the frame timestamp; it stands in for missing per-record
    /// report times and anchors connectivity derivation.
    pub fn normalize_batch(&self, records: Vec<RawVesselRecord>, reference: DateTime<Utc>) -> Batch {
        let (mapped, trackers) = partition(records);

        let mut vessels: Vec<Vessel> = Vec::with_capacity(mapped.len());
        let mut slots: HashMap<VesselKey, usize> = HashMap::with_capacity(mapped.len());
        let mut rejected = 0;

        for raw in mapped {
            let record = match raw.parse() {
                Ok(record) => record,
                Err(e) => {
                    warn!("Dropping malformed vessel record: {}", e);
                    rejected += 1;
                    continue;
                }
            };

            let vessel = self.normalize(record, reference);
            let Some(key) = vessel.key() else {
                warn!("Dropping vessel record without MMSI or id");
                rejected += 1;
                continue;
            };

            match slots.get(&key) {
                Some(&slot) => {
                    debug!("Duplicate vessel {:?} in batch, keeping latest record", key);
                    vessels[slot] = vessel;
                }
                None => {
                    slots.insert(key, vessels.len());
                    vessels.push(vessel);
                }
            }
        }

        Batch {
            vessels,
            trackers,
            rejected,
        }
    }

    /// Normalize a single record.
    pub fn normalize(&self, record: UpstreamRecord, reference: DateTime<Utc>) -> Vessel {
        match record {
            UpstreamRecord::Current(record) => self.normalize_current(record, reference),
            UpstreamRecord::Legacy(record) => self.normalize_legacy(record, reference),
        }
    }

    fn normalize_current(&self, record: CurrentRecord, reference: DateTime<Utc>) -> Vessel {
        let position = record.position.unwrap_or_default();
        let (vessel_type, type_code) = match (record.vessel_type, record.type_code) {
            (Some(RawVesselType::Label(label)), code) => (label, type_code(code.as_ref())),
            (Some(raw), _) | (None, Some(raw)) => classify_type(Some(&raw)),
            (None, None) => classify_type(None),
        };
        let (nav_status, status_name) = navigation_status(record.status.as_ref());
        let last_update = record.last_update.unwrap_or(reference);
        let course = normalize_course(position.direction);

        Vessel {
            id: record.id,
            imei: record.imei,
            mmsi: to_mmsi(record.mmsi),
            imo: None,
            name: or_unknown(record.name),
            call_sign: or_unknown(record.call_sign),
            flag: or_unknown(record.flag),
            vessel_type,
            type_code,
            status: self.connectivity(record.status.as_ref(), last_update, reference),
            nav_status,
            status_name,
            position: Position {
                lat: position.latitude.unwrap_or(0.0),
                lon: position.longitude.unwrap_or(0.0),
            },
            speed: normalize_speed(position.speed),
            course,
            heading: course,
            altitude: position.altitude,
            satellites: position.satellites,
            destination: None,
            eta: None,
            draught: None,
            length: None,
            width: None,
            last_update,
            user_id: record.user_id,
            user_name: record.user_name,
            mapped: true,
        }
    }

    fn normalize_legacy(&self, record: LegacyRecord, reference: DateTime<Utc>) -> Vessel {
        let position = record.position.unwrap_or_default();
        let (vessel_type, type_code) = match record.type_name {
            Some(label) => (label, type_code(record.vessel_type.as_ref())),
            None => classify_type(record.vessel_type.as_ref()),
        };
        let (nav_status, status_name) = navigation_status(record.status.as_ref());
        let last_update = record.last_update.unwrap_or(reference);
        let course = normalize_course(record.course);

        Vessel {
            id: record.id,
            imei: None,
            mmsi: to_mmsi(record.mmsi),
            imo: record.imo.filter(|imo| *imo != 0),
            name: or_unknown(record.name),
            call_sign: or_unknown(record.callsign),
            flag: or_unknown(record.flag),
            vessel_type,
            type_code,
            status: self.connectivity(record.status.as_ref(), last_update, reference),
            nav_status,
            status_name,
            position: Position {
                lat: position.lat.unwrap_or(0.0),
                lon: position.lon.unwrap_or(0.0),
            },
            speed: normalize_speed(record.speed),
            course,
            heading: record.heading.map_or(course, |h| normalize_course(Some(h))),
            altitude: None,
            satellites: None,
            destination: record.destination,
            eta: record.eta,
            draught: record.draught,
            length: record.length,
            width: record.width,
            last_update,
            user_id: record.user_id,
            user_name: record.user_name,
            mapped: true,
        }
    }

    /// Stated connectivity wins; otherwise it is derived from report age.
    fn connectivity(
        &self,
        status: Option<&RawStatus>,
        last_update: DateTime<Utc>,
        reference: DateTime<Utc>,
    ) -> ConnectivityStatus {
        if let Some(RawStatus::Label(label)) = status {
            if let Some(stated) = ConnectivityStatus::from_label(label) {
                return stated;
            }
        }

        let age = reference.signed_duration_since(last_update);
        if age < self.stale_after {
            ConnectivityStatus::Online
        } else if age < self.offline_after {
            ConnectivityStatus::Stale
        } else {
            ConnectivityStatus::Offline
        }
    }
}

/// Map an upstream vessel type to `(label, numeric code)`.
///
/// A string label is used verbatim; numeric codes go through
/// [`VesselCategory`].
pub fn classify_type(raw: Option<&RawVesselType>) -> (String, Option<u16>) {
    match raw {
        Some(RawVesselType::Label(label)) => (label.clone(), None),
        Some(RawVesselType::Code(code)) => (
            VesselCategory::from_code(*code).label().to_string(),
            Some(*code),
        ),
        None => (UNKNOWN.to_string(), None),
    }
}

fn type_code(raw: Option<&RawVesselType>) -> Option<u16> {
    match raw {
        Some(RawVesselType::Code(code)) => Some(*code),
        _ => None,
    }
}

/// Display status for a numeric navigation code. String statuses are
/// connectivity, not navigation, and map to [`UNKNOWN`].
pub fn navigation_status(raw: Option<&RawStatus>) -> (Option<NavigationStatus>, String) {
    let nav_status = match raw {
        Some(RawStatus::NavCode(code)) => NavigationStatus::from_code(*code),
        _ => None,
    };
    let name = nav_status.map_or(UNKNOWN, |s| s.name()).to_string();
    (nav_status, name)
}

/// Clamp `last_update` so it never moves backwards for a vessel that was
/// already in the previous snapshot.
pub fn carry_forward(previous: &[Vessel], next: &mut [Vessel]) {
    if previous.is_empty() {
        return;
    }
    let seen: HashMap<VesselKey, DateTime<Utc>> = previous
        .iter()
        .filter_map(|v| v.key().map(|k| (k, v.last_update)))
        .collect();

    for vessel in next.iter_mut() {
        if let Some(prior) = vessel.key().and_then(|k| seen.get(&k)) {
            if vessel.last_update < *prior {
                vessel.last_update = *prior;
            }
        }
    }
}

fn to_mmsi(value: Option<u32>) -> Option<Mmsi> {
    let value = value?;
    match Mmsi::try_from(value) {
        Ok(mmsi) => Some(mmsi),
        Err(e) => {
            debug!("Ignoring MMSI {}: {}", value, e);
            None
        }
    }
}

fn or_unknown(value: Option<String>) -> String {
    value.unwrap_or_else(|| UNKNOWN.to_string())
}

fn normalize_speed(speed: Option<f64>) -> f64 {
    speed.unwrap_or(0.0).max(0.0)
}

fn normalize_course(course: Option<f64>) -> f64 {
    course.unwrap_or(0.0).rem_euclid(360.0)
}
