//! Vessel list filtering and distance helpers

use crate::models::{ConnectivityStatus, Position, Vessel};

/// Mean earth radius in nautical miles.
const EARTH_RADIUS_NM: f64 = 3440.065;

/// Criteria for narrowing a vessel list. Empty criteria match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VesselFilter {
    /// Case-insensitive match on name or destination, substring match on MMSI or IMO
    pub query: Option<String>,
    /// Accepted type labels
    pub vessel_types: Vec<String>,
    /// Accepted connectivity states
    pub statuses: Vec<ConnectivityStatus>,
    /// Inclusive lower speed bound in knots
    pub min_speed: Option<f64>,
    /// Inclusive upper speed bound in knots
    pub max_speed: Option<f64>,
}

impl VesselFilter {
    pub fn matches(&self, vessel: &Vessel) -> bool {
        self.matches_query(vessel)
            && self.min_speed.map_or(true, |min| vessel.speed >= min)
            && self.max_speed.map_or(true, |max| vessel.speed <= max)
            && (self.vessel_types.is_empty()
                || self.vessel_types.iter().any(|t| *t == vessel.vessel_type))
            && (self.statuses.is_empty() || self.statuses.contains(&vessel.status))
    }

    /// Vessels passing the filter, in their original order.
    pub fn apply<'a>(&self, vessels: &'a [Vessel]) -> Vec<&'a Vessel> {
        vessels.iter().filter(|v| self.matches(v)).collect()
    }

    fn matches_query(&self, vessel: &Vessel) -> bool {
        let query = match self.query.as_deref().map(str::trim) {
            None | Some("") => return true,
            Some(q) => q.to_lowercase(),
        };

        vessel.name.to_lowercase().contains(&query)
            || vessel
                .destination
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&query))
            || vessel
                .mmsi
                .is_some_and(|m| m.to_string().contains(&query))
            || vessel.imo.is_some_and(|i| i.to_string().contains(&query))
    }
}

/// Great-circle distance between two positions in nautical miles.
pub fn distance_nm(a: Position, b: Position) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_NM * h.sqrt().atan2((1.0 - h).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawVesselRecord;
    use crate::normalizer::Normalizer;
    use chrono::Utc;
    use serde_json::json;

    fn fleet() -> Vec<Vessel> {
        let records = vec![
            json!({"mmsi": 271000001, "name": "Ayder", "vesselType": "Cargo",
                   "status": "online", "position": {"speed": 12.0}, "mapped": true}),
            json!({"mmsi": 271000002, "name": "Karadeniz", "vesselType": "Tanker",
                   "status": "offline", "position": {"speed": 0.0}, "mapped": true}),
            json!({"mmsi": 271000003, "imo": 9387421, "name": "Poyraz", "type": 70,
                   "destination": "Trabzon", "speed": 8.5, "status": "stale", "mapped": true}),
        ];
        Normalizer::default()
            .normalize_batch(records.into_iter().map(RawVesselRecord::new).collect(), Utc::now())
            .vessels
    }

    fn names(vessels: Vec<&Vessel>) -> Vec<&str> {
        vessels.into_iter().map(|v| v.name.as_str()).collect()
    }

    #[test]
    fn empty_filter_matches_all() {
        let vessels = fleet();
        assert_eq!(VesselFilter::default().apply(&vessels).len(), 3);
    }

    #[test]
    fn query_matches_name_destination_and_identifiers() {
        let vessels = fleet();
        let query = |q: &str| VesselFilter {
            query: Some(q.to_string()),
            ..VesselFilter::default()
        };

        assert_eq!(names(query("AYD").apply(&vessels)), vec!["Ayder"]);
        assert_eq!(names(query("trabzon").apply(&vessels)), vec!["Poyraz"]);
        assert_eq!(names(query("000002").apply(&vessels)), vec!["Karadeniz"]);
        assert_eq!(names(query("93874").apply(&vessels)), vec!["Poyraz"]);
        assert_eq!(query("  ").apply(&vessels).len(), 3);
    }

    #[test]
    fn speed_bounds_are_inclusive() {
        let vessels = fleet();
        let filter = VesselFilter {
            min_speed: Some(8.5),
            max_speed: Some(12.0),
            ..VesselFilter::default()
        };
        assert_eq!(names(filter.apply(&vessels)), vec!["Ayder", "Poyraz"]);
    }

    #[test]
    fn type_and_status_lists() {
        let vessels = fleet();
        let filter = VesselFilter {
            vessel_types: vec!["Cargo".to_string()],
            statuses: vec![ConnectivityStatus::Stale],
            ..VesselFilter::default()
        };
        assert_eq!(names(filter.apply(&vessels)), vec!["Poyraz"]);
    }

    #[test]
    fn distance_between_ports() {
        let istanbul = Position { lat: 41.0082, lon: 28.9784 };
        let trabzon = Position { lat: 41.0027, lon: 39.7168 };

        let distance = distance_nm(istanbul, trabzon);
        assert!((distance - 486.0).abs() < 2.0, "got {}", distance);
        assert_eq!(distance_nm(istanbul, istanbul), 0.0);
    }
}
