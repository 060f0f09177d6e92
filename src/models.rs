//! Data models.
//!
//! Upstream records arrive in two shapes (see [`RecordShape`]) and are kept
//! raw until the normalizer turns the mapped ones into a canonical [`Vessel`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::FeedError;
use serde_helpers::*;

/// Sentinel used for descriptive fields that upstream did not supply.
pub const UNKNOWN: &str = "Unknown";

/// Maritime Mobile Service Identity (MMSI)
///
/// A unique nine-digit number for identifying vessels in AIS messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Mmsi(u32);

impl TryFrom<u32> for Mmsi {
    type Error = FeedError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value == 0 || value > 999_999_999 {
            return Err(FeedError::InvalidMmsi(value.to_string()));
        }
        Ok(Self(value))
    }
}

impl Mmsi {
    /// Get the raw MMSI value
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Mmsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a vessel within a snapshot. MMSI wins when present.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VesselKey {
    Mmsi(Mmsi),
    Id(String),
}

/// One record of an update frame, untouched.
///
/// Unmapped records are published in this form as trackers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawVesselRecord(Value);

/// Payload layouts observed upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordShape {
    /// `position.latitude/longitude`, string `vesselType`
    Current,
    /// flat legacy layout: numeric `type`, `position.lat/lon`, top-level `speed`/`course`
    Legacy,
}

impl RawVesselRecord {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Only a literal `"mapped": true` counts.
    pub fn is_mapped(&self) -> bool {
        matches!(self.0.get("mapped"), Some(Value::Bool(true)))
    }

    /// Decide which layout this record uses.
    ///
    /// The position block decides; a numeric `type` without `vesselType`
    /// only marks a legacy record when there is no position to go by.
    pub fn shape(&self) -> RecordShape {
        let position = self.0.get("position").and_then(Value::as_object);
        let has_any =
            |p: &Map<String, Value>, keys: [&str; 2]| keys.iter().any(|k| p.contains_key(*k));

        match position {
            Some(p) if has_any(p, ["latitude", "longitude"]) => RecordShape::Current,
            Some(p) if has_any(p, ["lat", "lon"]) => RecordShape::Legacy,
            _ if self.0.get("vesselType").is_none()
                && self.0.get("type").is_some_and(Value::is_number) =>
            {
                RecordShape::Legacy
            }
            _ => RecordShape::Current,
        }
    }

    /// Deserialize into the typed record for its shape.
    ///
    /// Field-level problems never fail here; only a record that is not a JSON
    /// object does.
    pub fn parse(&self) -> Result<UpstreamRecord, serde_json::Error> {
        Ok(match self.shape() {
            RecordShape::Current => UpstreamRecord::Current(CurrentRecord::deserialize(&self.0)?),
            RecordShape::Legacy => UpstreamRecord::Legacy(LegacyRecord::deserialize(&self.0)?),
        })
    }
}

/// Typed upstream record, one variant per layout.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamRecord {
    Current(CurrentRecord),
    Legacy(LegacyRecord),
}

/// Vessel type as supplied upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawVesselType {
    /// Numeric AIS ship type code
    Code(u16),
    /// Ready-made label
    Label(String),
}

/// `status` as supplied upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawStatus {
    /// Legacy AIS navigational status code
    NavCode(u16),
    /// String status, normally `online`, `stale` or `offline`
    Label(String),
}

/// Record in the current wire layout.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct CurrentRecord {
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub id: Option<String>,
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub imei: Option<String>,
    #[serde(deserialize_with = "deserialize_lenient_u32")]
    pub mmsi: Option<u32>,
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub call_sign: Option<String>,
    #[serde(deserialize_with = "deserialize_vessel_type")]
    pub vessel_type: Option<RawVesselType>,
    /// Numeric AIS type code sent alongside (or instead of) `vesselType`
    #[serde(rename = "type", deserialize_with = "deserialize_vessel_type")]
    pub type_code: Option<RawVesselType>,
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub flag: Option<String>,
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub user_id: Option<String>,
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub user_name: Option<String>,
    #[serde(deserialize_with = "deserialize_status")]
    pub status: Option<RawStatus>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "deserialize_object")]
    pub position: Option<CurrentPosition>,
}

/// Position block of a [`CurrentRecord`]
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct CurrentPosition {
    #[serde(deserialize_with = "deserialize_lenient_f64")]
    pub latitude: Option<f64>,
    #[serde(deserialize_with = "deserialize_lenient_f64")]
    pub longitude: Option<f64>,
    /// Speed over ground in knots
    #[serde(deserialize_with = "deserialize_lenient_f64")]
    pub speed: Option<f64>,
    /// Course over ground in degrees
    #[serde(deserialize_with = "deserialize_lenient_f64")]
    pub direction: Option<f64>,
    #[serde(deserialize_with = "deserialize_lenient_f64")]
    pub altitude: Option<f64>,
    #[serde(deserialize_with = "deserialize_lenient_u32")]
    pub satellites: Option<u32>,
}

/// Record in the legacy flat layout.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct LegacyRecord {
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub id: Option<String>,
    #[serde(deserialize_with = "deserialize_lenient_u32")]
    pub mmsi: Option<u32>,
    /// International Maritime Organization number
    #[serde(deserialize_with = "deserialize_lenient_u32")]
    pub imo: Option<u32>,
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub name: Option<String>,
    #[serde(alias = "callSign", deserialize_with = "deserialize_lenient_string")]
    pub callsign: Option<String>,
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub flag: Option<String>,
    #[serde(rename = "type", deserialize_with = "deserialize_vessel_type")]
    pub vessel_type: Option<RawVesselType>,
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub type_name: Option<String>,
    #[serde(deserialize_with = "deserialize_status")]
    pub status: Option<RawStatus>,
    #[serde(deserialize_with = "deserialize_object")]
    pub position: Option<LegacyPosition>,
    #[serde(deserialize_with = "deserialize_lenient_f64")]
    pub speed: Option<f64>,
    #[serde(deserialize_with = "deserialize_lenient_f64")]
    pub course: Option<f64>,
    #[serde(deserialize_with = "deserialize_lenient_f64")]
    pub heading: Option<f64>,
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub destination: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub eta: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "deserialize_lenient_f64")]
    pub draught: Option<f64>,
    #[serde(deserialize_with = "deserialize_lenient_f64")]
    pub length: Option<f64>,
    #[serde(deserialize_with = "deserialize_lenient_f64")]
    pub width: Option<f64>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub user_id: Option<String>,
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub user_name: Option<String>,
}

/// Position block of a [`LegacyRecord`]
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct LegacyPosition {
    #[serde(deserialize_with = "deserialize_lenient_f64")]
    pub lat: Option<f64>,
    #[serde(deserialize_with = "deserialize_lenient_f64")]
    pub lon: Option<f64>,
}

/// WGS84 position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

/// Connectivity of a tracked device, used for filtering and coloring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityStatus {
    Online,
    Stale,
    Offline,
}

impl ConnectivityStatus {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "online" => Some(Self::Online),
            "stale" => Some(Self::Stale),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Stale => "stale",
            Self::Offline => "offline",
        }
    }
}

/// Navigational status
///
/// Value range between 0 - 15.
/// - 0 = under way using engine
/// - 1 = at anchor
/// - 2 = not under command
/// - 3 = restricted maneuverability
/// - 4 = constrained by her draught
/// - 5 = moored
/// - 6 = aground
/// - 7 = engaged in fishing
/// - 8 = under way sailing
/// - 9, 10 = reserved for future amendment (HSC, WIG)
/// - 11 = power-driven vessel towing astern (regional use)
/// - 12 = power-driven vessel pushing ahead or towing alongside (regional use)
/// - 13 = reserved for future use
/// - 14 = AIS-SART (active), MOB-AIS, EPIRB-AIS
/// - 15 = undefined (default)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NavigationStatus {
    UnderWayUsingEngine,
    AtAnchor,
    NotUnderCommand,
    RestrictedManoeuvrability,
    ConstrainedByDraught,
    Moored,
    Aground,
    EngagedInFishing,
    UnderWaySailing,
    Reserved(u8),
    TowingAstern,
    PushingAhead,
    AisSartActive,
    Undefined,
}

impl NavigationStatus {
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0 => Self::UnderWayUsingEngine,
            1 => Self::AtAnchor,
            2 => Self::NotUnderCommand,
            3 => Self::RestrictedManoeuvrability,
            4 => Self::ConstrainedByDraught,
            5 => Self::Moored,
            6 => Self::Aground,
            7 => Self::EngagedInFishing,
            8 => Self::UnderWaySailing,
            9 | 10 | 13 => Self::Reserved(code as u8),
            11 => Self::TowingAstern,
            12 => Self::PushingAhead,
            14 => Self::AisSartActive,
            15 => Self::Undefined,
            _ => return None,
        })
    }

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            Self::UnderWayUsingEngine => "Under way using engine",
            Self::AtAnchor => "At anchor",
            Self::NotUnderCommand => "Not under command",
            Self::RestrictedManoeuvrability => "Restricted manoeuvrability",
            Self::ConstrainedByDraught => "Constrained by draught",
            Self::Moored => "Moored",
            Self::Aground => "Aground",
            Self::EngagedInFishing => "Engaged in fishing",
            Self::UnderWaySailing => "Under way sailing",
            Self::Reserved(_) => "Reserved",
            Self::TowingAstern => "Towing astern",
            Self::PushingAhead => "Pushing ahead",
            Self::AisSartActive => "AIS-SART active",
            Self::Undefined => "Undefined",
        }
    }
}

/// Coarse vessel classification derived from AIS ship type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VesselCategory {
    Fishing,
    Tug,
    Dredger,
    Diving,
    Military,
    Sailing,
    PleasureCraft,
    Pilot,
    SearchAndRescue,
    PortTender,
    Passenger,
    Cargo,
    Tanker,
    Other,
    Unknown,
}

impl VesselCategory {
    pub fn from_code(code: u16) -> Self {
        match code {
            30 => Self::Fishing,
            31 | 32 | 52 => Self::Tug,
            33 => Self::Dredger,
            34 => Self::Diving,
            35 => Self::Military,
            36 => Self::Sailing,
            37 => Self::PleasureCraft,
            50 => Self::Pilot,
            51 => Self::SearchAndRescue,
            53 => Self::PortTender,
            60..=69 => Self::Passenger,
            70..=79 => Self::Cargo,
            80..=89 => Self::Tanker,
            90 => Self::Other,
            _ => Self::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Fishing => "Fishing",
            Self::Tug => "Tug",
            Self::Dredger => "Dredger",
            Self::Diving => "Diving",
            Self::Military => "Military",
            Self::Sailing => "Sailing",
            Self::PleasureCraft => "Pleasure craft",
            Self::Pilot => "Pilot",
            Self::SearchAndRescue => "Search and rescue",
            Self::PortTender => "Port tender",
            Self::Passenger => "Passenger",
            Self::Cargo => "Cargo",
            Self::Tanker => "Tanker",
            Self::Other => "Other",
            Self::Unknown => UNKNOWN,
        }
    }
}

/// Canonical vessel as published to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vessel {
    pub id: Option<String>,
    pub imei: Option<String>,
    pub mmsi: Option<Mmsi>,
    pub imo: Option<u32>,
    pub name: String,
    pub call_sign: String,
    pub flag: String,
    /// Classification label
    pub vessel_type: String,
    /// Numeric AIS type code, when upstream sent one
    pub type_code: Option<u16>,
    /// Connectivity, used for filtering
    pub status: ConnectivityStatus,
    /// Navigational status, when upstream sent a numeric code
    pub nav_status: Option<NavigationStatus>,
    /// Display name of the navigational status
    pub status_name: String,
    pub position: Position,
    /// Speed over ground in knots, never negative
    pub speed: f64,
    /// Course over ground in degrees, 0 - 359.x
    pub course: f64,
    pub heading: f64,
    pub altitude: Option<f64>,
    pub satellites: Option<u32>,
    pub destination: Option<String>,
    pub eta: Option<DateTime<Utc>>,
    /// Draught in metres
    pub draught: Option<f64>,
    pub length: Option<f64>,
    pub width: Option<f64>,
    pub last_update: DateTime<Utc>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub mapped: bool,
}

impl Vessel {
    pub fn key(&self) -> Option<VesselKey> {
        match (self.mmsi, &self.id) {
            (Some(mmsi), _) => Some(VesselKey::Mmsi(mmsi)),
            (None, Some(id)) => Some(VesselKey::Id(id.clone())),
            (None, None) => None,
        }
    }
}

/// Custom deserializers
///
/// All of them accept anything and fall back to `None`, so a single odd
/// field never fails a record.
mod serde_helpers {
    use super::{RawStatus, RawVesselType};
    use chrono::{DateTime, Utc};
    use serde::{de::DeserializeOwned, Deserialize, Deserializer};
    use serde_json::Value;

    fn value<'de, D>(deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Value>::deserialize(deserializer)?.unwrap_or(Value::Null))
    }

    pub fn deserialize_lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match value(deserializer)? {
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    pub fn deserialize_lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match value(deserializer)? {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn deserialize_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let parsed = match value(deserializer)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        Ok(parsed.filter(|v| v.is_finite()))
    }

    /// ISO 8601 string, or Unix epoch in seconds or milliseconds.
    pub fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match value(deserializer)? {
            Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Value::Number(n) => n.as_i64().and_then(|n| {
                if n.abs() >= 100_000_000_000 {
                    DateTime::from_timestamp_millis(n)
                } else {
                    DateTime::from_timestamp(n, 0)
                }
            }),
            _ => None,
        })
    }

    pub fn deserialize_vessel_type<'de, D>(
        deserializer: D,
    ) -> Result<Option<RawVesselType>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match value(deserializer)? {
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| u16::try_from(n).ok())
                .map(RawVesselType::Code),
            Value::String(s) if !s.trim().is_empty() => {
                Some(RawVesselType::Label(s.trim().to_string()))
            }
            _ => None,
        })
    }

    pub fn deserialize_status<'de, D>(deserializer: D) -> Result<Option<RawStatus>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match value(deserializer)? {
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| u16::try_from(n).ok())
                .map(RawStatus::NavCode),
            Value::String(s) if !s.trim().is_empty() => Some(RawStatus::Label(s.trim().to_string())),
            _ => None,
        })
    }

    /// Nested block; anything that does not deserialize becomes `None`.
    pub fn deserialize_object<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        Ok(match value(deserializer)? {
            v @ Value::Object(_) => serde_json::from_value(v).ok(),
            _ => None,
        })
    }
}
