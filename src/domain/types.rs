//! Shared types for geofence monitoring and live location sync

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use super::error::CoreError;

/// Mean Earth radius used for great-circle distances (meters)
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Current wall-clock time as epoch milliseconds
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// WGS84 coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    #[inline]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True if both components are finite and within WGS84 bounds
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Haversine distance in meters
    pub fn distance_m(&self, other: &LatLng) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlng = (other.lng - self.lng).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

impl std::fmt::Display for LatLng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lng)
    }
}

/// Region-crossing transition kind
///
/// Numeric codes match the host platform's geofencing constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionType {
    Enter,
    Exit,
    Dwell,
}

impl TransitionType {
    pub const fn code(self) -> i32 {
        match self {
            TransitionType::Enter => 1,
            TransitionType::Exit => 2,
            TransitionType::Dwell => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(TransitionType::Enter),
            2 => Some(TransitionType::Exit),
            4 => Some(TransitionType::Dwell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionType::Enter => "enter",
            TransitionType::Exit => "exit",
            TransitionType::Dwell => "dwell",
        }
    }
}

/// Bitset of transitions a region is monitored for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct TransitionMask(u8);

impl TransitionMask {
    pub const NONE: TransitionMask = TransitionMask(0);
    pub const ENTER: TransitionMask = TransitionMask(1);
    pub const EXIT: TransitionMask = TransitionMask(2);
    pub const DWELL: TransitionMask = TransitionMask(4);
    pub const ALL: TransitionMask = TransitionMask(1 | 2 | 4);

    pub fn from_types(types: &[TransitionType]) -> Self {
        types.iter().fold(Self::NONE, |mask, t| mask.with(*t))
    }

    #[inline]
    pub fn contains(self, transition: TransitionType) -> bool {
        self.0 & transition.code() as u8 != 0
    }

    #[inline]
    pub fn with(self, transition: TransitionType) -> Self {
        TransitionMask(self.0 | transition.code() as u8)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for TransitionMask {
    type Output = TransitionMask;

    fn bitor(self, rhs: TransitionMask) -> TransitionMask {
        TransitionMask(self.0 | rhs.0)
    }
}

/// Named circular geofence, immutable once loaded
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceRegion {
    pub id: String,
    pub center: LatLng,
    pub radius_m: f64,
    pub description: String,
    pub transitions: TransitionMask,
    pub dwell_delay_ms: u64,
}

impl GeofenceRegion {
    /// Build a region, rejecting empty ids and non-positive radii
    pub fn new(
        id: impl Into<String>,
        center: LatLng,
        radius_m: f64,
        description: impl Into<String>,
        transitions: TransitionMask,
        dwell_delay_ms: u64,
    ) -> Result<Self, CoreError> {
        let id = id.into();
        if id.is_empty() {
            return Err(CoreError::InvalidRegion { id, reason: "empty id".to_string() });
        }
        if !(radius_m.is_finite() && radius_m > 0.0) {
            return Err(CoreError::InvalidRegion { id, reason: format!("radius {radius_m}") });
        }
        Ok(Self { id, center, radius_m, description: description.into(), transitions, dwell_delay_ms })
    }

    /// True if `point` lies within the region's circle
    pub fn contains(&self, point: &LatLng) -> bool {
        self.center.distance_m(point) <= self.radius_m
    }
}

/// Per-region state tracked by the transition handler
///
/// DWELL is folded into `Inside`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegionState {
    #[default]
    Outside,
    Inside,
}

impl RegionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionState::Outside => "outside",
            RegionState::Inside => "inside",
        }
    }
}

/// Raw payload as delivered by the host geofencing service
///
/// `transition_code` is unvalidated; `error_code` is set on delivery faults.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionDelivery {
    pub region_id: String,
    pub transition_code: i32,
    pub error_code: Option<i32>,
    /// Carried opaquely from registration time
    pub description: String,
    pub timestamp_ms: u64,
}

impl TransitionDelivery {
    pub fn new(region_id: impl Into<String>, transition: TransitionType, description: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            transition_code: transition.code(),
            error_code: None,
            description: description.into(),
            timestamp_ms: epoch_ms(),
        }
    }

    /// Validate into a typed transition event
    pub fn event(&self) -> Result<TransitionEvent, CoreError> {
        if let Some(code) = self.error_code {
            return Err(CoreError::DeliveryFault { region_id: self.region_id.clone(), code });
        }
        let transition = TransitionType::from_code(self.transition_code).ok_or_else(|| {
            CoreError::InvalidTransition {
                region_id: self.region_id.clone(),
                code: self.transition_code,
            }
        })?;
        Ok(TransitionEvent {
            region_id: self.region_id.clone(),
            transition,
            description: self.description.clone(),
            timestamp_ms: self.timestamp_ms,
        })
    }
}

/// Validated region-crossing event
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionEvent {
    pub region_id: String,
    pub transition: TransitionType,
    pub description: String,
    pub timestamp_ms: u64,
}

/// A position fix as returned by the location provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub position: LatLng,
    pub captured_at_ms: u64,
}

impl LocationFix {
    pub fn now(position: LatLng) -> Self {
        Self { position, captured_at_ms: epoch_ms() }
    }
}

/// Local sample tagged with the device identity, ready to publish
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSample {
    pub device_id: String,
    pub position: LatLng,
    pub captured_at_ms: u64,
}

impl LocationSample {
    pub fn from_fix(device_id: impl Into<String>, fix: LocationFix) -> Self {
        Self { device_id: device_id.into(), position: fix.position, captured_at_ms: fix.captured_at_ms }
    }
}

/// Stable pseudonymous identity of this install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    raw_platform_id: String,
    derived_id: String,
}

impl DeviceIdentity {
    pub(crate) fn new(raw_platform_id: String, derived_id: String) -> Self {
        Self { raw_platform_id, derived_id }
    }

    pub fn raw_platform_id(&self) -> &str {
        &self.raw_platform_id
    }

    pub fn derived_id(&self) -> &str {
        &self.derived_id
    }
}

/// Store-side projection of a device's latest sample
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteLocationEntry {
    pub device_id: String,
    pub position: LatLng,
    pub updated_at_ms: Option<u64>,
}
