//! Domain models - core types and error taxonomy
//!
//! This module contains the canonical data types used throughout the system:
//! - `GeofenceRegion` - a named circular region and its monitoring parameters
//! - `TransitionDelivery` / `TransitionEvent` - raw and validated region crossings
//! - `LocationFix` / `LocationSample` - local position samples
//! - `RemoteLocationEntry` - a device's position as read back from the shared store
//! - `CoreError` - error kinds shared by every service

pub mod error;
pub mod types;

pub use error::CoreError;
pub use types::{
    epoch_ms, DeviceIdentity, GeofenceRegion, LatLng, LocationFix, LocationSample, RegionState,
    RemoteLocationEntry, TransitionDelivery, TransitionEvent, TransitionMask, TransitionType,
};
