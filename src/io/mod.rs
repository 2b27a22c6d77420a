//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `store` - Shared store contract and in-memory backend
//! - `mqtt_store` - Shared store over retained MQTT topics
//! - `geofencing` - Host geofencing service contract and software emulator
//! - `location` - Last-known-location providers
//! - `platform` - Installation id and permission sources
//! - `view` - Map view surface driven by the core
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod geofencing;
pub mod location;
pub mod mqtt_store;
pub mod platform;
pub mod prometheus;
pub mod store;
pub mod view;

// Re-export commonly used types
pub use geofencing::{EmulatedGeofencing, GeofenceRequest, GeofencingBatch, GeofencingService};
pub use location::{LocationProvider, ManualLocationProvider, ScriptedLocationProvider};
pub use mqtt_store::MqttStore;
pub use platform::{FilePlatformId, PermissionGate, PlatformIdSource, StaticPermissions, StaticPlatformId};
pub use store::{MemoryStore, SharedStore, Snapshot, StoreError, StoreSubscription};
pub use view::{Camera, Circle, ConfinedView, LogView, MapState, MapView, Marker, Viewport};
