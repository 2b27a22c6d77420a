//! Error taxonomy for the geofence and location sync core
//!
//! Every variant is non-fatal to the running system except
//! `PlatformIdMissing`, which the composition root treats as misconfiguration.

use crate::io::store::StoreError;

/// Errors surfaced by the core services
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Location permission has not been granted; the feature is skipped.
    #[error("location permission not granted")]
    PermissionMissing,

    /// Geofence definitions could not be read; the caller runs with zero regions.
    #[error("geofence config unavailable: {0}")]
    ConfigUnavailable(String),

    /// The geofencing service rejected a registration batch.
    #[error("geofence registration failed: {0}")]
    RegistrationFailure(String),

    /// Transition code outside {ENTER, EXIT, DWELL}.
    #[error("invalid transition code {code} for region {region_id}")]
    InvalidTransition { region_id: String, code: i32 },

    /// The geofencing service reported a delivery error instead of a transition.
    #[error("geofence delivery fault {code} for region {region_id}")]
    DeliveryFault { region_id: String, code: i32 },

    /// A location entry could not be parsed into coordinates.
    #[error("malformed {field} for {key}: {reason}")]
    MalformedLocationValue { key: String, field: &'static str, reason: String },

    /// Writing a sample to the shared store failed; the sample is lost.
    #[error("publish to {path} failed: {source}")]
    PublishFailure {
        path: String,
        #[source]
        source: StoreError,
    },

    /// Region definition violates an invariant (empty id, non-positive radius).
    #[error("invalid region {id}: {reason}")]
    InvalidRegion { id: String, reason: String },

    /// No installation id is available to derive the device identity from.
    #[error("platform installation id unavailable")]
    PlatformIdMissing,

    /// A main-context-only operation ran on another thread.
    #[error("{op} called off the main context")]
    ThreadConfinement { op: &'static str },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CoreError {
    /// Short stable name used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::PermissionMissing => "permission_missing",
            CoreError::ConfigUnavailable(_) => "config_unavailable",
            CoreError::RegistrationFailure(_) => "registration_failure",
            CoreError::InvalidTransition { .. } => "invalid_transition",
            CoreError::DeliveryFault { .. } => "delivery_fault",
            CoreError::MalformedLocationValue { .. } => "malformed_location_value",
            CoreError::PublishFailure { .. } => "publish_failure",
            CoreError::InvalidRegion { .. } => "invalid_region",
            CoreError::PlatformIdMissing => "platform_id_missing",
            CoreError::ThreadConfinement { .. } => "thread_confinement",
            CoreError::Store(_) => "store",
        }
    }
}
