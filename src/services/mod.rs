//! Services - business logic and state management
//!
//! This module contains the core services:
//! - `region_loader` - Reads geofence definitions from the shared store
//! - `registrar` - Submits regions to the geofencing service
//! - `transition_bus` - Process-wide delivery channel for transitions
//! - `transition_handler` - Per-region INSIDE/OUTSIDE state machine
//! - `identity` - Derives the published device id
//! - `publisher` - Writes local samples to the shared store
//! - `poller` - Periodic last-known-location fetch
//! - `renderer` - Redraws remote device locations
//! - `session` - Main-context loop that owns the view

pub mod identity;
pub mod poller;
pub mod publisher;
pub mod region_loader;
pub mod registrar;
pub mod renderer;
pub mod session;
pub mod transition_bus;
pub mod transition_handler;

// Re-export commonly used types
pub use identity::{derive_id, DeviceIdentityProvider};
pub use poller::{LocationPoller, PollerHandle};
pub use publisher::LocationPublisher;
pub use region_loader::{RegionConfigLoader, RegionDefaults};
pub use registrar::{GeofenceRegistrar, RegistrationResult};
pub use renderer::{LocationRenderer, RenderReport};
pub use session::MapSession;
pub use transition_bus::{TransitionBus, TransitionSubscription};
pub use transition_handler::TransitionHandler;
