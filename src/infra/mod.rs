//! Infrastructure - configuration, metrics, broker and main-context guard
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `broker` - Embedded MQTT broker (rumqttd) hosting the shared store
//! - `main_context` - Thread confinement for UI state

pub mod broker;
pub mod config;
pub mod main_context;
pub mod metrics;

pub use config::{Config, StoreBackend};
pub use main_context::MainContext;
pub use metrics::Metrics;
