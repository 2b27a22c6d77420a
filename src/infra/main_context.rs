//! Main execution context guard
//!
//! The render target may only be mutated from the thread that created the
//! session. `MainContext` captures that thread and checks every mutation.

use crate::domain::error::CoreError;
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::error;

/// Identity of the single thread allowed to touch UI state
#[derive(Clone)]
pub struct MainContext {
    owner: ThreadId,
    metrics: Arc<Metrics>,
}

impl MainContext {
    /// Bind to the calling thread
    pub fn current(metrics: Arc<Metrics>) -> Self {
        Self { owner: thread::current().id(), metrics }
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Fail with `ThreadConfinement` when called from any other thread
    pub fn ensure(&self, op: &'static str) -> Result<(), CoreError> {
        if self.is_current() {
            return Ok(());
        }
        self.metrics.record_confinement_violation();
        error!(
            op = %op,
            owner = ?self.owner,
            caller = ?thread::current().id(),
            "main_context_violation"
        );
        Err(CoreError::ThreadConfinement { op })
    }
}
