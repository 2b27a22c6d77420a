//! Process-wide transition delivery bus
//!
//! The geofencing service is bound to this bus at registration time, not to
//! any particular view. Live sessions attach and detach explicitly. A
//! delivery that finds no attached session is dropped, never queued.

use crate::domain::types::TransitionDelivery;
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

/// Durable callback target for geofence transitions
#[derive(Clone)]
pub struct TransitionBus {
    tx: broadcast::Sender<TransitionDelivery>,
    metrics: Arc<Metrics>,
}

impl TransitionBus {
    pub fn new(capacity: usize, metrics: Arc<Metrics>) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, metrics }
    }

    /// Hand a delivery to every attached session
    ///
    /// Returns the number of sessions that received it.
    pub fn deliver(&self, delivery: TransitionDelivery) -> usize {
        match self.tx.send(delivery) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(dropped)) => {
                self.metrics.record_transition_dropped();
                debug!(region_id = %dropped.region_id, "transition_dropped_no_consumer");
                0
            }
        }
    }

    /// Attach a new consumer
    pub fn attach(&self) -> TransitionSubscription {
        TransitionSubscription { rx: self.tx.subscribe() }
    }

    pub fn consumer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// An attached consumer of transition deliveries
pub struct TransitionSubscription {
    rx: broadcast::Receiver<TransitionDelivery>,
}

impl TransitionSubscription {
    /// Wait for the next delivery; `None` once the bus is gone
    pub async fn next(&mut self) -> Option<TransitionDelivery> {
        loop {
            match self.rx.recv().await {
                Ok(delivery) => return Some(delivery),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = %skipped, "transition_consumer_lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take a delivery if one is already queued
    pub fn try_next(&mut self) -> Option<TransitionDelivery> {
        loop {
            match self.rx.try_recv() {
                Ok(delivery) => return Some(delivery),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped = %skipped, "transition_consumer_lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Stop receiving deliveries
    pub fn detach(self) {
        debug!("transition_consumer_detached");
    }
}
