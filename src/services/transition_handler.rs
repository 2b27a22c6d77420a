//! Geofence transition state machine
//!
//! One `RegionState` per region, OUTSIDE until told otherwise:
//!
//! ```text
//! ENTER | DWELL  -> INSIDE   show panel(description), shrink viewport
//! EXIT           -> OUTSIDE  hide panel, full viewport
//! other code     -> dropped, counted as invalid, no change
//! error code set -> dropped, counted as fault, no change
//! ```
//!
//! Every applied transition re-runs its side effect, so repeated deliveries
//! converge on the same view.

use crate::domain::error::CoreError;
use crate::domain::types::{RegionState, TransitionDelivery, TransitionType};
use crate::infra::metrics::Metrics;
use crate::io::view::{MapView, Viewport};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct TransitionHandler {
    states: FxHashMap<String, RegionState>,
    metrics: Arc<Metrics>,
}

impl TransitionHandler {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { states: FxHashMap::default(), metrics }
    }

    /// Current state of a region; unknown regions are OUTSIDE
    pub fn state(&self, region_id: &str) -> RegionState {
        self.states.get(region_id).copied().unwrap_or_default()
    }

    /// Apply one delivery, returning the region's resulting state
    pub fn handle<V: MapView>(
        &mut self,
        delivery: &TransitionDelivery,
        view: &mut V,
    ) -> Result<RegionState, CoreError> {
        let event = match delivery.event() {
            Ok(event) => event,
            Err(e) => {
                match e {
                    CoreError::DeliveryFault { .. } => self.metrics.record_transition_fault(),
                    _ => self.metrics.record_invalid_transition(),
                }
                warn!(
                    region_id = %delivery.region_id,
                    code = %delivery.transition_code,
                    kind = %e.kind(),
                    "transition_dropped"
                );
                return Err(e);
            }
        };

        let next = match event.transition {
            TransitionType::Enter | TransitionType::Dwell => {
                view.show_panel(&event.description);
                view.set_viewport(Viewport::Shrunk);
                RegionState::Inside
            }
            TransitionType::Exit => {
                view.hide_panel();
                view.set_viewport(Viewport::Full);
                RegionState::Outside
            }
        };

        let previous = self.states.insert(event.region_id.clone(), next).unwrap_or_default();
        self.metrics.record_transition_applied();
        info!(
            region_id = %event.region_id,
            transition = %event.transition.as_str(),
            from = %previous.as_str(),
            to = %next.as_str(),
            "transition_applied"
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::view::MapState;

    fn delivery(id: &str, transition: TransitionType) -> TransitionDelivery {
        TransitionDelivery::new(id, transition, format!("{id} description"))
    }

    #[test]
    fn test_enter_then_exit() {
        let metrics = Arc::new(Metrics::new());
        let mut handler = TransitionHandler::new(metrics.clone());
        let mut view = MapState::new();
        assert_eq!(handler.state("Library"), RegionState::Outside);

        handler.handle(&delivery("Library", TransitionType::Enter), &mut view).unwrap();
        assert_eq!(handler.state("Library"), RegionState::Inside);
        assert!(view.panel_visible());
        assert_eq!(view.panel_text(), "Library description");
        assert_eq!(view.viewport(), Viewport::Shrunk);

        handler.handle(&delivery("Library", TransitionType::Enter), &mut view).unwrap();
        assert_eq!(handler.state("Library"), RegionState::Inside);
        assert_eq!(view.panel_text(), "Library description");

        handler.handle(&delivery("Library", TransitionType::Exit), &mut view).unwrap();
        assert_eq!(handler.state("Library"), RegionState::Outside);
        assert!(!view.panel_visible());
        assert_eq!(view.viewport(), Viewport::Full);
        assert_eq!(metrics.transitions_applied(), 3);
    }

    #[test]
    fn test_dwell_is_inside() {
        let mut handler = TransitionHandler::new(Arc::new(Metrics::new()));
        let mut view = MapState::new();

        let state = handler.handle(&delivery("Gym", TransitionType::Dwell), &mut view).unwrap();
        assert_eq!(state, RegionState::Inside);
        assert!(view.panel_visible());
    }

    #[test]
    fn test_invalid_code_changes_nothing() {
        let metrics = Arc::new(Metrics::new());
        let mut handler = TransitionHandler::new(metrics.clone());
        let mut view = MapState::new();
        handler.handle(&delivery("Library", TransitionType::Enter), &mut view).unwrap();

        let mut bad = delivery("Library", TransitionType::Exit);
        bad.transition_code = 3;
        assert!(matches!(
            handler.handle(&bad, &mut view),
            Err(CoreError::InvalidTransition { code: 3, .. })
        ));

        assert_eq!(handler.state("Library"), RegionState::Inside);
        assert!(view.panel_visible());
        assert_eq!(metrics.invalid_transitions(), 1);
        assert_eq!(metrics.transitions_applied(), 1);
        assert_eq!(metrics.transition_faults(), 0);
    }

    #[test]
    fn test_delivery_fault_changes_nothing() {
        let metrics = Arc::new(Metrics::new());
        let mut handler = TransitionHandler::new(metrics.clone());
        let mut view = MapState::new();

        let mut faulted = delivery("Library", TransitionType::Enter);
        faulted.error_code = Some(1000);
        assert!(handler.handle(&faulted, &mut view).is_err());

        assert_eq!(handler.state("Library"), RegionState::Outside);
        assert!(!view.panel_visible());
        assert_eq!(metrics.transition_faults(), 1);
        assert_eq!(metrics.invalid_transitions(), 0);
    }

    #[test]
    fn test_regions_are_independent() {
        let mut handler = TransitionHandler::new(Arc::new(Metrics::new()));
        let mut view = MapState::new();

        handler.handle(&delivery("Library", TransitionType::Enter), &mut view).unwrap();
        handler.handle(&delivery("Gym", TransitionType::Exit), &mut view).unwrap();

        assert_eq!(handler.state("Library"), RegionState::Inside);
        assert_eq!(handler.state("Gym"), RegionState::Outside);
    }
}
