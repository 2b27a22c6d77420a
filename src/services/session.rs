//! Live map session
//!
//! Owns the view and everything that mutates it. All three inputs
//! (transitions, location snapshots, own fixes) are consumed by one select
//! loop on the main context, so the view has a single writer. `ConfinedView`
//! refuses mutations from any other thread.
//!
//! On teardown the session detaches from the transition bus and unsubscribes
//! from the store explicitly.

use crate::domain::error::CoreError;
use crate::domain::types::{GeofenceRegion, LocationFix, RegionState, TransitionDelivery};
use crate::infra::main_context::MainContext;
use crate::infra::metrics::Metrics;
use crate::io::store::{Snapshot, StoreSubscription};
use crate::io::view::{Camera, ConfinedView, MapView};
use crate::services::renderer::{LocationRenderer, RenderReport};
use crate::services::transition_bus::TransitionSubscription;
use crate::services::transition_handler::TransitionHandler;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct MapSession<V: MapView> {
    view: ConfinedView<V>,
    handler: TransitionHandler,
    renderer: LocationRenderer,
    follow_zoom: Option<f32>,
}

impl<V: MapView> MapSession<V> {
    pub fn new(
        view: V,
        main: MainContext,
        renderer: LocationRenderer,
        follow_zoom: Option<f32>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            view: ConfinedView::new(view, main),
            handler: TransitionHandler::new(metrics),
            renderer,
            follow_zoom,
        }
    }

    /// Draw the monitored regions on their own layer
    pub fn show_regions(&mut self, regions: &[GeofenceRegion]) {
        self.view.draw_geofences(regions);
    }

    pub fn on_transition(&mut self, delivery: &TransitionDelivery) -> Result<RegionState, CoreError> {
        self.handler.handle(delivery, &mut self.view)
    }

    pub fn on_locations(&mut self, snapshot: &Snapshot) -> RenderReport {
        self.renderer.render(snapshot, &mut self.view)
    }

    /// Follow the local device if camera following is on
    pub fn on_own_fix(&mut self, fix: LocationFix) {
        if let Some(zoom) = self.follow_zoom {
            self.view.move_camera(Camera { target: fix.position, zoom });
        }
    }

    pub fn region_state(&self, region_id: &str) -> RegionState {
        self.handler.state(region_id)
    }

    pub fn view(&self) -> &V {
        self.view.inner()
    }

    pub fn into_view(self) -> V {
        self.view.into_inner()
    }

    /// Consume inputs until shutdown, then release both subscriptions
    pub async fn run(
        mut self,
        mut transitions: TransitionSubscription,
        mut locations: StoreSubscription,
        mut fixes: watch::Receiver<Option<LocationFix>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Self {
        let mut fixes_open = true;
        info!(collection = %locations.collection(), "map_session_started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                delivery = transitions.next() => match delivery {
                    Some(delivery) => {
                        // Rejections are logged and counted by the handler
                        let _ = self.on_transition(&delivery);
                    }
                    None => {
                        warn!("transition_bus_closed");
                        break;
                    }
                },
                snapshot = locations.next() => match snapshot {
                    Some(snapshot) => {
                        self.on_locations(&snapshot);
                    }
                    None => {
                        warn!("location_subscription_closed");
                        break;
                    }
                },
                changed = fixes.changed(), if fixes_open => {
                    if changed.is_err() {
                        fixes_open = false;
                        continue;
                    }
                    let fix = *fixes.borrow_and_update();
                    if let Some(fix) = fix {
                        self.on_own_fix(fix);
                    }
                }
            }
        }

        transitions.detach();
        locations.unsubscribe();
        info!("map_session_stopped");
        self
    }
}
