//! Map view surface
//!
//! The core drives the UI only through `MapView`. Widgets, layout and icon
//! drawing belong to the host; `MapState` keeps the resulting view state in
//! memory and `LogView` additionally logs each mutation.

use crate::domain::types::{GeofenceRegion, LatLng};
use crate::infra::main_context::MainContext;
use tracing::{debug, info};

/// Cornflower blue, opaque
pub const CIRCLE_STROKE_ARGB: u32 = 0xFF64_95ED;
/// Cornflower blue, translucent
pub const CIRCLE_FILL_ARGB: u32 = 0x4464_95ED;

/// Map viewport layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Viewport {
    /// Map fills the screen, description panel hidden
    #[default]
    Full,
    /// Map shares the screen with the description panel
    Shrunk,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub title: String,
    pub position: LatLng,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Circle {
    pub center: LatLng,
    pub radius_m: f64,
    pub stroke_argb: u32,
    pub fill_argb: u32,
}

impl Circle {
    pub fn cornflower(center: LatLng, radius_m: f64) -> Self {
        Self { center, radius_m, stroke_argb: CIRCLE_STROKE_ARGB, fill_argb: CIRCLE_FILL_ARGB }
    }
}

/// Camera target and zoom level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub target: LatLng,
    pub zoom: f32,
}

/// UI operations the core needs from the host
pub trait MapView {
    fn show_panel(&mut self, text: &str);
    fn hide_panel(&mut self);
    fn set_viewport(&mut self, viewport: Viewport);

    /// Remove every device marker and circle
    fn clear_locations(&mut self);
    fn add_location_marker(&mut self, marker: Marker);
    fn add_location_circle(&mut self, circle: Circle);

    /// Replace the geofence overlay layer
    fn draw_geofences(&mut self, regions: &[GeofenceRegion]);

    fn move_camera(&mut self, camera: Camera);
}

/// In-memory view state
#[derive(Debug, Clone, Default)]
pub struct MapState {
    panel_visible: bool,
    panel_text: String,
    viewport: Viewport,
    markers: Vec<Marker>,
    circles: Vec<Circle>,
    geofence_markers: Vec<Marker>,
    geofence_circles: Vec<Circle>,
    camera: Option<Camera>,
}

impl MapState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn panel_visible(&self) -> bool {
        self.panel_visible
    }

    pub fn panel_text(&self) -> &str {
        &self.panel_text
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn circles(&self) -> &[Circle] {
        &self.circles
    }

    pub fn geofence_markers(&self) -> &[Marker] {
        &self.geofence_markers
    }

    pub fn geofence_circles(&self) -> &[Circle] {
        &self.geofence_circles
    }

    pub fn camera(&self) -> Option<Camera> {
        self.camera
    }
}

impl MapView for MapState {
    fn show_panel(&mut self, text: &str) {
        self.panel_visible = true;
        self.panel_text.clear();
        self.panel_text.push_str(text);
    }

    fn hide_panel(&mut self) {
        self.panel_visible = false;
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn clear_locations(&mut self) {
        self.markers.clear();
        self.circles.clear();
    }

    fn add_location_marker(&mut self, marker: Marker) {
        self.markers.push(marker);
    }

    fn add_location_circle(&mut self, circle: Circle) {
        self.circles.push(circle);
    }

    fn draw_geofences(&mut self, regions: &[GeofenceRegion]) {
        self.geofence_markers = regions
            .iter()
            .map(|r| Marker { title: r.id.clone(), position: r.center })
            .collect();
        self.geofence_circles =
            regions.iter().map(|r| Circle::cornflower(r.center, r.radius_m)).collect();
    }

    fn move_camera(&mut self, camera: Camera) {
        self.camera = Some(camera);
    }
}

/// View that logs every mutation, for headless runs
#[derive(Debug, Default)]
pub struct LogView {
    state: MapState,
}

impl LogView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &MapState {
        &self.state
    }
}

impl MapView for LogView {
    fn show_panel(&mut self, text: &str) {
        info!(text = %text, "view_panel_shown");
        self.state.show_panel(text);
    }

    fn hide_panel(&mut self) {
        info!("view_panel_hidden");
        self.state.hide_panel();
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        debug!(viewport = ?viewport, "view_viewport");
        self.state.set_viewport(viewport);
    }

    fn clear_locations(&mut self) {
        self.state.clear_locations();
    }

    fn add_location_marker(&mut self, marker: Marker) {
        info!(device = %marker.title, position = %marker.position, "view_marker");
        self.state.add_location_marker(marker);
    }

    fn add_location_circle(&mut self, circle: Circle) {
        self.state.add_location_circle(circle);
    }

    fn draw_geofences(&mut self, regions: &[GeofenceRegion]) {
        info!(count = %regions.len(), "view_geofences_drawn");
        self.state.draw_geofences(regions);
    }

    fn move_camera(&mut self, camera: Camera) {
        debug!(target = %camera.target, zoom = %camera.zoom, "view_camera");
        self.state.move_camera(camera);
    }
}

/// Wraps a view so that every mutation is checked against the main context
///
/// Calls from any other thread are refused and logged.
pub struct ConfinedView<V> {
    inner: V,
    main: MainContext,
}

impl<V: MapView> ConfinedView<V> {
    pub fn new(inner: V, main: MainContext) -> Self {
        Self { inner, main }
    }

    pub fn inner(&self) -> &V {
        &self.inner
    }

    pub fn into_inner(self) -> V {
        self.inner
    }
}

impl<V: MapView> MapView for ConfinedView<V> {
    fn show_panel(&mut self, text: &str) {
        if self.main.ensure("show_panel").is_ok() {
            self.inner.show_panel(text);
        }
    }

    fn hide_panel(&mut self) {
        if self.main.ensure("hide_panel").is_ok() {
            self.inner.hide_panel();
        }
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        if self.main.ensure("set_viewport").is_ok() {
            self.inner.set_viewport(viewport);
        }
    }

    fn clear_locations(&mut self) {
        if self.main.ensure("clear_locations").is_ok() {
            self.inner.clear_locations();
        }
    }

    fn add_location_marker(&mut self, marker: Marker) {
        if self.main.ensure("add_location_marker").is_ok() {
            self.inner.add_location_marker(marker);
        }
    }

    fn add_location_circle(&mut self, circle: Circle) {
        if self.main.ensure("add_location_circle").is_ok() {
            self.inner.add_location_circle(circle);
        }
    }

    fn draw_geofences(&mut self, regions: &[GeofenceRegion]) {
        if self.main.ensure("draw_geofences").is_ok() {
            self.inner.draw_geofences(regions);
        }
    }

    fn move_camera(&mut self, camera: Camera) {
        if self.main.ensure("move_camera").is_ok() {
            self.inner.move_camera(camera);
        }
    }
}
