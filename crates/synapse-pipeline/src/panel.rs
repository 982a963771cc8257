//! Panel lifecycle: creation from the type registry, partial updates,
//! versioned content, and clamped move/resize.
//!
//! The [`PanelManager`] is the only writer of panel state. Every method takes
//! `&self` and holds its lock only for the duration of the mutation. When
//! attached to a [`PipelineStore`], the flags of each stage-bound panel are
//! published into the store after every change.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use synapse_types::{Result, SynapseError};

use crate::events::{EventEmitter, PipelineEvent};
use crate::layout::{self, Rect};
use crate::panel_registry::{PanelType, PanelTypeRegistry};
use crate::store::PipelineStore;

// ---------------------------------------------------------------------------
// Panel value types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelState {
    pub visible: bool,
    pub minimized: bool,
    pub maximized: bool,
    pub pinned: bool,
    pub resizable: bool,
    pub draggable: bool,
    pub closable: bool,
    pub loading: bool,
    pub has_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Default for PanelState {
    fn default() -> Self {
        Self {
            visible: true,
            minimized: false,
            maximized: false,
            pinned: false,
            resizable: true,
            draggable: true,
            closable: true,
            loading: false,
            has_error: false,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelDimensions {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub min_width: f64,
    pub min_height: f64,
    pub max_width: f64,
    pub max_height: f64,
}

impl Default for PanelDimensions {
    fn default() -> Self {
        Self {
            x: 50.0,
            y: 50.0,
            width: 400.0,
            height: 300.0,
            min_width: 200.0,
            min_height: 150.0,
            max_width: 1200.0,
            max_height: 800.0,
        }
    }
}

impl PanelDimensions {
    fn clamp_size(&mut self) {
        self.width = layout::clamp_extent(self.width, self.min_width, self.max_width);
        self.height = layout::clamp_extent(self.height, self.min_height, self.max_height);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelData {
    pub content: Value,
    pub content_type: String,
    pub timestamp: DateTime<Utc>,
    /// Bumped by every content update; starts at 1.
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    pub id: String,
    #[serde(rename = "type")]
    pub panel_type: PanelType,
    pub title: String,
    pub icon: String,
    pub show_toolbar: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<String>,
    pub state: PanelState,
    pub dimensions: PanelDimensions,
    pub data: PanelData,
}

// ---------------------------------------------------------------------------
// Overrides and partial updates
// ---------------------------------------------------------------------------

/// Values applied on top of the type defaults at creation.
#[derive(Debug, Clone, Default)]
pub struct PanelOverrides {
    pub id: Option<String>,
    pub title: Option<String>,
    pub stage_id: Option<String>,
    /// Used to render the title template.
    pub stage_name: Option<String>,
    pub state: Option<PanelState>,
    pub dimensions: Option<PanelDimensions>,
    pub content: Option<Value>,
}

impl PanelOverrides {
    pub fn for_stage(stage_id: impl Into<String>, stage_name: impl Into<String>) -> Self {
        Self {
            stage_id: Some(stage_id.into()),
            stage_name: Some(stage_name.into()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_dimensions(mut self, dimensions: PanelDimensions) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn with_content(mut self, content: Value) -> Self {
        self.content = Some(content);
        self
    }
}

/// Field-wise patch for [`PanelManager::update_panel`]. `None` leaves a field
/// alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelUpdate {
    pub title: Option<String>,
    pub visible: Option<bool>,
    pub minimized: Option<bool>,
    pub maximized: Option<bool>,
    pub pinned: Option<bool>,
    pub resizable: Option<bool>,
    pub draggable: Option<bool>,
    pub closable: Option<bool>,
    pub loading: Option<bool>,
    /// `Some(Some(msg))` marks the panel as failed, `Some(None)` clears it.
    pub error: Option<Option<String>>,
    pub stage_id: Option<Option<String>>,
}

impl PanelUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn visible(mut self, v: bool) -> Self {
        self.visible = Some(v);
        self
    }

    pub fn minimized(mut self, v: bool) -> Self {
        self.minimized = Some(v);
        self
    }

    pub fn maximized(mut self, v: bool) -> Self {
        self.maximized = Some(v);
        self
    }

    pub fn pinned(mut self, v: bool) -> Self {
        self.pinned = Some(v);
        self
    }

    pub fn loading(mut self, v: bool) -> Self {
        self.loading = Some(v);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    fn apply(self, panel: &mut Panel) {
        let state = &mut panel.state;
        if let Some(title) = self.title {
            panel.title = title;
        }
        if let Some(v) = self.visible {
            state.visible = v;
        }
        if let Some(v) = self.resizable {
            state.resizable = v;
        }
        if let Some(v) = self.draggable {
            state.draggable = v;
        }
        if let Some(v) = self.closable {
            state.closable = v;
        }
        if let Some(v) = self.pinned {
            state.pinned = v;
        }
        if let Some(v) = self.loading {
            state.loading = v;
        }
        // Minimized and maximized exclude each other; the last one set wins.
        if let Some(v) = self.minimized {
            state.minimized = v;
            if v {
                state.maximized = false;
            }
        }
        if let Some(v) = self.maximized {
            state.maximized = v;
            if v {
                state.minimized = false;
            }
        }
        if let Some(error) = self.error {
            state.has_error = error.is_some();
            state.error_message = error;
        }
        if let Some(stage_id) = self.stage_id {
            panel.stage_id = stage_id;
        }
    }
}

// ---------------------------------------------------------------------------
// PanelManager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanelManagerConfig {
    pub canvas_width: f64,
    pub canvas_height: f64,
    pub grid_columns: usize,
}

impl Default for PanelManagerConfig {
    fn default() -> Self {
        Self {
            canvas_width: 1920.0,
            canvas_height: 1080.0,
            grid_columns: 3,
        }
    }
}

pub struct PanelManager {
    registry: PanelTypeRegistry,
    config: PanelManagerConfig,
    panels: Mutex<Vec<Panel>>,
    events: Option<EventEmitter>,
    store: Option<Arc<PipelineStore>>,
}

impl PanelManager {
    pub fn new(registry: PanelTypeRegistry, config: PanelManagerConfig) -> Self {
        Self {
            registry,
            config,
            panels: Mutex::new(Vec::new()),
            events: None,
            store: None,
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_store(mut self, store: Arc<PipelineStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(&self) -> &PanelTypeRegistry {
        &self.registry
    }

    pub fn config(&self) -> PanelManagerConfig {
        self.config
    }

    pub fn available_types(&self) -> Vec<PanelType> {
        self.registry.available_types()
    }

    /// Create a fully initialised panel of `panel_type`. Nothing is stored
    /// when the type is unregistered or the requested id is taken.
    pub fn create_panel(&self, panel_type: PanelType, overrides: PanelOverrides) -> Result<Panel> {
        let panel = self.build_detached(panel_type, overrides)?;

        {
            let mut panels = self.lock()?;
            if panels.iter().any(|p| p.id == panel.id) {
                return Err(SynapseError::Validation(format!(
                    "panel id '{}' already exists",
                    panel.id
                )));
            }
            panels.push(panel.clone());
        }

        tracing::debug!(panel = %panel.id, panel_type = %panel_type, "panel created");
        self.publish_state(&panel);
        self.emit(PipelineEvent::PanelOpened {
            panel_id: panel.id.clone(),
            panel_type: panel_type.to_string(),
            stage_id: panel.stage_id.clone(),
        });
        Ok(panel)
    }

    pub fn update_panel(&self, id: &str, update: PanelUpdate) -> Result<Panel> {
        self.modify(id, |panel| update.apply(panel))
    }

    /// Replace a panel's content, bumping its version and timestamp. Without
    /// an explicit `content_type` the type is inferred from the content.
    pub fn update_panel_data(
        &self,
        id: &str,
        content: Value,
        content_type: Option<&str>,
    ) -> Result<Panel> {
        let content_type = content_type
            .map(str::to_string)
            .unwrap_or_else(|| content_type_of(&content));
        self.modify(id, |panel| {
            let now = Utc::now();
            panel.data = PanelData {
                content,
                content_type,
                timestamp: now.max(panel.data.timestamp),
                version: panel.data.version + 1,
            };
        })
    }

    /// Resize, clamping into the panel's min/max bounds. Out-of-range
    /// requests are clamped, never rejected.
    pub fn resize_panel(&self, id: &str, width: f64, height: f64) -> Result<Panel> {
        let canvas = self.config;
        let panel = self.modify(id, |panel| {
            let d = &mut panel.dimensions;
            d.width = width;
            d.height = height;
            d.clamp_size();
            d.x = layout::clamp_offset(d.x, d.width, canvas.canvas_width);
            d.y = layout::clamp_offset(d.y, d.height, canvas.canvas_height);
        })?;
        self.emit(PipelineEvent::PanelResized {
            panel_id: panel.id.clone(),
            width: panel.dimensions.width,
            height: panel.dimensions.height,
        });
        Ok(panel)
    }

    /// Move, clamping so the panel stays on the canvas.
    pub fn move_panel(&self, id: &str, x: f64, y: f64) -> Result<Panel> {
        let canvas = self.config;
        self.modify(id, |panel| {
            let d = &mut panel.dimensions;
            d.x = layout::clamp_offset(x, d.width, canvas.canvas_width);
            d.y = layout::clamp_offset(y, d.height, canvas.canvas_height);
        })
    }

    /// Remove a panel. Removing an unknown id is a no-op that returns `None`.
    pub fn remove_panel(&self, id: &str) -> Option<Panel> {
        let removed = {
            let mut panels = self.lock().ok()?;
            let pos = panels.iter().position(|p| p.id == id)?;
            panels.remove(pos)
        };
        tracing::debug!(panel = %id, "panel removed");
        self.emit(PipelineEvent::PanelClosed {
            panel_id: removed.id.clone(),
        });
        Some(removed)
    }

    /// Remove every panel. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed: Vec<Panel> = match self.lock() {
            Ok(mut panels) => panels.drain(..).collect(),
            Err(_) => return 0,
        };
        for panel in &removed {
            self.emit(PipelineEvent::PanelClosed {
                panel_id: panel.id.clone(),
            });
        }
        removed.len()
    }

    /// Swap the whole panel set, for loads that must not leave a mix of old
    /// and new panels behind.
    pub(crate) fn replace_all(&self, next: Vec<Panel>) -> Result<Vec<Panel>> {
        let previous = std::mem::replace(&mut *self.lock()?, next.clone());
        for panel in &next {
            self.publish_state(panel);
        }
        for panel in &previous {
            self.emit(PipelineEvent::PanelClosed {
                panel_id: panel.id.clone(),
            });
        }
        for panel in &next {
            self.emit(PipelineEvent::PanelOpened {
                panel_id: panel.id.clone(),
                panel_type: panel.panel_type.to_string(),
                stage_id: panel.stage_id.clone(),
            });
        }
        Ok(previous)
    }

    /// Build a panel from the registry defaults without storing it.
    pub(crate) fn build_detached(
        &self,
        panel_type: PanelType,
        overrides: PanelOverrides,
    ) -> Result<Panel> {
        let config = self.registry.get(panel_type)?;

        let mut dimensions = overrides.dimensions.unwrap_or_default();
        dimensions.clamp_size();
        dimensions.x = layout::clamp_offset(dimensions.x, dimensions.width, self.config.canvas_width);
        dimensions.y =
            layout::clamp_offset(dimensions.y, dimensions.height, self.config.canvas_height);

        let content = overrides.content.unwrap_or_else(|| Value::Array(Vec::new()));
        Ok(Panel {
            id: overrides
                .id
                .unwrap_or_else(|| format!("panel_{}", uuid::Uuid::new_v4().simple())),
            panel_type,
            title: overrides
                .title
                .unwrap_or_else(|| config.render_title(overrides.stage_name.as_deref())),
            icon: config.icon.clone(),
            show_toolbar: config.show_toolbar,
            stage_id: overrides.stage_id,
            state: overrides.state.unwrap_or_default(),
            dimensions,
            data: PanelData {
                content_type: content_type_of(&content),
                content,
                timestamp: Utc::now(),
                version: 1,
            },
        })
    }

    /// Lay out visible panels on an even grid over the canvas, in creation
    /// order. Cell sizes are clamped to each panel's bounds.
    pub fn arrange_grid(&self) -> Result<Vec<Panel>> {
        let mut panels = self.lock()?;
        let visible: Vec<usize> = panels
            .iter()
            .enumerate()
            .filter(|(_, p)| p.state.visible && !p.state.minimized)
            .map(|(i, _)| i)
            .collect();
        let cells = layout::grid_layout(
            visible.len(),
            self.config.canvas_width,
            self.config.canvas_height,
            self.config.grid_columns,
        );
        for (&i, Rect { x, y, width, height }) in visible.iter().zip(cells) {
            let d = &mut panels[i].dimensions;
            d.x = x;
            d.y = y;
            d.width = width;
            d.height = height;
            d.clamp_size();
        }
        Ok(visible.iter().map(|&i| panels[i].clone()).collect())
    }

    pub fn get(&self, id: &str) -> Option<Panel> {
        self.lock().ok()?.iter().find(|p| p.id == id).cloned()
    }

    /// All panels in creation order.
    pub fn panels(&self) -> Vec<Panel> {
        self.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn panels_for_stage(&self, stage_id: &str) -> Vec<Panel> {
        self.lock()
            .map(|panels| {
                panels
                    .iter()
                    .filter(|p| p.stage_id.as_deref() == Some(stage_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn modify<F>(&self, id: &str, f: F) -> Result<Panel>
    where
        F: FnOnce(&mut Panel),
    {
        let next = {
            let mut panels = self.lock()?;
            let panel = panels
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| SynapseError::PanelNotFound(id.to_string()))?;
            let mut next = panel.clone();
            f(&mut next);
            *panel = next.clone();
            next
        };
        self.publish_state(&next);
        Ok(next)
    }

    fn publish_state(&self, panel: &Panel) {
        let (Some(store), Some(stage_id)) = (&self.store, &panel.stage_id) else {
            return;
        };
        if let Err(e) = store.set_panel_state(stage_id, panel.state.clone()) {
            tracing::debug!(panel = %panel.id, error = %e, "panel state not published");
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Panel>>> {
        self.panels
            .lock()
            .map_err(|_| SynapseError::Other("panel set lock poisoned".into()))
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

impl Default for PanelManager {
    fn default() -> Self {
        Self::new(PanelTypeRegistry::with_defaults(), PanelManagerConfig::default())
    }
}

fn content_type_of(content: &Value) -> String {
    match content {
        Value::Array(items) if items.is_empty() => "text".to_string(),
        Value::Null => "text".to_string(),
        other => PanelType::detect(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn created_panel_is_fully_initialised() {
        let manager = PanelManager::default();
        let panel = manager
            .create_panel(PanelType::Timeline, PanelOverrides::default())
            .unwrap();

        assert!(panel.id.starts_with("panel_"));
        assert_eq!(panel.title, "Timeline");
        assert_eq!(panel.state, PanelState::default());
        assert!(panel.state.visible && panel.state.closable);
        assert!(!panel.state.loading && !panel.state.has_error);
        assert_eq!(panel.dimensions, PanelDimensions::default());
        assert_eq!(panel.data.version, 1);
        assert_eq!(panel.data.content_type, "text");
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn ids_are_unique() {
        let manager = PanelManager::default();
        let a = manager.create_panel(PanelType::Logs, PanelOverrides::default()).unwrap();
        let b = manager.create_panel(PanelType::Logs, PanelOverrides::default()).unwrap();
        assert_ne!(a.id, b.id);

        let err = manager
            .create_panel(PanelType::Logs, PanelOverrides::default().with_id(a.id.clone()))
            .unwrap_err();
        assert!(matches!(err, SynapseError::Validation(_)));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn unknown_type_creates_nothing() {
        let manager = PanelManager::new(PanelTypeRegistry::empty(), PanelManagerConfig::default());
        let err = manager
            .create_panel(PanelType::Graph, PanelOverrides::default())
            .unwrap_err();
        assert!(matches!(err, SynapseError::UnknownPanelType(_)));
        assert!(manager.is_empty());
    }

    #[test]
    fn resize_clamps_to_bounds() {
        let manager = PanelManager::default();
        let dims = PanelDimensions {
            min_width: 100.0,
            max_height: 800.0,
            ..PanelDimensions::default()
        };
        let panel = manager
            .create_panel(PanelType::Graph, PanelOverrides::default().with_dimensions(dims))
            .unwrap();

        let resized = manager.resize_panel(&panel.id, -50.0, 9999.0).unwrap();
        assert_eq!(resized.dimensions.width, 100.0);
        assert_eq!(resized.dimensions.height, 800.0);
    }

    #[test]
    fn move_clamps_to_canvas() {
        let manager = PanelManager::default();
        let panel = manager.create_panel(PanelType::Chart, PanelOverrides::default()).unwrap();

        let moved = manager.move_panel(&panel.id, -40.0, 5000.0).unwrap();
        assert_eq!(moved.dimensions.x, 0.0);
        assert_eq!(moved.dimensions.y, 1080.0 - 300.0);
    }

    #[test]
    fn update_merges_fields() {
        let manager = PanelManager::default();
        let panel = manager.create_panel(PanelType::Table, PanelOverrides::default()).unwrap();

        let updated = manager
            .update_panel(&panel.id, PanelUpdate::new().minimized(true).pinned(true))
            .unwrap();
        assert!(updated.state.minimized && updated.state.pinned);
        assert!(updated.state.visible);

        let updated = manager
            .update_panel(&panel.id, PanelUpdate::new().maximized(true).error("boom"))
            .unwrap();
        assert!(updated.state.maximized && !updated.state.minimized);
        assert!(updated.state.has_error);
        assert_eq!(updated.state.error_message.as_deref(), Some("boom"));

        let cleared = manager
            .update_panel(&panel.id, PanelUpdate::new().clear_error())
            .unwrap();
        assert!(!cleared.state.has_error && cleared.state.error_message.is_none());
        assert_eq!(manager.get(&panel.id).unwrap(), cleared);
    }

    #[test]
    fn data_updates_bump_version_and_timestamp() {
        let manager = PanelManager::default();
        let panel = manager.create_panel(PanelType::Graph, PanelOverrides::default()).unwrap();

        let v2 = manager
            .update_panel_data(&panel.id, json!({ "nodes": [], "edges": [] }), None)
            .unwrap();
        assert_eq!(v2.data.version, 2);
        assert_eq!(v2.data.content_type, "graph");
        assert!(v2.data.timestamp >= panel.data.timestamp);

        let v3 = manager
            .update_panel_data(&panel.id, json!("hello"), Some("markdown"))
            .unwrap();
        assert_eq!(v3.data.version, 3);
        assert_eq!(v3.data.content_type, "markdown");
        assert!(v3.data.timestamp >= v2.data.timestamp);
    }

    #[test]
    fn remove_is_idempotent() {
        let manager = PanelManager::default();
        let panel = manager.create_panel(PanelType::Logs, PanelOverrides::default()).unwrap();
        assert!(manager.remove_panel(&panel.id).is_some());
        assert!(manager.remove_panel(&panel.id).is_none());
        assert!(manager.remove_panel("never-existed").is_none());
        assert!(matches!(
            manager.update_panel(&panel.id, PanelUpdate::new()),
            Err(SynapseError::PanelNotFound(_))
        ));
    }

    #[test]
    fn stage_binding_and_lookup() {
        let manager = PanelManager::default();
        manager
            .create_panel(PanelType::AstTree, PanelOverrides::for_stage("parse", "Parse"))
            .unwrap();
        manager.create_panel(PanelType::Logs, PanelOverrides::default()).unwrap();

        let bound = manager.panels_for_stage("parse");
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].title, "AST Tree: Parse");
        assert!(manager.panels_for_stage("other").is_empty());
    }

    #[test]
    fn grid_arrangement_skips_hidden_panels() {
        let manager = PanelManager::new(
            PanelTypeRegistry::with_defaults(),
            PanelManagerConfig {
                canvas_width: 1200.0,
                canvas_height: 600.0,
                grid_columns: 2,
            },
        );
        let a = manager.create_panel(PanelType::Graph, PanelOverrides::default()).unwrap();
        let hidden = manager.create_panel(PanelType::Logs, PanelOverrides::default()).unwrap();
        let b = manager.create_panel(PanelType::Table, PanelOverrides::default()).unwrap();
        manager
            .update_panel(&hidden.id, PanelUpdate::new().visible(false))
            .unwrap();

        let arranged = manager.arrange_grid().unwrap();
        assert_eq!(arranged.len(), 2);
        assert_eq!(arranged[0].id, a.id);
        assert_eq!(arranged[1].id, b.id);
        assert_eq!(arranged[1].dimensions.x, 600.0);
        assert_eq!(arranged[1].dimensions.width, 600.0);
        assert_eq!(arranged[1].dimensions.height, 600.0);
        assert_eq!(manager.get(&hidden.id).unwrap().dimensions.x, 50.0);
    }

    #[tokio::test]
    async fn lifecycle_events_are_emitted() {
        let events = EventEmitter::new(16);
        let mut rx = events.subscribe();
        let manager = PanelManager::default().with_events(events);

        let panel = manager.create_panel(PanelType::Chart, PanelOverrides::default()).unwrap();
        manager.resize_panel(&panel.id, 500.0, 400.0).unwrap();
        manager.remove_panel(&panel.id);

        assert!(matches!(rx.recv().await.unwrap(), PipelineEvent::PanelOpened { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PipelineEvent::PanelResized { width, height, .. } if width == 500.0 && height == 400.0
        ));
        assert!(matches!(rx.recv().await.unwrap(), PipelineEvent::PanelClosed { .. }));
    }
}
