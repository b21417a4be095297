//! Visual event bus.
//!
//! Subsystems push structured events during the frame; the host drains them
//! after each `step`. The core never renders or plays audio itself.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use crate::components::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisualEventKind {
    WeaponImpact,
    ProjectileLaunched,
    StatusChange,
    Death,
    CaveIn,
    BuildComplete,
    ConstructionComplete,
    UpgradeComplete,
    SpecialPower,
    Sold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualEvent {
    #[serde(rename = "type")]
    pub kind: VisualEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_entity_id: Option<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub victim_entity_id: Option<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<(f32, f32, f32)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weapon_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl VisualEvent {
    pub fn weapon_impact(
        source: ObjectId,
        victim: Option<ObjectId>,
        position: (f32, f32, f32),
        weapon_name: &str,
    ) -> Self {
        Self {
            kind: VisualEventKind::WeaponImpact,
            source_entity_id: Some(source),
            victim_entity_id: victim,
            position: Some(position),
            weapon_name: Some(weapon_name.to_string()),
            detail: None,
        }
    }

    pub fn death(victim: ObjectId, position: (f32, f32, f32)) -> Self {
        Self {
            kind: VisualEventKind::Death,
            source_entity_id: None,
            victim_entity_id: Some(victim),
            position: Some(position),
            weapon_name: None,
            detail: None,
        }
    }

    pub fn simple(kind: VisualEventKind, source: ObjectId) -> Self {
        Self {
            kind,
            source_entity_id: Some(source),
            victim_entity_id: None,
            position: None,
            weapon_name: None,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

/// Frame-scoped event buffer.
#[derive(Resource, Debug, Default)]
pub struct VisualEventBus {
    events: Vec<VisualEvent>,
}

impl VisualEventBus {
    pub fn emit(&mut self, event: VisualEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<VisualEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VisualEvent> {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_empties_bus() {
        let mut bus = VisualEventBus::default();
        bus.emit(VisualEvent::death(ObjectId(3), (1.0, 0.0, 2.0)));
        bus.emit(VisualEvent::simple(VisualEventKind::BuildComplete, ObjectId(1)));
        let drained = bus.drain();
        assert_eq!(drained.len(), 2);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_event_json_shape() {
        let event = VisualEvent::weapon_impact(ObjectId(1), Some(ObjectId(2)), (3.0, 0.0, 4.0), "TANKGUN");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"WEAPON_IMPACT\""));
        assert!(json.contains("\"sourceEntityId\":1"));
        assert!(json.contains("\"weaponName\":\"TANKGUN\""));
    }
}
