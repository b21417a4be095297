//! Per-side (player) state: credits, power, radar, sciences, upgrades.
//!
//! Sides are keyed by normalized lower-case side name in a BTreeMap so that
//! every per-side sweep runs in the same order every frame.

use std::collections::{BTreeMap, BTreeSet};

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayerType {
    #[default]
    Human,
    Computer,
}

/// 0 = enemies, 1 = neutral, 2 = allies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Relationship {
    Enemies = 0,
    Neutral = 1,
    Allies = 2,
}

impl Relationship {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Neutral,
            2 => Self::Allies,
            _ => Self::Enemies,
        }
    }
}

/// A `CostModifierUpgrade` in effect for a side.
#[derive(Debug, Clone, Default)]
pub struct CostModifier {
    pub kind_of: Vec<String>,
    /// Percent delta; -10 makes matching production 10% cheaper.
    pub percentage: f32,
}

#[derive(Debug, Clone)]
pub struct SideState {
    pub name: String,
    pub credits: i64,
    pub player_type: PlayerType,
    relationships: BTreeMap<String, u8>,
    pub power_production: i32,
    pub power_consumption: i32,
    pub power_bonus: i32,
    pub radar_count: i32,
    pub radar_disable_proof_count: i32,
    pub sciences: BTreeSet<String>,
    pub science_purchase_points: i32,
    pub upgrades_completed: BTreeSet<String>,
    pub upgrades_in_production: BTreeSet<String>,
    pub cost_modifiers: Vec<CostModifier>,
    pub beacon_count: u32,
    pub skirmish_enabled: bool,
    /// Stable index assigned at creation, used by the spatial grid.
    pub index: u8,
}

impl SideState {
    fn new(name: String, index: u8) -> Self {
        Self {
            name,
            credits: 0,
            player_type: PlayerType::Human,
            relationships: BTreeMap::new(),
            power_production: 0,
            power_consumption: 0,
            power_bonus: 0,
            radar_count: 0,
            radar_disable_proof_count: 0,
            sciences: BTreeSet::new(),
            science_purchase_points: 0,
            upgrades_completed: BTreeSet::new(),
            upgrades_in_production: BTreeSet::new(),
            cost_modifiers: Vec::new(),
            beacon_count: 0,
            skirmish_enabled: false,
            index,
        }
    }

    pub fn relationship_to(&self, other: &str) -> Relationship {
        if other == self.name {
            return Relationship::Allies;
        }
        self.relationships
            .get(other)
            .copied()
            .map(Relationship::from_u8)
            .unwrap_or(Relationship::Enemies)
    }

    pub fn set_relationship(&mut self, other: &str, relationship: Relationship) {
        self.relationships
            .insert(other.to_string(), relationship as u8);
    }

    /// Credit, saturating at zero for negative deltas.
    pub fn add_credits(&mut self, delta: i64) {
        self.credits = (self.credits + delta).max(0);
    }

    /// Debit only if affordable. Exactly-once semantics are the caller's job.
    pub fn try_debit(&mut self, amount: i64) -> bool {
        if amount < 0 || self.credits < amount {
            return false;
        }
        self.credits -= amount;
        true
    }

    pub fn has_power_brownout(&self) -> bool {
        self.power_production + self.power_bonus < self.power_consumption
    }

    /// Radar goes dark in a brownout unless a disable-proof radar remains.
    pub fn radar_disabled(&self) -> bool {
        self.has_power_brownout() && self.radar_disable_proof_count == 0
    }

    pub fn radar_active(&self) -> bool {
        self.radar_count > 0 && !self.radar_disabled()
    }

    pub fn has_science(&self, science: &str) -> bool {
        self.sciences.contains(science)
    }

    pub fn has_upgrade(&self, upgrade: &str) -> bool {
        self.upgrades_completed.contains(upgrade)
    }

    /// Production cost multiplier for an object with these kind flags.
    pub fn cost_multiplier(&self, kind_of: &BTreeSet<String>) -> f32 {
        let mut multiplier = 1.0;
        for modifier in &self.cost_modifiers {
            if modifier.kind_of.iter().any(|k| kind_of.contains(k)) {
                multiplier *= 1.0 + modifier.percentage / 100.0;
            }
        }
        multiplier
    }
}

/// The side table. Sides materialize on first reference.
#[derive(Resource, Debug, Clone, Default)]
pub struct SideTable {
    sides: BTreeMap<String, SideState>,
    next_index: u8,
}

impl SideTable {
    pub fn ensure(&mut self, side: &str) -> &mut SideState {
        if !self.sides.contains_key(side) {
            let index = self.next_index;
            self.next_index = self.next_index.saturating_add(1);
            self.sides
                .insert(side.to_string(), SideState::new(side.to_string(), index));
        }
        self.sides.get_mut(side).expect("side just inserted")
    }

    pub fn get(&self, side: &str) -> Option<&SideState> {
        self.sides.get(side)
    }

    pub fn get_mut(&mut self, side: &str) -> Option<&mut SideState> {
        self.sides.get_mut(side)
    }

    pub fn relationship(&self, a: &str, b: &str) -> Relationship {
        if a == b {
            return Relationship::Allies;
        }
        self.sides
            .get(a)
            .map(|s| s.relationship_to(b))
            .unwrap_or(Relationship::Enemies)
    }

    pub fn names(&self) -> Vec<String> {
        self.sides.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SideState)> {
        self.sides.iter()
    }

    pub fn side_index(&self, side: &str) -> u8 {
        self.sides.get(side).map(|s| s.index).unwrap_or(u8::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_relationship_is_enemies() {
        let mut table = SideTable::default();
        table.ensure("america");
        table.ensure("china");
        assert_eq!(table.relationship("america", "china"), Relationship::Enemies);
        assert_eq!(table.relationship("america", "america"), Relationship::Allies);
    }

    #[test]
    fn test_set_relationship() {
        let mut table = SideTable::default();
        table.ensure("america");
        table.ensure("china");
        table
            .get_mut("america")
            .unwrap()
            .set_relationship("china", Relationship::Allies);
        assert_eq!(table.relationship("america", "china"), Relationship::Allies);
        // One-directional until the other side is set too.
        assert_eq!(table.relationship("china", "america"), Relationship::Enemies);
    }

    #[test]
    fn test_credits_clamp_at_zero() {
        let mut table = SideTable::default();
        let side = table.ensure("gla");
        side.add_credits(100);
        side.add_credits(-500);
        assert_eq!(side.credits, 0);
        assert!(!side.try_debit(1));
        side.add_credits(50);
        assert!(side.try_debit(50));
        assert_eq!(side.credits, 0);
    }

    #[test]
    fn test_brownout_and_radar() {
        let mut table = SideTable::default();
        let side = table.ensure("china");
        side.radar_count = 1;
        side.power_production = 5;
        side.power_consumption = 10;
        assert!(side.has_power_brownout());
        assert!(side.radar_disabled());
        side.radar_disable_proof_count = 1;
        assert!(!side.radar_disabled());
        side.power_bonus = 5;
        assert!(!side.has_power_brownout());
    }

    #[test]
    fn test_cost_multiplier_matches_kind() {
        let mut table = SideTable::default();
        let side = table.ensure("america");
        side.cost_modifiers.push(CostModifier {
            kind_of: vec!["AIRCRAFT".to_string()],
            percentage: -20.0,
        });
        let mut kinds = BTreeSet::new();
        kinds.insert("AIRCRAFT".to_string());
        assert!((side.cost_multiplier(&kinds) - 0.8).abs() < 1e-6);
        let mut other = BTreeSet::new();
        other.insert("VEHICLE".to_string());
        assert_eq!(side.cost_multiplier(&other), 1.0);
    }
}
