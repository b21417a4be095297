//! Simulation kernels, one module per subsystem.
//!
//! ## Frame phase order
//!
//! The frame loop runs these as a chained schedule of exclusive systems;
//! nothing in a later phase is visible to an earlier one within the same
//! frame:
//!
//! | # | Phase | Module |
//! |---|-------|--------|
//! | 1 | command drain/dispatch | `crate::commands` |
//! | 2 | special-subsystem clocks | `behaviors`, `battle_plan` |
//! | 3 | movement + crush | `movement` (`pathfind` under it) |
//! | 4 | combat + projectiles | `combat`, `projectile` |
//! | 5 | containers | `container` |
//! | 6 | production/construction/sell | `production` |
//! | 7 | upgrade dispatch | `upgrades` |
//! | 8 | fog of war | `crate::fog` |
//! | 9 | lifetimes, slow death, cleanup | `death` |
//! | 10 | event finalization | `crate::events` (drained by the host) |
//!
//! The skirmish evaluator (`skirmish`) runs inside phase 2 on its own
//! staggered cadences. Special powers (`special_power`) are command-driven
//! and execute during phase 1.
//!
//! Every kernel walks entities in ascending `ObjectId` order through
//! `EntityIndex`; that ordering plus the keyed RNG is what makes two runs
//! with identical inputs bit-identical.

pub mod battle_plan;
pub mod behaviors;
pub mod combat;
pub mod container;
pub mod death;
pub mod movement;
pub mod pathfind;
pub mod production;
pub mod projectile;
pub mod skirmish;
pub mod special_power;
pub mod upgrades;

pub use battle_plan::battle_plan_phase;
pub use behaviors::behavior_phase;
pub use combat::{combat_phase, PendingShots};
pub use container::container_phase;
pub use death::{cleanup_phase, lifetime_phase};
pub use movement::movement_phase;
pub use production::production_phase;
pub use skirmish::skirmish_phase;
pub use special_power::{
    LocalPlayer, SharedPowerTimers, SpecialPowerDispatch, SpecialPowerHooks, SpecialPowerRequest,
};
pub use upgrades::upgrade_phase;
