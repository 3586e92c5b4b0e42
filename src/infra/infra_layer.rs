// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

#[path = "leveling/leveling_store.rs"]
pub mod leveling;

#[path = "economy/mod.rs"]
pub mod economy;

#[path = "mee6/mod.rs"]
pub mod mee6;

#[path = "tatsu/mod.rs"]
pub mod tatsu;
