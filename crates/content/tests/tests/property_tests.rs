#[path = "property/generalization_chains.rs"]
mod generalization_chains;

#[path = "property/fallback_resolution.rs"]
mod fallback_resolution;
