//! Simulation state data structures.
//!
//! `VesselState` is the biological entity; `MaterialState` is the
//! calibration-only optical entity. The two are deliberately unrelated
//! types: a material measurement cannot touch a vessel, or vice versa.

pub mod material;
pub mod vessel;

pub use material::{MaterialKind, MaterialState};
pub use vessel::{
    CompoundExposure, DeathLedger, DensityLevel, ResourcePools, StressState, VesselFormat,
    VesselState, WellPosition, DEATH_EPS,
};
