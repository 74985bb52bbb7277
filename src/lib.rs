//! Culture Sim - synthetic cell-culture experiment engine
//!
//! This library simulates time-stepped wet-lab experiments: vessels are
//! seeded, dosed, washed, fed, passaged, and measured, and the engine
//! produces physically-consistent synthetic readouts through a detector
//! signal chain.
//!
//! Core guarantees (enforced by construction and by the test suite):
//! - Conservation: viable + tracked-death fractions sum to 1
//! - Monotonicity: death-ledger fields never decrease
//! - Determinism: identical (seed, operation sequence) replays bit-identically
//! - Stream independence: measurement draws never perturb biology draws

// Allow non-snake-case for unit suffixes in field names (mM, uM, mL, etc.)
// This follows the project convention of including units in names.
#![allow(non_snake_case)]

pub mod biology;
pub mod config;
pub mod context;
pub mod detector;
pub mod engine;
pub mod pharmacology;
pub mod rng;
pub mod state;

pub use config::Parameters;
pub use context::{BiologyModifiers, MeasurementModifiers, PlateFailure, RealismProfile, RunContext};
pub use detector::{AssayType, Channel, ChannelReading, QuantizationConfig, Reading, N_CHANNELS};
pub use engine::{MeasureRequest, SimError, SimulationEngine, VesselSelector};
pub use pharmacology::{CompoundLibrary, CompoundParams};
pub use rng::{RngPartition, StreamKind};
pub use state::{
    DeathLedger, DensityLevel, MaterialKind, MaterialState, StressState, VesselFormat,
    VesselState, WellPosition, DEATH_EPS,
};
