//! Configuration module.
//!
//! Contains all tunable parameters for the simulation engine.

pub mod parameters;

pub use parameters::{
    BiologyParameters, DetectorParameters, NutrientParameters, Parameters, RealismParameters,
    StressParameters,
};
