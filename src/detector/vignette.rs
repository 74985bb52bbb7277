//! Spatial vignette model.
//!
//! Optical throughput falls off from the plate center toward the edge.
//! The falloff is deterministic (no randomness), purely a function of
//! well position, and achromatic: every channel is scaled by the same
//! ratio, so channel ratios are preserved.

use crate::state::{VesselFormat, WellPosition};

/// Multiplicative vignette factor in (0, 1].
///
/// Quadratic radial falloff: 1 at the plate center, `1 - strength` at the
/// farthest corner. Monotone non-increasing in radial distance.
pub fn vignette_factor(position: WellPosition, format: VesselFormat, strength: f64) -> f64 {
    let r = position.radial_fraction(format);
    (1.0 - strength * r * r).max(0.0)
}
