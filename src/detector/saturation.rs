//! Detector saturation model.
//!
//! A real camera does not hard-clip: response is linear up to a knee and
//! then compresses smoothly toward the full-well ceiling. The transfer
//! here is identity at or below the knee, tanh-compressive above it, with
//! a continuous first derivative at the knee (tanh'(0) = 1), monotone
//! everywhere, and asymptotic to the ceiling without reaching it.
//!
//! Inputs are detector counts and assumed non-negative (the noise stage
//! clamps at zero before this stage runs).

/// Smooth compressive saturation bounded in [0, ceiling]
pub fn saturate(y: f64, ceiling: f64, knee_frac: f64) -> f64 {
    let knee = ceiling * knee_frac;
    if y <= knee {
        return y.max(0.0);
    }
    let span = ceiling - knee;
    if span <= 0.0 {
        // knee_frac >= 1 degenerates to a hard ceiling
        return y.min(ceiling);
    }
    knee + span * ((y - knee) / span).tanh()
}
