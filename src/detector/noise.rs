//! Additive detector noise floor.
//!
//! Every channel picks up read noise after the optical stages. The floor
//! must be non-degenerate: positive variance always, and a positive mean
//! when the detector-bias feature is enabled. A dark well therefore still
//! produces measurably distinct readings - a zero-mean, zero-variance
//! floor is a contract violation, not a configuration choice.

use rand_chacha::ChaCha12Rng;
use rand_distr::{Distribution, Normal};

use crate::config::DetectorParameters;
use crate::engine::SimError;

/// One additive noise-floor draw in detector counts.
///
/// `inflation` (>= 1) comes from the run context's measurement view.
pub fn noise_floor_draw(
    cfg: &DetectorParameters,
    inflation: f64,
    rng: &mut ChaCha12Rng,
) -> Result<f64, SimError> {
    let sd = cfg.noise_floor_sd * inflation;
    if !(sd > 0.0) || !sd.is_finite() {
        return Err(SimError::Validation(format!(
            "noise floor sd must be positive and finite, got {sd}"
        )));
    }
    let mean = if cfg.detector_bias_enabled {
        cfg.noise_floor_mean
    } else {
        0.0
    };
    if cfg.detector_bias_enabled && !(mean > 0.0) {
        return Err(SimError::Validation(format!(
            "detector bias enabled but noise floor mean is {mean}"
        )));
    }
    let dist = Normal::new(mean, sd).map_err(|e| SimError::Validation(e.to_string()))?;
    Ok(dist.sample(rng))
}
