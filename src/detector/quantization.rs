//! Analog-to-digital quantization.
//!
//! Dormant by default: with neither a step nor a bit depth configured the
//! stage is an exact passthrough, preserving pre-quantization behavior
//! bit-for-bit. When active it snaps to a lattice of `step` counts using
//! round-half-up (not banker's rounding), which makes the mapping
//! idempotent and monotone.

use serde::{Deserialize, Serialize};

use crate::engine::SimError;

/// Quantization settings; `default()` is dormant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    /// Explicit lattice step in counts; 0 means "not set"
    pub step: f64,
    /// ADC bit depth; 0 means "not set". Used with the channel ceiling
    /// when no explicit step is given.
    pub bit_depth: u32,
}

impl QuantizationConfig {
    /// Dormant configuration: exact passthrough
    pub fn disabled() -> Self {
        Self {
            step: 0.0,
            bit_depth: 0,
        }
    }

    /// Quantize on an explicit lattice step
    pub fn from_step(step: f64) -> Result<Self, SimError> {
        if !step.is_finite() || step < 0.0 {
            return Err(SimError::Validation(format!(
                "quantization step must be finite and non-negative, got {step}"
            )));
        }
        Ok(Self { step, bit_depth: 0 })
    }

    /// Quantize from an ADC bit depth; the step is derived from the
    /// channel ceiling at acquisition time. The ceiling must be positive.
    pub fn from_bit_depth(bit_depth: u32, ceiling: f64) -> Result<Self, SimError> {
        if !(ceiling > 0.0) {
            return Err(SimError::Validation(format!(
                "bit-depth quantization requires ceiling > 0, got {ceiling}"
            )));
        }
        Ok(Self {
            step: 0.0,
            bit_depth,
        })
    }

    /// Effective lattice step for a given ceiling; 0 means dormant
    pub fn effective_step(&self, ceiling: f64) -> f64 {
        if self.step > 0.0 {
            self.step
        } else if self.bit_depth > 0 && ceiling > 0.0 {
            let levels = 2f64.powi(self.bit_depth as i32) - 1.0;
            ceiling / levels
        } else {
            0.0
        }
    }

    /// Whether this configuration quantizes at all
    pub fn is_active(&self, ceiling: f64) -> bool {
        self.effective_step(ceiling) > 0.0
    }
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Snap to the lattice with round-half-up; `step <= 0` is passthrough
pub fn quantize(y: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return y;
    }
    (y / step + 0.5).floor() * step
}
