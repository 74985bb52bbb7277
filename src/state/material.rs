//! Material (calibration) state.
//!
//! A `MaterialState` is a measurement-only entity: an optically defined
//! well content with no biology underneath. It exists so the detector
//! chain can be characterized (dark frames, dye flats, bead counts)
//! without touching any vessel. There is deliberately no reference from
//! this type to `VesselState` or back.

use serde::{Deserialize, Serialize};

use crate::detector::N_CHANNELS;

/// What the calibration well contains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MaterialKind {
    /// Plain buffer: zero nominal signal, detector floor only ("dark" well)
    Buffer,
    /// Homogeneous dye solution: variance independent of amount
    DyeSolution,
    /// Bead suspension: relative variance scales as 1/sqrt(bead_count)
    BeadSuspension {
        /// Number of beads in the well
        bead_count: u64,
    },
}

/// Calibration well contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialState {
    /// Unique material identity (stream salt)
    pub material_id: String,
    /// Content class
    pub kind: MaterialKind,
    /// Nominal per-channel intensity in detector counts
    pub nominal_intensity: [f64; N_CHANNELS],
    /// Relative spatial/preparation variance at unit scale
    pub relative_variance: f64,
    /// Material-stream draw counter
    pub measurement_epoch: u64,
}

impl MaterialState {
    /// A dark (buffer-only) well: zero signal on every channel
    pub fn buffer(material_id: impl Into<String>) -> Self {
        Self {
            material_id: material_id.into(),
            kind: MaterialKind::Buffer,
            nominal_intensity: [0.0; N_CHANNELS],
            relative_variance: 0.0,
            measurement_epoch: 0,
        }
    }

    /// A homogeneous dye well with the given per-channel nominal counts
    pub fn dye(material_id: impl Into<String>, nominal_intensity: [f64; N_CHANNELS]) -> Self {
        Self {
            material_id: material_id.into(),
            kind: MaterialKind::DyeSolution,
            nominal_intensity,
            // Preparation-level pipetting variance, N-independent
            relative_variance: 0.02,
            measurement_epoch: 0,
        }
    }

    /// A bead suspension; counting statistics shrink with bead count
    pub fn beads(
        material_id: impl Into<String>,
        nominal_intensity: [f64; N_CHANNELS],
        bead_count: u64,
    ) -> Self {
        Self {
            material_id: material_id.into(),
            kind: MaterialKind::BeadSuspension { bead_count },
            nominal_intensity,
            relative_variance: 0.05,
            measurement_epoch: 0,
        }
    }

    /// Effective relative standard deviation of the prepared content.
    /// Dye is N-independent; beads follow counting statistics.
    pub fn content_rel_sd(&self) -> f64 {
        match self.kind {
            MaterialKind::Buffer => 0.0,
            MaterialKind::DyeSolution => self.relative_variance,
            MaterialKind::BeadSuspension { bead_count } => {
                let n = bead_count.max(1) as f64;
                self.relative_variance / n.sqrt() + 1.0 / n.sqrt()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_is_dark() {
        let buffer = MaterialState::buffer("B1");
        assert!(buffer.nominal_intensity.iter().all(|&v| v == 0.0));
        assert_eq!(buffer.content_rel_sd(), 0.0);
    }

    #[test]
    fn test_bead_variance_shrinks_with_count() {
        let few = MaterialState::beads("B1", [1000.0; N_CHANNELS], 100);
        let many = MaterialState::beads("B2", [1000.0; N_CHANNELS], 10_000);
        assert!(many.content_rel_sd() < few.content_rel_sd());
        // 100x beads => 10x smaller relative sd
        let ratio = few.content_rel_sd() / many.content_rel_sd();
        assert!((ratio - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_dye_variance_is_count_independent() {
        let dye = MaterialState::dye("D1", [500.0; N_CHANNELS]);
        assert!((dye.content_rel_sd() - 0.02).abs() < 1e-12);
    }
}
