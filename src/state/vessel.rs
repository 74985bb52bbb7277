//! Vessel state data structures.
//!
//! One `VesselState` per physical well or flask. The engine exclusively
//! owns and mutates these; callers interact only through operations.
//!
//! The central contract is the conservation identity: at all times,
//! `viability + death_ledger.total()` equals 1 within `DEATH_EPS`.
//! Cells removed by handling (aspiration) or shed as debris leave
//! `cell_count` but are never credited to the death ledger - detachment
//! is not death.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tolerance on the conservation identity `viability + ledger = 1`
pub const DEATH_EPS: f64 = 1e-6;

/// Physical vessel format
///
/// Carries the plate geometry used by the vignette and edge-effect models
/// and the working volume used by nutrient bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VesselFormat {
    Well384,
    Well96,
    Well24,
    Well6,
    FlaskT25,
    FlaskT75,
}

impl VesselFormat {
    /// Plate grid (rows, cols); flasks are a single compartment
    pub fn grid(self) -> (u16, u16) {
        match self {
            VesselFormat::Well384 => (16, 24),
            VesselFormat::Well96 => (8, 12),
            VesselFormat::Well24 => (4, 6),
            VesselFormat::Well6 => (2, 3),
            VesselFormat::FlaskT25 | VesselFormat::FlaskT75 => (1, 1),
        }
    }

    /// Working media volume per vessel (mL)
    pub fn working_volume_mL(self) -> f64 {
        match self {
            VesselFormat::Well384 => 0.05,
            VesselFormat::Well96 => 0.2,
            VesselFormat::Well24 => 1.0,
            VesselFormat::Well6 => 2.0,
            VesselFormat::FlaskT25 => 5.0,
            VesselFormat::FlaskT75 => 12.0,
        }
    }
}

/// Seeding density level; shifts attachment lag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DensityLevel {
    Low,
    Standard,
    High,
}

impl DensityLevel {
    /// Multiplier applied to the lag-phase time constant
    pub fn lag_multiplier(self) -> f64 {
        match self {
            DensityLevel::Low => 1.4,
            DensityLevel::Standard => 1.0,
            DensityLevel::High => 0.7,
        }
    }
}

/// Zero-based plate coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WellPosition {
    pub row: u16,
    pub col: u16,
}

impl WellPosition {
    pub fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }

    /// Normalized radial distance from plate center, 0 at center, 1 at the
    /// farthest corner. Collapses to 0 for single-compartment formats.
    pub fn radial_fraction(self, format: VesselFormat) -> f64 {
        let (rows, cols) = format.grid();
        if rows <= 1 && cols <= 1 {
            return 0.0;
        }
        let cy = f64::from(rows - 1) / 2.0;
        let cx = f64::from(cols - 1) / 2.0;
        let dy = f64::from(self.row) - cy;
        let dx = f64::from(self.col) - cx;
        let r = (dx * dx + dy * dy).sqrt();
        let r_max = (cx * cx + cy * cy).sqrt();
        if r_max > 0.0 {
            r / r_max
        } else {
            0.0
        }
    }

    /// Whether the well sits on the outer ring of the plate
    pub fn is_edge(self, format: VesselFormat) -> bool {
        let (rows, cols) = format.grid();
        if rows <= 1 && cols <= 1 {
            return false;
        }
        self.row == 0 || self.col == 0 || self.row == rows - 1 || self.col == cols - 1
    }
}

/// Cumulative death fractions by cause
///
/// Every field is non-negative and monotone non-decreasing over the life
/// of a vessel. Increments come only from hazard integration; nothing
/// else may write these fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeathLedger {
    /// Compound-induced (direct kill term of active compounds)
    pub compound: f64,
    /// Nutrient starvation
    pub starvation: f64,
    /// ER-stress axis crossing its hazard threshold
    pub er_stress: f64,
    /// Mitochondrial dysfunction axis
    pub mitochondrial: f64,
    /// Contact inhibition at high confluence
    pub confluence: f64,
    /// Basal, unattributed death (includes inoculum dead fraction)
    pub background: f64,
}

impl DeathLedger {
    /// Sum of all tracked death fractions
    pub fn total(&self) -> f64 {
        self.compound
            + self.starvation
            + self.er_stress
            + self.mitochondrial
            + self.confluence
            + self.background
    }

    /// All fields as (name, value) pairs, for monotonicity checks
    pub fn fields(&self) -> [(&'static str, f64); 6] {
        [
            ("compound", self.compound),
            ("starvation", self.starvation),
            ("er_stress", self.er_stress),
            ("mitochondrial", self.mitochondrial),
            ("confluence", self.confluence),
            ("background", self.background),
        ]
    }
}

/// Latent stress axes, each in [0, 1]
///
/// These evolve under compound drive and decay after washout; they feed
/// both the death hazards and the optical channel projections.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StressState {
    pub er_stress: f64,
    pub mito_dysfunction: f64,
    pub transport_dysfunction: f64,
}

impl StressState {
    pub fn baseline(level: f64) -> Self {
        Self {
            er_stress: level,
            mito_dysfunction: level,
            transport_dysfunction: level,
        }
    }
}

/// Media and volume bookkeeping
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourcePools {
    /// Glucose concentration (mM)
    pub glucose_mM: f64,
    /// Glutamine concentration (mM)
    pub glutamine_mM: f64,
    /// Current media volume (mL)
    pub volume_mL: f64,
    /// Cumulative evaporated volume since last feed (mL)
    pub evaporated_mL: f64,
}

/// Active compound exposure in a vessel
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompoundExposure {
    /// Current media concentration (uM)
    pub dose_uM: f64,
    /// Simulation time at application (hr)
    pub applied_at_hr: f64,
    /// Scales mechanism engagement (stress drive), default 1.0
    pub potency_scalar: f64,
    /// Scales the direct kill rate, default 1.0
    pub toxicity_scalar: f64,
}

/// Complete state of one culture vessel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VesselState {
    /// Unique vessel identity
    pub vessel_id: String,
    /// Cell line identity, keys the compound library
    pub cell_line: String,
    /// Physical format
    pub format: VesselFormat,
    /// Seeding density level
    pub density_level: DensityLevel,
    /// Assigned plate coordinate, if any
    pub well_position: Option<WellPosition>,

    /// Adherent cells, viable plus dead (count)
    pub cell_count: f64,
    /// Carrying capacity of the vessel (count)
    pub capacity: f64,
    /// Viable fraction of `cell_count`, in [0, 1]
    pub viability: f64,
    /// Passage number, incremented by `passage`
    pub passage_number: u32,

    /// Cumulative death fractions by cause
    pub death_ledger: DeathLedger,
    /// Latent stress axes
    pub stress: StressState,
    /// Active compound exposures keyed by compound name.
    /// BTreeMap: deterministic iteration order matters for replay.
    pub compounds: BTreeMap<String, CompoundExposure>,
    /// Media and volume state
    pub resources: ResourcePools,

    /// Cells removed by handling (aspirated, leave the well)
    pub cells_lost_handling: f64,
    /// Detached/fragmented cells still in the well
    pub debris_cells: f64,

    /// Simulation time of seeding or passage (hr)
    pub seed_time_hr: f64,
    /// Simulation time of the most recent state update (hr)
    pub last_update_hr: f64,

    /// Biology-stream draw counter (advances on time integration)
    pub biology_epoch: u64,
    /// Measurement-stream draw counter (advances on measure)
    pub measurement_epoch: u64,

    /// Set when this vessel has been passaged into a successor
    pub superseded_by: Option<String>,
}

impl VesselState {
    /// Viable adherent cells (count)
    pub fn viable_cells(&self) -> f64 {
        self.cell_count * self.viability
    }

    /// Fraction of capacity occupied
    pub fn confluence(&self) -> f64 {
        if self.capacity > 0.0 {
            (self.cell_count / self.capacity).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Signed deviation of the conservation identity from 1.
    /// Zero within `DEATH_EPS` is healthy; anything larger is a defect.
    pub fn conservation_deviation(&self) -> f64 {
        self.viability + self.death_ledger.total() - 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radial_fraction_bounds() {
        let format = VesselFormat::Well96;
        let center = WellPosition::new(3, 5); // near (3.5, 5.5)
        let corner = WellPosition::new(0, 0);
        assert!(center.radial_fraction(format) < 0.2);
        assert!((corner.radial_fraction(format) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_edge_detection() {
        let format = VesselFormat::Well96;
        assert!(WellPosition::new(0, 5).is_edge(format));
        assert!(WellPosition::new(7, 5).is_edge(format));
        assert!(WellPosition::new(3, 0).is_edge(format));
        assert!(!WellPosition::new(3, 5).is_edge(format));
        assert!(!WellPosition::new(0, 0).is_edge(VesselFormat::FlaskT25));
    }

    #[test]
    fn test_ledger_total() {
        let ledger = DeathLedger {
            compound: 0.1,
            starvation: 0.05,
            er_stress: 0.02,
            mitochondrial: 0.01,
            confluence: 0.0,
            background: 0.03,
        };
        assert!((ledger.total() - 0.21).abs() < 1e-12);
        assert_eq!(ledger.fields().len(), 6);
    }

    #[test]
    fn test_flask_has_no_geometry() {
        let pos = WellPosition::new(0, 0);
        assert!((pos.radial_fraction(VesselFormat::FlaskT75)).abs() < 1e-12);
    }
}
