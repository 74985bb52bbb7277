//! Compound pharmacology: dose-response transfer functions.
//!
//! Translates (compound, dose, cell line) into the hazard-rate inputs
//! consumed by the growth/hazard integrator:
//! - a direct kill rate (Hill occupancy x max kill rate x toxicity scalar)
//! - per-axis stress drives (Hill occupancy x axis weight x potency scalar)
//!
//! Multiple simultaneous compounds combine additively per stress axis.
//! No synergy or antagonism is modeled; any compound pair needing a
//! different rule must be introduced as explicit configuration, not
//! inferred.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::state::{CompoundExposure, VesselState};

/// Dose-response parameters for one (compound, cell line) pairing
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompoundParams {
    /// Half-maximal concentration (uM)
    pub ec50_uM: f64,
    /// Hill slope (dimensionless, > 0)
    pub hill_slope: f64,
    /// Direct kill hazard at full occupancy (1/hr)
    pub max_kill_rate_per_hr: f64,
    /// Fraction of occupancy driving the ER-stress axis
    pub er_weight: f64,
    /// Fraction of occupancy driving the mitochondrial axis
    pub mito_weight: f64,
    /// Fraction of occupancy driving the transport axis
    pub transport_weight: f64,
}

/// Hazard-rate modifiers for one vessel at one instant
#[derive(Debug, Clone, Copy, Default)]
pub struct HazardInputs {
    /// Summed direct kill hazard across active compounds (1/hr)
    pub kill_rate_per_hr: f64,
    /// Summed ER-stress drive, clamped to [0, 1] downstream
    pub er_drive: f64,
    /// Summed mitochondrial drive
    pub mito_drive: f64,
    /// Summed transport drive
    pub transport_drive: f64,
}

/// Hill occupancy: dose^n / (dose^n + ec50^n), in [0, 1)
///
/// Zero or negative dose yields zero occupancy; EC50 is assumed positive
/// (validated at library-insert time).
pub fn hill(dose_uM: f64, ec50_uM: f64, slope: f64) -> f64 {
    if dose_uM <= 0.0 || ec50_uM <= 0.0 {
        return 0.0;
    }
    let ratio = (dose_uM / ec50_uM).powf(slope);
    ratio / (1.0 + ratio)
}

/// Lookup table of dose-response parameters.
///
/// Keys are (compound, cell line); a per-compound `"*"` entry is the
/// fallback for cell lines without a specific calibration. Ships with a
/// small built-in panel so the engine is usable without an external
/// parameter source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundLibrary {
    entries: BTreeMap<(String, String), CompoundParams>,
}

impl CompoundLibrary {
    /// Empty library
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Library pre-loaded with a reference tool-compound panel.
    ///
    /// EC50s are plausible order-of-magnitude values for tool compounds,
    /// not calibrated measurements; they exist to make synthetic data
    /// internally consistent.
    pub fn with_builtin_panel() -> Self {
        let mut lib = Self::new();
        // ER stressors
        lib.insert_default(
            "tunicamycin",
            CompoundParams {
                ec50_uM: 1.2,
                hill_slope: 1.6,
                max_kill_rate_per_hr: 0.06,
                er_weight: 1.0,
                mito_weight: 0.1,
                transport_weight: 0.2,
            },
        );
        lib.insert_default(
            "thapsigargin",
            CompoundParams {
                ec50_uM: 0.4,
                hill_slope: 1.8,
                max_kill_rate_per_hr: 0.08,
                er_weight: 1.0,
                mito_weight: 0.2,
                transport_weight: 0.1,
            },
        );
        // Mitochondrial poisons
        lib.insert_default(
            "oligomycin",
            CompoundParams {
                ec50_uM: 0.8,
                hill_slope: 1.4,
                max_kill_rate_per_hr: 0.05,
                er_weight: 0.05,
                mito_weight: 1.0,
                transport_weight: 0.1,
            },
        );
        lib.insert_default(
            "antimycin-a",
            CompoundParams {
                ec50_uM: 0.5,
                hill_slope: 1.5,
                max_kill_rate_per_hr: 0.07,
                er_weight: 0.05,
                mito_weight: 1.0,
                transport_weight: 0.05,
            },
        );
        // Broad kinase inhibitor, kills on several axes
        lib.insert_default(
            "staurosporine",
            CompoundParams {
                ec50_uM: 0.15,
                hill_slope: 2.0,
                max_kill_rate_per_hr: 0.12,
                er_weight: 0.4,
                mito_weight: 0.5,
                transport_weight: 0.3,
            },
        );
        // Secretory-pathway disruptor
        lib.insert_default(
            "brefeldin-a",
            CompoundParams {
                ec50_uM: 0.9,
                hill_slope: 1.3,
                max_kill_rate_per_hr: 0.04,
                er_weight: 0.5,
                mito_weight: 0.05,
                transport_weight: 1.0,
            },
        );
        // Vehicle control: inert at any plausible dose
        lib.insert_default(
            "dmso",
            CompoundParams {
                ec50_uM: 1.0e6,
                hill_slope: 1.0,
                max_kill_rate_per_hr: 0.001,
                er_weight: 0.01,
                mito_weight: 0.01,
                transport_weight: 0.01,
            },
        );
        lib
    }

    /// Register the fallback entry for a compound (any cell line)
    pub fn insert_default(&mut self, compound: &str, params: CompoundParams) {
        self.entries
            .insert((compound.to_string(), "*".to_string()), params);
    }

    /// Register a cell-line-specific calibration
    pub fn insert(&mut self, compound: &str, cell_line: &str, params: CompoundParams) {
        self.entries
            .insert((compound.to_string(), cell_line.to_string()), params);
    }

    /// Look up parameters for (compound, cell line), falling back to the
    /// compound's `"*"` entry. `None` means the compound is unknown.
    pub fn lookup(&self, compound: &str, cell_line: &str) -> Option<&CompoundParams> {
        self.entries
            .get(&(compound.to_string(), cell_line.to_string()))
            .or_else(|| self.entries.get(&(compound.to_string(), "*".to_string())))
    }

    /// Whether the compound has any entry at all
    pub fn contains(&self, compound: &str) -> bool {
        self.entries.keys().any(|(c, _)| c == compound)
    }

    /// Combine all active exposures on a vessel into hazard inputs.
    ///
    /// `ec50_multiplier` comes from the run context (reagent-lot potency
    /// shift). Contributions are summed per axis; drives are clamped by
    /// the stress dynamics, not here.
    pub fn hazard_inputs(&self, vessel: &VesselState, ec50_multiplier: f64) -> HazardInputs {
        let mut inputs = HazardInputs::default();
        for (compound, exposure) in &vessel.compounds {
            let Some(params) = self.lookup(compound, &vessel.cell_line) else {
                // Unknown compounds are rejected at treat time; an entry
                // surviving here without parameters contributes nothing.
                continue;
            };
            let occupancy = hill(
                exposure.dose_uM,
                params.ec50_uM * ec50_multiplier,
                params.hill_slope,
            );
            let engagement = occupancy * exposure.potency_scalar;
            inputs.kill_rate_per_hr +=
                occupancy * params.max_kill_rate_per_hr * exposure.toxicity_scalar;
            inputs.er_drive += engagement * params.er_weight;
            inputs.mito_drive += engagement * params.mito_weight;
            inputs.transport_drive += engagement * params.transport_weight;
        }
        inputs
    }
}

impl Default for CompoundLibrary {
    fn default() -> Self {
        Self::with_builtin_panel()
    }
}

/// A fresh exposure record at application time
pub fn exposure(dose_uM: f64, now_hr: f64, potency_scalar: f64, toxicity_scalar: f64) -> CompoundExposure {
    CompoundExposure {
        dose_uM,
        applied_at_hr: now_hr,
        potency_scalar,
        toxicity_scalar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DensityLevel, ResourcePools, StressState, VesselFormat};
    use std::collections::BTreeMap;

    fn test_vessel() -> VesselState {
        VesselState {
            vessel_id: "A1".into(),
            cell_line: "hepg2".into(),
            format: VesselFormat::Well96,
            density_level: DensityLevel::Standard,
            well_position: None,
            cell_count: 1e5,
            capacity: 1e6,
            viability: 0.97,
            passage_number: 1,
            death_ledger: Default::default(),
            stress: StressState::baseline(0.02),
            compounds: BTreeMap::new(),
            resources: ResourcePools {
                glucose_mM: 25.0,
                glutamine_mM: 4.0,
                volume_mL: 0.2,
                evaporated_mL: 0.0,
            },
            cells_lost_handling: 0.0,
            debris_cells: 0.0,
            seed_time_hr: 0.0,
            last_update_hr: 0.0,
            biology_epoch: 0,
            measurement_epoch: 0,
            superseded_by: None,
        }
    }

    #[test]
    fn test_hill_midpoint() {
        // Occupancy at EC50 is exactly 1/2 for any slope
        assert!((hill(1.0, 1.0, 1.0) - 0.5).abs() < 1e-12);
        assert!((hill(2.5, 2.5, 3.7) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_hill_monotone_and_bounded() {
        let mut prev = 0.0;
        for i in 0..100 {
            let dose = 0.01 * f64::from(i) * f64::from(i);
            let occ = hill(dose, 1.0, 1.5);
            assert!(occ >= prev);
            assert!((0.0..1.0).contains(&occ));
            prev = occ;
        }
        assert_eq!(hill(0.0, 1.0, 1.0), 0.0);
        assert_eq!(hill(-5.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_builtin_panel_lookup_and_fallback() {
        let lib = CompoundLibrary::with_builtin_panel();
        assert!(lib.contains("tunicamycin"));
        assert!(!lib.contains("nonexistol"));
        // Any cell line resolves through the "*" fallback
        assert!(lib.lookup("oligomycin", "u2os").is_some());
        assert!(lib.lookup("nonexistol", "u2os").is_none());
    }

    #[test]
    fn test_cell_line_override_wins() {
        let mut lib = CompoundLibrary::with_builtin_panel();
        let fallback_ec50 = lib.lookup("tunicamycin", "hepg2").unwrap().ec50_uM;
        lib.insert(
            "tunicamycin",
            "hepg2",
            CompoundParams {
                ec50_uM: fallback_ec50 * 10.0,
                hill_slope: 1.6,
                max_kill_rate_per_hr: 0.06,
                er_weight: 1.0,
                mito_weight: 0.1,
                transport_weight: 0.2,
            },
        );
        let specific = lib.lookup("tunicamycin", "hepg2").unwrap().ec50_uM;
        assert!((specific - fallback_ec50 * 10.0).abs() < 1e-12);
        // Other cell lines still see the fallback
        let other = lib.lookup("tunicamycin", "a549").unwrap().ec50_uM;
        assert!((other - fallback_ec50).abs() < 1e-12);
    }

    #[test]
    fn test_additive_combination_per_axis() {
        let lib = CompoundLibrary::with_builtin_panel();
        let mut vessel = test_vessel();

        vessel
            .compounds
            .insert("tunicamycin".into(), exposure(10.0, 0.0, 1.0, 1.0));
        let solo = lib.hazard_inputs(&vessel, 1.0);

        vessel
            .compounds
            .insert("oligomycin".into(), exposure(10.0, 0.0, 1.0, 1.0));
        let combined = lib.hazard_inputs(&vessel, 1.0);

        vessel.compounds.clear();
        vessel
            .compounds
            .insert("oligomycin".into(), exposure(10.0, 0.0, 1.0, 1.0));
        let other = lib.hazard_inputs(&vessel, 1.0);

        // Strict additivity, axis by axis
        assert!((combined.er_drive - (solo.er_drive + other.er_drive)).abs() < 1e-12);
        assert!((combined.mito_drive - (solo.mito_drive + other.mito_drive)).abs() < 1e-12);
        assert!(
            (combined.kill_rate_per_hr - (solo.kill_rate_per_hr + other.kill_rate_per_hr)).abs()
                < 1e-12
        );
    }

    #[test]
    fn test_potency_toxicity_decoupled() {
        let lib = CompoundLibrary::with_builtin_panel();
        let mut vessel = test_vessel();

        // Full mechanism engagement, zero lethality
        vessel
            .compounds
            .insert("tunicamycin".into(), exposure(10.0, 0.0, 1.0, 0.0));
        let inputs = lib.hazard_inputs(&vessel, 1.0);
        assert!(inputs.er_drive > 0.5);
        assert_eq!(inputs.kill_rate_per_hr, 0.0);

        // Zero engagement, full lethality
        vessel.compounds.clear();
        vessel
            .compounds
            .insert("tunicamycin".into(), exposure(10.0, 0.0, 0.0, 1.0));
        let inputs = lib.hazard_inputs(&vessel, 1.0);
        assert_eq!(inputs.er_drive, 0.0);
        assert!(inputs.kill_rate_per_hr > 0.0);
    }

    #[test]
    fn test_ec50_multiplier_shifts_potency() {
        let lib = CompoundLibrary::with_builtin_panel();
        let mut vessel = test_vessel();
        vessel
            .compounds
            .insert("tunicamycin".into(), exposure(1.2, 0.0, 1.0, 1.0));

        // Raising EC50 lowers occupancy at the same dose
        let nominal = lib.hazard_inputs(&vessel, 1.0);
        let weakened = lib.hazard_inputs(&vessel, 2.0);
        assert!(weakened.kill_rate_per_hr < nominal.kill_rate_per_hr);
    }
}
