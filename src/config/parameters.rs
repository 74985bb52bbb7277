//! Parameter structures for the simulation engine.
//!
//! Defaults are tuned to produce plausible adherent-culture kinetics
//! (roughly 24 h doubling, DMEM-like media) and 16-bit camera readouts.
//! All rates are per hour; concentrations carry their unit in the name.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::detector::QuantizationConfig;

/// Top-level parameters container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameters {
    /// Growth and death kinetics
    pub biology: BiologyParameters,
    /// Media/nutrient pool dynamics
    pub nutrients: NutrientParameters,
    /// Latent stress-axis dynamics
    pub stress: StressParameters,
    /// Detector signal-chain settings
    pub detector: DetectorParameters,
    /// Realism-layer (run context) settings
    pub realism: RealismParameters,
}

impl Parameters {
    /// Load parameters from JSON files, or use defaults if files don't exist
    pub fn load_or_default() -> Self {
        Self::load_from_dir("data/parameters")
    }

    /// Load parameters from a specific directory
    pub fn load_from_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            biology: load_section(dir.join("biology.json"), "biology"),
            nutrients: load_section(dir.join("nutrients.json"), "nutrients"),
            stress: load_section(dir.join("stress.json"), "stress"),
            detector: load_section(dir.join("detector.json"), "detector"),
            realism: load_section(dir.join("realism.json"), "realism"),
        }
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            biology: BiologyParameters::default(),
            nutrients: NutrientParameters::default(),
            stress: StressParameters::default(),
            detector: DetectorParameters::default(),
            realism: RealismParameters::default(),
        }
    }
}

/// Load one parameter section from a JSON file or fall back to defaults
fn load_section<T, P>(path: P, name: &str) -> T
where
    T: serde::de::DeserializeOwned + Default,
    P: AsRef<Path>,
{
    match std::fs::read_to_string(path.as_ref()) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(params) => {
                log::info!("Loaded {} parameters from {:?}", name, path.as_ref());
                params
            }
            Err(e) => {
                log::warn!("Failed to parse {} parameters: {}, using defaults", name, e);
                T::default()
            }
        },
        Err(_) => {
            log::info!("{} parameters file not found, using defaults", name);
            T::default()
        }
    }
}

/// Growth and death kinetics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiologyParameters {
    /// Baseline specific growth rate (1/hr)
    /// ln(2)/24 for a 24 h population doubling time
    pub base_growth_rate_per_hr: f64,
    /// Lag-phase time constant after seeding or passage (hr)
    pub lag_tau_hr: f64,
    /// Growth-rate penalty applied to edge wells (fraction, 0 = none)
    pub edge_growth_penalty: f64,
    /// Basal (unattributed) death hazard (1/hr)
    pub basal_death_rate_per_hr: f64,
    /// Confluence above which contact-inhibition death engages
    pub confluence_hazard_threshold: f64,
    /// Maximum confluence-limited death hazard (1/hr)
    pub confluence_hazard_rate_per_hr: f64,
    /// Sigma of the multiplicative log-normal growth jitter (per step)
    pub growth_jitter_sigma: f64,
    /// Maximum internal integration sub-step (hr); larger dt is chunked
    pub max_substep_hr: f64,
    /// Viable fraction of a fresh inoculum (seed and passage)
    pub seeding_viability: f64,
    /// Fraction of viable cells that reattach after a passage
    pub passage_attach_efficiency: f64,
}

impl Default for BiologyParameters {
    fn default() -> Self {
        Self {
            base_growth_rate_per_hr: 0.028_881, // ln(2)/24
            lag_tau_hr: 6.0,
            edge_growth_penalty: 0.12,
            basal_death_rate_per_hr: 0.0008,
            confluence_hazard_threshold: 0.95,
            confluence_hazard_rate_per_hr: 0.02,
            growth_jitter_sigma: 0.03,
            max_substep_hr: 1.0,
            seeding_viability: 0.97,
            passage_attach_efficiency: 0.90,
        }
    }
}

/// Media/nutrient pool dynamics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NutrientParameters {
    /// Fresh-media glucose concentration (mM), DMEM high glucose
    pub glucose_fresh_mM: f64,
    /// Fresh-media glutamine concentration (mM)
    pub glutamine_fresh_mM: f64,
    /// Glucose consumption (mM per hr per 1e6 viable cells per mL)
    pub glucose_uptake_mM_per_hr: f64,
    /// Glutamine consumption (mM per hr per 1e6 viable cells per mL)
    pub glutamine_uptake_mM_per_hr: f64,
    /// Glucose level below which starvation hazard ramps in (mM)
    pub glucose_starvation_mM: f64,
    /// Glutamine level below which starvation hazard ramps in (mM)
    pub glutamine_starvation_mM: f64,
    /// Starvation death hazard at full depletion (1/hr)
    pub starvation_max_hazard_per_hr: f64,
    /// Fractional volume lost to evaporation (1/hr)
    pub evaporation_rate_per_hr: f64,
}

impl Default for NutrientParameters {
    fn default() -> Self {
        Self {
            glucose_fresh_mM: 25.0,
            glutamine_fresh_mM: 4.0,
            glucose_uptake_mM_per_hr: 0.35,
            glutamine_uptake_mM_per_hr: 0.07,
            glucose_starvation_mM: 2.0,
            glutamine_starvation_mM: 0.3,
            starvation_max_hazard_per_hr: 0.05,
            evaporation_rate_per_hr: 0.0010,
        }
    }
}

/// Latent stress-axis dynamics
///
/// Each axis relaxes toward a compound-driven target with its own
/// on/off time constant and contributes a death hazard above threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressParameters {
    /// ER-stress rise time constant under drive (hr)
    pub er_tau_on_hr: f64,
    /// ER-stress decay time constant after washout (hr)
    pub er_tau_off_hr: f64,
    /// Mitochondrial dysfunction rise time constant (hr)
    pub mito_tau_on_hr: f64,
    /// Mitochondrial dysfunction decay time constant (hr)
    pub mito_tau_off_hr: f64,
    /// Transport dysfunction rise time constant (hr)
    pub transport_tau_on_hr: f64,
    /// Transport dysfunction decay time constant (hr)
    pub transport_tau_off_hr: f64,
    /// Latent level above which a stress axis begins to kill
    pub hazard_threshold: f64,
    /// ER-stress death hazard at latent = 1 (1/hr)
    pub er_max_hazard_per_hr: f64,
    /// Mitochondrial death hazard at latent = 1 (1/hr)
    pub mito_max_hazard_per_hr: f64,
    /// Baseline each latent decays toward with no drive
    pub baseline_level: f64,
}

impl Default for StressParameters {
    fn default() -> Self {
        Self {
            er_tau_on_hr: 8.0,
            er_tau_off_hr: 18.0,
            mito_tau_on_hr: 12.0,
            mito_tau_off_hr: 30.0,
            transport_tau_on_hr: 10.0,
            transport_tau_off_hr: 24.0,
            hazard_threshold: 0.55,
            er_max_hazard_per_hr: 0.045,
            mito_max_hazard_per_hr: 0.055,
            baseline_level: 0.02,
        }
    }
}

/// Detector signal-chain settings (five-channel optical path)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorParameters {
    /// Channel ceiling in counts (16-bit camera full well)
    pub ceiling: f64,
    /// Fraction of the ceiling at which soft saturation begins
    pub knee_frac: f64,
    /// Mean of the additive noise floor in counts (detector dark bias)
    pub noise_floor_mean: f64,
    /// Standard deviation of the additive noise floor in counts
    pub noise_floor_sd: f64,
    /// Whether the dark bias is added to every channel
    pub detector_bias_enabled: bool,
    /// Strength of the radial vignette (fraction lost at the plate corner)
    pub vignette_strength: f64,
    /// Analog-to-digital quantization; dormant by default
    pub quantization: QuantizationConfig,
    /// Exposure multiplier contract range (inclusive)
    pub exposure_min: f64,
    pub exposure_max: f64,
}

impl Default for DetectorParameters {
    fn default() -> Self {
        Self {
            ceiling: 65_535.0,
            knee_frac: 0.85,
            noise_floor_mean: 80.0,
            noise_floor_sd: 12.0,
            detector_bias_enabled: true,
            vignette_strength: 0.25,
            quantization: QuantizationConfig::default(),
            exposure_min: 0.1,
            exposure_max: 5.0,
        }
    }
}

/// Realism-layer settings (run-context nuisance magnitudes at strength 1.0)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealismParameters {
    /// Sigma of the incubator growth-rate shift (multiplicative, log scale)
    pub incubator_sigma: f64,
    /// Sigma of the instrument gain shift (multiplicative, log scale)
    pub instrument_sigma: f64,
    /// Sigma of the per-channel reagent-lot bias (multiplicative, log scale)
    pub reagent_lot_sigma: f64,
    /// Sigma of the run-level EC50 shift (multiplicative, log scale)
    pub ec50_shift_sigma: f64,
    /// Sigma of the reagent-lot-correlated pipeline drift component
    pub drift_correlated_sigma: f64,
    /// Sigma of the independent per-(batch, plate) drift component
    pub drift_independent_sigma: f64,
    /// Probability of a discrete plate failure per (batch, plate)
    pub plate_failure_prob: f64,
    /// Probability that a run is a "cursed day" (all shifts coherently worse)
    pub cursed_day_prob: f64,
    /// Shift amplification applied on a cursed day
    pub cursed_day_gain: f64,
    /// Noise-floor inflation ceiling (hostile runs approach this)
    pub noise_inflation_max: f64,
}

impl Default for RealismParameters {
    fn default() -> Self {
        Self {
            incubator_sigma: 0.04,
            instrument_sigma: 0.05,
            reagent_lot_sigma: 0.06,
            ec50_shift_sigma: 0.10,
            drift_correlated_sigma: 0.03,
            drift_independent_sigma: 0.08,
            plate_failure_prob: 0.01,
            cursed_day_prob: 0.05,
            cursed_day_gain: 2.0,
            noise_inflation_max: 1.6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_biology_params() {
        let params = BiologyParameters::default();
        // 24 h doubling
        assert!((params.base_growth_rate_per_hr - 0.6931 / 24.0).abs() < 1e-3);
        assert!(params.seeding_viability > 0.9 && params.seeding_viability <= 1.0);
    }

    #[test]
    fn test_default_detector_params() {
        let params = DetectorParameters::default();
        assert!((params.ceiling - 65_535.0).abs() < 1.0);
        assert!(params.knee_frac > 0.0 && params.knee_frac < 1.0);
        assert!(params.noise_floor_sd > 0.0);
    }

    #[test]
    fn test_serialization_round_trip() {
        let params = Parameters::default();
        let json = serde_json::to_string_pretty(&params).unwrap();
        let parsed: Parameters = serde_json::from_str(&json).unwrap();
        assert!(
            (parsed.biology.base_growth_rate_per_hr - params.biology.base_growth_rate_per_hr)
                .abs()
                < 1e-12
        );
        assert_eq!(
            parsed.detector.detector_bias_enabled,
            params.detector.detector_bias_enabled
        );
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let params = Parameters::load_from_dir("/nonexistent/path");
        assert!((params.detector.ceiling - 65_535.0).abs() < 1.0);
    }
}
