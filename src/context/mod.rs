//! Run context: the realism layer.
//!
//! A `RunContext` is sampled once per experiment run and then frozen. It
//! bundles the correlated nuisance effects a real lab run carries:
//! incubator and instrument shifts, per-channel reagent-lot bias, batch
//! pipeline drift, and the occasional coherently-bad "cursed day".
//!
//! Two read-only projections feed the rest of the engine: biology
//! modifiers (growth, EC50, stress sensitivity) and measurement modifiers
//! (illumination bias, noise inflation). The context never mutates after
//! sampling, so runs in the same process cannot couple through it.
//!
//! The `Clean` profile collapses every shift to exactly neutral and
//! disables plate failures, reproducing the pre-realism baseline
//! bit-for-bit.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::config::RealismParameters;
use crate::detector::N_CHANNELS;
use crate::rng::{id_salt, RngPartition, StreamKind};

/// How hard the realism layer leans on the data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RealismProfile {
    /// All shifts exactly neutral; no plate failures
    Clean,
    /// Nominal shift magnitudes
    Realistic,
    /// Shifts scaled up for robustness stress-testing
    Hostile,
}

impl RealismProfile {
    /// Uniform scale applied to every nuisance magnitude
    pub fn strength(self) -> f64 {
        match self {
            RealismProfile::Clean => 0.0,
            RealismProfile::Realistic => 1.0,
            RealismProfile::Hostile => 2.5,
        }
    }
}

/// Discrete per-(batch, plate) failure modes.
///
/// Each produces a qualitatively different, still deterministic channel
/// pattern at measurement time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlateFailure {
    /// Autofocus missed: signal attenuated on every channel
    FocusOff,
    /// Wrong illumination settings: strongly skewed channel balance
    IlluminationWrong,
    /// Segmentation collapse: readings regress toward background
    SegmentationFail,
}

impl PlateFailure {
    /// Fixed channel-gain signature of the failure mode
    pub fn channel_pattern(self) -> [f64; N_CHANNELS] {
        match self {
            PlateFailure::FocusOff => [0.6, 0.6, 0.6, 0.6, 0.6],
            PlateFailure::IlluminationWrong => [1.8, 0.4, 1.5, 0.5, 1.1],
            PlateFailure::SegmentationFail => [0.25, 0.25, 0.25, 0.25, 0.25],
        }
    }
}

/// Read-only biology projection of the context
#[derive(Debug, Clone, Copy)]
pub struct BiologyModifiers {
    /// Multiplies the baseline growth rate
    pub growth_rate_multiplier: f64,
    /// Multiplies every compound EC50 (reagent-lot potency shift)
    pub ec50_multiplier: f64,
    /// Multiplies stress-axis drive
    pub stress_sensitivity: f64,
}

impl BiologyModifiers {
    /// Exactly neutral modifiers (the clean baseline)
    pub fn neutral() -> Self {
        Self {
            growth_rate_multiplier: 1.0,
            ec50_multiplier: 1.0,
            stress_sensitivity: 1.0,
        }
    }
}

/// Read-only measurement projection of the context
#[derive(Debug, Clone, Copy)]
pub struct MeasurementModifiers {
    /// Per-channel illumination gain (multiplicative)
    pub illumination_bias: [f64; N_CHANNELS],
    /// Noise-floor inflation factor, >= 1
    pub noise_inflation: f64,
}

impl MeasurementModifiers {
    pub fn neutral() -> Self {
        Self {
            illumination_bias: [1.0; N_CHANNELS],
            noise_inflation: 1.0,
        }
    }
}

/// Deterministic per-(batch, plate) measurement-time transform
#[derive(Debug, Clone, Copy)]
pub struct PipelineDrift {
    /// Per-channel gain: reagent-lot-correlated x independent component
    pub channel_gain: [f64; N_CHANNELS],
    /// Discrete failure, if this (batch, plate) drew one
    pub failure: Option<PlateFailure>,
}

impl PipelineDrift {
    pub fn neutral() -> Self {
        Self {
            channel_gain: [1.0; N_CHANNELS],
            failure: None,
        }
    }
}

/// Sampled, immutable nuisance bundle for one experiment run
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Profile the context was sampled under
    pub profile: RealismProfile,
    /// Whether this run drew a coherently-bad day
    pub cursed_day: bool,

    growth_shift: f64,
    ec50_shift: f64,
    stress_shift: f64,
    instrument_gain: f64,
    reagent_lot_bias: [f64; N_CHANNELS],
    noise_inflation: f64,

    // Drift magnitudes, pre-scaled by profile strength (and cursed-day gain)
    drift_correlated_sigma: f64,
    drift_independent_sigma: f64,
    plate_failure_prob: f64,

    /// Salt tying pipeline-drift hashing to this run's seed
    run_salt: u64,
}

impl RunContext {
    /// Sample a context from the partition's operations stream.
    ///
    /// Draw order is fixed; the operations stream is consumed identically
    /// for every profile so that switching profiles never shifts any
    /// other stream.
    pub fn sample(
        profile: RealismProfile,
        params: &RealismParameters,
        partition: &RngPartition,
    ) -> Self {
        let mut rng = partition.stream(StreamKind::Operations, id_salt("run-context"), 0);
        let base_strength = profile.strength();

        let cursed_roll: f64 = rng.gen();
        let cursed_day = base_strength > 0.0 && cursed_roll < params.cursed_day_prob;
        let strength = if cursed_day {
            base_strength * params.cursed_day_gain
        } else {
            base_strength
        };

        // Multiplicative log-normal shifts; strength 0 collapses each to
        // exactly exp(0) = 1.0.
        let mut lognormal = |sigma: f64| -> f64 {
            let z: f64 = StandardNormal.sample(&mut rng);
            (sigma * strength * z).exp()
        };

        let growth_shift = lognormal(params.incubator_sigma);
        let ec50_shift = lognormal(params.ec50_shift_sigma);
        let stress_shift = lognormal(params.incubator_sigma);
        let instrument_gain = lognormal(params.instrument_sigma);

        let mut reagent_lot_bias = [1.0; N_CHANNELS];
        for bias in &mut reagent_lot_bias {
            *bias = lognormal(params.reagent_lot_sigma);
        }

        let inflation_roll: f64 = rng.gen();
        let noise_inflation =
            1.0 + (params.noise_inflation_max - 1.0) * (strength / 2.5).min(1.0) * inflation_roll;

        let run_salt = rng.gen::<u64>();

        log::debug!(
            "run context sampled: profile={:?} cursed_day={} growth_shift={:.4}",
            profile,
            cursed_day,
            growth_shift
        );

        Self {
            profile,
            cursed_day,
            growth_shift,
            ec50_shift,
            stress_shift,
            instrument_gain,
            reagent_lot_bias,
            noise_inflation,
            drift_correlated_sigma: params.drift_correlated_sigma * strength,
            drift_independent_sigma: params.drift_independent_sigma * strength,
            plate_failure_prob: if base_strength > 0.0 {
                params.plate_failure_prob * strength
            } else {
                0.0
            },
            run_salt,
        }
    }

    /// Biology projection
    pub fn biology_modifiers(&self) -> BiologyModifiers {
        BiologyModifiers {
            growth_rate_multiplier: self.growth_shift,
            ec50_multiplier: self.ec50_shift,
            stress_sensitivity: self.stress_shift,
        }
    }

    /// Measurement projection
    pub fn measurement_modifiers(&self) -> MeasurementModifiers {
        let mut illumination_bias = [1.0; N_CHANNELS];
        for (out, lot) in illumination_bias.iter_mut().zip(&self.reagent_lot_bias) {
            *out = self.instrument_gain * lot;
        }
        MeasurementModifiers {
            illumination_bias,
            noise_inflation: self.noise_inflation,
        }
    }

    /// Deterministic pipeline drift for a (batch, plate) pairing.
    ///
    /// Composed of a small reagent-lot-correlated component keyed by the
    /// batch alone and a larger independent component keyed by the pair.
    /// Repeated calls with the same ids return identical output.
    pub fn pipeline_drift(&self, batch_id: &str, plate_id: &str) -> PipelineDrift {
        if self.profile == RealismProfile::Clean {
            return PipelineDrift::neutral();
        }

        let batch_salt = id_salt(batch_id);
        let plate_salt = id_salt(plate_id);

        // Batch-keyed: shared by every plate in the batch
        let mut batch_rng = ChaCha12Rng::seed_from_u64(self.run_salt ^ batch_salt);
        // Pair-keyed: unique to this plate within this batch
        let mut plate_rng = ChaCha12Rng::seed_from_u64(self.run_salt ^ batch_salt);
        plate_rng.set_stream(plate_salt);

        let mut channel_gain = [1.0; N_CHANNELS];
        for gain in &mut channel_gain {
            let zc: f64 = StandardNormal.sample(&mut batch_rng);
            let zi: f64 = StandardNormal.sample(&mut plate_rng);
            *gain = (self.drift_correlated_sigma * zc + self.drift_independent_sigma * zi).exp();
        }

        let failure_roll: f64 = plate_rng.gen();
        let failure = if failure_roll < self.plate_failure_prob {
            let mode: f64 = plate_rng.gen();
            Some(if mode < 1.0 / 3.0 {
                PlateFailure::FocusOff
            } else if mode < 2.0 / 3.0 {
                PlateFailure::IlluminationWrong
            } else {
                PlateFailure::SegmentationFail
            })
        } else {
            None
        };

        PipelineDrift {
            channel_gain,
            failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition() -> RngPartition {
        RngPartition::new(1234)
    }

    #[test]
    fn test_clean_profile_is_exactly_neutral() {
        let ctx = RunContext::sample(RealismProfile::Clean, &RealismParameters::default(), &partition());
        let bio = ctx.biology_modifiers();
        assert_eq!(bio.growth_rate_multiplier, 1.0);
        assert_eq!(bio.ec50_multiplier, 1.0);
        assert_eq!(bio.stress_sensitivity, 1.0);

        let meas = ctx.measurement_modifiers();
        assert!(meas.illumination_bias.iter().all(|&b| b == 1.0));
        assert_eq!(meas.noise_inflation, 1.0);

        let drift = ctx.pipeline_drift("batch-1", "plate-1");
        assert!(drift.channel_gain.iter().all(|&g| g == 1.0));
        assert!(drift.failure.is_none());
        assert!(!ctx.cursed_day);
    }

    #[test]
    fn test_realistic_profile_shifts_are_bounded_and_nonneutral() {
        let ctx = RunContext::sample(
            RealismProfile::Realistic,
            &RealismParameters::default(),
            &partition(),
        );
        let bio = ctx.biology_modifiers();
        assert_ne!(bio.growth_rate_multiplier, 1.0);
        // Log-normal with sigma 0.04: anything outside [0.5, 2.0] would be
        // a ~17-sigma event, i.e. a bug.
        assert!(bio.growth_rate_multiplier > 0.5 && bio.growth_rate_multiplier < 2.0);
        assert!(ctx.measurement_modifiers().noise_inflation >= 1.0);
    }

    #[test]
    fn test_pipeline_drift_is_deterministic() {
        let ctx = RunContext::sample(
            RealismProfile::Realistic,
            &RealismParameters::default(),
            &partition(),
        );
        let a = ctx.pipeline_drift("b1", "p1");
        let b = ctx.pipeline_drift("b1", "p1");
        assert_eq!(a.channel_gain, b.channel_gain);
        assert_eq!(a.failure, b.failure);
    }

    #[test]
    fn test_pipeline_drift_depends_on_batch() {
        let ctx = RunContext::sample(
            RealismProfile::Realistic,
            &RealismParameters::default(),
            &partition(),
        );
        let a = ctx.pipeline_drift("b1", "p1");
        let b = ctx.pipeline_drift("b2", "p1");
        assert_ne!(a.channel_gain, b.channel_gain);
    }

    #[test]
    fn test_plates_share_batch_correlation() {
        let ctx = RunContext::sample(
            RealismProfile::Hostile,
            &RealismParameters::default(),
            &partition(),
        );
        // Different plates in one batch differ only in the independent
        // component, so their gains must differ.
        let a = ctx.pipeline_drift("b1", "p1");
        let b = ctx.pipeline_drift("b1", "p2");
        assert_ne!(a.channel_gain, b.channel_gain);
    }

    #[test]
    fn test_sampling_is_reproducible() {
        let params = RealismParameters::default();
        let a = RunContext::sample(RealismProfile::Hostile, &params, &partition());
        let b = RunContext::sample(RealismProfile::Hostile, &params, &partition());
        assert_eq!(
            a.biology_modifiers().growth_rate_multiplier,
            b.biology_modifiers().growth_rate_multiplier
        );
        assert_eq!(
            a.measurement_modifiers().illumination_bias,
            b.measurement_modifiers().illumination_bias
        );
    }

    #[test]
    fn test_failure_mode_patterns_are_distinct() {
        let focus = PlateFailure::FocusOff.channel_pattern();
        let illum = PlateFailure::IlluminationWrong.channel_pattern();
        let seg = PlateFailure::SegmentationFail.channel_pattern();
        assert_ne!(focus, illum);
        assert_ne!(illum, seg);
        assert_ne!(focus, seg);
    }
}
