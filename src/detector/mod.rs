//! Measurement signal chain.
//!
//! Converts latent state into noisy, bounded, quantized sensor readouts.
//! Two entry paths share the same chain:
//! - biology: a vessel's structural/scalar latents are projected onto the
//!   five optical channels
//! - material: a calibration well's nominal intensity is used directly
//!
//! Stage order is fixed: base projection x exposure -> vignette ->
//! additive noise floor -> saturation -> quantization. The chain reads
//! state and never writes it; all randomness comes from the generator
//! handed in by the caller, so repeated acquisition with the same stream
//! address is bit-identical.

pub mod noise;
pub mod quantization;
pub mod saturation;
pub mod vignette;

pub use noise::noise_floor_draw;
pub use quantization::{quantize, QuantizationConfig};
pub use saturation::saturate;
pub use vignette::vignette_factor;

use rand_chacha::ChaCha12Rng;
use rand_distr::{Distribution, Poisson, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::config::DetectorParameters;
use crate::context::{MeasurementModifiers, PipelineDrift, PlateFailure};
use crate::engine::SimError;
use crate::state::{MaterialState, VesselFormat, VesselState, WellPosition};

/// Number of optical morphology channels
pub const N_CHANNELS: usize = 5;

/// The five-channel optical morphology panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    /// Nuclear stain; tracks adherent cell mass
    Nucleus,
    /// Endoplasmic-reticulum dye; brightens under ER stress
    Er,
    /// Nucleic-acid dye; dims as transport dysfunction suppresses synthesis
    Rna,
    /// Actin/Golgi/plasma-membrane composite
    Agp,
    /// Mitochondrial potential dye; dims as the membrane potential collapses
    Mito,
}

impl Channel {
    pub const ALL: [Channel; N_CHANNELS] = [
        Channel::Nucleus,
        Channel::Er,
        Channel::Rna,
        Channel::Agp,
        Channel::Mito,
    ];
}

/// Supported assay readouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssayType {
    /// Five-channel optical morphology
    OpticalMorphology,
    /// Luminescence viability scalar
    Viability,
    /// Targeted transcript counts
    Transcriptomics,
}

/// One channel's readout plus detector metadata
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelReading {
    pub channel: Channel,
    /// Reported counts after the full chain
    pub value: f64,
    /// Signal-to-noise proxy: optical signal over the effective floor sd
    pub snr_db: f64,
    /// Whether the pre-saturation signal exceeded the knee
    pub saturated: bool,
}

/// One transcript count from the targeted panel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneCount {
    pub gene: String,
    pub count: u64,
}

/// A complete structured reading returned to the driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub assay: AssayType,
    /// Id of the measured vessel or material
    pub subject_id: String,
    /// Optical channels (empty for non-optical assays)
    pub channels: Vec<ChannelReading>,
    /// Viability-assay luminescence, when applicable
    pub luminescence: Option<f64>,
    /// Transcript panel counts, when applicable
    pub counts: Option<Vec<GeneCount>>,
    /// Exposure actually used
    pub exposure_multiplier: f64,
    pub batch_id: Option<String>,
    pub plate_id: Option<String>,
    pub well_position: WellPosition,
    /// Discrete pipeline failure affecting this reading, if any
    pub plate_failure: Option<PlateFailure>,
}

/// Validate the exposure contract: finite and inside the configured range
pub fn validate_exposure(cfg: &DetectorParameters, exposure: f64) -> Result<(), SimError> {
    if !exposure.is_finite() {
        return Err(SimError::Validation(format!(
            "exposure multiplier must be finite, got {exposure}"
        )));
    }
    if exposure < cfg.exposure_min || exposure > cfg.exposure_max {
        return Err(SimError::Validation(format!(
            "exposure multiplier {exposure} outside [{}, {}]",
            cfg.exposure_min, cfg.exposure_max
        )));
    }
    Ok(())
}

/// Per-channel structural projection of a vessel's latent state at unit
/// exposure, in detector counts. Pure function of the vessel.
pub fn project_vessel(vessel: &VesselState) -> [f64; N_CHANNELS] {
    let live_frac = (vessel.viable_cells() / vessel.capacity.max(1.0)).clamp(0.0, 1.0);
    let dead_frac = ((vessel.cell_count * (1.0 - vessel.viability)) / vessel.capacity.max(1.0))
        .clamp(0.0, 1.0);
    let debris_frac = (vessel.debris_cells / vessel.capacity.max(1.0)).clamp(0.0, 1.0);
    let stress = &vessel.stress;

    // Debris and dead adherent cells still take up stain, dimly
    let background = 400.0 * debris_frac + 900.0 * dead_frac;

    [
        // Nucleus: proportional to adherent mass
        18_000.0 * live_frac + background,
        // ER: dilates and brightens under ER stress
        9_000.0 * live_frac * (1.0 + 0.9 * stress.er_stress) + background,
        // RNA: synthesis drops with transport dysfunction
        7_000.0 * live_frac * (1.0 - 0.5 * stress.transport_dysfunction) + background,
        // AGP composite
        8_000.0 * live_frac * (1.0 - 0.35 * stress.transport_dysfunction) + background,
        // Mito: potential dye dims as dysfunction rises
        11_000.0 * live_frac * (1.0 - 0.6 * stress.mito_dysfunction) + background,
    ]
}

/// Per-channel base signal for a material well: nominal intensity times a
/// content-preparation factor. The factor is drawn per channel from the
/// material stream; its spread is N-independent for dye and follows
/// counting statistics for beads. A zero-variance content (buffer)
/// multiplies by exactly 1.0.
pub fn project_material(material: &MaterialState, rng: &mut ChaCha12Rng) -> [f64; N_CHANNELS] {
    let rel_sd = material.content_rel_sd();
    let mut base = [0.0; N_CHANNELS];
    for (out, nominal) in base.iter_mut().zip(&material.nominal_intensity) {
        let z: f64 = StandardNormal.sample(rng);
        *out = nominal * (rel_sd * z).exp();
    }
    base
}

/// Everything the chain needs besides the base signal and the generator
#[derive(Debug, Clone, Copy)]
pub struct AcquireSettings<'a> {
    pub detector: &'a DetectorParameters,
    pub modifiers: MeasurementModifiers,
    pub drift: PipelineDrift,
    pub position: WellPosition,
    pub format: VesselFormat,
    pub exposure: f64,
}

/// Run the full chain on a five-channel base signal.
///
/// Draw order per channel is fixed (one noise draw each); callers get
/// bit-identical output for the same stream address.
pub fn acquire(
    base: [f64; N_CHANNELS],
    settings: &AcquireSettings<'_>,
    rng: &mut ChaCha12Rng,
) -> Result<Vec<ChannelReading>, SimError> {
    let det = settings.detector;
    validate_exposure(det, settings.exposure)?;

    let vf = vignette_factor(settings.position, settings.format, det.vignette_strength);
    let failure_pattern = settings
        .drift
        .failure
        .map(PlateFailure::channel_pattern)
        .unwrap_or([1.0; N_CHANNELS]);
    let knee = det.ceiling * det.knee_frac;
    let step = det.quantization.effective_step(det.ceiling);
    let sd_eff = det.noise_floor_sd * settings.modifiers.noise_inflation;

    let mut readings = Vec::with_capacity(N_CHANNELS);
    for (i, channel) in Channel::ALL.iter().enumerate() {
        let optical = base[i]
            * settings.exposure
            * settings.modifiers.illumination_bias[i]
            * settings.drift.channel_gain[i]
            * failure_pattern[i]
            * vf;
        let floor = noise_floor_draw(det, settings.modifiers.noise_inflation, rng)?;
        // Counts cannot go below zero
        let pre_sat = (optical + floor).max(0.0);
        let saturated = pre_sat > knee;
        let compressed = saturate(pre_sat, det.ceiling, det.knee_frac);
        // A step that does not divide the ceiling could round the topmost
        // value past it; the reported count never exceeds the ceiling
        let value = quantize(compressed, step).min(det.ceiling);

        readings.push(ChannelReading {
            channel: *channel,
            value,
            snr_db: 20.0 * (optical.max(1e-12) / sd_eff).log10(),
            saturated,
        });
    }
    Ok(readings)
}

/// Luminescence viability readout: proportional to viable cells, passed
/// through the same floor/saturation/quantization stages on one pseudo
/// channel.
pub fn viability_luminescence(
    vessel: &VesselState,
    settings: &AcquireSettings<'_>,
    rng: &mut ChaCha12Rng,
) -> Result<f64, SimError> {
    let det = settings.detector;
    validate_exposure(det, settings.exposure)?;
    // ATP-proportional luminescence, ~0.02 counts per viable cell
    let signal = vessel.viable_cells() * 0.02 * settings.exposure;
    let floor = noise_floor_draw(det, settings.modifiers.noise_inflation, rng)?;
    let pre_sat = (signal + floor).max(0.0);
    let compressed = saturate(pre_sat, det.ceiling, det.knee_frac);
    let step = det.quantization.effective_step(det.ceiling);
    Ok(quantize(compressed, step).min(det.ceiling))
}

/// Targeted transcript panel: (gene, baseline mean, latent weight source)
const GENE_PANEL: [(&str, f64, LatentAxis, f64); 10] = [
    ("hspa5", 220.0, LatentAxis::Er, 4.0),
    ("ddit3", 60.0, LatentAxis::Er, 8.0),
    ("xbp1", 140.0, LatentAxis::Er, 3.0),
    ("sod2", 180.0, LatentAxis::Mito, 2.5),
    ("pink1", 90.0, LatentAxis::Mito, 3.5),
    ("sec61b", 120.0, LatentAxis::Transport, 2.0),
    ("tmed9", 80.0, LatentAxis::Transport, 2.5),
    ("actb", 2_500.0, LatentAxis::None, 0.0),
    ("gapdh", 1_800.0, LatentAxis::None, 0.0),
    ("casp3", 70.0, LatentAxis::Death, 5.0),
];

#[derive(Debug, Clone, Copy)]
enum LatentAxis {
    Er,
    Mito,
    Transport,
    Death,
    None,
}

/// Poisson transcript counts with means driven by the stress latents and
/// scaled by viable-cell library size.
pub fn transcript_counts(
    vessel: &VesselState,
    rng: &mut ChaCha12Rng,
) -> Result<Vec<GeneCount>, SimError> {
    // Library size factor: half a million viable cells is a full library
    let library = (vessel.viable_cells() / 5.0e5).clamp(0.01, 2.0);
    let mut counts = Vec::with_capacity(GENE_PANEL.len());
    for (gene, base_mean, axis, weight) in GENE_PANEL {
        let latent = match axis {
            LatentAxis::Er => vessel.stress.er_stress,
            LatentAxis::Mito => vessel.stress.mito_dysfunction,
            LatentAxis::Transport => vessel.stress.transport_dysfunction,
            LatentAxis::Death => 1.0 - vessel.viability,
            LatentAxis::None => 0.0,
        };
        let mean = base_mean * (1.0 + weight * latent) * library;
        let dist = Poisson::new(mean.max(1e-6))
            .map_err(|e| SimError::Validation(format!("transcript mean for {gene}: {e}")))?;
        counts.push(GeneCount {
            gene: gene.to_string(),
            count: dist.sample(rng) as u64,
        });
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorParameters;
    use crate::context::{MeasurementModifiers, PipelineDrift};
    use crate::rng::{id_salt, RngPartition, StreamKind};
    use crate::state::{DensityLevel, ResourcePools, StressState, VesselState};
    use std::collections::BTreeMap;

    fn test_vessel() -> VesselState {
        VesselState {
            vessel_id: "A1".into(),
            cell_line: "hepg2".into(),
            format: VesselFormat::Well96,
            density_level: DensityLevel::Standard,
            well_position: Some(WellPosition::new(3, 5)),
            cell_count: 4.0e5,
            capacity: 1.0e6,
            viability: 0.9,
            passage_number: 2,
            death_ledger: crate::state::DeathLedger {
                background: 0.1,
                ..Default::default()
            },
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
            last_update_hr: 24.0,
            biology_epoch: 1,
            measurement_epoch: 0,
            superseded_by: None,
        }
    }

    fn settings(det: &DetectorParameters) -> AcquireSettings<'_> {
        AcquireSettings {
            detector: det,
            modifiers: MeasurementModifiers::neutral(),
            drift: PipelineDrift::neutral(),
            position: WellPosition::new(3, 5),
            format: VesselFormat::Well96,
            exposure: 1.0,
        }
    }

    #[test]
    fn test_projection_tracks_latents() {
        let mut vessel = test_vessel();
        let baseline = project_vessel(&vessel);

        vessel.stress.er_stress = 0.8;
        let stressed = project_vessel(&vessel);
        assert!(stressed[1] > baseline[1], "ER channel should brighten");
        assert_eq!(stressed[0], baseline[0], "nucleus unaffected by ER stress");

        vessel.stress.mito_dysfunction = 0.8;
        let poisoned = project_vessel(&vessel);
        assert!(poisoned[4] < stressed[4], "mito channel should dim");
    }

    #[test]
    fn test_acquire_is_deterministic_per_stream_address() {
        let det = DetectorParameters::default();
        let vessel = test_vessel();
        let base = project_vessel(&vessel);
        let partition = RngPartition::new(11);

        let mut r1 = partition.stream(StreamKind::Measurement, id_salt("A1"), 0);
        let mut r2 = partition.stream(StreamKind::Measurement, id_salt("A1"), 0);
        let a = acquire(base, &settings(&det), &mut r1).unwrap();
        let b = acquire(base, &settings(&det), &mut r2).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.value, y.value);
            assert_eq!(x.saturated, y.saturated);
        }
    }

    #[test]
    fn test_exposure_contract() {
        let det = DetectorParameters::default();
        assert!(validate_exposure(&det, 1.0).is_ok());
        assert!(validate_exposure(&det, 0.1).is_ok());
        assert!(validate_exposure(&det, 5.0).is_ok());
        assert!(validate_exposure(&det, 0.05).is_err());
        assert!(validate_exposure(&det, 5.1).is_err());
        assert!(validate_exposure(&det, f64::NAN).is_err());
        assert!(validate_exposure(&det, f64::INFINITY).is_err());
    }

    #[test]
    fn test_saturation_flag_set_on_bright_wells() {
        let det = DetectorParameters::default();
        let mut rng = RngPartition::new(5).stream(StreamKind::Measurement, id_salt("hot"), 0);
        let bright = [det.ceiling * 2.0; N_CHANNELS];
        let readings = acquire(bright, &settings(&det), &mut rng).unwrap();
        assert!(readings.iter().all(|r| r.saturated));
        assert!(readings.iter().all(|r| r.value <= det.ceiling));
    }

    #[test]
    fn test_quantized_value_never_exceeds_ceiling() {
        // 10k steps do not divide 65535, so the lattice point nearest the
        // ceiling sits above it; the reported value must still be bounded
        let det = DetectorParameters {
            quantization: QuantizationConfig::from_step(10_000.0).unwrap(),
            ..Default::default()
        };
        let mut rng = RngPartition::new(13).stream(StreamKind::Measurement, id_salt("hot"), 0);
        let bright = [det.ceiling * 3.0; N_CHANNELS];
        let readings = acquire(bright, &settings(&det), &mut rng).unwrap();
        assert!(readings.iter().all(|r| r.value <= det.ceiling));
        assert!(readings.iter().all(|r| r.saturated));
    }

    #[test]
    fn test_material_buffer_projection_is_exact_zero() {
        let material = MaterialState::buffer("B1");
        let mut rng = RngPartition::new(5).stream(StreamKind::Material, id_salt("B1"), 0);
        let base = project_material(&material, &mut rng);
        assert!(base.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_transcript_counts_respond_to_er_stress() {
        let mut vessel = test_vessel();
        let partition = RngPartition::new(9);

        let mut rng = partition.stream(StreamKind::Measurement, id_salt("A1"), 0);
        let baseline = transcript_counts(&vessel, &mut rng).unwrap();
        vessel.stress.er_stress = 0.9;
        let mut rng = partition.stream(StreamKind::Measurement, id_salt("A1"), 1);
        let stressed = transcript_counts(&vessel, &mut rng).unwrap();

        let get = |counts: &[GeneCount], gene: &str| -> u64 {
            counts.iter().find(|c| c.gene == gene).map(|c| c.count).unwrap()
        };
        // ddit3 (CHOP) has the steepest ER weight; 8x induction dwarfs
        // Poisson noise at these means
        assert!(get(&stressed, "ddit3") > get(&baseline, "ddit3") * 2);
    }
}
