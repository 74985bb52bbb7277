//! Simulation engine: the operation surface.
//!
//! A `SimulationEngine` exclusively owns its vessels; external drivers
//! interact only through the operations here (seed, advance_time, treat,
//! washout, feed, wash, passage, measure, measure_material). Each
//! operation validates its inputs up front, consults the run context and
//! compound library, and delegates time integration to the biology
//! module and readout generation to the detector chain.
//!
//! Isolation contracts enforced here:
//! - operations on one vessel never touch another vessel's state or
//!   stream address (per-vessel salts and epochs, see `rng`)
//! - `measure` never mutates biological state; it advances only the
//!   vessel's measurement draw epoch
//! - `measure_material` has zero dependency on any vessel
//!
//! The engine is single-threaded and synchronous. Drivers that
//! parallelize across wells must hand each worker its own engine
//! instance; nothing here is shared.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::biology::advance_vessel;
use crate::config::Parameters;
use crate::context::{PipelineDrift, RealismProfile, RunContext};
use crate::detector::{
    acquire, project_material, project_vessel, transcript_counts, viability_luminescence,
    AcquireSettings, AssayType, Reading,
};
use crate::pharmacology::{exposure, CompoundLibrary};
use crate::rng::{id_salt, RngPartition, StreamKind};
use crate::state::{
    DeathLedger, DensityLevel, MaterialState, ResourcePools, StressState, VesselFormat,
    VesselState, WellPosition,
};

/// Engine error taxonomy.
///
/// `Configuration` and `Validation` are caller mistakes, raised before
/// any state changes. `Conservation` is an internal defect: the engine
/// detected its own invariant breach and fails loudly rather than
/// silently correcting.
#[derive(Debug, Error)]
pub enum SimError {
    /// Unknown vessel/compound or malformed operation parameters
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Inputs outside contract range (exposure, quantization, non-finite)
    #[error("validation error: {0}")]
    Validation(String),
    /// Internal invariant breach: viability + ledger drifted from 1
    #[error("conservation violated in vessel {vessel_id}: deviation {deviation:e}")]
    Conservation { vessel_id: String, deviation: f64 },
}

/// Target of a time advancement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VesselSelector {
    One(String),
    All,
}

/// Options for a measurement operation
#[derive(Debug, Clone)]
pub struct MeasureRequest {
    pub assay: AssayType,
    pub batch_id: Option<String>,
    pub plate_id: Option<String>,
    pub exposure_multiplier: f64,
    /// Overrides the vessel's assigned position for this acquisition
    pub well_position: Option<WellPosition>,
}

impl Default for MeasureRequest {
    fn default() -> Self {
        Self {
            assay: AssayType::OpticalMorphology,
            batch_id: None,
            plate_id: None,
            exposure_multiplier: 1.0,
            well_position: None,
        }
    }
}

/// The simulation engine for one experiment run
pub struct SimulationEngine {
    params: Parameters,
    library: CompoundLibrary,
    partition: RngPartition,
    context: RunContext,
    vessels: BTreeMap<String, VesselState>,
    clock_hr: f64,
}

impl SimulationEngine {
    /// Engine with the built-in compound panel
    pub fn new(params: Parameters, master_seed: u64, profile: RealismProfile) -> Self {
        Self::with_partition(params, RngPartition::new(master_seed), profile)
    }

    /// Engine over an explicit stream partition (stream-independence tests
    /// construct partitions with one concern's seed overridden)
    pub fn with_partition(
        params: Parameters,
        partition: RngPartition,
        profile: RealismProfile,
    ) -> Self {
        let context = RunContext::sample(profile, &params.realism, &partition);
        Self {
            params,
            library: CompoundLibrary::with_builtin_panel(),
            partition,
            context,
            vessels: BTreeMap::new(),
            clock_hr: 0.0,
        }
    }

    /// Replace the compound library (external parameter sources)
    pub fn set_library(&mut self, library: CompoundLibrary) {
        self.library = library;
    }

    /// Read-only view of a vessel
    pub fn vessel(&self, vessel_id: &str) -> Result<&VesselState, SimError> {
        self.vessels
            .get(vessel_id)
            .ok_or_else(|| SimError::Configuration(format!("unknown vessel '{vessel_id}'")))
    }

    /// All vessel ids, in deterministic order
    pub fn vessel_ids(&self) -> Vec<String> {
        self.vessels.keys().cloned().collect()
    }

    /// The run context sampled for this engine
    pub fn run_context(&self) -> &RunContext {
        &self.context
    }

    /// Current engine clock (hr)
    pub fn clock_hr(&self) -> f64 {
        self.clock_hr
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Create a vessel. Fails on duplicate ids or malformed counts.
    pub fn seed(
        &mut self,
        vessel_id: &str,
        cell_line: &str,
        initial_count: f64,
        capacity: f64,
        format: VesselFormat,
        density_level: DensityLevel,
    ) -> Result<(), SimError> {
        if self.vessels.contains_key(vessel_id) {
            return Err(SimError::Configuration(format!(
                "vessel '{vessel_id}' already exists"
            )));
        }
        if !initial_count.is_finite() || initial_count <= 0.0 {
            return Err(SimError::Validation(format!(
                "initial count must be positive and finite, got {initial_count}"
            )));
        }
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(SimError::Validation(format!(
                "capacity must be positive and finite, got {capacity}"
            )));
        }
        if initial_count > capacity {
            return Err(SimError::Configuration(format!(
                "initial count {initial_count} exceeds capacity {capacity}"
            )));
        }

        let viability = self.params.biology.seeding_viability;
        let vessel = VesselState {
            vessel_id: vessel_id.to_string(),
            cell_line: cell_line.to_string(),
            format,
            density_level,
            well_position: None,
            cell_count: initial_count,
            capacity,
            viability,
            passage_number: 1,
            death_ledger: DeathLedger {
                background: 1.0 - viability,
                ..Default::default()
            },
            stress: StressState::baseline(self.params.stress.baseline_level),
            compounds: BTreeMap::new(),
            resources: ResourcePools {
                glucose_mM: self.params.nutrients.glucose_fresh_mM,
                glutamine_mM: self.params.nutrients.glutamine_fresh_mM,
                volume_mL: format.working_volume_mL(),
                evaporated_mL: 0.0,
            },
            cells_lost_handling: 0.0,
            debris_cells: 0.0,
            seed_time_hr: self.clock_hr,
            last_update_hr: self.clock_hr,
            biology_epoch: 0,
            measurement_epoch: 0,
            superseded_by: None,
        };
        log::debug!("seeded vessel '{vessel_id}' with {initial_count:.0} {cell_line} cells");
        self.vessels.insert(vessel_id.to_string(), vessel);
        Ok(())
    }

    /// Assign a plate coordinate (drives vignette and edge effects)
    pub fn set_well_position(
        &mut self,
        vessel_id: &str,
        position: WellPosition,
    ) -> Result<(), SimError> {
        let vessel = self.vessel_mut(vessel_id)?;
        let (rows, cols) = vessel.format.grid();
        if position.row >= rows || position.col >= cols {
            return Err(SimError::Configuration(format!(
                "position {position:?} outside a {rows}x{cols} plate"
            )));
        }
        vessel.well_position = Some(position);
        Ok(())
    }

    /// Advance one vessel or every vessel by `hours`
    pub fn advance_time(&mut self, selector: VesselSelector, hours: f64) -> Result<(), SimError> {
        if !hours.is_finite() {
            return Err(SimError::Validation(format!(
                "time delta must be finite, got {hours}"
            )));
        }
        if hours < 0.0 {
            return Err(SimError::Configuration(format!(
                "time delta must be non-negative, got {hours}"
            )));
        }
        if hours == 0.0 {
            // Strict no-op: draw epochs stay put, so a zero-length advance
            // cannot shift any later stochastic sequence
            if let VesselSelector::One(ref id) = selector {
                self.vessel(id)?;
            }
            return Ok(());
        }

        let params = &self.params;
        let library = &self.library;
        let partition = &self.partition;
        let mods = self.context.biology_modifiers();

        match selector {
            VesselSelector::One(ref id) => {
                let vessel = self
                    .vessels
                    .get_mut(id)
                    .ok_or_else(|| SimError::Configuration(format!("unknown vessel '{id}'")))?;
                let mut rng =
                    partition.stream(StreamKind::Biology, id_salt(id), vessel.biology_epoch);
                vessel.biology_epoch += 1;
                advance_vessel(vessel, hours, params, library, &mods, &mut rng)?;
                self.clock_hr = self.clock_hr.max(vessel.last_update_hr);
            }
            VesselSelector::All => {
                // BTreeMap order makes the advance sequence deterministic
                for (id, vessel) in self.vessels.iter_mut() {
                    let mut rng =
                        partition.stream(StreamKind::Biology, id_salt(id), vessel.biology_epoch);
                    vessel.biology_epoch += 1;
                    advance_vessel(vessel, hours, params, library, &mods, &mut rng)?;
                }
                self.clock_hr += hours;
            }
        }
        Ok(())
    }

    /// Apply a compound at the given media concentration
    pub fn treat(&mut self, vessel_id: &str, compound: &str, dose_uM: f64) -> Result<(), SimError> {
        self.treat_scaled(vessel_id, compound, dose_uM, 1.0, 1.0)
    }

    /// `treat` with explicit potency/toxicity scalars. Adversarial and
    /// exploration harnesses use these to decouple mechanism engagement
    /// from lethality.
    pub fn treat_scaled(
        &mut self,
        vessel_id: &str,
        compound: &str,
        dose_uM: f64,
        potency_scalar: f64,
        toxicity_scalar: f64,
    ) -> Result<(), SimError> {
        if !dose_uM.is_finite() || dose_uM < 0.0 {
            return Err(SimError::Validation(format!(
                "dose must be non-negative and finite, got {dose_uM}"
            )));
        }
        for (name, scalar) in [("potency", potency_scalar), ("toxicity", toxicity_scalar)] {
            if !scalar.is_finite() || scalar < 0.0 {
                return Err(SimError::Validation(format!(
                    "{name} scalar must be non-negative and finite, got {scalar}"
                )));
            }
        }
        if !self.library.contains(compound) {
            return Err(SimError::Configuration(format!(
                "unknown compound '{compound}'"
            )));
        }
        let vessel = self.vessel_mut(vessel_id)?;
        let now_hr = vessel.last_update_hr;
        vessel.compounds.insert(
            compound.to_string(),
            exposure(dose_uM, now_hr, potency_scalar, toxicity_scalar),
        );
        log::debug!("treated '{vessel_id}' with {dose_uM} uM {compound}");
        Ok(())
    }

    /// Remove a compound from the media. Stress latents decay through
    /// subsequent time advancement; they are not reset here.
    pub fn washout(&mut self, vessel_id: &str, compound: &str) -> Result<(), SimError> {
        let vessel = self.vessel_mut(vessel_id)?;
        if vessel.compounds.remove(compound).is_none() {
            return Err(SimError::Configuration(format!(
                "compound '{compound}' not active in vessel '{vessel_id}'"
            )));
        }
        Ok(())
    }

    /// Replace media: nutrient pools set, volume restored, evaporation
    /// accumulator reset
    pub fn feed(
        &mut self,
        vessel_id: &str,
        glucose_mM: f64,
        glutamine_mM: f64,
    ) -> Result<(), SimError> {
        for (name, value) in [("glucose", glucose_mM), ("glutamine", glutamine_mM)] {
            if !value.is_finite() || value < 0.0 {
                return Err(SimError::Validation(format!(
                    "{name} must be non-negative and finite, got {value}"
                )));
            }
        }
        let vessel = self.vessel_mut(vessel_id)?;
        vessel.resources = ResourcePools {
            glucose_mM,
            glutamine_mM,
            volume_mL: vessel.format.working_volume_mL(),
            evaporated_mL: 0.0,
        };
        Ok(())
    }

    /// Wash the well `n_washes` times at the given intensity in [0, 1].
    ///
    /// Each wash aspirates a small fraction of adherent cells (handling
    /// loss, leaves the well), removes half of the accumulated debris,
    /// and strips most of each compound's media concentration. Handling
    /// losses reduce `cell_count` proportionally, so viability and the
    /// death ledger are untouched: detachment is not death.
    pub fn wash(&mut self, vessel_id: &str, n_washes: u32, intensity: f64) -> Result<(), SimError> {
        if !(0.0..=1.0).contains(&intensity) || !intensity.is_finite() {
            return Err(SimError::Validation(format!(
                "wash intensity must be in [0, 1], got {intensity}"
            )));
        }
        let vessel = self.vessel_mut(vessel_id)?;
        // Per-wash fraction of adherent cells sheared off the substrate
        let loss_frac = 0.005 + 0.015 * intensity;
        // Fraction of each compound's concentration surviving one wash
        let carryover = 0.10;
        for _ in 0..n_washes {
            let lost = vessel.cell_count * loss_frac;
            vessel.cell_count -= lost;
            vessel.cells_lost_handling += lost;

            let debris_removed = vessel.debris_cells * 0.5;
            vessel.debris_cells -= debris_removed;
            vessel.cells_lost_handling += debris_removed;

            for exposure in vessel.compounds.values_mut() {
                exposure.dose_uM *= carryover;
            }
        }
        // Residues below any pharmacological relevance are dropped
        vessel.compounds.retain(|_, e| e.dose_uM > 1e-4);
        Ok(())
    }

    /// Detach and re-seed a fraction of a vessel into a new one.
    ///
    /// Only viable cells reattach; the target starts with a fresh ledger,
    /// fresh media, and `passage_number + 1`. The source is retained and
    /// marked superseded, never deleted.
    pub fn passage(
        &mut self,
        source_id: &str,
        target_id: &str,
        split_ratio: f64,
    ) -> Result<(), SimError> {
        if !split_ratio.is_finite() || split_ratio <= 0.0 || split_ratio > 1.0 {
            return Err(SimError::Validation(format!(
                "split ratio must be in (0, 1], got {split_ratio}"
            )));
        }
        if self.vessels.contains_key(target_id) {
            return Err(SimError::Configuration(format!(
                "target vessel '{target_id}' already exists"
            )));
        }
        let bio = &self.params.biology;
        let (transferred, format, cell_line, capacity, density, passage_number) = {
            let source = self.vessel(source_id)?;
            (
                source.viable_cells() * split_ratio * bio.passage_attach_efficiency,
                source.format,
                source.cell_line.clone(),
                source.capacity,
                source.density_level,
                source.passage_number,
            )
        };
        let viability = bio.seeding_viability;
        let target = VesselState {
            vessel_id: target_id.to_string(),
            cell_line,
            format,
            density_level: density,
            well_position: None,
            cell_count: transferred,
            capacity,
            viability,
            passage_number: passage_number + 1,
            death_ledger: DeathLedger {
                background: 1.0 - viability,
                ..Default::default()
            },
            stress: StressState::baseline(self.params.stress.baseline_level),
            compounds: BTreeMap::new(),
            resources: ResourcePools {
                glucose_mM: self.params.nutrients.glucose_fresh_mM,
                glutamine_mM: self.params.nutrients.glutamine_fresh_mM,
                volume_mL: format.working_volume_mL(),
                evaporated_mL: 0.0,
            },
            cells_lost_handling: 0.0,
            debris_cells: 0.0,
            seed_time_hr: self.clock_hr,
            last_update_hr: self.clock_hr,
            biology_epoch: 0,
            measurement_epoch: 0,
            superseded_by: None,
        };
        self.vessels.insert(target_id.to_string(), target);
        if let Some(source) = self.vessels.get_mut(source_id) {
            source.superseded_by = Some(target_id.to_string());
        }
        log::debug!("passaged '{source_id}' -> '{target_id}' at ratio {split_ratio}");
        Ok(())
    }

    /// Measure a vessel. Never mutates biological state; the only state
    /// change is the vessel's measurement draw epoch.
    pub fn measure(&mut self, vessel_id: &str, request: &MeasureRequest) -> Result<Reading, SimError> {
        let drift = self.request_drift(request);
        let modifiers = self.context.measurement_modifiers();

        let vessel = self.vessel(vessel_id)?;
        let position = request
            .well_position
            .or(vessel.well_position)
            .unwrap_or_else(|| center_of(vessel.format));
        let settings = AcquireSettings {
            detector: &self.params.detector,
            modifiers,
            drift,
            position,
            format: vessel.format,
            exposure: request.exposure_multiplier,
        };
        let epoch = vessel.measurement_epoch;
        let mut rng = self
            .partition
            .stream(StreamKind::Measurement, id_salt(vessel_id), epoch);

        let mut reading = Reading {
            assay: request.assay,
            subject_id: vessel_id.to_string(),
            channels: Vec::new(),
            luminescence: None,
            counts: None,
            exposure_multiplier: request.exposure_multiplier,
            batch_id: request.batch_id.clone(),
            plate_id: request.plate_id.clone(),
            well_position: position,
            plate_failure: drift.failure,
        };
        match request.assay {
            AssayType::OpticalMorphology => {
                reading.channels = acquire(project_vessel(vessel), &settings, &mut rng)?;
            }
            AssayType::Viability => {
                reading.luminescence = Some(viability_luminescence(vessel, &settings, &mut rng)?);
            }
            AssayType::Transcriptomics => {
                crate::detector::validate_exposure(&self.params.detector, request.exposure_multiplier)?;
                reading.counts = Some(transcript_counts(vessel, &mut rng)?);
            }
        }

        if let Some(vessel) = self.vessels.get_mut(vessel_id) {
            vessel.measurement_epoch += 1;
        }
        Ok(reading)
    }

    /// Measure a calibration material. Same output shape as `measure`,
    /// zero dependency on any vessel; draws come from the material
    /// stream, so interleaved material measurements cannot perturb any
    /// vessel's subsequent readings.
    pub fn measure_material(
        &mut self,
        material: &mut MaterialState,
        request: &MeasureRequest,
    ) -> Result<Reading, SimError> {
        if request.assay != AssayType::OpticalMorphology {
            return Err(SimError::Configuration(format!(
                "materials support only optical measurement, got {:?}",
                request.assay
            )));
        }
        let drift = self.request_drift(request);
        // Calibration plates share the 384-well geometry; unpositioned
        // requests default to the plate center, same as vessels
        let format = VesselFormat::Well384;
        let position = request.well_position.unwrap_or_else(|| center_of(format));
        let settings = AcquireSettings {
            detector: &self.params.detector,
            modifiers: self.context.measurement_modifiers(),
            drift,
            position,
            format,
            exposure: request.exposure_multiplier,
        };
        let mut rng = self.partition.stream(
            StreamKind::Material,
            id_salt(&material.material_id),
            material.measurement_epoch,
        );

        let base = project_material(material, &mut rng);
        let channels = acquire(base, &settings, &mut rng)?;
        // Draw state advances only once the request is accepted
        material.measurement_epoch += 1;
        Ok(Reading {
            assay: AssayType::OpticalMorphology,
            subject_id: material.material_id.clone(),
            channels,
            luminescence: None,
            counts: None,
            exposure_multiplier: request.exposure_multiplier,
            batch_id: request.batch_id.clone(),
            plate_id: request.plate_id.clone(),
            well_position: position,
            plate_failure: drift.failure,
        })
    }

    // ------------------------------------------------------------------

    fn vessel_mut(&mut self, vessel_id: &str) -> Result<&mut VesselState, SimError> {
        self.vessels
            .get_mut(vessel_id)
            .ok_or_else(|| SimError::Configuration(format!("unknown vessel '{vessel_id}'")))
    }

    fn request_drift(&self, request: &MeasureRequest) -> PipelineDrift {
        match (&request.batch_id, &request.plate_id) {
            (Some(batch), Some(plate)) => self.context.pipeline_drift(batch, plate),
            _ => PipelineDrift::neutral(),
        }
    }
}

/// Plate-center coordinate for vessels without an assigned position
fn center_of(format: VesselFormat) -> WellPosition {
    let (rows, cols) = format.grid();
    WellPosition::new(rows / 2, cols / 2)
}
