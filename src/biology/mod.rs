//! Hazard and growth integration.
//!
//! Advances one vessel's biological state by a time delta. Each call is
//! internally chunked into sub-steps; within a sub-step every increment
//! is computed from the start-of-step snapshot and then applied, so the
//! apparent cycles (stress -> death -> viability -> growth) never read
//! their own writes.
//!
//! Death accounting converts each hazard source into an exact survival
//! factor `exp(-h * dt)` applied to the currently-viable fraction only.
//! The total death increment is apportioned across ledger fields by
//! hazard share, and viability is decremented by the same total, so the
//! conservation identity holds to floating-point accuracy at every step
//! and every ledger field is monotone by construction.
//!
//! Growth rescales `cell_count` alone; population fractions move only
//! through death increments. Handling losses and debris never enter the
//! ledger (detachment is not death).

use rand_chacha::ChaCha12Rng;
use rand_distr::{Distribution, LogNormal};

use crate::config::Parameters;
use crate::context::BiologyModifiers;
use crate::engine::SimError;
use crate::pharmacology::CompoundLibrary;
use crate::state::{VesselState, DEATH_EPS};

/// Per-substep hazard rates (1/hr), computed from a state snapshot
#[derive(Debug, Clone, Copy, Default)]
struct HazardRates {
    compound: f64,
    starvation: f64,
    er_stress: f64,
    mitochondrial: f64,
    confluence: f64,
    background: f64,
}

impl HazardRates {
    fn total(&self) -> f64 {
        self.compound
            + self.starvation
            + self.er_stress
            + self.mitochondrial
            + self.confluence
            + self.background
    }
}

/// Advance a vessel by `dt_hr`.
///
/// `dt_hr` must be non-negative (validated by the engine); zero is a
/// no-op. Large deltas are chunked to `params.biology.max_substep_hr` so
/// hazards and nutrient levels are re-evaluated on the way.
pub fn advance_vessel(
    vessel: &mut VesselState,
    dt_hr: f64,
    params: &Parameters,
    library: &CompoundLibrary,
    mods: &BiologyModifiers,
    rng: &mut ChaCha12Rng,
) -> Result<(), SimError> {
    if dt_hr == 0.0 {
        return Ok(());
    }

    let bio = &params.biology;
    let n_steps = (dt_hr / bio.max_substep_hr).ceil().max(1.0) as usize;
    let h = dt_hr / n_steps as f64;

    let jitter_dist = LogNormal::new(0.0, bio.growth_jitter_sigma.max(0.0))
        .map_err(|e| SimError::Validation(format!("growth jitter sigma: {e}")))?;

    let mut now_hr = vessel.last_update_hr;
    for _ in 0..n_steps {
        // Snapshot: all increments below read only these values
        let viability0 = vessel.viability;
        let cell_count0 = vessel.cell_count;
        let confluence0 = vessel.confluence();
        let stress0 = vessel.stress;
        let resources0 = vessel.resources;

        let inputs = library.hazard_inputs(vessel, mods.ec50_multiplier);

        // --- hazard rates from the snapshot ---
        let mut rates = HazardRates {
            compound: inputs.kill_rate_per_hr,
            background: bio.basal_death_rate_per_hr,
            ..Default::default()
        };

        let glucose_depth = depletion_depth(
            resources0.glucose_mM,
            params.nutrients.glucose_starvation_mM,
        );
        let glutamine_depth = depletion_depth(
            resources0.glutamine_mM,
            params.nutrients.glutamine_starvation_mM,
        );
        rates.starvation =
            params.nutrients.starvation_max_hazard_per_hr * glucose_depth.max(glutamine_depth);

        rates.er_stress = threshold_hazard(
            stress0.er_stress,
            params.stress.hazard_threshold,
            params.stress.er_max_hazard_per_hr,
        );
        rates.mitochondrial = threshold_hazard(
            stress0.mito_dysfunction,
            params.stress.hazard_threshold,
            params.stress.mito_max_hazard_per_hr,
        );

        if confluence0 > bio.confluence_hazard_threshold {
            let over = (confluence0 - bio.confluence_hazard_threshold)
                / (1.0 - bio.confluence_hazard_threshold);
            rates.confluence = bio.confluence_hazard_rate_per_hr * over;
        }

        // --- death accounting: survival applied to the viable fraction ---
        let total_rate = rates.total();
        if total_rate > 0.0 {
            let death_total = viability0 * (1.0 - (-total_rate * h).exp());
            let share = death_total / total_rate;
            vessel.death_ledger.compound += rates.compound * share;
            vessel.death_ledger.starvation += rates.starvation * share;
            vessel.death_ledger.er_stress += rates.er_stress * share;
            vessel.death_ledger.mitochondrial += rates.mitochondrial * share;
            vessel.death_ledger.confluence += rates.confluence * share;
            vessel.death_ledger.background += rates.background * share;
            vessel.viability -= death_total;
        }

        // --- logistic growth on viable mass, population-proportional ---
        let lag_tau = bio.lag_tau_hr * vessel.density_level.lag_multiplier();
        let age_hr = (now_hr - vessel.seed_time_hr).max(0.0);
        let lag = 1.0 - (-age_hr / lag_tau).exp();
        let edge = match vessel.well_position {
            Some(pos) if pos.is_edge(vessel.format) => 1.0 - bio.edge_growth_penalty,
            _ => 1.0,
        };
        let nutrient_factor = (1.0 - glucose_depth).min(1.0 - glutamine_depth);
        let jitter = jitter_dist.sample(rng);
        let r_eff = bio.base_growth_rate_per_hr
            * lag
            * edge
            * mods.growth_rate_multiplier
            * nutrient_factor
            * jitter;
        let growth = r_eff * cell_count0 * viability0 * (1.0 - confluence0) * h;
        vessel.cell_count = (cell_count0 + growth).max(0.0);

        // --- nutrient consumption and evaporation ---
        let viable_millions_per_mL = if resources0.volume_mL > 0.0 {
            (cell_count0 * viability0 / 1.0e6) / resources0.volume_mL
        } else {
            0.0
        };
        vessel.resources.glucose_mM = (resources0.glucose_mM
            - params.nutrients.glucose_uptake_mM_per_hr * viable_millions_per_mL * h)
            .max(0.0);
        vessel.resources.glutamine_mM = (resources0.glutamine_mM
            - params.nutrients.glutamine_uptake_mM_per_hr * viable_millions_per_mL * h)
            .max(0.0);

        let evap_mL = resources0.volume_mL * params.nutrients.evaporation_rate_per_hr * h;
        let new_volume = (resources0.volume_mL - evap_mL).max(1e-6);
        // Solutes stay behind: concentrations rise as volume drops
        let concentration_factor = resources0.volume_mL / new_volume;
        vessel.resources.glucose_mM *= concentration_factor;
        vessel.resources.glutamine_mM *= concentration_factor;
        vessel.resources.volume_mL = new_volume;
        vessel.resources.evaporated_mL += evap_mL;

        // --- stress latents relax toward compound-driven targets ---
        let sens = mods.stress_sensitivity;
        let base = params.stress.baseline_level;
        vessel.stress.er_stress = relax(
            stress0.er_stress,
            (base + inputs.er_drive * sens).clamp(0.0, 1.0),
            params.stress.er_tau_on_hr,
            params.stress.er_tau_off_hr,
            h,
        );
        vessel.stress.mito_dysfunction = relax(
            stress0.mito_dysfunction,
            (base + inputs.mito_drive * sens).clamp(0.0, 1.0),
            params.stress.mito_tau_on_hr,
            params.stress.mito_tau_off_hr,
            h,
        );
        vessel.stress.transport_dysfunction = relax(
            stress0.transport_dysfunction,
            (base + inputs.transport_drive * sens).clamp(0.0, 1.0),
            params.stress.transport_tau_on_hr,
            params.stress.transport_tau_off_hr,
            h,
        );

        now_hr += h;
    }

    vessel.last_update_hr = now_hr;

    // The engine treats a breach here as an internal defect, never as a
    // recoverable condition.
    let deviation = vessel.conservation_deviation();
    if deviation.abs() > DEATH_EPS {
        return Err(SimError::Conservation {
            vessel_id: vessel.vessel_id.clone(),
            deviation,
        });
    }
    if !(-DEATH_EPS..=1.0 + DEATH_EPS).contains(&vessel.viability) {
        return Err(SimError::Conservation {
            vessel_id: vessel.vessel_id.clone(),
            deviation: vessel.viability,
        });
    }

    Ok(())
}

/// Depletion depth in [0, 1]: 0 above the threshold, 1 at full depletion
fn depletion_depth(level_mM: f64, threshold_mM: f64) -> f64 {
    if threshold_mM <= 0.0 || level_mM >= threshold_mM {
        0.0
    } else {
        ((threshold_mM - level_mM) / threshold_mM).clamp(0.0, 1.0)
    }
}

/// Hazard ramp above a latent threshold, max rate at latent = 1
fn threshold_hazard(latent: f64, threshold: f64, max_rate_per_hr: f64) -> f64 {
    if latent <= threshold || threshold >= 1.0 {
        0.0
    } else {
        max_rate_per_hr * (latent - threshold) / (1.0 - threshold)
    }
}

/// First-order relaxation toward `target`; rising and falling edges use
/// different time constants (stress builds faster than it clears)
fn relax(current: f64, target: f64, tau_on_hr: f64, tau_off_hr: f64, dt_hr: f64) -> f64 {
    let tau = if target > current { tau_on_hr } else { tau_off_hr };
    if tau <= 0.0 {
        return target;
    }
    let next = current + (target - current) * (1.0 - (-dt_hr / tau).exp());
    next.clamp(0.0, 1.0)
}
