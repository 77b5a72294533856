//! # Hyperon-constrained fitter
//!
//! [`SigmaFitter`] extends the closure fit with a fifth constraint pinning
//! the invariant mass of the proton plus a chosen photon pair to the Sigma+
//! mass. Which two photons form the pair is the caller's choice per attempt;
//! looping over pairings and keeping the best probability is the caller's
//! combinatorial loop (or [`crate::decay_tree::TreeFitter`]'s job).
//!
//! The Sigma+ travels a few centimeters before decaying, so this fitter is
//! the main user of z-vertex fitting. With a free vertex the starting value
//! matters; it is seeded by a coarse grid scan over the target length that
//! picks the position minimizing the longitudinal momentum residual.

use std::sync::Arc;

use crate::candidates::{Candidate, ParticleType};
use crate::constants::{Mev, MASS_SIGMA_PLUS};
use crate::four_momentum::LorentzVec;
use crate::kinematic_fit::fit_particle::FitParticle;
use crate::kinematic_fit::fit_result::FitResult;
use crate::kinematic_fit::fit_variable::FitVariable;
use crate::kinematic_fit::{
    seed_z_by_scan, EventFit, KinFitParams, MassConstraint, ZVertexConfig,
};
use crate::kinfit_errors::KinFitError;
use crate::uncertainty_models::UncertaintyModel;

/// Fitter for beam + target → proton + N photons with the mass of
/// proton + two chosen photons pinned to the Sigma+ mass.
pub struct SigmaFitter {
    model: Option<Arc<dyn UncertaintyModel>>,
    params: KinFitParams,
    z_config: ZVertexConfig,
    beam: FitVariable,
    particles: Vec<FitParticle>,
    /// Photon-pair indices of the last event, in candidate numbering.
    pair: Option<(usize, usize)>,
}

impl SigmaFitter {
    pub fn new(model: Option<Arc<dyn UncertaintyModel>>, fit_z_vertex: bool) -> Self {
        Self::with_params(model, fit_z_vertex, KinFitParams::default())
    }

    pub fn with_params(
        model: Option<Arc<dyn UncertaintyModel>>,
        fit_z_vertex: bool,
        params: KinFitParams,
    ) -> Self {
        Self {
            model,
            params,
            z_config: ZVertexConfig::new(fit_z_vertex),
            beam: FitVariable::free(0.0),
            particles: Vec::new(),
            pair: None,
        }
    }

    pub fn set_uncertainty_model(&mut self, model: Arc<dyn UncertaintyModel>) {
        self.model = Some(model);
    }

    pub fn set_z_vertex_sigma(&mut self, sigma: f64) -> Result<(), KinFitError> {
        self.z_config.set_sigma(sigma)
    }

    pub fn params(&self) -> &KinFitParams {
        &self.params
    }

    /// Fit one event under one pairing hypothesis.
    ///
    /// Arguments
    /// -----------------
    /// * `beam_energy` – The tagged photon beam energy.
    /// * `proton` – The measured recoil proton candidate.
    /// * `photons` – The measured photon candidates, at least two.
    /// * `photon_pair` – Indices into `photons` of the two photons assigned
    ///   to the Sigma+ decay, distinct and in range.
    ///
    /// Return
    /// ----------
    /// * `Ok(FitResult)` – The fit outcome for this pairing.
    /// * `Err(KinFitError::InvalidPhotonPair)` – If the indices coincide or
    ///   exceed the photon list.
    pub fn do_fit(
        &mut self,
        beam_energy: Mev,
        proton: &Candidate,
        photons: &[Candidate],
        photon_pair: (usize, usize),
    ) -> Result<FitResult, KinFitError> {
        let model = self
            .model
            .clone()
            .ok_or(KinFitError::MissingUncertaintyModel)?;
        let (i, j) = photon_pair;
        if i == j || i >= photons.len() || j >= photons.len() {
            return Err(KinFitError::InvalidPhotonPair {
                i,
                j,
                len: photons.len(),
            });
        }
        let z_sigma = self.z_config.fit_sigma()?;
        let z_center = self.params.target.center;

        self.beam = FitVariable::new(beam_energy, model.beam_energy_sigma(beam_energy))?;
        self.particles.clear();
        self.particles.push(FitParticle::set_measured(
            proton,
            ParticleType::Proton,
            model.as_ref(),
            z_center,
        )?);
        for photon in photons {
            self.particles.push(FitParticle::set_measured(
                photon,
                ParticleType::Photon,
                model.as_ref(),
                z_center,
            )?);
        }
        self.pair = Some((i, j));

        // A free vertex gets a scanned starting value; a soft-constrained one
        // starts at its measurement, the target center.
        let mut z_var = match z_sigma {
            Some(sigma) if sigma == 0.0 => {
                let seed = seed_z_by_scan(beam_energy, &self.particles, &self.params);
                Some(FitVariable::free(seed))
            }
            Some(sigma) => Some(FitVariable::new(z_center, sigma)?),
            None => None,
        };

        let constraints = [MassConstraint {
            target_mass: MASS_SIGMA_PLUS,
            members: vec![0, 1 + i, 1 + j],
        }];

        let result = EventFit {
            beam: &mut self.beam,
            particles: &mut self.particles,
            z_vertex: z_var.as_mut(),
            fixed_z: z_center,
            mass_constraints: &constraints,
        }
        .run(&self.params);
        Ok(result)
    }

    pub fn beam_variable(&self) -> &FitVariable {
        &self.beam
    }

    /// The fit particles of the last event, recoil first.
    pub fn fit_particles(&self) -> &[FitParticle] {
        &self.particles
    }

    pub fn fitted_proton(&self) -> Option<&FitParticle> {
        self.particles
            .iter()
            .find(|p| p.particle_type() == ParticleType::Proton)
    }

    pub fn fitted_photons(&self) -> impl Iterator<Item = &FitParticle> {
        self.particles
            .iter()
            .filter(|p| p.particle_type() == ParticleType::Photon)
    }

    /// Summed four-vector of the constrained proton + photon-pair subset,
    /// from the current variable values.
    pub fn fitted_hyperon(&self) -> Option<LorentzVec> {
        let (i, j) = self.pair?;
        let members = [0, 1 + i, 1 + j];
        Some(
            members
                .iter()
                .map(|&k| self.particles[k].as_fitted())
                .sum(),
        )
    }
}
