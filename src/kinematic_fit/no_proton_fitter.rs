//! # Missing-proton fitter
//!
//! [`NoProtonFitter`] handles the topology where the recoil proton escapes
//! detection entirely, e.g. through the downstream beam hole. The proton is
//! represented by three unmeasured variables seeded from the missing
//! four-vector of beam + target minus all photons; the four closure
//! constraints then determine it completely, leaving `N_constraints - 3`
//! degrees of freedom.
//!
//! A missing four-vector with vanishing momentum cannot seed the recoil
//! parameterization. That case is physically invalid input, not a
//! configuration mistake, and comes back as a failed result carrying
//! [`crate::kinematic_fit::FailureReason::UnphysicalRecoil`].

use std::sync::Arc;

use crate::candidates::{Candidate, ParticleType};
use crate::constants::Mev;
use crate::kinematic_fit::fit_particle::FitParticle;
use crate::kinematic_fit::fit_result::FitResult;
use crate::kinematic_fit::fit_variable::FitVariable;
use crate::kinematic_fit::{beam_lorentz_vec, EventFit, KinFitParams, ZVertexConfig};
use crate::kinfit_errors::KinFitError;
use crate::uncertainty_models::UncertaintyModel;

/// Fitter for beam + target → proton + N photons with the proton entirely
/// unmeasured.
pub struct NoProtonFitter {
    model: Option<Arc<dyn UncertaintyModel>>,
    params: KinFitParams,
    z_config: ZVertexConfig,
    beam: FitVariable,
    particles: Vec<FitParticle>,
}

impl NoProtonFitter {
    /// Create a fitter with default parameters; see [`NoProtonFitter::new`]
    /// counterparts on [`crate::kinematic_fit::KinFitter`] for the argument
    /// conventions shared by all engines.
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

    /// Fit one event without a proton candidate.
    ///
    /// Arguments
    /// -----------------
    /// * `beam_energy` – The tagged photon beam energy.
    /// * `photons` – The measured photon candidates, at least one.
    ///
    /// Return
    /// ----------
    /// * `Ok(FitResult)` – The fit outcome. An unphysical missing-mass
    ///   solution is reported here as a failed status, detected before the
    ///   solver runs.
    /// * `Err(KinFitError)` – A configuration mistake.
    pub fn do_fit(
        &mut self,
        beam_energy: Mev,
        photons: &[Candidate],
    ) -> Result<FitResult, KinFitError> {
        let model = self
            .model
            .clone()
            .ok_or(KinFitError::MissingUncertaintyModel)?;
        if photons.is_empty() {
            return Err(KinFitError::CandidateCountMismatch {
                expected: 1,
                got: 0,
            });
        }
        let z_sigma = self.z_config.fit_sigma()?;
        let z_seed = self.params.target.center;

        self.beam = FitVariable::new(beam_energy, model.beam_energy_sigma(beam_energy))?;
        let mut measured = Vec::with_capacity(photons.len());
        for photon in photons {
            measured.push(FitParticle::set_measured(
                photon,
                ParticleType::Photon,
                model.as_ref(),
                z_seed,
            )?);
        }

        let mut missing = beam_lorentz_vec(beam_energy);
        for p in &measured {
            missing -= p.lorentz_vec(z_seed);
        }
        let recoil =
            match FitParticle::set_unmeasured_recoil(&missing, ParticleType::Proton, z_seed) {
                Ok(recoil) => recoil,
                Err(reason) => {
                    self.particles = measured;
                    return Ok(FitResult::failed(reason));
                }
            };

        self.particles.clear();
        self.particles.push(recoil);
        self.particles.append(&mut measured);

        let mut z_var = match z_sigma {
            Some(sigma) => Some(FitVariable::new(z_seed, sigma)?),
            None => None,
        };

        let result = EventFit {
            beam: &mut self.beam,
            particles: &mut self.particles,
            z_vertex: z_var.as_mut(),
            fixed_z: self.params.target.center,
            mass_constraints: &[],
        }
        .run(&self.params);
        Ok(result)
    }

    pub fn beam_variable(&self) -> &FitVariable {
        &self.beam
    }

    /// The fit particles of the last event, inferred recoil first.
    pub fn fit_particles(&self) -> &[FitParticle] {
        &self.particles
    }

    /// The inferred recoil proton of the last event.
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
}

#[cfg(test)]
mod test_no_proton_fitter {
    use super::*;
    use crate::candidates::Detector;
    use crate::constants::MASS_PROTON;
    use crate::kinematic_fit::{FailureReason, FitStatus};
    use crate::uncertainty_models::ConstantSigmas;
    use approx::assert_relative_eq;

    /// Two symmetric photons; the beam energy is chosen so that the missing
    /// four-vector is exactly a proton along the beam axis.
    fn photons_with_exact_recoil(e_gamma: f64, theta: f64) -> (f64, Vec<Candidate>) {
        let q = 2.0 * e_gamma * (1.0 - theta.cos());
        let beam_e = 2.0 * e_gamma + q * q / (2.0 * (MASS_PROTON - q));
        let photons = vec![
            Candidate::new(e_gamma, theta, 0.0, Detector::Barrel),
            Candidate::new(e_gamma, theta, std::f64::consts::PI, Detector::Barrel),
        ];
        (beam_e, photons)
    }

    #[test]
    fn test_recoil_recovered_from_momentum_balance() {
        let model = Arc::new(ConstantSigmas::mc_long_target());
        let mut fitter = NoProtonFitter::new(Some(model), false);

        let (beam_e, photons) = photons_with_exact_recoil(180.0, 0.5);
        let result = fitter.do_fit(beam_e, &photons).unwrap();

        assert!(result.is_success());
        assert!(result.probability > 0.999);
        // 4 constraints, 3 free recoil parameters
        assert_eq!(result.n_dof, 1);

        let proton = result.proton().expect("recoil in result");
        assert_relative_eq!(proton.lv.m(), MASS_PROTON, epsilon = 1e-3);
        assert!(proton.pulls.iter().all(|p| p.is_nan()));
    }

    #[test]
    fn test_recoil_at_rest_is_unphysical_not_an_error() {
        let model = Arc::new(ConstantSigmas::mc_long_target());
        let mut fitter = NoProtonFitter::new(Some(model), false);

        // Both photons exactly along the beam axis carrying the full beam
        // energy: the missing four-vector is a proton at rest.
        let beam_e = 400.0;
        let photons = vec![
            Candidate::new(250.0, 0.0, 0.0, Detector::ForwardWall),
            Candidate::new(150.0, 0.0, 0.0, Detector::ForwardWall),
        ];
        let result = fitter.do_fit(beam_e, &photons).unwrap();

        assert_eq!(
            result.status,
            FitStatus::Failed(FailureReason::UnphysicalRecoil)
        );
    }

    #[test]
    fn test_missing_model_is_a_configuration_error() {
        let mut fitter = NoProtonFitter::new(None, false);
        let (beam_e, photons) = photons_with_exact_recoil(150.0, 0.4);
        assert_eq!(
            fitter.do_fit(beam_e, &photons).unwrap_err(),
            KinFitError::MissingUncertaintyModel
        );
    }

    #[test]
    fn test_smeared_photons_still_close() {
        let model = Arc::new(ConstantSigmas::mc_long_target());
        let mut fitter = NoProtonFitter::new(Some(model), false);

        let (beam_e, photons) = photons_with_exact_recoil(200.0, 0.6);
        let smeared = vec![
            Candidate::new(photons[0].ek + 6.0, photons[0].theta - 0.01, photons[0].phi, Detector::Barrel),
            Candidate::new(photons[1].ek - 3.0, photons[1].theta, photons[1].phi + 0.02, Detector::Barrel),
        ];
        let result = fitter.do_fit(beam_e, &smeared).unwrap();

        assert!(result.is_success());
        let total = result.total();
        assert_relative_eq!(total.e, result.beam_energy + MASS_PROTON, epsilon = 1e-6);
        assert_relative_eq!(
            result.proton().unwrap().lv.m(),
            MASS_PROTON,
            epsilon = 1e-6
        );
    }
}
