//! # Standard kinematic fitter
//!
//! [`KinFitter`] fits the fixed topology beam + target → proton + N photons
//! under the four energy-momentum closure constraints. It is the workhorse
//! for channels where every outgoing particle is detected; the proton's
//! kinetic energy is usually still unmeasured (zero sigma from the model)
//! and recovered by the fit from momentum balance.
//!
//! One instance is meant to be reused across all events of a run. Each
//! [`KinFitter::do_fit`] call resets the working state from the supplied
//! candidates, so the instance must not be shared across threads working on
//! different events.

use std::sync::Arc;

use crate::candidates::{Candidate, ParticleType};
use crate::constants::Mev;
use crate::kinematic_fit::fit_particle::FitParticle;
use crate::kinematic_fit::fit_result::FitResult;
use crate::kinematic_fit::fit_variable::FitVariable;
use crate::kinematic_fit::{EventFit, KinFitParams, ZVertexConfig};
use crate::kinfit_errors::KinFitError;
use crate::uncertainty_models::UncertaintyModel;

/// Fitter for beam + target → proton + N photons with energy-momentum
/// closure only.
pub struct KinFitter {
    model: Option<Arc<dyn UncertaintyModel>>,
    params: KinFitParams,
    z_config: ZVertexConfig,
    beam: FitVariable,
    particles: Vec<FitParticle>,
}

impl KinFitter {
    /// Create a fitter with default parameters.
    ///
    /// Arguments
    /// -----------------
    /// * `model` – The uncertainty model, or `None` to inject one later via
    ///   [`KinFitter::set_uncertainty_model`].
    /// * `fit_z_vertex` – Whether the z-vertex participates in the fit. When
    ///   enabled, [`KinFitter::set_z_vertex_sigma`] must be called before
    ///   fitting.
    pub fn new(model: Option<Arc<dyn UncertaintyModel>>, fit_z_vertex: bool) -> Self {
        Self::with_params(model, fit_z_vertex, KinFitParams::default())
    }

    /// Same as [`KinFitter::new`] with explicit fit parameters.
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

    /// Sigma of the z-vertex variable: zero makes it a free parameter,
    /// positive a soft Gaussian constraint. Fails with
    /// [`KinFitError::ZVertexNotEnabled`] when vertex fitting was not
    /// enabled at construction.
    pub fn set_z_vertex_sigma(&mut self, sigma: f64) -> Result<(), KinFitError> {
        self.z_config.set_sigma(sigma)
    }

    pub fn params(&self) -> &KinFitParams {
        &self.params
    }

    /// Fit one event.
    ///
    /// Arguments
    /// -----------------
    /// * `beam_energy` – The tagged photon beam energy.
    /// * `proton` – The measured recoil proton candidate.
    /// * `photons` – The measured photon candidates, at least one.
    ///
    /// Return
    /// ----------
    /// * `Ok(FitResult)` – The fit outcome; numerical failures are carried
    ///   inside as a failed status.
    /// * `Err(KinFitError)` – A configuration mistake (no uncertainty model,
    ///   z-vertex sigma unset, empty photon list).
    pub fn do_fit(
        &mut self,
        beam_energy: Mev,
        proton: &Candidate,
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
        self.particles.clear();
        self.particles.push(FitParticle::set_measured(
            proton,
            ParticleType::Proton,
            model.as_ref(),
            z_seed,
        )?);
        for photon in photons {
            self.particles.push(FitParticle::set_measured(
                photon,
                ParticleType::Photon,
                model.as_ref(),
                z_seed,
            )?);
        }

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

    /// The beam-energy variable of the last event.
    pub fn beam_variable(&self) -> &FitVariable {
        &self.beam
    }

    /// The fit particles of the last event, recoil first.
    pub fn fit_particles(&self) -> &[FitParticle] {
        &self.particles
    }

    /// The recoil proton of the last event.
    pub fn fitted_proton(&self) -> Option<&FitParticle> {
        self.particles
            .iter()
            .find(|p| p.particle_type() == ParticleType::Proton)
    }

    /// The photons of the last event, in candidate order.
    pub fn fitted_photons(&self) -> impl Iterator<Item = &FitParticle> {
        self.particles
            .iter()
            .filter(|p| p.particle_type() == ParticleType::Photon)
    }
}

#[cfg(test)]
mod test_kin_fitter {
    use super::*;
    use crate::candidates::Detector;
    use crate::constants::MASS_PROTON;
    use crate::uncertainty_models::ConstantSigmas;
    use approx::assert_relative_eq;

    /// Exactly closed event: two photons of energy `e_gamma` at polar angle
    /// `theta`, back to back in phi, recoil proton along the beam axis. The
    /// beam energy follows from four-momentum conservation.
    fn closed_event(e_gamma: f64, theta: f64) -> (f64, Candidate, Vec<Candidate>) {
        let q = 2.0 * e_gamma * (1.0 - theta.cos());
        let beam_e = 2.0 * e_gamma + q * q / (2.0 * (MASS_PROTON - q));
        let proton_pz = beam_e - 2.0 * e_gamma * theta.cos();
        let proton_ek = (proton_pz * proton_pz + MASS_PROTON * MASS_PROTON).sqrt() - MASS_PROTON;

        let proton = Candidate::new(proton_ek, 0.0, 0.0, Detector::ForwardWall);
        let photons = vec![
            Candidate::new(e_gamma, theta, 0.0, Detector::Barrel),
            Candidate::new(e_gamma, theta, std::f64::consts::PI, Detector::Barrel),
        ];
        (beam_e, proton, photons)
    }

    #[test]
    fn test_noiseless_event_fits_with_probability_one() {
        let model = Arc::new(ConstantSigmas::mc_long_target());
        let mut fitter = KinFitter::new(Some(model), false);

        let (beam_e, proton, photons) = closed_event(180.0, 0.5);
        let result = fitter.do_fit(beam_e, &proton, &photons).unwrap();

        assert!(result.is_success());
        assert!(result.probability > 0.999, "P = {}", result.probability);
        assert!(result.chi2 < 1e-6, "chi2 = {}", result.chi2);
        // 4 constraints, proton kinetic energy unmeasured
        assert_eq!(result.n_dof, 3);
        for pull in result.photons().flat_map(|p| p.pulls) {
            assert!(pull.abs() < 1e-3, "pull = {pull}");
        }
    }

    #[test]
    fn test_smeared_event_restores_closure() {
        let model = Arc::new(ConstantSigmas::mc_long_target());
        let mut fitter = KinFitter::new(Some(model), false);

        let (beam_e, proton, photons) = closed_event(180.0, 0.5);
        let smeared = vec![
            Candidate::new(photons[0].ek + 5.0, photons[0].theta, photons[0].phi, Detector::Barrel),
            Candidate::new(photons[1].ek - 4.0, photons[1].theta, photons[1].phi, Detector::Barrel),
        ];
        let result = fitter.do_fit(beam_e, &proton, &smeared).unwrap();

        assert!(result.is_success());
        assert!(result.chi2 > 0.0);

        // Fitted four-vectors must close against beam + target at rest.
        let total = result.total();
        assert_relative_eq!(total.e, result.beam_energy + MASS_PROTON, epsilon = 1e-6);
        assert_relative_eq!(total.p.z, result.beam_energy, epsilon = 1e-6);
        assert!(total.p.x.abs() < 1e-6);
    }

    #[test]
    fn test_missing_model_is_a_configuration_error() {
        let mut fitter = KinFitter::new(None, false);
        let (beam_e, proton, photons) = closed_event(150.0, 0.4);
        assert_eq!(
            fitter.do_fit(beam_e, &proton, &photons).unwrap_err(),
            KinFitError::MissingUncertaintyModel
        );
    }

    #[test]
    fn test_enabled_vertex_requires_sigma() {
        let model = Arc::new(ConstantSigmas::mc_long_target());
        let mut fitter = KinFitter::new(Some(model), true);
        let (beam_e, proton, photons) = closed_event(150.0, 0.4);
        assert_eq!(
            fitter.do_fit(beam_e, &proton, &photons).unwrap_err(),
            KinFitError::ZVertexSigmaUnset
        );
    }

    #[test]
    fn test_vertex_sigma_on_disabled_fitter_rejected() {
        let model = Arc::new(ConstantSigmas::mc_long_target());
        let mut fitter = KinFitter::new(Some(model), false);
        assert_eq!(
            fitter.set_z_vertex_sigma(1.0).unwrap_err(),
            KinFitError::ZVertexNotEnabled
        );
    }

    #[test]
    fn test_empty_photon_list_rejected() {
        let model = Arc::new(ConstantSigmas::mc_long_target());
        let mut fitter = KinFitter::new(Some(model), false);
        let (beam_e, proton, _) = closed_event(150.0, 0.4);
        assert!(matches!(
            fitter.do_fit(beam_e, &proton, &[]).unwrap_err(),
            KinFitError::CandidateCountMismatch { .. }
        ));
    }

    #[test]
    fn test_accessors_reflect_last_event() {
        let model = Arc::new(ConstantSigmas::mc_long_target());
        let mut fitter = KinFitter::new(Some(model), false);
        let (beam_e, proton, photons) = closed_event(180.0, 0.5);
        let result = fitter.do_fit(beam_e, &proton, &photons).unwrap();
        assert!(result.is_success());

        assert_relative_eq!(fitter.beam_variable().value, result.beam_energy);
        assert!(fitter.fitted_proton().is_some());
        assert_eq!(fitter.fitted_photons().count(), 2);
        let m = fitter.fitted_proton().unwrap().as_fitted().m();
        assert_relative_eq!(m, MASS_PROTON, epsilon = 1e-6);
    }
}
