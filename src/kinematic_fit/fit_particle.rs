use crate::candidates::{Candidate, Detector, ParticleType};
use crate::constants::{Centimeter, Mev};
use crate::four_momentum::{unit_from_angles, LorentzVec};
use crate::kinematic_fit::fit_result::FailureReason;
use crate::kinematic_fit::fit_variable::FitVariable;
use crate::kinfit_errors::KinFitError;
use crate::uncertainty_models::UncertaintyModel;

/// How a particle's flight direction is reconstructed from its angle
/// variables.
///
/// Detected candidates point from the vertex to a calorimeter hit, so their
/// direction depends on the fitted z-vertex. An inferred recoil has no hit;
/// its angles describe the direction straight from the vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Geometry {
    Cluster(Detector),
    FreeDirection,
}

/// One particle of the fit: three variables `(1/Ek, theta, phi)` plus the
/// hypothesis and geometry needed to turn them into a four-vector.
///
/// The inverse kinetic energy is the fitted quantity because it is close to
/// linear in the constraints near threshold; the sigma is converted
/// accordingly, `sigma(1/Ek) = sigma(Ek) / Ek²`.
///
/// The four-vector is never stored. [`FitParticle::lorentz_vec`] recomputes
/// it from the current variable values and an externally supplied z-vertex,
/// which keeps the constraint functions pure.
#[derive(Debug, Clone, PartialEq)]
pub struct FitParticle {
    ptype: ParticleType,
    geometry: Geometry,
    /// Variable order: [1/Ek, theta, phi]
    vars: [FitVariable; 3],
    /// Vertex the particle was set with; replaced by the fitted vertex after
    /// a successful fit so that `as_fitted` stays consistent.
    z_vertex: Centimeter,
}

impl FitParticle {
    /// Populate from a measured candidate and the model's sigmas.
    pub fn set_measured(
        candidate: &Candidate,
        ptype: ParticleType,
        model: &dyn UncertaintyModel,
        z_vertex: Centimeter,
    ) -> Result<Self, KinFitError> {
        let sigmas = model.sigmas(ptype, candidate)?;

        let inv_ek = 1.0 / candidate.ek;
        let sigma_inv_ek = sigmas.sigma_ek * inv_ek * inv_ek;

        Ok(Self {
            ptype,
            geometry: Geometry::Cluster(candidate.detector),
            vars: [
                FitVariable::new(inv_ek, sigma_inv_ek)?,
                FitVariable::new(candidate.theta, sigmas.sigma_theta)?,
                FitVariable::new(candidate.phi, sigmas.sigma_phi)?,
            ],
            z_vertex,
        })
    }

    /// Populate an entirely unmeasured recoil from the missing four-vector.
    ///
    /// The kinetic energy is derived from the missing momentum magnitude,
    /// `Ek = sqrt(P² + m²) − m`. A vanishing missing momentum leaves the
    /// inverse-energy parameter undefined; that case is a physically invalid
    /// input, reported as a local failure the caller turns into a failed
    /// result.
    pub fn set_unmeasured_recoil(
        missing: &LorentzVec,
        ptype: ParticleType,
        z_vertex: Centimeter,
    ) -> Result<Self, FailureReason> {
        let mass = ptype.mass();
        let p = missing.p_mag();
        let ek = (p * p + mass * mass).sqrt() - mass;
        if !ek.is_finite() || ek <= f64::EPSILON {
            return Err(FailureReason::UnphysicalRecoil);
        }

        Ok(Self {
            ptype,
            geometry: Geometry::FreeDirection,
            vars: [
                FitVariable::free(1.0 / ek),
                FitVariable::free(missing.theta()),
                FitVariable::free(missing.phi()),
            ],
            z_vertex,
        })
    }

    pub fn particle_type(&self) -> ParticleType {
        self.ptype
    }

    /// The three fit variables in order `[1/Ek, theta, phi]`.
    pub fn vars(&self) -> &[FitVariable; 3] {
        &self.vars
    }

    /// Current four-vector for an explicit z-vertex.
    pub fn lorentz_vec(&self, z_vertex: Centimeter) -> LorentzVec {
        let values = [self.vars[0].value, self.vars[1].value, self.vars[2].value];
        self.lorentz_from_values(&values, z_vertex)
    }

    /// Four-vector at the particle's own vertex: the seed vertex right after
    /// `set_*`, the fitted vertex after a successful fit.
    pub fn as_fitted(&self) -> LorentzVec {
        self.lorentz_vec(self.z_vertex)
    }

    /// Pulls in variable order, NaN for unmeasured entries.
    pub fn pulls(&self) -> [f64; 3] {
        [self.vars[0].pull, self.vars[1].pull, self.vars[2].pull]
    }

    /// Pre-fit values in variable order.
    pub fn values_before(&self) -> [f64; 3] {
        [
            self.vars[0].value_before,
            self.vars[1].value_before,
            self.vars[2].value_before,
        ]
    }

    /// Pre-fit sigmas in variable order.
    pub fn sigmas_before(&self) -> [f64; 3] {
        [
            self.vars[0].sigma_before,
            self.vars[1].sigma_before,
            self.vars[2].sigma_before,
        ]
    }

    /// Four-vector for arbitrary variable values, without touching the
    /// particle state. The solver's constraint closures call this while
    /// perturbing variables.
    pub(crate) fn lorentz_from_values(
        &self,
        values: &[f64; 3],
        z_vertex: Centimeter,
    ) -> LorentzVec {
        let [inv_ek, theta, phi] = *values;
        let mass = self.ptype.mass();
        let e: Mev = 1.0 / inv_ek + mass;
        let dir = match self.geometry {
            Geometry::Cluster(detector) => detector.direction_from_vertex(theta, phi, z_vertex),
            Geometry::FreeDirection => unit_from_angles(theta, phi),
        };
        LorentzVec::from_e_mass_dir(e, mass, dir)
    }

    /// Store fitted variable values (deriving pulls) and the fitted vertex.
    pub(crate) fn apply_fit(&mut self, values: &[f64; 3], z_vertex: Centimeter) {
        for (var, &v) in self.vars.iter_mut().zip(values.iter()) {
            var.apply_fit(v);
        }
        self.z_vertex = z_vertex;
    }

    /// Solver-facing view: (value, sigma) per variable.
    pub(crate) fn solver_vars(&self) -> [(f64, f64); 3] {
        [
            (self.vars[0].value, self.vars[0].sigma),
            (self.vars[1].value, self.vars[1].sigma),
            (self.vars[2].value, self.vars[2].sigma),
        ]
    }
}

#[cfg(test)]
mod test_fit_particle {
    use super::*;
    use crate::uncertainty_models::ConstantSigmas;
    use approx::assert_relative_eq;

    #[test]
    fn test_inverse_energy_sigma_conversion() {
        let model = ConstantSigmas::mc_long_target();
        let cand = Candidate::new(200.0, 1.1, 0.4, Detector::Barrel);
        let p = FitParticle::set_measured(&cand, ParticleType::Photon, &model, 0.0).unwrap();

        assert_relative_eq!(p.vars()[0].value, 1.0 / 200.0, epsilon = 1e-15);
        assert_relative_eq!(
            p.vars()[0].sigma,
            3.0 / (200.0 * 200.0),
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_prefit_views_agree() {
        let model = ConstantSigmas::mc_long_target();
        let cand = Candidate::new(320.0, 0.8, -2.1, Detector::ForwardWall);
        let p = FitParticle::set_measured(&cand, ParticleType::Photon, &model, 1.5).unwrap();

        let fitted = p.as_fitted();
        let unfit = p.lorentz_vec(1.5);
        assert_eq!(fitted, unfit);
        assert_relative_eq!(fitted.e, 320.0, epsilon = 1e-12);
    }

    #[test]
    fn test_recoil_from_missing_vector() {
        let missing = LorentzVec::from_e_mass_angles(
            1100.0,
            crate::constants::MASS_PROTON,
            0.6,
            2.0,
        );
        let p =
            FitParticle::set_unmeasured_recoil(&missing, ParticleType::Proton, 0.0).unwrap();

        assert!(p.vars().iter().all(|v| v.is_unmeasured()));
        let lv = p.as_fitted();
        assert_relative_eq!(lv.m(), crate::constants::MASS_PROTON, epsilon = 1e-9);
        assert_relative_eq!(lv.theta(), 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_vanishing_missing_momentum_is_unphysical() {
        let missing = LorentzVec::at_rest(crate::constants::MASS_PROTON);
        let err = FitParticle::set_unmeasured_recoil(&missing, ParticleType::Proton, 0.0)
            .unwrap_err();
        assert_eq!(err, FailureReason::UnphysicalRecoil);
    }
}
