use crate::candidates::{Candidate, Detector, ParticleType};
use crate::constants::RADEG;
use crate::kinfit_errors::KinFitError;
use crate::uncertainty_models::{Uncertainties, UncertaintyModel};

/// Fixed sigmas per (particle type, detector).
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantSigmas {
    pub photon_barrel: Uncertainties,
    pub photon_forward: Uncertainties,
    pub proton_barrel: Uncertainties,
    pub proton_forward: Uncertainties,
}

impl ConstantSigmas {
    pub fn new(
        photon_barrel: Uncertainties,
        photon_forward: Uncertainties,
        proton_barrel: Uncertainties,
        proton_forward: Uncertainties,
    ) -> Self {
        Self {
            photon_barrel,
            photon_forward,
            proton_barrel,
            proton_forward,
        }
    }

    /// The same sigmas for every type and detector, handy for synthetic data.
    pub fn uniform(sigmas: Uncertainties) -> Self {
        Self::new(sigmas, sigmas, sigmas, sigmas)
    }

    /// Calibration derived from long-target simulation.
    ///
    /// Proton energy sigmas are zero: the recoil kinetic energy is left to
    /// the fit (punch-through).
    pub fn mc_long_target() -> Self {
        Self::new(
            Uncertainties::new(3.0, 3.79 * RADEG, 1.78 * RADEG),
            Uncertainties::new(8.0, 0.42 * RADEG, 1.15 * RADEG),
            Uncertainties::new(0.0, 5.5 * RADEG, 5.3 * RADEG),
            Uncertainties::new(0.0, 2.8 * RADEG, 4.45 * RADEG),
        )
    }

    fn lookup(&self, ptype: ParticleType, detector: Detector) -> Option<Uncertainties> {
        match (ptype, detector) {
            (ParticleType::Photon, Detector::Barrel) => Some(self.photon_barrel),
            (ParticleType::Photon, Detector::ForwardWall) => Some(self.photon_forward),
            (ParticleType::Proton, Detector::Barrel) => Some(self.proton_barrel),
            (ParticleType::Proton, Detector::ForwardWall) => Some(self.proton_forward),
            _ => None,
        }
    }
}

impl UncertaintyModel for ConstantSigmas {
    fn sigmas(
        &self,
        ptype: ParticleType,
        candidate: &Candidate,
    ) -> Result<Uncertainties, KinFitError> {
        self.lookup(ptype, candidate.detector)
            .ok_or(KinFitError::UnknownParticle(ptype))
    }
}

/// Constant sigmas with a relative energy resolution.
///
/// The stored `sigma_ek` entries are relative factors; the returned energy
/// sigma is `factor * Ek` of the candidate. Angular sigmas stay absolute.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantRelativeE {
    inner: ConstantSigmas,
}

impl ConstantRelativeE {
    pub fn new(table: ConstantSigmas) -> Self {
        Self { inner: table }
    }

    /// Calibration derived from long-target simulation, relative energies.
    pub fn mc_long_target() -> Self {
        Self::new(ConstantSigmas::new(
            Uncertainties::new(0.0107, 3.79 * RADEG, 1.78 * RADEG),
            Uncertainties::new(0.035, 0.42 * RADEG, 1.15 * RADEG),
            Uncertainties::new(0.0, 5.5 * RADEG, 5.3 * RADEG),
            Uncertainties::new(0.0, 2.8 * RADEG, 4.45 * RADEG),
        ))
    }
}

impl UncertaintyModel for ConstantRelativeE {
    fn sigmas(
        &self,
        ptype: ParticleType,
        candidate: &Candidate,
    ) -> Result<Uncertainties, KinFitError> {
        let mut s = self.inner.sigmas(ptype, candidate)?;
        s.sigma_ek *= candidate.ek;
        Ok(s)
    }
}

#[cfg(test)]
mod test_constant_models {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_lookup_per_detector() {
        let model = ConstantSigmas::mc_long_target();
        let barrel = Candidate::new(200.0, 1.2, 0.0, Detector::Barrel);
        let forward = Candidate::new(200.0, 0.15, 0.0, Detector::ForwardWall);

        let sb = model.sigmas(ParticleType::Photon, &barrel).unwrap();
        let sf = model.sigmas(ParticleType::Photon, &forward).unwrap();
        assert_ne!(sb, sf);

        // recoil proton energy is unmeasured in this calibration
        let sp = model.sigmas(ParticleType::Proton, &barrel).unwrap();
        assert_eq!(sp.sigma_ek, 0.0);
    }

    #[test]
    fn test_unknown_particle_rejected() {
        let model = ConstantSigmas::mc_long_target();
        let cand = Candidate::new(200.0, 1.2, 0.0, Detector::Barrel);
        let err = model.sigmas(ParticleType::Pi0, &cand).unwrap_err();
        assert_eq!(err, KinFitError::UnknownParticle(ParticleType::Pi0));
    }

    #[test]
    fn test_relative_energy_scales_with_ek() {
        let model = ConstantRelativeE::mc_long_target();
        let lo = Candidate::new(100.0, 1.2, 0.0, Detector::Barrel);
        let hi = Candidate::new(400.0, 1.2, 0.0, Detector::Barrel);

        let s_lo = model.sigmas(ParticleType::Photon, &lo).unwrap();
        let s_hi = model.sigmas(ParticleType::Photon, &hi).unwrap();
        assert_relative_eq!(s_lo.sigma_ek, 0.0107 * 100.0, epsilon = 1e-12);
        assert_relative_eq!(s_hi.sigma_ek / s_lo.sigma_ek, 4.0, epsilon = 1e-12);
        // angles unaffected
        assert_eq!(s_lo.sigma_theta, s_hi.sigma_theta);
    }
}
