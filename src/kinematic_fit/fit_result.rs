//! # Fit results
//!
//! One [`FitResult`] is produced per `do_fit` call (or written per accepted
//! permutation by the tree search). It is a plain immutable value: the caller
//! extracts whatever it needs and moves on, nothing is persisted by the
//! fitter.
//!
//! Numerical and physical failures live *inside* the result as
//! [`FitStatus::Failed`] so that a combinatorial driver can skip to the next
//! assignment without error plumbing; only configuration mistakes surface as
//! [`crate::kinfit_errors::KinFitError`].

use serde::{Deserialize, Serialize};

use crate::candidates::ParticleType;
use crate::constants::{Centimeter, Mev};
use crate::four_momentum::LorentzVec;

/// Why a fit attempt did not produce a usable solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The solver exceeded its iteration budget without converging.
    IterationLimit,
    /// A non-finite value appeared during iteration.
    NonFiniteValue,
    /// The linearized constraint system could not be solved.
    SingularSystem,
    /// The missing-mass solution for an unmeasured recoil required
    /// non-positive kinetic energy; detected before invoking the solver.
    UnphysicalRecoil,
    /// Placeholder status of a result no fit has been written into yet.
    NotAttempted,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FailureReason::IterationLimit => "iteration budget exhausted",
            FailureReason::NonFiniteValue => "non-finite value during iteration",
            FailureReason::SingularSystem => "singular constraint system",
            FailureReason::UnphysicalRecoil => "unphysical missing-energy solution",
            FailureReason::NotAttempted => "no fit attempted",
        };
        write!(f, "{text}")
    }
}

/// Outcome of one fit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStatus {
    Success,
    Failed(FailureReason),
}

impl FitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, FitStatus::Success)
    }
}

/// One outgoing particle after the fit: its hypothesis, fitted four-vector,
/// and the pulls of its three variables `[1/Ek, theta, phi]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FittedParticle {
    pub ptype: ParticleType,
    pub lv: LorentzVec,
    pub pulls: [f64; 3],
}

/// Complete outcome of one fit attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub status: FitStatus,
    /// Chi-squared survival probability, in [0, 1] for a successful fit.
    pub probability: f64,
    pub chi2: f64,
    /// Constraint count minus unmeasured-variable count.
    pub n_dof: usize,
    pub iterations: usize,
    /// Fitted beam energy and its pull.
    pub beam_energy: Mev,
    pub beam_pull: f64,
    /// Fitted z-vertex (the fixed target center when vertex fitting is
    /// disabled) and its pull (NaN when free or fixed).
    pub z_vertex: Centimeter,
    pub z_vertex_pull: f64,
    /// Outgoing particles in fit order: recoil first, then photons.
    pub particles: Vec<FittedParticle>,
}

impl FitResult {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The fitted recoil, when the topology has one.
    pub fn proton(&self) -> Option<&FittedParticle> {
        self.particles
            .iter()
            .find(|p| p.ptype == ParticleType::Proton)
    }

    /// Fitted photons in fit order.
    pub fn photons(&self) -> impl Iterator<Item = &FittedParticle> {
        self.particles
            .iter()
            .filter(|p| p.ptype == ParticleType::Photon)
    }

    /// Sum of all outgoing fitted four-vectors.
    pub fn total(&self) -> LorentzVec {
        self.particles.iter().map(|p| p.lv).sum()
    }

    /// A failed result carrying only the reason; used for pre-solver
    /// rejections such as an unphysical recoil.
    pub(crate) fn failed(reason: FailureReason) -> Self {
        Self {
            status: FitStatus::Failed(reason),
            ..Self::default()
        }
    }
}

impl Default for FitResult {
    /// Placeholder a caller hands to the tree search; stays untouched until
    /// a fit is actually attempted.
    fn default() -> Self {
        Self {
            status: FitStatus::Failed(FailureReason::NotAttempted),
            probability: 0.0,
            chi2: f64::NAN,
            n_dof: 0,
            iterations: 0,
            beam_energy: f64::NAN,
            beam_pull: f64::NAN,
            z_vertex: f64::NAN,
            z_vertex_pull: f64::NAN,
            particles: Vec::new(),
        }
    }
}

impl std::fmt::Display for FitResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            FitStatus::Success => write!(
                f,
                "fit converged: P = {:.4}, chi2/ndf = {:.3}/{}, {} iterations",
                self.probability, self.chi2, self.n_dof, self.iterations
            ),
            FitStatus::Failed(reason) => write!(f, "fit failed: {reason}"),
        }
    }
}

#[cfg(test)]
mod test_fit_result {
    use super::*;

    #[test]
    fn test_default_is_not_attempted() {
        let r = FitResult::default();
        assert!(!r.is_success());
        assert_eq!(r.status, FitStatus::Failed(FailureReason::NotAttempted));
        assert!(r.particles.is_empty());
    }

    #[test]
    fn test_accessors() {
        let proton = FittedParticle {
            ptype: ParticleType::Proton,
            lv: LorentzVec::at_rest(crate::constants::MASS_PROTON),
            pulls: [f64::NAN; 3],
        };
        let photon = FittedParticle {
            ptype: ParticleType::Photon,
            lv: LorentzVec::from_e_mass_angles(100.0, 0.0, 0.4, 0.0),
            pulls: [0.1, -0.2, 0.05],
        };
        let r = FitResult {
            status: FitStatus::Success,
            probability: 0.93,
            chi2: 0.4,
            n_dof: 3,
            iterations: 2,
            beam_energy: 450.0,
            beam_pull: 0.02,
            z_vertex: 0.0,
            z_vertex_pull: f64::NAN,
            particles: vec![proton, photon],
        };

        assert!(r.is_success());
        assert_eq!(r.proton().unwrap().ptype, ParticleType::Proton);
        assert_eq!(r.photons().count(), 1);
        assert!(r.total().e > 1000.0);
        assert!(format!("{r}").contains("P = 0.93"));
    }
}
