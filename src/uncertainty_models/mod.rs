//! # Measurement uncertainty models
//!
//! Uncertainty models turn a particle hypothesis plus its measured cluster
//! into the Gaussian sigmas the kinematic fit weights its variables with.
//!
//! ## Public API
//!
//! ### [`UncertaintyModel`]
//! The trait every model implements:
//!
//! ```rust
//! use kinfit::candidates::{Candidate, Detector, ParticleType};
//! use kinfit::uncertainty_models::{ConstantSigmas, UncertaintyModel};
//!
//! let model = ConstantSigmas::mc_long_target();
//! let cand = Candidate::new(250.0, 0.9, 0.3, Detector::Barrel);
//! let sigmas = model.sigmas(ParticleType::Photon, &cand).unwrap();
//! assert!(sigmas.sigma_theta > 0.0);
//! ```
//!
//! ### Shipped models
//!
//! - [`ConstantSigmas`] – fixed sigmas per (particle type, detector); the
//!   simplest possible calibration, useful for synthetic data and as a
//!   baseline.
//! - [`ConstantRelativeE`] – same lookup, but the energy sigma is relative:
//!   `sigma_Ek = factor * Ek`, matching how calorimeter resolution actually
//!   scales over the usable energy range.
//!
//! Proton energy sigmas are typically zero in both models: a recoil proton
//! punches through the crystals, so its kinetic energy is treated as
//! unmeasured and recovered by the fit from momentum balance.

mod constant;

pub use constant::{ConstantRelativeE, ConstantSigmas};

use crate::candidates::{Candidate, ParticleType};
use crate::constants::{Mev, Radian, BEAM_ENERGY_SIGMA};
use crate::kinfit_errors::KinFitError;

/// Gaussian sigmas for one measured particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Uncertainties {
    /// Kinetic-energy sigma (MeV); zero marks the energy as unmeasured
    pub sigma_ek: Mev,
    /// Polar-angle sigma (radians)
    pub sigma_theta: Radian,
    /// Azimuthal-angle sigma (radians)
    pub sigma_phi: Radian,
}

impl Uncertainties {
    pub fn new(sigma_ek: Mev, sigma_theta: Radian, sigma_phi: Radian) -> Self {
        Self {
            sigma_ek,
            sigma_theta,
            sigma_phi,
        }
    }
}

/// Source of per-particle measurement sigmas.
///
/// Implementations must be pure and deterministic: the fitter may query the
/// same particle several times during one event and expects identical
/// answers.
pub trait UncertaintyModel {
    /// Sigmas for a candidate under the given particle hypothesis.
    ///
    /// Arguments
    /// -----------------
    /// * `ptype` – The particle hypothesis assigned to the cluster.
    /// * `candidate` – The measured cluster (energy, angles, detector).
    ///
    /// Return
    /// ----------
    /// * `Ok(Uncertainties)` – The Gaussian sigmas to weight the fit with.
    /// * `Err(KinFitError::UnknownParticle)` – If the model has no
    ///   calibration for this hypothesis.
    fn sigmas(
        &self,
        ptype: ParticleType,
        candidate: &Candidate,
    ) -> Result<Uncertainties, KinFitError>;

    /// Sigma of the tagged beam energy.
    ///
    /// The default is the tagger channel width; models backed by a real
    /// calibration may override it per energy.
    fn beam_energy_sigma(&self, _beam_e: Mev) -> Mev {
        BEAM_ENERGY_SIGMA
    }
}
