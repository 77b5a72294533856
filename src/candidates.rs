//! # Detected candidates and particle hypotheses
//!
//! A [`Candidate`] is one detected cluster: a measured kinetic energy and two
//! direction angles, tagged with the calorimeter that produced it. Candidates
//! carry no identity; the fitter assigns a [`ParticleType`] hypothesis per fit
//! attempt.
//!
//! ## Overview
//!
//! - [`Detector`] – which calorimeter saw the cluster; this decides how the
//!   flight direction is reconstructed from the angles and the event vertex.
//! - [`Candidate`] – the measured `(Ek, theta, phi)` triple.
//! - [`ParticleType`] – final-state and intermediate-state hypotheses with
//!   their PDG rest masses, parsable from the short names used in decay
//!   topology strings (`"g"`, `"p"`, `"pi0"`, ...).

use std::str::FromStr;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::constants::{
    Centimeter, Mev, Radian, BARREL_RADIUS, FORWARD_WALL_Z, MASS_ETA, MASS_ETA_PRIME,
    MASS_K0_SHORT, MASS_OMEGA, MASS_PI0, MASS_PROTON, MASS_SIGMA_PLUS,
};
use crate::four_momentum::unit_from_angles;
use crate::kinfit_errors::KinFitError;

/// Calorimeter that produced a cluster.
///
/// The barrel covers central polar angles at a fixed radius from the beam
/// axis; the forward wall is a plane at fixed distance downstream. The hit
/// position implied by `(theta, phi)` differs between the two, which is what
/// makes the reconstructed direction depend on the event vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Detector {
    Barrel,
    ForwardWall,
}

impl Detector {
    /// Cluster position implied by the measured angles, in the nominal frame
    /// centered on the target.
    pub fn hit_position(&self, theta: Radian, phi: Radian) -> Vector3<f64> {
        match self {
            Detector::Barrel => unit_from_angles(theta, phi) * BARREL_RADIUS,
            Detector::ForwardWall => {
                let rxy = FORWARD_WALL_Z * theta.tan();
                Vector3::new(rxy * phi.cos(), rxy * phi.sin(), FORWARD_WALL_Z)
            }
        }
    }

    /// Flight direction from a vertex displaced by `z_vertex` along the beam
    /// axis to the cluster position.
    pub fn direction_from_vertex(
        &self,
        theta: Radian,
        phi: Radian,
        z_vertex: Centimeter,
    ) -> Vector3<f64> {
        self.hit_position(theta, phi) - Vector3::new(0.0, 0.0, z_vertex)
    }
}

/// One detected cluster with its measured kinematics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Measured kinetic energy (MeV)
    pub ek: Mev,
    /// Measured polar angle (radians)
    pub theta: Radian,
    /// Measured azimuthal angle (radians)
    pub phi: Radian,
    /// Calorimeter that produced the cluster
    pub detector: Detector,
}

impl Candidate {
    pub fn new(ek: Mev, theta: Radian, phi: Radian, detector: Detector) -> Self {
        Self {
            ek,
            theta,
            phi,
            detector,
        }
    }
}

/// Particle hypothesis, final-state or intermediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticleType {
    Photon,
    Proton,
    Pi0,
    Eta,
    EtaPrime,
    Omega,
    SigmaPlus,
    K0Short,
}

impl ParticleType {
    /// PDG rest mass in MeV.
    pub fn mass(&self) -> Mev {
        match self {
            ParticleType::Photon => 0.0,
            ParticleType::Proton => MASS_PROTON,
            ParticleType::Pi0 => MASS_PI0,
            ParticleType::Eta => MASS_ETA,
            ParticleType::EtaPrime => MASS_ETA_PRIME,
            ParticleType::Omega => MASS_OMEGA,
            ParticleType::SigmaPlus => MASS_SIGMA_PLUS,
            ParticleType::K0Short => MASS_K0_SHORT,
        }
    }

    /// Short name as used in decay topology strings.
    pub fn name(&self) -> &'static str {
        match self {
            ParticleType::Photon => "g",
            ParticleType::Proton => "p",
            ParticleType::Pi0 => "pi0",
            ParticleType::Eta => "eta",
            ParticleType::EtaPrime => "eta'",
            ParticleType::Omega => "omega",
            ParticleType::SigmaPlus => "sigma+",
            ParticleType::K0Short => "k0s",
        }
    }
}

impl std::fmt::Display for ParticleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ParticleType {
    type Err = KinFitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "g" | "gamma" => Ok(ParticleType::Photon),
            "p" | "proton" => Ok(ParticleType::Proton),
            "pi0" => Ok(ParticleType::Pi0),
            "eta" => Ok(ParticleType::Eta),
            "eta'" | "etap" => Ok(ParticleType::EtaPrime),
            "omega" => Ok(ParticleType::Omega),
            "sigma+" => Ok(ParticleType::SigmaPlus),
            "k0s" => Ok(ParticleType::K0Short),
            _ => Err(KinFitError::InvalidParticleName(s.to_string())),
        }
    }
}
