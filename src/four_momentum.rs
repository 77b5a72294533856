//! # Four-momentum algebra
//!
//! A minimal Lorentz-vector type built on [`nalgebra::Vector3`], covering the
//! operations the fitter engines need: component-wise sums and differences,
//! invariant mass, and construction from energy plus direction angles.
//!
//! The metric convention is `m² = E² − |p|²`. [`LorentzVec::m`] preserves the
//! sign of `m²` so that unphysical intermediate states (e.g. a badly paired
//! photon combination during the combinatorial search) stay distinguishable
//! from physical ones instead of silently collapsing to `NaN`.

use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::constants::{Mev, Radian};

/// A four-momentum `(p, E)` with `p` in MeV/c and `E` in MeV.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LorentzVec {
    /// Spatial momentum components (px, py, pz)
    pub p: Vector3<f64>,
    /// Total energy
    pub e: f64,
}

impl LorentzVec {
    /// Build from explicit components.
    pub fn new(p: Vector3<f64>, e: Mev) -> Self {
        Self { p, e }
    }

    /// The null vector, useful as a sum seed.
    pub fn zero() -> Self {
        Self {
            p: Vector3::zeros(),
            e: 0.0,
        }
    }

    /// Build from total energy, rest mass and a flight direction.
    ///
    /// The momentum magnitude is `sqrt(E² − m²)`; the direction is normalized
    /// before scaling, so `dir` may have any non-zero length.
    pub fn from_e_mass_dir(e: Mev, mass: Mev, dir: Vector3<f64>) -> Self {
        let p_mag = (e * e - mass * mass).max(0.0).sqrt();
        Self {
            p: dir.normalize() * p_mag,
            e,
        }
    }

    /// Build from total energy, rest mass, and polar/azimuthal angles.
    pub fn from_e_mass_angles(e: Mev, mass: Mev, theta: Radian, phi: Radian) -> Self {
        Self::from_e_mass_dir(e, mass, unit_from_angles(theta, phi))
    }

    /// A particle of the given mass at rest.
    pub fn at_rest(mass: Mev) -> Self {
        Self {
            p: Vector3::zeros(),
            e: mass,
        }
    }

    /// Squared invariant mass `E² − |p|²` (can be negative for spacelike sums).
    pub fn m2(&self) -> f64 {
        self.e * self.e - self.p.norm_squared()
    }

    /// Invariant mass with the sign of `m²` preserved.
    pub fn m(&self) -> f64 {
        let m2 = self.m2();
        m2.signum() * m2.abs().sqrt()
    }

    /// Momentum magnitude.
    pub fn p_mag(&self) -> f64 {
        self.p.norm()
    }

    /// Kinetic energy for the given rest mass.
    pub fn ek(&self, mass: Mev) -> Mev {
        self.e - mass
    }

    /// Polar angle of the momentum direction.
    pub fn theta(&self) -> Radian {
        let p = self.p_mag();
        if p == 0.0 {
            0.0
        } else {
            (self.p.z / p).clamp(-1.0, 1.0).acos()
        }
    }

    /// Azimuthal angle of the momentum direction.
    pub fn phi(&self) -> Radian {
        self.p.y.atan2(self.p.x)
    }

    /// True when every component is finite.
    pub fn is_finite(&self) -> bool {
        self.e.is_finite() && self.p.iter().all(|c| c.is_finite())
    }
}

/// Unit vector for polar angle `theta` and azimuth `phi`.
pub fn unit_from_angles(theta: Radian, phi: Radian) -> Vector3<f64> {
    let st = theta.sin();
    Vector3::new(st * phi.cos(), st * phi.sin(), theta.cos())
}

impl Add for LorentzVec {
    type Output = LorentzVec;
    fn add(self, rhs: LorentzVec) -> LorentzVec {
        LorentzVec {
            p: self.p + rhs.p,
            e: self.e + rhs.e,
        }
    }
}

impl AddAssign for LorentzVec {
    fn add_assign(&mut self, rhs: LorentzVec) {
        self.p += rhs.p;
        self.e += rhs.e;
    }
}

impl Sub for LorentzVec {
    type Output = LorentzVec;
    fn sub(self, rhs: LorentzVec) -> LorentzVec {
        LorentzVec {
            p: self.p - rhs.p,
            e: self.e - rhs.e,
        }
    }
}

impl SubAssign for LorentzVec {
    fn sub_assign(&mut self, rhs: LorentzVec) {
        self.p -= rhs.p;
        self.e -= rhs.e;
    }
}

impl Neg for LorentzVec {
    type Output = LorentzVec;
    fn neg(self) -> LorentzVec {
        LorentzVec {
            p: -self.p,
            e: -self.e,
        }
    }
}

impl Sum for LorentzVec {
    fn sum<I: Iterator<Item = LorentzVec>>(iter: I) -> LorentzVec {
        iter.fold(LorentzVec::zero(), |acc, v| acc + v)
    }
}

impl std::fmt::Display for LorentzVec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(E={:.3}, p=[{:.3}, {:.3}, {:.3}], m={:.3})",
            self.e,
            self.p.x,
            self.p.y,
            self.p.z,
            self.m()
        )
    }
}
