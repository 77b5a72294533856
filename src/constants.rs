//! # Constants and type definitions for kinfit
//!
//! This module centralizes the **physical constants**, **detector geometry**, and **common type
//! definitions** used throughout the `kinfit` library.
//!
//! ## Overview
//!
//! - Particle rest masses (PDG values, MeV)
//! - Calorimeter geometry used to reconstruct flight directions
//! - Unit conversions (degrees ↔ radians)
//! - Core type aliases used across the crate
//!
//! These definitions are used by all main modules, including the fitter engines,
//! the decay-tree search, and the uncertainty models.

// -------------------------------------------------------------------------------------------------
// Unit conversions
// -------------------------------------------------------------------------------------------------

/// 2π, useful for angle wrapping
pub const DPI: f64 = 2. * std::f64::consts::PI;

/// Degrees → radians
pub const RADEG: f64 = std::f64::consts::PI / 180.0;

/// Numerical epsilon used for floating-point comparisons
pub const EPS: f64 = 1e-6;

// -------------------------------------------------------------------------------------------------
// Particle rest masses (MeV)
// -------------------------------------------------------------------------------------------------

/// Proton rest mass
pub const MASS_PROTON: f64 = 938.272;

/// Neutral pion rest mass
pub const MASS_PI0: f64 = 134.977;

/// Eta meson rest mass
pub const MASS_ETA: f64 = 547.862;

/// Eta-prime meson rest mass
pub const MASS_ETA_PRIME: f64 = 957.78;

/// Omega meson rest mass
pub const MASS_OMEGA: f64 = 782.65;

/// Sigma+ hyperon rest mass
pub const MASS_SIGMA_PLUS: f64 = 1189.37;

/// Short-lived neutral kaon rest mass
pub const MASS_K0_SHORT: f64 = 497.611;

// -------------------------------------------------------------------------------------------------
// Detector geometry (target-frame lengths, same unit as the target specification)
// -------------------------------------------------------------------------------------------------

/// Inner radius of the barrel calorimeter, measured from the nominal target center
pub const BARREL_RADIUS: f64 = 25.4;

/// Distance of the forward-wall calorimeter plane from the nominal target center
pub const FORWARD_WALL_Z: f64 = 145.7;

/// Tagged-beam energy resolution used when an uncertainty model does not override it (MeV)
pub const BEAM_ENERGY_SIGMA: f64 = 1.3;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Angle in radians
pub type Radian = f64;
/// Energy in MeV
pub type Mev = f64;
/// Length along the beam axis, in target units (cm)
pub type Centimeter = f64;
