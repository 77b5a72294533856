//! # Kinematic fitting engines
//!
//! This module binds measured candidates to the constrained least-squares
//! solver for one fixed reaction topology per engine:
//!
//! - [`KinFitter`] – beam + target → proton + N photons, energy-momentum
//!   closure only.
//! - [`NoProtonFitter`] – the recoil proton is entirely unmeasured and
//!   recovered from momentum balance.
//! - [`SigmaFitter`] – adds a fifth constraint pinning a chosen
//!   proton + two-photon subset to a fixed hyperon mass.
//!
//! The combinatorial generalization to arbitrary decay trees lives in
//! [`crate::decay_tree`].
//!
//! ## Typical usage
//!
//! ```rust
//! use std::sync::Arc;
//! use kinfit::candidates::{Candidate, Detector};
//! use kinfit::kinematic_fit::KinFitter;
//! use kinfit::uncertainty_models::ConstantSigmas;
//!
//! let model = Arc::new(ConstantSigmas::mc_long_target());
//! let mut fitter = KinFitter::new(Some(model), false);
//! # let _ = &mut fitter;
//! ```
//!
//! ## Error semantics
//!
//! `do_fit` returns `Err(KinFitError)` only for configuration mistakes
//! (missing uncertainty model, z-vertex misuse, bad indices). Everything the
//! solver itself can run into — iteration cap, singular systems, non-finite
//! values, an unphysical missing-mass solution — comes back as a *failed
//! [`FitResult`]*, safe to skip.

mod fit_particle;
mod fit_result;
mod fit_variable;
mod kin_fitter;
mod no_proton_fitter;
mod sigma_fitter;
pub(crate) mod solver;

pub use fit_particle::FitParticle;
pub use fit_result::{FailureReason, FitResult, FitStatus, FittedParticle};
pub use fit_variable::FitVariable;
pub use kin_fitter::KinFitter;
pub use no_proton_fitter::NoProtonFitter;
pub use sigma_fitter::SigmaFitter;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::candidates::ParticleType;
use crate::constants::{Centimeter, Mev, MASS_PROTON};
use crate::four_momentum::LorentzVec;
use crate::kinfit_errors::KinFitError;
use solver::{Solution, SolverVar};

// -------------------------------------------------------------------------------------------------
// Target geometry
// -------------------------------------------------------------------------------------------------

/// The production target: extent along the beam axis.
///
/// Used to seed and bound the z-vertex. When vertex fitting is disabled the
/// vertex is fixed at the target center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Extent along the beam axis
    pub length: Centimeter,
    /// Position of the target center along the beam axis
    pub center: Centimeter,
}

impl Target {
    pub fn new(length: Centimeter, center: Centimeter) -> Self {
        Self { length, center }
    }

    /// Upstream end of the target.
    pub fn start(&self) -> Centimeter {
        self.center - self.length / 2.0
    }

    /// Downstream end of the target.
    pub fn end(&self) -> Centimeter {
        self.center + self.length / 2.0
    }
}

impl Default for Target {
    /// A 10 cm liquid-hydrogen cell centered on the origin.
    fn default() -> Self {
        Self {
            length: 10.0,
            center: 0.0,
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Fit parameters
// -------------------------------------------------------------------------------------------------

/// Tunable parameters of the constrained fit.
///
/// Build with [`KinFitParams::builder`] for validated construction, or use
/// [`KinFitParams::default`] for values that work for typical
/// photoproduction events.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KinFitParams {
    /// Hard cap on solver iterations; exceeding it yields a failed result
    pub max_iterations: usize,
    /// Scaled constraint residuals must drop below this value
    pub constraint_tolerance: f64,
    /// Relative chi² change accepted as stationary
    pub chi2_change_tolerance: f64,
    /// Step width of the z-vertex seeding scan over the target length
    pub vertex_scan_step: Centimeter,
    /// Target geometry for vertex seeding and the disabled-vertex position
    pub target: Target,
}

impl Default for KinFitParams {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            constraint_tolerance: 1e-6,
            chi2_change_tolerance: 1e-8,
            vertex_scan_step: 0.5,
            target: Target::default(),
        }
    }
}

impl KinFitParams {
    pub fn builder() -> KinFitParamsBuilder {
        KinFitParamsBuilder::default()
    }
}

impl std::fmt::Display for KinFitParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            writeln!(f, "Kinematic fit parameters:")?;
            writeln!(f, "  max iterations: {}", self.max_iterations)?;
            writeln!(f, "  constraint tolerance: {:e}", self.constraint_tolerance)?;
            writeln!(f, "  chi2 change tolerance: {:e}", self.chi2_change_tolerance)?;
            writeln!(f, "  vertex scan step: {}", self.vertex_scan_step)?;
            write!(
                f,
                "  target: length {} centered at {}",
                self.target.length, self.target.center
            )
        } else {
            write!(
                f,
                "KinFitParams(max_it={}, tol={:e}, step={})",
                self.max_iterations, self.constraint_tolerance, self.vertex_scan_step
            )
        }
    }
}

/// Fluent builder for [`KinFitParams`].
///
/// ```rust
/// use kinfit::kinematic_fit::KinFitParams;
///
/// let params = KinFitParams::builder()
///     .max_iterations(50)
///     .vertex_scan_step(0.25)
///     .build()
///     .unwrap();
/// assert_eq!(params.max_iterations, 50);
/// ```
#[derive(Debug, Clone, Default)]
pub struct KinFitParamsBuilder {
    params: KinFitParams,
}

impl KinFitParamsBuilder {
    pub fn max_iterations(mut self, value: usize) -> Self {
        self.params.max_iterations = value;
        self
    }

    pub fn constraint_tolerance(mut self, value: f64) -> Self {
        self.params.constraint_tolerance = value;
        self
    }

    pub fn chi2_change_tolerance(mut self, value: f64) -> Self {
        self.params.chi2_change_tolerance = value;
        self
    }

    pub fn vertex_scan_step(mut self, value: Centimeter) -> Self {
        self.params.vertex_scan_step = value;
        self
    }

    pub fn target(mut self, target: Target) -> Self {
        self.params.target = target;
        self
    }

    /// Validate and produce the parameter set.
    pub fn build(self) -> Result<KinFitParams, KinFitError> {
        let p = &self.params;
        if p.max_iterations == 0 {
            return Err(KinFitError::InvalidFitParameter(
                "max_iterations must be positive".into(),
            ));
        }
        if !(p.constraint_tolerance > 0.0) {
            return Err(KinFitError::InvalidFitParameter(
                "constraint_tolerance must be positive".into(),
            ));
        }
        if !(p.chi2_change_tolerance > 0.0) {
            return Err(KinFitError::InvalidFitParameter(
                "chi2_change_tolerance must be positive".into(),
            ));
        }
        if !(p.vertex_scan_step > 0.0) {
            return Err(KinFitError::InvalidFitParameter(
                "vertex_scan_step must be positive".into(),
            ));
        }
        if p.target.length < 0.0 {
            return Err(KinFitError::InvalidFitParameter(
                "target length must not be negative".into(),
            ));
        }
        Ok(self.params)
    }
}

// -------------------------------------------------------------------------------------------------
// Z-vertex configuration
// -------------------------------------------------------------------------------------------------

/// Z-vertex handling shared by all engines.
///
/// Whether the vertex is fitted at all is fixed at construction. An enabled
/// vertex must have its sigma set before fitting: zero makes it a free
/// parameter, positive a soft Gaussian constraint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ZVertexConfig {
    enabled: bool,
    sigma: f64,
}

impl ZVertexConfig {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            sigma: f64::NAN,
        }
    }

    pub(crate) fn set_sigma(&mut self, sigma: f64) -> Result<(), KinFitError> {
        if !self.enabled {
            return Err(KinFitError::ZVertexNotEnabled);
        }
        if sigma < 0.0 {
            return Err(KinFitError::InvalidSigma(sigma));
        }
        self.sigma = sigma;
        Ok(())
    }

    /// The sigma to fit with; erroring when enabled but never set.
    pub(crate) fn fit_sigma(&self) -> Result<Option<f64>, KinFitError> {
        if !self.enabled {
            return Ok(None);
        }
        if self.sigma.is_nan() {
            return Err(KinFitError::ZVertexSigmaUnset);
        }
        Ok(Some(self.sigma))
    }
}

// -------------------------------------------------------------------------------------------------
// Shared fit assembly
// -------------------------------------------------------------------------------------------------

/// Four-vector of beam photon plus target proton at rest.
pub(crate) fn beam_lorentz_vec(beam_e: Mev) -> LorentzVec {
    LorentzVec::new(nalgebra::Vector3::new(0.0, 0.0, beam_e), beam_e)
        + LorentzVec::at_rest(MASS_PROTON)
}

/// An invariant-mass constraint over a subset of the outgoing particles:
/// `target_mass² − (Σ subset).m²` is driven to zero.
pub(crate) struct MassConstraint {
    pub target_mass: Mev,
    /// Indices into the outgoing particle list
    pub members: Vec<usize>,
}

/// One event's variable set wired for the solver: the beam-energy variable,
/// the outgoing particles, and the optional z-vertex variable.
pub(crate) struct EventFit<'a> {
    pub beam: &'a mut FitVariable,
    pub particles: &'a mut [FitParticle],
    /// `Some` when vertex fitting is enabled
    pub z_vertex: Option<&'a mut FitVariable>,
    /// Vertex used when fitting is disabled (the target center)
    pub fixed_z: Centimeter,
    pub mass_constraints: &'a [MassConstraint],
}

impl EventFit<'_> {
    /// Run the constrained fit and, on success, write the fitted values back
    /// into the beam, particle, and vertex variables.
    pub(crate) fn run(&mut self, params: &KinFitParams) -> FitResult {
        let n_particles = self.particles.len();
        let n_vars = 1 + 3 * n_particles + usize::from(self.z_vertex.is_some());
        let n_constraints = 4 + self.mass_constraints.len();

        let mut vars = Vec::with_capacity(n_vars);
        vars.push(SolverVar {
            value: self.beam.value,
            sigma: self.beam.sigma,
        });
        for p in self.particles.iter() {
            for (value, sigma) in p.solver_vars() {
                vars.push(SolverVar { value, sigma });
            }
        }
        if let Some(z) = self.z_vertex.as_deref() {
            vars.push(SolverVar {
                value: z.value,
                sigma: z.sigma,
            });
        }

        let has_z = self.z_vertex.is_some();
        let fixed_z = self.fixed_z;
        let particles = &*self.particles;
        let mass_constraints = self.mass_constraints;

        let residuals = move |x: &[f64]| -> DVector<f64> {
            let z = if has_z { x[x.len() - 1] } else { fixed_z };
            let outgoing: Vec<LorentzVec> = particles
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let v: [f64; 3] = x[1 + 3 * i..4 + 3 * i].try_into().unwrap();
                    p.lorentz_from_values(&v, z)
                })
                .collect();

            let mut diff = beam_lorentz_vec(x[0]);
            for lv in &outgoing {
                diff -= *lv;
            }

            let mut c = DVector::zeros(4 + mass_constraints.len());
            c[0] = diff.e;
            c[1] = diff.p.x;
            c[2] = diff.p.y;
            c[3] = diff.p.z;
            for (k, mc) in mass_constraints.iter().enumerate() {
                let sum: LorentzVec = mc.members.iter().map(|&i| outgoing[i]).sum();
                c[4 + k] = mc.target_mass * mc.target_mass - sum.m2();
            }
            c
        };

        let solution = solver::solve(&vars, n_constraints, residuals, params);
        self.apply(&solution)
    }

    fn apply(&mut self, solution: &Solution) -> FitResult {
        if !solution.status.is_success() {
            return FitResult {
                status: solution.status,
                probability: 0.0,
                chi2: solution.chi2,
                n_dof: solution.n_dof,
                iterations: solution.iterations,
                ..FitResult::default()
            };
        }

        let x = &solution.values;
        let fitted_z = if self.z_vertex.is_some() {
            x[x.len() - 1]
        } else {
            self.fixed_z
        };

        self.beam.apply_fit(x[0]);
        for (i, p) in self.particles.iter_mut().enumerate() {
            let v: [f64; 3] = x[1 + 3 * i..4 + 3 * i].try_into().unwrap();
            p.apply_fit(&v, fitted_z);
        }
        let z_pull = match self.z_vertex.as_deref_mut() {
            Some(z) => {
                z.apply_fit(fitted_z);
                z.pull
            }
            None => f64::NAN,
        };

        FitResult {
            status: FitStatus::Success,
            probability: solution.probability,
            chi2: solution.chi2,
            n_dof: solution.n_dof,
            iterations: solution.iterations,
            beam_energy: self.beam.value,
            beam_pull: self.beam.pull,
            z_vertex: fitted_z,
            z_vertex_pull: z_pull,
            particles: self
                .particles
                .iter()
                .map(|p| FittedParticle {
                    ptype: p.particle_type(),
                    lv: p.as_fitted(),
                    pulls: p.pulls(),
                })
                .collect(),
        }
    }
}

/// Seed an unmeasured z-vertex with a 1-D grid scan over the target length,
/// picking the position that minimizes the longitudinal momentum residual.
/// A coarse starting point, not a fit.
pub(crate) fn seed_z_by_scan(
    beam_e: Mev,
    particles: &[FitParticle],
    params: &KinFitParams,
) -> Centimeter {
    let beam_pz = beam_lorentz_vec(beam_e).p.z;
    let mut best_z = params.target.center;
    let mut best_residual = f64::INFINITY;

    let mut z = params.target.start();
    while z <= params.target.end() + 1e-9 {
        let sum_pz: f64 = particles.iter().map(|p| p.lorentz_vec(z).p.z).sum();
        let residual = (beam_pz - sum_pz).abs();
        if residual < best_residual {
            best_residual = residual;
            best_z = z;
        }
        z += params.vertex_scan_step;
    }
    best_z
}
