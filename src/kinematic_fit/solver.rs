//! # Constrained least-squares solver
//!
//! Iteratively linearized least squares with Lagrange multipliers, the
//! classical scheme for kinematic fitting. Each iteration linearizes the
//! constraints at the current point and solves the KKT system
//!
//! ```text
//! | W  Aᵀ | | s |   | 0 |
//! | A  0  | | λ | = | b |      b = A (x − x_m) − c(x)
//! ```
//!
//! where `W = diag(1/sigma²)` (zero rows for unmeasured variables), `A` is
//! the constraint Jacobian, and `s = x_next − x_m` the shift from the
//! measurement. The objective `chi² = sᵀ W s` penalizes pulling measured
//! variables away from their measured values; unmeasured variables move
//! freely to satisfy the constraints.
//!
//! The Jacobian is evaluated by central differences; constraint closures
//! therefore only need to be pure functions of the variable vector.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use statrs::function::gamma::gamma_ur;

use crate::kinematic_fit::fit_result::{FailureReason, FitStatus};
use crate::kinematic_fit::KinFitParams;

/// One solver variable: current (measured or seeded) value and its sigma.
/// `sigma == 0` marks the variable as unmeasured.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SolverVar {
    pub value: f64,
    pub sigma: f64,
}

/// Raw solver outcome; the fitter engines dress it into a `FitResult`.
#[derive(Debug, Clone)]
pub(crate) struct Solution {
    pub status: FitStatus,
    pub values: Vec<f64>,
    pub chi2: f64,
    pub n_dof: usize,
    pub iterations: usize,
    pub probability: f64,
}

/// Run the constrained fit to completion.
///
/// Arguments
/// -----------------
/// * `vars` – The full variable set; values are the starting point and the
///   measurement the chi² is anchored to.
/// * `n_constraints` – Length of the residual vector.
/// * `residuals` – Pure function returning the constraint residuals for a
///   candidate variable vector; driven to zero by the iteration.
/// * `params` – Iteration cap and convergence tolerances.
///
/// Return
/// ----------
/// * A [`Solution`] whose status is `Success` on convergence, or `Failed`
///   with the reason (iteration cap, non-finite values, singular system).
///   Never panics and never hangs: the iteration cap bounds the loop.
pub(crate) fn solve<F>(
    vars: &[SolverVar],
    n_constraints: usize,
    residuals: F,
    params: &KinFitParams,
) -> Solution
where
    F: Fn(&[f64]) -> DVector<f64>,
{
    let n = vars.len();
    let m = n_constraints;

    let x_measured = DVector::from_iterator(n, vars.iter().map(|v| v.value));
    let weights: Vec<f64> = vars
        .iter()
        .map(|v| if v.sigma == 0.0 { 0.0 } else { 1.0 / (v.sigma * v.sigma) })
        .collect();
    let n_unmeasured = vars.iter().filter(|v| v.sigma == 0.0).count();
    let n_dof = m.saturating_sub(n_unmeasured);

    let mut x = x_measured.clone();
    let mut chi2 = 0.0;
    let mut prev_chi2 = f64::INFINITY;
    let mut scales: Option<Vec<f64>> = None;

    for iteration in 1..=params.max_iterations {
        let c = residuals(x.as_slice());
        debug_assert_eq!(c.len(), m);

        if c.iter().any(|v| !v.is_finite()) {
            return failed(FailureReason::NonFiniteValue, &x, chi2, n_dof, iteration);
        }

        // Residual scales frozen at the first evaluation keep the
        // convergence test meaningful across mixed units (MeV vs MeV²).
        let scales =
            scales.get_or_insert_with(|| c.iter().map(|v| v.abs().max(1.0)).collect());
        let max_scaled = c
            .iter()
            .zip(scales.iter())
            .map(|(v, s)| v.abs() / s)
            .fold(0.0_f64, f64::max);

        chi2 = (0..n)
            .map(|i| weights[i] * (x[i] - x_measured[i]).powi(2))
            .sum();

        let chi2_stable = iteration == 1
            || (chi2 - prev_chi2).abs() <= params.chi2_change_tolerance * chi2.max(1.0);
        if max_scaled < params.constraint_tolerance && chi2_stable {
            debug!(
                "constrained fit converged after {iteration} iteration(s), chi2 = {chi2:.6e}"
            );
            return Solution {
                status: FitStatus::Success,
                values: x.as_slice().to_vec(),
                chi2,
                n_dof,
                iterations: iteration,
                probability: survival_probability(chi2, n_dof),
            };
        }
        prev_chi2 = chi2;

        let a = jacobian(&residuals, &x, m);

        // KKT system for the shift s = x_next − x_measured.
        let dim = n + m;
        let mut kkt = DMatrix::<f64>::zeros(dim, dim);
        for i in 0..n {
            kkt[(i, i)] = weights[i];
        }
        for r in 0..m {
            for col in 0..n {
                kkt[(n + r, col)] = a[(r, col)];
                kkt[(col, n + r)] = a[(r, col)];
            }
        }

        let mut rhs = DVector::<f64>::zeros(dim);
        let shift = &x - &x_measured;
        let b = &a * shift - c;
        for r in 0..m {
            rhs[n + r] = b[r];
        }

        let Some(sol) = kkt.lu().solve(&rhs) else {
            warn!("constrained fit: singular KKT system at iteration {iteration}");
            return failed(FailureReason::SingularSystem, &x, chi2, n_dof, iteration);
        };

        for i in 0..n {
            x[i] = x_measured[i] + sol[i];
        }
        if x.iter().any(|v| !v.is_finite()) {
            return failed(FailureReason::NonFiniteValue, &x, chi2, n_dof, iteration);
        }
    }

    warn!(
        "constrained fit: iteration budget ({}) exhausted, chi2 = {chi2:.6e}",
        params.max_iterations
    );
    failed(
        FailureReason::IterationLimit,
        &x,
        chi2,
        n_dof,
        params.max_iterations,
    )
}

fn failed(
    reason: FailureReason,
    x: &DVector<f64>,
    chi2: f64,
    n_dof: usize,
    iterations: usize,
) -> Solution {
    Solution {
        status: FitStatus::Failed(reason),
        values: x.as_slice().to_vec(),
        chi2,
        n_dof,
        iterations,
        probability: 0.0,
    }
}

/// Central-difference Jacobian of the residual vector.
fn jacobian<F>(residuals: &F, x: &DVector<f64>, m: usize) -> DMatrix<f64>
where
    F: Fn(&[f64]) -> DVector<f64>,
{
    let n = x.len();
    let mut a = DMatrix::<f64>::zeros(m, n);
    let mut probe = x.as_slice().to_vec();

    for j in 0..n {
        let h = 1e-6 * x[j].abs().max(1.0);
        let x_j = probe[j];

        probe[j] = x_j + h;
        let plus = residuals(&probe);
        probe[j] = x_j - h;
        let minus = residuals(&probe);
        probe[j] = x_j;

        let inv_2h = 1.0 / (2.0 * h);
        for r in 0..m {
            a[(r, j)] = (plus[r] - minus[r]) * inv_2h;
        }
    }
    a
}

/// Chi-squared survival probability `Q(ndf/2, chi2/2)`.
///
/// With zero degrees of freedom the constraints fix the unmeasured variables
/// exactly and the probability is defined as 1.
fn survival_probability(chi2: f64, n_dof: usize) -> f64 {
    if n_dof == 0 {
        return 1.0;
    }
    gamma_ur(n_dof as f64 / 2.0, chi2.max(0.0) / 2.0)
}

#[cfg(test)]
mod test_solver {
    use super::*;
    use crate::kinematic_fit::KinFitParams;
    use approx::assert_relative_eq;

    fn params() -> KinFitParams {
        KinFitParams::default()
    }

    #[test]
    fn test_linear_constraint_two_measured() {
        // x + y = 10, measured x = 4, y = 4, equal sigmas: fitted 5, 5.
        let vars = [
            SolverVar { value: 4.0, sigma: 1.0 },
            SolverVar { value: 4.0, sigma: 1.0 },
        ];
        let sol = solve(
            &vars,
            1,
            |x| DVector::from_vec(vec![x[0] + x[1] - 10.0]),
            &params(),
        );

        assert!(sol.status.is_success());
        assert_relative_eq!(sol.values[0], 5.0, epsilon = 1e-9);
        assert_relative_eq!(sol.values[1], 5.0, epsilon = 1e-9);
        assert_relative_eq!(sol.chi2, 2.0, epsilon = 1e-9);
        assert_eq!(sol.n_dof, 1);
    }

    #[test]
    fn test_unmeasured_variable_absorbs_constraint() {
        // y unmeasured: it takes the full shift, chi2 stays zero.
        let vars = [
            SolverVar { value: 4.0, sigma: 1.0 },
            SolverVar { value: 0.0, sigma: 0.0 },
        ];
        let sol = solve(
            &vars,
            1,
            |x| DVector::from_vec(vec![x[0] + x[1] - 10.0]),
            &params(),
        );

        assert!(sol.status.is_success());
        assert_relative_eq!(sol.values[0], 4.0, epsilon = 1e-9);
        assert_relative_eq!(sol.values[1], 6.0, epsilon = 1e-9);
        assert_relative_eq!(sol.chi2, 0.0, epsilon = 1e-12);
        assert_eq!(sol.n_dof, 0);
        assert_relative_eq!(sol.probability, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_nonlinear_constraint_converges() {
        // x² + y² = 25 from a nearby start.
        let vars = [
            SolverVar { value: 3.2, sigma: 0.5 },
            SolverVar { value: 3.9, sigma: 0.5 },
        ];
        let sol = solve(
            &vars,
            1,
            |x| DVector::from_vec(vec![x[0] * x[0] + x[1] * x[1] - 25.0]),
            &params(),
        );

        assert!(sol.status.is_success());
        let r = (sol.values[0].powi(2) + sol.values[1].powi(2)).sqrt();
        assert_relative_eq!(r, 5.0, epsilon = 1e-6);
        assert!(sol.iterations > 1);
    }

    #[test]
    fn test_already_satisfied_converges_first_iteration() {
        let vars = [
            SolverVar { value: 6.0, sigma: 1.0 },
            SolverVar { value: 4.0, sigma: 1.0 },
        ];
        let sol = solve(
            &vars,
            1,
            |x| DVector::from_vec(vec![x[0] + x[1] - 10.0]),
            &params(),
        );

        assert!(sol.status.is_success());
        assert_eq!(sol.iterations, 1);
        assert_relative_eq!(sol.chi2, 0.0, epsilon = 1e-12);
        assert_relative_eq!(sol.probability, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_singular_system_reported() {
        // Two identical constraints on one free variable: rank-deficient.
        let vars = [SolverVar { value: 1.0, sigma: 0.0 }];
        let sol = solve(
            &vars,
            2,
            |x| DVector::from_vec(vec![x[0] - 5.0, x[0] - 5.0]),
            &params(),
        );

        assert_eq!(
            sol.status,
            FitStatus::Failed(FailureReason::SingularSystem)
        );
    }

    #[test]
    fn test_iteration_cap_bounds_divergence() {
        // Unsatisfiable constraint: x² = -1 can never converge.
        let vars = [SolverVar { value: 1.0, sigma: 1.0 }];
        let sol = solve(
            &vars,
            1,
            |x| DVector::from_vec(vec![x[0] * x[0] + 1.0]),
            &params(),
        );

        assert!(!sol.status.is_success());
        assert!(sol.iterations <= params().max_iterations);
    }
}
