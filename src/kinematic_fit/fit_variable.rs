use crate::kinfit_errors::KinFitError;

/// One scalar fit quantity: current value, Gaussian sigma, and the pre-fit
/// snapshot the pull is computed against.
///
/// `sigma == 0.0` marks the variable as unmeasured (free): the solver gives
/// it no weight and determines it entirely from the constraints. A negative
/// sigma is a configuration error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitVariable {
    pub value: f64,
    pub sigma: f64,
    pub pull: f64,
    pub value_before: f64,
    pub sigma_before: f64,
}

impl FitVariable {
    /// A measured (or, with `sigma == 0`, free) variable; records the pre-fit
    /// snapshot at construction.
    pub fn new(value: f64, sigma: f64) -> Result<Self, KinFitError> {
        if sigma < 0.0 {
            return Err(KinFitError::InvalidSigma(sigma));
        }
        Ok(Self {
            value,
            sigma,
            pull: f64::NAN,
            value_before: value,
            sigma_before: sigma,
        })
    }

    /// An unmeasured variable seeded at `value`.
    pub fn free(value: f64) -> Self {
        Self {
            value,
            sigma: 0.0,
            pull: f64::NAN,
            value_before: value,
            sigma_before: 0.0,
        }
    }

    pub fn is_unmeasured(&self) -> bool {
        self.sigma == 0.0
    }

    /// Store the fitted value and derive the pull against the pre-fit
    /// snapshot. Unmeasured variables keep a NaN pull.
    pub(crate) fn apply_fit(&mut self, fitted: f64) {
        self.value = fitted;
        self.pull = if self.sigma_before > 0.0 {
            (fitted - self.value_before) / self.sigma_before
        } else {
            f64::NAN
        };
    }
}
