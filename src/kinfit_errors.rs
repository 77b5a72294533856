use thiserror::Error;

use crate::candidates::ParticleType;

/// Configuration errors raised before any numerical work starts.
///
/// Numerical non-convergence and physically invalid inputs are not errors:
/// they are reported as a failed [`crate::kinematic_fit::FitResult`] so that
/// callers can skip to the next combinatorial candidate.
#[derive(Error, Debug)]
pub enum KinFitError {
    #[error("No uncertainty model provided in ctor or set with set_uncertainty_model")]
    MissingUncertaintyModel,

    #[error("Z vertex fitting not enabled")]
    ZVertexNotEnabled,

    #[error("Z vertex sigma not set although fitting is enabled")]
    ZVertexSigmaUnset,

    #[error("Negative sigma {0} is not a valid measurement uncertainty")]
    InvalidSigma(f64),

    #[error("Topology expects {expected} photon candidates, got {got}")]
    CandidateCountMismatch { expected: usize, got: usize },

    #[error("Photon pair indices ({i}, {j}) invalid for {len} photons")]
    InvalidPhotonPair { i: usize, j: usize, len: usize },

    #[error("Uncertainty model has no entry for particle: {0}")]
    UnknownParticle(ParticleType),

    #[error("Invalid particle type name: {0}")]
    InvalidParticleName(String),

    #[error("Invalid decay topology: {0}")]
    InvalidTopology(String),

    #[error("Invalid fit parameter: {0}")]
    InvalidFitParameter(String),
}

impl PartialEq for KinFitError {
    fn eq(&self, other: &Self) -> bool {
        use KinFitError::*;
        match (self, other) {
            (MissingUncertaintyModel, MissingUncertaintyModel) => true,
            (ZVertexNotEnabled, ZVertexNotEnabled) => true,
            (ZVertexSigmaUnset, ZVertexSigmaUnset) => true,
            (InvalidSigma(a), InvalidSigma(b)) => a == b,
            (
                CandidateCountMismatch {
                    expected: e1,
                    got: g1,
                },
                CandidateCountMismatch {
                    expected: e2,
                    got: g2,
                },
            ) => e1 == e2 && g1 == g2,
            (
                InvalidPhotonPair {
                    i: i1,
                    j: j1,
                    len: l1,
                },
                InvalidPhotonPair {
                    i: i2,
                    j: j2,
                    len: l2,
                },
            ) => i1 == i2 && j1 == j2 && l1 == l2,
            (UnknownParticle(a), UnknownParticle(b)) => a == b,
            (InvalidParticleName(a), InvalidParticleName(b)) => a == b,
            (InvalidTopology(a), InvalidTopology(b)) => a == b,
            (InvalidFitParameter(a), InvalidFitParameter(b)) => a == b,
            _ => false,
        }
    }
}
