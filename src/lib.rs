pub mod candidates;
pub mod constants;
pub mod decay_tree;
pub mod four_momentum;
pub mod kinematic_fit;
pub mod kinfit_errors;
pub mod uncertainty_models;

pub use candidates::{Candidate, Detector, ParticleType};
pub use decay_tree::{DecayTopology, TreeFitter};
pub use kinematic_fit::{FitResult, KinFitter, NoProtonFitter, SigmaFitter};
pub use kinfit_errors::KinFitError;
