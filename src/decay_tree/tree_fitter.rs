//! # Combinatorial tree fitter
//!
//! [`TreeFitter`] runs one constrained fit per distinguishable assignment of
//! detected photons to the photon leaves of a [`DecayTopology`]. The
//! assignments are enumerated once at construction; per event the caller
//! drives a pull loop:
//!
//! ```text
//! fitter.prepare_fits(beam_e, &proton, &photons)?;
//! let mut result = FitResult::default();
//! while fitter.next_fit(&mut result) {
//!     // keep the best probability, break early, ...
//! }
//! ```
//!
//! The loop shape keeps peak memory at one fit's working set regardless of
//! multiplicity, and leaves any best-so-far or early-stop policy to the
//! caller. An optional iteration filter rejects assignments from their
//! measured invariant masses before the solver runs; a filtered assignment
//! counts as no attempt at all.

use std::sync::Arc;

use log::info;

use crate::candidates::{Candidate, ParticleType};
use crate::constants::Mev;
use crate::decay_tree::{DecayTopology, NodeMembers, NodeSums};
use crate::four_momentum::LorentzVec;
use crate::kinematic_fit::{
    EventFit, FitParticle, FitResult, FitVariable, KinFitParams, MassConstraint, ZVertexConfig,
};
use crate::kinfit_errors::KinFitError;
use crate::uncertainty_models::UncertaintyModel;

/// Search progress over one event's assignments.
///
/// `Prepared` doubles as the iterating state; the cursor points at the next
/// assignment to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchState {
    Idle,
    Prepared { cursor: usize },
    Exhausted,
}

/// Fitter that enumerates leaf assignments of a decay topology and fits each
/// one with the closure constraints plus the topology's invariant-mass
/// constraints.
pub struct TreeFitter {
    topology: DecayTopology,
    internal_nodes: Vec<NodeMembers>,
    permutations: Vec<Vec<usize>>,
    model: Option<Arc<dyn UncertaintyModel>>,
    params: KinFitParams,
    z_config: ZVertexConfig,
    filter: Option<Box<dyn Fn(&NodeSums) -> bool>>,
    state: SearchState,
    prepared_beam: FitVariable,
    prepared_particles: Vec<FitParticle>,
    prepared_z: Option<FitVariable>,
    beam: FitVariable,
    particles: Vec<FitParticle>,
    /// Index of the last fitted assignment.
    current_perm: Option<usize>,
}

impl TreeFitter {
    /// Create a fitter for one decay topology with default parameters.
    ///
    /// Building the assignment list costs `K!` signature evaluations for `K`
    /// photon leaves and happens once here, amortized over all events.
    pub fn new(
        topology: DecayTopology,
        model: Option<Arc<dyn UncertaintyModel>>,
        fit_z_vertex: bool,
    ) -> Self {
        Self::with_params(topology, model, fit_z_vertex, KinFitParams::default())
    }

    pub fn with_params(
        topology: DecayTopology,
        model: Option<Arc<dyn UncertaintyModel>>,
        fit_z_vertex: bool,
        params: KinFitParams,
    ) -> Self {
        let internal_nodes = topology.internal_nodes();
        let permutations = topology.unique_permutations();
        info!(
            "tree fitter for {topology}: {} photon assignments, {} mass constraint(s)",
            permutations.len(),
            internal_nodes.iter().filter(|n| n.mass.is_some()).count()
        );
        Self {
            topology,
            internal_nodes,
            permutations,
            model,
            params,
            z_config: ZVertexConfig::new(fit_z_vertex),
            filter: None,
            state: SearchState::Idle,
            prepared_beam: FitVariable::free(0.0),
            prepared_particles: Vec::new(),
            prepared_z: None,
            beam: FitVariable::free(0.0),
            particles: Vec::new(),
            current_perm: None,
        }
    }

    pub fn set_uncertainty_model(&mut self, model: Arc<dyn UncertaintyModel>) {
        self.model = Some(model);
    }

    pub fn set_z_vertex_sigma(&mut self, sigma: f64) -> Result<(), KinFitError> {
        self.z_config.set_sigma(sigma)
    }

    /// Install a pre-fit filter over the measured node sums of each
    /// assignment. Returning `false` skips the assignment without fitting it
    /// and without consuming a [`TreeFitter::next_fit`] call.
    pub fn set_iteration_filter<F>(&mut self, filter: F)
    where
        F: Fn(&NodeSums) -> bool + 'static,
    {
        self.filter = Some(Box::new(filter));
    }

    pub fn topology(&self) -> &DecayTopology {
        &self.topology
    }

    /// Number of distinguishable photon assignments.
    pub fn permutation_count(&self) -> usize {
        self.permutations.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == SearchState::Exhausted
    }

    /// Load one event and reset the assignment cursor.
    ///
    /// Arguments
    /// -----------------
    /// * `beam_energy` – The tagged photon beam energy.
    /// * `proton` – The measured recoil proton candidate.
    /// * `photons` – The measured photons; their count must equal the
    ///   topology's photon leaf count.
    ///
    /// Return
    /// ----------
    /// * `Ok(())` – Ready for [`TreeFitter::next_fit`] calls.
    /// * `Err(KinFitError)` – A configuration mistake; the fitter stays in
    ///   its previous state.
    pub fn prepare_fits(
        &mut self,
        beam_energy: Mev,
        proton: &Candidate,
        photons: &[Candidate],
    ) -> Result<(), KinFitError> {
        let model = self
            .model
            .clone()
            .ok_or(KinFitError::MissingUncertaintyModel)?;
        if photons.len() != self.topology.photon_leaf_count() {
            return Err(KinFitError::CandidateCountMismatch {
                expected: self.topology.photon_leaf_count(),
                got: photons.len(),
            });
        }
        let z_sigma = self.z_config.fit_sigma()?;
        let z_seed = self.params.target.center;

        let mut particles = Vec::with_capacity(1 + photons.len());
        particles.push(FitParticle::set_measured(
            proton,
            ParticleType::Proton,
            model.as_ref(),
            z_seed,
        )?);
        for photon in photons {
            particles.push(FitParticle::set_measured(
                photon,
                ParticleType::Photon,
                model.as_ref(),
                z_seed,
            )?);
        }

        self.prepared_beam = FitVariable::new(beam_energy, model.beam_energy_sigma(beam_energy))?;
        self.prepared_particles = particles;
        self.prepared_z = match z_sigma {
            Some(sigma) => Some(FitVariable::new(z_seed, sigma)?),
            None => None,
        };
        self.beam = self.prepared_beam;
        self.particles = self.prepared_particles.clone();
        self.current_perm = None;
        self.state = SearchState::Prepared { cursor: 0 };
        Ok(())
    }

    /// Fit the next unfiltered assignment.
    ///
    /// Writes the fit outcome (converged or failed) into `result` and
    /// returns `true`. Returns `false`, leaving `result` untouched, once all
    /// assignments are spent; further calls keep returning `false`.
    pub fn next_fit(&mut self, result: &mut FitResult) -> bool {
        let SearchState::Prepared { cursor } = self.state else {
            return false;
        };
        let mut cursor = cursor;
        let z_center = self.params.target.center;

        while cursor < self.permutations.len() {
            if let Some(filter) = &self.filter {
                let sums = self.measured_node_sums(&self.permutations[cursor], z_center);
                if !filter(&sums) {
                    cursor += 1;
                    continue;
                }
            }

            self.beam = self.prepared_beam;
            self.particles.clone_from(&self.prepared_particles);
            let mut z_var = self.prepared_z;

            let perm = &self.permutations[cursor];
            let constraints: Vec<MassConstraint> = self
                .internal_nodes
                .iter()
                .filter_map(|node| {
                    node.mass.map(|target_mass| {
                        let mut members: Vec<usize> = node
                            .photon_positions
                            .iter()
                            .map(|&pos| 1 + perm[pos])
                            .collect();
                        if node.includes_proton {
                            members.insert(0, 0);
                        }
                        MassConstraint {
                            target_mass,
                            members,
                        }
                    })
                })
                .collect();

            *result = EventFit {
                beam: &mut self.beam,
                particles: &mut self.particles,
                z_vertex: z_var.as_mut(),
                fixed_z: z_center,
                mass_constraints: &constraints,
            }
            .run(&self.params);

            self.current_perm = Some(cursor);
            self.state = SearchState::Prepared { cursor: cursor + 1 };
            return true;
        }

        self.state = SearchState::Exhausted;
        false
    }

    /// Summed four-vector of the first tree node of the given type, from the
    /// current variable values and the last fitted assignment. `None` before
    /// any fit or for a type absent from the tree.
    pub fn tree_node(&self, ptype: ParticleType) -> Option<LorentzVec> {
        let perm = &self.permutations[self.current_perm?];
        let node = self.internal_nodes.iter().find(|n| n.ptype == ptype)?;
        let mut sum = LorentzVec::zero();
        if node.includes_proton {
            sum += self.particles[0].as_fitted();
        }
        for &pos in &node.photon_positions {
            sum += self.particles[1 + perm[pos]].as_fitted();
        }
        Some(sum)
    }

    /// The fit particles of the last attempt, recoil first, photons in
    /// candidate order.
    pub fn fit_particles(&self) -> &[FitParticle] {
        &self.particles
    }

    pub fn beam_variable(&self) -> &FitVariable {
        &self.beam
    }

    fn measured_node_sums(&self, perm: &[usize], z: f64) -> NodeSums {
        let entries = self
            .internal_nodes
            .iter()
            .map(|node| {
                let mut sum = LorentzVec::zero();
                if node.includes_proton {
                    sum += self.prepared_particles[0].lorentz_vec(z);
                }
                for &pos in &node.photon_positions {
                    sum += self.prepared_particles[1 + perm[pos]].lorentz_vec(z);
                }
                (node.ptype, sum)
            })
            .collect();
        NodeSums::new(entries)
    }
}
