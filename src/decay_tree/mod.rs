//! # Decay topologies and the combinatorial tree fit
//!
//! A [`DecayTopology`] describes the hypothesized decay chain of one event as
//! a tree of particle types, parsed from a compact text form:
//!
//! ```text
//! "pi0(g g)"                               p pi0 production
//! "eta'(pi0(g g) pi0(g g) eta(g g))"       eta' -> 2pi0 eta -> 6 photons
//! "sigma+(p pi0(g g)) k0s(pi0(g g) pi0(g g))"
//! ```
//!
//! Photons (`g`) and the proton (`p`) are the only allowed leaves; every
//! internal node is an intermediate state and carries an invariant-mass
//! constraint at its nominal mass by default.
//!
//! Assigning N detected photons to N photon leaves has N! orderings, but
//! swapping the two photons of the same pi0, or the two pi0 subtrees of the
//! same k0s, produces the same physical hypothesis. [`DecayTopology`] reduces
//! the orderings to one representative per equivalence class by comparing
//! canonical tree signatures, so a six-photon 2pi0-eta hypothesis shrinks
//! from 720 orderings to 45 distinct ones.
//!
//! [`TreeFitter`] walks those distinct assignments one fit at a time.

mod tree_fitter;

pub use tree_fitter::TreeFitter;

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use itertools::Itertools;

use crate::candidates::ParticleType;
use crate::constants::Mev;
use crate::four_momentum::LorentzVec;
use crate::kinfit_errors::KinFitError;

/// One node of a parsed topology.
#[derive(Debug, Clone, PartialEq)]
struct TopologyNode {
    ptype: ParticleType,
    children: Vec<usize>,
    /// Mass-constraint target; `None` for leaves and excluded nodes.
    mass: Option<Mev>,
}

/// Membership of one intermediate state, resolved to leaf positions.
///
/// `photon_positions` index the photon-leaf list in parse order; the current
/// permutation maps them to candidate indices.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NodeMembers {
    pub ptype: ParticleType,
    pub mass: Option<Mev>,
    pub photon_positions: Vec<usize>,
    pub includes_proton: bool,
}

/// A hypothesized decay chain, parsed from its text form.
///
/// The tree is immutable after parsing except for
/// [`DecayTopology::exclude_mass_constraint`], which drops the automatic
/// invariant-mass constraint for all nodes of one type.
#[derive(Debug, Clone, PartialEq)]
pub struct DecayTopology {
    nodes: Vec<TopologyNode>,
    roots: Vec<usize>,
    /// Photon leaf node ids, in parse order.
    photon_leaves: Vec<usize>,
    proton_leaf: Option<usize>,
}

impl DecayTopology {
    /// Parse the text form.
    ///
    /// Arguments
    /// -----------------
    /// * `input` – One or more sibling systems, each `name` or
    ///   `name(children...)`; children are separated by whitespace or commas.
    ///
    /// Return
    /// ----------
    /// * `Ok(DecayTopology)` – The validated tree.
    /// * `Err(KinFitError::InvalidParticleName)` – An unknown particle name.
    /// * `Err(KinFitError::InvalidTopology)` – Structural mistakes: bad
    ///   nesting, a decaying photon, an intermediate state without decay
    ///   products, more than one proton, no photons at all.
    pub fn parse(input: &str) -> Result<Self, KinFitError> {
        let tokens = tokenize(input);
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            nodes: Vec::new(),
        };
        let roots = parser.parse_list()?;
        if parser.pos != tokens.len() {
            return Err(KinFitError::InvalidTopology(format!(
                "unexpected token after topology: {input}"
            )));
        }

        let mut topology = Self {
            nodes: parser.nodes,
            roots,
            photon_leaves: Vec::new(),
            proton_leaf: None,
        };
        topology.collect_leaves()?;
        Ok(topology)
    }

    /// Number of photon leaves, i.e. the photon multiplicity this topology
    /// expects from an event.
    pub fn photon_leaf_count(&self) -> usize {
        self.photon_leaves.len()
    }

    /// Whether the proton appears inside the tree (as a decay product of an
    /// intermediate state) rather than only as the free recoil.
    pub fn has_proton_leaf(&self) -> bool {
        self.proton_leaf.is_some()
    }

    /// Drop the automatic invariant-mass constraint for every node of the
    /// given type. The node still exists and its summed four-vector remains
    /// available for filtering.
    pub fn exclude_mass_constraint(&mut self, ptype: ParticleType) {
        for node in &mut self.nodes {
            if node.ptype == ptype && !node.children.is_empty() {
                node.mass = None;
            }
        }
    }

    /// All intermediate states in parse order, with their leaf membership.
    pub(crate) fn internal_nodes(&self) -> Vec<NodeMembers> {
        let pos_of: HashMap<usize, usize> = self
            .photon_leaves
            .iter()
            .enumerate()
            .map(|(pos, &id)| (id, pos))
            .collect();

        let mut members = Vec::new();
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if !node.children.is_empty() {
                let mut photon_positions = Vec::new();
                let mut includes_proton = false;
                self.collect_subtree(id, &pos_of, &mut photon_positions, &mut includes_proton);
                members.push(NodeMembers {
                    ptype: node.ptype,
                    mass: node.mass,
                    photon_positions,
                    includes_proton,
                });
            }
            stack.extend(node.children.iter().rev());
        }
        members
    }

    /// Leaf assignments distinguishable under the tree's symmetries.
    ///
    /// Each permutation maps photon-leaf position to candidate index. Two
    /// assignments related by swapping identical subtrees share a canonical
    /// signature and only the first is kept; the list always contains the
    /// identity first.
    pub(crate) fn unique_permutations(&self) -> Vec<Vec<usize>> {
        let k = self.photon_leaves.len();
        let pos_of: HashMap<usize, usize> = self
            .photon_leaves
            .iter()
            .enumerate()
            .map(|(pos, &id)| (id, pos))
            .collect();

        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for perm in (0..k).permutations(k) {
            let mut root_sigs: Vec<String> = self
                .roots
                .iter()
                .map(|&r| self.node_signature(r, &perm, &pos_of))
                .collect();
            root_sigs.sort();
            if seen.insert(root_sigs.join(" ")) {
                unique.push(perm);
            }
        }
        unique
    }

    fn node_signature(
        &self,
        id: usize,
        perm: &[usize],
        pos_of: &HashMap<usize, usize>,
    ) -> String {
        let node = &self.nodes[id];
        if node.children.is_empty() {
            return match node.ptype {
                ParticleType::Proton => "p".to_string(),
                _ => perm[pos_of[&id]].to_string(),
            };
        }
        let mut child_sigs: Vec<String> = node
            .children
            .iter()
            .map(|&c| self.node_signature(c, perm, pos_of))
            .collect();
        child_sigs.sort();
        format!("{}[{}]", self.nodes[id].ptype.name(), child_sigs.join(","))
    }

    fn collect_subtree(
        &self,
        id: usize,
        pos_of: &HashMap<usize, usize>,
        photon_positions: &mut Vec<usize>,
        includes_proton: &mut bool,
    ) {
        let node = &self.nodes[id];
        if node.children.is_empty() {
            match node.ptype {
                ParticleType::Proton => *includes_proton = true,
                _ => photon_positions.push(pos_of[&id]),
            }
            return;
        }
        for &c in &node.children {
            self.collect_subtree(c, pos_of, photon_positions, includes_proton);
        }
    }

    fn collect_leaves(&mut self) -> Result<(), KinFitError> {
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            match (node.ptype, node.children.is_empty()) {
                (ParticleType::Photon, true) => self.photon_leaves.push(id),
                (ParticleType::Proton, true) => {
                    if self.proton_leaf.replace(id).is_some() {
                        return Err(KinFitError::InvalidTopology(
                            "at most one proton leaf is supported".to_string(),
                        ));
                    }
                }
                (ParticleType::Photon | ParticleType::Proton, false) => {
                    return Err(KinFitError::InvalidTopology(format!(
                        "{} cannot have decay products",
                        node.ptype
                    )));
                }
                (ptype, true) => {
                    return Err(KinFitError::InvalidTopology(format!(
                        "intermediate state {ptype} has no decay products"
                    )));
                }
                (_, false) => stack.extend(node.children.iter().rev()),
            }
        }
        if self.photon_leaves.is_empty() {
            return Err(KinFitError::InvalidTopology(
                "topology has no photon leaves".to_string(),
            ));
        }
        Ok(())
    }

    fn fmt_node(&self, id: usize, out: &mut String) {
        let node = &self.nodes[id];
        out.push_str(node.ptype.name());
        if !node.children.is_empty() {
            out.push('(');
            for (k, &c) in node.children.iter().enumerate() {
                if k > 0 {
                    out.push(' ');
                }
                self.fmt_node(c, out);
            }
            out.push(')');
        }
    }
}

impl std::fmt::Display for DecayTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = String::new();
        for (k, &r) in self.roots.iter().enumerate() {
            if k > 0 {
                out.push(' ');
            }
            self.fmt_node(r, &mut out);
        }
        write!(f, "{out}")
    }
}

impl FromStr for DecayTopology {
    type Err = KinFitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Summed four-vectors of every intermediate state for one leaf assignment,
/// from measured (pre-fit) values. Handed to the iteration filter so it can
/// cut on invariant masses before a fit is paid for.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSums {
    entries: Vec<(ParticleType, LorentzVec)>,
}

impl NodeSums {
    pub(crate) fn new(entries: Vec<(ParticleType, LorentzVec)>) -> Self {
        Self { entries }
    }

    /// Sum of the first node of the given type, in parse order.
    pub fn get(&self, ptype: ParticleType) -> Option<LorentzVec> {
        self.entries
            .iter()
            .find(|(t, _)| *t == ptype)
            .map(|(_, lv)| *lv)
    }

    /// Sums of all nodes of the given type, in parse order.
    pub fn all(&self, ptype: ParticleType) -> impl Iterator<Item = LorentzVec> + '_ {
        self.entries
            .iter()
            .filter(move |(t, _)| *t == ptype)
            .map(|(_, lv)| *lv)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParticleType, LorentzVec)> + '_ {
        self.entries.iter().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token<'a> {
    Name(&'a str),
    Open,
    Close,
}

fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        match c {
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            c if c.is_whitespace() || c == ',' => {}
            c => {
                let mut end = start + c.len_utf8();
                while let Some(&(j, next)) = chars.peek() {
                    if next == '(' || next == ')' || next == ',' || next.is_whitespace() {
                        break;
                    }
                    end = j + next.len_utf8();
                    chars.next();
                }
                tokens.push(Token::Name(&input[start..end]));
            }
        }
    }
    tokens
}

struct Parser<'a> {
    tokens: &'a [Token<'a>],
    pos: usize,
    nodes: Vec<TopologyNode>,
}

impl Parser<'_> {
    fn parse_list(&mut self) -> Result<Vec<usize>, KinFitError> {
        let mut items = Vec::new();
        while let Some(Token::Name(_)) = self.tokens.get(self.pos) {
            items.push(self.parse_item()?);
        }
        if items.is_empty() {
            return Err(KinFitError::InvalidTopology(
                "expected at least one particle".to_string(),
            ));
        }
        Ok(items)
    }

    fn parse_item(&mut self) -> Result<usize, KinFitError> {
        let Some(Token::Name(name)) = self.tokens.get(self.pos) else {
            return Err(KinFitError::InvalidTopology(
                "expected a particle name".to_string(),
            ));
        };
        self.pos += 1;
        let ptype: ParticleType = name.parse()?;

        let mut children = Vec::new();
        if let Some(Token::Open) = self.tokens.get(self.pos) {
            self.pos += 1;
            children = self.parse_list()?;
            match self.tokens.get(self.pos) {
                Some(Token::Close) => self.pos += 1,
                _ => {
                    return Err(KinFitError::InvalidTopology(format!(
                        "unclosed decay products of {ptype}"
                    )));
                }
            }
        }

        let mass = if children.is_empty() {
            None
        } else {
            Some(ptype.mass())
        };
        self.nodes.push(TopologyNode {
            ptype,
            children,
            mass,
        });
        Ok(self.nodes.len() - 1)
    }
}
