//! Conflict diagnostics: turning an unsatisfiable solve into a graph and a
//! readable message.
//!
//! The solver records, for every failed requirement, why each candidate was
//! ruled out. [`ProblemsGraph`] turns those records into a directed graph
//! with a root node (the user request), package nodes, and unresolved
//! requirement nodes, plus a symmetric [`ConflictMap`] of mutually
//! exclusive packages. Sibling package nodes that differ only in their
//! version are merged before display.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fmt::Formatter;
use std::rc::Rc;

use itertools::Itertools;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::conflict_map::ConflictMap;
use crate::pool::{DepId, Pool};
use crate::solvable::SolvableId;
use crate::solver::{CandidateFailure, DepFailure, FailureCause};

/// The structured output of an unsatisfiable solve: the set of failed
/// requirements with the reasons each candidate was ruled out.
#[derive(Debug, Clone)]
pub struct Problem {
    pub(crate) failures: Vec<DepFailure>,
}

impl Problem {
    pub(crate) fn new(failures: Vec<DepFailure>) -> Self {
        Self { failures }
    }
}

/// A node in the problems graph.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ProblemNode {
    /// The user request.
    Root,

    /// A concrete package candidate that could not be placed.
    Package(SolvableId),

    /// A requirement without any candidates.
    UnresolvedDependency(DepId),
}

impl ProblemNode {
    fn solvable_id(self) -> Option<SolvableId> {
        match self {
            ProblemNode::Package(id) => Some(id),
            _ => None,
        }
    }
}

/// An edge in the problems graph.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum ProblemEdge {
    /// The source requires the target via the given dependency. A `None`
    /// dependency stands for "is installed and should be kept".
    Requires(Option<DepId>),

    /// The source and target exclude each other.
    Conflict(ConflictCause),
}

impl ProblemEdge {
    fn requires(&self) -> Option<Option<DepId>> {
        match self {
            ProblemEdge::Requires(dep) => Some(*dep),
            ProblemEdge::Conflict(_) => None,
        }
    }
}

/// Why two nodes exclude each other.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum ConflictCause {
    /// Only one package per name can be installed.
    SameName,

    /// The source is constrained by the target's `constrains` entry (or
    /// vice versa).
    Constrains(DepId),

    /// The target is locked at its installed version.
    Locked,

    /// The source violates a pin.
    Pinned(String),

    /// The source was excluded by a remove job.
    Excluded,

    /// The source would downgrade the installed target.
    Downgrade,
}

/// A set of package nodes merged into one display node because they share
/// the same name and edge structure and differ only in their version.
pub struct MergedProblemNode {
    /// The merged solvables, sorted by version.
    pub ids: Vec<SolvableId>,
}

/// The diagnostics graph built from a [`Problem`].
pub struct ProblemsGraph {
    graph: DiGraph<ProblemNode, ProblemEdge>,
    root_node: NodeIndex,
    conflict_map: ConflictMap<SolvableId>,
}

impl ProblemsGraph {
    /// Builds the graph from a problem.
    pub fn from_problem(pool: &Pool, problem: &Problem) -> Self {
        let mut builder = GraphBuilder {
            graph: DiGraph::default(),
            nodes: HashMap::new(),
            edges: HashSet::new(),
            conflict_map: ConflictMap::new(),
            root_node: NodeIndex::default(),
        };
        builder.root_node = builder.graph.add_node(ProblemNode::Root);

        for failure in &problem.failures {
            builder.add_failure(pool, failure);
        }

        ProblemsGraph {
            graph: builder.graph,
            root_node: builder.root_node,
            conflict_map: builder.conflict_map,
        }
    }

    /// The underlying graph, for machine consumption.
    pub fn graph(&self) -> &DiGraph<ProblemNode, ProblemEdge> {
        &self.graph
    }

    /// The root node of the graph.
    pub fn root_node(&self) -> NodeIndex {
        self.root_node
    }

    /// The symmetric conflict relation between package nodes.
    pub fn conflict_map(&self) -> &ConflictMap<SolvableId> {
        &self.conflict_map
    }

    /// Merges sibling package nodes that share the same name and the same
    /// edge structure and differ only in their version. The returned map
    /// points every merged solvable at its merge group.
    pub fn simplify(&self, pool: &Pool) -> HashMap<SolvableId, Rc<MergedProblemNode>> {
        let graph = &self.graph;

        // Gather information about nodes that could be merged.
        let mut maybe_merge = HashMap::new();
        for node_id in graph.node_indices() {
            let candidate = match graph[node_id] {
                ProblemNode::Package(solvable_id) => solvable_id,
                _ => continue,
            };

            if graph
                .edges_directed(node_id, Direction::Incoming)
                .any(|e| matches!(e.weight(), ProblemEdge::Conflict(..)))
            {
                // Nodes that are the target of a conflict are never merged.
                continue;
            }

            let predecessors: Vec<_> = graph
                .edges_directed(node_id, Direction::Incoming)
                .map(|e| e.source())
                .sorted_unstable()
                .collect();
            let successors: Vec<_> = graph
                .edges(node_id)
                .map(|e| (e.target(), e.weight().clone()))
                .sorted_unstable_by_key(|(target, _)| *target)
                .collect();

            let name = pool.resolve_solvable(candidate).name;

            maybe_merge
                .entry((name, predecessors, successors))
                .or_insert(Vec::new())
                .push(candidate);
        }

        let mut merged_candidates = HashMap::default();
        for mut group in maybe_merge.into_values() {
            if group.len() > 1 {
                group.sort_unstable_by(|&a, &b| {
                    pool.resolve_solvable(a)
                        .record
                        .package_record
                        .version
                        .cmp(&pool.resolve_solvable(b).record.package_record.version)
                });
                let merged = Rc::new(MergedProblemNode { ids: group });
                for &id in &merged.ids {
                    merged_candidates.insert(id, merged.clone());
                }
            }
        }

        merged_candidates
    }

    /// The set of nodes from which every path to the leaves is free of
    /// conflicts. These represent candidates that could be installed if a
    /// different branch had been taken.
    fn get_installable_set(&self) -> HashSet<NodeIndex> {
        let mut non_installable: HashSet<NodeIndex> = HashSet::new();

        // The starting set of conflicting edges: edges into unresolved
        // requirements and conflict edges.
        let mut conflicting_edges: Vec<(NodeIndex, NodeIndex)> = Vec::new();
        for edge in self.graph.edge_references() {
            let target_unresolved = matches!(
                self.graph[edge.target()],
                ProblemNode::UnresolvedDependency(_)
            );
            if target_unresolved || matches!(edge.weight(), ProblemEdge::Conflict(..)) {
                conflicting_edges.push((edge.source(), edge.target()));
            }
        }

        // Propagate the conflicts up the graph.
        while let Some((source, _)) = conflicting_edges.pop() {
            if non_installable.insert(source) {
                conflicting_edges.extend(
                    self.graph
                        .edges_directed(source, Direction::Incoming)
                        .map(|e| (e.source(), e.target())),
                );
            }
        }

        self.graph
            .node_indices()
            .filter(|nx| !non_installable.contains(nx))
            .collect()
    }

    /// Returns the human readable tree message for this graph.
    pub fn display_user_friendly<'a>(&'a self, pool: &'a Pool) -> DisplayUnsat<'a> {
        DisplayUnsat {
            merged_candidates: self.simplify(pool),
            installable_set: self.get_installable_set(),
            graph: self,
            pool,
        }
    }
}

struct GraphBuilder {
    graph: DiGraph<ProblemNode, ProblemEdge>,
    nodes: HashMap<ProblemNodeKey, NodeIndex>,
    edges: HashSet<(NodeIndex, NodeIndex, ProblemEdge)>,
    conflict_map: ConflictMap<SolvableId>,
    root_node: NodeIndex,
}

#[derive(Hash, PartialEq, Eq)]
enum ProblemNodeKey {
    Package(SolvableId),
    Unresolved(DepId),
}

impl GraphBuilder {
    fn package_node(&mut self, id: SolvableId) -> NodeIndex {
        let graph = &mut self.graph;
        *self
            .nodes
            .entry(ProblemNodeKey::Package(id))
            .or_insert_with(|| graph.add_node(ProblemNode::Package(id)))
    }

    fn unresolved_node(&mut self, dep: DepId) -> NodeIndex {
        let graph = &mut self.graph;
        *self
            .nodes
            .entry(ProblemNodeKey::Unresolved(dep))
            .or_insert_with(|| graph.add_node(ProblemNode::UnresolvedDependency(dep)))
    }

    fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, edge: ProblemEdge) {
        if self.edges.insert((from, to, edge.clone())) {
            self.graph.add_edge(from, to, edge);
        }
    }

    fn add_failure(&mut self, pool: &Pool, failure: &DepFailure) {
        let source_node = match failure.source {
            Some(source) => self.package_node(source),
            None => self.root_node,
        };

        match &failure.cause {
            FailureCause::NothingProvides => {
                let dep = failure
                    .dep
                    .expect("a missing requirement always names its dependency");
                let unresolved = self.unresolved_node(dep);
                self.add_edge(source_node, unresolved, ProblemEdge::Requires(Some(dep)));
            }
            FailureCause::Candidates(candidates) => {
                for (candidate, candidate_failure) in candidates {
                    let candidate_node = self.package_node(*candidate);
                    self.add_edge(
                        source_node,
                        candidate_node,
                        ProblemEdge::Requires(failure.dep),
                    );

                    match candidate_failure {
                        CandidateFailure::NameClash(existing) => {
                            let existing_node = self.package_node(*existing);
                            self.add_edge(
                                candidate_node,
                                existing_node,
                                ProblemEdge::Conflict(ConflictCause::SameName),
                            );
                            self.conflict_map.add(*candidate, *existing);
                        }
                        CandidateFailure::RemovedByJob => {
                            self.add_edge(
                                candidate_node,
                                candidate_node,
                                ProblemEdge::Conflict(ConflictCause::Excluded),
                            );
                            self.conflict_map.add(*candidate, *candidate);
                        }
                        CandidateFailure::Locked(locked) => {
                            let locked_node = self.package_node(*locked);
                            self.add_edge(
                                candidate_node,
                                locked_node,
                                ProblemEdge::Conflict(ConflictCause::Locked),
                            );
                            self.conflict_map.add(*candidate, *locked);
                        }
                        CandidateFailure::PinViolation(pin) => {
                            self.add_edge(
                                candidate_node,
                                candidate_node,
                                ProblemEdge::Conflict(ConflictCause::Pinned(pin.clone())),
                            );
                            self.conflict_map.add(*candidate, *candidate);
                        }
                        CandidateFailure::Downgrade(installed) => {
                            let installed_node = self.package_node(*installed);
                            self.add_edge(
                                candidate_node,
                                installed_node,
                                ProblemEdge::Conflict(ConflictCause::Downgrade),
                            );
                            self.conflict_map.add(*candidate, *installed);
                        }
                        CandidateFailure::ConstrainedBy(constrainer, dep) => {
                            let constrainer_node = self.package_node(*constrainer);
                            self.add_edge(
                                candidate_node,
                                constrainer_node,
                                ProblemEdge::Conflict(ConflictCause::Constrains(*dep)),
                            );
                            self.conflict_map.add(*candidate, *constrainer);
                        }
                        CandidateFailure::DependencyFailed(inner) => {
                            self.add_failure(pool, inner);
                        }
                    }
                }
            }
        }
    }
}

/// Renders the problems graph as an indented tree.
pub struct DisplayUnsat<'a> {
    graph: &'a ProblemsGraph,
    merged_candidates: HashMap<SolvableId, Rc<MergedProblemNode>>,
    installable_set: HashSet<NodeIndex>,
    pool: &'a Pool,
}

impl DisplayUnsat<'_> {
    fn requirement_label(&self, dep: Option<DepId>) -> String {
        match dep {
            Some(dep) => self.pool.dependency_source(dep).to_owned(),
            None => "the installed environment".to_owned(),
        }
    }

    fn merged_version_label(&self, solvable_id: SolvableId) -> String {
        if let Some(merged) = self.merged_candidates.get(&solvable_id) {
            merged
                .ids
                .iter()
                .map(|&id| {
                    self.pool
                        .resolve_solvable(id)
                        .record
                        .package_record
                        .version
                        .as_str()
                })
                .join("|")
        } else {
            self.pool
                .resolve_solvable(solvable_id)
                .record
                .package_record
                .version
                .as_str()
        }
    }
}

enum DisplayOp {
    Requirement(Option<DepId>, Vec<EdgeIndex>),
    Candidate(NodeIndex),
}

impl fmt::Display for DisplayUnsat<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let graph = &self.graph.graph;
        let installable_nodes = &self.installable_set;
        let mut reported: HashSet<SolvableId> = HashSet::new();

        writeln!(f, "The following packages are incompatible")?;

        // Start from the root requirements; conflicts with installable
        // options are reported last.
        let mut stack = graph
            .edges(self.graph.root_node)
            .filter_map(|e| e.weight().requires().map(|dep| (dep, e.id())))
            .into_group_map()
            .into_iter()
            .sorted_by_key(|(_, edges)| {
                edges
                    .iter()
                    .any(|&edge| installable_nodes.contains(&graph.edge_endpoints(edge).unwrap().1))
            })
            .map(|(dep, edges)| (DisplayOp::Requirement(dep, edges), 0usize))
            .collect::<Vec<_>>();

        while let Some((op, depth)) = stack.pop() {
            let indent = " ".repeat(depth * 4);

            match op {
                DisplayOp::Requirement(dep, edges) => {
                    debug_assert!(!edges.is_empty());

                    let installable = edges.iter().any(|&e| {
                        let (_, target) = graph.edge_endpoints(e).unwrap();
                        installable_nodes.contains(&target)
                    });
                    let req = self.requirement_label(dep);

                    let target_nx = graph.edge_endpoints(edges[0]).unwrap().1;
                    let missing = edges.len() == 1
                        && matches!(graph[target_nx], ProblemNode::UnresolvedDependency(_));
                    if missing {
                        // There are no candidates at all. List the versions
                        // that do exist for the name, they are what the
                        // user asked about.
                        let available = dep
                            .map(|dep| self.available_versions(dep))
                            .unwrap_or_default();
                        if available.is_empty() {
                            writeln!(f, "{indent}|-- no candidates were found for {req}.")?;
                        } else {
                            writeln!(
                                f,
                                "{indent}|-- no candidates were found for {req} (available versions: {}).",
                                available.join("|")
                            )?;
                        }
                    } else if installable {
                        writeln!(
                            f,
                            "{indent}|-- {req} can be installed with any of the following options:"
                        )?;
                        stack.extend(
                            edges
                                .iter()
                                .filter(|&&e| {
                                    installable_nodes
                                        .contains(&graph.edge_endpoints(e).unwrap().1)
                                })
                                .map(|&e| {
                                    (
                                        DisplayOp::Candidate(graph.edge_endpoints(e).unwrap().1),
                                        depth + 1,
                                    )
                                }),
                        );
                    } else {
                        writeln!(
                            f,
                            "{indent}|-- {req} cannot be installed because there are no viable options:"
                        )?;
                        stack.extend(edges.iter().map(|&e| {
                            (
                                DisplayOp::Candidate(graph.edge_endpoints(e).unwrap().1),
                                depth + 1,
                            )
                        }));
                    }
                }
                DisplayOp::Candidate(candidate) => {
                    let Some(solvable_id) = graph[candidate].solvable_id() else {
                        continue;
                    };
                    if reported.contains(&solvable_id) {
                        continue;
                    }
                    if let Some(merged) = self.merged_candidates.get(&solvable_id) {
                        reported.extend(merged.ids.iter().copied());
                    }

                    let name = self
                        .pool
                        .resolve_solvable(solvable_id)
                        .record
                        .package_record
                        .name
                        .as_normalized();
                    let version = self.merged_version_label(solvable_id);

                    let conflict_edge = graph.edges(candidate).find_map(|e| match e.weight() {
                        ProblemEdge::Conflict(cause) => Some(cause.clone()),
                        ProblemEdge::Requires(_) => None,
                    });
                    let is_leaf = graph.edges(candidate).next().is_none();

                    if let Some(cause) = conflict_edge {
                        match cause {
                            ConflictCause::Pinned(pin) => writeln!(
                                f,
                                "{indent}|-- {name} {version}, which conflicts with the pin '{pin}'."
                            )?,
                            ConflictCause::Excluded => writeln!(
                                f,
                                "{indent}|-- {name} {version}, which is excluded by the request."
                            )?,
                            _ => writeln!(
                                f,
                                "{indent}|-- {name} {version}, which conflicts with the versions reported above."
                            )?,
                        }
                    } else if is_leaf {
                        writeln!(f, "{indent}|-- {name} {version}")?;
                    } else {
                        writeln!(f, "{indent}|-- {name} {version} would require")?;
                        let requirements = graph
                            .edges(candidate)
                            .filter_map(|e| e.weight().requires().map(|dep| (dep, e.id())))
                            .into_group_map()
                            .into_iter()
                            .sorted_by_key(|(_, edges)| {
                                edges.iter().any(|&edge| {
                                    installable_nodes
                                        .contains(&graph.edge_endpoints(edge).unwrap().1)
                                })
                            })
                            .map(|(dep, edges)| {
                                (DisplayOp::Requirement(dep, edges), depth + 1)
                            });
                        stack.extend(requirements);
                    }
                }
            }
        }

        Ok(())
    }
}

impl DisplayUnsat<'_> {
    /// The versions that do exist for the name of an unresolvable
    /// dependency.
    fn available_versions(&self, dep: DepId) -> Vec<String> {
        let name = self.pool.dependency_name(dep);
        let mut versions: Vec<String> = self
            .pool
            .packages_by_name
            .get(&name)
            .into_iter()
            .flatten()
            .map(|&id| {
                self.pool
                    .resolve_solvable(id)
                    .record
                    .package_record
                    .version
                    .as_str()
            })
            .collect();
        versions.sort();
        versions.dedup();
        versions
    }
}
