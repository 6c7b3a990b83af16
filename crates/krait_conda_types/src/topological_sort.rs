//! A deterministic topological sort of package records, used to order link
//! operations so dependencies are installed before their dependents.

use std::collections::BTreeMap;

use fxhash::FxHashSet;

use crate::{MatchSpec, PackageRecord};

/// Sorts the packages topologically, dependencies first.
///
/// The sort is a Kahn-style pass over the dependency graph. Package names are
/// used as tie-breakers so the result is deterministic regardless of the
/// input order. Cycles are broken by dropping an edge of the cycle; edges
/// into `noarch: python` packages are dropped preferentially so those
/// packages sort after their (python) dependencies.
///
/// Only works for records with unique names.
pub fn sort_topologically<T: AsRef<PackageRecord> + Clone>(records: Vec<T>) -> Vec<T> {
    // Use ordered maps keyed by normalized name for determinism.
    let by_name: BTreeMap<String, T> = records
        .iter()
        .map(|record| {
            (
                record.as_ref().name.as_normalized().to_owned(),
                record.clone(),
            )
        })
        .collect();

    // Build the edge list name -> dependencies (within the record set).
    let mut edges: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, record) in &by_name {
        let mut deps: Vec<&str> = record
            .as_ref()
            .depends
            .iter()
            .filter_map(|dep| dependency_name(dep))
            .filter_map(|dep| by_name.get_key_value(dep).map(|(name, _)| name.as_str()))
            .collect();
        deps.sort_unstable();
        deps.dedup();
        edges.insert(name.as_str(), deps);
    }

    // Break cycles: repeatedly find a cycle with DFS and remove one of its
    // edges, preferring an edge whose target is noarch python.
    loop {
        let Some(cycle) = find_cycle(&edges) else {
            break;
        };
        let edge = cycle
            .windows(2)
            .map(|pair| (pair[0], pair[1]))
            .chain(std::iter::once((
                *cycle.last().unwrap(),
                *cycle.first().unwrap(),
            )))
            .find(|(_, to)| {
                by_name
                    .get(*to)
                    .is_some_and(|record| record.as_ref().noarch.is_python())
            })
            .unwrap_or((cycle[cycle.len() - 1], cycle[0]));
        if let Some(deps) = edges.get_mut(edge.0) {
            deps.retain(|dep| *dep != edge.1);
        }
    }

    // Kahn's algorithm over the acyclic graph, smallest name first.
    let mut in_degree: BTreeMap<&str, usize> = edges.keys().map(|name| (*name, 0)).collect();
    for deps in edges.values() {
        for dep in deps {
            *in_degree.get_mut(dep).unwrap() += 1;
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut sorted_names = Vec::with_capacity(edges.len());
    while let Some(name) = ready.pop() {
        sorted_names.push(name);
        for dep in &edges[name] {
            let degree = in_degree.get_mut(dep).unwrap();
            *degree -= 1;
            if *degree == 0 {
                // Keep `ready` sorted in reverse so `pop` yields the
                // lexicographically smallest name.
                let pos = ready
                    .binary_search_by(|probe| dep.cmp(probe))
                    .unwrap_or_else(|pos| pos);
                ready.insert(pos, dep);
            }
        }
    }

    // Any names not processed are part of a cycle the breaker did not
    // catch; append them in name order rather than dropping them.
    if sorted_names.len() != edges.len() {
        let processed: FxHashSet<&str> = sorted_names.iter().copied().collect();
        sorted_names.extend(edges.keys().filter(|name| !processed.contains(*name)));
    }

    // Packages come out dependents-first, reverse for dependencies-first.
    sorted_names.reverse();
    sorted_names
        .into_iter()
        .map(|name| by_name[name].clone())
        .collect()
}

/// Extracts the package name from a raw match spec string without fully
/// parsing it.
fn dependency_name(spec: &str) -> Option<&str> {
    let name = spec
        .split(|c: char| c.is_whitespace() || crate::is_start_of_version_constraint(c))
        .next()?;
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Finds a cycle in the graph with a depth-first search, returning the names
/// along the cycle.
fn find_cycle<'a>(edges: &BTreeMap<&'a str, Vec<&'a str>>) -> Option<Vec<&'a str>> {
    let mut visited = FxHashSet::default();
    for start in edges.keys() {
        if visited.contains(start) {
            continue;
        }
        let mut path = Vec::new();
        if let Some(cycle) = dfs(start, edges, &mut visited, &mut path) {
            return Some(cycle);
        }
    }
    None
}

fn dfs<'a>(
    node: &'a str,
    edges: &BTreeMap<&'a str, Vec<&'a str>>,
    visited: &mut FxHashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<&'a str>> {
    if let Some(position) = path.iter().position(|n| *n == node) {
        return Some(path[position..].to_vec());
    }
    if !visited.insert(node) {
        return None;
    }
    path.push(node);
    if let Some(deps) = edges.get(node) {
        for dep in deps {
            if let Some(cycle) = dfs(dep, edges, visited, path) {
                return Some(cycle);
            }
        }
    }
    path.pop();
    None
}

/// Validates that all `depends` of each record are satisfied by another
/// record in the list. Returns the offending `(package, dependency)` pair on
/// failure. Virtual packages (`__unix`, ...) are ignored.
pub fn validate_dependencies<T: AsRef<PackageRecord>>(
    records: &[T],
) -> Result<(), (String, String)> {
    for record in records {
        let record = record.as_ref();
        for dep in &record.depends {
            if dep.starts_with("__") {
                continue;
            }
            let Ok(spec) = dep.parse::<MatchSpec>() else {
                continue;
            };
            if !records.iter().any(|r| spec.matches(r.as_ref())) {
                return Err((
                    record.name.as_normalized().to_owned(),
                    dep.clone(),
                ));
            }
        }
    }
    Ok(())
}
