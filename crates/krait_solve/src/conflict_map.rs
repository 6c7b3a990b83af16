use std::collections::{BTreeMap, BTreeSet};

/// A symmetric binary relation used to express mutual exclusion between
/// nodes of a problem graph.
///
/// The relation is kept symmetric by construction: `add(a, b)` also records
/// `(b, a)`. Self conflicts (`add(x, x)`) are permitted and meaningful; they
/// mark a node that can never be part of a solution.
#[derive(Debug, Clone, Default)]
pub struct ConflictMap<T: Ord + Copy> {
    edges: BTreeMap<T, BTreeSet<T>>,
}

impl<T: Ord + Copy> ConflictMap<T> {
    /// Constructs an empty conflict map.
    pub fn new() -> Self {
        Self {
            edges: BTreeMap::new(),
        }
    }

    /// Records that `a` and `b` are in conflict.
    pub fn add(&mut self, a: T, b: T) {
        self.edges.entry(a).or_default().insert(b);
        self.edges.entry(b).or_default().insert(a);
    }

    /// Removes the conflict between `a` and `b`, if present.
    pub fn remove_pair(&mut self, a: T, b: T) {
        let mut remove_one = |from: T, to: T| {
            if let Some(set) = self.edges.get_mut(&from) {
                set.remove(&to);
                if set.is_empty() {
                    self.edges.remove(&from);
                }
            }
        };
        remove_one(a, b);
        remove_one(b, a);
    }

    /// Drops every conflict incident to `a`.
    pub fn remove(&mut self, a: T) {
        if let Some(others) = self.edges.remove(&a) {
            for other in others {
                if let Some(set) = self.edges.get_mut(&other) {
                    set.remove(&a);
                    if set.is_empty() {
                        self.edges.remove(&other);
                    }
                }
            }
        }
    }

    /// Returns true if `a` and `b` are in conflict.
    pub fn in_conflict(&self, a: T, b: T) -> bool {
        self.edges
            .get(&a)
            .is_some_and(|set| set.contains(&b))
    }

    /// Returns true if `a` is in conflict with anything (including itself).
    pub fn has_conflict(&self, a: T) -> bool {
        self.edges.get(&a).is_some_and(|set| !set.is_empty())
    }

    /// Iterates over the nodes `a` conflicts with.
    pub fn conflicts_of(&self, a: T) -> impl Iterator<Item = T> + '_ {
        self.edges.get(&a).into_iter().flatten().copied()
    }

    /// Iterates over every conflict pair once, with `a <= b`.
    pub fn iter_pairs(&self) -> impl Iterator<Item = (T, T)> + '_ {
        self.edges.iter().flat_map(|(&a, set)| {
            set.iter()
                .copied()
                .filter(move |&b| a <= b)
                .map(move |b| (a, b))
        })
    }

    /// Returns true if no conflicts are recorded.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::ConflictMap;

    #[test]
    fn test_symmetry() {
        let mut map = ConflictMap::new();
        map.add(1, 2);
        assert!(map.in_conflict(1, 2));
        assert!(map.in_conflict(2, 1));
        assert!(map.has_conflict(1));
        assert!(map.has_conflict(2));
        assert!(!map.in_conflict(1, 3));
    }

    #[test]
    fn test_self_conflict() {
        let mut map = ConflictMap::new();
        map.add(7, 7);
        assert!(map.in_conflict(7, 7));
        assert!(map.has_conflict(7));

        map.remove(7);
        assert!(!map.has_conflict(7));
    }

    #[test]
    fn test_remove_node_drops_all_incident_edges() {
        let mut map = ConflictMap::new();
        map.add(1, 2);
        map.add(1, 3);
        map.add(2, 3);

        map.remove(1);
        assert!(!map.has_conflict(1));
        assert!(!map.in_conflict(1, 2));
        assert!(!map.in_conflict(3, 1));
        // Unrelated edges survive.
        assert!(map.in_conflict(2, 3));
    }

    #[test]
    fn test_remove_pair() {
        let mut map = ConflictMap::new();
        map.add(1, 2);
        map.add(1, 3);
        map.remove_pair(2, 1);
        assert!(!map.in_conflict(1, 2));
        assert!(map.in_conflict(1, 3));
    }

    #[test]
    fn test_iter_pairs() {
        let mut map = ConflictMap::new();
        map.add(2, 1);
        map.add(3, 3);
        let pairs: Vec<_> = map.iter_pairs().collect();
        assert_eq!(pairs, vec![(1, 2), (3, 3)]);
    }
}
