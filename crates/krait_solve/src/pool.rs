use std::collections::hash_map::Entry;

use fxhash::FxHashMap;
use krait_conda_types::{MatchSpec, RepoDataRecord};
use url::Url;

use crate::conda_util;
use crate::solvable::{Solvable, SolvableId};

/// The id of an interned string in a [`Pool`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

impl StringId {
    fn new(index: usize) -> Self {
        Self(index as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// The id of an interned dependency spec in a [`Pool`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepId(u32);

impl DepId {
    fn new(index: usize) -> Self {
        Self(index as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// The id of a [`Repo`] in a [`Pool`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoId(u32);

impl RepoId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A named group of solvables, usually one `(channel, subdir)` listing.
pub struct Repo {
    /// The name of the repo, e.g. the canonical channel name.
    pub name: String,

    /// The subdir url the solvables were loaded from, when known.
    pub url: Option<Url>,

    /// The priority of the repo. Higher priorities win under strict channel
    /// priority.
    pub priority: i32,

    /// Breaks priority ties between the subdirs of one channel.
    pub subpriority: i32,

    /// The solvables owned by this repo.
    pub solvables: Vec<SolvableId>,
}

/// An interned dependency: the parsed spec plus the interned name it
/// applies to.
pub(crate) struct Dependency {
    pub(crate) spec: MatchSpec,
    pub(crate) name: StringId,
    pub(crate) source: String,
}

/// The in-memory index shared by the solver and the transaction builder.
///
/// Strings and dependency specs are interned to small integer ids; packages
/// (solvables) are grouped into repos. A secondary "what provides" index
/// maps every interned dependency to its matching solvables in preference
/// order. The index must be (re)built with [`Pool::create_whatprovides`]
/// after solvables are added and before solving starts.
#[derive(Default)]
pub struct Pool {
    strings: Vec<String>,
    strings_to_ids: FxHashMap<String, StringId>,

    pub(crate) deps: Vec<Dependency>,
    deps_to_ids: FxHashMap<String, DepId>,

    pub(crate) solvables: Vec<Solvable>,
    repos: Vec<Repo>,
    dead_repos: std::collections::BTreeSet<RepoId>,
    installed_repo: Option<RepoId>,

    pub(crate) packages_by_name: FxHashMap<StringId, Vec<SolvableId>>,
    whatprovides: FxHashMap<DepId, Vec<SolvableId>>,
    whatprovides_ready: bool,
}

impl Pool {
    /// Constructs a new empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string, returning its id.
    pub fn intern_string(&mut self, string: &str) -> StringId {
        match self.strings_to_ids.entry(string.to_owned()) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let id = StringId::new(self.strings.len());
                self.strings.push(entry.key().clone());
                entry.insert(id);
                id
            }
        }
    }

    /// Looks up a previously interned string.
    pub fn get_string(&self, string: &str) -> Option<StringId> {
        self.strings_to_ids.get(string).copied()
    }

    /// Resolves a string id back to the string.
    pub fn resolve_string(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    /// Interns a dependency spec, returning its id. Specs are deduplicated
    /// by their raw string form.
    pub fn intern_dependency(
        &mut self,
        spec_str: &str,
    ) -> Result<DepId, krait_conda_types::ParseMatchSpecError> {
        if let Some(id) = self.deps_to_ids.get(spec_str) {
            return Ok(*id);
        }

        let spec: MatchSpec = spec_str.parse()?;
        let name = self.intern_string(
            spec.name
                .as_ref()
                .map(|name| name.as_normalized())
                .unwrap_or("*"),
        );
        let id = DepId::new(self.deps.len());
        self.deps.push(Dependency {
            spec,
            name,
            source: spec_str.to_owned(),
        });
        self.deps_to_ids.insert(spec_str.to_owned(), id);

        // New dependencies invalidate the what-provides index.
        self.whatprovides_ready = false;
        Ok(id)
    }

    /// Resolves a dep id to the parsed spec.
    pub fn resolve_dependency(&self, id: DepId) -> &MatchSpec {
        &self.deps[id.index()].spec
    }

    /// Resolves a dep id to the raw spec string it was interned from.
    pub fn dependency_source(&self, id: DepId) -> &str {
        &self.deps[id.index()].source
    }

    /// The interned name a dependency constrains.
    pub fn dependency_name(&self, id: DepId) -> StringId {
        self.deps[id.index()].name
    }

    /// Adds a new repo to the pool.
    pub fn add_repo(
        &mut self,
        name: impl Into<String>,
        url: Option<Url>,
        priority: i32,
        subpriority: i32,
    ) -> RepoId {
        let id = RepoId(self.repos.len() as u32);
        self.repos.push(Repo {
            name: name.into(),
            url,
            priority,
            subpriority,
            solvables: Vec::new(),
        });
        id
    }

    /// Returns the repo with the given id.
    pub fn repo(&self, id: RepoId) -> &Repo {
        &self.repos[id.index()]
    }

    /// Removes a repo from the pool. Its solvables stay allocated (ids
    /// remain stable) but disappear from the what-provides index on the
    /// next [`Pool::create_whatprovides`].
    pub fn remove_repo(&mut self, id: RepoId) {
        self.repos[id.index()].solvables.clear();
        self.dead_repos.insert(id);
        if self.installed_repo == Some(id) {
            self.installed_repo = None;
        }
        self.whatprovides_ready = false;
    }

    /// Marks a repo as representing the installed prefix state. At most one
    /// repo can be the installed repo.
    pub fn set_installed_repo(&mut self, id: RepoId) {
        self.installed_repo = Some(id);
    }

    /// The repo representing the installed prefix state, if any.
    pub fn installed_repo(&self) -> Option<RepoId> {
        self.installed_repo
    }

    /// Adds a solvable for the given record to a repo. The record's
    /// `depends` and `constrains` entries are parsed and interned;
    /// unparsable entries are skipped with a warning since channel indices
    /// occasionally carry malformed specs.
    pub fn add_solvable(&mut self, repo_id: RepoId, record: RepoDataRecord) -> SolvableId {
        let name = self.intern_string(record.package_record.name.as_normalized());

        let mut dependencies = Vec::with_capacity(record.package_record.depends.len());
        for dep in &record.package_record.depends {
            match self.intern_dependency(dep) {
                Ok(id) => dependencies.push(id),
                Err(e) => {
                    tracing::warn!("ignoring malformed dependency '{dep}' of {record:?}: {e}");
                }
            }
        }

        let mut constrains = Vec::with_capacity(record.package_record.constrains.len());
        for dep in &record.package_record.constrains {
            match self.intern_dependency(dep) {
                Ok(id) => constrains.push(id),
                Err(e) => {
                    tracing::warn!("ignoring malformed constraint '{dep}' of {record:?}: {e}");
                }
            }
        }

        let solvable_id = SolvableId::new(self.solvables.len());
        self.solvables.push(Solvable {
            repo_id,
            name,
            dependencies,
            constrains,
            record,
        });
        self.repos[repo_id.index()].solvables.push(solvable_id);

        self.whatprovides_ready = false;
        solvable_id
    }

    /// Resolves a solvable id.
    pub fn resolve_solvable(&self, id: SolvableId) -> &Solvable {
        &self.solvables[id.index()]
    }

    /// Returns true if the solvable belongs to the installed repo.
    pub fn is_installed(&self, id: SolvableId) -> bool {
        Some(self.resolve_solvable(id).repo_id) == self.installed_repo
    }

    /// The solvables of the installed repo.
    pub fn installed_solvables(&self) -> &[SolvableId] {
        match self.installed_repo {
            Some(repo_id) => &self.repos[repo_id.index()].solvables,
            None => &[],
        }
    }

    /// (Re)builds the what-provides index: for every interned dependency
    /// the list of matching solvables ordered by preference.
    ///
    /// Installed solvables come first so the solver keeps the current state
    /// when possible, then candidates are ordered by repo priority
    /// (descending) and the conda candidate order (highest version, then
    /// highest build number, then most recent).
    pub fn create_whatprovides(&mut self) {
        self.packages_by_name.clear();
        for (index, solvable) in self.solvables.iter().enumerate() {
            if self.dead_repos.contains(&solvable.repo_id) {
                continue;
            }
            self.packages_by_name
                .entry(solvable.name)
                .or_default()
                .push(SolvableId::new(index));
        }

        self.whatprovides.clear();
        for dep_index in 0..self.deps.len() {
            let dep = &self.deps[dep_index];
            let mut matching: Vec<SolvableId> = self
                .packages_by_name
                .get(&dep.name)
                .map(|candidates| {
                    candidates
                        .iter()
                        .copied()
                        .filter(|&id| {
                            dep.spec
                                .matches_record(&self.solvables[id.index()].record)
                        })
                        .collect()
                })
                .unwrap_or_default();

            matching.sort_by(|&a, &b| self.compare_candidates_by_id(a, b));
            self.whatprovides
                .insert(DepId::new(dep_index), matching);
        }

        self.whatprovides_ready = true;
    }

    /// Returns true if the what-provides index is up to date.
    pub fn whatprovides_ready(&self) -> bool {
        self.whatprovides_ready
    }

    /// The candidates providing a dependency, in preference order. The
    /// what-provides index must have been built.
    pub fn candidates(&self, dep: DepId) -> &[SolvableId] {
        debug_assert!(
            self.whatprovides_ready,
            "create_whatprovides must be called before querying candidates"
        );
        self.whatprovides
            .get(&dep)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The candidates of a dependency restricted to the highest-priority
    /// repo that provides any, implementing strict channel priority. The
    /// installed repo does not participate in the filtering.
    pub fn candidates_strict(&self, dep: DepId) -> Vec<SolvableId> {
        let candidates = self.candidates(dep);
        let best_priority = candidates
            .iter()
            .filter(|&&id| !self.is_installed(id))
            .map(|&id| self.repo(self.resolve_solvable(id).repo_id).priority)
            .max();
        let Some(best_priority) = best_priority else {
            return candidates.to_vec();
        };
        candidates
            .iter()
            .copied()
            .filter(|&id| {
                self.is_installed(id)
                    || self.repo(self.resolve_solvable(id).repo_id).priority == best_priority
            })
            .collect()
    }

    /// The candidates of a dependency ordered for the solver: optionally
    /// restricted to the highest priority repo, and optionally without the
    /// installed-first preference (used for update jobs).
    pub(crate) fn candidates_ordered(
        &self,
        dep: DepId,
        favor_installed: bool,
        strict: bool,
    ) -> Vec<SolvableId> {
        let mut candidates = if strict {
            self.candidates_strict(dep)
        } else {
            self.candidates(dep).to_vec()
        };
        if !favor_installed {
            candidates.sort_by(|&a, &b| self.compare_candidates_unfavored(a, b));
        }
        candidates
    }

    /// Like [`Pool::compare_candidates_by_id`] but without the
    /// installed-first preference.
    fn compare_candidates_unfavored(&self, a: SolvableId, b: SolvableId) -> std::cmp::Ordering {
        let solvable_a = &self.solvables[a.index()];
        let solvable_b = &self.solvables[b.index()];

        let priority_a = (
            self.repos[solvable_a.repo_id.index()].priority,
            self.repos[solvable_a.repo_id.index()].subpriority,
        );
        let priority_b = (
            self.repos[solvable_b.repo_id.index()].priority,
            self.repos[solvable_b.repo_id.index()].subpriority,
        );
        match priority_b.cmp(&priority_a) {
            std::cmp::Ordering::Equal => {}
            ord => return ord,
        }

        conda_util::compare_candidates(
            &solvable_a.record.package_record,
            &solvable_b.record.package_record,
        )
        .then_with(|| a.cmp(&b))
    }

    fn compare_candidates_by_id(&self, a: SolvableId, b: SolvableId) -> std::cmp::Ordering {
        let solvable_a = &self.solvables[a.index()];
        let solvable_b = &self.solvables[b.index()];

        // Installed solvables first.
        let a_installed = Some(solvable_a.repo_id) == self.installed_repo;
        let b_installed = Some(solvable_b.repo_id) == self.installed_repo;
        match b_installed.cmp(&a_installed) {
            std::cmp::Ordering::Equal => {}
            ord => return ord,
        }

        // Then by repo priority, highest first.
        let priority_a = (
            self.repos[solvable_a.repo_id.index()].priority,
            self.repos[solvable_a.repo_id.index()].subpriority,
        );
        let priority_b = (
            self.repos[solvable_b.repo_id.index()].priority,
            self.repos[solvable_b.repo_id.index()].subpriority,
        );
        match priority_b.cmp(&priority_a) {
            std::cmp::Ordering::Equal => {}
            ord => return ord,
        }

        // Then the conda candidate order.
        conda_util::compare_candidates(
            &solvable_a.record.package_record,
            &solvable_b.record.package_record,
        )
        // Finally an arbitrary but deterministic tie breaker.
        .then_with(|| a.cmp(&b))
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use krait_conda_types::{PackageName, PackageRecord, RepoDataRecord, Version};

    use super::Pool;

    pub(crate) fn record(name: &str, version: &str, depends: &[&str]) -> RepoDataRecord {
        let mut package_record = PackageRecord::new(
            PackageName::new_unchecked(name),
            Version::from_str(version).unwrap(),
            "0".to_owned(),
        );
        package_record.depends = depends.iter().map(|d| (*d).to_owned()).collect();
        package_record.subdir = "linux-64".to_owned();
        RepoDataRecord {
            file_name: format!("{name}-{version}-0.tar.bz2"),
            url: format!("https://example.com/linux-64/{name}-{version}-0.tar.bz2")
                .parse()
                .unwrap(),
            channel: "https://example.com".to_owned(),
            package_record,
        }
    }

    #[test]
    fn test_intern_string() {
        let mut pool = Pool::new();
        let a = pool.intern_string("python");
        let b = pool.intern_string("python");
        assert_eq!(a, b);
        assert_eq!(pool.resolve_string(a), "python");
    }

    #[test]
    fn test_candidate_order() {
        let mut pool = Pool::new();
        let repo = pool.add_repo("channel", None, 0, 0);
        pool.add_solvable(repo, record("a", "1.0", &[]));
        pool.add_solvable(repo, record("a", "3.0", &[]));
        pool.add_solvable(repo, record("a", "2.0", &[]));

        let dep = pool.intern_dependency("a").unwrap();
        pool.create_whatprovides();

        let versions: Vec<String> = pool
            .candidates(dep)
            .iter()
            .map(|&id| pool.resolve_solvable(id).record.package_record.version.as_str())
            .collect();
        assert_eq!(versions, vec!["3.0", "2.0", "1.0"]);
    }

    #[test]
    fn test_strict_priority() {
        let mut pool = Pool::new();
        let high = pool.add_repo("high", None, 10, 0);
        let low = pool.add_repo("low", None, 0, 0);
        pool.add_solvable(high, record("a", "1.0", &[]));
        pool.add_solvable(low, record("a", "2.0", &[]));

        let dep = pool.intern_dependency("a").unwrap();
        pool.create_whatprovides();

        // Without strict filtering both candidates exist, ordered by repo
        // priority.
        assert_eq!(pool.candidates(dep).len(), 2);

        // Under strict priority only the high priority repo remains, even
        // though the other repo has a newer version.
        let strict = pool.candidates_strict(dep);
        assert_eq!(strict.len(), 1);
        assert_eq!(
            pool.resolve_solvable(strict[0])
                .record
                .package_record
                .version
                .as_str(),
            "1.0"
        );
    }

    #[test]
    fn test_remove_repo() {
        let mut pool = Pool::new();
        let keep = pool.add_repo("keep", None, 0, 0);
        let drop = pool.add_repo("drop", None, 0, 0);
        pool.add_solvable(keep, record("a", "1.0", &[]));
        pool.add_solvable(drop, record("a", "2.0", &[]));

        let dep = pool.intern_dependency("a").unwrap();
        pool.create_whatprovides();
        assert_eq!(pool.candidates(dep).len(), 2);

        pool.remove_repo(drop);
        assert!(!pool.whatprovides_ready());
        pool.create_whatprovides();
        let candidates = pool.candidates(dep);
        assert_eq!(candidates.len(), 1);
        assert_eq!(
            pool.resolve_solvable(candidates[0])
                .record
                .package_record
                .version
                .as_str(),
            "1.0"
        );
    }

    #[test]
    fn test_version_filter() {
        let mut pool = Pool::new();
        let repo = pool.add_repo("channel", None, 0, 0);
        pool.add_solvable(repo, record("a", "0.1", &[]));
        pool.add_solvable(repo, record("a", "0.2", &[]));
        pool.add_solvable(repo, record("a", "0.3", &[]));

        let dep = pool.intern_dependency("a >=0.2").unwrap();
        let unsatisfiable = pool.intern_dependency("a ==0.4").unwrap();
        pool.create_whatprovides();

        assert_eq!(pool.candidates(dep).len(), 2);
        assert!(pool.candidates(unsatisfiable).is_empty());
    }
}
