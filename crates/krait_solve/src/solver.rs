use std::collections::BTreeMap;

use fxhash::FxHashSet;
use krait_conda_types::{MatchSpec, RepoDataRecord};
use thiserror::Error;

use crate::jobs::{Job, SolveJobs, SolverFlags};
use crate::pool::{DepId, Pool, StringId};
use crate::problem::Problem;
use crate::solvable::SolvableId;

/// A single entry of the solver's decision queue: install (positive) or
/// remove (negative) one solvable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// The solvable the decision applies to.
    pub solvable_id: SolvableId,

    /// True to install the solvable, false to remove it.
    pub install: bool,
}

/// The successful output of a solve: the decision queue and the desired
/// final set of records.
#[derive(Debug)]
pub struct SolverResult {
    /// The decision queue. Installed solvables that are kept unchanged do
    /// not appear.
    pub decisions: Vec<Decision>,

    /// The records of every package that should be present after the
    /// transaction, in name order.
    pub records: Vec<RepoDataRecord>,
}

/// An error returned by [`Solver::solve`].
#[derive(Debug, Error)]
pub enum SolveError {
    /// A remove job matched nothing in the installed set.
    #[error("nothing matching the following specs is installed: {}", .0.join(", "))]
    NotInstalled(Vec<String>),

    /// No consistent set of packages satisfies the jobs. The contained
    /// problem can be turned into diagnostics with
    /// [`crate::ProblemsGraph::from_problem`].
    #[error("the requested packages are not satisfiable")]
    Unsolvable(Problem),

    /// A job spec could not be interned into the pool.
    #[error("invalid job spec: {0}")]
    InvalidJobSpec(#[from] krait_conda_types::ParseMatchSpecError),
}

/// The kinds of failure recorded for a single candidate during the search.
#[derive(Debug, Clone)]
pub(crate) enum CandidateFailure {
    /// Another solvable with the same name was already decided.
    NameClash(SolvableId),

    /// The candidate was excluded by a remove job.
    RemovedByJob,

    /// The name is locked to a different solvable.
    Locked(SolvableId),

    /// The candidate violates a pin.
    PinViolation(String),

    /// Installing the candidate would downgrade an installed package while
    /// downgrades are not allowed.
    Downgrade(SolvableId),

    /// The candidate violates a `constrains` of a decided solvable (or vice
    /// versa).
    ConstrainedBy(SolvableId, DepId),

    /// The candidate was decided but one of the dependencies down the line
    /// failed.
    DependencyFailed(Box<DepFailure>),
}

/// How a dependency failed to be satisfied.
#[derive(Debug, Clone)]
pub(crate) enum FailureCause {
    /// The dependency has no candidates at all.
    NothingProvides,

    /// Every candidate failed for the recorded reason.
    Candidates(Vec<(SolvableId, CandidateFailure)>),
}

/// The failure of one dependency. `dep` is `None` when the failure is about
/// keeping the installed `source` solvable rather than a concrete
/// dependency of it.
#[derive(Debug, Clone)]
pub(crate) struct DepFailure {
    pub(crate) dep: Option<DepId>,
    pub(crate) source: Option<SolvableId>,
    pub(crate) cause: FailureCause,
}

/// One entry of the work queue of the solver.
#[derive(Debug, Clone)]
struct QueueItem {
    dep: DepId,
    source: Option<SolvableId>,
    favor_installed: bool,
}

/// The dependency solver.
///
/// The solver walks the job list depth-first, deciding one candidate per
/// package name and chronologically backtracking over the candidate lists
/// when a decision turns out to make a later requirement unsatisfiable.
/// Candidate lists come from the pool in preference order which makes the
/// result deterministic for a fixed pool, priority order, pin set and job
/// list.
pub struct Solver {
    flags: SolverFlags,
}

impl Solver {
    /// Constructs a new solver with the given flags.
    pub fn new(flags: SolverFlags) -> Self {
        Self { flags }
    }

    /// Solves the given jobs against the pool into a [`SolverResult`], or
    /// reports why no solution exists.
    ///
    /// The job specs are interned into the pool and the what-provides index
    /// is rebuilt when stale; during the actual search the pool is only
    /// read.
    pub fn solve(&self, pool: &mut Pool, jobs: &SolveJobs) -> Result<SolverResult, SolveError> {
        // Intern every job spec so candidate lookups are plain index
        // operations during the search.
        let mut job_deps = Vec::with_capacity(jobs.jobs.len());
        for job in &jobs.jobs {
            job_deps.push(pool.intern_dependency(&job.spec().to_string())?);
        }
        if !pool.whatprovides_ready() {
            pool.create_whatprovides();
        }
        let pool = &*pool;

        let mut state = State {
            pool,
            flags: self.flags,
            pins: jobs.pins.clone(),
            locked: BTreeMap::new(),
            removed: FxHashSet::default(),
            chosen_by_name: BTreeMap::new(),
            trail: Vec::new(),
        };

        // Remove jobs: exclude the matching installed solvables up front. A
        // remove spec that matches nothing installed is an error before any
        // solving happens.
        let mut missing_remove_specs = Vec::new();
        for job in &jobs.jobs {
            if let Job::Remove(spec) = job {
                let mut matched = false;
                for &installed in pool.installed_solvables() {
                    let solvable = pool.resolve_solvable(installed);
                    if spec.matches(&solvable.record.package_record) {
                        state.removed.insert(installed);
                        matched = true;
                    }
                }
                if !matched {
                    missing_remove_specs.push(spec.to_string());
                }
            }
        }
        if !missing_remove_specs.is_empty() {
            return Err(SolveError::NotInstalled(missing_remove_specs));
        }

        // Lock jobs pin a name to exactly the installed solvable.
        for job in &jobs.jobs {
            if let Job::Lock(spec) = job {
                for &installed in pool.installed_solvables() {
                    let solvable = pool.resolve_solvable(installed);
                    if spec.matches(&solvable.record.package_record) {
                        state.locked.insert(solvable.name, installed);
                    }
                }
            }
        }

        // The python pinning rule: when python is installed and no job
        // explicitly names it, pin it to the installed major.minor so a
        // requested package cannot silently switch the interpreter.
        if let Some(pin) = python_pin(pool, jobs) {
            state.pins.push(pin);
        }

        // Build the root queue from the install and update jobs, in order.
        let mut queue = Vec::new();
        for (job, &dep) in jobs.jobs.iter().zip(job_deps.iter()) {
            match job {
                Job::Install(_) => {
                    if self.flags.only_deps {
                        // Enqueue the dependencies of the best candidate
                        // instead of the candidate itself.
                        if let Some(&candidate) = pool.candidates(dep).first() {
                            let solvable = pool.resolve_solvable(candidate);
                            queue.extend(solvable.dependencies.iter().map(|&dep| QueueItem {
                                dep,
                                source: None,
                                favor_installed: true,
                            }));
                        }
                    } else {
                        queue.push(QueueItem {
                            dep,
                            source: None,
                            favor_installed: true,
                        });
                    }
                }
                Job::Update(_) => {
                    queue.push(QueueItem {
                        dep,
                        source: None,
                        favor_installed: false,
                    });
                }
                Job::Remove(_) | Job::Lock(_) => {}
            }
        }

        if let Err(failure) = state.satisfy(queue) {
            return Err(SolveError::Unsolvable(Problem::new(vec![failure])));
        }

        // Keep the remaining installed packages when their dependencies can
        // still be satisfied; drop them otherwise (or fail when uninstalls
        // are not allowed).
        let mut installed: Vec<SolvableId> = pool.installed_solvables().to_vec();
        installed.sort_by_key(|&id| {
            pool.resolve_solvable(id)
                .record
                .package_record
                .name
                .as_normalized()
                .to_owned()
        });
        for installed_id in installed {
            match state.keep_installed(installed_id) {
                Ok(()) => {}
                Err(failure) => {
                    if self.flags.allow_uninstall {
                        tracing::debug!(
                            "dropping installed package {} because it can no longer be satisfied",
                            pool.resolve_solvable(installed_id).display()
                        );
                    } else {
                        return Err(SolveError::Unsolvable(Problem::new(vec![failure])));
                    }
                }
            }
        }

        Ok(build_result(pool, &state))
    }
}

fn build_result(pool: &Pool, state: &State<'_>) -> SolverResult {
    let mut decisions = Vec::new();

    // Installed solvables that are not part of the final set are removed.
    for &installed in pool.installed_solvables() {
        let solvable = pool.resolve_solvable(installed);
        if state.chosen_by_name.get(&solvable.name) != Some(&installed) {
            decisions.push(Decision {
                solvable_id: installed,
                install: false,
            });
        }
    }

    // Chosen solvables that are not installed are installed.
    let mut records = Vec::new();
    for &chosen in state.chosen_by_name.values() {
        if !pool.is_installed(chosen) {
            decisions.push(Decision {
                solvable_id: chosen,
                install: true,
            });
        }
        records.push(pool.resolve_solvable(chosen).record.clone());
    }
    records.sort_by(|a, b| {
        a.package_record
            .name
            .as_normalized()
            .cmp(b.package_record.name.as_normalized())
    });

    SolverResult { decisions, records }
}

/// Computes the implicit python pin: `python <major>.<minor>.*` when python
/// is installed and no job names it.
fn python_pin(pool: &Pool, jobs: &SolveJobs) -> Option<MatchSpec> {
    let installed_python = pool.installed_solvables().iter().find(|&&id| {
        pool.resolve_solvable(id)
            .record
            .package_record
            .name
            .as_normalized()
            == "python"
    })?;

    let job_names_python = jobs.jobs.iter().any(|job| {
        job.spec()
            .name
            .as_ref()
            .is_some_and(|name| name.as_normalized() == "python")
    });
    if job_names_python {
        return None;
    }

    let (major, minor) = pool
        .resolve_solvable(*installed_python)
        .record
        .package_record
        .version
        .as_major_minor()?;
    format!("python {major}.{minor}.*").parse().ok()
}

/// The mutable search state.
struct State<'pool> {
    pool: &'pool Pool,
    flags: SolverFlags,
    pins: Vec<MatchSpec>,
    locked: BTreeMap<StringId, SolvableId>,
    removed: FxHashSet<SolvableId>,
    chosen_by_name: BTreeMap<StringId, SolvableId>,
    trail: Vec<SolvableId>,
}

impl State<'_> {
    /// Satisfies every item of the queue, backtracking over candidate
    /// choices. On success the chosen solvables are recorded in
    /// `chosen_by_name`; on failure the state is left unchanged.
    fn satisfy(&mut self, queue: Vec<QueueItem>) -> Result<(), DepFailure> {
        let Some((item, rest)) = queue.split_first() else {
            return Ok(());
        };
        let item = item.clone();
        let rest = rest.to_vec();

        let name = self.pool.dependency_name(item.dep);

        // A solvable with this name may already be decided.
        if let Some(&existing) = self.chosen_by_name.get(&name) {
            let spec = self.pool.resolve_dependency(item.dep);
            if spec.matches(&self.pool.resolve_solvable(existing).record.package_record) {
                return self.satisfy(rest);
            }
            // Every candidate clashes with the existing decision.
            let failures = self
                .pool
                .candidates(item.dep)
                .iter()
                .map(|&candidate| (candidate, CandidateFailure::NameClash(existing)))
                .collect();
            return Err(DepFailure {
                dep: Some(item.dep),
                source: item.source,
                cause: FailureCause::Candidates(failures),
            });
        }

        let candidates = self.pool.candidates_ordered(
            item.dep,
            item.favor_installed && !self.flags.force_reinstall,
            self.flags.strict_repo_priority,
        );
        if candidates.is_empty() {
            return Err(DepFailure {
                dep: Some(item.dep),
                source: item.source,
                cause: FailureCause::NothingProvides,
            });
        }

        let mut failures = Vec::new();
        for candidate in candidates {
            if let Some(failure) = self.check_candidate(candidate, item.favor_installed) {
                failures.push((candidate, failure));
                continue;
            }

            // Tentatively decide the candidate and descend into its
            // dependencies followed by the remaining queue.
            let mark = self.trail.len();
            self.choose(candidate);

            let mut next_queue: Vec<QueueItem> = Vec::new();
            let skip_deps = self.flags.no_deps && item.source.is_none();
            if !skip_deps {
                next_queue.extend(
                    self.pool
                        .resolve_solvable(candidate)
                        .dependencies
                        .iter()
                        .map(|&dep| QueueItem {
                            dep,
                            source: Some(candidate),
                            favor_installed: true,
                        }),
                );
            }
            next_queue.extend(rest.iter().cloned());

            match self.satisfy(next_queue) {
                Ok(()) => return Ok(()),
                Err(failure) => {
                    self.undo_to(mark);
                    failures.push((
                        candidate,
                        CandidateFailure::DependencyFailed(Box::new(failure)),
                    ));
                }
            }
        }

        Err(DepFailure {
            dep: Some(item.dep),
            source: item.source,
            cause: FailureCause::Candidates(failures),
        })
    }

    /// Checks a candidate against the current decisions without modifying
    /// the state. Returns the failure that rules it out, if any.
    fn check_candidate(
        &self,
        candidate: SolvableId,
        favor_installed: bool,
    ) -> Option<CandidateFailure> {
        let solvable = self.pool.resolve_solvable(candidate);
        let name = solvable.name;

        if self.removed.contains(&candidate) {
            return Some(CandidateFailure::RemovedByJob);
        }

        if let Some(&locked) = self.locked.get(&name) {
            if locked != candidate {
                return Some(CandidateFailure::Locked(locked));
            }
        }

        for pin in &self.pins {
            let pin_applies = pin
                .name
                .as_ref()
                .is_some_and(|pin_name| pin_name == &solvable.record.package_record.name);
            if pin_applies && !pin.matches(&solvable.record.package_record) {
                return Some(CandidateFailure::PinViolation(pin.to_string()));
            }
        }

        if !self.flags.allow_downgrade && !favor_installed {
            if let Some(installed) = self.installed_with_name(name) {
                let installed_version = &self
                    .pool
                    .resolve_solvable(installed)
                    .record
                    .package_record
                    .version;
                if &solvable.record.package_record.version < installed_version {
                    return Some(CandidateFailure::Downgrade(installed));
                }
            }
        }

        if let Some((constrainer, dep)) = self.constrains_violation(candidate) {
            return Some(CandidateFailure::ConstrainedBy(constrainer, dep));
        }

        None
    }

    /// Keeps an installed solvable in the solution when possible.
    fn keep_installed(&mut self, installed_id: SolvableId) -> Result<(), DepFailure> {
        let solvable = self.pool.resolve_solvable(installed_id);
        if self.removed.contains(&installed_id)
            || self.chosen_by_name.contains_key(&solvable.name)
        {
            return Ok(());
        }

        // The same admission checks as for a regular candidate; a violation
        // means the package cannot stay.
        if let Some(failure) = self.check_candidate(installed_id, true) {
            return Err(DepFailure {
                dep: None,
                source: Some(installed_id),
                cause: FailureCause::Candidates(vec![(installed_id, failure)]),
            });
        }

        let mark = self.trail.len();
        self.choose(installed_id);

        let queue: Vec<QueueItem> = self
            .pool
            .resolve_solvable(installed_id)
            .dependencies
            .iter()
            .map(|&dep| QueueItem {
                dep,
                source: Some(installed_id),
                favor_installed: true,
            })
            .collect();

        match self.satisfy(queue) {
            Ok(()) => Ok(()),
            Err(failure) => {
                self.undo_to(mark);
                Err(failure)
            }
        }
    }

    fn installed_with_name(&self, name: StringId) -> Option<SolvableId> {
        self.pool
            .installed_solvables()
            .iter()
            .copied()
            .find(|&id| self.pool.resolve_solvable(id).name == name)
    }

    /// Finds a constrains violation between the candidate and the current
    /// decisions: either a decided solvable constrains the candidate's name
    /// to something it does not satisfy, or the candidate constrains a
    /// decided solvable.
    fn constrains_violation(&self, candidate: SolvableId) -> Option<(SolvableId, DepId)> {
        let solvable = self.pool.resolve_solvable(candidate);

        for &chosen in self.chosen_by_name.values() {
            for &dep in &self.pool.resolve_solvable(chosen).constrains {
                if self.pool.dependency_name(dep) == solvable.name
                    && !self
                        .pool
                        .resolve_dependency(dep)
                        .matches(&solvable.record.package_record)
                {
                    return Some((chosen, dep));
                }
            }
        }

        for &dep in &solvable.constrains {
            if let Some(&chosen) = self.chosen_by_name.get(&self.pool.dependency_name(dep)) {
                if !self
                    .pool
                    .resolve_dependency(dep)
                    .matches(&self.pool.resolve_solvable(chosen).record.package_record)
                {
                    return Some((chosen, dep));
                }
            }
        }

        None
    }

    fn choose(&mut self, candidate: SolvableId) {
        let name = self.pool.resolve_solvable(candidate).name;
        self.trail.push(candidate);
        self.chosen_by_name.insert(name, candidate);
    }

    fn undo_to(&mut self, mark: usize) {
        while self.trail.len() > mark {
            let undone = self.trail.pop().expect("the trail cannot underflow here");
            let name = self.pool.resolve_solvable(undone).name;
            self.chosen_by_name.remove(&name);
        }
    }
}
