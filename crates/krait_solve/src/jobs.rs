use krait_conda_types::MatchSpec;

/// A single solver job.
#[derive(Debug, Clone)]
pub enum Job {
    /// Make sure a package matching the spec is installed.
    Install(MatchSpec),

    /// Remove the installed packages matching the spec.
    Remove(MatchSpec),

    /// Update the installed packages matching the spec to the best
    /// available candidate.
    Update(MatchSpec),

    /// Keep the installed package matching the spec at exactly its current
    /// version; no other candidate of that name is considered.
    Lock(MatchSpec),
}

impl Job {
    /// The spec this job applies to.
    pub fn spec(&self) -> &MatchSpec {
        match self {
            Job::Install(spec) | Job::Remove(spec) | Job::Update(spec) | Job::Lock(spec) => spec,
        }
    }
}

/// The list of jobs and pins handed to the solver.
#[derive(Debug, Clone, Default)]
pub struct SolveJobs {
    /// The jobs to perform, in order.
    pub jobs: Vec<Job>,

    /// Additional constraints: any decided package matching a pin's name
    /// must satisfy the pin.
    pub pins: Vec<MatchSpec>,
}

impl SolveJobs {
    /// Adds an install job.
    pub fn install(&mut self, spec: MatchSpec) {
        self.jobs.push(Job::Install(spec));
    }

    /// Adds a remove job.
    pub fn remove(&mut self, spec: MatchSpec) {
        self.jobs.push(Job::Remove(spec));
    }

    /// Adds an update job.
    pub fn update(&mut self, spec: MatchSpec) {
        self.jobs.push(Job::Update(spec));
    }

    /// Adds a lock job.
    pub fn lock(&mut self, spec: MatchSpec) {
        self.jobs.push(Job::Lock(spec));
    }

    /// Adds a pin.
    pub fn pin(&mut self, spec: MatchSpec) {
        self.pins.push(spec);
    }
}

/// Flags modifying solver behavior.
#[derive(Debug, Clone, Copy)]
pub struct SolverFlags {
    /// Allow a requested change to downgrade an installed package.
    pub allow_downgrade: bool,

    /// Allow installed packages that cannot be kept consistent to be
    /// removed, instead of failing the solve.
    pub allow_uninstall: bool,

    /// With strict priority only candidates from the highest priority repo
    /// providing a dependency are considered.
    pub strict_repo_priority: bool,

    /// Do not recurse into the dependencies of requested packages.
    pub no_deps: bool,

    /// Install only the dependencies of requested packages, not the
    /// packages themselves.
    pub only_deps: bool,

    /// Re-link requested packages even when the installed package is
    /// identical.
    pub force_reinstall: bool,
}

impl Default for SolverFlags {
    fn default() -> Self {
        Self {
            allow_downgrade: true,
            allow_uninstall: true,
            strict_repo_priority: true,
            no_deps: false,
            only_deps: false,
            force_reinstall: false,
        }
    }
}
