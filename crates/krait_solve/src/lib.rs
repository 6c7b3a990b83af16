#![deny(missing_docs)]

//! Dependency solving for conda environments.
//!
//! The [`Pool`] holds the candidate universe: interned strings, interned
//! dependency specs, and per-repo solvables built from repodata records.
//! The [`Solver`] consumes the pool, a job list and a set of flags and
//! produces either the desired set of records or a structured
//! [`problem::Problem`] that the diagnostics in [`problem`] turn into a
//! human readable conflict tree.

mod conda_util;
mod conflict_map;
mod jobs;
mod pool;
pub mod problem;
mod solvable;
mod solver;

pub use conflict_map::ConflictMap;
pub use jobs::{Job, SolveJobs, SolverFlags};
pub use pool::{DepId, Pool, Repo, RepoId, StringId};
pub use problem::{Problem, ProblemsGraph};
pub use solvable::{Solvable, SolvableId};
pub use solver::{Decision, SolveError, Solver, SolverResult};
