use std::fmt::{Display, Formatter};

use krait_conda_types::RepoDataRecord;

use crate::pool::{DepId, RepoId, StringId};

/// The id of a [`Solvable`] within a [`crate::Pool`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Ord, PartialOrd)]
pub struct SolvableId(pub(crate) u32);

impl SolvableId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A single package candidate indexed in a [`crate::Pool`].
///
/// A solvable keeps its parsed dependency and constrains lists as interned
/// dep ids and a back-pointer to the [`RepoDataRecord`] it was built from so
/// solved results can be materialized without re-parsing.
pub struct Solvable {
    /// The repo this solvable belongs to.
    pub repo_id: RepoId,

    /// The interned (normalized) name of the package.
    pub name: StringId,

    /// The parsed `depends` entries.
    pub dependencies: Vec<DepId>,

    /// The parsed `constrains` entries.
    pub constrains: Vec<DepId>,

    /// The record this solvable was created from.
    pub record: RepoDataRecord,
}

impl Solvable {
    /// A compact display form: `name version build`.
    pub fn display(&self) -> SolvableDisplay<'_> {
        SolvableDisplay {
            name: self.record.package_record.name.as_normalized(),
            version: self.record.package_record.version.as_str(),
            build: &self.record.package_record.build,
        }
    }
}

/// Helper to display a solvable as `name version build`.
pub struct SolvableDisplay<'a> {
    name: &'a str,
    version: String,
    build: &'a str,
}

impl Display for SolvableDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name, self.version)?;
        if !self.build.is_empty() {
            write!(f, " {}", self.build)?;
        }
        Ok(())
    }
}
