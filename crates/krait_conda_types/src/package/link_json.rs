use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use thiserror::Error;

/// The `info/link.json` file of a package archive. Present for noarch
/// packages that require special linking, it lists among other things the
/// python entry points to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkJson {
    /// Links for noarch packages.
    pub noarch: NoArchLinks,

    /// The version of the package format.
    pub package_metadata_version: u64,
}

impl LinkJson {
    /// Reads the `info/link.json` file from an extracted package directory.
    pub fn from_package_directory(package_dir: &Path) -> Result<Self, std::io::Error> {
        let path = package_dir.join("info/link.json");
        let contents = fs_err::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Links for noarch packages, keyed by the noarch kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NoArchLinks {
    /// A `noarch: python` package.
    Python(PythonLinks),

    /// A `noarch: generic` package requires no special link handling.
    Generic,
}

/// Entry points of a `noarch: python` package.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PythonLinks {
    /// The entry points to generate when the package is linked.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[serde_as(as = "Vec<DisplayFromStr>")]
    pub entry_points: Vec<EntryPoint>,
}

/// A python entry point in its `command = module:function` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// The name of the executable to generate.
    pub command: String,

    /// The python module that contains the entry function.
    pub module: String,

    /// The function to call in the module.
    pub function: String,
}

/// An error that occurred while parsing an entry point descriptor.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseEntryPointError {
    /// The `=` between command and import path was missing.
    #[error("entry point is missing a '='")]
    MissingSeparator,

    /// The `:` between module and function was missing.
    #[error("entry point is missing a ':' in its import path")]
    MissingFunction,
}

impl FromStr for EntryPoint {
    type Err = ParseEntryPointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (command, import) = s
            .split_once('=')
            .ok_or(ParseEntryPointError::MissingSeparator)?;
        let (module, function) = import
            .split_once(':')
            .ok_or(ParseEntryPointError::MissingFunction)?;
        Ok(EntryPoint {
            command: command.trim().to_owned(),
            module: module.trim().to_owned(),
            function: function.trim().to_owned(),
        })
    }
}

impl std::fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}:{}", self.command, self.module, self.function)
    }
}

#[cfg(test)]
mod test {
    use super::{LinkJson, NoArchLinks};

    #[test]
    fn test_parse() {
        let link: LinkJson = serde_json::from_str(
            r#"{
                "noarch": {
                    "type": "python",
                    "entry_points": ["pytest = pytest:console_main"]
                },
                "package_metadata_version": 1
            }"#,
        )
        .unwrap();

        let NoArchLinks::Python(python) = &link.noarch else {
            panic!("expected python noarch links");
        };
        assert_eq!(python.entry_points.len(), 1);
        assert_eq!(python.entry_points[0].command, "pytest");
        assert_eq!(python.entry_points[0].module, "pytest");
        assert_eq!(python.entry_points[0].function, "console_main");
    }
}
