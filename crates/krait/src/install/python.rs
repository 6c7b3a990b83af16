use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};

use krait_conda_types::{PackageRecord, Platform, Version};

/// Information about the python interpreter of an environment, required to
/// link `noarch: python` packages: where site-packages and entry points go,
/// and which interpreter compiles bytecode.
#[derive(Debug, Clone)]
pub struct PythonInfo {
    /// The platform the interpreter is installed for.
    pub platform: Platform,

    /// The major and minor version of the interpreter.
    pub short_version: (u64, u64),

    /// The path of the interpreter relative to the prefix.
    pub path: PathBuf,

    /// The site-packages directory relative to the prefix.
    pub site_packages_path: PathBuf,

    /// The directory entry points are created in, relative to the prefix.
    pub bin_dir: PathBuf,
}

/// An error creating a [`PythonInfo`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum PythonInfoError {
    /// The version of the python package has no major.minor part.
    #[error("invalid python version '{0}'")]
    InvalidVersion(String),
}

impl PythonInfo {
    /// Builds an instance from the record of the python interpreter
    /// package.
    pub fn from_python_record(
        record: &PackageRecord,
        platform: Platform,
    ) -> Result<Self, PythonInfoError> {
        Self::from_version(
            record.version.version(),
            record.python_site_packages_path.as_deref(),
            platform,
        )
    }

    /// Builds an instance from a python version and platform.
    pub fn from_version(
        version: &Version,
        site_packages_path: Option<&str>,
        platform: Platform,
    ) -> Result<Self, PythonInfoError> {
        let (major, minor) = version
            .as_major_minor()
            .ok_or_else(|| PythonInfoError::InvalidVersion(version.to_string()))?;

        let path = if platform.is_windows() {
            PathBuf::from("python.exe")
        } else {
            PathBuf::from(format!("bin/python{major}.{minor}"))
        };

        // The interpreter may advertise its site-packages path (judging by
        // its record); otherwise derive it from the version.
        let site_packages_path = site_packages_path.map_or_else(
            || {
                if platform.is_windows() {
                    PathBuf::from("Lib/site-packages")
                } else {
                    PathBuf::from(format!("lib/python{major}.{minor}/site-packages"))
                }
            },
            PathBuf::from,
        );

        let bin_dir = if platform.is_windows() {
            PathBuf::from("Scripts")
        } else {
            PathBuf::from("bin")
        };

        Ok(Self {
            platform,
            short_version: (major, minor),
            path,
            site_packages_path,
            bin_dir,
        })
    }

    /// The path to the python executable relative to the prefix.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Constructs a shebang line that runs a script with this interpreter.
    pub fn shebang(&self, target_prefix: &str) -> String {
        let target_path = Path::new(target_prefix).join(self.path());
        let target_path = target_path.as_os_str().to_string_lossy().replace('\\', "/");

        // Shebang lines longer than 127 characters or containing spaces are
        // not portable; fall back to the exec trick.
        if target_path.len() > 127 - 2 || target_path.contains(' ') {
            format!("#!/bin/sh\n'''exec' \"{}\" \"$0\" \"$@\" #'''", &target_path)
        } else {
            format!("#!{}", &target_path)
        }
    }

    /// Maps the archive-relative path of a file in a `noarch: python`
    /// package to its location in the prefix: `site-packages/` entries move
    /// into the interpreter's site-packages directory, `python-scripts/`
    /// entries into the bin directory.
    pub fn get_python_noarch_target_path<'a>(&self, relative_path: &'a Path) -> Cow<'a, Path> {
        if let Ok(rest) = relative_path.strip_prefix("site-packages/") {
            self.site_packages_path.join(rest).into()
        } else if let Ok(rest) = relative_path.strip_prefix("python-scripts/") {
            self.bin_dir.join(rest).into()
        } else {
            relative_path.into()
        }
    }

    /// Returns the path of the bytecode file the interpreter would create
    /// for a python source file.
    pub fn bytecode_path(&self, py_path: &Path) -> PathBuf {
        let file_name = py_path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        let (major, minor) = self.short_version;
        let pyc_name = format!(
            "{}.cpython-{major}{minor}.pyc",
            file_name.trim_end_matches(".py")
        );
        match py_path.parent() {
            Some(parent) => parent.join("__pycache__").join(pyc_name),
            None => PathBuf::from(pyc_name),
        }
    }

    /// Returns true if switching from `previous` to this interpreter
    /// requires relinking all `noarch: python` packages (the bytecode tag
    /// changes with the minor version).
    pub fn is_relink_required(&self, previous: &PythonInfo) -> bool {
        self.short_version.0 != previous.short_version.0
            || self.short_version.1 != previous.short_version.1
    }
}
