//! Execution of `pre-link`/`post-link`/`pre-unlink` scripts that a package
//! may ship.

use std::path::Path;

use krait_conda_types::PackageRecord;

/// The kind of link script to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkScriptKind {
    /// Runs before the package files are linked.
    PreLink,

    /// Runs after the package files were linked.
    PostLink,

    /// Runs before the package files are removed.
    PreUnlink,
}

impl LinkScriptKind {
    fn file_name(self, package_name: &str) -> String {
        match self {
            LinkScriptKind::PreLink => format!("bin/.{package_name}-pre-link.sh"),
            LinkScriptKind::PostLink => format!("bin/.{package_name}-post-link.sh"),
            LinkScriptKind::PreUnlink => format!("bin/.{package_name}-pre-unlink.sh"),
        }
    }
}

/// An error that occurred while running a link script.
#[derive(Debug, thiserror::Error)]
pub enum LinkScriptError {
    /// The script process could not be spawned or waited for.
    #[error("failed to run link script")]
    IoError(#[from] std::io::Error),

    /// The script exited with a failure status.
    #[error("the link script exited with {0}")]
    Failed(std::process::ExitStatus),
}

/// Runs the link script of the given kind for a package if the package
/// ships one. The script runs with the environment variables `PREFIX`,
/// `PKG_NAME`, `PKG_VERSION` and `PKG_BUILDNUM` set.
///
/// `script_root` is where the script file is looked up: the extracted
/// package directory for pre-link scripts (the files are not in the prefix
/// yet at that point), the prefix for post-link and pre-unlink scripts.
///
/// Returns `Ok(false)` if the package has no such script.
pub async fn run_link_script(
    kind: LinkScriptKind,
    record: &PackageRecord,
    script_root: &Path,
    prefix: &Path,
) -> Result<bool, LinkScriptError> {
    let script_path = script_root.join(kind.file_name(record.name.as_normalized()));
    if !script_path.is_file() {
        return Ok(false);
    }

    tracing::debug!(
        "running {kind:?} script for {} in '{}'",
        record.name.as_normalized(),
        prefix.display()
    );

    let status = tokio::process::Command::new("/bin/sh")
        .arg(&script_path)
        .current_dir(prefix)
        .env("PREFIX", prefix)
        .env("PKG_NAME", record.name.as_normalized())
        .env("PKG_VERSION", record.version.as_str())
        .env("PKG_BUILDNUM", record.build_number.to_string())
        .status()
        .await?;

    if status.success() {
        Ok(true)
    } else {
        Err(LinkScriptError::Failed(status))
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use krait_conda_types::{PackageName, PackageRecord, Version};

    use super::{run_link_script, LinkScriptKind};

    fn record() -> PackageRecord {
        let mut record = PackageRecord::new(
            PackageName::new_unchecked("foo"),
            Version::from_str("1.0").unwrap(),
            "0".to_owned(),
        );
        record.build_number = 3;
        record
    }

    #[tokio::test]
    async fn test_missing_script_is_skipped() {
        let prefix = tempfile::tempdir().unwrap();
        let ran = run_link_script(
            LinkScriptKind::PostLink,
            &record(),
            prefix.path(),
            prefix.path(),
        )
        .await
        .unwrap();
        assert!(!ran);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_env() {
        let prefix = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(prefix.path().join("bin")).unwrap();
        let script = prefix.path().join("bin/.foo-post-link.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\necho \"$PKG_NAME $PKG_VERSION $PKG_BUILDNUM\" > \"$PREFIX/out.txt\"\n",
        )
        .unwrap();

        let ran = run_link_script(
            LinkScriptKind::PostLink,
            &record(),
            prefix.path(),
            prefix.path(),
        )
        .await
        .unwrap();
        assert!(ran);
        let out = std::fs::read_to_string(prefix.path().join("out.txt")).unwrap();
        assert_eq!(out.trim(), "foo 1.0 3");
    }
}
