//! Python bytecode compilation for `noarch: python` packages.

use std::path::{Path, PathBuf};

use super::PythonInfo;

/// Compiles the given prefix-relative python source files to bytecode by
/// invoking the environment's interpreter with `compileall`.
///
/// Compilation is best effort: packages work without their bytecode, just
/// slower on first import, and some shipped sources do not even compile.
/// Failures are therefore logged and swallowed.
pub async fn compile_bytecode(
    prefix: &Path,
    python_info: &PythonInfo,
    py_files: &[PathBuf],
) -> Result<(), std::io::Error> {
    if py_files.is_empty() {
        return Ok(());
    }

    let python_path = prefix.join(python_info.path());
    if !python_path.exists() {
        tracing::warn!(
            "skipping bytecode compilation, '{}' does not exist",
            python_path.display()
        );
        return Ok(());
    }

    tracing::debug!(
        "compiling bytecode for {} files with '{}'",
        py_files.len(),
        python_path.display()
    );

    // `compileall -i -` reads the file list from stdin, which sidesteps any
    // command line length limits.
    let mut child = tokio::process::Command::new(&python_path)
        .args(["-Wi", "-m", "compileall", "-q", "-i", "-"])
        .current_dir(prefix)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        use tokio::io::AsyncWriteExt;
        let mut input = String::new();
        for file in py_files {
            input.push_str(&file.to_string_lossy());
            input.push('\n');
        }
        stdin.write_all(input.as_bytes()).await?;
        drop(stdin);
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        tracing::warn!(
            "bytecode compilation reported errors (ignored): {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    Ok(())
}
