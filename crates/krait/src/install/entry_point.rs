//! Creation of python entry points for `noarch: python` packages.

use std::io::Write;
use std::path::Path;

use krait_conda_types::package::EntryPoint;
use krait_conda_types::prefix_record::{PathType, PathsEntry};
use krait_digest::{HashingWriter, Sha256};

use super::PythonInfo;

/// Creates an executable entry point script for a python entry point: a
/// small script with a python shebang that imports the module and calls the
/// entry function.
pub fn create_unix_python_entry_point(
    target_dir: &Path,
    target_prefix: &str,
    entry_point: &EntryPoint,
    python_info: &PythonInfo,
) -> Result<PathsEntry, std::io::Error> {
    let relative_path = python_info.bin_dir.join(&entry_point.command);
    let script_path = target_dir.join(&relative_path);
    if let Some(parent) = script_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let script = python_entry_point_template(target_prefix, entry_point, python_info);

    let file = std::fs::File::create(&script_path)?;
    let mut writer = HashingWriter::<_, Sha256>::new(file);
    writer.write_all(script.as_bytes())?;
    let (file, sha256) = writer.finalize();
    drop(file);

    #[cfg(unix)]
    std::fs::set_permissions(
        &script_path,
        std::os::unix::fs::PermissionsExt::from_mode(0o755),
    )?;

    Ok(PathsEntry {
        relative_path,
        path_type: PathType::UnixPythonEntryPoint,
        no_link: false,
        sha256: Some(sha256),
        sha256_in_prefix: None,
        size_in_bytes: Some(script.len() as u64),
        file_mode: None,
        prefix_placeholder: None,
    })
}

/// The script body of a python entry point.
fn python_entry_point_template(
    target_prefix: &str,
    entry_point: &EntryPoint,
    python_info: &PythonInfo,
) -> String {
    let shebang = python_info.shebang(target_prefix);
    let module = &entry_point.module;
    let function = &entry_point.function;
    // The "import" trick makes the function accessible even when it lives
    // in a nested attribute.
    let import = function
        .split_once('.')
        .map(|(first, _)| first)
        .unwrap_or(function);
    format!(
        "{shebang}\n\
         # -*- coding: utf-8 -*-\n\
         import re\n\
         import sys\n\n\
         from {module} import {import}\n\n\
         if __name__ == '__main__':\n\
         \x20   sys.argv[0] = re.sub(r'(-script\\.pyw?|\\.exe)?$', '', sys.argv[0])\n\
         \x20   sys.exit({function}())\n"
    )
}
