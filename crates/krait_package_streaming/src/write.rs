//! Writing of conda package archives. Mostly used by tooling and tests; the
//! package manager itself only reads archives.

use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use itertools::Itertools;

/// Sorts paths into two alphabetically sorted vectors: those under `info/`
/// and the rest. Info paths are placed first in an archive so metadata can
/// be read without decompressing the payload.
fn sort_paths(paths: &[PathBuf], base_path: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let info = Path::new("info/");
    let (info_paths, other_paths): (Vec<_>, Vec<_>) = paths
        .iter()
        .map(|p| p.strip_prefix(base_path).unwrap_or(p))
        .partition(|path| path.starts_with(info));

    (
        info_paths
            .into_iter()
            .sorted()
            .map(Path::to_path_buf)
            .collect(),
        other_paths
            .into_iter()
            .sorted()
            .map(Path::to_path_buf)
            .collect(),
    )
}

/// Writes the given paths into a `.tar.bz2` package archive. Paths are
/// archived relative to `base_path`, `info/` entries first.
pub fn write_tar_bz2_package<W: Write>(
    writer: W,
    base_path: &Path,
    paths: &[PathBuf],
    compression_level: u32,
) -> Result<(), std::io::Error> {
    let mut archive = tar::Builder::new(bzip2::write::BzEncoder::new(
        writer,
        bzip2::Compression::new(compression_level),
    ));
    archive.follow_symlinks(false);

    let (info_paths, other_paths) = sort_paths(paths, base_path);
    for path in info_paths.iter().chain(other_paths.iter()) {
        archive.append_path_with_name(base_path.join(path), path)?;
    }

    archive.into_inner()?.finish()?;
    Ok(())
}

/// Writes the given paths into a zstd compressed tar stream.
fn write_zst_archive<W: Write>(
    writer: W,
    base_path: &Path,
    paths: &[PathBuf],
    compression_level: i32,
) -> Result<(), std::io::Error> {
    let mut archive = tar::Builder::new(zstd::Encoder::new(writer, compression_level)?);
    archive.follow_symlinks(false);

    for path in paths {
        archive.append_path_with_name(base_path.join(path), path)?;
    }

    archive.into_inner()?.finish()?;
    Ok(())
}

/// Writes the given paths into a `.conda` package archive: an uncompressed
/// outer zip holding `metadata.json`, a payload `pkg-*.tar.zst` and an
/// `info-*.tar.zst`.
pub fn write_conda_package<W: Write + Seek>(
    writer: W,
    base_path: &Path,
    paths: &[PathBuf],
    compression_level: i32,
) -> Result<(), std::io::Error> {
    let mut outer_archive = zip::ZipWriter::new(writer);
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);

    outer_archive.start_file("metadata.json", options)?;
    outer_archive.write_all(br#"{"conda_pkg_format_version": 2}"#)?;

    let (info_paths, other_paths) = sort_paths(paths, base_path);

    outer_archive.start_file("pkg-archive.tar.zst", options)?;
    write_zst_archive(&mut outer_archive, base_path, &other_paths, compression_level)?;

    outer_archive.start_file("info-archive.tar.zst", options)?;
    write_zst_archive(&mut outer_archive, base_path, &info_paths, compression_level)?;

    outer_archive.finish()?;
    Ok(())
}
