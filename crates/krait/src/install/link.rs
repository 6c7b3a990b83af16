//! Linking a single file from an extracted package into a prefix.

use std::fs::Permissions;
use std::io::Write;
use std::path::Path;

use krait_conda_types::package::{FileMode, PathType, PathsEntry};
use krait_conda_types::prefix_record;
use krait_digest::{HashingWriter, Sha256, Sha256Hash};

/// An error that can occur while linking a file.
#[derive(Debug, thiserror::Error)]
pub enum LinkFileError {
    /// A generic io error.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The parent directory of the destination could not be created.
    #[error("failed to create parent directory")]
    FailedToCreateParentDirectory(#[source] std::io::Error),

    /// The source file in the package cache could not be opened.
    #[error("could not open source file")]
    FailedToOpenSourceFile(#[source] std::io::Error),

    /// The source file metadata could not be read.
    #[error("could not read source file metadata")]
    FailedToReadSourceFileMetadata(#[source] std::io::Error),

    /// The destination file could not be created.
    #[error("could not open destination file for writing")]
    FailedToOpenDestinationFile(#[source] std::io::Error),

    /// The permissions of the destination file could not be set.
    #[error("could not update destination file permissions")]
    FailedToUpdateDestinationFilePermissions(#[source] std::io::Error),
}

/// The result of linking a single file.
pub struct LinkedFile {
    /// How the file ended up in the prefix.
    pub link_type: prefix_record::LinkType,

    /// The hash of the file as it exists in the prefix, when it differs
    /// from the cached file because a placeholder was substituted.
    pub sha256_in_prefix: Option<Sha256Hash>,
}

/// Installs a single file from an extracted package directory into the
/// target directory.
///
/// Files with a `prefix_placeholder` are rewritten (text or binary mode)
/// while being copied; other files are hard linked when possible, with a
/// fallback to copying (for example across filesystems). Symbolic links are
/// recreated.
pub fn link_file(
    path_json_entry: &PathsEntry,
    destination_relative_path: &Path,
    package_dir: &Path,
    target_dir: &Path,
    target_prefix: &str,
    allow_hard_links: bool,
) -> Result<LinkedFile, LinkFileError> {
    let source_path = package_dir.join(&path_json_entry.relative_path);
    let destination_path = target_dir.join(destination_relative_path);

    if let Some(parent) = destination_path.parent() {
        std::fs::create_dir_all(parent).map_err(LinkFileError::FailedToCreateParentDirectory)?;
    }

    if path_json_entry.path_type == PathType::Directory {
        std::fs::create_dir_all(&destination_path)?;
        return Ok(LinkedFile {
            link_type: prefix_record::LinkType::Directory,
            sha256_in_prefix: None,
        });
    }

    if let Some(prefix_placeholder) = path_json_entry.prefix_placeholder.as_deref() {
        // Map the source file and rewrite the placeholder while copying to
        // the destination.
        let source = {
            let file =
                std::fs::File::open(&source_path).map_err(LinkFileError::FailedToOpenSourceFile)?;
            unsafe { memmap2::Mmap::map(&file).map_err(LinkFileError::FailedToOpenSourceFile)? }
        };

        let destination = std::fs::File::create(&destination_path)
            .map_err(LinkFileError::FailedToOpenDestinationFile)?;
        let mut destination_writer = HashingWriter::<_, Sha256>::new(destination);

        match path_json_entry.file_mode.unwrap_or(FileMode::Text) {
            FileMode::Text => {
                copy_and_replace_textual_placeholder(
                    source.as_ref(),
                    &mut destination_writer,
                    prefix_placeholder,
                    target_prefix,
                )?;
            }
            FileMode::Binary => {
                copy_and_replace_cstring_placeholder(
                    source.as_ref(),
                    &mut destination_writer,
                    prefix_placeholder,
                    target_prefix,
                )?;
            }
        }

        let (_, sha256_in_prefix) = destination_writer.finalize();

        // Carry over the permissions of the original file, they matter for
        // rewritten executables and shared libraries.
        let metadata = std::fs::symlink_metadata(&source_path)
            .map_err(LinkFileError::FailedToReadSourceFileMetadata)?;
        std::fs::set_permissions(&destination_path, metadata.permissions())
            .map_err(LinkFileError::FailedToUpdateDestinationFilePermissions)?;

        return Ok(LinkedFile {
            link_type: prefix_record::LinkType::Copy,
            sha256_in_prefix: Some(sha256_in_prefix),
        });
    }

    if path_json_entry.path_type == PathType::SoftLink {
        let linked_path = source_path
            .read_link()
            .map_err(LinkFileError::FailedToOpenSourceFile)?;
        symlink(&linked_path, &destination_path)?;
        return Ok(LinkedFile {
            link_type: prefix_record::LinkType::SoftLink,
            sha256_in_prefix: None,
        });
    }

    if allow_hard_links && !path_json_entry.no_link {
        match std::fs::hard_link(&source_path, &destination_path) {
            Ok(()) => {
                return Ok(LinkedFile {
                    link_type: prefix_record::LinkType::HardLink,
                    sha256_in_prefix: None,
                })
            }
            Err(e) => {
                // Hard links fail across devices; fall back to a copy.
                tracing::debug!(
                    "hard linking '{}' failed ({e}), copying instead",
                    source_path.display()
                );
            }
        }
    }

    std::fs::copy(&source_path, &destination_path)?;
    Ok(LinkedFile {
        link_type: prefix_record::LinkType::Copy,
        sha256_in_prefix: None,
    })
}

/// Copies `source_bytes` to `destination`, replacing every occurrence of
/// the placeholder with the target prefix. Used for text files where the
/// length of the content may change.
fn copy_and_replace_textual_placeholder(
    mut source_bytes: &[u8],
    mut destination: impl Write,
    prefix_placeholder: &str,
    target_prefix: &str,
) -> Result<(), std::io::Error> {
    let old_prefix = prefix_placeholder.as_bytes();
    let new_prefix = target_prefix.as_bytes();

    loop {
        if let Some(index) = memchr::memmem::find(source_bytes, old_prefix) {
            destination.write_all(&source_bytes[..index])?;
            destination.write_all(new_prefix)?;
            source_bytes = &source_bytes[index + old_prefix.len()..];
        } else {
            destination.write_all(source_bytes)?;
            return Ok(());
        }
    }
}

/// Copies `source_bytes` to `destination`, replacing the placeholder inside
/// null terminated c-strings. The output has exactly the same length as the
/// input: the replacement is padded with `\0` when the new prefix is
/// shorter, and truncated (suffix first) when it is longer.
fn copy_and_replace_cstring_placeholder(
    mut source_bytes: &[u8],
    mut destination: impl Write,
    prefix_placeholder: &str,
    target_prefix: &str,
) -> Result<(), std::io::Error> {
    let old_prefix = prefix_placeholder.as_bytes();
    let new_prefix = target_prefix.as_bytes();

    let padding = vec![b'\0'; old_prefix.len().saturating_sub(new_prefix.len())];

    loop {
        if let Some(index) = memchr::memmem::find(source_bytes, old_prefix) {
            // Find the end of the c-string the placeholder is part of.
            let mut end = index + old_prefix.len();
            while end < source_bytes.len() && source_bytes[end] != b'\0' {
                end += 1;
            }

            let len = end - index;
            let suffix = &source_bytes[index + old_prefix.len()..end];

            destination.write_all(&source_bytes[..index])?;
            destination.write_all(&new_prefix[..len.min(new_prefix.len())])?;
            destination
                .write_all(&suffix[..len.saturating_sub(new_prefix.len()).min(suffix.len())])?;
            destination.write_all(&padding)?;

            source_bytes = &source_bytes[end..];
        } else {
            destination.write_all(source_bytes)?;
            return Ok(());
        }
    }
}

fn symlink(source_path: &Path, destination_path: &Path) -> std::io::Result<()> {
    #[cfg(windows)]
    return std::os::windows::fs::symlink_file(source_path, destination_path);
    #[cfg(unix)]
    return std::os::unix::fs::symlink(source_path, destination_path);
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use rstest::rstest;

    #[rstest]
    #[case("Hello, cruel world!", "cruel", "fabulous", "Hello, fabulous world!")]
    #[case(
        "/opt/placeholder/bin:/opt/placeholder/lib",
        "/opt/placeholder",
        "/env",
        "/env/bin:/env/lib"
    )]
    #[case("no placeholder here", "/opt/placeholder", "/env", "no placeholder here")]
    fn test_textual_replace(
        #[case] input: &str,
        #[case] prefix_placeholder: &str,
        #[case] target_prefix: &str,
        #[case] expected_output: &str,
    ) {
        let mut output = Cursor::new(Vec::new());
        super::copy_and_replace_textual_placeholder(
            input.as_bytes(),
            &mut output,
            prefix_placeholder,
            target_prefix,
        )
        .unwrap();
        assert_eq!(
            &String::from_utf8_lossy(&output.into_inner()),
            expected_output
        );
    }

    #[rstest]
    #[case(
        b"12345Hello, fabulous world!\06789",
        "fabulous",
        "cruel",
        b"12345Hello, cruel world!\0\0\0\06789"
    )]
    #[case(b"short\0", "short", "verylong", b"veryl\0")]
    #[case(b"short1234\0", "short", "verylong", b"verylong1\0")]
    fn test_binary_replace(
        #[case] input: &[u8],
        #[case] prefix_placeholder: &str,
        #[case] target_prefix: &str,
        #[case] expected_output: &[u8],
    ) {
        assert_eq!(
            expected_output.len(),
            input.len(),
            "input and expected output must have the same length"
        );
        let mut output = Cursor::new(Vec::new());
        super::copy_and_replace_cstring_placeholder(
            input,
            &mut output,
            prefix_placeholder,
            target_prefix,
        )
        .unwrap();
        assert_eq!(&output.into_inner(), expected_output);
    }
}
