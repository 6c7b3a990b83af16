use std::fmt::{Display, Formatter};
use std::path::Path;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use url::Url;

/// Describes the type of package archive.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveType {
    /// A file with the `.tar.bz2` extension.
    TarBz2,

    /// A file with the `.conda` extension: a zip container holding two inner
    /// zstd-compressed tarballs.
    Conda,
}

impl ArchiveType {
    /// Returns the file extension of this archive type.
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveType::TarBz2 => ".tar.bz2",
            ArchiveType::Conda => ".conda",
        }
    }

    /// Tries to determine the archive type from a file name.
    pub fn try_from(path: impl AsRef<Path>) -> Option<ArchiveType> {
        Self::split_str(path.as_ref().to_string_lossy().as_ref())
            .map(|(_, archive_type)| archive_type)
    }

    /// Splits the given string into its filename without extension and the
    /// recognized archive type.
    pub fn split_str(path: &str) -> Option<(&str, ArchiveType)> {
        if let Some(path) = path.strip_suffix(".conda") {
            Some((path, ArchiveType::Conda))
        } else {
            path.strip_suffix(".tar.bz2")
                .map(|path| (path, ArchiveType::TarBz2))
        }
    }

    /// Tries to determine the archive type from the magic bytes at the start
    /// of a file.
    pub fn try_from_magic_bytes<T: AsRef<[u8]>>(bytes: T) -> Option<ArchiveType> {
        let bytes = bytes.as_ref();
        if bytes.len() < 4 {
            return None;
        }
        match bytes[0..4] {
            // zip magic number
            [0x50, 0x4B, 0x03, 0x04] | [0x50, 0x4B, 0x05, 0x06] | [0x50, 0x4B, 0x07, 0x08] => {
                Some(ArchiveType::Conda)
            }
            // bz2 magic number
            [0x42, 0x5a, 0x68, _] => Some(ArchiveType::TarBz2),
            _ => None,
        }
    }
}

/// The `name`, `version`, `build_string` and `archive_type` of a package
/// archive, derived from its filename `<name>-<version>-<build>.<ext>`.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ArchiveIdentifier {
    /// The name of the package.
    pub name: String,
    /// The version of the package.
    pub version: String,
    /// The build string of the package.
    pub build_string: String,
    /// The archive type of the package.
    pub archive_type: ArchiveType,
}

impl ArchiveIdentifier {
    /// Converts the archive identifier back into a filename.
    pub fn to_file_name(&self) -> String {
        self.to_string()
    }

    /// Tries to convert the specified filename into an
    /// [`ArchiveIdentifier`].
    pub fn try_from_filename(filename: &str) -> Option<Self> {
        let (filename_without_ext, archive_type) = ArchiveType::split_str(filename)?;

        // Filename is in the form of: <name>-<version>-<build>
        let (build_string, version, name) = filename_without_ext.rsplitn(3, '-').next_tuple()?;

        Some(Self {
            name: name.to_owned(),
            version: version.to_owned(),
            build_string: build_string.to_owned(),
            archive_type,
        })
    }

    /// Tries to convert the specified path into an [`ArchiveIdentifier`].
    pub fn try_from_path(path: impl AsRef<Path>) -> Option<Self> {
        Self::try_from_filename(path.as_ref().file_name()?.to_str()?)
    }

    /// Tries to convert a [`Url`] into an [`ArchiveIdentifier`].
    pub fn try_from_url(url: &Url) -> Option<Self> {
        let filename = url.path_segments().and_then(Iterator::last)?;
        Self::try_from_filename(filename)
    }
}

impl Display for ArchiveIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}{}",
            self.name,
            self.version,
            self.build_string,
            self.archive_type.extension()
        )
    }
}

#[cfg(test)]
mod test {
    use super::{ArchiveIdentifier, ArchiveType};

    #[test]
    fn test_try_from_filename() {
        let identifier =
            ArchiveIdentifier::try_from_filename("python-3.11.0-h9a09f29_0_cpython.conda")
                .unwrap();
        assert_eq!(identifier.name, "python");
        assert_eq!(identifier.version, "3.11.0");
        assert_eq!(identifier.build_string, "h9a09f29_0_cpython");
        assert_eq!(identifier.archive_type, ArchiveType::Conda);
        assert_eq!(
            identifier.to_file_name(),
            "python-3.11.0-h9a09f29_0_cpython.conda"
        );

        let identifier = ArchiveIdentifier::try_from_filename("foo-1.0-0.tar.bz2").unwrap();
        assert_eq!(identifier.archive_type, ArchiveType::TarBz2);

        assert!(ArchiveIdentifier::try_from_filename("foo-1.0-0.zip").is_none());
        assert!(ArchiveIdentifier::try_from_filename("foo.conda").is_none());
    }

    #[test]
    fn test_magic_bytes() {
        assert_eq!(
            ArchiveType::try_from_magic_bytes([0x50, 0x4B, 0x03, 0x04]),
            Some(ArchiveType::Conda)
        );
        assert_eq!(
            ArchiveType::try_from_magic_bytes(b"BZh9"),
            Some(ArchiveType::TarBz2)
        );
        assert_eq!(ArchiveType::try_from_magic_bytes(b"nope"), None);
    }
}
