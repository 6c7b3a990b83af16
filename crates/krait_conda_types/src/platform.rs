use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A platform supported by the conda ecosystem. Platforms double as the
/// subdirectory names of a channel (e.g. `linux-64`, `noarch`).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[allow(missing_docs)]
pub enum Platform {
    NoArch,
    Linux32,
    Linux64,
    LinuxAarch64,
    LinuxArmV7l,
    LinuxPpc64le,
    LinuxRiscV64,
    LinuxS390X,
    Osx64,
    OsxArm64,
    Win32,
    Win64,
    WinArm64,
}

/// An error that occurred while parsing a platform from a string.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("'{string}' is not a known platform")]
pub struct ParsePlatformError {
    /// The string that could not be parsed.
    pub string: String,
}

impl Platform {
    /// Returns the platform this binary was compiled for.
    pub fn current() -> Platform {
        #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
        return Platform::Linux64;

        #[cfg(all(target_os = "linux", target_arch = "x86"))]
        return Platform::Linux32;

        #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
        return Platform::LinuxAarch64;

        #[cfg(all(target_os = "linux", target_arch = "powerpc64le"))]
        return Platform::LinuxPpc64le;

        #[cfg(all(target_os = "linux", target_arch = "riscv64"))]
        return Platform::LinuxRiscV64;

        #[cfg(all(target_os = "linux", target_arch = "s390x"))]
        return Platform::LinuxS390X;

        #[cfg(all(target_os = "macos", target_arch = "x86_64"))]
        return Platform::Osx64;

        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        return Platform::OsxArm64;

        #[cfg(all(target_os = "windows", target_arch = "x86"))]
        return Platform::Win32;

        #[cfg(all(target_os = "windows", target_arch = "x86_64"))]
        return Platform::Win64;

        #[cfg(all(target_os = "windows", target_arch = "aarch64"))]
        return Platform::WinArm64;
    }

    /// Returns a string representation of the platform, which is also the
    /// subdir name in a channel.
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::NoArch => "noarch",
            Platform::Linux32 => "linux-32",
            Platform::Linux64 => "linux-64",
            Platform::LinuxAarch64 => "linux-aarch64",
            Platform::LinuxArmV7l => "linux-armv7l",
            Platform::LinuxPpc64le => "linux-ppc64le",
            Platform::LinuxRiscV64 => "linux-riscv64",
            Platform::LinuxS390X => "linux-s390x",
            Platform::Osx64 => "osx-64",
            Platform::OsxArm64 => "osx-arm64",
            Platform::Win32 => "win-32",
            Platform::Win64 => "win-64",
            Platform::WinArm64 => "win-arm64",
        }
    }

    /// Returns true if the platform is a windows platform.
    pub fn is_windows(self) -> bool {
        matches!(self, Platform::Win32 | Platform::Win64 | Platform::WinArm64)
    }

    /// Returns true if the platform is a linux platform.
    pub fn is_linux(self) -> bool {
        matches!(
            self,
            Platform::Linux32
                | Platform::Linux64
                | Platform::LinuxAarch64
                | Platform::LinuxArmV7l
                | Platform::LinuxPpc64le
                | Platform::LinuxRiscV64
                | Platform::LinuxS390X
        )
    }

    /// Returns true if the platform is an macOS platform.
    pub fn is_osx(self) -> bool {
        matches!(self, Platform::Osx64 | Platform::OsxArm64)
    }
}

impl FromStr for Platform {
    type Err = ParsePlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "noarch" => Platform::NoArch,
            "linux-32" => Platform::Linux32,
            "linux-64" => Platform::Linux64,
            "linux-aarch64" => Platform::LinuxAarch64,
            "linux-armv7l" => Platform::LinuxArmV7l,
            "linux-ppc64le" => Platform::LinuxPpc64le,
            "linux-riscv64" => Platform::LinuxRiscV64,
            "linux-s390x" => Platform::LinuxS390X,
            "osx-64" => Platform::Osx64,
            "osx-arm64" => Platform::OsxArm64,
            "win-32" => Platform::Win32,
            "win-64" => Platform::Win64,
            "win-arm64" => Platform::WinArm64,
            string => {
                return Err(ParsePlatformError {
                    string: string.to_owned(),
                })
            }
        })
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_str().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let str = std::borrow::Cow::<str>::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::Platform;

    #[test]
    fn test_round_trip() {
        for platform in [
            Platform::NoArch,
            Platform::Linux64,
            Platform::OsxArm64,
            Platform::Win64,
        ] {
            assert_eq!(Platform::from_str(platform.as_str()).unwrap(), platform);
        }
    }
}
