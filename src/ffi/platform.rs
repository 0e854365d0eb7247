//! Platform Matching
//!
//! Maps the running OS/architecture onto the static table of platforms for
//! which native artifacts are shipped.

use std::fmt;

use super::{NativeError, NativeResult};

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    Darwin,
    Windows,
    /// Anything else, carrying the raw `std::env::consts::OS` value
    Other(&'static str),
}

impl Os {
    /// Parse from a string representation
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linux" => Some(Os::Linux),
            "darwin" | "macos" | "macosx" | "osx" => Some(Os::Darwin),
            "windows" | "win32" | "win" => Some(Os::Windows),
            _ => None,
        }
    }

    /// Map a `std::env::consts::OS` value
    pub fn from_consts(os: &'static str) -> Self {
        Self::from_str(os).unwrap_or(Os::Other(os))
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Os::Linux => write!(f, "linux"),
            Os::Darwin => write!(f, "darwin"),
            Os::Windows => write!(f, "windows"),
            Os::Other(name) => write!(f, "{}", name),
        }
    }
}

/// CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    Arm64,
    /// Anything else, carrying the raw `std::env::consts::ARCH` value
    Other(&'static str),
}

impl Arch {
    /// Parse from a string representation
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Some(Arch::X86_64),
            "arm64" | "aarch64" => Some(Arch::Arm64),
            _ => None,
        }
    }

    /// Map a `std::env::consts::ARCH` value
    pub fn from_consts(arch: &'static str) -> Self {
        Self::from_str(arch).unwrap_or(Arch::Other(arch))
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::X86_64 => write!(f, "x86_64"),
            Arch::Arm64 => write!(f, "arm64"),
            Arch::Other(name) => write!(f, "{}", name),
        }
    }
}

/// (operating system, architecture) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformKey {
    pub os: Os,
    pub arch: Arch,
}

impl PlatformKey {
    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// The platform this process is running on
    pub fn current() -> Self {
        Self {
            os: Os::from_consts(std::env::consts::OS),
            arch: Arch::from_consts(std::env::consts::ARCH),
        }
    }

    /// Parse `"<os>-<arch>"`, e.g. `"linux-x86_64"` or `"macos-aarch64"`
    pub fn parse(s: &str) -> Option<Self> {
        let (os, arch) = s.trim().split_once('-')?;
        Some(Self {
            os: Os::from_str(os)?,
            arch: Arch::from_str(arch)?,
        })
    }
}

impl fmt::Display for PlatformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

/// Where a platform's artifacts live and how its library files are named
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformConfig {
    /// Directory under the artifacts root
    pub directory: &'static str,
    /// Library filename with `{name}` and `{version}` placeholders
    pub library_template: &'static str,
    /// Whether dependent artifacts need an explicit loader search path
    pub requires_search_path_override: bool,
}

/// Supported platforms, in match order.
pub static PLATFORMS: &[(PlatformKey, PlatformConfig)] = &[
    (
        PlatformKey::new(Os::Linux, Arch::X86_64),
        PlatformConfig {
            directory: "linux-x86_64",
            library_template: "lib{name}.so.{version}",
            requires_search_path_override: false,
        },
    ),
    (
        PlatformKey::new(Os::Linux, Arch::Arm64),
        PlatformConfig {
            directory: "linux-arm64",
            library_template: "lib{name}.so.{version}",
            requires_search_path_override: false,
        },
    ),
    (
        PlatformKey::new(Os::Darwin, Arch::X86_64),
        PlatformConfig {
            directory: "macosx-x86_64",
            library_template: "lib{name}.{version}.dylib",
            requires_search_path_override: false,
        },
    ),
    (
        PlatformKey::new(Os::Darwin, Arch::Arm64),
        PlatformConfig {
            directory: "macosx-arm64",
            library_template: "lib{name}.{version}.dylib",
            requires_search_path_override: false,
        },
    ),
    (
        PlatformKey::new(Os::Windows, Arch::X86_64),
        PlatformConfig {
            directory: "windows-x86_64",
            library_template: "{name}-{version}.dll",
            requires_search_path_override: true,
        },
    ),
];

/// Selects the platform configuration for one environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformMatcher {
    key: PlatformKey,
}

impl PlatformMatcher {
    /// Matcher for the running process
    pub fn current() -> Self {
        Self {
            key: PlatformKey::current(),
        }
    }

    /// Matcher for a simulated environment
    pub fn for_key(key: PlatformKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> PlatformKey {
        self.key
    }

    /// First entry of `table` whose key equals this environment.
    pub fn find_best_match<'t>(
        &self,
        table: &'t [(PlatformKey, PlatformConfig)],
    ) -> NativeResult<&'t PlatformConfig> {
        table
            .iter()
            .find(|(key, _)| *key == self.key)
            .map(|(_, config)| config)
            .ok_or_else(|| NativeError::PlatformUnsupported {
                os: self.key.os.to_string(),
                arch: self.key.arch.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_table_entry_matches_itself() {
        for (key, config) in PLATFORMS {
            let found = PlatformMatcher::for_key(*key)
                .find_best_match(PLATFORMS)
                .unwrap();
            assert_eq!(found, config, "wrong config for {}", key);
        }
    }

    #[test]
    fn test_table_keys_are_unique() {
        for (i, (a, _)) in PLATFORMS.iter().enumerate() {
            for (b, _) in &PLATFORMS[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_unmatched_environment() {
        let key = PlatformKey::new(Os::Windows, Arch::Arm64);
        let err = PlatformMatcher::for_key(key)
            .find_best_match(PLATFORMS)
            .unwrap_err();
        match err {
            NativeError::PlatformUnsupported { os, arch } => {
                assert_eq!(os, "windows");
                assert_eq!(arch, "arm64");
            }
            other => panic!("Expected PlatformUnsupported, got {:?}", other),
        }

        let key = PlatformKey::new(Os::Other("freebsd"), Arch::X86_64);
        assert!(PlatformMatcher::for_key(key)
            .find_best_match(PLATFORMS)
            .is_err());
    }

    #[test]
    fn test_first_match_wins() {
        let key = PlatformKey::new(Os::Linux, Arch::X86_64);
        let first = PlatformConfig {
            directory: "first",
            library_template: "lib{name}.so",
            requires_search_path_override: false,
        };
        let second = PlatformConfig {
            directory: "second",
            ..first
        };
        let table = [(key, first), (key, second)];
        let found = PlatformMatcher::for_key(key).find_best_match(&table).unwrap();
        assert_eq!(found.directory, "first");
    }

    #[test]
    fn test_key_parsing() {
        assert_eq!(
            PlatformKey::parse("linux-x86_64"),
            Some(PlatformKey::new(Os::Linux, Arch::X86_64))
        );
        assert_eq!(
            PlatformKey::parse("macos-aarch64"),
            Some(PlatformKey::new(Os::Darwin, Arch::Arm64))
        );
        assert_eq!(
            PlatformKey::parse("windows-amd64"),
            Some(PlatformKey::new(Os::Windows, Arch::X86_64))
        );
        assert_eq!(PlatformKey::parse("plan9-mips"), None);
        assert_eq!(PlatformKey::parse("linux"), None);
    }

    #[test]
    fn test_key_display() {
        let key = PlatformKey::new(Os::Darwin, Arch::Arm64);
        assert_eq!(key.to_string(), "darwin-arm64");
        assert_eq!(PlatformKey::parse(&key.to_string()), Some(key));
    }

    #[test]
    fn test_only_windows_needs_search_path() {
        for (key, config) in PLATFORMS {
            assert_eq!(config.requires_search_path_override, key.os == Os::Windows);
        }
    }
}
