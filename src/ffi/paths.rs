//! Artifact Path Resolution
//!
//! Computes where a library's header and binary live under the artifacts
//! root:
//!
//! ```text
//! <root>/<platform directory>/include/<header name>.h
//! <root>/<platform directory>/lib/<library filename>
//! ```

use std::path::{Path, PathBuf};

use crate::config::ConfigError;

use super::platform::PlatformConfig;
use super::{LibraryDescriptor, NativeResult};

/// Interface description extension
pub const HEADER_EXTENSION: &str = "h";

const NAME_PLACEHOLDER: &str = "{name}";
const VERSION_PLACEHOLDER: &str = "{version}";
const PREFIXED_NAME: &str = "lib{name}";
const LIB_PREFIX: &str = "lib";

/// The artifacts root that ships with the crate
pub fn default_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("shared")
}

/// Substitute `name` and `version` into a platform filename template.
///
/// When the template already prepends `lib` and `name` carries it too, the
/// template's prefix is dropped so the result never reads `liblib...`.
pub fn library_filename(template: &str, name: &str, version: &str) -> NativeResult<String> {
    if !template.contains(NAME_PLACEHOLDER) {
        return Err(ConfigError::InvalidTemplate(template.to_string()).into());
    }

    let template = if template.contains(PREFIXED_NAME) && name.starts_with(LIB_PREFIX) {
        template.replace(PREFIXED_NAME, NAME_PLACEHOLDER)
    } else {
        template.to_string()
    };

    Ok(template
        .replace(NAME_PLACEHOLDER, name)
        .replace(VERSION_PLACEHOLDER, version))
}

/// Resolves artifact paths relative to a fixed root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPathResolver {
    root: PathBuf,
}

impl ArtifactPathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<directory>`
    pub fn platform_path(&self, platform: &PlatformConfig) -> PathBuf {
        self.root.join(platform.directory)
    }

    /// `<root>/<directory>/include`
    pub fn include_directory(&self, platform: &PlatformConfig) -> PathBuf {
        self.platform_path(platform).join("include")
    }

    /// `<root>/<directory>/lib`
    pub fn lib_directory(&self, platform: &PlatformConfig) -> PathBuf {
        self.platform_path(platform).join("lib")
    }

    pub fn header_path(&self, platform: &PlatformConfig, descriptor: &LibraryDescriptor) -> PathBuf {
        self.include_directory(platform)
            .join(format!("{}.{}", descriptor.header_name, HEADER_EXTENSION))
    }

    pub fn library_path(
        &self,
        platform: &PlatformConfig,
        descriptor: &LibraryDescriptor,
    ) -> NativeResult<PathBuf> {
        let filename = library_filename(
            platform.library_template,
            &descriptor.library_name,
            &descriptor.library_version,
        )?;
        Ok(self.lib_directory(platform).join(filename))
    }
}

impl Default for ArtifactPathResolver {
    fn default() -> Self {
        Self::new(default_root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::platform::{Arch, Os, PlatformKey, PlatformMatcher, PLATFORMS};
    use crate::ffi::NativeError;

    fn config_for(os: Os, arch: Arch) -> &'static PlatformConfig {
        PlatformMatcher::for_key(PlatformKey::new(os, arch))
            .find_best_match(PLATFORMS)
            .unwrap()
    }

    #[test]
    fn test_plain_substitution() {
        let name = library_filename("lib{name}.so.{version}", "onnxruntime", "1.14.0").unwrap();
        assert_eq!(name, "libonnxruntime.so.1.14.0");
    }

    #[test]
    fn test_prefix_is_not_duplicated() {
        let name = library_filename("lib{name}.so.{version}", "libonnxruntime", "1.14.0").unwrap();
        assert_eq!(name, "libonnxruntime.so.1.14.0");

        let name = library_filename("lib{name}.{version}.dylib", "libsndfile", "1.2.2").unwrap();
        assert_eq!(name, "libsndfile.1.2.2.dylib");
    }

    #[test]
    fn test_windows_template() {
        let name = library_filename("{name}-{version}.dll", "onnxruntime", "1.14.0").unwrap();
        assert_eq!(name, "onnxruntime-1.14.0.dll");

        // No embedded prefix, so a prefixed name is kept as is
        let name = library_filename("{name}-{version}.dll", "libsndfile", "1.2.2").unwrap();
        assert_eq!(name, "libsndfile-1.2.2.dll");
    }

    #[test]
    fn test_name_merely_containing_lib() {
        let name = library_filename("lib{name}.so.{version}", "matlib", "1.0").unwrap();
        assert_eq!(name, "libmatlib.so.1.0");
    }

    #[test]
    fn test_malformed_template() {
        let err = library_filename("libfoo.so", "foo", "1").unwrap_err();
        assert!(matches!(err, NativeError::Config(_)));
    }

    #[test]
    fn test_paths_layout() {
        let resolver = ArtifactPathResolver::new("/opt/artifacts");
        let descriptor = LibraryDescriptor::new("onnxruntime", "onnxruntime", "1.14.0");

        let linux = config_for(Os::Linux, Arch::X86_64);
        assert_eq!(
            resolver.header_path(linux, &descriptor),
            Path::new("/opt/artifacts/linux-x86_64/include/onnxruntime.h")
        );
        assert_eq!(
            resolver.library_path(linux, &descriptor).unwrap(),
            Path::new("/opt/artifacts/linux-x86_64/lib/libonnxruntime.so.1.14.0")
        );

        let mac = config_for(Os::Darwin, Arch::Arm64);
        assert_eq!(
            resolver.library_path(mac, &descriptor).unwrap(),
            Path::new("/opt/artifacts/macosx-arm64/lib/libonnxruntime.1.14.0.dylib")
        );

        let windows = config_for(Os::Windows, Arch::X86_64);
        assert_eq!(
            resolver.library_path(windows, &descriptor).unwrap(),
            Path::new("/opt/artifacts/windows-x86_64/lib/onnxruntime-1.14.0.dll")
        );
        assert_eq!(
            resolver.lib_directory(windows),
            Path::new("/opt/artifacts/windows-x86_64/lib")
        );
    }

    #[test]
    fn test_default_root() {
        let resolver = ArtifactPathResolver::default();
        assert!(resolver.root().ends_with("shared"));
    }
}
