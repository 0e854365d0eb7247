//! FFI Module for nativelib
//!
//! Loads platform-specific native libraries from the artifacts tree and
//! binds them against their C interface descriptions.
//!
//! # Architecture
//!
//! ```text
//! NativeLibrary (descriptor: header, name, version)
//!       │
//!       ▼
//! PlatformMatcher ──► PlatformConfig (directory, filename template)
//!       │
//!       ▼
//! ArtifactPathResolver ──► include/<header>.h, lib/<filename>
//!       │
//!       ▼
//! NativeBinding::load ──► Interface::parse ──► Ffi::bind (libloading)
//!       │
//!       ▼
//! LoaderGuard (Windows DLL search path, process-wide)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let binding = NativeBinding::new(OnnxRuntime)?;
//! let status = binding.new_value("OrtStatus*", true, false)?;
//! let level = binding.enum_constant("ORT_LOGGING_LEVEL_WARNING")?;
//! let api = unsafe { binding.ffi()?.call("OrtGetApiBase", &[]) }?;
//! ```

mod binding;
mod descriptor;
mod error;
mod guard;
mod header;
mod loader;
mod paths;
mod platform;
mod types;
mod value;

pub use binding::{BindingBuilder, BindingState, CastSource, NativeBinding, TypeRef};
pub use descriptor::{LibraryDescriptor, NativeLibrary};
pub use error::{NativeError, NativeResult};
pub use guard::{LoaderGuard, SearchPathControl};
pub use header::{FieldLayout, Interface, RecordLayout};
pub use loader::Ffi;
pub use paths::{default_root, library_filename, ArtifactPathResolver, HEADER_EXTENSION};
pub use platform::{Arch, Os, PlatformConfig, PlatformKey, PlatformMatcher, PLATFORMS};
pub use types::{CType, FfiSignature, FfiType, FfiValue};
pub use value::CValue;
