//! nativelib - Platform-Aware Native Library Bindings
//!
//! Locates the right prebuilt artifact of a native library for the running
//! platform, binds it against its C header, and exposes typed values,
//! casts, enum constants and raw function handles.
//!
//! # Features
//!
//! - **Platform matching**: Linux, macOS and Windows on x86_64/arm64 map to a
//!   fixed artifacts layout
//! - **Header-driven binding**: functions, records, enums and `#define`
//!   constants come from the library's own `.h` file
//! - **C-layout values**: zeroed allocations with field and element views
//! - **Loader guard**: the Windows DLL search path is pointed at the
//!   library directory while a binding is alive, and reverted on drop
//!
//! # Example
//!
//! ```no_run
//! use nativelib::{NativeBinding, OnnxRuntime};
//!
//! let binding = NativeBinding::new(OnnxRuntime)?;
//! let options = binding.new_value("OrtLoggingLevel", true, false)?;
//! options.set_i64(binding.enum_constant("ORT_LOGGING_LEVEL_WARNING")?)?;
//! # Ok::<(), nativelib::NativeError>(())
//! ```
//!
//! # Artifacts Layout
//!
//! ```text
//! shared/
//! ├── linux-x86_64/
//! │   ├── include/onnxruntime.h
//! │   └── lib/libonnxruntime.so.1.21.0
//! ├── macosx-arm64/
//! │   ├── include/onnxruntime.h
//! │   └── lib/libonnxruntime.1.21.0.dylib
//! └── windows-x86_64/
//!     ├── include/onnxruntime.h
//!     └── lib/onnxruntime-1.21.0.dll
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod ffi;
pub mod libraries;

// Re-export commonly used types
pub use config::{ConfigError, ConfigResult, NativeConfig};
pub use ffi::{
    ArtifactPathResolver, BindingState, CType, CValue, CastSource, Ffi, FfiValue, Interface,
    LibraryDescriptor, LoaderGuard, NativeBinding, NativeError, NativeLibrary, NativeResult,
    PlatformConfig, PlatformKey, PlatformMatcher,
};
pub use libraries::{ConfiguredLibrary, OnnxRuntime, OpenBlas, RindowMatlib, Samplerate, Sndfile};

/// Version of nativelib
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
