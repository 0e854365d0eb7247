//! Shipped Libraries
//!
//! The native libraries whose artifacts ship under `shared/`, plus
//! [`ConfiguredLibrary`] for anything declared in nativelib.toml.

use crate::ffi::{LibraryDescriptor, NativeLibrary};

/// ONNX Runtime inference engine
#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxRuntime;

impl OnnxRuntime {
    pub const VERSION: &'static str = "1.21.0";
}

impl NativeLibrary for OnnxRuntime {
    fn descriptor(&self) -> LibraryDescriptor {
        LibraryDescriptor::new("onnxruntime", "onnxruntime", Self::VERSION)
    }
}

/// Rindow matrix kernels
#[derive(Debug, Clone, Copy, Default)]
pub struct RindowMatlib;

impl NativeLibrary for RindowMatlib {
    fn descriptor(&self) -> LibraryDescriptor {
        LibraryDescriptor::new("matlib", "rindowmatlib", "1.1.1")
    }
}

/// OpenBLAS with its CBLAS interface
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenBlas;

impl NativeLibrary for OpenBlas {
    fn descriptor(&self) -> LibraryDescriptor {
        LibraryDescriptor::new("openblas", "openblas", "0.3.29")
    }
}

/// libsndfile audio I/O
#[derive(Debug, Clone, Copy, Default)]
pub struct Sndfile;

impl NativeLibrary for Sndfile {
    fn descriptor(&self) -> LibraryDescriptor {
        LibraryDescriptor::new("sndfile", "libsndfile", "1")
    }
}

/// libsamplerate sample rate conversion
#[derive(Debug, Clone, Copy, Default)]
pub struct Samplerate;

impl NativeLibrary for Samplerate {
    fn descriptor(&self) -> LibraryDescriptor {
        LibraryDescriptor::new("samplerate", "libsamplerate", "0")
    }
}

/// A library declared under `[libraries.<key>]` in nativelib.toml
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredLibrary {
    key: String,
    descriptor: LibraryDescriptor,
}

impl ConfiguredLibrary {
    pub fn new(key: impl Into<String>, descriptor: LibraryDescriptor) -> Self {
        Self {
            key: key.into(),
            descriptor,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl NativeLibrary for ConfiguredLibrary {
    fn descriptor(&self) -> LibraryDescriptor {
        self.descriptor.clone()
    }
}
