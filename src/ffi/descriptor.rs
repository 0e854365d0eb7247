//! Library Descriptors
//!
//! What a concrete native library contributes to a binding: which header
//! declares it, and the base name and version of its binary.

use std::fmt;

/// Identity of a native library
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LibraryDescriptor {
    /// Header file name, without extension
    pub header_name: String,
    /// Library base name, without platform prefix/suffix
    pub library_name: String,
    /// Library version substituted into the filename template
    pub library_version: String,
}

impl LibraryDescriptor {
    pub fn new(
        header_name: impl Into<String>,
        library_name: impl Into<String>,
        library_version: impl Into<String>,
    ) -> Self {
        Self {
            header_name: header_name.into(),
            library_name: library_name.into(),
            library_version: library_version.into(),
        }
    }
}

impl fmt::Display for LibraryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.library_name, self.library_version)
    }
}

/// A native library that can be bound.
///
/// Implemented once per shipped library; [`NativeBinding`](super::NativeBinding)
/// does the rest.
pub trait NativeLibrary {
    fn descriptor(&self) -> LibraryDescriptor;
}

impl NativeLibrary for LibraryDescriptor {
    fn descriptor(&self) -> LibraryDescriptor {
        self.clone()
    }
}
