//! Dynamic Library Loader
//!
//! Safe wrapper around libloading that opens a native artifact and binds
//! it against its parsed interface description.

use std::collections::HashMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};
use tracing::trace;

use super::header::Interface;
use super::types::{FfiSignature, FfiValue};
use super::{NativeError, NativeResult};

/// A loaded library bound to its declared interface.
///
/// Every function declared in the interface has been resolved by the time
/// an `Ffi` exists; this is the raw handle advanced callers use to invoke
/// native functions directly.
pub struct Ffi {
    /// Path the library was loaded from
    path: PathBuf,
    /// The loaded library handle
    library: Library,
    /// Declared callable surface
    interface: Arc<Interface>,
    /// Resolved function addresses
    symbols: HashMap<String, usize>,
}

impl Ffi {
    /// Load the library at `path` and resolve every declared function
    pub(crate) fn bind(path: impl AsRef<Path>, interface: Arc<Interface>) -> NativeResult<Self> {
        let path = path.as_ref().to_path_buf();

        // Safety: loading a library runs its initialisers. The artifact comes
        // from the crate's own artifacts tree for this platform.
        let library = unsafe {
            Library::new(&path).map_err(|e| {
                NativeError::binding(format!(
                    "Failed to load library '{}': {}",
                    path.display(),
                    e
                ))
            })?
        };

        let mut symbols = HashMap::with_capacity(interface.function_count());
        for signature in interface.functions() {
            let addr = resolve_symbol(&library, &path, &signature.name)?;
            trace!(symbol = %signature.name, addr, "resolved symbol");
            symbols.insert(signature.name.clone(), addr);
        }

        Ok(Self {
            path,
            library,
            interface,
            symbols,
        })
    }

    /// Get the path to this library
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    pub(crate) fn shared_interface(&self) -> Arc<Interface> {
        Arc::clone(&self.interface)
    }

    /// Declared signature of a function
    pub fn signature(&self, name: &str) -> NativeResult<&FfiSignature> {
        self.interface
            .function(name)
            .ok_or_else(|| NativeError::binding(format!("Function '{}' is not declared", name)))
    }

    /// Address of a declared function
    pub fn symbol(&self, name: &str) -> NativeResult<usize> {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| NativeError::binding(format!("Function '{}' is not declared", name)))
    }

    /// Address of any exported symbol, declared or not
    pub fn raw_symbol(&self, name: &str) -> NativeResult<usize> {
        resolve_symbol(&self.library, &self.path, name)
    }

    /// Typed function pointer for a declared function.
    ///
    /// # Safety
    ///
    /// `F` must be an `extern "C" fn` type matching the native definition.
    pub unsafe fn function<F: Copy>(&self, name: &str) -> NativeResult<F> {
        if std::mem::size_of::<F>() != std::mem::size_of::<usize>() {
            return Err(NativeError::binding(format!(
                "Function type for '{}' is not pointer-sized",
                name
            )));
        }
        let addr = self.symbol(name)?;
        Ok(std::mem::transmute_copy::<usize, F>(&addr))
    }

    /// Call a declared function with integer and pointer arguments
    ///
    /// # Safety
    ///
    /// This function calls into native code. The caller must ensure:
    /// - The arguments are valid for the function
    /// - The function doesn't violate memory safety
    pub unsafe fn call(&self, name: &str, args: &[FfiValue]) -> NativeResult<FfiValue> {
        let signature = self.signature(name)?;
        // Variadic arguments follow default promotions the dispatcher cannot apply
        if signature.variadic {
            return Err(NativeError::binding(format!(
                "'{}' is variadic; bind it with Ffi::function",
                signature
            )));
        }

        // Validate argument count
        if !signature.validate_args(args.len()) {
            return Err(NativeError::binding(format!(
                "Invalid argument count for '{}': expected {}, got {}",
                name,
                signature.params.len(),
                args.len()
            )));
        }
        if !signature.is_integer_only() {
            return Err(NativeError::binding(format!(
                "'{}' takes or returns floating point or aggregate values; bind it with Ffi::function",
                signature
            )));
        }

        // Get the function address
        let func_addr = self.symbol(name)?;
        let a: Vec<u64> = args.iter().map(FfiValue::to_u64).collect();

        // Call the function based on parameter count
        // We use a dispatch table for different arities
        let raw = match a.len() {
            0 => {
                type Fn0 = extern "C" fn() -> u64;
                let f: Fn0 = std::mem::transmute(func_addr);
                f()
            }
            1 => {
                type Fn1 = extern "C" fn(u64) -> u64;
                let f: Fn1 = std::mem::transmute(func_addr);
                f(a[0])
            }
            2 => {
                type Fn2 = extern "C" fn(u64, u64) -> u64;
                let f: Fn2 = std::mem::transmute(func_addr);
                f(a[0], a[1])
            }
            3 => {
                type Fn3 = extern "C" fn(u64, u64, u64) -> u64;
                let f: Fn3 = std::mem::transmute(func_addr);
                f(a[0], a[1], a[2])
            }
            4 => {
                type Fn4 = extern "C" fn(u64, u64, u64, u64) -> u64;
                let f: Fn4 = std::mem::transmute(func_addr);
                f(a[0], a[1], a[2], a[3])
            }
            5 => {
                type Fn5 = extern "C" fn(u64, u64, u64, u64, u64) -> u64;
                let f: Fn5 = std::mem::transmute(func_addr);
                f(a[0], a[1], a[2], a[3], a[4])
            }
            6 => {
                type Fn6 = extern "C" fn(u64, u64, u64, u64, u64, u64) -> u64;
                let f: Fn6 = std::mem::transmute(func_addr);
                f(a[0], a[1], a[2], a[3], a[4], a[5])
            }
            n => {
                return Err(NativeError::binding(format!(
                    "Too many arguments: {} (max 6)",
                    n
                )))
            }
        };

        Ok(FfiValue::from_u64(raw, &signature.return_type))
    }

    /// Names of all resolved functions
    pub fn function_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.symbols.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for Ffi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ffi")
            .field("path", &self.path)
            .field("functions", &self.symbols.len())
            .finish()
    }
}

fn resolve_symbol(library: &Library, path: &Path, name: &str) -> NativeResult<usize> {
    let c_name = CString::new(name)
        .map_err(|_| NativeError::binding(format!("Invalid symbol name: {}", name)))?;

    // Safety: We're getting a symbol from a loaded library. The symbol
    // could have the wrong type, but its declared signature travels with it.
    let symbol: Symbol<*const ()> = unsafe {
        library.get(c_name.as_bytes_with_nul()).map_err(|e| {
            NativeError::binding(format!(
                "Symbol '{}' not found in '{}': {}",
                name,
                path.display(),
                e
            ))
        })?
    };

    Ok(*symbol as usize)
}
