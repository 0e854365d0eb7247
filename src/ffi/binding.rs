//! Native Binding
//!
//! Ties a [`NativeLibrary`] to the platform it runs on: resolves the
//! platform once, computes artifact paths, loads and binds the library,
//! engages the [`LoaderGuard`] where the platform needs it, and releases
//! everything exactly once on disposal.
//!
//! ```text
//! Unloaded ──load()──► Loading ──► Loaded ──► GuardConfigured
//!                         │                          │
//!                         ▼                          ▼
//!                       Failed ─────────────► Disposing ──► Disposed
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::descriptor::{LibraryDescriptor, NativeLibrary};
use super::guard::LoaderGuard;
use super::header::Interface;
use super::loader::Ffi;
use super::paths::ArtifactPathResolver;
use super::platform::{PlatformConfig, PlatformKey, PlatformMatcher, PLATFORMS};
use super::types::CType;
use super::value::CValue;
use super::{NativeError, NativeResult};

/// Lifecycle of a binding instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Unloaded,
    Loading,
    Loaded,
    /// Loaded, with the loader search path pointed at the library directory
    GuardConfigured,
    /// `load()` failed; the binding cannot be reloaded in place
    Failed,
    Disposing,
    Disposed,
}

/// What a [`NativeBinding::cast`] reinterprets
#[derive(Debug, Clone, Copy)]
pub enum CastSource<'a> {
    /// Existing value; the result views the same memory
    Value(&'a CValue),
    /// Raw address, e.g. a pointer returned by a native call
    Address(usize),
    /// Plain integer, for integer, enum and pointer targets
    Integer(i64),
    Null,
}

impl<'a> From<&'a CValue> for CastSource<'a> {
    fn from(value: &'a CValue) -> Self {
        CastSource::Value(value)
    }
}

impl From<i64> for CastSource<'_> {
    fn from(value: i64) -> Self {
        CastSource::Integer(value)
    }
}

impl From<usize> for CastSource<'_> {
    fn from(value: usize) -> Self {
        CastSource::Address(value)
    }
}

/// Cast target: a type name or an already resolved type
#[derive(Debug, Clone, Copy)]
pub enum TypeRef<'a> {
    Name(&'a str),
    Type(&'a CType),
}

impl<'a> From<&'a str> for TypeRef<'a> {
    fn from(name: &'a str) -> Self {
        TypeRef::Name(name)
    }
}

impl<'a> From<&'a CType> for TypeRef<'a> {
    fn from(ty: &'a CType) -> Self {
        TypeRef::Type(ty)
    }
}

/// Configures and creates a [`NativeBinding`]
pub struct BindingBuilder<L: NativeLibrary> {
    library: L,
    platform: Option<PlatformKey>,
    resolver: Option<ArtifactPathResolver>,
    guard: Option<Arc<LoaderGuard>>,
    load: bool,
}

impl<L: NativeLibrary> BindingBuilder<L> {
    /// Simulate another platform instead of the running one
    pub fn platform(mut self, key: PlatformKey) -> Self {
        self.platform = Some(key);
        self
    }

    /// Artifacts root directory
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.resolver = Some(ArtifactPathResolver::new(root));
        self
    }

    pub fn resolver(mut self, resolver: ArtifactPathResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Loader guard to use instead of the process-wide one
    pub fn guard(mut self, guard: Arc<LoaderGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Whether `build` loads the library immediately (default: true)
    pub fn load(mut self, load: bool) -> Self {
        self.load = load;
        self
    }

    pub fn build(self) -> NativeResult<NativeBinding<L>> {
        let matcher = match self.platform {
            Some(key) => PlatformMatcher::for_key(key),
            None => PlatformMatcher::current(),
        };
        let config = *matcher.find_best_match(PLATFORMS)?;
        let descriptor = self.library.descriptor();
        debug!(
            library = %descriptor,
            platform = %matcher.key(),
            directory = config.directory,
            "resolved platform"
        );

        let mut binding = NativeBinding {
            library: self.library,
            descriptor,
            platform: matcher.key(),
            config,
            resolver: self.resolver.unwrap_or_default(),
            guard: self.guard.unwrap_or_else(LoaderGuard::global),
            state: BindingState::Unloaded,
            ffi: None,
            persistent: Mutex::new(Vec::new()),
        };

        if self.load {
            binding.load()?;
        }
        Ok(binding)
    }
}

/// A native library loaded into the process and bound to its interface
pub struct NativeBinding<L: NativeLibrary> {
    library: L,
    descriptor: LibraryDescriptor,
    platform: PlatformKey,
    config: PlatformConfig,
    resolver: ArtifactPathResolver,
    guard: Arc<LoaderGuard>,
    state: BindingState,
    ffi: Option<Ffi>,
    /// Values kept alive until disposal
    persistent: Mutex<Vec<CValue>>,
}

impl<L: NativeLibrary> NativeBinding<L> {
    /// Resolve and load `library` for the running platform
    pub fn new(library: L) -> NativeResult<Self> {
        Self::builder(library).build()
    }

    pub fn builder(library: L) -> BindingBuilder<L> {
        BindingBuilder {
            library,
            platform: None,
            resolver: None,
            guard: None,
            load: true,
        }
    }

    pub fn library(&self) -> &L {
        &self.library
    }

    pub fn descriptor(&self) -> &LibraryDescriptor {
        &self.descriptor
    }

    pub fn platform(&self) -> PlatformKey {
        self.platform
    }

    pub fn platform_config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn state(&self) -> BindingState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.ffi.is_some()
    }

    pub fn header_path(&self) -> PathBuf {
        self.resolver.header_path(&self.config, &self.descriptor)
    }

    pub fn library_path(&self) -> NativeResult<PathBuf> {
        self.resolver.library_path(&self.config, &self.descriptor)
    }

    pub fn platform_path(&self) -> PathBuf {
        self.resolver.platform_path(&self.config)
    }

    pub fn include_directory(&self) -> PathBuf {
        self.resolver.include_directory(&self.config)
    }

    pub fn lib_directory(&self) -> PathBuf {
        self.resolver.lib_directory(&self.config)
    }

    /// Read the header, load the library and bind every declared function.
    ///
    /// Loading is not retried: a second call after success fails with
    /// [`NativeError::AlreadyLoaded`], after failure with
    /// [`NativeError::LoadFailed`].
    pub fn load(&mut self) -> NativeResult<()> {
        match self.state {
            BindingState::Unloaded => {}
            BindingState::Failed => {
                return Err(NativeError::LoadFailed(self.descriptor.library_name.clone()))
            }
            BindingState::Disposing | BindingState::Disposed => {
                return Err(NativeError::Disposed(self.descriptor.library_name.clone()))
            }
            BindingState::Loading | BindingState::Loaded | BindingState::GuardConfigured => {
                return Err(NativeError::AlreadyLoaded(
                    self.descriptor.library_name.clone(),
                ))
            }
        }

        self.state = BindingState::Loading;
        let ffi = match self.bind() {
            Ok(ffi) => ffi,
            Err(e) => {
                self.state = BindingState::Failed;
                warn!(library = %self.descriptor, error = %e, "failed to load native library");
                return Err(e);
            }
        };
        info!(
            library = %self.descriptor,
            path = %ffi.path().display(),
            functions = ffi.interface().function_count(),
            "loaded native library"
        );

        // Not callable until the search path points at the library directory
        if self.config.requires_search_path_override {
            if let Err(e) = self.guard.configure(&self.lib_directory()) {
                self.state = BindingState::Failed;
                warn!(library = %self.descriptor, error = %e, "failed to configure loader search path");
                return Err(e);
            }
            self.ffi = Some(ffi);
            self.state = BindingState::GuardConfigured;
        } else {
            self.ffi = Some(ffi);
            self.state = BindingState::Loaded;
        }
        Ok(())
    }

    fn bind(&self) -> NativeResult<Ffi> {
        let header_path = self.header_path();
        let library_path = self.library_path()?;
        debug!(
            header = %header_path.display(),
            library = %library_path.display(),
            "loading native library"
        );

        let source = fs::read_to_string(&header_path)
            .map_err(|e| NativeError::missing(&header_path, e))?;
        let interface = Interface::parse(&source).map_err(|e| in_file(&header_path, e))?;

        let metadata =
            fs::metadata(&library_path).map_err(|e| NativeError::missing(&library_path, e))?;
        if !metadata.is_file() {
            return Err(NativeError::missing(
                &library_path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        Ffi::bind(&library_path, Arc::new(interface))
    }

    /// The raw bound handle, for invoking declared native functions directly
    pub fn ffi(&self) -> NativeResult<&Ffi> {
        match self.state {
            BindingState::Disposing | BindingState::Disposed => {
                Err(NativeError::Disposed(self.descriptor.library_name.clone()))
            }
            _ => self
                .ffi
                .as_ref()
                .ok_or_else(|| NativeError::NotLoaded(self.descriptor.library_name.clone())),
        }
    }

    /// Zero-initialised value of a declared type.
    ///
    /// `owned` values are released when their last handle drops; others
    /// stay allocated until [`NativeBinding::free`]. `persistent` values are
    /// additionally kept alive by the binding until it is disposed.
    pub fn new_value(&self, type_name: &str, owned: bool, persistent: bool) -> NativeResult<CValue> {
        let ffi = self.ffi()?;
        let ty = ffi.interface().resolve_type(type_name)?;
        let value = CValue::allocate(ffi.shared_interface(), ty, owned)?;
        if persistent {
            self.persistent.lock().push(value.clone());
        }
        Ok(value)
    }

    /// Reinterpret `source` as another declared type without copying
    pub fn cast<'a>(
        &self,
        target: impl Into<TypeRef<'a>>,
        source: impl Into<CastSource<'a>>,
    ) -> NativeResult<CValue> {
        let ffi = self.ffi()?;
        let target: TypeRef<'_> = target.into();
        let ty = match target {
            TypeRef::Name(name) => ffi.interface().resolve_type(name)?,
            TypeRef::Type(ty) => ty.clone(),
        };
        let interface = ffi.shared_interface();

        let source: CastSource<'_> = source.into();
        match source {
            CastSource::Value(value) => value.retype(interface, ty),
            CastSource::Address(address) if ty.is_pointer() => {
                pointer_value(interface, ty, address as i64)
            }
            CastSource::Address(address) => CValue::foreign(interface, ty, address),
            CastSource::Integer(n) if ty.is_integer_class() => pointer_value(interface, ty, n),
            CastSource::Null if ty.is_pointer() => pointer_value(interface, ty, 0),
            CastSource::Integer(_) | CastSource::Null => Err(NativeError::binding(format!(
                "Cannot cast a scalar to {}",
                ty
            ))),
        }
    }

    /// Value of a declared enum member or integer constant
    pub fn enum_constant(&self, name: &str) -> NativeResult<i64> {
        self.ffi()?
            .interface()
            .constant(name)
            .ok_or_else(|| NativeError::binding(format!("Constant '{}' is not declared", name)))
    }

    /// Release a value allocated by [`NativeBinding::new_value`]
    pub fn free(&self, value: &CValue) -> NativeResult<()> {
        value.release()
    }

    /// Run `f` with this binding's library directory as the loader search
    /// path, serialised against every other binding on platforms that need
    /// the override.
    pub fn with_search_path<R>(&self, f: impl FnOnce(&Ffi) -> R) -> NativeResult<R> {
        let ffi = self.ffi()?;
        if self.config.requires_search_path_override {
            self.guard.with_search_path(&self.lib_directory(), |_| f(ffi))
        } else {
            Ok(f(ffi))
        }
    }

    /// Release the library and revert the loader search path.
    ///
    /// Runs at most once; `Drop` calls it for bindings not disposed
    /// explicitly. The revert is attempted whatever state was reached.
    ///
    /// The revert clears the override for every binding sharing the guard,
    /// so other live bindings on Windows should make calls that load
    /// dependent libraries through [`NativeBinding::with_search_path`].
    pub fn dispose(&mut self) -> NativeResult<()> {
        if self.state == BindingState::Disposed {
            return Ok(());
        }
        self.state = BindingState::Disposing;

        self.persistent.lock().clear();
        self.ffi = None;
        let result = if self.config.requires_search_path_override {
            self.guard.reset()
        } else {
            Ok(())
        };

        self.state = BindingState::Disposed;
        debug!(library = %self.descriptor, "disposed native binding");
        result
    }
}

impl<L: NativeLibrary> Drop for NativeBinding<L> {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            warn!(library = %self.descriptor, error = %e, "failed to revert loader search path");
        }
    }
}

impl<L: NativeLibrary> std::fmt::Debug for NativeBinding<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBinding")
            .field("descriptor", &self.descriptor)
            .field("platform", &self.platform.to_string())
            .field("state", &self.state)
            .finish()
    }
}

/// Fresh value of an integer-class type holding `n`
fn pointer_value(interface: Arc<Interface>, ty: CType, n: i64) -> NativeResult<CValue> {
    let value = CValue::allocate(interface, ty, true)?;
    value.set_i64(n)?;
    Ok(value)
}

/// Prefix a binding error with the file it came from
fn in_file(path: &Path, error: NativeError) -> NativeError {
    match error {
        NativeError::Binding(message) => NativeError::binding(format!(
            "Invalid interface description '{}': {}",
            path.display(),
            message
        )),
        other => other,
    }
}
