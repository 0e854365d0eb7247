//! Loader Guard
//!
//! Windows resolves a DLL's own dependencies through the process-wide DLL
//! search path, so bindings point it at their `lib` directory once loaded
//! and clear it again on disposal. The override is process state shared by
//! every binding, so it lives behind one mutex.
//!
//! ```text
//! NativeBinding::load ──► LoaderGuard::configure(lib dir) ──► SetDllDirectoryW(dir)
//! NativeBinding::drop ──► LoaderGuard::reset()            ──► SetDllDirectoryW(NULL)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::trace;

use super::NativeResult;

/// OS facility that controls where dependent libraries are searched for
pub trait SearchPathControl: Send {
    /// Set the override to `directory`, or clear it with `None`
    fn set_search_path(&mut self, directory: Option<&Path>) -> NativeResult<()>;
}

type ControlFactory = Box<dyn Fn() -> NativeResult<Box<dyn SearchPathControl>> + Send + Sync>;

struct GuardState {
    /// Created on first `configure`
    control: Option<Box<dyn SearchPathControl>>,
    current: Option<PathBuf>,
}

/// Serialised owner of the process-wide loader search-path override
pub struct LoaderGuard {
    state: Mutex<GuardState>,
    factory: ControlFactory,
}

static GLOBAL: Lazy<Arc<LoaderGuard>> = Lazy::new(|| Arc::new(LoaderGuard::new(system_control)));

impl LoaderGuard {
    /// Guard whose control facility is created by `factory` on first use
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> NativeResult<Box<dyn SearchPathControl>> + Send + Sync + 'static,
    {
        Self {
            state: Mutex::new(GuardState {
                control: None,
                current: None,
            }),
            factory: Box::new(factory),
        }
    }

    /// The process-wide guard backed by the OS loader
    pub fn global() -> Arc<LoaderGuard> {
        Arc::clone(&GLOBAL)
    }

    /// Point the search path at `directory`
    pub fn configure(&self, directory: &Path) -> NativeResult<()> {
        let mut state = self.state.lock();
        self.configure_locked(&mut state, directory)
    }

    /// Clear the override.
    ///
    /// A no-op when the control facility was never created, so disposing a
    /// binding that never configured the guard is always safe.
    pub fn reset(&self) -> NativeResult<()> {
        let mut state = self.state.lock();
        let Some(control) = state.control.as_mut() else {
            trace!("loader guard reset before first configure");
            return Ok(());
        };
        control.set_search_path(None)?;
        state.current = None;
        trace!("loader search path reset");
        Ok(())
    }

    /// Configure `directory` and run `f` while holding the guard, so no
    /// other binding can change the override until `f` returns.
    ///
    /// `f` must not call back into this guard.
    pub fn with_search_path<R>(
        &self,
        directory: &Path,
        f: impl FnOnce(&Path) -> R,
    ) -> NativeResult<R> {
        let mut state = self.state.lock();
        self.configure_locked(&mut state, directory)?;
        Ok(f(directory))
    }

    /// Currently configured override, if any
    pub fn current(&self) -> Option<PathBuf> {
        self.state.lock().current.clone()
    }

    /// Whether the control facility has been created
    pub fn is_initialized(&self) -> bool {
        self.state.lock().control.is_some()
    }

    /// Clear the override and release the control facility. A later
    /// `configure` creates it again.
    pub fn shutdown(&self) -> NativeResult<()> {
        let mut state = self.state.lock();
        state.current = None;
        if let Some(mut control) = state.control.take() {
            control.set_search_path(None)?;
        }
        trace!("loader guard shut down");
        Ok(())
    }

    fn configure_locked(&self, state: &mut GuardState, directory: &Path) -> NativeResult<()> {
        let control = match state.control.take() {
            Some(control) => control,
            None => (self.factory)()?,
        };
        let control = state.control.insert(control);
        control.set_search_path(Some(directory))?;
        state.current = Some(directory.to_path_buf());
        trace!(directory = %directory.display(), "loader search path configured");
        Ok(())
    }
}

impl std::fmt::Debug for LoaderGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LoaderGuard")
            .field("initialized", &state.control.is_some())
            .field("current", &state.current)
            .finish()
    }
}

#[cfg(windows)]
fn system_control() -> NativeResult<Box<dyn SearchPathControl>> {
    Ok(Box::new(kernel32::Kernel32::open()?))
}

#[cfg(not(windows))]
fn system_control() -> NativeResult<Box<dyn SearchPathControl>> {
    Err(super::NativeError::binding(
        "The loader search-path override is only available on Windows",
    ))
}

#[cfg(windows)]
mod kernel32 {
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;

    use libloading::{Library, Symbol};

    use super::SearchPathControl;
    use crate::ffi::{NativeError, NativeResult};

    type SetDllDirectoryW = unsafe extern "system" fn(*const u16) -> i32;

    /// `kernel32.dll`, opened once per guard
    pub(super) struct Kernel32 {
        _library: Library,
        set_dll_directory: SetDllDirectoryW,
    }

    impl Kernel32 {
        pub(super) fn open() -> NativeResult<Self> {
            // Safety: kernel32 is always mapped into Windows processes.
            let library = unsafe { Library::new("kernel32.dll") }
                .map_err(|e| NativeError::binding(format!("Failed to open kernel32.dll: {}", e)))?;
            let set_dll_directory = {
                // Safety: the symbol has the declared signature on every Windows version.
                let symbol: Symbol<SetDllDirectoryW> = unsafe { library.get(b"SetDllDirectoryW\0") }
                    .map_err(|e| {
                        NativeError::binding(format!("SetDllDirectoryW not found: {}", e))
                    })?;
                *symbol
            };
            Ok(Self {
                _library: library,
                set_dll_directory,
            })
        }
    }

    impl SearchPathControl for Kernel32 {
        fn set_search_path(&mut self, directory: Option<&Path>) -> NativeResult<()> {
            let wide: Option<Vec<u16>> = directory.map(|dir| {
                dir.as_os_str()
                    .encode_wide()
                    .chain(std::iter::once(0))
                    .collect()
            });
            let ptr = wide.as_ref().map_or(std::ptr::null(), |w| w.as_ptr());
            // Safety: ptr is null or a NUL-terminated UTF-16 string that
            // outlives the call.
            let ok = unsafe { (self.set_dll_directory)(ptr) };
            if ok == 0 {
                return Err(NativeError::binding(format!(
                    "SetDllDirectoryW failed: {}",
                    std::io::Error::last_os_error()
                )));
            }
            Ok(())
        }
    }
}
