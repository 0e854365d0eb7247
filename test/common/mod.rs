//! Shared fixtures for the integration tests
//!
//! Builds a throwaway artifacts tree whose "library" is the system C
//! library, symlinked into place under the name each platform expects.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nativelib::ffi::{library_filename, SearchPathControl, PLATFORMS};
use nativelib::{LibraryDescriptor, LoaderGuard, NativeResult, PlatformKey, PlatformMatcher};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Header describing the slice of libc the tests call
pub const LIBC_HEADER: &str = r#"
#ifndef C_H
#define C_H

#define EXIT_SUCCESS 0
#define EXIT_FAILURE 1
#define BUFFER_SIZE (4 * 4)

#ifdef __cplusplus
extern "C" {
#endif

typedef struct {
    int quot;
    int rem;
} div_t;

enum whence { WHENCE_SET, WHENCE_CUR, WHENCE_END };

int abs(int j);
int getpid(void);
div_t div(int numer, int denom);
size_t strlen(const char *s);
void *malloc(size_t size);
void free(void *ptr);
double atof(const char *nptr);

#ifdef __cplusplus
}
#endif

#endif /* C_H */
"#;

/// Descriptor whose Linux filename comes out as `libc.so.6`
pub fn libc_descriptor() -> LibraryDescriptor {
    LibraryDescriptor::new("c", "c", "6")
}

/// The system C library, if it sits somewhere we know
pub fn system_libc() -> Option<PathBuf> {
    [
        "/lib/x86_64-linux-gnu/libc.so.6",
        "/usr/lib/x86_64-linux-gnu/libc.so.6",
        "/lib/aarch64-linux-gnu/libc.so.6",
        "/usr/lib/aarch64-linux-gnu/libc.so.6",
        "/lib64/libc.so.6",
        "/usr/lib64/libc.so.6",
        "/usr/lib/libc.so.6",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

/// Artifacts tree for `platform` with `header` and a libc-backed library
pub fn artifacts(platform: PlatformKey, header: &str) -> Option<TempDir> {
    let libc = system_libc()?;
    let config = PlatformMatcher::for_key(platform)
        .find_best_match(PLATFORMS)
        .ok()?;
    let descriptor = libc_descriptor();

    let temp = tempfile::tempdir().ok()?;
    let include = temp.path().join(config.directory).join("include");
    let lib = temp.path().join(config.directory).join("lib");
    fs::create_dir_all(&include).ok()?;
    fs::create_dir_all(&lib).ok()?;
    fs::write(include.join("c.h"), header).ok()?;

    let filename = library_filename(
        config.library_template,
        &descriptor.library_name,
        &descriptor.library_version,
    )
    .ok()?;
    std::os::unix::fs::symlink(&libc, lib.join(filename)).ok()?;
    Some(temp)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Stand-in for the OS loader: records calls and the active directory
pub struct Recording {
    pub calls: Arc<Mutex<Vec<Option<PathBuf>>>>,
    pub active: Arc<Mutex<Option<PathBuf>>>,
}

impl SearchPathControl for Recording {
    fn set_search_path(&mut self, directory: Option<&Path>) -> NativeResult<()> {
        let directory = directory.map(Path::to_path_buf);
        self.calls.lock().push(directory.clone());
        *self.active.lock() = directory;
        Ok(())
    }
}

pub struct RecordingGuard {
    pub guard: Arc<LoaderGuard>,
    pub calls: Arc<Mutex<Vec<Option<PathBuf>>>>,
    pub active: Arc<Mutex<Option<PathBuf>>>,
}

pub fn recording_guard() -> RecordingGuard {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let active = Arc::new(Mutex::new(None));
    let guard = {
        let calls = Arc::clone(&calls);
        let active = Arc::clone(&active);
        LoaderGuard::new(move || {
            Ok(Box::new(Recording {
                calls: Arc::clone(&calls),
                active: Arc::clone(&active),
            }) as Box<dyn SearchPathControl>)
        })
    };
    RecordingGuard {
        guard: Arc::new(guard),
        calls,
        active,
    }
}
