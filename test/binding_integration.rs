//! Binding Integration Tests for nativelib
//!
//! Loads the system C library through a temporary artifacts tree and
//! exercises values, casts, constants and raw calls against it. Tests are
//! skipped when no libc can be located.

#![cfg(target_os = "linux")]

mod common;

use std::ffi::CString;
use std::path::PathBuf;
use std::sync::Arc;

use nativelib::ffi::{Arch, Os};
use nativelib::{
    BindingState, CValue, CastSource, FfiValue, LoaderGuard, NativeBinding, NativeConfig,
    NativeError, PlatformKey,
};

use common::{artifacts, init_tracing, libc_descriptor, recording_guard, LIBC_HEADER};

const WINDOWS: PlatformKey = PlatformKey::new(Os::Windows, Arch::X86_64);

macro_rules! libc_binding {
    ($temp:ident, $binding:ident) => {
        init_tracing();
        let Some($temp) = artifacts(PlatformKey::current(), LIBC_HEADER) else {
            eprintln!("libc not found, skipping");
            return;
        };
        #[allow(unused_mut)]
        let mut $binding = NativeBinding::builder(libc_descriptor())
            .root($temp.path())
            .build()
            .expect("Failed to load libc");
    };
}

/// Write a NUL-terminated string into a `char[N]` value
fn write_str(value: &CValue, s: &str) {
    for (i, b) in s.bytes().chain(std::iter::once(0)).enumerate() {
        value.element(i).unwrap().set_i64(b as i64).unwrap();
    }
}

#[test]
fn test_load_and_call() {
    libc_binding!(temp, binding);
    assert_eq!(binding.state(), BindingState::Loaded);
    assert!(binding.is_loaded());

    let ffi = binding.ffi().unwrap();
    assert_eq!(ffi.interface().function_count(), 7);

    let result = unsafe { ffi.call("abs", &[FfiValue::from(-42i64)]) }.unwrap();
    assert_eq!(result.as_i64(), 42);

    let result = unsafe { ffi.call("getpid", &[]) }.unwrap();
    assert_eq!(result.as_i64() as u32, std::process::id());

    let err = unsafe { ffi.call("atof", &[FfiValue::from(0usize)]) }.unwrap_err();
    assert!(matches!(err, NativeError::Binding(_)));
}

#[test]
fn test_typed_function_pointers() {
    libc_binding!(temp, binding);
    let ffi = binding.ffi().unwrap();

    type Atof = extern "C" fn(*const std::os::raw::c_char) -> f64;
    let atof: Atof = unsafe { ffi.function("atof") }.unwrap();
    let text = CString::new("2.5").unwrap();
    assert_eq!(atof(text.as_ptr()), 2.5);

    #[repr(C)]
    struct DivT {
        quot: i32,
        rem: i32,
    }
    type Div = extern "C" fn(i32, i32) -> DivT;
    let div: Div = unsafe { ffi.function("div") }.unwrap();
    let r = div(17, 5);
    assert_eq!((r.quot, r.rem), (3, 2));
}

#[test]
fn test_new_value_passed_to_native_code() {
    libc_binding!(temp, binding);

    let buffer = binding.new_value("char[16]", true, false).unwrap();
    assert_eq!(buffer.size(), 16);
    write_str(&buffer, "hello");

    let ffi = binding.ffi().unwrap();
    let len = unsafe { ffi.call("strlen", &[FfiValue::from(buffer.address())]) }.unwrap();
    assert_eq!(len.to_u64(), 5);
}

#[test]
fn test_struct_values_and_casts() {
    libc_binding!(temp, binding);

    let pair = binding.new_value("div_t", true, false).unwrap();
    assert_eq!(pair.size(), 8);
    pair.field("quot").unwrap().set_i64(7).unwrap();
    pair.field("rem").unwrap().set_i64(-1).unwrap();

    // Same bytes, different type
    let quot = binding.cast("int", &pair).unwrap();
    assert_eq!(quot.get_i64().unwrap(), 7);
    assert_eq!(quot.address(), pair.address());

    // Pointer made from an address
    let ptr = binding.cast("div_t*", pair.address()).unwrap();
    assert_eq!(ptr.get_i64().unwrap() as usize, pair.address());

    let null = binding.cast("void*", CastSource::Null).unwrap();
    assert_eq!(null.get_i64().unwrap(), 0);

    let level = binding.cast("enum whence", 2i64).unwrap();
    assert_eq!(level.get_i64().unwrap(), binding.enum_constant("WHENCE_END").unwrap());

    assert!(matches!(
        binding.cast("div_t", CastSource::Null),
        Err(NativeError::Binding(_))
    ));
    assert!(matches!(
        binding.cast("no_such_t", &pair),
        Err(NativeError::Binding(_))
    ));
    assert!(matches!(
        binding.cast("int64_t[4]", &pair),
        Err(NativeError::Binding(_))
    ));
}

#[test]
fn test_oversized_array_rejected() {
    libc_binding!(temp, binding);
    let err = binding
        .new_value("int64_t[2305843009213693953]", true, false)
        .unwrap_err();
    assert!(matches!(err, NativeError::Binding(_)));

    let pair = binding.new_value("div_t", true, false).unwrap();
    assert!(matches!(
        binding.cast("char[18446744073709551615]", &pair),
        Err(NativeError::Binding(_))
    ));
}

#[test]
fn test_foreign_memory_views() {
    libc_binding!(temp, binding);
    let ffi = binding.ffi().unwrap();

    let raw = unsafe { ffi.call("malloc", &[FfiValue::Integer(8)]) }.unwrap();
    let FfiValue::Pointer(address) = raw else {
        panic!("Expected pointer from malloc");
    };
    assert_ne!(address, 0);

    let view = binding.cast("int64_t", address).unwrap();
    view.set_i64(-99).unwrap();
    assert_eq!(view.get_i64().unwrap(), -99);
    assert!(!view.is_owned());

    // Not ours to free
    assert!(binding.free(&view).is_err());
    unsafe { ffi.call("free", &[raw]) }.unwrap();
}

#[test]
fn test_value_ownership() {
    libc_binding!(temp, binding);

    let manual = binding.new_value("int", false, false).unwrap();
    assert!(!manual.is_owned());
    manual.set_i64(3).unwrap();
    binding.free(&manual).unwrap();
    assert!(binding.free(&manual).is_err());
    assert!(manual.get_i64().is_err());

    let kept = binding.new_value("div_t", true, true).unwrap();
    kept.field("rem").unwrap().set_i64(11).unwrap();
    let address = kept.field("rem").unwrap().address();
    drop(kept);

    // The binding still holds the allocation
    let view = binding.cast("int", address).unwrap();
    assert_eq!(view.get_i64().unwrap(), 11);
}

#[test]
fn test_constants() {
    libc_binding!(temp, binding);
    assert_eq!(binding.enum_constant("EXIT_FAILURE").unwrap(), 1);
    assert_eq!(binding.enum_constant("BUFFER_SIZE").unwrap(), 16);
    assert_eq!(binding.enum_constant("WHENCE_SET").unwrap(), 0);
    assert_eq!(binding.enum_constant("WHENCE_CUR").unwrap(), 1);
    assert!(matches!(
        binding.enum_constant("C_H"),
        Err(NativeError::Binding(_))
    ));
    assert!(matches!(
        binding.new_value("struct undeclared", true, false),
        Err(NativeError::Binding(_))
    ));
}

#[test]
fn test_lifecycle_errors() {
    libc_binding!(temp, binding);

    assert!(matches!(binding.load(), Err(NativeError::AlreadyLoaded(_))));

    binding.dispose().unwrap();
    assert_eq!(binding.state(), BindingState::Disposed);
    assert!(matches!(binding.ffi(), Err(NativeError::Disposed(_))));
    assert!(matches!(
        binding.new_value("int", true, false),
        Err(NativeError::Disposed(_))
    ));
    binding.dispose().unwrap();
}

#[test]
fn test_deferred_load() {
    init_tracing();
    let Some(temp) = artifacts(PlatformKey::current(), LIBC_HEADER) else {
        return;
    };
    let mut binding = NativeBinding::builder(libc_descriptor())
        .root(temp.path())
        .load(false)
        .build()
        .unwrap();
    assert!(matches!(binding.ffi(), Err(NativeError::NotLoaded(_))));

    binding.load().unwrap();
    assert_eq!(binding.enum_constant("EXIT_SUCCESS").unwrap(), 0);
}

#[test]
fn test_symbol_missing_from_library() {
    init_tracing();
    let header = "int abs(int j);\nint nativelib_not_in_libc(void);";
    let Some(temp) = artifacts(PlatformKey::current(), header) else {
        return;
    };
    let err = NativeBinding::builder(libc_descriptor())
        .root(temp.path())
        .build()
        .unwrap_err();
    let NativeError::Binding(message) = err else {
        panic!("Expected Binding error");
    };
    assert!(message.contains("nativelib_not_in_libc"));
}

#[test]
fn test_config_declared_library() {
    init_tracing();
    let Some(temp) = artifacts(PlatformKey::current(), LIBC_HEADER) else {
        return;
    };
    std::fs::write(
        temp.path().join(nativelib::config::CONFIG_FILE),
        "[artifacts]\nroot = \".\"\n\n[libraries.c]\nheader = \"c\"\nname = \"c\"\nversion = \"6\"\n",
    )
    .unwrap();

    let nested = temp.path().join("deep/er");
    std::fs::create_dir_all(&nested).unwrap();
    let config = NativeConfig::find_and_load(&nested).unwrap();
    let library = config.library("c").unwrap();

    let binding = NativeBinding::builder(library)
        .resolver(config.resolver())
        .build()
        .unwrap();
    assert_eq!(binding.library().key(), "c");
    assert!(binding.library_path().unwrap().starts_with(temp.path()));
}

#[test]
fn test_simulated_windows_configures_guard() {
    init_tracing();
    let Some(temp) = artifacts(WINDOWS, LIBC_HEADER) else {
        return;
    };
    let recorder = recording_guard();

    let binding = NativeBinding::builder(libc_descriptor())
        .platform(WINDOWS)
        .root(temp.path())
        .guard(Arc::clone(&recorder.guard))
        .build()
        .unwrap();
    assert_eq!(binding.state(), BindingState::GuardConfigured);
    assert!(binding
        .library_path()
        .unwrap()
        .ends_with("windows-x86_64/lib/c-6.dll"));

    let lib_dir = temp.path().join("windows-x86_64").join("lib");
    assert_eq!(recorder.guard.current(), Some(lib_dir.clone()));

    let pid = binding
        .with_search_path(|ffi| unsafe { ffi.call("getpid", &[]) })
        .unwrap()
        .unwrap();
    assert_eq!(pid.as_i64() as u32, std::process::id());

    drop(binding);
    assert_eq!(recorder.guard.current(), None);
    assert_eq!(*recorder.active.lock(), None);
    assert_eq!(
        *recorder.calls.lock(),
        vec![Some(lib_dir.clone()), Some(lib_dir), None::<PathBuf>]
    );
}

#[test]
fn test_guard_failure_leaves_binding_unusable() {
    init_tracing();
    let Some(temp) = artifacts(WINDOWS, LIBC_HEADER) else {
        return;
    };
    let guard = Arc::new(LoaderGuard::new(|| {
        Err(NativeError::binding("loader control unavailable"))
    }));

    let mut binding = NativeBinding::builder(libc_descriptor())
        .platform(WINDOWS)
        .root(temp.path())
        .guard(guard)
        .load(false)
        .build()
        .unwrap();
    let err = binding.load().unwrap_err();
    assert!(err.to_string().contains("loader control unavailable"));
    assert_eq!(binding.state(), BindingState::Failed);
    assert!(matches!(binding.ffi(), Err(NativeError::NotLoaded(_))));
    assert!(matches!(binding.load(), Err(NativeError::LoadFailed(_))));
}

#[test]
fn test_missing_artifacts_tree() {
    init_tracing();
    let temp = tempfile::tempdir().unwrap();
    let err = NativeBinding::builder(libc_descriptor())
        .root(temp.path())
        .build()
        .unwrap_err();
    assert!(matches!(err, NativeError::MissingArtifact { .. }));
}

#[test]
fn test_unsupported_platform() {
    let err = NativeBinding::builder(libc_descriptor())
        .platform(PlatformKey::new(Os::Windows, Arch::Arm64))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("windows-arm64"));
}
