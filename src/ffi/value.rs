//! Native Values
//!
//! [`CValue`] is a typed view onto C memory: either a zeroed allocation made
//! by a binding, or foreign memory reached through a cast. Views created by
//! casts and field access share the allocation they came from, so the
//! memory lives as long as any view does.

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::header::Interface;
use super::types::{CType, FfiType, FfiValue};
use super::{NativeError, NativeResult};

/// Backing memory of one or more [`CValue`]s
pub(crate) struct Storage {
    ptr: NonNull<u8>,
    len: usize,
    /// Allocated by us with `calloc`
    allocated: bool,
    /// Released automatically when the last view drops
    owned: bool,
    freed: AtomicBool,
}

// SAFETY: the storage is plain C heap memory (or a foreign address) with no
// thread affinity. Access through views is unsynchronised, exactly like the
// C side; callers sharing a value across threads must synchronise writes.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl Storage {
    /// Zeroed C allocation of `len` bytes
    fn allocate(len: usize, owned: bool) -> NativeResult<Self> {
        // SAFETY: calloc with a non-zero size; the result is checked for null.
        let raw = unsafe { libc::calloc(1, len.max(1)) } as *mut u8;
        let ptr = NonNull::new(raw).ok_or_else(|| {
            NativeError::binding(format!("Failed to allocate {} bytes", len))
        })?;
        Ok(Self {
            ptr,
            len,
            allocated: true,
            owned,
            freed: AtomicBool::new(false),
        })
    }

    /// Memory owned by someone else
    fn foreign(address: usize, len: usize) -> NativeResult<Self> {
        let ptr = NonNull::new(address as *mut u8)
            .ok_or_else(|| NativeError::binding("Cannot view memory at a null address"))?;
        Ok(Self {
            ptr,
            len,
            allocated: false,
            owned: false,
            freed: AtomicBool::new(false),
        })
    }

    fn release(&self) -> NativeResult<()> {
        if !self.allocated {
            return Err(NativeError::binding(
                "Cannot free memory that was not allocated by this binding",
            ));
        }
        if self.freed.swap(true, Ordering::AcqRel) {
            return Err(NativeError::binding("Value has already been freed"));
        }
        // SAFETY: allocated with calloc and not freed before (checked above).
        unsafe { libc::free(self.ptr.as_ptr() as *mut libc::c_void) };
        Ok(())
    }

    fn is_freed(&self) -> bool {
        self.freed.load(Ordering::Acquire)
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if self.allocated && self.owned && !self.freed.swap(true, Ordering::AcqRel) {
            // SAFETY: allocated with calloc, freed exactly once.
            unsafe { libc::free(self.ptr.as_ptr() as *mut libc::c_void) };
        }
    }
}

/// A typed handle to native memory
#[derive(Clone)]
pub struct CValue {
    storage: Arc<Storage>,
    offset: usize,
    ty: CType,
    interface: Arc<Interface>,
}

impl CValue {
    /// Fresh zero-initialised value of `ty`
    pub(crate) fn allocate(interface: Arc<Interface>, ty: CType, owned: bool) -> NativeResult<Self> {
        let size = sized(&interface, &ty)?;
        Ok(Self {
            storage: Arc::new(Storage::allocate(size, owned)?),
            offset: 0,
            ty,
            interface,
        })
    }

    /// View of foreign memory at `address`
    pub(crate) fn foreign(interface: Arc<Interface>, ty: CType, address: usize) -> NativeResult<Self> {
        let size = sized(&interface, &ty)?;
        Ok(Self {
            storage: Arc::new(Storage::foreign(address, size)?),
            offset: 0,
            ty,
            interface,
        })
    }

    /// Reinterpret the same bytes as `ty`, a type of `interface`
    pub(crate) fn retype(&self, interface: Arc<Interface>, ty: CType) -> NativeResult<Self> {
        self.check_live()?;
        let size = sized(&interface, &ty)?;
        if size > self.size() {
            return Err(NativeError::binding(format!(
                "Cannot cast {} ({} bytes) to {} ({} bytes)",
                self.ty,
                self.size(),
                ty,
                size
            )));
        }
        Ok(Self {
            storage: Arc::clone(&self.storage),
            offset: self.offset,
            ty,
            interface,
        })
    }

    pub fn ty(&self) -> &CType {
        &self.ty
    }

    /// Size of the value's type in bytes
    pub fn size(&self) -> usize {
        self.interface.size_of(&self.ty).unwrap_or(0)
    }

    /// Address of the first byte
    pub fn address(&self) -> usize {
        self.storage.ptr.as_ptr() as usize + self.offset
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.address() as *mut u8
    }

    /// Whether the memory is released when the last handle drops
    pub fn is_owned(&self) -> bool {
        self.storage.owned
    }

    pub(crate) fn release(&self) -> NativeResult<()> {
        self.storage.release()
    }

    fn check_live(&self) -> NativeResult<()> {
        if self.storage.is_freed() {
            return Err(NativeError::binding("Value has been freed"));
        }
        debug_assert!(self.offset + self.size() <= self.storage.len);
        Ok(())
    }

    fn scalar(&self) -> NativeResult<FfiType> {
        self.ty.scalar().ok_or_else(|| {
            NativeError::binding(format!("{} is not a scalar type", self.ty))
        })
    }

    /// Read an integer, pointer, enum or bool value, sign-extending signed types
    pub fn get_i64(&self) -> NativeResult<i64> {
        self.check_live()?;
        let ty = self.scalar()?;
        let p = self.as_ptr();
        // SAFETY: the view lies within its live storage (checked on creation)
        // and reads are unaligned-tolerant.
        let value = unsafe {
            match ty {
                FfiType::Bool | FfiType::U8 => p.read_unaligned() as i64,
                FfiType::Char => (p as *const libc::c_char).read_unaligned() as i64,
                FfiType::I8 => (p as *const i8).read_unaligned() as i64,
                FfiType::I16 => (p as *const i16).read_unaligned() as i64,
                FfiType::U16 => (p as *const u16).read_unaligned() as i64,
                FfiType::I32 => (p as *const i32).read_unaligned() as i64,
                FfiType::U32 => (p as *const u32).read_unaligned() as i64,
                FfiType::I64 | FfiType::U64 => (p as *const i64).read_unaligned(),
                FfiType::ISize => (p as *const isize).read_unaligned() as i64,
                FfiType::USize => (p as *const usize).read_unaligned() as i64,
                FfiType::F32 | FfiType::F64 => {
                    return Err(NativeError::binding(format!(
                        "{} is a floating point type",
                        self.ty
                    )))
                }
            }
        };
        Ok(value)
    }

    /// Write an integer, pointer, enum or bool value, truncating to the type's width
    pub fn set_i64(&self, value: i64) -> NativeResult<()> {
        self.check_live()?;
        let ty = self.scalar()?;
        let p = self.as_ptr();
        // SAFETY: as in get_i64.
        unsafe {
            match ty {
                FfiType::Bool => p.write_unaligned((value != 0) as u8),
                FfiType::U8 | FfiType::Char | FfiType::I8 => p.write_unaligned(value as u8),
                FfiType::I16 | FfiType::U16 => (p as *mut u16).write_unaligned(value as u16),
                FfiType::I32 | FfiType::U32 => (p as *mut u32).write_unaligned(value as u32),
                FfiType::I64 | FfiType::U64 => (p as *mut i64).write_unaligned(value),
                FfiType::ISize | FfiType::USize => (p as *mut usize).write_unaligned(value as usize),
                FfiType::F32 | FfiType::F64 => {
                    return Err(NativeError::binding(format!(
                        "{} is a floating point type",
                        self.ty
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn get_f64(&self) -> NativeResult<f64> {
        self.check_live()?;
        let p = self.as_ptr();
        // SAFETY: as in get_i64.
        match self.scalar()? {
            FfiType::F32 => Ok(unsafe { (p as *const f32).read_unaligned() } as f64),
            FfiType::F64 => Ok(unsafe { (p as *const f64).read_unaligned() }),
            _ => Err(NativeError::binding(format!(
                "{} is not a floating point type",
                self.ty
            ))),
        }
    }

    pub fn set_f64(&self, value: f64) -> NativeResult<()> {
        self.check_live()?;
        let p = self.as_ptr();
        // SAFETY: as in get_i64.
        match self.scalar()? {
            FfiType::F32 => unsafe { (p as *mut f32).write_unaligned(value as f32) },
            FfiType::F64 => unsafe { (p as *mut f64).write_unaligned(value) },
            _ => {
                return Err(NativeError::binding(format!(
                    "{} is not a floating point type",
                    self.ty
                )))
            }
        }
        Ok(())
    }

    /// View of a struct or union field
    pub fn field(&self, name: &str) -> NativeResult<CValue> {
        self.check_live()?;
        let CType::Record(tag) = &self.ty else {
            return Err(NativeError::binding(format!("{} has no fields", self.ty)));
        };
        let layout = self
            .interface
            .record(tag)
            .ok_or_else(|| NativeError::binding(format!("struct {} is incomplete", tag)))?;
        let field = layout.field(name).ok_or_else(|| {
            NativeError::binding(format!("struct {} has no field '{}'", tag, name))
        })?;
        Ok(CValue {
            storage: Arc::clone(&self.storage),
            offset: self.offset + field.offset,
            ty: field.ty.clone(),
            interface: Arc::clone(&self.interface),
        })
    }

    /// View of an array element
    pub fn element(&self, index: usize) -> NativeResult<CValue> {
        self.check_live()?;
        let CType::Array(elem, len) = &self.ty else {
            return Err(NativeError::binding(format!("{} is not an array", self.ty)));
        };
        if index >= *len {
            return Err(NativeError::binding(format!(
                "Index {} out of bounds for {}",
                index, self.ty
            )));
        }
        let stride = sized(&self.interface, elem)?;
        Ok(CValue {
            storage: Arc::clone(&self.storage),
            offset: self.offset + index * stride,
            ty: (**elem).clone(),
            interface: Arc::clone(&self.interface),
        })
    }

    /// Argument form for the generic call path: pointers and arrays pass
    /// their address, scalars pass their value.
    pub fn to_ffi_value(&self) -> NativeResult<FfiValue> {
        match &self.ty {
            CType::Record(_) | CType::Array(..) => Ok(FfiValue::Pointer(self.address())),
            ty if ty.is_pointer() => Ok(FfiValue::Pointer(self.get_i64()? as usize)),
            _ => Ok(FfiValue::Integer(self.get_i64()? as u64)),
        }
    }
}

impl fmt::Debug for CValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CValue")
            .field("ty", &self.ty.to_string())
            .field("address", &format_args!("{:#x}", self.address()))
            .field("owned", &self.storage.owned)
            .finish()
    }
}

fn sized(interface: &Interface, ty: &CType) -> NativeResult<usize> {
    interface.size_of(ty).ok_or_else(|| match ty {
        CType::Array(elem, _) if interface.size_of(elem).is_some() => {
            NativeError::binding(format!("{} is too large", ty))
        }
        _ => NativeError::binding(format!("{} is an incomplete type", ty)),
    })
}
