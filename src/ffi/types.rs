//! FFI Type System
//!
//! C types as declared by an interface description, plus the values passed
//! through the generic call path.

use std::fmt;

/// Scalar C types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfiType {
    /// `_Bool` / `bool`
    Bool,
    /// `char`, with the target's signedness (`libc::c_char`)
    Char,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    /// `float`
    F32,
    /// `double`
    F64,
    /// `size_t`, `uintptr_t`
    USize,
    /// `ssize_t`, `intptr_t`, `ptrdiff_t`
    ISize,
}

impl FfiType {
    /// Get the size in bytes of this type
    pub fn size(&self) -> usize {
        match self {
            FfiType::Bool | FfiType::Char | FfiType::U8 | FfiType::I8 => 1,
            FfiType::U16 | FfiType::I16 => 2,
            FfiType::U32 | FfiType::I32 | FfiType::F32 => 4,
            FfiType::U64 | FfiType::I64 | FfiType::F64 => 8,
            FfiType::USize | FfiType::ISize => std::mem::size_of::<usize>(),
        }
    }

    /// Check if this type is an integer type
    pub fn is_integer(&self) -> bool {
        !self.is_float()
    }

    /// Check if this type is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, FfiType::F32 | FfiType::F64)
    }

    pub fn is_signed(&self) -> bool {
        if *self == FfiType::Char {
            return libc::c_char::MIN != 0;
        }
        matches!(
            self,
            FfiType::I8
                | FfiType::I16
                | FfiType::I32
                | FfiType::I64
                | FfiType::ISize
                | FfiType::F32
                | FfiType::F64
        )
    }

    /// Parse a single-word C type name
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bool" | "_Bool" => Some(FfiType::Bool),
            "char" => Some(FfiType::Char),
            "uint8_t" => Some(FfiType::U8),
            "uint16_t" => Some(FfiType::U16),
            "uint32_t" => Some(FfiType::U32),
            "uint64_t" => Some(FfiType::U64),
            "int8_t" => Some(FfiType::I8),
            "int16_t" => Some(FfiType::I16),
            "int32_t" => Some(FfiType::I32),
            "int64_t" => Some(FfiType::I64),
            "float" => Some(FfiType::F32),
            "double" => Some(FfiType::F64),
            "size_t" | "uintptr_t" => Some(FfiType::USize),
            "ssize_t" | "intptr_t" | "ptrdiff_t" => Some(FfiType::ISize),
            _ => None,
        }
    }
}

impl fmt::Display for FfiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FfiType::Bool => "bool",
            FfiType::Char => "char",
            FfiType::U8 => "uint8_t",
            FfiType::U16 => "uint16_t",
            FfiType::U32 => "uint32_t",
            FfiType::U64 => "uint64_t",
            FfiType::I8 => "int8_t",
            FfiType::I16 => "int16_t",
            FfiType::I32 => "int32_t",
            FfiType::I64 => "int64_t",
            FfiType::F32 => "float",
            FfiType::F64 => "double",
            FfiType::USize => "size_t",
            FfiType::ISize => "ssize_t",
        };
        write!(f, "{}", name)
    }
}

/// A C type as declared by an interface description.
///
/// Records are referenced by tag and laid out by the owning
/// [`Interface`](super::Interface), so a forward declaration may be
/// completed later in the header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CType {
    Void,
    Scalar(FfiType),
    Pointer(Box<CType>),
    Array(Box<CType>, usize),
    /// `struct <tag>`; opaque until its body is declared
    Record(String),
    /// `enum <tag>`, laid out as `int`
    Enum(String),
    /// Function pointer, only ever used through a pointer-sized slot
    Function,
}

impl CType {
    pub fn pointer_to(self) -> Self {
        CType::Pointer(Box::new(self))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, CType::Pointer(_) | CType::Function)
    }

    /// Types that fit in a general purpose register
    pub fn is_integer_class(&self) -> bool {
        match self {
            CType::Scalar(t) => t.is_integer(),
            CType::Pointer(_) | CType::Enum(_) | CType::Function => true,
            _ => false,
        }
    }

    /// Scalar view used when reading or writing values
    pub fn scalar(&self) -> Option<FfiType> {
        match self {
            CType::Scalar(t) => Some(*t),
            CType::Enum(_) => Some(FfiType::I32),
            CType::Pointer(_) | CType::Function => Some(FfiType::USize),
            _ => None,
        }
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CType::Void => write!(f, "void"),
            CType::Scalar(t) => write!(f, "{}", t),
            CType::Pointer(inner) => write!(f, "{}*", inner),
            CType::Array(inner, len) => write!(f, "{}[{}]", inner, len),
            CType::Record(tag) => write!(f, "struct {}", tag),
            CType::Enum(tag) => write!(f, "enum {}", tag),
            CType::Function => write!(f, "fn"),
        }
    }
}

/// A value that can be passed to or returned from FFI functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiValue {
    /// No value
    Void,
    /// Integer of any width, sign-extended to 64 bits when signed
    Integer(u64),
    /// Pointer value
    Pointer(usize),
}

impl FfiValue {
    /// Create a value from a raw register value
    pub fn from_u64(value: u64, ty: &CType) -> Self {
        match ty {
            CType::Void => FfiValue::Void,
            t if t.is_pointer() => FfiValue::Pointer(value as usize),
            t => match t.scalar() {
                Some(scalar) => FfiValue::Integer(normalize(value, scalar)),
                None => FfiValue::Integer(value),
            },
        }
    }

    /// Convert to a raw register value
    pub fn to_u64(&self) -> u64 {
        match self {
            FfiValue::Void => 0,
            FfiValue::Integer(v) => *v,
            FfiValue::Pointer(v) => *v as u64,
        }
    }

    pub fn as_i64(&self) -> i64 {
        self.to_u64() as i64
    }

    /// Check if this is a void value
    pub fn is_void(&self) -> bool {
        matches!(self, FfiValue::Void)
    }
}

impl From<i64> for FfiValue {
    fn from(value: i64) -> Self {
        FfiValue::Integer(value as u64)
    }
}

impl From<usize> for FfiValue {
    fn from(value: usize) -> Self {
        FfiValue::Pointer(value)
    }
}

/// Truncate a raw return register to `ty` and sign- or zero-extend it back
fn normalize(value: u64, ty: FfiType) -> u64 {
    match ty {
        FfiType::Bool => (value as u8 != 0) as u64,
        FfiType::Char => value as libc::c_char as i64 as u64,
        FfiType::I8 => value as i8 as i64 as u64,
        FfiType::I16 => value as i16 as i64 as u64,
        FfiType::I32 => value as i32 as i64 as u64,
        FfiType::U8 => value as u8 as u64,
        FfiType::U16 => value as u16 as u64,
        FfiType::U32 => value as u32 as u64,
        FfiType::ISize => value as isize as i64 as u64,
        _ => value,
    }
}

/// Function signature for FFI calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfiSignature {
    /// Function name
    pub name: String,
    /// Parameter types
    pub params: Vec<CType>,
    /// Return type
    pub return_type: CType,
    /// Whether this function is variadic
    pub variadic: bool,
}

impl FfiSignature {
    /// Create a new function signature
    pub fn new(name: impl Into<String>, params: Vec<CType>, return_type: CType) -> Self {
        Self {
            name: name.into(),
            params,
            return_type,
            variadic: false,
        }
    }

    /// Create a variadic function signature
    pub fn variadic(name: impl Into<String>, params: Vec<CType>, return_type: CType) -> Self {
        Self {
            name: name.into(),
            params,
            return_type,
            variadic: true,
        }
    }

    /// Validate argument count
    pub fn validate_args(&self, arg_count: usize) -> bool {
        if self.variadic {
            arg_count >= self.params.len()
        } else {
            arg_count == self.params.len()
        }
    }

    /// Whether every parameter and the return value travel in integer registers
    pub fn is_integer_only(&self) -> bool {
        let ret_ok = matches!(self.return_type, CType::Void) || self.return_type.is_integer_class();
        ret_ok && self.params.iter().all(CType::is_integer_class)
    }
}

impl fmt::Display for FfiSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.return_type, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        if self.variadic {
            if !self.params.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "...")?;
        }
        write!(f, ")")
    }
}
