//! Value types, reference types and the typed [`Value`] wrapper.
//!
//! Grounded on `crates/core/src/value.rs`'s `ValueType` and the teacher's
//! reference-type additions (`FuncRef`/`ExternRef`) from the same file.

use crate::untyped::UntypedValue;
use core::fmt;

/// One of Wasm's value types (spec §3).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    #[cfg(feature = "simd")]
    V128,
    FuncRef,
    ExternRef,
}

impl ValType {
    pub fn is_num(self) -> bool {
        matches!(self, ValType::I32 | ValType::I64 | ValType::F32 | ValType::F64)
    }

    pub fn is_ref(self) -> bool {
        matches!(self, ValType::FuncRef | ValType::ExternRef)
    }

    #[cfg(feature = "simd")]
    pub fn is_vec(self) -> bool {
        matches!(self, ValType::V128)
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
            #[cfg(feature = "simd")]
            ValType::V128 => "v128",
            ValType::FuncRef => "funcref",
            ValType::ExternRef => "externref",
        };
        f.write_str(name)
    }
}

/// The element type carried by a [`crate::module::TableType`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RefType {
    FuncRef,
    ExternRef,
}

impl RefType {
    pub fn to_val_type(self) -> ValType {
        match self {
            RefType::FuncRef => ValType::FuncRef,
            RefType::ExternRef => ValType::ExternRef,
        }
    }
}

/// A nullable reference value: either a `funcref` (an index into the
/// module's function space, or null) or an `externref` (an opaque host
/// handle, or null).
///
/// The module never imports real host objects (spec §1's non-goal), so the
/// only externref value a module can ever materialize on its own is null;
/// the type still exists so `externref`-typed locals/globals/tables
/// round-trip correctly.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Ref {
    Func(Option<u32>),
    Extern(Option<u32>),
}

impl Ref {
    pub fn null(ty: RefType) -> Self {
        match ty {
            RefType::FuncRef => Ref::Func(None),
            RefType::ExternRef => Ref::Extern(None),
        }
    }

    pub fn is_null(self) -> bool {
        match self {
            Ref::Func(v) => v.is_none(),
            Ref::Extern(v) => v.is_none(),
        }
    }

    pub fn ty(self) -> RefType {
        match self {
            Ref::Func(_) => RefType::FuncRef,
            Ref::Extern(_) => RefType::ExternRef,
        }
    }
}

/// A host-facing, typed Wasm value.
///
/// The interpreter itself operates on the untagged [`UntypedValue`] cell;
/// `Value` exists at the embedding boundary where the type is statically
/// known from a function signature or global type (spec §3: "the
/// interpreter relies on validator-established types rather than runtime
/// type tags for numeric ops").
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    FuncRef(Option<u32>),
    ExternRef(Option<u32>),
}

impl Value {
    pub fn ty(&self) -> ValType {
        match self {
            Value::I32(_) => ValType::I32,
            Value::I64(_) => ValType::I64,
            Value::F32(_) => ValType::F32,
            Value::F64(_) => ValType::F64,
            Value::FuncRef(_) => ValType::FuncRef,
            Value::ExternRef(_) => ValType::ExternRef,
        }
    }

    pub fn to_untyped(self) -> UntypedValue {
        match self {
            Value::I32(v) => UntypedValue::from(v),
            Value::I64(v) => UntypedValue::from(v),
            Value::F32(v) => UntypedValue::from(v),
            Value::F64(v) => UntypedValue::from(v),
            Value::FuncRef(v) => UntypedValue::from_ref(Ref::Func(v)),
            Value::ExternRef(v) => UntypedValue::from_ref(Ref::Extern(v)),
        }
    }

    pub fn from_untyped(untyped: UntypedValue, ty: ValType) -> Self {
        match ty {
            ValType::I32 => Value::I32(untyped.into()),
            ValType::I64 => Value::I64(untyped.into()),
            ValType::F32 => Value::F32(untyped.into()),
            ValType::F64 => Value::F64(untyped.into()),
            #[cfg(feature = "simd")]
            ValType::V128 => unreachable!("v128 is not representable as a host Value"),
            ValType::FuncRef => match untyped.into_ref(RefType::FuncRef) {
                Ref::Func(v) => Value::FuncRef(v),
                Ref::Extern(_) => unreachable!(),
            },
            ValType::ExternRef => match untyped.into_ref(RefType::ExternRef) {
                Ref::Extern(v) => Value::ExternRef(v),
                Ref::Func(_) => unreachable!(),
            },
        }
    }
}
