//! The tagless 128-bit value cell the interpreter actually operates on.
//!
//! Grounded on `crates/core/src/untyped.rs`'s `UntypedVal`: spec §3 calls
//! for "a tagged 128-bit cell" where "the interpreter relies on
//! validator-established types rather than runtime type tags for numeric
//! ops" — i.e. the cell itself carries no type tag, the *validator*
//! guarantees every read interprets the bits as the type that was pushed.
//! Reference values are the one exception (§3: "runtime reference-type
//! tagging remains"), so [`UntypedValue`] keeps a side encoding for those.

use crate::value::{Ref, RefType};

/// An untyped 64-bit (128-bit with `simd`) value stack slot.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(not(feature = "simd"), repr(transparent))]
#[cfg_attr(feature = "simd", repr(C))]
pub struct UntypedValue {
    lo64: u64,
    #[cfg(feature = "simd")]
    hi64: u64,
}

impl UntypedValue {
    pub fn lo64(self) -> u64 {
        self.lo64
    }

    #[cfg(feature = "simd")]
    pub fn hi64(self) -> u64 {
        self.hi64
    }

    #[cfg(feature = "simd")]
    pub fn from_u128(bits: u128) -> Self {
        Self {
            lo64: bits as u64,
            hi64: (bits >> 64) as u64,
        }
    }

    #[cfg(feature = "simd")]
    pub fn to_u128(self) -> u128 {
        (self.lo64 as u128) | ((self.hi64 as u128) << 64)
    }

    /// Encodes a nullable reference. Function refs store `index + 1` in the
    /// low 32 bits (0 = null); extern refs do the same, tagged in bit 32 so
    /// a `funcref` cell and an `externref` cell with the same numeric
    /// payload never alias.
    pub fn from_ref(r: Ref) -> Self {
        let (tag, payload) = match r {
            Ref::Func(idx) => (0u64, idx),
            Ref::Extern(idx) => (1u64, idx),
        };
        let encoded = match payload {
            None => 0u64,
            Some(idx) => (idx as u64) + 1,
        };
        Self {
            lo64: encoded | (tag << 32),
            #[cfg(feature = "simd")]
            hi64: 0,
        }
    }

    /// `true` if this cell encodes a null reference, regardless of whether
    /// it is a `funcref` or `externref` cell (the payload field alone
    /// determines nullness; the tag bit lives above it).
    pub fn is_null_ref(self) -> bool {
        self.lo64 & 0xFFFF_FFFF == 0
    }

    pub fn into_ref(self, ty: RefType) -> Ref {
        let encoded = self.lo64 & 0xFFFF_FFFF;
        let idx = if encoded == 0 {
            None
        } else {
            Some((encoded - 1) as u32)
        };
        match ty {
            RefType::FuncRef => Ref::Func(idx),
            RefType::ExternRef => Ref::Extern(idx),
        }
    }
}

macro_rules! impl_from_bits {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for UntypedValue {
                #[inline]
                fn from(v: $ty) -> Self {
                    Self {
                        lo64: v as u64,
                        #[cfg(feature = "simd")]
                        hi64: 0,
                    }
                }
            }

            impl From<UntypedValue> for $ty {
                #[inline]
                fn from(v: UntypedValue) -> Self {
                    v.lo64 as Self
                }
            }
        )*
    };
}
impl_from_bits!(i8, u8, i16, u16, i32, u32, i64, u64);

impl From<bool> for UntypedValue {
    fn from(v: bool) -> Self {
        Self::from(v as u32)
    }
}

impl From<f32> for UntypedValue {
    fn from(v: f32) -> Self {
        Self::from(v.to_bits())
    }
}

impl From<UntypedValue> for f32 {
    fn from(v: UntypedValue) -> Self {
        f32::from_bits(v.lo64 as u32)
    }
}

impl From<f64> for UntypedValue {
    fn from(v: f64) -> Self {
        Self::from(v.to_bits())
    }
}

impl From<UntypedValue> for f64 {
    fn from(v: UntypedValue) -> Self {
        f64::from_bits(v.lo64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_funcref_roundtrips() {
        let untyped = UntypedValue::from_ref(Ref::null(RefType::FuncRef));
        assert_eq!(untyped.into_ref(RefType::FuncRef), Ref::Func(None));
    }

    #[test]
    fn funcref_roundtrips() {
        let untyped = UntypedValue::from_ref(Ref::Func(Some(7)));
        assert_eq!(untyped.into_ref(RefType::FuncRef), Ref::Func(Some(7)));
    }

    #[test]
    fn i32_roundtrips_sign_extended_through_i64_slot() {
        let untyped = UntypedValue::from(-1i32);
        assert_eq!(i32::from(untyped), -1);
    }
}
