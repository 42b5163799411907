//! Constant expressions (spec §4.2/§4.3): the restricted instruction
//! sequence permitted in global initializers and active-segment offsets.
//!
//! Grounded in spirit on the teacher's `validation/func.rs` constant-ness
//! checks, adapted into a tiny standalone one-instruction decoder+evaluator
//! since constant expressions never need the full control/operand stack
//! machinery the general validator carries.

use crate::{
    binary::Reader,
    error::Error,
    module::types::GlobalType,
    value::{RefType, ValType, Value},
};

/// A decoded constant expression. Exactly one of these, followed by `end`
/// (0x0B), is permitted per spec §4.3.
#[derive(Debug, Clone, Copy)]
pub enum ConstExpr {
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),
    RefNull(RefType),
    RefFunc(u32),
    /// References an earlier **imported** immutable global (spec §4.3).
    GlobalGet(u32),
}

impl ConstExpr {
    pub fn ty(&self) -> ValType {
        match self {
            ConstExpr::I32Const(_) => ValType::I32,
            ConstExpr::I64Const(_) => ValType::I64,
            ConstExpr::F32Const(_) => ValType::F32,
            ConstExpr::F64Const(_) => ValType::F64,
            ConstExpr::RefNull(rt) => rt.to_val_type(),
            ConstExpr::RefFunc(_) => ValType::FuncRef,
            ConstExpr::GlobalGet(_) => ValType::I32, // patched by caller from the referenced global
        }
    }

    /// Decodes a single constant-expression instruction followed by `end`.
    ///
    /// `num_funcs` bounds a `ref.func` immediate; `imported_globals` bounds
    /// and types a `global.get` immediate (spec §4.3: only an imported
    /// immutable global is permitted).
    pub fn decode(
        r: &mut Reader<'_>,
        num_funcs: u32,
        imported_globals: &[GlobalType],
    ) -> Result<Self, Error> {
        let opcode = r.read_u8()?;
        let expr = match opcode {
            0x41 => ConstExpr::I32Const(r.read_i32_leb()?),
            0x42 => ConstExpr::I64Const(r.read_i64_leb()?),
            0x43 => ConstExpr::F32Const(r.read_f32()?),
            0x44 => ConstExpr::F64Const(r.read_f64()?),
            0xD0 => {
                let ty = match r.read_u8()? {
                    0x70 => RefType::FuncRef,
                    0x6F => RefType::ExternRef,
                    _ => return Err(Error::malformed("invalid reftype in ref.null")),
                };
                ConstExpr::RefNull(ty)
            }
            0xD2 => {
                let idx = r.read_u32_leb()?;
                if idx >= num_funcs {
                    return Err(Error::validation("ref.func index out of range"));
                }
                ConstExpr::RefFunc(idx)
            }
            0x23 => {
                let idx = r.read_u32_leb()?;
                let global = imported_globals
                    .get(idx as usize)
                    .ok_or_else(|| Error::validation("global.get index out of range"))?;
                if global.mutable {
                    return Err(Error::validation(
                        "constant expression referenced a mutable global",
                    ));
                }
                ConstExpr::GlobalGet(idx)
            }
            _ => return Err(Error::validation("illegal instruction in constant expression")),
        };
        if r.read_u8()? != 0x0B {
            return Err(Error::validation(
                "constant expression must contain exactly one instruction before `end`",
            ));
        }
        Ok(expr)
    }

    /// Evaluates the expression. `imported_globals` supplies the (always
    /// zero-valued placeholder, see DESIGN.md) value of an imported global
    /// referenced by `global.get`.
    pub fn eval(&self, imported_globals: &[GlobalType]) -> Value {
        match *self {
            ConstExpr::I32Const(v) => Value::I32(v),
            ConstExpr::I64Const(v) => Value::I64(v),
            ConstExpr::F32Const(v) => Value::F32(v),
            ConstExpr::F64Const(v) => Value::F64(v),
            ConstExpr::RefNull(RefType::FuncRef) => Value::FuncRef(None),
            ConstExpr::RefNull(RefType::ExternRef) => Value::ExternRef(None),
            ConstExpr::RefFunc(idx) => Value::FuncRef(Some(idx)),
            ConstExpr::GlobalGet(idx) => match imported_globals[idx as usize].val_type {
                ValType::I32 => Value::I32(0),
                ValType::I64 => Value::I64(0),
                ValType::F32 => Value::F32(0.0),
                ValType::F64 => Value::F64(0.0),
                ValType::FuncRef => Value::FuncRef(None),
                ValType::ExternRef => Value::ExternRef(None),
                #[cfg(feature = "simd")]
                ValType::V128 => unreachable!("globals of type v128 are not supported"),
            },
        }
    }

    /// Evaluates as an `i32`, for element/data segment offsets.
    pub fn eval_i32_offset(&self, imported_globals: &[GlobalType]) -> Result<i32, Error> {
        match self.eval(imported_globals) {
            Value::I32(v) => Ok(v),
            _ => Err(Error::validation("segment offset must be an i32 expression")),
        }
    }
}
