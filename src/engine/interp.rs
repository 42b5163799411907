//! The instruction dispatch loop (spec §4.4): pulls resolved [`Instr`]
//! values from the active frame's function body and mutates the
//! [`Context`]'s stacks and instance state until the outermost call
//! returns or a trap fires.
//!
//! Grounded on the big-match shape of `src/runner.rs`'s `Interpreter::step`
//! in the teacher's simplest (`v0`) engine — this crate skips that
//! runtime's separate "compile" pass since the validator already produced a
//! flat, target-resolved [`Instr`] stream (see `validate::isa`), so there is
//! one dispatch loop instead of two.

use crate::{
    engine::call_stack::Frame,
    error::{Error, TrapCode},
    float::WasmFloat,
    instance::{elem_item_to_untyped, Context},
    module::func::FuncKind,
    untyped::UntypedValue,
    validate::isa::{BranchTarget, DropKeep, Instr},
    value::RefType,
};

/// Runs `func_idx` to completion against `ctx`.
///
/// The caller (`Context::call`) has already pushed the callee's arguments
/// onto `ctx.value_stack`; this sets up the initial frame, reserves the
/// declared locals, and drives the loop until the call stack empties,
/// leaving the function's results on top of the value stack.
pub fn run(ctx: &mut Context<'_>, func_idx: u32) -> Result<(), Error> {
    enter_call(ctx, func_idx)?;

    loop {
        let frame = *ctx.call_stack.current_mut();
        // `ctx.module` is itself a `&'m Module`: copying it out of `ctx`
        // decouples `local`'s lifetime from `ctx`'s borrow, so it stays
        // valid across the `&mut ctx` instruction handlers below.
        let module = ctx.module;
        let local = match &module.funcs[frame.func_idx as usize] {
            FuncKind::Local(local) => local,
            FuncKind::Imported => return Err(TrapCode::UnresolvedImport.into()),
        };

        if frame.pc as usize == local.code.len() {
            // Implicit return: the validator guarantees the operand stack
            // holds exactly the function's results above its locals.
            let num_locals = local.num_locals(num_params(ctx, frame.func_idx));
            let num_results =
                module.func_type(frame.func_idx).expect("valid func_idx").results.len() as u32;
            unwind_return(ctx, num_locals, num_results);
            if ctx.call_stack.is_empty() {
                return Ok(());
            }
            continue;
        }

        let instr = local.code[frame.pc as usize].clone();

        let mut advance = true;
        match instr {
            Instr::Unreachable => return Err(TrapCode::Unreachable.into()),
            Instr::Drop => {
                ctx.value_stack.pop();
            }
            Instr::Select => {
                let cond = ctx.value_stack.pop();
                let b = ctx.value_stack.pop();
                let a = ctx.value_stack.pop();
                ctx.value_stack
                    .push(if u32::from(cond) != 0 { a } else { b })
                    .map_err(Error::from)?;
            }
            Instr::SelectTyped(_) => {
                let cond = ctx.value_stack.pop();
                let b = ctx.value_stack.pop();
                let a = ctx.value_stack.pop();
                ctx.value_stack
                    .push(if u32::from(cond) != 0 { a } else { b })
                    .map_err(Error::from)?;
            }

            Instr::LocalGet(idx) => {
                let v = ctx.value_stack.get(frame.locals_base as usize + idx as usize);
                ctx.value_stack.push(v).map_err(Error::from)?;
            }
            Instr::LocalSet(idx) => {
                let v = ctx.value_stack.pop();
                ctx.value_stack.set(frame.locals_base as usize + idx as usize, v);
            }
            Instr::LocalTee(idx) => {
                let v = ctx.value_stack.top();
                ctx.value_stack.set(frame.locals_base as usize + idx as usize, v);
            }
            Instr::GlobalGet(idx) => {
                ctx.value_stack.push(ctx.globals[idx as usize]).map_err(Error::from)?;
            }
            Instr::GlobalSet(idx) => {
                let v = ctx.value_stack.pop();
                ctx.globals[idx as usize] = v;
            }

            Instr::I32Const(v) => ctx.value_stack.push(v.into()).map_err(Error::from)?,
            Instr::I64Const(v) => ctx.value_stack.push(v.into()).map_err(Error::from)?,
            Instr::F32Const(v) => ctx.value_stack.push(v.into()).map_err(Error::from)?,
            Instr::F64Const(v) => ctx.value_stack.push(v.into()).map_err(Error::from)?,

            Instr::RefNull(ty) => ctx
                .value_stack
                .push(UntypedValue::from_ref(crate::value::Ref::null(ty)))
                .map_err(Error::from)?,
            Instr::RefIsNull => {
                let v = ctx.value_stack.pop();
                ctx.value_stack.push((v.is_null_ref() as u32).into()).map_err(Error::from)?;
            }
            Instr::RefFunc(idx) => ctx
                .value_stack
                .push(UntypedValue::from_ref(crate::value::Ref::Func(Some(idx))))
                .map_err(Error::from)?,

            Instr::Br(target) => {
                apply_branch(ctx, target);
                advance = false;
            }
            Instr::BrIfNez(target) => {
                let cond = ctx.value_stack.pop();
                if u32::from(cond) != 0 {
                    apply_branch(ctx, target);
                    advance = false;
                }
            }
            Instr::BrIfEqz(target) => {
                let cond = ctx.value_stack.pop();
                if u32::from(cond) == 0 {
                    apply_branch(ctx, target);
                    advance = false;
                }
            }
            Instr::BrTable { targets, default } => {
                let idx = u32::from(ctx.value_stack.pop()) as usize;
                let target = targets.get(idx).copied().unwrap_or(default);
                apply_branch(ctx, target);
                advance = false;
            }
            Instr::Return(dk) => {
                let num_locals = local.num_locals(num_params(ctx, frame.func_idx));
                unwind_return(ctx, num_locals + dk.drop, dk.keep);
                if ctx.call_stack.is_empty() {
                    return Ok(());
                }
                advance = false;
            }
            Instr::Call(callee_idx) => {
                // Record the resume point in the *caller's* frame before
                // pushing the callee's, since the callee's frame becomes
                // `current_mut()` immediately afterwards.
                ctx.call_stack.current_mut().pc = frame.pc + 1;
                enter_call(ctx, callee_idx)?;
                advance = false;
            }
            Instr::CallIndirect { type_idx, table_idx } => {
                let elem_idx = u32::from(ctx.value_stack.pop());
                let table = ctx
                    .tables
                    .get(table_idx as usize)
                    .ok_or(TrapCode::TableOutOfBounds)?;
                let cell = *table
                    .elems
                    .get(elem_idx as usize)
                    .ok_or(TrapCode::TableOutOfBounds)?;
                if cell.is_null_ref() {
                    return Err(TrapCode::UninitializedElement.into());
                }
                let callee_idx = match cell.into_ref(RefType::FuncRef) {
                    crate::value::Ref::Func(Some(idx)) => idx,
                    _ => return Err(TrapCode::UninitializedElement.into()),
                };
                let declared = &ctx.module.types[type_idx as usize];
                let actual = ctx
                    .module
                    .func_type(callee_idx)
                    .expect("table only ever holds valid function indices");
                if declared != actual {
                    return Err(TrapCode::IndirectCallTypeMismatch.into());
                }
                ctx.call_stack.current_mut().pc = frame.pc + 1;
                enter_call(ctx, callee_idx)?;
                advance = false;
            }

            Instr::I32Clz => unary_i32(ctx, |v| v.leading_zeros() as i32),
            Instr::I32Ctz => unary_i32(ctx, |v| v.trailing_zeros() as i32),
            Instr::I32Popcnt => unary_i32(ctx, |v| v.count_ones() as i32),
            Instr::I32Add => binary_i32(ctx, |a, b| a.wrapping_add(b)),
            Instr::I32Sub => binary_i32(ctx, |a, b| a.wrapping_sub(b)),
            Instr::I32Mul => binary_i32(ctx, |a, b| a.wrapping_mul(b)),
            Instr::I32DivS => {
                let b: i32 = ctx.value_stack.pop().into();
                let a: i32 = ctx.value_stack.pop().into();
                if b == 0 {
                    return Err(TrapCode::DivisionByZero.into());
                }
                if a == i32::MIN && b == -1 {
                    return Err(TrapCode::IntegerOverflow.into());
                }
                ctx.value_stack.push((a.wrapping_div(b)).into()).map_err(Error::from)?;
            }
            Instr::I32DivU => {
                let b: u32 = ctx.value_stack.pop().into();
                let a: u32 = ctx.value_stack.pop().into();
                if b == 0 {
                    return Err(TrapCode::DivisionByZero.into());
                }
                ctx.value_stack.push((a / b).into()).map_err(Error::from)?;
            }
            Instr::I32RemS => {
                let b: i32 = ctx.value_stack.pop().into();
                let a: i32 = ctx.value_stack.pop().into();
                if b == 0 {
                    return Err(TrapCode::DivisionByZero.into());
                }
                let r = if b == -1 { 0 } else { a.wrapping_rem(b) };
                ctx.value_stack.push(r.into()).map_err(Error::from)?;
            }
            Instr::I32RemU => {
                let b: u32 = ctx.value_stack.pop().into();
                let a: u32 = ctx.value_stack.pop().into();
                if b == 0 {
                    return Err(TrapCode::DivisionByZero.into());
                }
                ctx.value_stack.push((a % b).into()).map_err(Error::from)?;
            }
            Instr::I32And => binary_i32(ctx, |a, b| a & b),
            Instr::I32Or => binary_i32(ctx, |a, b| a | b),
            Instr::I32Xor => binary_i32(ctx, |a, b| a ^ b),
            Instr::I32Shl => binary_u32(ctx, |a, b| a.wrapping_shl(b & 31)),
            Instr::I32ShrS => {
                let b: u32 = ctx.value_stack.pop().into();
                let a: i32 = ctx.value_stack.pop().into();
                ctx.value_stack.push(a.wrapping_shr(b & 31).into()).map_err(Error::from)?;
            }
            Instr::I32ShrU => binary_u32(ctx, |a, b| a.wrapping_shr(b & 31)),
            Instr::I32Rotl => binary_u32(ctx, |a, b| a.rotate_left(b & 31)),
            Instr::I32Rotr => binary_u32(ctx, |a, b| a.rotate_right(b & 31)),
            Instr::I32Eqz => unary_bool_i32(ctx, |a| a == 0),
            Instr::I32Eq => binary_bool_i32(ctx, |a, b| a == b),
            Instr::I32Ne => binary_bool_i32(ctx, |a, b| a != b),
            Instr::I32LtS => binary_bool_i32s(ctx, |a, b| a < b),
            Instr::I32LtU => binary_bool_u32(ctx, |a, b| a < b),
            Instr::I32GtS => binary_bool_i32s(ctx, |a, b| a > b),
            Instr::I32GtU => binary_bool_u32(ctx, |a, b| a > b),
            Instr::I32LeS => binary_bool_i32s(ctx, |a, b| a <= b),
            Instr::I32LeU => binary_bool_u32(ctx, |a, b| a <= b),
            Instr::I32GeS => binary_bool_i32s(ctx, |a, b| a >= b),
            Instr::I32GeU => binary_bool_u32(ctx, |a, b| a >= b),

            Instr::I64Clz => unary_i64(ctx, |v| v.leading_zeros() as i64),
            Instr::I64Ctz => unary_i64(ctx, |v| v.trailing_zeros() as i64),
            Instr::I64Popcnt => unary_i64(ctx, |v| v.count_ones() as i64),
            Instr::I64Add => binary_i64(ctx, |a, b| a.wrapping_add(b)),
            Instr::I64Sub => binary_i64(ctx, |a, b| a.wrapping_sub(b)),
            Instr::I64Mul => binary_i64(ctx, |a, b| a.wrapping_mul(b)),
            Instr::I64DivS => {
                let b: i64 = ctx.value_stack.pop().into();
                let a: i64 = ctx.value_stack.pop().into();
                if b == 0 {
                    return Err(TrapCode::DivisionByZero.into());
                }
                if a == i64::MIN && b == -1 {
                    return Err(TrapCode::IntegerOverflow.into());
                }
                ctx.value_stack.push((a.wrapping_div(b)).into()).map_err(Error::from)?;
            }
            Instr::I64DivU => {
                let b: u64 = ctx.value_stack.pop().into();
                let a: u64 = ctx.value_stack.pop().into();
                if b == 0 {
                    return Err(TrapCode::DivisionByZero.into());
                }
                ctx.value_stack.push((a / b).into()).map_err(Error::from)?;
            }
            Instr::I64RemS => {
                let b: i64 = ctx.value_stack.pop().into();
                let a: i64 = ctx.value_stack.pop().into();
                if b == 0 {
                    return Err(TrapCode::DivisionByZero.into());
                }
                let r = if b == -1 { 0 } else { a.wrapping_rem(b) };
                ctx.value_stack.push(r.into()).map_err(Error::from)?;
            }
            Instr::I64RemU => {
                let b: u64 = ctx.value_stack.pop().into();
                let a: u64 = ctx.value_stack.pop().into();
                if b == 0 {
                    return Err(TrapCode::DivisionByZero.into());
                }
                ctx.value_stack.push((a % b).into()).map_err(Error::from)?;
            }
            Instr::I64And => binary_i64(ctx, |a, b| a & b),
            Instr::I64Or => binary_i64(ctx, |a, b| a | b),
            Instr::I64Xor => binary_i64(ctx, |a, b| a ^ b),
            Instr::I64Shl => binary_u64(ctx, |a, b| a.wrapping_shl((b & 63) as u32)),
            Instr::I64ShrS => {
                let b: u64 = ctx.value_stack.pop().into();
                let a: i64 = ctx.value_stack.pop().into();
                ctx.value_stack
                    .push(a.wrapping_shr((b & 63) as u32).into())
                    .map_err(Error::from)?;
            }
            Instr::I64ShrU => binary_u64(ctx, |a, b| a.wrapping_shr((b & 63) as u32)),
            Instr::I64Rotl => binary_u64(ctx, |a, b| a.rotate_left((b & 63) as u32)),
            Instr::I64Rotr => binary_u64(ctx, |a, b| a.rotate_right((b & 63) as u32)),
            Instr::I64Eqz => unary_bool_i64(ctx, |a| a == 0),
            Instr::I64Eq => binary_bool_i64(ctx, |a, b| a == b),
            Instr::I64Ne => binary_bool_i64(ctx, |a, b| a != b),
            Instr::I64LtS => binary_bool_i64s(ctx, |a, b| a < b),
            Instr::I64LtU => binary_bool_u64(ctx, |a, b| a < b),
            Instr::I64GtS => binary_bool_i64s(ctx, |a, b| a > b),
            Instr::I64GtU => binary_bool_u64(ctx, |a, b| a > b),
            Instr::I64LeS => binary_bool_i64s(ctx, |a, b| a <= b),
            Instr::I64LeU => binary_bool_u64(ctx, |a, b| a <= b),
            Instr::I64GeS => binary_bool_i64s(ctx, |a, b| a >= b),
            Instr::I64GeU => binary_bool_u64(ctx, |a, b| a >= b),

            Instr::F32Abs => unary_f32(ctx, WasmFloat::wasm_abs),
            Instr::F32Neg => unary_f32(ctx, WasmFloat::wasm_neg),
            Instr::F32Ceil => unary_f32(ctx, WasmFloat::wasm_ceil),
            Instr::F32Floor => unary_f32(ctx, WasmFloat::wasm_floor),
            Instr::F32Trunc => unary_f32(ctx, WasmFloat::wasm_trunc),
            Instr::F32Nearest => unary_f32(ctx, WasmFloat::wasm_nearest),
            Instr::F32Sqrt => unary_f32(ctx, WasmFloat::wasm_sqrt),
            Instr::F32Add => binary_f32(ctx, |a, b| (a + b).canonicalize_nan()),
            Instr::F32Sub => binary_f32(ctx, |a, b| (a - b).canonicalize_nan()),
            Instr::F32Mul => binary_f32(ctx, |a, b| (a * b).canonicalize_nan()),
            Instr::F32Div => binary_f32(ctx, |a, b| (a / b).canonicalize_nan()),
            Instr::F32Min => binary_f32(ctx, WasmFloat::wasm_min),
            Instr::F32Max => binary_f32(ctx, WasmFloat::wasm_max),
            Instr::F32Copysign => binary_f32(ctx, WasmFloat::wasm_copysign),
            Instr::F64Abs => unary_f64(ctx, WasmFloat::wasm_abs),
            Instr::F64Neg => unary_f64(ctx, WasmFloat::wasm_neg),
            Instr::F64Ceil => unary_f64(ctx, WasmFloat::wasm_ceil),
            Instr::F64Floor => unary_f64(ctx, WasmFloat::wasm_floor),
            Instr::F64Trunc => unary_f64(ctx, WasmFloat::wasm_trunc),
            Instr::F64Nearest => unary_f64(ctx, WasmFloat::wasm_nearest),
            Instr::F64Sqrt => unary_f64(ctx, WasmFloat::wasm_sqrt),
            Instr::F64Add => binary_f64(ctx, |a, b| (a + b).canonicalize_nan()),
            Instr::F64Sub => binary_f64(ctx, |a, b| (a - b).canonicalize_nan()),
            Instr::F64Mul => binary_f64(ctx, |a, b| (a * b).canonicalize_nan()),
            Instr::F64Div => binary_f64(ctx, |a, b| (a / b).canonicalize_nan()),
            Instr::F64Min => binary_f64(ctx, WasmFloat::wasm_min),
            Instr::F64Max => binary_f64(ctx, WasmFloat::wasm_max),
            Instr::F64Copysign => binary_f64(ctx, WasmFloat::wasm_copysign),

            Instr::F32Eq => binary_bool_f32(ctx, |a, b| a == b),
            Instr::F32Ne => binary_bool_f32(ctx, |a, b| a != b),
            Instr::F32Lt => binary_bool_f32(ctx, |a, b| a < b),
            Instr::F32Gt => binary_bool_f32(ctx, |a, b| a > b),
            Instr::F32Le => binary_bool_f32(ctx, |a, b| a <= b),
            Instr::F32Ge => binary_bool_f32(ctx, |a, b| a >= b),
            Instr::F64Eq => binary_bool_f64(ctx, |a, b| a == b),
            Instr::F64Ne => binary_bool_f64(ctx, |a, b| a != b),
            Instr::F64Lt => binary_bool_f64(ctx, |a, b| a < b),
            Instr::F64Gt => binary_bool_f64(ctx, |a, b| a > b),
            Instr::F64Le => binary_bool_f64(ctx, |a, b| a <= b),
            Instr::F64Ge => binary_bool_f64(ctx, |a, b| a >= b),

            Instr::I32WrapI64 => {
                let v: i64 = ctx.value_stack.pop().into();
                ctx.value_stack.push((v as i32).into()).map_err(Error::from)?;
            }
            Instr::I64ExtendI32S => {
                let v: i32 = ctx.value_stack.pop().into();
                ctx.value_stack.push((v as i64).into()).map_err(Error::from)?;
            }
            Instr::I64ExtendI32U => {
                let v: u32 = ctx.value_stack.pop().into();
                ctx.value_stack.push((v as u64).into()).map_err(Error::from)?;
            }
            Instr::I32TruncF32S => {
                let v: f32 = ctx.value_stack.pop().into();
                let r = checked_trunc_i32(v as f64)?;
                ctx.value_stack.push(r.into()).map_err(Error::from)?;
            }
            Instr::I32TruncF32U => {
                let v: f32 = ctx.value_stack.pop().into();
                let r = checked_trunc_u32(v as f64)?;
                ctx.value_stack.push(r.into()).map_err(Error::from)?;
            }
            Instr::I32TruncF64S => {
                let v: f64 = ctx.value_stack.pop().into();
                let r = checked_trunc_i32(v)?;
                ctx.value_stack.push(r.into()).map_err(Error::from)?;
            }
            Instr::I32TruncF64U => {
                let v: f64 = ctx.value_stack.pop().into();
                let r = checked_trunc_u32(v)?;
                ctx.value_stack.push(r.into()).map_err(Error::from)?;
            }
            Instr::I64TruncF32S => {
                let v: f32 = ctx.value_stack.pop().into();
                let r = checked_trunc_i64(v as f64)?;
                ctx.value_stack.push(r.into()).map_err(Error::from)?;
            }
            Instr::I64TruncF32U => {
                let v: f32 = ctx.value_stack.pop().into();
                let r = checked_trunc_u64(v as f64)?;
                ctx.value_stack.push(r.into()).map_err(Error::from)?;
            }
            Instr::I64TruncF64S => {
                let v: f64 = ctx.value_stack.pop().into();
                let r = checked_trunc_i64(v)?;
                ctx.value_stack.push(r.into()).map_err(Error::from)?;
            }
            Instr::I64TruncF64U => {
                let v: f64 = ctx.value_stack.pop().into();
                let r = checked_trunc_u64(v)?;
                ctx.value_stack.push(r.into()).map_err(Error::from)?;
            }
            Instr::F32ConvertI32S => {
                let v: i32 = ctx.value_stack.pop().into();
                ctx.value_stack.push((v as f32).into()).map_err(Error::from)?;
            }
            Instr::F32ConvertI32U => {
                let v: u32 = ctx.value_stack.pop().into();
                ctx.value_stack.push((v as f32).into()).map_err(Error::from)?;
            }
            Instr::F32ConvertI64S => {
                let v: i64 = ctx.value_stack.pop().into();
                ctx.value_stack.push((v as f32).into()).map_err(Error::from)?;
            }
            Instr::F32ConvertI64U => {
                let v: u64 = ctx.value_stack.pop().into();
                ctx.value_stack.push((v as f32).into()).map_err(Error::from)?;
            }
            Instr::F64ConvertI32S => {
                let v: i32 = ctx.value_stack.pop().into();
                ctx.value_stack.push((v as f64).into()).map_err(Error::from)?;
            }
            Instr::F64ConvertI32U => {
                let v: u32 = ctx.value_stack.pop().into();
                ctx.value_stack.push((v as f64).into()).map_err(Error::from)?;
            }
            Instr::F64ConvertI64S => {
                let v: i64 = ctx.value_stack.pop().into();
                ctx.value_stack.push((v as f64).into()).map_err(Error::from)?;
            }
            Instr::F64ConvertI64U => {
                let v: u64 = ctx.value_stack.pop().into();
                ctx.value_stack.push((v as f64).into()).map_err(Error::from)?;
            }
            Instr::F32DemoteF64 => {
                let v: f64 = ctx.value_stack.pop().into();
                ctx.value_stack.push((v as f32).into()).map_err(Error::from)?;
            }
            Instr::F64PromoteF32 => {
                let v: f32 = ctx.value_stack.pop().into();
                ctx.value_stack.push((v as f64).into()).map_err(Error::from)?;
            }
            Instr::I32ReinterpretF32 => {
                let v: f32 = ctx.value_stack.pop().into();
                ctx.value_stack.push(v.to_bits().into()).map_err(Error::from)?;
            }
            Instr::I64ReinterpretF64 => {
                let v: f64 = ctx.value_stack.pop().into();
                ctx.value_stack.push(v.to_bits().into()).map_err(Error::from)?;
            }
            Instr::F32ReinterpretI32 => {
                let v: u32 = ctx.value_stack.pop().into();
                ctx.value_stack.push(f32::from_bits(v).into()).map_err(Error::from)?;
            }
            Instr::F64ReinterpretI64 => {
                let v: u64 = ctx.value_stack.pop().into();
                ctx.value_stack.push(f64::from_bits(v).into()).map_err(Error::from)?;
            }

            Instr::I32Extend8S => unary_i32(ctx, |v| v as i8 as i32),
            Instr::I32Extend16S => unary_i32(ctx, |v| v as i16 as i32),
            Instr::I64Extend8S => unary_i64(ctx, |v| v as i8 as i64),
            Instr::I64Extend16S => unary_i64(ctx, |v| v as i16 as i64),
            Instr::I64Extend32S => unary_i64(ctx, |v| v as i32 as i64),

            Instr::I32TruncSatF32S => {
                let v: f32 = ctx.value_stack.pop().into();
                ctx.value_stack.push(sat_trunc_i32(v as f64).into()).expect("no growth");
            }
            Instr::I32TruncSatF32U => {
                let v: f32 = ctx.value_stack.pop().into();
                ctx.value_stack.push(sat_trunc_u32(v as f64).into()).expect("no growth");
            }
            Instr::I32TruncSatF64S => {
                let v: f64 = ctx.value_stack.pop().into();
                ctx.value_stack.push(sat_trunc_i32(v).into()).expect("no growth");
            }
            Instr::I32TruncSatF64U => {
                let v: f64 = ctx.value_stack.pop().into();
                ctx.value_stack.push(sat_trunc_u32(v).into()).expect("no growth");
            }
            Instr::I64TruncSatF32S => {
                let v: f32 = ctx.value_stack.pop().into();
                ctx.value_stack.push(sat_trunc_i64(v as f64).into()).expect("no growth");
            }
            Instr::I64TruncSatF32U => {
                let v: f32 = ctx.value_stack.pop().into();
                ctx.value_stack.push(sat_trunc_u64(v as f64).into()).expect("no growth");
            }
            Instr::I64TruncSatF64S => {
                let v: f64 = ctx.value_stack.pop().into();
                ctx.value_stack.push(sat_trunc_i64(v).into()).expect("no growth");
            }
            Instr::I64TruncSatF64U => {
                let v: f64 = ctx.value_stack.pop().into();
                ctx.value_stack.push(sat_trunc_u64(v).into()).expect("no growth");
            }

            Instr::I32Load { offset } => load(ctx, offset, 4, |b| {
                i32::from_le_bytes(b.try_into().unwrap()).into()
            })?,
            Instr::I64Load { offset } => load(ctx, offset, 8, |b| {
                i64::from_le_bytes(b.try_into().unwrap()).into()
            })?,
            Instr::F32Load { offset } => load(ctx, offset, 4, |b| {
                f32::from_le_bytes(b.try_into().unwrap()).into()
            })?,
            Instr::F64Load { offset } => load(ctx, offset, 8, |b| {
                f64::from_le_bytes(b.try_into().unwrap()).into()
            })?,
            Instr::I32Load8S { offset } => load(ctx, offset, 1, |b| (b[0] as i8 as i32).into())?,
            Instr::I32Load8U { offset } => load(ctx, offset, 1, |b| (b[0] as u32).into())?,
            Instr::I32Load16S { offset } => load(ctx, offset, 2, |b| {
                (i16::from_le_bytes(b.try_into().unwrap()) as i32).into()
            })?,
            Instr::I32Load16U { offset } => load(ctx, offset, 2, |b| {
                (u16::from_le_bytes(b.try_into().unwrap()) as u32).into()
            })?,
            Instr::I64Load8S { offset } => load(ctx, offset, 1, |b| (b[0] as i8 as i64).into())?,
            Instr::I64Load8U { offset } => load(ctx, offset, 1, |b| (b[0] as u64).into())?,
            Instr::I64Load16S { offset } => load(ctx, offset, 2, |b| {
                (i16::from_le_bytes(b.try_into().unwrap()) as i64).into()
            })?,
            Instr::I64Load16U { offset } => load(ctx, offset, 2, |b| {
                (u16::from_le_bytes(b.try_into().unwrap()) as u64).into()
            })?,
            Instr::I64Load32S { offset } => load(ctx, offset, 4, |b| {
                (i32::from_le_bytes(b.try_into().unwrap()) as i64).into()
            })?,
            Instr::I64Load32U { offset } => load(ctx, offset, 4, |b| {
                (u32::from_le_bytes(b.try_into().unwrap()) as u64).into()
            })?,
            Instr::I32Store { offset } => store(ctx, offset, 4, |v, out| {
                out.copy_from_slice(&i32::from(v).to_le_bytes())
            })?,
            Instr::I64Store { offset } => store(ctx, offset, 8, |v, out| {
                out.copy_from_slice(&i64::from(v).to_le_bytes())
            })?,
            Instr::F32Store { offset } => store(ctx, offset, 4, |v, out| {
                out.copy_from_slice(&f32::from(v).to_le_bytes())
            })?,
            Instr::F64Store { offset } => store(ctx, offset, 8, |v, out| {
                out.copy_from_slice(&f64::from(v).to_le_bytes())
            })?,
            Instr::I32Store8 { offset } => {
                store(ctx, offset, 1, |v, out| out[0] = u32::from(v) as u8)?
            }
            Instr::I32Store16 { offset } => store(ctx, offset, 2, |v, out| {
                out.copy_from_slice(&(u32::from(v) as u16).to_le_bytes())
            })?,
            Instr::I64Store8 { offset } => {
                store(ctx, offset, 1, |v, out| out[0] = u64::from(v) as u8)?
            }
            Instr::I64Store16 { offset } => store(ctx, offset, 2, |v, out| {
                out.copy_from_slice(&(u64::from(v) as u16).to_le_bytes())
            })?,
            Instr::I64Store32 { offset } => store(ctx, offset, 4, |v, out| {
                out.copy_from_slice(&(u64::from(v) as u32).to_le_bytes())
            })?,

            Instr::MemorySize => {
                let pages = ctx.memory.as_ref().expect("validated memory present").size_pages();
                ctx.value_stack.push((pages as i32).into()).map_err(Error::from)?;
            }
            Instr::MemoryGrow => {
                let delta: u32 = ctx.value_stack.pop().into();
                let memory = ctx.memory.as_mut().expect("validated memory present");
                let result = memory.grow(delta).map(|old| old as i32).unwrap_or(-1);
                ctx.value_stack.push(result.into()).map_err(Error::from)?;
            }

            Instr::MemoryInit(data_idx) => {
                let n = u32::from(ctx.value_stack.pop()) as usize;
                let src = u32::from(ctx.value_stack.pop()) as usize;
                let dst = u32::from(ctx.value_stack.pop()) as usize;
                let data = ctx.data_segments[data_idx as usize]
                    .as_ref()
                    .ok_or(TrapCode::MemoryOutOfBounds)?;
                let src_end = src.checked_add(n).ok_or(TrapCode::MemoryOutOfBounds)?;
                if src_end > data.len() {
                    return Err(TrapCode::MemoryOutOfBounds.into());
                }
                let chunk = data[src..src_end].to_vec();
                let memory = ctx.memory.as_mut().expect("validated memory present");
                let dst_end = dst.checked_add(n).ok_or(TrapCode::MemoryOutOfBounds)?;
                if dst_end > memory.data.len() {
                    return Err(TrapCode::MemoryOutOfBounds.into());
                }
                memory.data[dst..dst_end].copy_from_slice(&chunk);
            }
            Instr::DataDrop(data_idx) => {
                ctx.data_segments[data_idx as usize] = None;
            }
            Instr::MemoryCopy => {
                let n = u32::from(ctx.value_stack.pop()) as usize;
                let src = u32::from(ctx.value_stack.pop()) as usize;
                let dst = u32::from(ctx.value_stack.pop()) as usize;
                let memory = ctx.memory.as_mut().expect("validated memory present");
                let src_end = src.checked_add(n).ok_or(TrapCode::MemoryOutOfBounds)?;
                let dst_end = dst.checked_add(n).ok_or(TrapCode::MemoryOutOfBounds)?;
                if src_end > memory.data.len() || dst_end > memory.data.len() {
                    return Err(TrapCode::MemoryOutOfBounds.into());
                }
                memory.data.copy_within(src..src_end, dst);
            }
            Instr::MemoryFill => {
                let n = u32::from(ctx.value_stack.pop()) as usize;
                let val = u32::from(ctx.value_stack.pop()) as u8;
                let dst = u32::from(ctx.value_stack.pop()) as usize;
                let memory = ctx.memory.as_mut().expect("validated memory present");
                let dst_end = dst.checked_add(n).ok_or(TrapCode::MemoryOutOfBounds)?;
                if dst_end > memory.data.len() {
                    return Err(TrapCode::MemoryOutOfBounds.into());
                }
                memory.data[dst..dst_end].fill(val);
            }

            Instr::TableInit { table, elem } => {
                let n = u32::from(ctx.value_stack.pop()) as usize;
                let src = u32::from(ctx.value_stack.pop()) as usize;
                let dst = u32::from(ctx.value_stack.pop()) as usize;
                let elem_ty = ctx.module.elements[elem as usize].element_type;
                let items = ctx.elem_segments[elem as usize]
                    .as_ref()
                    .ok_or(TrapCode::TableOutOfBounds)?;
                let src_end = src.checked_add(n).ok_or(TrapCode::TableOutOfBounds)?;
                if src_end > items.len() {
                    return Err(TrapCode::TableOutOfBounds.into());
                }
                let chunk: alloc::vec::Vec<_> = items[src..src_end]
                    .iter()
                    .map(|it| elem_item_to_untyped(*it, elem_ty))
                    .collect();
                let table = &mut ctx.tables[table as usize];
                let dst_end = dst.checked_add(n).ok_or(TrapCode::TableOutOfBounds)?;
                if dst_end > table.elems.len() {
                    return Err(TrapCode::TableOutOfBounds.into());
                }
                table.elems[dst..dst_end].copy_from_slice(&chunk);
            }
            Instr::ElemDrop(elem_idx) => {
                ctx.elem_segments[elem_idx as usize] = None;
            }
            Instr::TableCopy { dst, src } => {
                let n = u32::from(ctx.value_stack.pop()) as usize;
                let src_off = u32::from(ctx.value_stack.pop()) as usize;
                let dst_off = u32::from(ctx.value_stack.pop()) as usize;
                let src_end = src_off.checked_add(n).ok_or(TrapCode::TableOutOfBounds)?;
                let dst_end = dst_off.checked_add(n).ok_or(TrapCode::TableOutOfBounds)?;
                if src_end > ctx.tables[src as usize].elems.len()
                    || dst_end > ctx.tables[dst as usize].elems.len()
                {
                    return Err(TrapCode::TableOutOfBounds.into());
                }
                if src == dst {
                    ctx.tables[dst as usize].elems.copy_within(src_off..src_end, dst_off);
                } else {
                    let chunk = ctx.tables[src as usize].elems[src_off..src_end].to_vec();
                    ctx.tables[dst as usize].elems[dst_off..dst_end].copy_from_slice(&chunk);
                }
            }
            Instr::TableGrow(idx) => {
                let delta = u32::from(ctx.value_stack.pop());
                let init = ctx.value_stack.pop();
                let table = &mut ctx.tables[idx as usize];
                let result = table.grow(delta, init).map(|old| old as i32).unwrap_or(-1);
                ctx.value_stack.push(result.into()).map_err(Error::from)?;
            }
            Instr::TableSize(idx) => {
                let size = ctx.tables[idx as usize].size();
                ctx.value_stack.push((size as i32).into()).map_err(Error::from)?;
            }
            Instr::TableFill(idx) => {
                let n = u32::from(ctx.value_stack.pop()) as usize;
                let val = ctx.value_stack.pop();
                let offset = u32::from(ctx.value_stack.pop()) as usize;
                let table = &mut ctx.tables[idx as usize];
                let end = offset.checked_add(n).ok_or(TrapCode::TableOutOfBounds)?;
                if end > table.elems.len() {
                    return Err(TrapCode::TableOutOfBounds.into());
                }
                table.elems[offset..end].fill(val);
            }
            Instr::TableGet(idx) => {
                let i = u32::from(ctx.value_stack.pop()) as usize;
                let v = *ctx
                    .tables
                    .get(idx as usize)
                    .and_then(|t| t.elems.get(i))
                    .ok_or(TrapCode::TableOutOfBounds)?;
                ctx.value_stack.push(v).map_err(Error::from)?;
            }
            Instr::TableSet(idx) => {
                let v = ctx.value_stack.pop();
                let i = u32::from(ctx.value_stack.pop()) as usize;
                let table = ctx.tables.get_mut(idx as usize).ok_or(TrapCode::TableOutOfBounds)?;
                if i >= table.elems.len() {
                    return Err(TrapCode::TableOutOfBounds.into());
                }
                table.elems[i] = v;
            }

            #[cfg(feature = "simd")]
            Instr::V128Const(bits) => ctx
                .value_stack
                .push(UntypedValue::from_u128(bits))
                .map_err(Error::from)?,
            #[cfg(feature = "simd")]
            Instr::V128Load { offset } => crate::engine::simd::exec_v128_load(ctx, offset)?,
            #[cfg(feature = "simd")]
            Instr::V128Store { offset } => crate::engine::simd::exec_v128_store(ctx, offset)?,
            #[cfg(feature = "simd")]
            Instr::Simd(op) => crate::engine::simd::exec(ctx, op)?,
        }

        if advance {
            ctx.call_stack.current_mut().pc = frame.pc + 1;
        }
    }
}

/// Pushes a new call frame for `func_idx`, reserving its declared locals.
/// Traps immediately (without pushing a frame) for an unresolved import.
fn enter_call(ctx: &mut Context<'_>, func_idx: u32) -> Result<(), Error> {
    match &ctx.module.funcs[func_idx as usize] {
        FuncKind::Imported => Err(TrapCode::UnresolvedImport.into()),
        FuncKind::Local(local) => {
            let num_params = ctx.module.func_type(func_idx).expect("valid func_idx").params.len();
            let locals_base = (ctx.value_stack.len() - num_params) as u32;
            ctx.call_stack
                .push(Frame { func_idx, locals_base, pc: 0 })
                .map_err(Error::from)?;
            ctx.value_stack
                .extend_zeros(local.locals.len())
                .map_err(Error::from)?;
            Ok(())
        }
    }
}

/// Pops the current frame and unwinds the value stack to carry its `keep`
/// results down past `drop` discarded entries (spec §4.4's return/branch
/// unwind, generalized to the whole-frame case by adding the frame's local
/// count to the validator's operand-relative `drop`).
fn unwind_return(ctx: &mut Context<'_>, drop: u32, keep: u32) {
    ctx.value_stack.drop_keep(drop, keep);
    ctx.call_stack.pop();
}

fn apply_branch(ctx: &mut Context<'_>, target: BranchTarget) {
    ctx.value_stack.drop_keep(target.drop_keep.drop, target.drop_keep.keep);
    ctx.call_stack.current_mut().pc = target.pc;
}

fn num_params(ctx: &Context<'_>, func_idx: u32) -> usize {
    ctx.module.func_type(func_idx).expect("valid func_idx").params.len()
}

// --- numeric helpers -------------------------------------------------

fn unary_i32(ctx: &mut Context<'_>, f: impl FnOnce(i32) -> i32) {
    let v: i32 = ctx.value_stack.pop().into();
    ctx.value_stack.push(f(v).into()).expect("no growth");
}
fn unary_i64(ctx: &mut Context<'_>, f: impl FnOnce(i64) -> i64) {
    let v: i64 = ctx.value_stack.pop().into();
    ctx.value_stack.push(f(v).into()).expect("no growth");
}
fn unary_f32(ctx: &mut Context<'_>, f: impl FnOnce(f32) -> f32) {
    let v: f32 = ctx.value_stack.pop().into();
    ctx.value_stack.push(f(v).into()).expect("no growth");
}
fn unary_f64(ctx: &mut Context<'_>, f: impl FnOnce(f64) -> f64) {
    let v: f64 = ctx.value_stack.pop().into();
    ctx.value_stack.push(f(v).into()).expect("no growth");
}
fn unary_bool_i32(ctx: &mut Context<'_>, f: impl FnOnce(i32) -> bool) {
    let v: i32 = ctx.value_stack.pop().into();
    ctx.value_stack.push((f(v) as u32).into()).expect("no growth");
}
fn unary_bool_i64(ctx: &mut Context<'_>, f: impl FnOnce(i64) -> bool) {
    let v: i64 = ctx.value_stack.pop().into();
    ctx.value_stack.push((f(v) as u32).into()).expect("no growth");
}

fn binary_i32(ctx: &mut Context<'_>, f: impl FnOnce(i32, i32) -> i32) {
    let b: i32 = ctx.value_stack.pop().into();
    let a: i32 = ctx.value_stack.pop().into();
    ctx.value_stack.push(f(a, b).into()).expect("no growth");
}
fn binary_u32(ctx: &mut Context<'_>, f: impl FnOnce(u32, u32) -> u32) {
    let b: u32 = ctx.value_stack.pop().into();
    let a: u32 = ctx.value_stack.pop().into();
    ctx.value_stack.push(f(a, b).into()).expect("no growth");
}
fn binary_i64(ctx: &mut Context<'_>, f: impl FnOnce(i64, i64) -> i64) {
    let b: i64 = ctx.value_stack.pop().into();
    let a: i64 = ctx.value_stack.pop().into();
    ctx.value_stack.push(f(a, b).into()).expect("no growth");
}
fn binary_u64(ctx: &mut Context<'_>, f: impl FnOnce(u64, u64) -> u64) {
    let b: u64 = ctx.value_stack.pop().into();
    let a: u64 = ctx.value_stack.pop().into();
    ctx.value_stack.push(f(a, b).into()).expect("no growth");
}
fn binary_f32(ctx: &mut Context<'_>, f: impl FnOnce(f32, f32) -> f32) {
    let b: f32 = ctx.value_stack.pop().into();
    let a: f32 = ctx.value_stack.pop().into();
    ctx.value_stack.push(f(a, b).into()).expect("no growth");
}
fn binary_f64(ctx: &mut Context<'_>, f: impl FnOnce(f64, f64) -> f64) {
    let b: f64 = ctx.value_stack.pop().into();
    let a: f64 = ctx.value_stack.pop().into();
    ctx.value_stack.push(f(a, b).into()).expect("no growth");
}
fn binary_bool_i32(ctx: &mut Context<'_>, f: impl FnOnce(i32, i32) -> bool) {
    let b: i32 = ctx.value_stack.pop().into();
    let a: i32 = ctx.value_stack.pop().into();
    ctx.value_stack.push((f(a, b) as u32).into()).expect("no growth");
}
fn binary_bool_i32s(ctx: &mut Context<'_>, f: impl FnOnce(i32, i32) -> bool) {
    binary_bool_i32(ctx, f)
}
fn binary_bool_u32(ctx: &mut Context<'_>, f: impl FnOnce(u32, u32) -> bool) {
    let b: u32 = ctx.value_stack.pop().into();
    let a: u32 = ctx.value_stack.pop().into();
    ctx.value_stack.push((f(a, b) as u32).into()).expect("no growth");
}
fn binary_bool_i64(ctx: &mut Context<'_>, f: impl FnOnce(i64, i64) -> bool) {
    let b: i64 = ctx.value_stack.pop().into();
    let a: i64 = ctx.value_stack.pop().into();
    ctx.value_stack.push((f(a, b) as u32).into()).expect("no growth");
}
fn binary_bool_i64s(ctx: &mut Context<'_>, f: impl FnOnce(i64, i64) -> bool) {
    binary_bool_i64(ctx, f)
}
fn binary_bool_u64(ctx: &mut Context<'_>, f: impl FnOnce(u64, u64) -> bool) {
    let b: u64 = ctx.value_stack.pop().into();
    let a: u64 = ctx.value_stack.pop().into();
    ctx.value_stack.push((f(a, b) as u32).into()).expect("no growth");
}
fn binary_bool_f32(ctx: &mut Context<'_>, f: impl FnOnce(f32, f32) -> bool) {
    let b: f32 = ctx.value_stack.pop().into();
    let a: f32 = ctx.value_stack.pop().into();
    ctx.value_stack.push((f(a, b) as u32).into()).expect("no growth");
}
fn binary_bool_f64(ctx: &mut Context<'_>, f: impl FnOnce(f64, f64) -> bool) {
    let b: f64 = ctx.value_stack.pop().into();
    let a: f64 = ctx.value_stack.pop().into();
    ctx.value_stack.push((f(a, b) as u32).into()).expect("no growth");
}

/// Trapping `trunc_f*_s`/`trunc_f*_u` conversions (spec §4.4): NaN, an
/// infinity, or a magnitude outside the destination range all trap with
/// [`TrapCode::InvalidConversionToInteger`]. The source is always widened
/// to `f64` first (exact for both `f32` and `f64` inputs), so one bound
/// check per destination width covers both source widths.
fn checked_trunc_i32(x: f64) -> Result<i32, TrapCode> {
    if x.is_nan() {
        return Err(TrapCode::InvalidConversionToInteger);
    }
    let t = x.trunc();
    if t < -2147483648.0 || t >= 2147483648.0 {
        return Err(TrapCode::InvalidConversionToInteger);
    }
    Ok(t as i32)
}

fn checked_trunc_u32(x: f64) -> Result<u32, TrapCode> {
    if x.is_nan() {
        return Err(TrapCode::InvalidConversionToInteger);
    }
    let t = x.trunc();
    if t < 0.0 || t >= 4294967296.0 {
        return Err(TrapCode::InvalidConversionToInteger);
    }
    Ok(t as u32)
}

fn checked_trunc_i64(x: f64) -> Result<i64, TrapCode> {
    if x.is_nan() {
        return Err(TrapCode::InvalidConversionToInteger);
    }
    let t = x.trunc();
    if t < -9223372036854775808.0 || t >= 9223372036854775808.0 {
        return Err(TrapCode::InvalidConversionToInteger);
    }
    Ok(t as i64)
}

fn checked_trunc_u64(x: f64) -> Result<u64, TrapCode> {
    if x.is_nan() {
        return Err(TrapCode::InvalidConversionToInteger);
    }
    let t = x.trunc();
    if t < 0.0 || t >= 18446744073709551616.0 {
        return Err(TrapCode::InvalidConversionToInteger);
    }
    Ok(t as u64)
}

/// `saturating-float-to-int` conversions (spec §4.2's extension list): NaN
/// saturates to zero, out-of-range magnitudes saturate to the nearest
/// representable bound instead of trapping.
fn sat_trunc_i32(x: f64) -> i32 {
    if x.is_nan() {
        return 0;
    }
    let t = x.trunc();
    if t < -2147483648.0 {
        i32::MIN
    } else if t >= 2147483648.0 {
        i32::MAX
    } else {
        t as i32
    }
}

fn sat_trunc_u32(x: f64) -> u32 {
    if x.is_nan() {
        return 0;
    }
    let t = x.trunc();
    if t < 0.0 {
        0
    } else if t >= 4294967296.0 {
        u32::MAX
    } else {
        t as u32
    }
}

fn sat_trunc_i64(x: f64) -> i64 {
    if x.is_nan() {
        return 0;
    }
    let t = x.trunc();
    if t < -9223372036854775808.0 {
        i64::MIN
    } else if t >= 9223372036854775808.0 {
        i64::MAX
    } else {
        t as i64
    }
}

fn sat_trunc_u64(x: f64) -> u64 {
    if x.is_nan() {
        return 0;
    }
    let t = x.trunc();
    if t < 0.0 {
        0
    } else if t >= 18446744073709551616.0 {
        u64::MAX
    } else {
        t as u64
    }
}

// --- memory access helpers --------------------------------------------

fn effective_address(base: i32, offset: u32) -> u64 {
    (base as u32 as u64) + offset as u64
}

fn load(
    ctx: &mut Context<'_>,
    offset: u32,
    size: usize,
    decode: impl FnOnce(&[u8]) -> UntypedValue,
) -> Result<(), Error> {
    let base: i32 = ctx.value_stack.pop().into();
    let addr = effective_address(base, offset);
    let memory = ctx.memory.as_ref().expect("validated memory present");
    let end = addr.checked_add(size as u64).ok_or(TrapCode::MemoryOutOfBounds)?;
    if end > memory.data.len() as u64 {
        return Err(TrapCode::MemoryOutOfBounds.into());
    }
    let bytes = &memory.data[addr as usize..end as usize];
    ctx.value_stack.push(decode(bytes)).map_err(Error::from)
}

fn store(
    ctx: &mut Context<'_>,
    offset: u32,
    size: usize,
    encode: impl FnOnce(UntypedValue, &mut [u8]),
) -> Result<(), Error> {
    let value = ctx.value_stack.pop();
    let base: i32 = ctx.value_stack.pop().into();
    let addr = effective_address(base, offset);
    let memory = ctx.memory.as_mut().expect("validated memory present");
    let end = addr.checked_add(size as u64).ok_or(TrapCode::MemoryOutOfBounds)?;
    if end > memory.data.len() as u64 {
        return Err(TrapCode::MemoryOutOfBounds.into());
    }
    encode(value, &mut memory.data[addr as usize..end as usize]);
    Ok(())
}
