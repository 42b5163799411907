//! Single-pass function-body validator and branch-target resolver (spec
//! §4.3).
//!
//! Grounded on the teacher's `src/validation/func.rs`: an operand-type stack
//! plus a control-frame stack, with a per-frame "unreachable" flag that
//! makes every pop from beneath it return a wildcard type (the teacher's
//! `StackValueType::{Any, Specific}`, renamed here [`OperandType`]). Unlike
//! the teacher, this validator also resolves `br`/`br_if`/`br_table`/`if`
//! targets into absolute indices into the flat [`Instr`] stream it emits,
//! rather than leaving that to a later pass (see `isa.rs`).

pub mod isa;

use crate::{
    binary::Reader,
    error::Error,
    module::types::{FuncType, GlobalType, MemoryType, TableType},
    value::{RefType, ValType},
};
use alloc::{vec, vec::Vec};
use isa::{BranchTarget, DropKeep, Instr};

/// A resolved block type: ordered parameters and ordered results.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct BlockType {
    params: Vec<ValType>,
    results: Vec<ValType>,
}

/// The module-level context a function body is validated against: every
/// index space it can reference plus whatever's needed to resolve those
/// references (spec §4.2's typed tables, already decoded by the time any
/// function body is validated).
pub struct ModuleCtx<'m> {
    pub types: &'m [FuncType],
    /// Type index of every function in the module (imports first).
    pub func_types: &'m [u32],
    pub tables: &'m [TableType],
    pub memories: &'m [MemoryType],
    pub globals: &'m [GlobalType],
    pub num_elems: u32,
    /// `Some(n)` if a DataCount section fixed the segment count eagerly
    /// (spec §4.2/§9); `None` means `memory.init`/`data.drop` indices are
    /// validated lazily once the Data section is read.
    pub num_datas: Option<u32>,
}

impl<'m> ModuleCtx<'m> {
    fn block_type(&self, r: &mut Reader<'_>) -> Result<BlockType, Error> {
        let b = r.peek_u8()?;
        if b == 0x40 {
            r.read_u8()?;
            return Ok(BlockType::default());
        }
        if let Some(vt) = try_val_type(b) {
            r.read_u8()?;
            return Ok(BlockType {
                params: Vec::new(),
                results: vec![vt],
            });
        }
        let idx = r.read_i32_leb()?;
        let ty = self
            .types
            .get(idx as usize)
            .ok_or_else(|| Error::validation("block type index out of range"))?;
        Ok(BlockType {
            params: ty.params.clone(),
            results: ty.results.clone(),
        })
    }

    fn func_type(&self, func_idx: u32) -> Result<&FuncType, Error> {
        let type_idx = *self
            .func_types
            .get(func_idx as usize)
            .ok_or_else(|| Error::validation("call target out of range"))?;
        Ok(&self.types[type_idx as usize])
    }
}

fn try_val_type(b: u8) -> Option<ValType> {
    Some(match b {
        0x7F => ValType::I32,
        0x7E => ValType::I64,
        0x7D => ValType::F32,
        0x7C => ValType::F64,
        0x70 => ValType::FuncRef,
        0x6F => ValType::ExternRef,
        #[cfg(feature = "simd")]
        0x7B => ValType::V128,
        _ => return None,
    })
}

fn read_ref_type(r: &mut Reader<'_>) -> Result<RefType, Error> {
    match r.read_u8()? {
        0x70 => Ok(RefType::FuncRef),
        0x6F => Ok(RefType::ExternRef),
        _ => Err(Error::malformed("invalid reftype")),
    }
}

/// A type on the abstract operand stack: either a concrete [`ValType`] or
/// the wildcard produced by popping beneath an unreachable frame (spec §9
/// "Polymorphic stack after unreachable").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperandType {
    Any,
    Known(ValType),
}

impl From<ValType> for OperandType {
    fn from(vt: ValType) -> Self {
        OperandType::Known(vt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Block,
    Loop,
    If,
    Else,
}

/// Where to patch in a resolved absolute instruction index once a frame's
/// forward branch target becomes known (at its `end`, or at `else` for an
/// `if`'s own conditional jump).
enum PatchSite {
    /// `code[idx]` is a `Br`/`BrIfNez`/`BrIfEqz`; patch its target's `pc`.
    Direct(usize),
    /// `code[idx]` is a `BrTable`; patch `targets[slot]`'s `pc`.
    TableTarget(usize, usize),
    /// `code[idx]` is a `BrTable`; patch `default`'s `pc`.
    TableDefault(usize),
}

struct CtrlFrame {
    kind: FrameKind,
    start_types: Vec<ValType>,
    /// The arity/types carried by a branch that *targets this frame's
    /// label*: for Block/If that's `results` (the label is after `end`);
    /// for Loop it's `params` (the label is the loop's own start).
    label_types: Vec<ValType>,
    results: Vec<ValType>,
    /// Abstract operand-stack height when this frame was entered (after
    /// popping `start_types`, before pushing them back for the frame body).
    height: usize,
    unreachable: bool,
    /// Absolute instruction index of a `loop`'s own start, for backward
    /// branches (already resolved, no patch needed).
    loop_start: Option<u32>,
    /// Forward branches awaiting this frame's `end` (or, for an `if`
    /// without an `else` yet seen, its own conditional jump).
    end_patches: Vec<PatchSite>,
}

/// Validates one function body and returns its resolved bytecode.
pub struct FunctionValidator<'m> {
    module: &'m ModuleCtx<'m>,
    locals: &'m [ValType],
    opd_stack: Vec<OperandType>,
    ctrl_stack: Vec<CtrlFrame>,
    code: Vec<Instr>,
}

impl<'m> FunctionValidator<'m> {
    pub fn new(module: &'m ModuleCtx<'m>, locals: &'m [ValType], results: &[ValType]) -> Self {
        let mut v = Self {
            module,
            locals,
            opd_stack: Vec::new(),
            ctrl_stack: Vec::new(),
            code: Vec::new(),
        };
        v.ctrl_stack.push(CtrlFrame {
            kind: FrameKind::Block,
            start_types: Vec::new(),
            label_types: results.to_vec(),
            results: results.to_vec(),
            height: 0,
            unreachable: false,
            loop_start: None,
            end_patches: Vec::new(),
        });
        v
    }

    fn top(&self) -> &CtrlFrame {
        self.ctrl_stack.last().expect("function frame always present")
    }

    pub(crate) fn push_opd(&mut self, ty: OperandType) {
        self.opd_stack.push(ty);
    }

    pub(crate) fn pop_opd(&mut self) -> Result<OperandType, Error> {
        let frame_height = self.top().height;
        let frame_unreachable = self.top().unreachable;
        if self.opd_stack.len() == frame_height {
            if frame_unreachable {
                return Ok(OperandType::Any);
            }
            return Err(Error::validation("operand stack underflow"));
        }
        Ok(self.opd_stack.pop().expect("checked non-empty above"))
    }

    pub(crate) fn pop_expect(&mut self, expected: ValType) -> Result<(), Error> {
        match self.pop_opd()? {
            OperandType::Any => Ok(()),
            OperandType::Known(actual) if actual == expected => Ok(()),
            OperandType::Known(actual) => Err(Error::validation(alloc::format!(
                "type mismatch: expected {expected}, found {actual}"
            ))),
        }
    }

    fn push_types(&mut self, types: &[ValType]) {
        for &t in types {
            self.push_opd(OperandType::Known(t));
        }
    }

    fn pop_types(&mut self, types: &[ValType]) -> Result<(), Error> {
        for &t in types.iter().rev() {
            self.pop_expect(t)?;
        }
        Ok(())
    }

    /// Height of the real runtime value stack at this program point. Unlike
    /// `opd_stack.len()` read *after* `pop_types`, this reflects what is
    /// actually materialized at runtime (branch-arity checks only simulate
    /// a pop for type-checking; the interpreter's `Br*` instructions carry
    /// an explicit drop count instead of popping here).
    fn runtime_height(&self) -> usize {
        self.opd_stack.len()
    }

    fn set_unreachable(&mut self) {
        let frame = self.ctrl_stack.last_mut().expect("function frame always present");
        frame.unreachable = true;
        self.opd_stack.truncate(frame.height);
    }

    fn push_ctrl(
        &mut self,
        kind: FrameKind,
        start_types: Vec<ValType>,
        results: Vec<ValType>,
        loop_start: Option<u32>,
    ) {
        let label_types = if kind == FrameKind::Loop {
            start_types.clone()
        } else {
            results.clone()
        };
        let height = self.opd_stack.len();
        self.ctrl_stack.push(CtrlFrame {
            kind,
            start_types: start_types.clone(),
            label_types,
            results,
            height,
            unreachable: false,
            loop_start,
            end_patches: Vec::new(),
        });
        self.push_types(&start_types);
    }

    /// Pops the current frame, checking its `results` are on top of the
    /// stack at the declared entry height. Returns the popped frame.
    fn pop_ctrl(&mut self) -> Result<CtrlFrame, Error> {
        let results = self.top().results.clone();
        let height = self.top().height;
        self.pop_types(&results)?;
        if self.opd_stack.len() != height {
            return Err(Error::validation(
                "operand stack height mismatch at block end",
            ));
        }
        Ok(self.ctrl_stack.pop().expect("checked by caller"))
    }

    fn label_frame(&self, relative_depth: u32) -> Result<usize, Error> {
        let len = self.ctrl_stack.len();
        let idx = (relative_depth as usize)
            .checked_add(1)
            .filter(|d| *d <= len)
            .ok_or_else(|| Error::validation("branch depth out of range"))?;
        Ok(len - idx)
    }

    fn branch_target_for(&mut self, depth: u32) -> Result<(DropKeep, usize), Error> {
        let frame_idx = self.label_frame(depth)?;
        let label_types = self.ctrl_stack[frame_idx].label_types.clone();
        let frame_height = self.ctrl_stack[frame_idx].height;
        let height_before = self.runtime_height();
        self.pop_types(&label_types)?;
        self.push_types(&label_types);
        let keep = label_types.len() as u32;
        let drop = (height_before - frame_height) as u32 - keep;
        Ok((DropKeep::new(drop, keep), frame_idx))
    }

    pub(crate) fn emit(&mut self, instr: Instr) -> usize {
        self.code.push(instr);
        self.code.len() - 1
    }

    fn record_forward_patch(&mut self, frame_idx: usize, site: PatchSite) {
        self.ctrl_stack[frame_idx].end_patches.push(site);
    }

    fn placeholder_target(drop_keep: DropKeep) -> BranchTarget {
        BranchTarget {
            pc: u32::MAX,
            drop_keep,
        }
    }

    fn patch_target(&mut self, site: &PatchSite, pc: u32) {
        match *site {
            PatchSite::Direct(idx) => match &mut self.code[idx] {
                Instr::Br(t) | Instr::BrIfNez(t) | Instr::BrIfEqz(t) => t.pc = pc,
                _ => unreachable!("patch site did not point at a branch instruction"),
            },
            PatchSite::TableTarget(idx, slot) => match &mut self.code[idx] {
                Instr::BrTable { targets, .. } => targets[slot].pc = pc,
                _ => unreachable!(),
            },
            PatchSite::TableDefault(idx) => match &mut self.code[idx] {
                Instr::BrTable { default, .. } => default.pc = pc,
                _ => unreachable!(),
            },
        }
    }

    /// Validates and decodes the full instruction stream of a function
    /// body, terminated by the body's final `end`, producing resolved
    /// bytecode.
    pub fn validate(mut self, r: &mut Reader<'_>) -> Result<Vec<Instr>, Error> {
        loop {
            let opcode = r.read_u8()?;
            if self.step(opcode, r)? {
                break;
            }
        }
        r.expect_end()?;
        Ok(self.code)
    }

    /// Handles one opcode. Returns `true` once the function body's final
    /// `end` (closing the implicit outermost frame) has been processed.
    fn step(&mut self, opcode: u8, r: &mut Reader<'_>) -> Result<bool, Error> {
        match opcode {
            0x00 => {
                self.emit(Instr::Unreachable);
                self.set_unreachable();
            }
            0x01 => { /* nop */ }
            0x02 => {
                let bt = self.module.block_type(r)?;
                self.pop_types(&bt.params)?;
                self.push_ctrl(FrameKind::Block, bt.params, bt.results, None);
            }
            0x03 => {
                let bt = self.module.block_type(r)?;
                self.pop_types(&bt.params)?;
                let start = self.code.len() as u32;
                self.push_ctrl(FrameKind::Loop, bt.params, bt.results, Some(start));
            }
            0x04 => {
                let bt = self.module.block_type(r)?;
                self.pop_expect(ValType::I32)?;
                self.pop_types(&bt.params)?;
                let idx = self.emit(Instr::BrIfEqz(Self::placeholder_target(DropKeep::default())));
                self.push_ctrl(FrameKind::If, bt.params, bt.results, None);
                self.record_forward_patch(self.ctrl_stack.len() - 1, PatchSite::Direct(idx));
            }
            0x05 => {
                if self.top().kind != FrameKind::If {
                    return Err(Error::validation("`else` without matching `if`"));
                }
                let frame = self.pop_ctrl()?;
                // Skip the `else` arm when falling out of a taken `then`.
                let skip_idx =
                    self.emit(Instr::Br(Self::placeholder_target(DropKeep::default())));
                // The `if`'s own conditional jump lands here, at the start
                // of the `else` arm.
                let here = self.code.len() as u32;
                for site in &frame.end_patches {
                    self.patch_target(site, here);
                }
                self.push_ctrl(FrameKind::Else, frame.start_types, frame.results, None);
                self.record_forward_patch(self.ctrl_stack.len() - 1, PatchSite::Direct(skip_idx));
            }
            0x0B => {
                let is_if_without_else =
                    self.top().kind == FrameKind::If && !self.top().results.is_empty();
                if is_if_without_else && self.top().start_types != self.top().results {
                    return Err(Error::validation(
                        "`if` without `else` cannot change the operand stack's types",
                    ));
                }
                let frame = self.pop_ctrl()?;
                let here = self.code.len() as u32;
                for site in &frame.end_patches {
                    self.patch_target(site, here);
                }
                self.push_types(&frame.results);
                if self.ctrl_stack.is_empty() {
                    return Ok(true);
                }
            }
            0x0C | 0x0D => {
                if opcode == 0x0D {
                    self.pop_expect(ValType::I32)?;
                }
                let depth = r.read_u32_leb()?;
                let (drop_keep, frame_idx) = self.branch_target_for(depth)?;
                let ctor = if opcode == 0x0C { Instr::Br } else { Instr::BrIfNez };
                let idx = self.emit(ctor(Self::placeholder_target(drop_keep)));
                self.resolve_or_patch(frame_idx, idx);
                if opcode == 0x0C {
                    self.set_unreachable();
                }
            }
            0x0E => {
                self.pop_expect(ValType::I32)?;
                let count = r.read_u32_leb()?;
                if count > 1 << 20 {
                    return Err(Error::malformed("br_table too large"));
                }
                let mut targets = Vec::with_capacity(count as usize);
                let mut patches = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let depth = r.read_u32_leb()?;
                    let (dk, frame_idx) = self.branch_target_for(depth)?;
                    targets.push(Self::placeholder_target(dk));
                    patches.push(frame_idx);
                }
                let default_depth = r.read_u32_leb()?;
                let (default_dk, default_frame) = self.branch_target_for(default_depth)?;
                let default_arity = self.ctrl_stack[default_frame].label_types.len();
                for &fi in &patches {
                    if self.ctrl_stack[fi].label_types.len() != default_arity {
                        return Err(Error::validation(
                            "br_table arms must share the default's arity",
                        ));
                    }
                }
                let default = Self::placeholder_target(default_dk);
                let idx = self.emit(Instr::BrTable { targets, default });
                for (slot, fi) in patches.into_iter().enumerate() {
                    self.resolve_or_patch_table(fi, PatchSite::TableTarget(idx, slot));
                }
                self.resolve_or_patch_table(default_frame, PatchSite::TableDefault(idx));
                self.set_unreachable();
            }
            0x0F => {
                let results = self.ctrl_stack[0].results.clone();
                let height_before = self.runtime_height();
                self.pop_types(&results)?;
                let keep = results.len() as u32;
                let drop = (height_before - self.ctrl_stack[0].height) as u32 - keep;
                self.emit(Instr::Return(DropKeep::new(drop, keep)));
                self.set_unreachable();
            }
            0x10 => {
                let idx = r.read_u32_leb()?;
                let ty = self.module.func_type(idx)?.clone();
                self.pop_types(&ty.params)?;
                self.push_types(&ty.results);
                self.emit(Instr::Call(idx));
            }
            0x11 => {
                let type_idx = r.read_u32_leb()?;
                let table_idx = r.read_u32_leb()?;
                let table = self
                    .module
                    .tables
                    .get(table_idx as usize)
                    .ok_or_else(|| Error::validation("call_indirect table out of range"))?;
                if table.element != RefType::FuncRef {
                    return Err(Error::validation("call_indirect requires a funcref table"));
                }
                self.pop_expect(ValType::I32)?;
                let ty = self
                    .module
                    .types
                    .get(type_idx as usize)
                    .ok_or_else(|| Error::validation("call_indirect type out of range"))?
                    .clone();
                self.pop_types(&ty.params)?;
                self.push_types(&ty.results);
                self.emit(Instr::CallIndirect { type_idx, table_idx });
            }
            0x1A => {
                self.pop_opd()?;
                self.emit(Instr::Drop);
            }
            0x1B => {
                // Stack order (spec `select : [t t i32] -> [t]`) is
                // `val1 val2 c`, with `c` on top; pop it first.
                self.pop_expect(ValType::I32)?;
                let t2 = self.pop_opd()?;
                let t1 = self.pop_opd()?;
                let result = match (t1, t2) {
                    (OperandType::Known(a), OperandType::Known(b)) if a == b => {
                        if !a.is_num() {
                            return Err(Error::validation(
                                "select without an immediate type requires numeric operands",
                            ));
                        }
                        OperandType::Known(a)
                    }
                    (OperandType::Any, OperandType::Any) => OperandType::Any,
                    (OperandType::Any, known @ OperandType::Known(_))
                    | (known @ OperandType::Known(_), OperandType::Any) => known,
                    _ => return Err(Error::validation("select operand type mismatch")),
                };
                self.push_opd(result);
                self.emit(Instr::Select);
            }
            0x1C => {
                let count = r.read_u32_leb()?;
                if count != 1 {
                    return Err(Error::malformed("select vec must declare exactly one type"));
                }
                let vt = try_val_type(r.read_u8()?)
                    .ok_or_else(|| Error::malformed("invalid valtype in select"))?;
                self.pop_expect(ValType::I32)?;
                self.pop_expect(vt)?;
                self.pop_expect(vt)?;
                self.push_opd(OperandType::Known(vt));
                self.emit(Instr::SelectTyped(vt));
            }
            0x20 | 0x21 | 0x22 => {
                let idx = r.read_u32_leb()?;
                let vt = *self
                    .locals
                    .get(idx as usize)
                    .ok_or_else(|| Error::validation("local index out of range"))?;
                match opcode {
                    0x20 => {
                        self.push_opd(OperandType::Known(vt));
                        self.emit(Instr::LocalGet(idx));
                    }
                    0x21 => {
                        self.pop_expect(vt)?;
                        self.emit(Instr::LocalSet(idx));
                    }
                    _ => {
                        self.pop_expect(vt)?;
                        self.push_opd(OperandType::Known(vt));
                        self.emit(Instr::LocalTee(idx));
                    }
                }
            }
            0x23 | 0x24 => {
                let idx = r.read_u32_leb()?;
                let global = *self
                    .module
                    .globals
                    .get(idx as usize)
                    .ok_or_else(|| Error::validation("global index out of range"))?;
                if opcode == 0x23 {
                    self.push_opd(OperandType::Known(global.val_type));
                    self.emit(Instr::GlobalGet(idx));
                } else {
                    if !global.mutable {
                        return Err(Error::validation("global.set of an immutable global"));
                    }
                    self.pop_expect(global.val_type)?;
                    self.emit(Instr::GlobalSet(idx));
                }
            }
            0x25 | 0x26 => {
                let idx = r.read_u32_leb()?;
                let table = *self
                    .module
                    .tables
                    .get(idx as usize)
                    .ok_or_else(|| Error::validation("table index out of range"))?;
                let vt = table.element_val_type();
                if opcode == 0x25 {
                    self.pop_expect(ValType::I32)?;
                    self.push_opd(OperandType::Known(vt));
                    self.emit(Instr::TableGet(idx));
                } else {
                    self.pop_expect(vt)?;
                    self.pop_expect(ValType::I32)?;
                    self.emit(Instr::TableSet(idx));
                }
            }
            0x28..=0x3E => self.memory_instr(opcode, r)?,
            0x3F => {
                self.require_memory()?;
                r.read_u32_leb()?; // reserved byte
                self.push_opd(OperandType::Known(ValType::I32));
                self.emit(Instr::MemorySize);
            }
            0x40 => {
                self.require_memory()?;
                r.read_u32_leb()?; // reserved byte
                self.pop_expect(ValType::I32)?;
                self.push_opd(OperandType::Known(ValType::I32));
                self.emit(Instr::MemoryGrow);
            }
            0x41 => {
                let v = r.read_i32_leb()?;
                self.push_opd(OperandType::Known(ValType::I32));
                self.emit(Instr::I32Const(v));
            }
            0x42 => {
                let v = r.read_i64_leb()?;
                self.push_opd(OperandType::Known(ValType::I64));
                self.emit(Instr::I64Const(v));
            }
            0x43 => {
                let v = r.read_f32()?;
                self.push_opd(OperandType::Known(ValType::F32));
                self.emit(Instr::F32Const(v));
            }
            0x44 => {
                let v = r.read_f64()?;
                self.push_opd(OperandType::Known(ValType::F64));
                self.emit(Instr::F64Const(v));
            }
            0x45..=0xC4 => self.numeric_instr(opcode)?,
            0xD0 => {
                let ty = read_ref_type(r)?;
                self.push_opd(OperandType::Known(ty.to_val_type()));
                self.emit(Instr::RefNull(ty));
            }
            0xD1 => {
                let t = self.pop_opd()?;
                match t {
                    OperandType::Known(vt) if vt.is_ref() => {}
                    OperandType::Any => {}
                    _ => return Err(Error::validation("ref.is_null expects a reference")),
                }
                self.push_opd(OperandType::Known(ValType::I32));
                self.emit(Instr::RefIsNull);
            }
            0xD2 => {
                let idx = r.read_u32_leb()?;
                self.push_opd(OperandType::Known(ValType::FuncRef));
                self.emit(Instr::RefFunc(idx));
            }
            0xFC => self.misc_instr(r)?,
            #[cfg(feature = "simd")]
            0xFD => crate::engine::simd::validate_simd(self, r)?,
            other => {
                return Err(Error::malformed(alloc::format!(
                    "unknown opcode 0x{other:02x}"
                )))
            }
        }
        Ok(false)
    }

    fn resolve_or_patch(&mut self, frame_idx: usize, instr_idx: usize) {
        self.resolve_or_patch_table(frame_idx, PatchSite::Direct(instr_idx));
    }

    fn resolve_or_patch_table(&mut self, frame_idx: usize, site: PatchSite) {
        if let Some(loop_pc) = self.ctrl_stack[frame_idx].loop_start {
            self.patch_target(&site, loop_pc);
        } else {
            self.record_forward_patch(frame_idx, site);
        }
    }

    pub(crate) fn require_memory(&self) -> Result<(), Error> {
        if self.module.memories.is_empty() {
            Err(Error::validation("instruction requires a memory"))
        } else {
            Ok(())
        }
    }

    fn memory_instr(&mut self, opcode: u8, r: &mut Reader<'_>) -> Result<(), Error> {
        self.require_memory()?;
        let align = r.read_u32_leb()?;
        let offset = r.read_u32_leb()?;
        let bound = memory_access_align_bound(opcode)?;
        if align > bound {
            return Err(Error::validation("alignment exceeds natural access size"));
        }
        use Instr as I;
        let (pop, push, instr): (Option<ValType>, Option<ValType>, Instr) = match opcode {
            0x28 => (None, Some(ValType::I32), I::I32Load { offset }),
            0x29 => (None, Some(ValType::I64), I::I64Load { offset }),
            0x2A => (None, Some(ValType::F32), I::F32Load { offset }),
            0x2B => (None, Some(ValType::F64), I::F64Load { offset }),
            0x2C => (None, Some(ValType::I32), I::I32Load8S { offset }),
            0x2D => (None, Some(ValType::I32), I::I32Load8U { offset }),
            0x2E => (None, Some(ValType::I32), I::I32Load16S { offset }),
            0x2F => (None, Some(ValType::I32), I::I32Load16U { offset }),
            0x30 => (None, Some(ValType::I64), I::I64Load8S { offset }),
            0x31 => (None, Some(ValType::I64), I::I64Load8U { offset }),
            0x32 => (None, Some(ValType::I64), I::I64Load16S { offset }),
            0x33 => (None, Some(ValType::I64), I::I64Load16U { offset }),
            0x34 => (None, Some(ValType::I64), I::I64Load32S { offset }),
            0x35 => (None, Some(ValType::I64), I::I64Load32U { offset }),
            0x36 => (Some(ValType::I32), None, I::I32Store { offset }),
            0x37 => (Some(ValType::I64), None, I::I64Store { offset }),
            0x38 => (Some(ValType::F32), None, I::F32Store { offset }),
            0x39 => (Some(ValType::F64), None, I::F64Store { offset }),
            0x3A => (Some(ValType::I32), None, I::I32Store8 { offset }),
            0x3B => (Some(ValType::I32), None, I::I32Store16 { offset }),
            0x3C => (Some(ValType::I64), None, I::I64Store8 { offset }),
            0x3D => (Some(ValType::I64), None, I::I64Store16 { offset }),
            0x3E => (Some(ValType::I64), None, I::I64Store32 { offset }),
            _ => unreachable!(),
        };
        if let Some(vt) = pop {
            self.pop_expect(vt)?;
        }
        self.pop_expect(ValType::I32)?;
        if let Some(vt) = push {
            self.push_opd(OperandType::Known(vt));
        }
        self.emit(instr);
        Ok(())
    }

    fn numeric_instr(&mut self, opcode: u8) -> Result<(), Error> {
        use OperandType::Known as K;
        use ValType::*;

        macro_rules! unop {
            ($ty:expr, $instr:expr) => {{
                self.pop_expect($ty)?;
                self.push_opd(K($ty));
                self.emit($instr);
            }};
        }
        macro_rules! binop {
            ($ty:expr, $instr:expr) => {{
                self.pop_expect($ty)?;
                self.pop_expect($ty)?;
                self.push_opd(K($ty));
                self.emit($instr);
            }};
        }
        macro_rules! testop {
            ($ty:expr, $instr:expr) => {{
                self.pop_expect($ty)?;
                self.push_opd(K(I32));
                self.emit($instr);
            }};
        }
        macro_rules! relop {
            ($ty:expr, $instr:expr) => {{
                self.pop_expect($ty)?;
                self.pop_expect($ty)?;
                self.push_opd(K(I32));
                self.emit($instr);
            }};
        }
        macro_rules! cvt {
            ($from:expr, $to:expr, $instr:expr) => {{
                self.pop_expect($from)?;
                self.push_opd(K($to));
                self.emit($instr);
            }};
        }

        use Instr as I;
        match opcode {
            0x45 => testop!(I32, I::I32Eqz),
            0x46 => relop!(I32, I::I32Eq),
            0x47 => relop!(I32, I::I32Ne),
            0x48 => relop!(I32, I::I32LtS),
            0x49 => relop!(I32, I::I32LtU),
            0x4A => relop!(I32, I::I32GtS),
            0x4B => relop!(I32, I::I32GtU),
            0x4C => relop!(I32, I::I32LeS),
            0x4D => relop!(I32, I::I32LeU),
            0x4E => relop!(I32, I::I32GeS),
            0x4F => relop!(I32, I::I32GeU),

            0x50 => testop!(I64, I::I64Eqz),
            0x51 => relop!(I64, I::I64Eq),
            0x52 => relop!(I64, I::I64Ne),
            0x53 => relop!(I64, I::I64LtS),
            0x54 => relop!(I64, I::I64LtU),
            0x55 => relop!(I64, I::I64GtS),
            0x56 => relop!(I64, I::I64GtU),
            0x57 => relop!(I64, I::I64LeS),
            0x58 => relop!(I64, I::I64LeU),
            0x59 => relop!(I64, I::I64GeS),
            0x5A => relop!(I64, I::I64GeU),

            0x5B => relop!(F32, I::F32Eq),
            0x5C => relop!(F32, I::F32Ne),
            0x5D => relop!(F32, I::F32Lt),
            0x5E => relop!(F32, I::F32Gt),
            0x5F => relop!(F32, I::F32Le),
            0x60 => relop!(F32, I::F32Ge),

            0x61 => relop!(F64, I::F64Eq),
            0x62 => relop!(F64, I::F64Ne),
            0x63 => relop!(F64, I::F64Lt),
            0x64 => relop!(F64, I::F64Gt),
            0x65 => relop!(F64, I::F64Le),
            0x66 => relop!(F64, I::F64Ge),

            0x67 => unop!(I32, I::I32Clz),
            0x68 => unop!(I32, I::I32Ctz),
            0x69 => unop!(I32, I::I32Popcnt),
            0x6A => binop!(I32, I::I32Add),
            0x6B => binop!(I32, I::I32Sub),
            0x6C => binop!(I32, I::I32Mul),
            0x6D => binop!(I32, I::I32DivS),
            0x6E => binop!(I32, I::I32DivU),
            0x6F => binop!(I32, I::I32RemS),
            0x70 => binop!(I32, I::I32RemU),
            0x71 => binop!(I32, I::I32And),
            0x72 => binop!(I32, I::I32Or),
            0x73 => binop!(I32, I::I32Xor),
            0x74 => binop!(I32, I::I32Shl),
            0x75 => binop!(I32, I::I32ShrS),
            0x76 => binop!(I32, I::I32ShrU),
            0x77 => binop!(I32, I::I32Rotl),
            0x78 => binop!(I32, I::I32Rotr),

            0x79 => unop!(I64, I::I64Clz),
            0x7A => unop!(I64, I::I64Ctz),
            0x7B => unop!(I64, I::I64Popcnt),
            0x7C => binop!(I64, I::I64Add),
            0x7D => binop!(I64, I::I64Sub),
            0x7E => binop!(I64, I::I64Mul),
            0x7F => binop!(I64, I::I64DivS),
            0x80 => binop!(I64, I::I64DivU),
            0x81 => binop!(I64, I::I64RemS),
            0x82 => binop!(I64, I::I64RemU),
            0x83 => binop!(I64, I::I64And),
            0x84 => binop!(I64, I::I64Or),
            0x85 => binop!(I64, I::I64Xor),
            0x86 => binop!(I64, I::I64Shl),
            0x87 => binop!(I64, I::I64ShrS),
            0x88 => binop!(I64, I::I64ShrU),
            0x89 => binop!(I64, I::I64Rotl),
            0x8A => binop!(I64, I::I64Rotr),

            0x8B => unop!(F32, I::F32Abs),
            0x8C => unop!(F32, I::F32Neg),
            0x8D => unop!(F32, I::F32Ceil),
            0x8E => unop!(F32, I::F32Floor),
            0x8F => unop!(F32, I::F32Trunc),
            0x90 => unop!(F32, I::F32Nearest),
            0x91 => unop!(F32, I::F32Sqrt),
            0x92 => binop!(F32, I::F32Add),
            0x93 => binop!(F32, I::F32Sub),
            0x94 => binop!(F32, I::F32Mul),
            0x95 => binop!(F32, I::F32Div),
            0x96 => binop!(F32, I::F32Min),
            0x97 => binop!(F32, I::F32Max),
            0x98 => binop!(F32, I::F32Copysign),

            0x99 => unop!(F64, I::F64Abs),
            0x9A => unop!(F64, I::F64Neg),
            0x9B => unop!(F64, I::F64Ceil),
            0x9C => unop!(F64, I::F64Floor),
            0x9D => unop!(F64, I::F64Trunc),
            0x9E => unop!(F64, I::F64Nearest),
            0x9F => unop!(F64, I::F64Sqrt),
            0xA0 => binop!(F64, I::F64Add),
            0xA1 => binop!(F64, I::F64Sub),
            0xA2 => binop!(F64, I::F64Mul),
            0xA3 => binop!(F64, I::F64Div),
            0xA4 => binop!(F64, I::F64Min),
            0xA5 => binop!(F64, I::F64Max),
            0xA6 => binop!(F64, I::F64Copysign),

            0xA7 => cvt!(I64, I32, I::I32WrapI64),
            0xA8 => cvt!(F32, I32, I::I32TruncF32S),
            0xA9 => cvt!(F32, I32, I::I32TruncF32U),
            0xAA => cvt!(F64, I32, I::I32TruncF64S),
            0xAB => cvt!(F64, I32, I::I32TruncF64U),
            0xAC => cvt!(I32, I64, I::I64ExtendI32S),
            0xAD => cvt!(I32, I64, I::I64ExtendI32U),
            0xAE => cvt!(F32, I64, I::I64TruncF32S),
            0xAF => cvt!(F32, I64, I::I64TruncF32U),
            0xB0 => cvt!(F64, I64, I::I64TruncF64S),
            0xB1 => cvt!(F64, I64, I::I64TruncF64U),
            0xB2 => cvt!(I32, F32, I::F32ConvertI32S),
            0xB3 => cvt!(I32, F32, I::F32ConvertI32U),
            0xB4 => cvt!(I64, F32, I::F32ConvertI64S),
            0xB5 => cvt!(I64, F32, I::F32ConvertI64U),
            0xB6 => cvt!(F64, F32, I::F32DemoteF64),
            0xB7 => cvt!(I32, F64, I::F64ConvertI32S),
            0xB8 => cvt!(I32, F64, I::F64ConvertI32U),
            0xB9 => cvt!(I64, F64, I::F64ConvertI64S),
            0xBA => cvt!(I64, F64, I::F64ConvertI64U),
            0xBB => cvt!(F32, F64, I::F64PromoteF32),
            0xBC => cvt!(F32, I32, I::I32ReinterpretF32),
            0xBD => cvt!(F64, I64, I::I64ReinterpretF64),
            0xBE => cvt!(I32, F32, I::F32ReinterpretI32),
            0xBF => cvt!(I64, F64, I::F64ReinterpretI64),

            0xC0 => unop!(I32, I::I32Extend8S),
            0xC1 => unop!(I32, I::I32Extend16S),
            0xC2 => unop!(I64, I::I64Extend8S),
            0xC3 => unop!(I64, I::I64Extend16S),
            0xC4 => unop!(I64, I::I64Extend32S),

            other => {
                return Err(Error::malformed(alloc::format!(
                    "unknown numeric opcode 0x{other:02x}"
                )))
            }
        }
        Ok(())
    }

    fn misc_instr(&mut self, r: &mut Reader<'_>) -> Result<(), Error> {
        use Instr as I;
        use ValType::*;
        let sub = r.read_u32_leb()?;
        match sub {
            0..=7 => {
                let (from, to, instr) = match sub {
                    0 => (F32, I32, I::I32TruncSatF32S),
                    1 => (F32, I32, I::I32TruncSatF32U),
                    2 => (F64, I32, I::I32TruncSatF64S),
                    3 => (F64, I32, I::I32TruncSatF64U),
                    4 => (F32, I64, I::I64TruncSatF32S),
                    5 => (F32, I64, I::I64TruncSatF32U),
                    6 => (F64, I64, I::I64TruncSatF64S),
                    _ => (F64, I64, I::I64TruncSatF64U),
                };
                self.pop_expect(from)?;
                self.push_opd(OperandType::Known(to));
                self.emit(instr);
            }
            8 => {
                let data_idx = r.read_u32_leb()?;
                self.check_data_idx(data_idx)?;
                let mem_idx = r.read_u32_leb()?;
                if mem_idx != 0 || self.module.memories.is_empty() {
                    return Err(Error::validation("memory.init requires memory 0"));
                }
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.emit(I::MemoryInit(data_idx));
            }
            9 => {
                let data_idx = r.read_u32_leb()?;
                self.check_data_idx(data_idx)?;
                self.emit(I::DataDrop(data_idx));
            }
            10 => {
                let dst = r.read_u32_leb()?;
                let src = r.read_u32_leb()?;
                self.require_memory()?;
                if dst != 0 || src != 0 {
                    return Err(Error::validation("memory.copy requires memory 0"));
                }
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.emit(I::MemoryCopy);
            }
            11 => {
                let mem_idx = r.read_u32_leb()?;
                self.require_memory()?;
                if mem_idx != 0 {
                    return Err(Error::validation("memory.fill requires memory 0"));
                }
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.emit(I::MemoryFill);
            }
            12 => {
                let elem_idx = r.read_u32_leb()?;
                let table = r.read_u32_leb()?;
                if elem_idx >= self.module.num_elems {
                    return Err(Error::validation("table.init element index out of range"));
                }
                self.table_bounds(table)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.emit(I::TableInit { table, elem: elem_idx });
            }
            13 => {
                let elem_idx = r.read_u32_leb()?;
                if elem_idx >= self.module.num_elems {
                    return Err(Error::validation("elem.drop index out of range"));
                }
                self.emit(I::ElemDrop(elem_idx));
            }
            14 => {
                let dst = r.read_u32_leb()?;
                let src = r.read_u32_leb()?;
                self.table_bounds(dst)?;
                self.table_bounds(src)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.emit(I::TableCopy { dst, src });
            }
            15 => {
                let idx = r.read_u32_leb()?;
                let table = self.table_bounds(idx)?;
                self.pop_expect(I32)?;
                self.pop_expect(table.element_val_type())?;
                self.push_opd(OperandType::Known(I32));
                self.emit(I::TableGrow(idx));
            }
            16 => {
                let idx = r.read_u32_leb()?;
                self.table_bounds(idx)?;
                self.push_opd(OperandType::Known(I32));
                self.emit(I::TableSize(idx));
            }
            17 => {
                let idx = r.read_u32_leb()?;
                let table = self.table_bounds(idx)?;
                self.pop_expect(I32)?;
                self.pop_expect(table.element_val_type())?;
                self.pop_expect(I32)?;
                self.emit(I::TableFill(idx));
            }
            other => {
                return Err(Error::malformed(alloc::format!(
                    "unknown 0xFC subopcode {other}"
                )))
            }
        }
        Ok(())
    }

    fn table_bounds(&self, idx: u32) -> Result<crate::module::types::TableType, Error> {
        self.module
            .tables
            .get(idx as usize)
            .copied()
            .ok_or_else(|| Error::validation("table index out of range"))
    }

    fn check_data_idx(&self, idx: u32) -> Result<(), Error> {
        match self.module.num_datas {
            Some(n) if idx >= n => Err(Error::validation("data segment index out of range")),
            _ => Ok(()),
        }
    }
}

/// Returns `log2` of the natural access size for a memory-instruction
/// opcode, the maximum alignment immediate spec §4.3 permits for it.
pub(crate) fn memory_access_align_bound(opcode: u8) -> Result<u32, Error> {
    Ok(match opcode {
        0x28 | 0x36 => 2, // i32.load / i32.store: 4 bytes
        0x29 | 0x37 => 3, // i64.load / i64.store: 8 bytes
        0x2A | 0x38 => 2, // f32
        0x2B | 0x39 => 3, // f64
        0x2C | 0x2D | 0x3A => 0, // 8-bit access
        0x2E | 0x2F | 0x3B => 1, // 16-bit access
        0x30 | 0x31 | 0x3C => 0,
        0x32 | 0x33 | 0x3D => 1,
        0x34 | 0x35 | 0x3E => 2,
        _ => return Err(Error::malformed("not a memory instruction")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::types::FuncType;

    fn ctx<'m>(types: &'m [FuncType]) -> ModuleCtx<'m> {
        ModuleCtx {
            types,
            func_types: &[],
            tables: &[],
            memories: &[],
            globals: &[],
            num_elems: 0,
            num_datas: Some(0),
        }
    }

    #[test]
    fn validates_i32_add() {
        let types = [];
        let m = ctx(&types);
        let locals = [ValType::I32, ValType::I32];
        let v = FunctionValidator::new(&m, &locals, &[ValType::I32]);
        // local.get 0; local.get 1; i32.add; end
        let bytes = [0x20, 0x00, 0x20, 0x01, 0x6A, 0x0B];
        let mut r = Reader::new(&bytes);
        let code = v.validate(&mut r).unwrap();
        assert_eq!(code.len(), 3);
        assert_eq!(code[2], Instr::I32Add);
    }

    #[test]
    fn rejects_stack_underflow() {
        let types = [];
        let m = ctx(&types);
        let locals = [];
        let v = FunctionValidator::new(&m, &locals, &[ValType::I32]);
        let bytes = [0x6A, 0x0B]; // i32.add with nothing pushed
        let mut r = Reader::new(&bytes);
        assert!(v.validate(&mut r).is_err());
    }

    #[test]
    fn resolves_forward_branch_out_of_block() {
        let types = [];
        let m = ctx(&types);
        let locals = [];
        let v = FunctionValidator::new(&m, &locals, &[]);
        // block; br 0; end; end
        let bytes = [0x02, 0x40, 0x0C, 0x00, 0x0B, 0x0B];
        let mut r = Reader::new(&bytes);
        let code = v.validate(&mut r).unwrap();
        match &code[0] {
            Instr::Br(t) => assert_eq!(t.pc, code.len() as u32),
            other => panic!("expected Br, found {other:?}"),
        }
    }

    #[test]
    fn resolves_backward_branch_into_loop() {
        let types = [];
        let m = ctx(&types);
        let locals = [];
        let v = FunctionValidator::new(&m, &locals, &[]);
        // loop; br 0; end; end
        let bytes = [0x03, 0x40, 0x0C, 0x00, 0x0B, 0x0B];
        let mut r = Reader::new(&bytes);
        let code = v.validate(&mut r).unwrap();
        match &code[0] {
            Instr::Br(t) => assert_eq!(t.pc, 0),
            other => panic!("expected Br, found {other:?}"),
        }
    }

    #[test]
    fn if_else_resolves_both_arms() {
        let types = [];
        let m = ctx(&types);
        let locals = [ValType::I32];
        let v = FunctionValidator::new(&m, &locals, &[ValType::I32]);
        // local.get 0; if (i32) i32.const 1 else i32.const 2 end; end
        let bytes = [
            0x20, 0x00, 0x04, 0x7F, 0x41, 0x01, 0x05, 0x41, 0x02, 0x0B, 0x0B,
        ];
        let mut r = Reader::new(&bytes);
        let code = v.validate(&mut r).unwrap();
        // LocalGet, BrIfEqz, I32Const(1), Br (skip else), I32Const(2)
        assert_eq!(code.len(), 5);
        match &code[1] {
            Instr::BrIfEqz(t) => assert_eq!(t.pc, 4),
            other => panic!("expected BrIfEqz, found {other:?}"),
        }
        match &code[3] {
            Instr::Br(t) => assert_eq!(t.pc, 5),
            other => panic!("expected Br, found {other:?}"),
        }
    }
}
