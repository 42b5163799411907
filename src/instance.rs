//! Per-instantiation mutable state (spec §4.4/§6): linear memory, tables,
//! globals and the two preallocated interpreter stacks, all scoped to one
//! [`Context`] bound to an immutable [`Module`].
//!
//! Grounded on the teacher's instance/store split (`crates/wasmi/src/store.rs`,
//! `crates/wasmi/src/memory.rs`, `crates/wasmi/src/table.rs`): a `Module` is
//! shareable and immutable, while a `Store`/`Instance` owns the mutable
//! memory bytes, table elements and global cells. This design collapses
//! "store" and "instance" into one [`Context`] since spec §1 scopes exactly
//! one module per embedding (no multi-module linking).

use crate::{
    engine::{self, CallStack, ValueStack, DEFAULT_CALL_STACK_DEPTH, DEFAULT_VALUE_STACK_HEIGHT},
    error::{Error, TrapCode},
    module::{
        data::DataMode,
        element::{ElemItem, ElementMode},
        types::{MemoryType, TableType, PAGE_SIZE},
        Module,
    },
    untyped::UntypedValue,
    value::{RefType, Value},
};
use alloc::{vec, vec::Vec};

/// A module's single linear memory (spec §3/§4.4).
#[derive(Debug)]
pub struct Memory {
    pub(crate) data: Vec<u8>,
    pub(crate) ty: MemoryType,
}

impl Memory {
    fn new(ty: MemoryType) -> Self {
        Self {
            data: vec![0u8; ty.limits.min as usize * PAGE_SIZE as usize],
            ty,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size_pages(&self) -> u32 {
        (self.data.len() / PAGE_SIZE as usize) as u32
    }

    /// Grows by `delta` pages, returning the previous size in pages, or
    /// `None` if the grow would exceed the declared/hard maximum (spec
    /// §4.4's `memory.grow` failure case, signalled to the interpreter as
    /// `-1` rather than a trap).
    pub(crate) fn grow(&mut self, delta: u32) -> Option<u32> {
        let old_pages = self.size_pages();
        let new_pages = old_pages.checked_add(delta)?;
        if !self.ty.limits.contains(new_pages) {
            return None;
        }
        self.data.resize(new_pages as usize * PAGE_SIZE as usize, 0);
        Some(old_pages)
    }
}

/// A module's table (spec §3/§4.4): a vector of nullable reference cells.
#[derive(Debug)]
pub struct Table {
    pub(crate) elems: Vec<UntypedValue>,
    pub(crate) ty: TableType,
}

impl Table {
    fn new(ty: TableType) -> Self {
        Self {
            elems: vec![UntypedValue::from_ref(crate::value::Ref::null(ty.element)); ty.limits.min as usize],
            ty,
        }
    }

    pub fn size(&self) -> u32 {
        self.elems.len() as u32
    }

    pub(crate) fn grow(&mut self, delta: u32, init: UntypedValue) -> Option<u32> {
        let old_size = self.size();
        let new_size = old_size.checked_add(delta)?;
        if !self.ty.limits.contains(new_size) {
            return None;
        }
        self.elems.resize(new_size as usize, init);
        Some(old_size)
    }
}

/// Host-configurable bounds on the two interpreter stacks (spec §4.4's
/// "preallocated, reused... bounded by configurable limits").
///
/// Grounded on `crates/wasmi/src/engine/limits.rs`'s `StackLimits`, renamed
/// to avoid colliding with [`crate::module::types::Limits`] (the Wasm
/// min/max pair).
#[derive(Debug, Clone, Copy)]
pub struct StackLimits {
    pub value_stack_height: usize,
    pub call_stack_depth: usize,
}

impl Default for StackLimits {
    fn default() -> Self {
        Self {
            value_stack_height: DEFAULT_VALUE_STACK_HEIGHT,
            call_stack_depth: DEFAULT_CALL_STACK_DEPTH,
        }
    }
}

/// One live instantiation of a [`Module`] (spec §4.4/§6): the module's
/// mutable state plus the two reused interpreter stacks.
///
/// Passive element/data segments are kept as mutable per-instance copies
/// (rather than borrowed from `Module`) so `elem.drop`/`data.drop` can
/// retire them without mutating the shared, otherwise-immutable `Module`.
#[derive(Debug)]
pub struct Context<'m> {
    pub(crate) module: &'m Module,
    pub(crate) memory: Option<Memory>,
    pub(crate) tables: Vec<Table>,
    pub(crate) globals: Vec<UntypedValue>,
    pub(crate) data_segments: Vec<Option<Vec<u8>>>,
    pub(crate) elem_segments: Vec<Option<Vec<ElemItem>>>,
    pub(crate) value_stack: ValueStack,
    pub(crate) call_stack: CallStack,
}

impl<'m> Context<'m> {
    /// Instantiates `module`: allocates memory/tables/globals at their
    /// declared sizes, applies every active element/data segment, then
    /// invokes the start function if one is declared (spec §4.4's
    /// instantiation order).
    pub fn new(module: &'m Module, limits: StackLimits) -> Result<Self, Error> {
        let memory = module.memories.first().copied().map(Memory::new);
        let tables = module.tables.iter().copied().map(Table::new).collect();
        let globals = module
            .global_inits
            .iter()
            .map(|v| v.to_untyped())
            .collect();
        let data_segments = module
            .data
            .iter()
            .map(|seg| Some(seg.bytes.clone()))
            .collect();
        // Declarative segments are never materialized into a table; the
        // spec's instantiation algorithm drops them immediately so a later
        // `table.init` referencing one traps, same as an already-dropped
        // passive segment.
        let elem_segments = module
            .elements
            .iter()
            .map(|seg| match seg.mode {
                ElementMode::Declared => None,
                _ => Some(seg.items.clone()),
            })
            .collect();

        let mut ctx = Self {
            module,
            memory,
            tables,
            globals,
            data_segments,
            elem_segments,
            value_stack: ValueStack::new(limits.value_stack_height),
            call_stack: CallStack::new(limits.call_stack_depth),
        };

        ctx.apply_active_elements()?;
        ctx.apply_active_data()?;

        if let Some(start) = module.start {
            ctx.call(start, &[])?;
        }

        Ok(ctx)
    }

    /// Applies every active element segment, then drops it (spec's
    /// instantiation algorithm runs an implicit `elem.drop` right after each
    /// active segment's `table.init`, so a function that later references
    /// the same segment index via `table.init` traps instead of re-reading
    /// stale contents).
    fn apply_active_elements(&mut self) -> Result<(), Error> {
        for (idx, seg) in self.module.elements.iter().enumerate() {
            if let ElementMode::Active { table, offset } = seg.mode {
                let table_ref = &mut self.tables[table as usize];
                let offset = offset as u32 as usize;
                let end = offset
                    .checked_add(seg.items.len())
                    .ok_or_else(|| Error::validation("element segment offset overflows"))?;
                if end > table_ref.elems.len() {
                    return Err(Error::trap(TrapCode::TableOutOfBounds));
                }
                for (i, item) in seg.items.iter().enumerate() {
                    table_ref.elems[offset + i] = elem_item_to_untyped(*item, seg.element_type);
                }
                self.elem_segments[idx] = None;
            }
        }
        Ok(())
    }

    /// Applies every active data segment, then drops it (same implicit-drop
    /// rule as [`Self::apply_active_elements`], for `data.drop`/`memory.init`).
    fn apply_active_data(&mut self) -> Result<(), Error> {
        for (idx, seg) in self.module.data.iter().enumerate() {
            if let DataMode::Active { memory: _, offset } = seg.mode {
                let memory = self
                    .memory
                    .as_mut()
                    .ok_or_else(|| Error::validation("active data segment without a memory"))?;
                let offset = offset as u32 as usize;
                let end = offset
                    .checked_add(seg.bytes.len())
                    .ok_or_else(|| Error::validation("data segment offset overflows"))?;
                if end > memory.data.len() {
                    return Err(Error::trap(TrapCode::MemoryOutOfBounds));
                }
                memory.data[offset..end].copy_from_slice(&seg.bytes);
                self.data_segments[idx] = None;
            }
        }
        Ok(())
    }

    pub fn module(&self) -> &'m Module {
        self.module
    }

    pub fn memory(&self) -> Option<&Memory> {
        self.memory.as_ref()
    }

    pub fn table(&self, idx: u32) -> Option<&Table> {
        self.tables.get(idx as usize)
    }

    /// Calls an exported or otherwise addressable function by its index in
    /// the module's function space (spec §6's host-facing entry point).
    ///
    /// Returns [`crate::error::ErrorKind::Misuse`] if the argument count or
    /// types don't match the callee's declared signature.
    pub fn call(&mut self, func_idx: u32, args: &[Value]) -> Result<Vec<Value>, Error> {
        let func_type = self
            .module
            .func_type(func_idx)
            .ok_or_else(|| Error::misuse("function index out of range"))?
            .clone();

        if args.len() != func_type.params.len() {
            return Err(Error::misuse("wrong number of call arguments"));
        }
        for (arg, expected) in args.iter().zip(&func_type.params) {
            if arg.ty() != *expected {
                return Err(Error::misuse("call argument type mismatch"));
            }
        }

        self.value_stack.clear();
        self.call_stack.clear();

        for arg in args {
            self.value_stack
                .push(arg.to_untyped())
                .map_err(Error::from)?;
        }

        let results_len = func_type.results.len();
        engine::run(self, func_idx)?;

        let base = self.value_stack.len() - results_len;
        let results = func_type
            .results
            .iter()
            .enumerate()
            .map(|(i, ty)| Value::from_untyped(self.value_stack.get(base + i), *ty))
            .collect();
        self.value_stack.clear();
        Ok(results)
    }
}

/// Resolves an element item to the table cell it materializes as (spec
/// §4.2's element-segment decoding: a bare function index, or an explicit
/// `ref.null`/`ref.func` expression already flattened to [`ElemItem`]).
pub(crate) fn elem_item_to_untyped(item: ElemItem, element_type: RefType) -> UntypedValue {
    match item {
        ElemItem::FuncIndex(idx) => UntypedValue::from_ref(crate::value::Ref::Func(Some(idx))),
        ElemItem::Null => UntypedValue::from_ref(crate::value::Ref::null(element_type)),
    }
}
