use crate::value::RefType;
use alloc::vec::Vec;

#[derive(Debug, Clone, Copy)]
pub enum ElementMode {
    /// Applied into a table at context-creation time (spec §3).
    Active { table: u32, offset: i32 },
    /// Usable only via `table.init`, never auto-applied.
    Passive,
    /// Never applied; exists only so `ref.func` can take its address
    /// without keeping the function "reachable" in the active-table sense.
    Declared,
}

/// A single reference initializer within an element segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemItem {
    FuncIndex(u32),
    Null,
}

#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub element_type: RefType,
    pub mode: ElementMode,
    pub items: Vec<ElemItem>,
}
