//! `wasmling`: a sandboxed WebAssembly decoder, single-pass structural
//! validator and bit-exact stack-machine interpreter (spec §1's "Wasm 1.0
//! core, plus the bulk-memory, reference-types and fixed-width SIMD
//! proposals").
//!
//! # Example
//!
//! ```
//! use wasmling::{decode, Context, StackLimits, Value};
//!
//! let wasm = wat::parse_str(
//!     r#"
//!     (module
//!         (func (export "add") (param i32 i32) (result i32)
//!             local.get 0
//!             local.get 1
//!             i32.add))
//!     "#,
//! )
//! .unwrap();
//!
//! let module = decode(&wasm).unwrap();
//! let mut ctx = Context::new(&module, StackLimits::default()).unwrap();
//! let add = module.export_by_name("add").unwrap().index;
//! let results = ctx.call(add, &[Value::I32(1), Value::I32(2)]).unwrap();
//! assert_eq!(results, [Value::I32(3)]);
//! ```
//!
//! # Crate Features
//!
//! | Feature | Description |
//! |:-:|:--|
//! | `std` | Enables use of Rust's standard library, including `std::error::Error` for [`Error`] and native float math. Enabled by default; disable it for a `no_std` (+ `alloc`) build, which falls back to [`libm`] for float transcendentals. |
//! | `simd` | Enables the fixed-width SIMD (`v128`) instruction family. Widens the value-stack cell from 64 to 128 bits even for modules that never use `v128`, so it is opt-in. Disabled by default. |
//!
//! Grounded on the teacher's top-level crate layout
//! (`crates/wasmi/src/lib.rs`): a `no_std`-by-default crate gated on a
//! `std` Cargo feature, documented with a runnable doctor-example. This
//! crate collapses the teacher's `Engine`/`Module`/`Store`/`Linker`
//! separation into [`decode`] (pure function, no engine handle) and
//! [`Context`] (module instance + its two interpreter stacks), since
//! spec §1 scopes exactly one module per embedding with no cross-module
//! linking or host-function imports to wire up.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod binary;
pub mod engine;
pub mod error;
pub mod float;
pub mod instance;
pub mod module;
pub mod untyped;
pub mod validate;
pub mod value;

pub use binary::Reader;
pub use error::{Error, ErrorKind, TrapCode};
pub use instance::{Context, Memory, StackLimits, Table};
pub use module::{decode, EntryId, ExternKind, Module};
pub use untyped::UntypedValue;
pub use value::{Ref, RefType, ValType, Value};
